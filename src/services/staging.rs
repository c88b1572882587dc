//! Upload staging
//!
//! The exported source image is persisted to a uniquely named temporary PNG
//! before upload. The file is owned by [`StagedImage`] and removed when it is
//! dropped, so every exit path of a request cleans up after itself.

use crate::error::{RemovalError, Result};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;

const STAGING_PREFIX: &str = "dream-bgremove-";
const STAGING_SUFFIX: &str = ".png";

/// A staged upload backed by a temporary file
#[derive(Debug)]
pub struct StagedImage {
    file: NamedTempFile,
    len: usize,
}

impl StagedImage {
    /// Write image bytes to a fresh temporary file in the system temp directory
    ///
    /// # Errors
    /// - Failed to create or write the temporary file
    pub fn write(bytes: &[u8]) -> Result<Self> {
        Self::write_in(&std::env::temp_dir(), bytes)
    }

    /// Write image bytes to a fresh temporary file inside `dir`
    ///
    /// # Errors
    /// - Failed to create or write the temporary file
    pub fn write_in(dir: &Path, bytes: &[u8]) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(STAGING_SUFFIX)
            .tempfile_in(dir)
            .map_err(|e| RemovalError::file_io_error("create staging file in", dir, &e))?;

        file.write_all(bytes)
            .and_then(|()| file.flush())
            .map_err(|e| RemovalError::file_io_error("write staging file", file.path(), &e))?;

        tracing::debug!(path = %file.path().display(), bytes = bytes.len(), "Staged image for upload");
        Ok(Self {
            file,
            len: bytes.len(),
        })
    }

    /// Read the staged bytes back for upload
    ///
    /// # Errors
    /// - Failed to read the temporary file
    pub fn read(&mut self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.len);
        let path = self.file.path().to_path_buf();
        let handle = self.file.as_file_mut();
        handle
            .seek(SeekFrom::Start(0))
            .and_then(|_| handle.read_to_end(&mut bytes))
            .map_err(|e| RemovalError::file_io_error("read staging file", &path, &e))?;
        Ok(bytes)
    }

    /// Location of the staging file while it exists
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Number of staged bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stage_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let mut staged = StagedImage::write_in(temp_dir.path(), b"\x89PNG fake").unwrap();

        assert!(staged.path().exists());
        assert_eq!(staged.len(), 9);
        assert!(staged
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with(".png"));
        assert_eq!(staged.read().unwrap(), b"\x89PNG fake");
        // Reading twice rewinds
        assert_eq!(staged.read().unwrap(), b"\x89PNG fake");
    }

    #[test]
    fn test_drop_removes_file() {
        let temp_dir = TempDir::new().unwrap();
        let staged = StagedImage::write_in(temp_dir.path(), b"data").unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());

        drop(staged);
        assert!(!path.exists());
    }

    #[test]
    fn test_unique_names() {
        let temp_dir = TempDir::new().unwrap();
        let a = StagedImage::write_in(temp_dir.path(), b"a").unwrap();
        let b = StagedImage::write_in(temp_dir.path(), b"b").unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("does-not-exist");
        assert!(matches!(
            StagedImage::write_in(&missing, b"x"),
            Err(RemovalError::Io(_))
        ));
    }
}

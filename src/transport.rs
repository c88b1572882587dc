//! Inference transport seam
//!
//! [`InferenceTransport`] is the boundary between the request pipeline and the
//! hosted inference service. The pipeline hands over the source image and a
//! model identifier and gets back an output handle: a stream of byte chunks
//! that concatenate to the encoded result image.

use crate::error::{RemovalError, Result};
use crate::models::ModelIdentifier;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt;

/// An API credential, never printed in debug output
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a credential, trimming surrounding whitespace
    ///
    /// # Errors
    /// - Key is empty or whitespace only
    pub fn new(key: &str) -> Result<Self> {
        let key = key.trim();
        if key.is_empty() {
            return Err(RemovalError::configuration("API key is required"));
        }
        Ok(Self(key.to_string()))
    }

    /// The raw credential, for the authorization header only
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// One inference call
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Encoded PNG of the source drawable
    pub source_image_bytes: Vec<u8>,
    pub model: ModelIdentifier,
    pub api_key: ApiKey,
}

/// Output handle of a finished prediction
///
/// The chunks are pulled lazily; an error chunk aborts the download.
pub struct PredictionOutput {
    chunks: BoxStream<'static, Result<Vec<u8>>>,
}

impl PredictionOutput {
    /// Output already held in memory
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::from_chunks(vec![bytes])
    }

    /// Output split into several in-memory chunks
    #[must_use]
    pub fn from_chunks(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: stream::iter(chunks.into_iter().map(Ok)).boxed(),
        }
    }

    /// Output pulled from a remote stream
    #[must_use]
    pub fn from_stream(chunks: BoxStream<'static, Result<Vec<u8>>>) -> Self {
        Self { chunks }
    }

    /// Take the underlying chunk stream
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, Result<Vec<u8>>> {
        self.chunks
    }

    /// Read every chunk and concatenate them
    ///
    /// # Errors
    /// - A chunk failed to arrive
    pub async fn collect_bytes(self) -> Result<Vec<u8>> {
        let mut chunks = self.chunks;
        let mut bytes = Vec::new();
        while let Some(chunk) = chunks.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(bytes)
    }
}

impl fmt::Debug for PredictionOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredictionOutput").finish_non_exhaustive()
    }
}

/// A hosted inference service
///
/// `Ok(None)` means the call completed but produced no output handle.
#[async_trait]
pub trait InferenceTransport: Send + Sync {
    /// Run the model on the request's image and wait for the prediction to finish
    ///
    /// # Errors
    /// - [`RemovalError::Transport`] when the service cannot be reached
    /// - [`RemovalError::Service`] when the service rejects the request
    /// - [`RemovalError::Model`] when the model reports a failure
    async fn run(&self, request: &InferenceRequest) -> Result<Option<PredictionOutput>>;

    /// Short name for logs
    fn name(&self) -> &'static str {
        "custom"
    }
}

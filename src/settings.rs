//! Persisted dialog settings
//!
//! Settings live in a small JSON file next to the host editor's own
//! configuration:
//! - Linux: `~/.config/GIMP/3.0/dream-background-remover-config.json`
//! - macOS: `~/Library/Application Support/GIMP/3.0/...`
//! - Windows: `%APPDATA%/GIMP/3.0/...`
//!
//! The directory can be overridden with `DREAM_BGREMOVE_CONFIG_DIR`.
//! Loading never fails: unreadable files fall back to defaults, missing keys are
//! backfilled and unknown or wrongly typed values are normalized with a
//! warning, key by key.

use crate::error::{RemovalError, Result};
use crate::models::ModelKey;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Settings file name inside the configuration directory
pub const CONFIG_FILE_NAME: &str = "dream-background-remover-config.json";

/// Host editor version whose configuration directory is shared
pub const GIMP_VERSION: &str = "3.0";

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "DREAM_BGREMOVE_CONFIG_DIR";

#[cfg(unix)]
const FILE_PERMISSIONS: u32 = 0o600;

/// Where the result of a removal is placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// New layer on top of the current image
    #[default]
    Layer,
    /// New standalone image
    File,
}

impl OutputMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OutputMode::Layer => "layer",
            OutputMode::File => "file",
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = RemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "layer" => Ok(OutputMode::Layer),
            "file" => Ok(OutputMode::File),
            other => Err(RemovalError::invalid_settings(format!(
                "Invalid mode: {}. Must be 'layer' or 'file'",
                other
            ))),
        }
    }
}

/// User settings for the removal dialog
#[derive(Clone, PartialEq, Eq, Serialize, Default)]
pub struct Settings {
    /// Replicate API token
    pub api_key: String,
    /// Result placement
    pub mode: OutputMode,
    /// Whether the key entry shows its contents
    pub api_key_visible: bool,
    /// Selected model
    pub model: ModelKey,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &if self.api_key.is_empty() { "" } else { "<redacted>" })
            .field("mode", &self.mode)
            .field("api_key_visible", &self.api_key_visible)
            .field("model", &self.model)
            .finish()
    }
}

/// Build settings from a parsed file, one key at a time
///
/// A missing key takes its default silently. A key with the wrong type or an
/// unknown value takes its default with a warning; the other keys are kept.
fn normalize(raw: &Map<String, Value>) -> Settings {
    let defaults = Settings::default();

    let api_key = match raw.get("api_key") {
        None => defaults.api_key,
        Some(Value::String(key)) => key.clone(),
        Some(other) => {
            tracing::warn!(key = "api_key", value_type = json_type(other), "Wrong type in settings, using default");
            defaults.api_key
        },
    };

    let mode = match raw.get("mode") {
        None => defaults.mode,
        Some(Value::String(mode)) => mode.parse().unwrap_or_else(|_| {
            tracing::warn!(mode = %mode, default = %defaults.mode, "Unknown output mode in settings, using default");
            defaults.mode
        }),
        Some(other) => {
            tracing::warn!(key = "mode", value_type = json_type(other), "Wrong type in settings, using default");
            defaults.mode
        },
    };

    let api_key_visible = match raw.get("api_key_visible") {
        None => defaults.api_key_visible,
        Some(Value::Bool(visible)) => *visible,
        Some(other) => {
            tracing::warn!(key = "api_key_visible", value_type = json_type(other), "Wrong type in settings, using default");
            defaults.api_key_visible
        },
    };

    let model = match raw.get("model") {
        None => defaults.model,
        Some(Value::String(model)) => ModelKey::from_key_or_default(model),
        Some(other) => {
            tracing::warn!(key = "model", value_type = json_type(other), "Wrong type in settings, using default");
            defaults.model
        },
    };

    Settings {
        api_key,
        mode,
        api_key_visible,
        model,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Load/store access to the settings file
#[derive(Debug, Clone)]
pub struct SettingsStore {
    config_dir: PathBuf,
}

impl SettingsStore {
    /// Create a store at the platform configuration directory
    ///
    /// # Errors
    /// - Failed to determine the user configuration directory
    pub fn new() -> Result<Self> {
        Ok(Self {
            config_dir: Self::default_config_dir()?,
        })
    }

    /// Create a store rooted at a specific directory
    #[must_use]
    pub fn with_config_dir<P: Into<PathBuf>>(config_dir: P) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    fn default_config_dir() -> Result<PathBuf> {
        if let Ok(dir_override) = std::env::var(CONFIG_DIR_ENV) {
            return Ok(PathBuf::from(dir_override));
        }

        Ok(dirs::config_dir()
            .ok_or_else(|| {
                RemovalError::configuration(format!(
                    "Failed to determine configuration directory. Set {} environment variable.",
                    CONFIG_DIR_ENV
                ))
            })?
            .join("GIMP")
            .join(GIMP_VERSION))
    }

    /// Full path of the settings file
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Load settings, falling back to defaults on any problem
    #[must_use]
    pub fn load(&self) -> Settings {
        match self.try_load() {
            Ok(Some(settings)) => settings,
            Ok(None) => Settings::default(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load settings, using defaults");
                Settings::default()
            },
        }
    }

    /// Load settings, reporting why the file could not be used
    ///
    /// Returns `Ok(None)` when no settings file exists yet.
    ///
    /// # Errors
    /// - Settings file unreadable
    /// - Settings file is not a JSON object
    pub fn try_load(&self) -> Result<Option<Settings>> {
        let path = self.config_file();
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| RemovalError::file_io_error("read settings file", &path, &e))?;
        let raw: Map<String, Value> = serde_json::from_str(&content).map_err(|e| {
            RemovalError::invalid_settings(format!("{} ({})", e, path.display()))
        })?;

        Ok(Some(normalize(&raw)))
    }

    /// Store settings with owner-only permissions
    ///
    /// # Errors
    /// - Failed to create the configuration directory
    /// - Failed to write the settings file or set its permissions
    pub fn store(&self, settings: &Settings) -> Result<()> {
        fs::create_dir_all(&self.config_dir).map_err(|e| {
            RemovalError::file_io_error("create configuration directory", &self.config_dir, &e)
        })?;

        let path = self.config_file();
        let json = serde_json::to_string_pretty(settings)
            .map_err(|e| RemovalError::invalid_settings(e.to_string()))?;

        let mut file = fs::File::create(&path)
            .map_err(|e| RemovalError::file_io_error("create settings file", &path, &e))?;
        Self::restrict_permissions(&file, &path)?;
        file.write_all(json.as_bytes())
            .map_err(|e| RemovalError::file_io_error("write settings file", &path, &e))?;

        tracing::debug!(path = %path.display(), mode = %settings.mode, model = %settings.model, "Stored settings");
        Ok(())
    }

    /// Store loosely-typed values as the dialog hands them over
    ///
    /// An unknown model key is replaced by the default with a warning.
    ///
    /// # Errors
    /// - `mode` is neither `"layer"` nor `"file"`
    /// - Writing the settings file failed
    pub fn store_values(
        &self,
        api_key: &str,
        mode: &str,
        api_key_visible: bool,
        model: &str,
    ) -> Result<Settings> {
        let settings = Settings {
            api_key: api_key.to_string(),
            mode: mode.parse()?,
            api_key_visible,
            model: ModelKey::from_key_or_default(model),
        };
        self.store(&settings)?;
        Ok(settings)
    }

    #[cfg(unix)]
    fn restrict_permissions(file: &fs::File, path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        file.set_permissions(fs::Permissions::from_mode(FILE_PERMISSIONS))
            .map_err(|e| RemovalError::file_io_error("set permissions on", path, &e))
    }

    #[cfg(not(unix))]
    fn restrict_permissions(_file: &fs::File, _path: &Path) -> Result<()> {
        Ok(())
    }
}

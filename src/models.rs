//! Remote model table and identifier parsing
//!
//! Models are referred to by a short key in settings and on the command line.
//! The key resolves to a full Replicate identifier of the form
//! `owner/name[:version]`.

use crate::error::{RemovalError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Known background removal models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ModelKey {
    /// 851 Labs background remover (pinned version)
    #[default]
    #[serde(rename = "851-labs")]
    Labs851,
    /// Bria remove-background (latest official version)
    #[serde(rename = "bria")]
    Bria,
}

impl ModelKey {
    /// Every entry of the model table, in display order
    pub const ALL: [ModelKey; 2] = [ModelKey::Labs851, ModelKey::Bria];

    /// Short key used in settings files and on the command line
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            ModelKey::Labs851 => "851-labs",
            ModelKey::Bria => "bria",
        }
    }

    /// Full remote model identifier
    #[must_use]
    pub fn identifier(self) -> &'static str {
        match self {
            ModelKey::Labs851 => {
                "851-labs/background-remover:a029dff38972b5fda4ec5d75d7d1cd25aeff621d2cf4946a41055d7db66b80bc"
            },
            ModelKey::Bria => "bria/remove-background",
        }
    }

    /// Human-readable name for model pickers
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            ModelKey::Labs851 => "851 Labs Background Remover (Default)",
            ModelKey::Bria => "Bria Remove Background",
        }
    }

    /// Look up a short key, `None` when the table has no such entry
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|model| model.key() == key)
    }

    /// Look up a short key, falling back to the default model
    #[must_use]
    pub fn from_key_or_default(key: &str) -> Self {
        Self::from_key(key).unwrap_or_else(|| {
            tracing::warn!(
                model = %key,
                default = %Self::default().key(),
                "Unknown model, using default"
            );
            Self::default()
        })
    }

    /// Parsed identifier for this entry
    #[must_use]
    pub fn model_identifier(self) -> ModelIdentifier {
        let (owner, name, version) = match self {
            ModelKey::Labs851 => (
                "851-labs",
                "background-remover",
                Some("a029dff38972b5fda4ec5d75d7d1cd25aeff621d2cf4946a41055d7db66b80bc"),
            ),
            ModelKey::Bria => ("bria", "remove-background", None),
        };
        ModelIdentifier {
            owner: owner.to_string(),
            name: name.to_string(),
            version: version.map(str::to_string),
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ModelKey {
    type Err = RemovalError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_key(s).ok_or_else(|| {
            let known: Vec<&str> = Self::ALL.iter().map(|m| m.key()).collect();
            RemovalError::configuration(format!(
                "Unknown model '{}'. Available models: {}",
                s,
                known.join(", ")
            ))
        })
    }
}

/// Get the full model identifier for a short key, defaulting on unknown keys
#[must_use]
pub fn model_name(key: &str) -> &'static str {
    ModelKey::from_key(key).unwrap_or_default().identifier()
}

/// Get a display name for a short key, echoing unknown keys back
#[must_use]
pub fn model_display_name(key: &str) -> String {
    ModelKey::from_key(key).map_or_else(|| key.to_string(), |m| m.display_name().to_string())
}

/// A parsed remote model identifier: `owner/name[:version]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelIdentifier {
    owner: String,
    name: String,
    version: Option<String>,
}

impl ModelIdentifier {
    /// Parse an identifier string
    ///
    /// # Errors
    /// - Empty identifier
    /// - Missing owner or model name
    /// - Empty version after `:`
    pub fn parse(identifier: &str) -> Result<Self> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(RemovalError::configuration("Model identifier is required"));
        }

        let (path, version) = match identifier.split_once(':') {
            Some((path, version)) => {
                if version.is_empty() {
                    return Err(RemovalError::configuration(format!(
                        "Invalid model identifier '{}': empty version",
                        identifier
                    )));
                }
                (path, Some(version.to_string()))
            },
            None => (identifier, None),
        };

        let (owner, name) = path.split_once('/').ok_or_else(|| {
            RemovalError::configuration(format!(
                "Invalid model identifier '{}'. Expected format: owner/name[:version]",
                identifier
            ))
        })?;

        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(RemovalError::configuration(format!(
                "Invalid model identifier '{}'. Expected format: owner/name[:version]",
                identifier
            )));
        }

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
            version,
        })
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pinned version hash, if any
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

impl fmt::Display for ModelIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)?;
        if let Some(version) = &self.version {
            write!(f, ":{}", version)?;
        }
        Ok(())
    }
}

impl FromStr for ModelIdentifier {
    type Err = RemovalError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<ModelKey> for ModelIdentifier {
    fn from(key: ModelKey) -> Self {
        key.model_identifier()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_table() {
        assert_eq!(ModelKey::ALL.len(), 2);
        assert_eq!(ModelKey::default(), ModelKey::Labs851);
        assert_eq!(model_name("bria"), "bria/remove-background");
        assert_eq!(
            model_name("invalid"),
            "851-labs/background-remover:a029dff38972b5fda4ec5d75d7d1cd25aeff621d2cf4946a41055d7db66b80bc"
        );
    }

    #[test]
    fn test_display_names() {
        assert_eq!(model_display_name("bria"), "Bria Remove Background");
        assert_eq!(
            model_display_name("851-labs"),
            "851 Labs Background Remover (Default)"
        );
        assert_eq!(model_display_name("mystery"), "mystery");
    }

    #[test]
    fn test_key_round_trip_through_serde() {
        for model in ModelKey::ALL {
            let json = serde_json::to_string(&model).unwrap();
            assert_eq!(json, format!("\"{}\"", model.key()));
            let back: ModelKey = serde_json::from_str(&json).unwrap();
            assert_eq!(back, model);
        }
    }

    #[test]
    fn test_from_str_rejects_unknown() {
        assert_eq!("bria".parse::<ModelKey>().unwrap(), ModelKey::Bria);
        let err = "unknown".parse::<ModelKey>().unwrap_err();
        assert!(err.to_string().contains("851-labs, bria"));
        assert_eq!(ModelKey::from_key_or_default("unknown"), ModelKey::Labs851);
    }

    #[test]
    fn test_identifier_parsing() {
        let pinned = ModelKey::Labs851.model_identifier();
        assert_eq!(pinned.owner(), "851-labs");
        assert_eq!(pinned.name(), "background-remover");
        assert_eq!(
            pinned.version(),
            Some("a029dff38972b5fda4ec5d75d7d1cd25aeff621d2cf4946a41055d7db66b80bc")
        );
        assert_eq!(pinned.to_string(), ModelKey::Labs851.identifier());
        for model in ModelKey::ALL {
            assert_eq!(
                ModelIdentifier::parse(model.identifier()).unwrap(),
                model.model_identifier()
            );
        }

        let latest = ModelIdentifier::parse("bria/remove-background").unwrap();
        assert_eq!(latest.version(), None);
        assert_eq!(latest.to_string(), "bria/remove-background");
    }

    #[test]
    fn test_identifier_parsing_errors() {
        assert!(ModelIdentifier::parse("").is_err());
        assert!(ModelIdentifier::parse("   ").is_err());
        assert!(ModelIdentifier::parse("no-owner").is_err());
        assert!(ModelIdentifier::parse("/name").is_err());
        assert!(ModelIdentifier::parse("owner/").is_err());
        assert!(ModelIdentifier::parse("owner/name:").is_err());
        assert!(ModelIdentifier::parse("a/b/c").is_err());
    }
}

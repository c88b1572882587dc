//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::Cli;
use crate::config::ClientConfig;
use crate::models::ModelKey;
use crate::settings::{OutputMode, Settings};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the Replicate API token
pub(crate) const API_TOKEN_ENV: &str = "REPLICATE_API_TOKEN";

/// Suffix appended to the input file stem for the default output path
const OUTPUT_SUFFIX: &str = "-background-removed.png";

/// Where the API key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeySource {
    Flag,
    Environment,
    Settings,
}

/// Fully resolved options for one CLI run
#[derive(Debug, Clone)]
pub(crate) struct RunConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub settings: Settings,
    pub key_source: Option<KeySource>,
    pub client: ClientConfig,
}

/// Convert CLI arguments to a run configuration
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the run configuration from arguments, environment and stored settings
    pub(crate) fn from_cli(cli: &Cli, stored: Settings) -> Result<RunConfig> {
        let input = cli
            .input
            .clone()
            .context("An input image is required")?;

        let env_key = std::env::var(API_TOKEN_ENV).ok();
        let (api_key, key_source) =
            Self::resolve_api_key(cli.api_key.as_deref(), env_key.as_deref(), &stored.api_key);

        let settings = Settings {
            api_key,
            mode: cli.mode.map_or(stored.mode, OutputMode::from),
            api_key_visible: stored.api_key_visible,
            model: cli.model.unwrap_or(stored.model),
        };

        let mut client = ClientConfig::from_env().context("Invalid client configuration")?;
        if let Some(seconds) = cli.timeout {
            client.request_timeout = Duration::from_secs(seconds);
            client.validate().context("Invalid --timeout")?;
        }

        let output = cli
            .output
            .clone()
            .unwrap_or_else(|| Self::default_output_path(&input));

        Ok(RunConfig {
            input,
            output,
            settings,
            key_source,
            client,
        })
    }

    /// Pick the first non-blank key: flag, then environment, then settings
    pub(crate) fn resolve_api_key(
        flag: Option<&str>,
        env: Option<&str>,
        stored: &str,
    ) -> (String, Option<KeySource>) {
        let candidates = [
            (flag, KeySource::Flag),
            (env, KeySource::Environment),
            (Some(stored), KeySource::Settings),
        ];
        candidates
            .into_iter()
            .find_map(|(key, source)| {
                key.map(str::trim)
                    .filter(|key| !key.is_empty())
                    .map(|key| (key.to_string(), Some(source)))
            })
            .unwrap_or_default()
    }

    /// `<dir>/<stem>-background-removed.png` next to the input
    pub(crate) fn default_output_path(input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map_or_else(|| "image".into(), |stem| stem.to_string_lossy());
        input.with_file_name(format!("{}{}", stem, OUTPUT_SUFFIX))
    }

    /// Parse a model key argument
    pub(crate) fn parse_model_key(value: &str) -> std::result::Result<ModelKey, String> {
        value.parse::<ModelKey>().map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_precedence() {
        assert_eq!(
            CliConfigBuilder::resolve_api_key(Some("flag"), Some("env"), "stored"),
            ("flag".to_string(), Some(KeySource::Flag))
        );
        assert_eq!(
            CliConfigBuilder::resolve_api_key(None, Some("env"), "stored"),
            ("env".to_string(), Some(KeySource::Environment))
        );
        assert_eq!(
            CliConfigBuilder::resolve_api_key(Some("  "), Some(""), "stored"),
            ("stored".to_string(), Some(KeySource::Settings))
        );
        assert_eq!(
            CliConfigBuilder::resolve_api_key(None, None, ""),
            (String::new(), None)
        );
    }

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            CliConfigBuilder::default_output_path(Path::new("/photos/cat.jpg")),
            PathBuf::from("/photos/cat-background-removed.png")
        );
        assert_eq!(
            CliConfigBuilder::default_output_path(Path::new("dog.png")),
            PathBuf::from("dog-background-removed.png")
        );
    }

    #[test]
    fn test_parse_model_key() {
        assert_eq!(CliConfigBuilder::parse_model_key("bria"), Ok(ModelKey::Bria));
        assert!(CliConfigBuilder::parse_model_key("nope")
            .unwrap_err()
            .contains("Available models"));
    }
}

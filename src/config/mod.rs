use crate::models::Settings;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, Environment, File, FileFormat, Map};

/// System-wide settings file, optional
pub const DEFAULT_CONFIG_FILE: &str = "/etc/cruft/cruft.yaml";

/// Prefix of environment overrides (`CRUFT_CACHE_DIR=/var/cache`)
pub const ENV_PREFIX: &str = "CRUFT";

/// Loads [`Settings`] from three layers, later ones winning:
///
/// 1. built-in defaults
/// 2. a YAML file: [`DEFAULT_CONFIG_FILE`] if present, or an explicit
///    `--config` path which then must exist
/// 3. `CRUFT_*` environment variables
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_file: Utf8PathBuf,
    required: bool,
    env_override: Option<Map<String, String>>,
}

impl ConfigManager {
    pub fn new(explicit: Option<&Utf8Path>) -> Self {
        match explicit {
            Some(path) => Self {
                config_file: path.to_path_buf(),
                required: true,
                env_override: None,
            },
            None => Self {
                config_file: Utf8PathBuf::from(DEFAULT_CONFIG_FILE),
                required: false,
                env_override: None,
            },
        }
    }

    /// Read environment overrides from `vars` instead of the process
    /// environment
    pub fn with_env(mut self, vars: Map<String, String>) -> Self {
        self.env_override = Some(vars);
        self
    }

    pub fn config_file(&self) -> &Utf8Path {
        &self.config_file
    }

    pub fn load(&self) -> Result<Settings> {
        let defaults =
            Config::try_from(&Settings::default()).context("Failed to build default settings")?;

        let settings: Settings = Config::builder()
            .add_source(defaults)
            .add_source(
                File::new(self.config_file.as_str(), FileFormat::Yaml).required(self.required),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(self.env_override.clone()),
            )
            .build()
            .with_context(|| format!("Failed to load settings from {}", self.config_file))?
            .try_deserialize()
            .with_context(|| format!("Invalid settings in {}", self.config_file))?;

        tracing::debug!("Loaded settings: {:?}", settings);
        Ok(settings)
    }
}

/// Effective settings as YAML, for `cruft config`
pub fn settings_to_yaml(settings: &Settings) -> Result<String> {
    serde_yaml_ng::to_string(settings).context("Failed to serialize settings to YAML")
}

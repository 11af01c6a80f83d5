//! Settings file discovery and loading.

use std::path::{Path, PathBuf};

use mailprobe_common::{ConfigError, CoordConfig, ValidationConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Names a settings file explicitly, ahead of the default locations.
pub const CONFIG_ENV: &str = "MAILPROBE_CONFIG";

const DEFAULT_PATHS: &[&str] = &["./mailprobe.toml", "/etc/mailprobe/mailprobe.toml"];

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read config from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config from {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config file does not exist: {}", .0.display())]
    Missing(PathBuf),

    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

/// Everything a run of the binary is configured with.
///
/// ```toml
/// [validation]
/// max_exchangers = 2
///
/// [validation.identity]
/// helo_domain = "probe.example.net"
///
/// [coordination]
/// redis_url = "redis://127.0.0.1:6379/0"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub coordination: CoordConfig,
}

impl Settings {
    /// Parses and validates settings from TOML text.
    pub fn parse(path: &Path, text: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        settings.validation.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(path, &text)
    }

    /// Loads the first settings file found, or defaults when there is none.
    ///
    /// An explicitly named file, from the command line or [`CONFIG_ENV`],
    /// must exist.
    pub fn discover(
        explicit: Option<&Path>,
        from_env: Option<PathBuf>,
    ) -> Result<Self, SettingsError> {
        match find_config_file(explicit, from_env)? {
            Some(path) => {
                tracing::debug!("Loading settings from {}", path.display());
                Self::load(&path)
            }
            None => {
                tracing::debug!("No settings file found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Precedence: the explicit path, then `from_env`, then [`DEFAULT_PATHS`].
fn find_config_file(
    explicit: Option<&Path>,
    from_env: Option<PathBuf>,
) -> Result<Option<PathBuf>, SettingsError> {
    if let Some(path) = explicit.map(Path::to_path_buf).or(from_env) {
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(SettingsError::Missing(path));
    }

    Ok(DEFAULT_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists()))
}

//! Addon configuration read from environment variables.
//!
//! # Responsibility
//! - Resolve `ADDONKIT_LOG_LEVEL` and `ADDONKIT_LOG_DIR` once at module
//!   initialisation.
//!
//! # Invariants
//! - A missing `ADDONKIT_LOG_DIR` keeps logging off; it is never an error.

use crate::logging::{default_log_level, init_logging, normalize_level};
use std::fmt;
use std::path::{Path, PathBuf};

pub const LOG_LEVEL_VAR: &str = "ADDONKIT_LOG_LEVEL";
pub const LOG_DIR_VAR: &str = "ADDONKIT_LOG_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonConfig {
    pub log_level: &'static str,
    /// Absolute directory for rolling log files; `None` disables logging.
    pub log_dir: Option<PathBuf>,
}

impl Default for AddonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_dir: None,
        }
    }
}

impl AddonConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let log_level = match non_blank(lookup(LOG_LEVEL_VAR)) {
            Some(raw) => normalize_level(&raw).map_err(|_| ConfigError::InvalidLogLevel(raw))?,
            None => default_log_level(),
        };
        let log_dir = match non_blank(lookup(LOG_DIR_VAR)) {
            Some(raw) if Path::new(&raw).is_absolute() => Some(PathBuf::from(raw)),
            Some(raw) => return Err(ConfigError::RelativeLogDir(raw)),
            None => None,
        };
        Ok(Self { log_level, log_dir })
    }

    /// Starts logging when a directory is configured; returns whether
    /// logging is active afterwards.
    pub fn apply_logging(&self) -> Result<bool, String> {
        let Some(log_dir) = &self.log_dir else {
            return Ok(false);
        };
        let log_dir = log_dir
            .to_str()
            .ok_or_else(|| format!("{LOG_DIR_VAR} is not valid UTF-8"))?;
        init_logging(self.log_level, log_dir)?;
        Ok(true)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidLogLevel(String),
    RelativeLogDir(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLogLevel(value) => write!(
                f,
                "{LOG_LEVEL_VAR} must be one of trace|debug|info|warn|error (got `{value}`)"
            ),
            Self::RelativeLogDir(value) => {
                write!(f, "{LOG_DIR_VAR} must be an absolute path (got `{value}`)")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::{AddonConfig, ConfigError, LOG_DIR_VAR, LOG_LEVEL_VAR};
    use crate::logging::default_log_level;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_leave_logging_off() {
        let config = AddonConfig::from_lookup(lookup(&[])).expect("defaults");
        assert_eq!(config, AddonConfig::default());
        assert_eq!(config.log_level, default_log_level());
        assert!(!config.apply_logging().expect("no-op"));
    }

    #[test]
    fn reads_level_and_directory() {
        let dir = std::env::temp_dir().join("addonkit-config");
        let dir_str = dir.to_str().expect("utf-8 temp dir");
        let config = AddonConfig::from_lookup(lookup(&[
            (LOG_LEVEL_VAR, " WARN "),
            (LOG_DIR_VAR, dir_str),
        ]))
        .expect("config");
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.log_dir, Some(PathBuf::from(dir_str)));
    }

    #[test]
    fn rejects_bad_values() {
        let level = AddonConfig::from_lookup(lookup(&[(LOG_LEVEL_VAR, "loud")]))
            .expect_err("bad level");
        assert_eq!(level, ConfigError::InvalidLogLevel("loud".to_string()));

        let dir = AddonConfig::from_lookup(lookup(&[(LOG_DIR_VAR, "logs")]))
            .expect_err("relative dir");
        assert!(dir.to_string().contains("absolute"));
    }
}

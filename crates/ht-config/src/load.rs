//! Loading a configuration file into validated priors and settings.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::priors::Priors;
use crate::resolve::{resolve_config, ConfigPath};
use crate::settings::RunSettings;
use crate::snapshot::ConfigSnapshot;
use crate::validate::{validate_priors, validate_settings, ValidationError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

impl From<ConfigError> for ht_common::Error {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid(v) => v.into(),
            other => ht_common::Error::Config(other.to_string()),
        }
    }
}

/// On-disk layout. Either section may be omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub settings: Option<RunSettings>,

    #[serde(default)]
    pub priors: Option<Priors>,
}

/// Everything a run needs from configuration.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub priors: Priors,
    pub settings: RunSettings,
    pub snapshot: ConfigSnapshot,
}

/// Resolve, read and validate the configuration.
pub fn load_config(cli_path: Option<&Path>) -> Result<ResolvedConfig, ConfigError> {
    load_from(&resolve_config(cli_path))
}

/// Read and validate a resolved path; defaults when there is no file.
pub fn load_from(location: &ConfigPath) -> Result<ResolvedConfig, ConfigError> {
    let (file, raw) = match &location.path {
        Some(path) => {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            let file: ConfigFile =
                serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                    path: path.display().to_string(),
                    source,
                })?;
            (file, Some(raw))
        }
        None => (ConfigFile::default(), None),
    };

    let settings = file.settings.unwrap_or_default();
    let priors = file
        .priors
        .unwrap_or_else(|| Priors::default_for(settings.state_space));

    validate_settings(&settings)?;
    validate_priors(&priors, &settings)?;

    let snapshot = ConfigSnapshot::new(&priors, &settings, location, raw.as_deref());
    Ok(ResolvedConfig {
        priors,
        settings,
        snapshot,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::ConfigSource;
    use ht_common::StateSpace;
    use tempfile::TempDir;

    fn at(path: &Path) -> ConfigPath {
        ConfigPath {
            path: Some(path.to_path_buf()),
            source: ConfigSource::CliArgument,
        }
    }

    #[test]
    fn defaults_without_file() {
        let cfg = load_from(&ConfigPath::default()).unwrap();
        assert_eq!(cfg.settings, RunSettings::default());
        assert_eq!(cfg.priors, Priors::default());
        assert!(cfg.snapshot.config_hash.is_none());
    }

    #[test]
    fn settings_only_file_picks_matching_default_priors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"settings": {"state_space": "three_state", "iterations": 7}}"#,
        )
        .unwrap();

        let cfg = load_from(&at(&path)).unwrap();
        assert_eq!(cfg.settings.state_space, StateSpace::ThreeState);
        assert_eq!(cfg.priors.importation.alpha.len(), 3);
        assert_eq!(cfg.snapshot.summary.iterations, 7);
        assert!(cfg.snapshot.config_hash.is_some());
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_from(&at(&path)), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn invalid_values_are_fatal_config_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"settings": {"max_rejections": 0}}"#).unwrap();
        let err = load_from(&at(&path)).unwrap_err();
        let unified: ht_common::Error = err.into();
        assert!(unified.is_fatal());
        assert_eq!(unified.code(), 11);
    }
}

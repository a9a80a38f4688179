//! Configuration snapshots for run reproducibility.
//!
//! A snapshot captures the configuration a run started with so its output
//! can be traced back to the exact priors and settings later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::resolve::ConfigPath;
use crate::{Priors, RunSettings};

/// A frozen snapshot of configuration state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub timestamp: DateTime<Utc>,

    pub schema_version: String,

    /// SHA-256 of the raw config file, when one was read.
    #[serde(default)]
    pub config_hash: Option<String>,

    #[serde(default)]
    pub config_path: Option<String>,

    pub config_source: String,

    /// SHA-256 of the effective (post-default) configuration.
    pub effective_hash: String,

    pub summary: ConfigSummary,
}

/// Key values for quick reference in logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub state_space: String,
    pub iterations: u32,
    pub burn_in: u32,
    pub seed: u64,
    pub max_mode: bool,
    pub fixed_parameters: usize,
}

impl ConfigSnapshot {
    pub fn new(
        priors: &Priors,
        settings: &RunSettings,
        location: &ConfigPath,
        raw: Option<&str>,
    ) -> Self {
        let effective = format!(
            "{}:{}",
            serde_json::to_string(priors).unwrap_or_default(),
            serde_json::to_string(settings).unwrap_or_default()
        );

        ConfigSnapshot {
            timestamp: Utc::now(),
            schema_version: crate::CONFIG_SCHEMA_VERSION.to_string(),
            config_hash: raw.map(hash_content),
            config_path: location.path.as_ref().map(|p| p.display().to_string()),
            config_source: location.source.to_string(),
            effective_hash: hash_content(&effective),
            summary: ConfigSummary::new(priors, settings),
        }
    }

    /// Serialize snapshot to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Same effective configuration.
    pub fn matches(&self, other: &ConfigSnapshot) -> bool {
        self.effective_hash == other.effective_hash
    }

    /// First 12 hex chars of the effective hash.
    pub fn short_id(&self) -> &str {
        &self.effective_hash[..12.min(self.effective_hash.len())]
    }
}

impl ConfigSummary {
    fn new(priors: &Priors, settings: &RunSettings) -> Self {
        let fixed = [
            priors.acquisition.background.fixed,
            priors.acquisition.transmission.fixed,
            priors.progression.as_ref().is_some_and(|p| p.fixed),
            priors.clearance.fixed,
            priors.importation.fixed,
            priors.surveillance_test.sensitivity.fixed,
            priors.surveillance_test.specificity.fixed,
            priors.clinical_test.sensitivity.fixed,
            priors.clinical_test.specificity.fixed,
        ];
        ConfigSummary {
            state_space: format!("{:?}", settings.state_space),
            iterations: settings.iterations,
            burn_in: settings.burn_in,
            seed: settings.seed,
            max_mode: settings.max_mode,
            fixed_parameters: fixed.iter().filter(|f| **f).count(),
        }
    }
}

/// Hash content with SHA-256 and return hex string.
fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> ConfigSnapshot {
        ConfigSnapshot::new(
            &Priors::default(),
            &RunSettings::default(),
            &ConfigPath::default(),
            None,
        )
    }

    #[test]
    fn test_snapshot_short_id() {
        assert_eq!(defaults().short_id().len(), 12);
    }

    #[test]
    fn test_snapshot_matches() {
        assert!(defaults().matches(&defaults()));

        let mut settings = RunSettings::default();
        settings.seed = 99;
        let other = ConfigSnapshot::new(
            &Priors::default(),
            &settings,
            &ConfigPath::default(),
            None,
        );
        assert!(!defaults().matches(&other));
    }

    #[test]
    fn test_hash_content() {
        let hash = hash_content("test");
        assert_eq!(hash, hash_content("test"));
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn test_summary_counts_fixed() {
        let mut priors = Priors::default();
        priors.clearance.fixed = true;
        priors.clinical_test.sensitivity.fixed = true;
        let snap = ConfigSnapshot::new(&priors, &RunSettings::default(), &ConfigPath::default(), None);
        assert_eq!(snap.summary.fixed_parameters, 2);
    }

    #[test]
    fn test_snapshot_json_roundtrip() {
        let snapshot = defaults();
        let restored = ConfigSnapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
        assert!(snapshot.matches(&restored));
        assert_eq!(restored.config_source, "builtin default");
    }
}

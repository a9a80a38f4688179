//! Stage and event names shared by every log line.
//!
//! Call sites emit `event = event_names::X, stage = %Stage::Y` so JSON output
//! can be filtered on stable keys.

use serde::{Deserialize, Serialize};

/// Pipeline stages of an inference run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Configuration and logging setup.
    Init,
    /// Parsing and history graph construction.
    Build,
    /// Episode resampling.
    Sample,
    /// Parameter updates.
    Update,
    /// TSV rows and event dumps.
    Output,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Build => "build",
            Stage::Sample => "sample",
            Stage::Update => "update",
            Stage::Output => "output",
        };
        write!(f, "{}", s)
    }
}

/// Standard event names used in logging.
pub mod event_names {
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    pub const CONFIG_LOADED: &str = "config.loaded";

    pub const PARSE_DIAGNOSTIC: &str = "build.diagnostic";
    pub const BUILD_FINISHED: &str = "build.finished";
    pub const EPISODE_REPAIRED: &str = "build.episode_repaired";

    pub const SAMPLER_INITIALIZED: &str = "sample.initialized";
    pub const EPISODE_RESAMPLED: &str = "sample.episode";
    pub const UNIFORMIZATION_FALLBACK: &str = "sample.uniformization_fallback";
    pub const SIMULATION_FINISHED: &str = "sample.simulated";

    pub const PARAMETERS_UPDATED: &str = "update.parameters";

    pub const ITERATION_WRITTEN: &str = "output.iteration";
    pub const EVENTS_DUMPED: &str = "output.events";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display_matches_serde() {
        for stage in [
            Stage::Init,
            Stage::Build,
            Stage::Sample,
            Stage::Update,
            Stage::Output,
        ] {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{}\"", stage));
        }
    }

    #[test]
    fn test_event_names_are_stage_prefixed() {
        assert!(event_names::EPISODE_RESAMPLED.starts_with("sample."));
        assert!(event_names::PARAMETERS_UPDATED.starts_with("update."));
        assert!(event_names::BUILD_FINISHED.starts_with("build."));
    }
}

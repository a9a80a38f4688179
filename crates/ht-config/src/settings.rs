//! Run settings for the MCMC driver.

use ht_common::StateSpace;
use serde::{Deserialize, Serialize};

/// Default cap on whole-interval rejection attempts before the engine
/// switches to uniformization.
pub const DEFAULT_MAX_REJECTIONS: u32 = 1000;

/// How a run iterates and what it writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunSettings {
    /// Iterations written to output.
    pub iterations: u32,

    /// Iterations run before output starts.
    pub burn_in: u32,

    pub seed: u64,

    /// Use posterior modes instead of random draws.
    pub max_mode: bool,

    pub state_space: StateSpace,

    /// Whole-interval rejection attempts per free CTMC interval.
    pub max_rejections: u32,

    /// Seed latent state from simulated ground truth. Validation only.
    pub cheat: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        RunSettings {
            iterations: 1000,
            burn_in: 100,
            seed: 1,
            max_mode: false,
            state_space: StateSpace::TwoState,
            max_rejections: DEFAULT_MAX_REJECTIONS,
            cheat: false,
        }
    }
}

impl RunSettings {
    pub fn with_iterations(mut self, iterations: u32, burn_in: u32) -> Self {
        self.iterations = iterations;
        self.burn_in = burn_in;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_mode(mut self, max_mode: bool) -> Self {
        self.max_mode = max_mode;
        self
    }

    pub fn with_state_space(mut self, space: StateSpace) -> Self {
        self.state_space = space;
        self
    }

    /// Total sweeps including burn-in.
    pub fn total_iterations(&self) -> u32 {
        self.burn_in.saturating_add(self.iterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let s: RunSettings = serde_json::from_str(r#"{"iterations": 5, "state_space": "three_state"}"#)
            .unwrap();
        assert_eq!(s.iterations, 5);
        assert_eq!(s.burn_in, 100);
        assert_eq!(s.state_space, StateSpace::ThreeState);
        assert_eq!(s.max_rejections, DEFAULT_MAX_REJECTIONS);
    }

    #[test]
    fn total_counts_burn_in() {
        let s = RunSettings::default().with_iterations(10, 3);
        assert_eq!(s.total_iterations(), 13);
    }
}

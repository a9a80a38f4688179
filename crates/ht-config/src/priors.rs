//! Bayesian prior configuration for the transmission model parameters.
//!
//! Rates use Gamma priors in the rate parameterization, test accuracies use
//! Beta priors, and the admission (importation) distribution uses a
//! Dirichlet prior with one weight per colonization state.

use ht_common::StateSpace;
use serde::{Deserialize, Serialize};

/// Complete priors configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Priors {
    pub schema_version: String,

    #[serde(default)]
    pub description: Option<String>,

    pub acquisition: AcquisitionPriors,

    /// Latent → colonized rate; only consulted by three-state models.
    #[serde(default)]
    pub progression: Option<GammaParams>,

    pub clearance: GammaParams,

    pub importation: DirichletParams,

    pub surveillance_test: TestPriors,

    pub clinical_test: TestPriors,
}

/// Acquisition is background + mass action:
/// `rate = background + transmission * colonized_co_residents`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcquisitionPriors {
    pub background: GammaParams,
    pub transmission: GammaParams,
}

/// Sensitivity is P(positive | colonized); specificity is
/// P(negative | not colonized). Latent patients test like uncolonized ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestPriors {
    pub sensitivity: BetaParams,
    pub specificity: BetaParams,
}

/// Beta distribution parameters: Beta(alpha, beta).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BetaParams {
    pub alpha: f64,
    pub beta: f64,

    /// Starting value; the prior mean when absent.
    #[serde(default)]
    pub initial: Option<f64>,

    /// Keep the parameter at its starting value instead of updating it.
    #[serde(default)]
    pub fixed: bool,

    #[serde(rename = "_comment", default)]
    pub comment: Option<String>,
}

/// Gamma distribution parameters: Gamma(shape, rate).
/// Note: uses RATE parameterization (rate = 1/scale).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GammaParams {
    pub shape: f64,
    pub rate: f64,

    #[serde(default)]
    pub initial: Option<f64>,

    #[serde(default)]
    pub fixed: bool,

    #[serde(rename = "_comment", default)]
    pub comment: Option<String>,
}

/// Dirichlet distribution parameters (pseudo-counts).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirichletParams {
    pub alpha: Vec<f64>,

    #[serde(default)]
    pub initial: Option<Vec<f64>>,

    #[serde(default)]
    pub fixed: bool,
}

impl BetaParams {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self {
            alpha,
            beta,
            initial: None,
            fixed: false,
            comment: None,
        }
    }

    /// Starting value: explicit initial or the prior mean.
    pub fn start(&self) -> f64 {
        self.initial.unwrap_or(self.alpha / (self.alpha + self.beta))
    }
}

impl GammaParams {
    pub fn new(shape: f64, rate: f64) -> Self {
        Self {
            shape,
            rate,
            initial: None,
            fixed: false,
            comment: None,
        }
    }

    /// Starting value: explicit initial or the prior mean.
    pub fn start(&self) -> f64 {
        self.initial.unwrap_or(self.shape / self.rate)
    }

    /// Same prior, pinned at `value`.
    pub fn fixed_at(mut self, value: f64) -> Self {
        self.initial = Some(value);
        self.fixed = true;
        self
    }
}

impl DirichletParams {
    pub fn new(alpha: Vec<f64>) -> Self {
        Self {
            alpha,
            initial: None,
            fixed: false,
        }
    }

    /// Starting probabilities: explicit initial or the prior mean.
    pub fn start(&self) -> Vec<f64> {
        if let Some(initial) = &self.initial {
            return initial.clone();
        }
        let total: f64 = self.alpha.iter().sum();
        self.alpha.iter().map(|a| a / total).collect()
    }
}

impl Priors {
    /// Weakly informative defaults for the given state space.
    pub fn default_for(space: StateSpace) -> Self {
        let importation = match space {
            StateSpace::TwoState => DirichletParams::new(vec![9.0, 1.0]),
            StateSpace::ThreeState => DirichletParams::new(vec![8.0, 1.0, 1.0]),
        };
        let progression = match space {
            StateSpace::TwoState => None,
            StateSpace::ThreeState => Some(GammaParams::new(1.0, 10.0)),
        };
        Priors {
            schema_version: crate::CONFIG_SCHEMA_VERSION.to_string(),
            description: Some("built-in defaults".to_string()),
            acquisition: AcquisitionPriors {
                background: GammaParams::new(1.0, 1000.0),
                transmission: GammaParams::new(1.0, 100.0),
            },
            progression,
            clearance: GammaParams::new(1.0, 100.0),
            importation,
            surveillance_test: TestPriors {
                sensitivity: BetaParams::new(8.0, 2.0),
                specificity: BetaParams::new(99.0, 1.0),
            },
            clinical_test: TestPriors {
                sensitivity: BetaParams::new(5.0, 5.0),
                specificity: BetaParams::new(99.0, 1.0),
            },
        }
    }
}

impl Default for Priors {
    fn default() -> Self {
        Self::default_for(StateSpace::TwoState)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_values_default_to_prior_means() {
        assert_eq!(GammaParams::new(2.0, 4.0).start(), 0.5);
        assert_eq!(BetaParams::new(1.0, 3.0).start(), 0.25);
        assert_eq!(DirichletParams::new(vec![1.0, 3.0]).start(), vec![0.25, 0.75]);
    }

    #[test]
    fn fixed_at_pins_value() {
        let g = GammaParams::new(1.0, 1.0).fixed_at(0.1);
        assert!(g.fixed);
        assert_eq!(g.start(), 0.1);
    }

    #[test]
    fn defaults_match_state_space() {
        let two = Priors::default_for(StateSpace::TwoState);
        assert_eq!(two.importation.alpha.len(), 2);
        assert!(two.progression.is_none());

        let three = Priors::default_for(StateSpace::ThreeState);
        assert_eq!(three.importation.alpha.len(), 3);
        assert!(three.progression.is_some());
    }

    #[test]
    fn priors_json_round_trip_keeps_comments() {
        let json = r#"{
            "schema_version": "1.0.0",
            "acquisition": {
                "background": {"shape": 1.0, "rate": 1000.0},
                "transmission": {"shape": 1.0, "rate": 100.0, "_comment": "per colonized co-resident"}
            },
            "clearance": {"shape": 1.0, "rate": 100.0, "fixed": true, "initial": 0.0},
            "importation": {"alpha": [9.0, 1.0]},
            "surveillance_test": {
                "sensitivity": {"alpha": 8.0, "beta": 2.0},
                "specificity": {"alpha": 99.0, "beta": 1.0}
            },
            "clinical_test": {
                "sensitivity": {"alpha": 5.0, "beta": 5.0},
                "specificity": {"alpha": 99.0, "beta": 1.0}
            }
        }"#;
        let priors: Priors = serde_json::from_str(json).unwrap();
        assert_eq!(
            priors.acquisition.transmission.comment.as_deref(),
            Some("per colonized co-resident")
        );
        assert!(priors.clearance.fixed);
        assert_eq!(priors.clearance.start(), 0.0);
    }
}

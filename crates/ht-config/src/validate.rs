//! Configuration validation errors and semantic validation.

use thiserror::Error;

use crate::priors::{BetaParams, DirichletParams, GammaParams, Priors, TestPriors};
use crate::settings::RunSettings;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Semantic validation failed: {0}")]
    SemanticError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::SemanticError(_) => 63,
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::VersionMismatch { .. } => 66,
        }
    }
}

impl From<ValidationError> for ht_common::Error {
    fn from(err: ValidationError) -> Self {
        ht_common::Error::InvalidPriors(err.to_string())
    }
}

/// Validate priors semantically against the state space they will drive.
pub fn validate_priors(priors: &Priors, settings: &RunSettings) -> ValidationResult<()> {
    if priors.schema_version != crate::CONFIG_SCHEMA_VERSION {
        return Err(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: priors.schema_version.clone(),
        });
    }

    validate_gamma_params("acquisition.background", &priors.acquisition.background)?;
    validate_gamma_params("acquisition.transmission", &priors.acquisition.transmission)?;
    validate_gamma_params("clearance", &priors.clearance)?;

    match (&priors.progression, settings.state_space.size()) {
        (Some(gamma), _) => validate_gamma_params("progression", gamma)?,
        (None, 3) => {
            return Err(ValidationError::SemanticError(
                "three-state models need a progression prior".to_string(),
            ))
        }
        (None, _) => {}
    }

    validate_dirichlet_params(
        "importation",
        &priors.importation,
        settings.state_space.size(),
    )?;
    validate_test_priors("surveillance_test", &priors.surveillance_test)?;
    validate_test_priors("clinical_test", &priors.clinical_test)?;

    Ok(())
}

/// Validate run settings.
pub fn validate_settings(settings: &RunSettings) -> ValidationResult<()> {
    if settings.max_rejections == 0 {
        return Err(ValidationError::InvalidValue {
            field: "max_rejections".to_string(),
            message: "Must be at least 1".to_string(),
        });
    }
    Ok(())
}

fn validate_test_priors(field: &str, test: &TestPriors) -> ValidationResult<()> {
    validate_beta_params(&format!("{}.sensitivity", field), &test.sensitivity)?;
    validate_beta_params(&format!("{}.specificity", field), &test.specificity)
}

/// Validate Beta distribution parameters.
fn validate_beta_params(field: &str, params: &BetaParams) -> ValidationResult<()> {
    if !(params.alpha > 0.0) || !params.alpha.is_finite() {
        return Err(ValidationError::InvalidValue {
            field: format!("{}.alpha", field),
            message: format!("Must be positive, got {}", params.alpha),
        });
    }

    if !(params.beta > 0.0) || !params.beta.is_finite() {
        return Err(ValidationError::InvalidValue {
            field: format!("{}.beta", field),
            message: format!("Must be positive, got {}", params.beta),
        });
    }

    if let Some(p) = params.initial {
        if !(0.0..=1.0).contains(&p) {
            return Err(ValidationError::InvalidValue {
                field: format!("{}.initial", field),
                message: format!("Must be in [0, 1], got {}", p),
            });
        }
    }

    Ok(())
}

/// Validate Gamma distribution parameters.
fn validate_gamma_params(field: &str, params: &GammaParams) -> ValidationResult<()> {
    if !(params.shape > 0.0) || !params.shape.is_finite() {
        return Err(ValidationError::InvalidValue {
            field: format!("{}.shape", field),
            message: format!("Must be positive, got {}", params.shape),
        });
    }

    if !(params.rate > 0.0) || !params.rate.is_finite() {
        return Err(ValidationError::InvalidValue {
            field: format!("{}.rate", field),
            message: format!("Must be positive, got {}", params.rate),
        });
    }

    if let Some(v) = params.initial {
        if !(v >= 0.0) || !v.is_finite() {
            return Err(ValidationError::InvalidValue {
                field: format!("{}.initial", field),
                message: format!("Must be a non-negative rate, got {}", v),
            });
        }
    }

    Ok(())
}

fn validate_dirichlet_params(
    field: &str,
    params: &DirichletParams,
    states: usize,
) -> ValidationResult<()> {
    if params.alpha.len() != states {
        return Err(ValidationError::InvalidValue {
            field: format!("{}.alpha", field),
            message: format!("Expected {} weights, got {}", states, params.alpha.len()),
        });
    }

    if let Some(bad) = params.alpha.iter().find(|a| !(**a > 0.0) || !a.is_finite()) {
        return Err(ValidationError::InvalidValue {
            field: format!("{}.alpha", field),
            message: format!("Prior counts must be positive, got {}", bad),
        });
    }

    if let Some(initial) = &params.initial {
        if initial.len() != states {
            return Err(ValidationError::InvalidValue {
                field: format!("{}.initial", field),
                message: format!("Expected {} probabilities, got {}", states, initial.len()),
            });
        }
        if initial.iter().any(|p| !(0.0..=1.0).contains(p)) {
            return Err(ValidationError::InvalidValue {
                field: format!("{}.initial", field),
                message: "Probabilities must be in [0, 1]".to_string(),
            });
        }
        let sum: f64 = initial.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ValidationError::SemanticError(format!(
                "{}.initial must sum to 1.0, got {}",
                field, sum
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ht_common::StateSpace;

    #[test]
    fn defaults_validate() {
        for space in [StateSpace::TwoState, StateSpace::ThreeState] {
            let settings = RunSettings::default().with_state_space(space);
            validate_priors(&Priors::default_for(space), &settings).unwrap();
        }
        validate_settings(&RunSettings::default()).unwrap();
    }

    #[test]
    fn rejects_non_positive_rate() {
        let mut priors = Priors::default();
        priors.clearance.rate = 0.0;
        let err = validate_priors(&priors, &RunSettings::default()).unwrap_err();
        assert!(err.to_string().contains("clearance.rate"));
        assert_eq!(err.code(), 65);
    }

    #[test]
    fn rejects_probability_outside_unit_interval() {
        let mut priors = Priors::default();
        priors.clinical_test.sensitivity.initial = Some(1.5);
        let err = validate_priors(&priors, &RunSettings::default()).unwrap_err();
        assert!(err.to_string().contains("clinical_test.sensitivity.initial"));
    }

    #[test]
    fn rejects_negative_prior_counts() {
        let mut priors = Priors::default();
        priors.importation.alpha = vec![1.0, -2.0];
        assert!(validate_priors(&priors, &RunSettings::default()).is_err());
    }

    #[test]
    fn importation_must_match_state_space() {
        let mut priors = Priors::default_for(StateSpace::TwoState);
        let mut settings = RunSettings::default().with_state_space(StateSpace::ThreeState);
        priors.progression = Some(GammaParams::new(1.0, 1.0));
        let err = validate_priors(&priors, &settings).unwrap_err();
        assert!(err.to_string().contains("Expected 3 weights"));

        settings.state_space = StateSpace::TwoState;
        validate_priors(&priors, &settings).unwrap();
    }

    #[test]
    fn version_mismatch_is_reported() {
        let mut priors = Priors::default();
        priors.schema_version = "0.9".to_string();
        assert!(matches!(
            validate_priors(&priors, &RunSettings::default()),
            Err(ValidationError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn converts_into_unified_error() {
        let err: ht_common::Error = ValidationError::SemanticError("x".into()).into();
        assert_eq!(err.code(), 11);
    }
}

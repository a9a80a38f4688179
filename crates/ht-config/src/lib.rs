//! Hospital transmission configuration loading and validation.
//!
//! This crate provides:
//! - Typed priors for the model parameters and run settings
//! - Config resolution (CLI → env → XDG → defaults)
//! - Semantic validation
//! - Config snapshots for reproducibility

pub mod load;
pub mod priors;
pub mod resolve;
pub mod settings;
pub mod snapshot;
pub mod validate;

pub use load::{load_config, ConfigError, ResolvedConfig};
pub use priors::{BetaParams, DirichletParams, GammaParams, Priors, TestPriors};
pub use resolve::{resolve_config, ConfigPath, ConfigSource};
pub use settings::RunSettings;
pub use snapshot::ConfigSnapshot;
pub use validate::{validate_priors, validate_settings, ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";

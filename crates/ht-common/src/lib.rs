//! Hospital transmission common types, IDs, and errors.
//!
//! This crate provides foundational types shared across ht-core modules:
//! - Identity types for patients, care units and facilities
//! - Colonization states and state spaces
//! - The unified error type with stable codes and categories

pub mod error;
pub mod id;
pub mod space;

pub use error::{Error, ErrorCategory, Result};
pub use id::{FacilityId, PatientId, UnitId};
pub use space::{Colonization, StateSpace};

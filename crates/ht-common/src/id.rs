//! Identity types for the entities that appear in event records.
//!
//! Ids are the integers found in the input columns. They are opaque: no
//! ordering other than the numeric one is implied.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Patient identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(pub i64);

/// Care unit identifier (ward, ICU, ...). Unique across facilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub i64);

/// Facility (hospital) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FacilityId(pub i64);

macro_rules! id_impls {
    ($($ty:ident),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl From<i64> for $ty {
                fn from(id: i64) -> Self {
                    $ty(id)
                }
            }
        )*
    };
}

id_impls!(PatientId, UnitId, FacilityId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_as_raw_integers() {
        assert_eq!(PatientId(17).to_string(), "17");
        assert_eq!(UnitId::from(-3).to_string(), "-3");
        assert_eq!(FacilityId(0).to_string(), "0");
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&PatientId(42)).unwrap();
        assert_eq!(json, "42");
        let back: UnitId = serde_json::from_str("7").unwrap();
        assert_eq!(back, UnitId(7));
    }

    #[test]
    fn ids_order_numerically() {
        let mut ids = vec![PatientId(3), PatientId(-1), PatientId(2)];
        ids.sort();
        assert_eq!(ids, vec![PatientId(-1), PatientId(2), PatientId(3)]);
    }
}

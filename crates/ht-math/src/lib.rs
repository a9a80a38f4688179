//! Hospital transmission math utilities.

pub mod math;

pub use math::density::*;
pub use math::matrix::{MatrixError, SquareMatrix};
pub use math::stable::*;

//! Core math modules.

pub mod density;
pub mod matrix;
pub mod stable;

//! Chess position primitives shared by the analysis crates.
//!
//! A `PositionSnapshot` tracks the analysed position (base + UCI moves) and
//! `features` derives the material and pawn-structure signals the outcome
//! estimator consumes.

pub mod features;
pub mod position;

pub use features::{PassedPawns, PositionFeatures};
pub use position::{BasePosition, PositionError, PositionSnapshot};

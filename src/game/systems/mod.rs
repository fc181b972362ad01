//! Decision components
//!
//! Each module adds an `impl Monster` block for one concern.

pub mod combat;
pub mod lifecycle;
pub mod movement;
pub mod targeting;

pub use combat::{BlockType, SpellCheck};
pub use movement::DistanceStep;
pub use targeting::TargetSearch;

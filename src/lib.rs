//! Creature AI Engine Library
//!
//! Per-tick decision engine for non-player creatures on a tile grid:
//! target selection, ability scheduling, movement and dormancy.
//!
//! # Features
//!
//! - `parallel` - Run think steps on the rayon pool (enabled by default)

pub mod ambient;
pub mod config;
pub mod game;
pub mod metrics;
pub mod script;
pub mod util;

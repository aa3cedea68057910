//! Restore engine module.

pub mod engine;

pub use engine::{RestoreEngine, RestoreReport};

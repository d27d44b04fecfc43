//! Shared models and helpers used across the analysis pipeline.

pub mod models;

pub use models::{Allocation, AllocationIndex, Offset, WORD_BYTES};

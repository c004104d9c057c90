//! Public facade crate for `crawlkit`.
//!
//! This crate intentionally contains no IO or backend-specific logic.
//! It re-exports the backend-agnostic types/traits from `crawlkit-core`.

pub use crawlkit_core::*;

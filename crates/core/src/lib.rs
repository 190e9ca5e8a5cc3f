//! Domain logic for shot-clip generation: provider capabilities, shot
//! analysis, continuity chains, the job state machine, and batch reporting.
//!
//! This crate has no internal dependencies and performs no I/O, so it can
//! be shared by the pipeline, the store adapters, and tooling alike.

pub mod analysis;
pub mod backoff;
pub mod batch;
pub mod capability;
pub mod chain;
pub mod error;
pub mod estimation;
pub mod job;
pub mod shot;
pub mod types;

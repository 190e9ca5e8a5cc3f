//! Shot-clip generation pipeline.
//!
//! [`plan`] turns shots into analyses and continuity chains,
//! [`orchestrator`] runs the resulting jobs against the video providers,
//! and [`service`] keeps track of batches running in the background.
//! Continuity anchors are produced by [`anchor`] from the last frame of a
//! finished clip.

pub mod anchor;
pub mod ffmpeg;
pub mod orchestrator;
pub mod plan;
pub mod service;
pub mod storage;
pub mod store;

pub use anchor::{AnchorDeriver, AnchorError, DerivedAnchor};
pub use orchestrator::{Orchestrator, ProgressCallback, RunHooks};
pub use plan::BatchPlan;
pub use service::{BatchError, BatchHandle, BatchService};
pub use storage::{LocalObjectStore, ObjectStore, StorageError};
pub use store::{PgShotStore, ShotStore, StoreError};

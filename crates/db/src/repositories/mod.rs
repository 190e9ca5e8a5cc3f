//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods
//! that accept `&PgPool` as the first argument.

pub mod shot_repo;
pub mod variation_repo;

pub use shot_repo::ShotRepo;
pub use variation_repo::VariationRepo;

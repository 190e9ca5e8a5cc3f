//! Row structs and update DTOs.
//!
//! Each submodule contains a `FromRow` entity struct matching the database
//! row and the conversion into the matching `shotline_core` type.

pub mod shot;
pub mod status;
pub mod variation;

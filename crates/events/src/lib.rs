//! Shotline event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`PlatformEvent`]: the canonical domain event envelope, with a
//!   constructor for generation-job transitions.

pub mod bus;

pub use bus::{EventBus, PlatformEvent};

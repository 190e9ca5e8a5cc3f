//! Video generation provider adapters.
//!
//! Every provider implements [`VideoProvider`] (submit, then poll until a
//! clip or an error comes back). [`ProviderSet`] resolves an id to the
//! adapter and its capability entry, and [`execute::run_to_completion`]
//! drives one attempt under the provider's timeout.

pub mod execute;
pub mod http;
pub mod provider;
pub mod set;

pub use execute::{run_to_completion, AttemptError, GeneratedClip};
pub use http::HttpProvider;
pub use provider::{JobHandle, PollStatus, ProviderError, VideoProvider};
pub use set::ProviderSet;

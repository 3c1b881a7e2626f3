//! Core supervisor logic
//!
//! Pure state and policy that can be tested without spawning processes.

pub mod artifacts;
pub mod digest;
pub mod registry;
pub mod restart;

pub use digest::{DigestDedup, SourceStatus, render_digest};
pub use registry::Registry;
pub use restart::{RestartPolicy, RestartTracker};

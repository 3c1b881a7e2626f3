//! Shared types for the stream recording supervisor
//!
//! Identifiers, validation errors and the component-tagged logging toolkit
//! used by every part of the supervisor.

pub mod errors;
pub mod logging;
pub mod types;

pub use errors::*;
pub use types::*;

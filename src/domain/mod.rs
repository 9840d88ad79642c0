//! Domain module
//!
//! Concrete event variants and domain-level error types.

pub mod error;
pub mod events;

pub use error::{ConfigurationError, ValidationError};
pub use events::{Created, Destroyed, UserEvent};

//! Shared utilities: the top-level error type and logging setup.

pub mod error;
pub mod logging;

pub use error::Error;

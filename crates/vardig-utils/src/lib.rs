//! # Vardig Utilities
//!
//! Logging setup for hosts of the Vardig value layer.
//!
//! `vardig-core` emits `tracing` events only; this crate installs the
//! subscriber that renders them.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{
    init_logging, init_logging_to_file, init_logging_with_level, LogFormat, LogLevel, LoggingError, LoggingGuard,
};
pub use tracing::{debug, error, info, trace, warn};

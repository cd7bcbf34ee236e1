//! # Shellcache Common
//!
//! Shared plumbing for the shellcache crates. Today that is only logging:
//! every binary and test harness calls [`init_logging`] once with a
//! [`LogConfig`], usually read from the engine configuration file.

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LoggingError};

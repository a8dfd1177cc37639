//! Flowload Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared infrastructure for the flowload workspace.
//!
//! Currently this is the logging subsystem used by both the core library and
//! the CLI harness. Keeping it in its own crate lets every member initialize
//! logging the same way without depending on the full core.

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel, LogOutput};

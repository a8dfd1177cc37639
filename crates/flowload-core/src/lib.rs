//! Flowload Core Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Drives an external ETL service through a multi-phase job lifecycle under
//! load: create a flow, configure it, upload a source file in chunks, trigger
//! server-side processing, poll until the run reaches a terminal state, and
//! verify the loaded row count. Many simulated sessions run this protocol
//! concurrently against a live server, sharing a flow-id allocator, a
//! credential pool, and a cooperative stop signal.
//!
//! # Architecture
//!
//! - [`executor`]: resilient HTTP request execution (bounded retries,
//!   exponential backoff, 4xx-fatal / 5xx-retryable classification)
//! - [`api`]: typed endpoint surface of the remote ETL service
//! - [`upload`]: chunked file upload pipeline
//! - [`orchestrator`]: the per-flow phase state machine
//! - [`poller`]: bounded-time run status polling
//! - [`pools`] / [`stop`]: shared coordination services
//! - [`session`]: one simulated user driving flows sequentially
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use flowload_core::{config::LoadConfig, session::Session, SharedServices};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(LoadConfig::load(None)?);
//!     let shared = SharedServices::new(&config);
//!
//!     let mut session = Session::new(0, Arc::clone(&config), shared.clone())?;
//!     session.run().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod chunks;
pub mod config;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod orchestrator;
pub mod poller;
pub mod pools;
pub mod session;
pub mod stop;
pub mod upload;
pub mod validate;

// Re-export commonly used types
pub use error::{FlowError, Result};
pub use session::SharedServices;

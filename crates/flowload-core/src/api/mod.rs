//! ETL service API surface
//!
//! Typed client for the remote ETL service the harness drives: flow
//! management, chunked upload, processing runs, status, and SQL execution.

pub mod client;
pub mod endpoints;
pub mod types;

pub use client::EtlClient;
pub use types::*;

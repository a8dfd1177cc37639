//! Resilient request executor
//!
//! Wraps a single HTTP call with bounded retries, exponential backoff, and
//! metrics. This is the only place failure policy is decided:
//!
//! - status < 400: success, returned immediately
//! - 4xx: fatal for the call, the response is returned so the caller can
//!   inspect it
//! - 5xx or transport error: retried until the attempt budget is spent
//!
//! Every higher phase treats an absent result as the generic failure signal
//! and aborts its own phase without further retries of its own.

use crate::metrics::MetricsRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, warn};

/// Upper bound for one backoff sleep.
pub const BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Retry-aware wrapper around a per-session HTTP client
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    client: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl RequestExecutor {
    pub fn new(
        client: reqwest::Client,
        max_retries: u32,
        retry_delay: Duration,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            client,
            max_retries,
            retry_delay,
            metrics,
        }
    }

    /// The underlying client (cookie jar included)
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Base delay used for backoff between attempts
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Attempt budget for a single logical request
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Perform one logical request with up to `max_retries` attempts
    ///
    /// `build` is invoked once per attempt: request bodies (multipart forms
    /// in particular) are not replayable, so the request is rebuilt fresh
    /// each time. `method` and `name` only label logs and metrics.
    ///
    /// Returns `None` when every attempt was spent without a usable
    /// response; 4xx responses are returned as `Some` for inspection.
    pub async fn execute<F>(&self, method: &str, name: &str, build: F) -> Option<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let started = Instant::now();

        for attempt in 0..self.max_retries {
            match build(&self.client).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    self.metrics.record_request(method, name, &status.to_string());

                    if status < 400 {
                        self.metrics
                            .record_request_duration(method, name, started.elapsed());
                        return Some(response);
                    }

                    if status < 500 {
                        warn!(endpoint = name, status, "Client error, not retrying");
                        return Some(response);
                    }

                    warn!(
                        endpoint = name,
                        status,
                        attempt = attempt + 1,
                        "Server error"
                    );
                },
                Err(e) => {
                    self.metrics.record_request(method, name, "error");
                    warn!(
                        endpoint = name,
                        attempt = attempt + 1,
                        error = %e,
                        "Request failed"
                    );
                },
            }

            if attempt + 1 < self.max_retries {
                let delay = self
                    .retry_delay
                    .saturating_mul(2u32.saturating_pow(attempt))
                    .min(BACKOFF_CAP);
                tokio::time::sleep(delay).await;
            }
        }

        error!(endpoint = name, "All attempts failed");
        None
    }
}

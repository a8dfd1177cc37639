//! Run status poller
//!
//! Bounded-time polling over a run's status endpoint. Only a terminal server
//! status, an exhausted wait budget, or the stop signal ends the loop; an
//! individual failed status check is logged and tolerated. Every 5th poll the
//! current non-terminal status is logged so long waits remain observable
//! without flooding the log.

use crate::api::{EtlClient, JobStatus};
use crate::stop::StopCoordinator;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// How often a non-terminal status is logged, in polls.
const STATUS_LOG_EVERY: u64 = 5;

/// Terminal outcome of one polling loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The run finished; per-block run ids for downstream lookups
    Success {
        block_run_ids: HashMap<String, String>,
    },
    /// The server reported the run failed
    Failed { error: String },
    /// The wait budget elapsed before a terminal status
    TimedOut,
    /// The stop coordinator signalled shutdown mid-poll
    Cancelled,
}

/// Bounded polling loop over a run's status
#[derive(Debug, Clone, Copy)]
pub struct StatusPoller {
    budget: Duration,
    interval: Duration,
}

impl StatusPoller {
    pub fn new(budget: Duration, interval: Duration) -> Self {
        Self { budget, interval }
    }

    /// Poll `run_id` until a terminal outcome
    pub async fn poll(
        &self,
        client: &EtlClient,
        run_id: &str,
        stop: &StopCoordinator,
    ) -> PollOutcome {
        let started = Instant::now();
        let mut polls: u64 = 0;

        loop {
            if stop.is_stop_called() {
                info!(run_id, "Polling aborted by stop signal");
                return PollOutcome::Cancelled;
            }
            if started.elapsed() >= self.budget {
                warn!(run_id, elapsed = ?started.elapsed(), "Polling wait budget exceeded");
                return PollOutcome::TimedOut;
            }

            polls += 1;
            match client.get_run_status(run_id).await {
                Ok(response) => match response.job_status() {
                    JobStatus::Success => {
                        info!(run_id, polls, "Run succeeded");
                        return PollOutcome::Success {
                            block_run_ids: response.block_run_ids.unwrap_or_default(),
                        };
                    },
                    JobStatus::Failed => {
                        let error = response
                            .error
                            .unwrap_or_else(|| "unspecified server error".to_string());
                        warn!(run_id, error = %error, "Run failed");
                        return PollOutcome::Failed { error };
                    },
                    status => {
                        if polls % STATUS_LOG_EVERY == 0 {
                            info!(
                                run_id,
                                status = %status,
                                elapsed = ?started.elapsed(),
                                "Run still in progress"
                            );
                        }
                    },
                },
                Err(e) => {
                    // A flaky status check is not a run failure.
                    warn!(run_id, error = %e, "Status check failed, continuing");
                },
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}

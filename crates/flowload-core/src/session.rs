//! Simulated user session
//!
//! One session is one authenticated user driving flows sequentially: log in
//! once, then loop iterations until the shared stop coordinator says the run
//! budget is spent. Each session owns its HTTP client (and thus its cookie
//! jar); everything cross-session goes through [`SharedServices`].

use crate::api::EtlClient;
use crate::auth;
use crate::chunks::ChunkSource;
use crate::config::LoadConfig;
use crate::error::{FlowError, Result};
use crate::executor::RequestExecutor;
use crate::metrics::MetricsRegistry;
use crate::orchestrator::{FlowOrchestrator, FlowOutcome, IterationOutcome};
use crate::pools::{CredentialPool, FlowIdAllocator};
use crate::stop::StopCoordinator;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Instrument};

/// Shortest think-time pause between iterations.
pub const THINK_TIME_MIN: Duration = Duration::from_secs(1);

/// Longest think-time pause between iterations.
pub const THINK_TIME_MAX: Duration = Duration::from_secs(5);

/// Services shared by every session of one run
#[derive(Debug, Clone)]
pub struct SharedServices {
    pub allocator: Arc<FlowIdAllocator>,
    pub credentials: Arc<CredentialPool>,
    pub stop: Arc<StopCoordinator>,
    pub metrics: Arc<MetricsRegistry>,
}

impl SharedServices {
    /// Build the shared services for a run from its configuration
    pub fn new(config: &LoadConfig) -> Self {
        Self {
            allocator: Arc::new(FlowIdAllocator::new()),
            credentials: Arc::new(CredentialPool::new(config.users.clone())),
            stop: Arc::new(StopCoordinator::with_max_iterations(config.max_iterations)),
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }
}

/// One simulated user
pub struct Session {
    worker_id: u64,
    session_id: String,
    config: Arc<LoadConfig>,
    shared: SharedServices,
    client: EtlClient,
}

impl Session {
    /// Build a session with its own cookie jar
    ///
    /// Redirects are disabled at the client level; the login handshake
    /// follows its 302 manually so the auth cookie lands on this jar.
    pub fn new(worker_id: u64, config: Arc<LoadConfig>, shared: SharedServices) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.request_timeout());
        if config.insecure_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder
            .build()
            .map_err(|e| FlowError::config(format!("cannot build HTTP client: {e}")))?;

        let executor = RequestExecutor::new(
            http,
            config.max_retries,
            config.retry_delay(),
            Arc::clone(&shared.metrics),
        );
        let client = EtlClient::new(
            executor,
            config.api.base_url.clone(),
            config.api.flow_endpoint.clone(),
        );

        let session_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();

        Ok(Self {
            worker_id,
            session_id,
            config,
            shared,
            client,
        })
    }

    /// Run the session until the stop coordinator signals shutdown
    ///
    /// A failed login aborts the session outright; a failed iteration is
    /// logged and the loop continues, since one broken flow says nothing
    /// about the next.
    pub async fn run(&mut self) {
        let span = tracing::info_span!(
            "session",
            worker_id = self.worker_id,
            session_id = %self.session_id
        );
        self.run_inner().instrument(span).await;
    }

    async fn run_inner(&mut self) {
        let source = match ChunkSource::open(&self.config.csv_file_path, self.config.chunk_size) {
            Ok(source) => source,
            Err(e) => {
                error!(
                    path = %self.config.csv_file_path.display(),
                    error = %e,
                    "Cannot open source file, session aborted"
                );
                return;
            },
        };
        self.shared.metrics.set_expected_rows(source.total_lines());
        info!(
            total_chunks = source.total_chunks(),
            total_rows = source.total_lines(),
            "Source file scanned"
        );

        let Some(creds) = self.shared.credentials.next_credentials() else {
            error!("Credential pool is empty, session aborted");
            return;
        };
        if let Err(e) = auth::establish_session(
            self.client.executor(),
            self.client.base_url(),
            &creds,
            &self.shared.metrics,
        )
        .await
        {
            error!(username = %creds.username, error = %e, "Login failed, session aborted");
            return;
        }

        self.shared.metrics.session_started();
        let orchestrator = FlowOrchestrator::new(
            &self.client,
            &self.config,
            &source,
            &self.shared.allocator,
            &self.shared.stop,
            Arc::clone(&self.shared.metrics),
            self.worker_id,
            creds.username.clone(),
        );

        loop {
            if self.shared.stop.should_stop() {
                info!("Iteration budget spent, session winding down");
                break;
            }

            let outcome = orchestrator.run_iteration().await;
            self.log_iteration(&outcome);

            if self.shared.stop.increment_iteration() {
                // Only the first session over the threshold announces.
                if self.shared.stop.try_set_stop_called() {
                    info!(
                        completed = self.shared.stop.completed_iterations(),
                        "Iteration budget reached, signalling stop"
                    );
                }
                break;
            }

            tokio::time::sleep(think_time()).await;
        }

        self.shared.metrics.session_stopped();
        self.shared
            .metrics
            .set_session_status(&creds.username, false);
        info!("Session finished");
    }

    fn log_iteration(&self, outcome: &IterationOutcome) {
        match &outcome.file_flow {
            FlowOutcome::Succeeded(report) => {
                info!(
                    flow_id = report.flow_id,
                    uploaded = report.uploaded_chunks,
                    total = report.total_chunks,
                    validation = ?report.validation,
                    "Iteration succeeded"
                );
            },
            FlowOutcome::Failed(failure) => {
                warn!(failure = ?failure, "Iteration failed");
            },
            FlowOutcome::TimedOut => warn!("Iteration timed out"),
            FlowOutcome::Cancelled => info!("Iteration cancelled by stop signal"),
        }

        if let Some(pm) = &outcome.process_metrics {
            match pm {
                FlowOutcome::Succeeded(report) => {
                    info!(pm_flow_id = report.flow_id, "Process-metrics flow succeeded");
                },
                other => warn!(outcome = ?other, "Process-metrics flow did not succeed"),
            }
        }
    }
}

/// Random pause between iterations, simulating a user catching their breath
fn think_time() -> Duration {
    let millis = rand::thread_rng()
        .gen_range(THINK_TIME_MIN.as_millis()..=THINK_TIME_MAX.as_millis());
    Duration::from_millis(millis as u64)
}

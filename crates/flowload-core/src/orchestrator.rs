//! Flow orchestrator
//!
//! The per-flow state machine. Phases run strictly sequentially, each gated
//! on the previous one succeeding:
//!
//! `Created → Configured → DbResolved → UploadStarted → ChunksUploaded →
//! Finalized → ProcessingStarted → Polling → terminal`
//!
//! Every transition failure is terminal for the flow; a partially completed
//! flow is abandoned, never resumed or rolled back, and the next iteration
//! starts over with a fresh flow id. On success a process-metrics flow can be
//! chained on top of the completed flow's output table — a second run of the
//! same machine, not a new mechanism.

use crate::api::{
    endpoints, CreateFlowRequest, CreatePmFlowRequest, DatabaseEntry, EtlClient,
    FinalizeUploadRequest, FlowBlock, StartPmRequest, StartProcessingRequest, StartUploadRequest,
    UpdateFlowRequest,
};
use crate::chunks::ChunkSource;
use crate::config::LoadConfig;
use crate::error::FlowError;
use crate::metrics::MetricsRegistry;
use crate::poller::{PollOutcome, StatusPoller};
use crate::pools::FlowIdAllocator;
use crate::stop::StopCoordinator;
use crate::upload::{UploadPipeline, UploadTarget};
use crate::validate;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Prefix for flow labels and target tables.
pub const FLOW_NAME_PREFIX: &str = "load_";

/// Phase of the flow state machine, for logging and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPhase {
    Created,
    Configured,
    DbResolved,
    UploadStarted,
    ChunksUploaded,
    Finalized,
    ProcessingStarted,
    Polling,
}

/// Why a flow ended short of success
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowFailure {
    FlowCreationFailed,
    MissingDagParameters,
    DatabaseNotFound,
    UploadStartFailed,
    /// Fail-fast mode aborted on a dead chunk
    UploadFailed,
    FinalizeFailed,
    MissingRunId,
    ProcessingFailed(String),
}

/// Summary of a completed flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowReport {
    pub flow_id: u64,
    pub flow_name: String,
    pub target_schema: String,
    pub uploaded_chunks: u64,
    pub total_chunks: u64,
    /// Row-count validation result, when it ran
    pub validation: Option<bool>,
}

/// Terminal result of one flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    Succeeded(FlowReport),
    Failed(FlowFailure),
    TimedOut,
    Cancelled,
}

/// Result of one session iteration: the file flow plus the optional chained
/// process-metrics flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationOutcome {
    pub file_flow: FlowOutcome,
    pub process_metrics: Option<FlowOutcome>,
}

/// Resolve the caller's backing database id from the database list
///
/// An exact-prefix match on `{prefix}{normalized username}` wins; a database
/// carrying the prefix and containing the normalized username anywhere is the
/// fallback. Databases without an owner are skipped.
pub fn resolve_database_id(
    databases: &[DatabaseEntry],
    username: &str,
    prefix: &str,
) -> Option<u64> {
    let normalized = username.replace('_', "");
    let exact = format!("{prefix}{normalized}");

    if let Some(db) = databases
        .iter()
        .find(|d| d.created_by.is_some() && d.database_name.starts_with(&exact))
    {
        return Some(db.id);
    }

    databases
        .iter()
        .find(|d| {
            d.created_by.is_some()
                && d.database_name.starts_with(prefix)
                && d.database_name.contains(&normalized)
        })
        .map(|d| d.id)
}

/// Drives one flow (and optionally its process-metrics successor) to a
/// terminal state
pub struct FlowOrchestrator<'a> {
    client: &'a EtlClient,
    config: &'a LoadConfig,
    source: &'a ChunkSource,
    allocator: &'a FlowIdAllocator,
    stop: &'a StopCoordinator,
    metrics: Arc<MetricsRegistry>,
    worker_id: u64,
    username: String,
}

impl<'a> FlowOrchestrator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: &'a EtlClient,
        config: &'a LoadConfig,
        source: &'a ChunkSource,
        allocator: &'a FlowIdAllocator,
        stop: &'a StopCoordinator,
        metrics: Arc<MetricsRegistry>,
        worker_id: u64,
        username: impl Into<String>,
    ) -> Self {
        Self {
            client,
            config,
            source,
            allocator,
            stop,
            metrics,
            worker_id,
            username: username.into(),
        }
    }

    /// Run one full iteration: the file flow, then the chained
    /// process-metrics flow when enabled and the file flow succeeded
    pub async fn run_iteration(&self) -> IterationOutcome {
        let file_flow = self.run_file_flow().await;

        let process_metrics = match (&file_flow, self.config.process_metrics) {
            (FlowOutcome::Succeeded(report), true) => {
                info!(flow_id = report.flow_id, "Chaining process-metrics flow");
                Some(self.run_process_metrics(report).await)
            },
            _ => None,
        };

        IterationOutcome {
            file_flow,
            process_metrics,
        }
    }

    /// Drive one file-loading flow through every phase
    pub async fn run_file_flow(&self) -> FlowOutcome {
        // Created: allocate an id and register the flow.
        let local_id = self.allocator.next_id(self.worker_id);
        let flow_name = format!("{FLOW_NAME_PREFIX}{local_id}");

        let flow_id = match self
            .client
            .create_flow(&CreateFlowRequest::file_loader(&flow_name))
            .await
        {
            Ok(id) => {
                self.metrics.record_flow_creation(true);
                id
            },
            Err(e) => {
                self.metrics.record_flow_creation(false);
                error!(flow_name, error = %e, "Flow creation failed");
                return FlowOutcome::Failed(FlowFailure::FlowCreationFailed);
            },
        };
        debug!(flow_id, flow_name, phase = ?FlowPhase::Created, "Flow registered");

        // Configured: resolve target connection/schema from the DAG params.
        let params = match self
            .client
            .get_dag_params(endpoints::FILE_LOADER_BLOCK, flow_id)
            .await
        {
            Ok(params) => params,
            Err(e) => {
                error!(flow_id, error = %e, "DAG parameter lookup failed");
                return FlowOutcome::Failed(FlowFailure::MissingDagParameters);
            },
        };
        let (Some(target_connection), Some(target_schema)) = (
            params.string_param("target_connection"),
            params.string_param("target_schema"),
        ) else {
            error!(flow_id, "Missing DAG parameters");
            return FlowOutcome::Failed(FlowFailure::MissingDagParameters);
        };
        debug!(flow_id, %target_connection, %target_schema, phase = ?FlowPhase::Configured, "Flow configured");

        // DbResolved: find the caller's backing database.
        let database_id = match self.client.list_databases().await {
            Ok(databases) => {
                match resolve_database_id(&databases, &self.username, &self.config.database_prefix)
                {
                    Some(id) => id,
                    None => {
                        error!(flow_id, username = %self.username, "User database not found");
                        return FlowOutcome::Failed(FlowFailure::DatabaseNotFound);
                    },
                }
            },
            Err(e) => {
                error!(flow_id, error = %e, "Database list failed");
                return FlowOutcome::Failed(FlowFailure::DatabaseNotFound);
            },
        };
        debug!(flow_id, database_id, phase = ?FlowPhase::DbResolved, "Database resolved");

        // UploadStarted: push the upload configuration, then open the upload.
        let total_chunks = self.source.total_chunks();
        let upload_id = endpoints::upload_id(flow_id, endpoints::FILE_LOADER_BLOCK);

        let update = UpdateFlowRequest {
            label: flow_name.clone(),
            target_connection: target_connection.clone(),
            target_schema: target_schema.clone(),
            target_table: flow_name.clone(),
            file_uploaded: false,
            total_chunks,
        };
        if let Err(e) = self.client.update_flow(flow_id, &update).await {
            error!(flow_id, error = %e, "Flow update before upload failed");
            return FlowOutcome::Failed(FlowFailure::UploadStartFailed);
        }

        if total_chunks == 0 {
            // Degenerate upload: announced, finalized, and processed empty.
            warn!(flow_id, "No chunks to upload");
        }

        let start = StartUploadRequest {
            upload_id: upload_id.clone(),
            database_id,
            schema: target_schema.clone(),
            table: flow_name.clone(),
            total_chunks,
        };
        if let Err(e) = self.client.start_upload(&start).await {
            error!(flow_id, error = %e, "Start upload failed");
            return FlowOutcome::Failed(FlowFailure::UploadStartFailed);
        }
        debug!(flow_id, %upload_id, total_chunks, phase = ?FlowPhase::UploadStarted, "Upload opened");

        // ChunksUploaded: run the pipeline.
        let chunk_timeout = self.config.upload_timeout(total_chunks);
        let pipeline = UploadPipeline::new(
            self.client,
            Arc::clone(&self.metrics),
            self.config.chunk_failure_mode,
            self.config.max_retries,
            self.config.retry_delay(),
        );
        let target = UploadTarget {
            upload_id: upload_id.clone(),
            database_id,
            schema: target_schema.clone(),
            table: flow_name.clone(),
        };
        let report = match pipeline
            .run(self.source, &target, flow_id, chunk_timeout)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                error!(flow_id, error = %e, "Upload pipeline aborted");
                return FlowOutcome::Failed(FlowFailure::UploadFailed);
            },
        };
        debug!(flow_id, uploaded = report.uploaded, phase = ?FlowPhase::ChunksUploaded, "Chunks uploaded");

        // Finalized: report the achieved chunk count.
        let finalize = FinalizeUploadRequest {
            upload_id: upload_id.clone(),
            uploaded_chunks: report.uploaded,
        };
        if let Err(e) = self.client.finalize_upload(&finalize).await {
            error!(flow_id, error = %e, "Finalize upload failed");
            return FlowOutcome::Failed(FlowFailure::FinalizeFailed);
        }
        debug!(flow_id, phase = ?FlowPhase::Finalized, "Upload finalized");

        // ProcessingStarted: trigger the server-side load.
        let processing = StartProcessingRequest {
            upload_id,
            target_connection,
            target_schema: target_schema.clone(),
            target_table: flow_name.clone(),
            total_chunks,
            delimiter: ",".to_string(),
            encoding: "utf-8".to_string(),
            header_row: true,
        };
        let run_id = match self
            .client
            .start_processing(flow_id, &processing, chunk_timeout)
            .await
        {
            Ok(run_id) => run_id,
            Err(FlowError::Protocol(msg)) => {
                error!(flow_id, %msg, "Start processing returned no run id");
                return FlowOutcome::Failed(FlowFailure::MissingRunId);
            },
            Err(e) => {
                error!(flow_id, error = %e, "Start processing failed");
                return FlowOutcome::Failed(FlowFailure::ProcessingFailed(e.to_string()));
            },
        };
        debug!(flow_id, %run_id, phase = ?FlowPhase::ProcessingStarted, "Processing started");

        // Polling: wait for a terminal status.
        let processing_started = Instant::now();
        let poller = StatusPoller::new(chunk_timeout, self.config.poll_interval());
        debug!(flow_id, phase = ?FlowPhase::Polling, "Polling run status");
        match poller.poll(self.client, &run_id, self.stop).await {
            PollOutcome::Success { .. } => {
                self.metrics
                    .record_flow_processing_duration(processing_started.elapsed());

                let validation = if self.config.validate_row_count {
                    validate::validate_row_count(
                        self.client,
                        &self.metrics,
                        &target_schema,
                        &flow_name,
                        self.source.total_lines(),
                    )
                    .await
                    .map_err(|e| warn!(flow_id, error = %e, "Validation check errored"))
                    .ok()
                } else {
                    None
                };

                info!(flow_id, flow_name, "Flow completed successfully");
                FlowOutcome::Succeeded(FlowReport {
                    flow_id,
                    flow_name,
                    target_schema,
                    uploaded_chunks: report.uploaded,
                    total_chunks: report.total,
                    validation,
                })
            },
            PollOutcome::Failed { error } => {
                error!(flow_id, %error, "Flow processing failed");
                FlowOutcome::Failed(FlowFailure::ProcessingFailed(error))
            },
            PollOutcome::TimedOut => FlowOutcome::TimedOut,
            PollOutcome::Cancelled => FlowOutcome::Cancelled,
        }
    }

    /// Build and run a process-metrics flow over a completed flow's table
    pub async fn run_process_metrics(&self, base: &FlowReport) -> FlowOutcome {
        // PM parameters live on the completed flow's process-mining block.
        let params = match self
            .client
            .get_dag_params(endpoints::PROCESS_MINING_BLOCK, base.flow_id)
            .await
        {
            Ok(params) => params,
            Err(e) => {
                error!(flow_id = base.flow_id, error = %e, "PM DAG parameter lookup failed");
                return FlowOutcome::Failed(FlowFailure::MissingDagParameters);
            },
        };
        let (
            Some(source_connection),
            Some(source_schema),
            Some(storage_connection),
            Some(compute_connection),
        ) = (
            params.string_param("source_connection"),
            params.string_param("source_schema"),
            params.string_param("storage_connection"),
            params.string_param("compute_connection"),
        )
        else {
            error!(flow_id = base.flow_id, "Missing PM DAG parameters");
            return FlowOutcome::Failed(FlowFailure::MissingDagParameters);
        };

        let pm_label = format!("{}_pm", base.flow_name);
        let create = CreatePmFlowRequest {
            label: pm_label.clone(),
            blocks: vec![
                FlowBlock {
                    block_id: endpoints::PROCESS_MINING_BLOCK.to_string(),
                    active: true,
                },
                FlowBlock {
                    block_id: endpoints::DASHBOARD_BLOCK.to_string(),
                    active: true,
                },
            ],
            source_connection: source_connection.clone(),
            source_schema: source_schema.clone(),
            storage_connection: storage_connection.clone(),
            compute_connection: compute_connection.clone(),
            source_table: base.flow_name.clone(),
        };
        let pm_flow_id = match self.client.create_pm_flow(&create).await {
            Ok(id) => {
                self.metrics.record_flow_creation(true);
                id
            },
            Err(e) => {
                self.metrics.record_flow_creation(false);
                error!(error = %e, "PM flow creation failed");
                return FlowOutcome::Failed(FlowFailure::FlowCreationFailed);
            },
        };
        info!(pm_flow_id, %pm_label, source_table = %base.flow_name, "PM flow created");

        let start = StartPmRequest {
            source_connection,
            source_schema,
            storage_connection,
            compute_connection,
            source_table: base.flow_name.clone(),
        };
        let run_id = match self
            .client
            .start_pm_flow(pm_flow_id, &start, self.config.pm_timeout())
            .await
        {
            Ok(run_id) => run_id,
            Err(FlowError::Protocol(msg)) => {
                error!(pm_flow_id, %msg, "PM start returned no run id");
                return FlowOutcome::Failed(FlowFailure::MissingRunId);
            },
            Err(e) => {
                error!(pm_flow_id, error = %e, "PM start failed");
                return FlowOutcome::Failed(FlowFailure::ProcessingFailed(e.to_string()));
            },
        };

        let started = Instant::now();
        let poller = StatusPoller::new(self.config.pm_timeout(), self.config.poll_interval());
        match poller.poll(self.client, &run_id, self.stop).await {
            PollOutcome::Success { block_run_ids } => {
                self.metrics
                    .record_flow_processing_duration(started.elapsed());
                self.open_dashboard_best_effort(pm_flow_id, &run_id, &block_run_ids)
                    .await;

                info!(pm_flow_id, "PM flow completed successfully");
                FlowOutcome::Succeeded(FlowReport {
                    flow_id: pm_flow_id,
                    flow_name: pm_label,
                    target_schema: base.target_schema.clone(),
                    uploaded_chunks: 0,
                    total_chunks: 0,
                    validation: None,
                })
            },
            PollOutcome::Failed { error } => {
                error!(pm_flow_id, %error, "PM flow failed");
                FlowOutcome::Failed(FlowFailure::ProcessingFailed(error))
            },
            PollOutcome::TimedOut => FlowOutcome::TimedOut,
            PollOutcome::Cancelled => FlowOutcome::Cancelled,
        }
    }

    /// Fetch and open the dashboard created by the PM flow; warnings only
    async fn open_dashboard_best_effort(
        &self,
        pm_flow_id: u64,
        run_id: &str,
        block_run_ids: &std::collections::HashMap<String, String>,
    ) {
        let Some(block_run_id) = block_run_ids.get(endpoints::DASHBOARD_BLOCK) else {
            warn!(pm_flow_id, "No block run id for the dashboard block");
            return;
        };

        let artefacts = match self
            .client
            .get_block_artefacts(pm_flow_id, endpoints::DASHBOARD_BLOCK, block_run_id, run_id)
            .await
        {
            Ok(artefacts) => artefacts,
            Err(e) => {
                warn!(pm_flow_id, error = %e, "Dashboard artefact lookup failed");
                return;
            },
        };

        let Some(url) = artefacts.dashboard_url() else {
            warn!(pm_flow_id, "No dashboard URL in artefacts");
            return;
        };

        match self.client.open_dashboard(url).await {
            Ok(true) => info!(pm_flow_id, %url, "Dashboard loaded"),
            Ok(false) => warn!(pm_flow_id, %url, "Dashboard did not load"),
            Err(e) => warn!(pm_flow_id, %url, error = %e, "Dashboard fetch failed"),
        }
    }
}

//! HTTP API client for the ETL service
//!
//! One method per remote endpoint, all going through the resilient
//! [`RequestExecutor`](crate::executor::RequestExecutor). An exhausted retry
//! budget surfaces as [`FlowError::Exhausted`]; a 4xx response surfaces as
//! [`FlowError::ClientRequest`] so the phase can abort without retrying.

use crate::api::{endpoints, types::*};
use crate::error::{FlowError, Result};
use crate::executor::RequestExecutor;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use std::time::Duration;

// ============================================================================
// Per-call timeouts
// ============================================================================

/// Timeout for flow creation calls.
pub const CREATE_FLOW_TIMEOUT: Duration = Duration::from_secs(20);

/// Timeout for DAG parameter lookups.
pub const DAG_PARAMS_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for database list calls.
pub const DATABASES_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for a single status poll.
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(15);

/// Typed client for the ETL service
#[derive(Debug, Clone)]
pub struct EtlClient {
    executor: RequestExecutor,
    base_url: String,
    flow_endpoint: String,
}

impl EtlClient {
    pub fn new(
        executor: RequestExecutor,
        base_url: impl Into<String>,
        flow_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            base_url: base_url.into(),
            flow_endpoint: flow_endpoint.into(),
        }
    }

    /// The service base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The underlying executor
    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// Map an executor outcome to a success response or a classified error
    fn classify(name: &str, response: Option<reqwest::Response>) -> Result<reqwest::Response> {
        let response = response.ok_or_else(|| FlowError::Exhausted(name.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else if status.is_client_error() {
            Err(FlowError::ClientRequest {
                status: status.as_u16(),
                endpoint: name.to_string(),
            })
        } else {
            Err(FlowError::ServerRequest {
                status: status.as_u16(),
                endpoint: name.to_string(),
            })
        }
    }

    async fn parse_json<T: DeserializeOwned>(name: &str, response: reqwest::Response) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| FlowError::protocol(format!("unparseable {name} response: {e}")))
    }

    // ------------------------------------------------------------------
    // Flow lifecycle
    // ------------------------------------------------------------------

    /// Create a flow, returning the server-assigned flow id
    pub async fn create_flow(&self, request: &CreateFlowRequest) -> Result<u64> {
        let name = "Create flow";
        let url = format!("{}{}", self.base_url, self.flow_endpoint);
        let response = self
            .executor
            .execute("POST", name, |c| {
                c.post(&url).timeout(CREATE_FLOW_TIMEOUT).json(request)
            })
            .await;

        let response = Self::classify(name, response)?;
        let created: CreateFlowResponse = Self::parse_json(name, response).await?;
        Ok(created.id)
    }

    /// Create a process-mining flow over an existing table
    pub async fn create_pm_flow(&self, request: &CreatePmFlowRequest) -> Result<u64> {
        let name = "Create PM flow";
        let url = format!("{}{}", self.base_url, self.flow_endpoint);
        let response = self
            .executor
            .execute("POST", name, |c| {
                c.post(&url).timeout(CREATE_FLOW_TIMEOUT).json(request)
            })
            .await;

        let response = Self::classify(name, response)?;
        let created: CreateFlowResponse = Self::parse_json(name, response).await?;
        Ok(created.id)
    }

    /// Fetch resolved DAG parameters for a block of a flow
    pub async fn get_dag_params(&self, block: &str, flow_id: u64) -> Result<DagParamsResponse> {
        let name = "Get DAG parameters";
        let url = endpoints::dag_params_url(&self.base_url, block, flow_id);
        let response = self
            .executor
            .execute("GET", name, |c| c.get(&url).timeout(DAG_PARAMS_TIMEOUT))
            .await;

        let response = Self::classify(name, response)?;
        Self::parse_json(name, response).await
    }

    /// Update a flow's configuration before upload
    pub async fn update_flow(&self, flow_id: u64, request: &UpdateFlowRequest) -> Result<()> {
        let name = "Update flow";
        let url = endpoints::update_flow_url(&self.base_url, flow_id);
        let response = self
            .executor
            .execute("PUT", name, |c| c.put(&url).json(request))
            .await;

        Self::classify(name, response).map(|_| ())
    }

    // ------------------------------------------------------------------
    // Upload
    // ------------------------------------------------------------------

    /// Open a chunked upload
    pub async fn start_upload(&self, request: &StartUploadRequest) -> Result<()> {
        let name = "Start upload";
        let url = endpoints::start_upload_url(&self.base_url);
        let response = self
            .executor
            .execute("POST", name, |c| c.post(&url).json(request))
            .await;

        Self::classify(name, response).map(|_| ())
    }

    /// Upload one chunk as a multipart form
    ///
    /// The form is rebuilt per attempt since multipart bodies are not
    /// replayable.
    pub async fn upload_chunk(
        &self,
        meta: &ChunkUploadMeta,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<()> {
        let name = "Upload chunk";
        let url = endpoints::upload_chunk_url(&self.base_url);
        let response = self
            .executor
            .execute("POST", name, |c| {
                let form = Form::new()
                    .text("upload_id", meta.upload_id.clone())
                    .text("part_num", meta.part_num.to_string())
                    .text("total_chunks", meta.total_chunks.to_string())
                    .text("database_id", meta.database_id.to_string())
                    .text("schema", meta.schema.clone())
                    .text("table", meta.table.clone())
                    .part(
                        "file",
                        Part::bytes(payload.clone())
                            .file_name(format!("part_{}.csv", meta.part_num)),
                    );
                c.post(&url).timeout(timeout).multipart(form)
            })
            .await;

        Self::classify(name, response).map(|_| ())
    }

    /// Close a chunked upload, reporting the achieved chunk count
    pub async fn finalize_upload(&self, request: &FinalizeUploadRequest) -> Result<()> {
        let name = "Finalize upload";
        let url = endpoints::finalize_upload_url(&self.base_url);
        let response = self
            .executor
            .execute("POST", name, |c| c.post(&url).json(request))
            .await;

        Self::classify(name, response).map(|_| ())
    }

    // ------------------------------------------------------------------
    // Processing / status
    // ------------------------------------------------------------------

    /// Start server-side processing, returning the run id used for polling
    pub async fn start_processing(
        &self,
        flow_id: u64,
        request: &StartProcessingRequest,
        timeout: Duration,
    ) -> Result<String> {
        let name = "Start processing";
        let url = endpoints::start_processing_url(&self.base_url, flow_id);
        let response = self
            .executor
            .execute("POST", name, |c| c.post(&url).timeout(timeout).json(request))
            .await;

        let response = Self::classify(name, response)?;
        let started: RunStartedResponse = Self::parse_json(name, response).await?;
        started
            .run_id
            .ok_or_else(|| FlowError::protocol("start-processing response is missing run_id"))
    }

    /// Start a process-mining run
    pub async fn start_pm_flow(
        &self,
        flow_id: u64,
        request: &StartPmRequest,
        timeout: Duration,
    ) -> Result<String> {
        let name = "Start PM flow";
        let url = endpoints::start_processing_url(&self.base_url, flow_id);
        let response = self
            .executor
            .execute("POST", name, |c| c.post(&url).timeout(timeout).json(request))
            .await;

        let response = Self::classify(name, response)?;
        let started: RunStartedResponse = Self::parse_json(name, response).await?;
        started
            .run_id
            .ok_or_else(|| FlowError::protocol("start-PM response is missing run_id"))
    }

    /// Poll the status of a run
    pub async fn get_run_status(&self, run_id: &str) -> Result<RunStatusResponse> {
        let name = "Get run status";
        let url = endpoints::run_status_url(&self.base_url, run_id);
        let response = self
            .executor
            .execute("GET", name, |c| c.get(&url).timeout(STATUS_TIMEOUT))
            .await;

        let response = Self::classify(name, response)?;
        Self::parse_json(name, response).await
    }

    // ------------------------------------------------------------------
    // Databases / SQL / artefacts
    // ------------------------------------------------------------------

    /// List the databases visible to the authenticated user
    pub async fn list_databases(&self) -> Result<Vec<DatabaseEntry>> {
        let name = "Get databases list";
        let url = endpoints::databases_url(&self.base_url);
        let response = self
            .executor
            .execute("GET", name, |c| c.get(&url).timeout(DATABASES_TIMEOUT))
            .await;

        let response = Self::classify(name, response)?;
        let list: DatabaseListResponse = Self::parse_json(name, response).await?;
        Ok(list.result)
    }

    /// Execute a SQL statement
    pub async fn execute_sql(&self, sql: impl Into<String>) -> Result<SqlResultResponse> {
        let name = "Execute SQL";
        let url = endpoints::execute_sql_url(&self.base_url);
        let request = SqlRequest { sql: sql.into() };
        let response = self
            .executor
            .execute("POST", name, |c| c.post(&url).json(&request))
            .await;

        let response = Self::classify(name, response)?;
        Self::parse_json(name, response).await
    }

    /// Fetch the artefacts of a finished block run
    pub async fn get_block_artefacts(
        &self,
        flow_id: u64,
        block_id: &str,
        block_run_id: &str,
        run_id: &str,
    ) -> Result<ArtefactsResponse> {
        let name = "Get block artefacts";
        let url =
            endpoints::block_artefacts_url(&self.base_url, flow_id, block_id, block_run_id, run_id);
        let response = self
            .executor
            .execute("GET", name, |c| c.get(&url))
            .await;

        let response = Self::classify(name, response)?;
        Self::parse_json(name, response).await
    }

    /// Fetch a dashboard page once to verify it loads
    pub async fn open_dashboard(&self, url: &str) -> Result<bool> {
        let name = "Open dashboard";
        let owned = url.to_string();
        let response = self
            .executor
            .execute("GET", name, |c| c.get(&owned))
            .await;

        match Self::classify(name, response) {
            Ok(_) => Ok(true),
            Err(FlowError::ClientRequest { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

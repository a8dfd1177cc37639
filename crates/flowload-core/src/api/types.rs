//! API request and response types
//!
//! Explicit structured payloads per endpoint. Wire field names match the
//! remote ETL service contract; required fields are plain, optional fields
//! are `Option`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Flow creation
// ============================================================================

/// One block reference inside a flow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowBlock {
    pub block_id: String,
    pub active: bool,
}

/// Request to create a file-loading flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFlowRequest {
    pub label: String,
    pub blocks: Vec<FlowBlock>,
}

impl CreateFlowRequest {
    /// Flow definition with a single file-loader block
    pub fn file_loader(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            blocks: vec![FlowBlock {
                block_id: super::endpoints::FILE_LOADER_BLOCK.to_string(),
                active: true,
            }],
        }
    }
}

/// Response from flow creation
#[derive(Debug, Clone, Deserialize)]
pub struct CreateFlowResponse {
    pub id: u64,
}

/// Request to create a process-mining flow over an existing table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePmFlowRequest {
    pub label: String,
    pub blocks: Vec<FlowBlock>,
    pub source_connection: String,
    pub source_schema: String,
    pub storage_connection: String,
    pub compute_connection: String,
    pub source_table: String,
}

// ============================================================================
// DAG parameters
// ============================================================================

/// One resolved DAG parameter value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagParamValue {
    pub value: serde_json::Value,
}

/// DAG parameters for a block, as `[name, {value}]` pairs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagParamsResponse {
    pub result: Vec<(String, DagParamValue)>,
}

impl DagParamsResponse {
    /// Look up a parameter by name, rendered as a string
    ///
    /// Connection ids may arrive as JSON numbers; both forms are accepted.
    pub fn string_param(&self, name: &str) -> Option<String> {
        self.result.iter().find(|(n, _)| n == name).and_then(|(_, v)| {
            match &v.value {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        })
    }
}

// ============================================================================
// Flow update / upload
// ============================================================================

/// Request to update a flow's configuration before upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateFlowRequest {
    pub label: String,
    pub target_connection: String,
    pub target_schema: String,
    pub target_table: String,
    pub file_uploaded: bool,
    pub total_chunks: u64,
}

/// Request to open a chunked upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartUploadRequest {
    pub upload_id: String,
    pub database_id: u64,
    pub schema: String,
    pub table: String,
    pub total_chunks: u64,
}

/// Metadata accompanying every chunk part of a multipart upload call
#[derive(Debug, Clone)]
pub struct ChunkUploadMeta {
    pub upload_id: String,
    pub part_num: u64,
    pub total_chunks: u64,
    pub database_id: u64,
    pub schema: String,
    pub table: String,
}

/// Request to close a chunked upload
///
/// `uploaded_chunks` reports how many chunks actually made it up, which may
/// be less than the announced total in best-effort mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeUploadRequest {
    pub upload_id: String,
    pub uploaded_chunks: u64,
}

// ============================================================================
// Processing / status
// ============================================================================

/// Request to start server-side processing of an uploaded file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartProcessingRequest {
    pub upload_id: String,
    pub target_connection: String,
    pub target_schema: String,
    pub target_table: String,
    pub total_chunks: u64,
    pub delimiter: String,
    pub encoding: String,
    pub header_row: bool,
}

/// Request to start a process-mining run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartPmRequest {
    pub source_connection: String,
    pub source_schema: String,
    pub storage_connection: String,
    pub compute_connection: String,
    pub source_table: String,
}

/// Response from either start call; `run_id` is the polling handle
#[derive(Debug, Clone, Deserialize)]
pub struct RunStartedResponse {
    pub run_id: Option<String>,
}

/// Server-reported job status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
    /// Unrecognized status string; treated as non-terminal
    Other(String),
}

impl JobStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "success" => JobStatus::Success,
            "failed" | "error" => JobStatus::Failed,
            other => JobStatus::Other(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Success => write!(f, "success"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Status poll response for a run
#[derive(Debug, Clone, Deserialize)]
pub struct RunStatusResponse {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    /// Per-block run ids, present once blocks have been scheduled
    #[serde(default)]
    pub block_run_ids: Option<HashMap<String, String>>,
}

impl RunStatusResponse {
    pub fn job_status(&self) -> JobStatus {
        JobStatus::parse(&self.status)
    }
}

// ============================================================================
// Databases / SQL
// ============================================================================

/// One entry from the database list
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseEntry {
    pub id: u64,
    pub database_name: String,
    #[serde(default)]
    pub created_by: Option<serde_json::Value>,
}

/// Database list response
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseListResponse {
    pub result: Vec<DatabaseEntry>,
}

/// SQL execution request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlRequest {
    pub sql: String,
}

/// SQL execution result as columns + rows
#[derive(Debug, Clone, Deserialize)]
pub struct SqlResultResponse {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl SqlResultResponse {
    /// First cell of the first row, for single-value queries like COUNT
    pub fn scalar(&self) -> Option<&serde_json::Value> {
        self.rows.first().and_then(|row| row.first())
    }
}

// ============================================================================
// Artefacts
// ============================================================================

/// One artefact produced by a block run
#[derive(Debug, Clone, Deserialize)]
pub struct Artefact {
    pub name: String,
    pub value: serde_json::Value,
}

/// Artefact list for a block run
#[derive(Debug, Clone, Deserialize)]
pub struct ArtefactsResponse {
    pub result: Vec<Artefact>,
}

impl ArtefactsResponse {
    /// URL of the dashboard created by the dashboard block, when present
    pub fn dashboard_url(&self) -> Option<&str> {
        self.result
            .iter()
            .find(|a| a.name == "dashboard_url")
            .and_then(|a| a.value.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_status_parsing() {
        assert_eq!(JobStatus::parse("success"), JobStatus::Success);
        assert_eq!(JobStatus::parse("FAILED"), JobStatus::Failed);
        assert_eq!(JobStatus::parse("running"), JobStatus::Running);
        assert_eq!(
            JobStatus::parse("queued"),
            JobStatus::Other("queued".to_string())
        );
    }

    #[test]
    fn test_unknown_status_is_not_terminal() {
        assert!(JobStatus::Success.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::parse("warming_up").is_terminal());
    }

    #[test]
    fn test_dag_params_pair_decoding() {
        let raw = json!({
            "result": [
                ["target_connection", {"value": "pg_main"}],
                ["target_schema", {"value": "load_schema"}],
                ["enum_limit", {"value": 20}]
            ]
        });

        let params: DagParamsResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(params.string_param("target_connection").unwrap(), "pg_main");
        assert_eq!(params.string_param("target_schema").unwrap(), "load_schema");
        assert_eq!(params.string_param("enum_limit").unwrap(), "20");
        assert!(params.string_param("missing").is_none());
    }

    #[test]
    fn test_sql_scalar() {
        let raw = json!({"columns": ["count"], "rows": [[12345]]});
        let result: SqlResultResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(result.scalar().unwrap().as_u64(), Some(12345));
    }

    #[test]
    fn test_artefact_dashboard_url() {
        let raw = json!({
            "result": [
                {"name": "report_id", "value": 9},
                {"name": "dashboard_url", "value": "https://etl.example.com/dash/42"}
            ]
        });
        let artefacts: ArtefactsResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(
            artefacts.dashboard_url().unwrap(),
            "https://etl.example.com/dash/42"
        );
    }
}

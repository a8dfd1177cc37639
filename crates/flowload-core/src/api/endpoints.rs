//! API endpoint URL builders
//!
//! Helper functions to construct ETL service endpoint URLs. Query shapes and
//! path layouts follow the remote contract the flow state machine depends on.

/// Block id of the file loader step inside a flow.
pub const FILE_LOADER_BLOCK: &str = "spm_file_loader_v2";

/// Block id of the process-mining calculation step.
pub const PROCESS_MINING_BLOCK: &str = "spm_process_mining_v2";

/// Block id of the dashboard creation step inside a process-mining flow.
pub const DASHBOARD_BLOCK: &str = "spm_dashboard_creation_v_0_2[0]";

/// Build DAG parameters URL for a block of a flow
///
/// The `q` parameter uses the service's rison-style filter syntax.
pub fn dag_params_url(base_url: &str, block: &str, flow_id: u64) -> String {
    format!(
        "{}/etl/api/v1/flow/dag_params/v2/{}?q=(active:!f,block_id:0,enum_limit:20,flow_id:{})",
        base_url, block, flow_id
    )
}

/// Build flow update URL
pub fn update_flow_url(base_url: &str, flow_id: u64) -> String {
    format!("{}/etl/api/v1/flow/{}", base_url, flow_id)
}

/// Build start-upload URL
pub fn start_upload_url(base_url: &str) -> String {
    format!("{}/etl/api/v1/flow/upload/start", base_url)
}

/// Build chunk upload URL
pub fn upload_chunk_url(base_url: &str) -> String {
    format!("{}/etl/api/v1/flow/upload/chunk", base_url)
}

/// Build finalize-upload URL
pub fn finalize_upload_url(base_url: &str) -> String {
    format!("{}/etl/api/v1/flow/upload/finalize", base_url)
}

/// Build start-processing URL for a flow
pub fn start_processing_url(base_url: &str, flow_id: u64) -> String {
    format!("{}/etl/api/v1/flow/{}/run", base_url, flow_id)
}

/// Build run status URL
pub fn run_status_url(base_url: &str, run_id: &str) -> String {
    format!("{}/etl/api/v1/flow/run/{}/status", base_url, run_id)
}

/// Build database list URL
pub fn databases_url(base_url: &str) -> String {
    format!("{}/api/v1/database/", base_url)
}

/// Build SQL execution URL
pub fn execute_sql_url(base_url: &str) -> String {
    format!("{}/api/v1/sql/execute", base_url)
}

/// Build block artefacts URL for a finished run
pub fn block_artefacts_url(
    base_url: &str,
    flow_id: u64,
    block_id: &str,
    block_run_id: &str,
    run_id: &str,
) -> String {
    format!(
        "{}/etl/api/v1/flow/{}/block/{}/run/{}/artefacts?run_id={}",
        base_url, flow_id, block_id, block_run_id, run_id
    )
}

/// Derive the stable upload id correlating every call of one file upload
pub fn upload_id(flow_id: u64, block_id: &str) -> String {
    format!("{}_{}", flow_id, block_id)
}

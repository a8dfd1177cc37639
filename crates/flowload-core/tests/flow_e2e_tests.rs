//! End-to-end flow scenarios against a mock ETL service
//!
//! Each test stands up a wiremock server, scripts the service's responses,
//! and drives a full flow through the orchestrator, asserting on the terminal
//! outcome and on which endpoints were actually hit.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use flowload_core::api::EtlClient;
use flowload_core::chunks::ChunkSource;
use flowload_core::config::LoadConfig;
use flowload_core::executor::RequestExecutor;
use flowload_core::metrics::{self, MetricsRegistry};
use flowload_core::orchestrator::{FlowOrchestrator, FlowFailure, FlowOutcome};
use flowload_core::pools::FlowIdAllocator;
use flowload_core::stop::StopCoordinator;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FLOW_ID: u64 = 42;

struct Harness {
    config: LoadConfig,
    client: EtlClient,
    source: ChunkSource,
    allocator: FlowIdAllocator,
    stop: StopCoordinator,
    metrics: Arc<MetricsRegistry>,
    _file: tempfile::NamedTempFile,
}

impl Harness {
    fn new(server_uri: &str) -> Self {
        let yaml = format!(
            r#"
api:
  base_url: "{server_uri}"
users:
  - username: "spm_user_1"
    password: "secret"
csv_file_path: "./unused.csv"
chunk_size: 350
max_retries: 1
retry_delay_secs: 1
upload:
  timeout_small_secs: 2
  poll_interval_secs: 1
"#
        );
        let config: LoadConfig = serde_yaml::from_str(&yaml).unwrap();

        let metrics = Arc::new(MetricsRegistry::new());
        let executor = RequestExecutor::new(
            reqwest::Client::new(),
            config.max_retries,
            Duration::from_millis(2),
            Arc::clone(&metrics),
        );
        let client = EtlClient::new(
            executor,
            config.api.base_url.clone(),
            config.api.flow_endpoint.clone(),
        );

        // 30 data rows split into 3 chunks at this chunk size.
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "case_id,activity,timestamp").unwrap();
        for i in 0..30 {
            writeln!(file, "case_{i},step,2026-01-01T00:00:00").unwrap();
        }
        file.flush().unwrap();
        let source = ChunkSource::open(file.path(), config.chunk_size).unwrap();
        assert_eq!(source.total_chunks(), 3);

        Self {
            config,
            client,
            source,
            allocator: FlowIdAllocator::new(),
            stop: StopCoordinator::new(),
            metrics,
            _file: file,
        }
    }

    fn orchestrator(&self) -> FlowOrchestrator<'_> {
        FlowOrchestrator::new(
            &self.client,
            &self.config,
            &self.source,
            &self.allocator,
            &self.stop,
            Arc::clone(&self.metrics),
            1,
            "spm_user_1",
        )
    }
}

/// Mount the happy-path mocks up to and including the start of processing
async fn mount_flow_setup(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/etl/api/v1/flow/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": FLOW_ID})))
        .up_to_n_times(1)
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/etl/api/v1/flow/dag_params/v2/spm_file_loader_v2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [
                ["target_connection", {"value": "pg_main"}],
                ["target_schema", {"value": "load_schema"}]
            ]
        })))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/database/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [
                {"id": 7, "database_name": "ProcessMiningDB_spmuser1", "created_by": {"username": "admin"}}
            ]
        })))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/etl/api/v1/flow/{FLOW_ID}")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/etl/api/v1/flow/upload/start"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/etl/api/v1/flow/upload/chunk"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/etl/api/v1/flow/upload/finalize"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/etl/api/v1/flow/{FLOW_ID}/run")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"run_id": "run-A"})))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_full_flow_succeeds_with_validation() {
    let server = MockServer::start().await;
    mount_flow_setup(&server).await;

    // Still running on the first poll, done on the second.
    Mock::given(method("GET"))
        .and(path("/etl/api/v1/flow/run/run-A/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/etl/api/v1/flow/run/run-A/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/sql/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "columns": ["count"],
            "rows": [[30]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new(&server.uri());
    let outcome = harness.orchestrator().run_file_flow().await;

    match outcome {
        FlowOutcome::Succeeded(report) => {
            assert_eq!(report.flow_id, FLOW_ID);
            assert_eq!(report.flow_name, "load_100001");
            assert_eq!(report.uploaded_chunks, 3);
            assert_eq!(report.total_chunks, 3);
            assert_eq!(report.validation, Some(true));
        },
        other => panic!("expected success, got {other:?}"),
    }

    let snap = harness.metrics.snapshot();
    assert_eq!(snap.counter(metrics::FLOW_CREATIONS, "success"), 1);
    assert_eq!(
        snap.counter(metrics::CHUNK_UPLOADS, &format!("{FLOW_ID}:success")),
        3
    );
    assert_eq!(snap.counter(metrics::VALIDATION_RESULTS, "pass"), 1);
}

#[tokio::test]
async fn test_never_terminal_run_times_out_without_validation() {
    let server = MockServer::start().await;
    mount_flow_setup(&server).await;

    Mock::given(method("GET"))
        .and(path("/etl/api/v1/flow/run/run-A/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running"})))
        .mount(&server)
        .await;
    // No terminal status ever arrives, so validation must not run.
    Mock::given(method("POST"))
        .and(path("/api/v1/sql/execute"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let harness = Harness::new(&server.uri());
    let outcome = harness.orchestrator().run_file_flow().await;

    assert_eq!(outcome, FlowOutcome::TimedOut);
    let snap = harness.metrics.snapshot();
    assert_eq!(snap.counter_total(metrics::VALIDATION_RESULTS), 0);
}

#[tokio::test]
async fn test_flow_creation_failure_stops_everything() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/etl/api/v1/flow/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    // Nothing downstream of creation may be touched.
    for endpoint in [
        "/etl/api/v1/flow/dag_params/v2/spm_file_loader_v2",
        "/api/v1/database/",
        "/etl/api/v1/flow/upload/start",
        "/etl/api/v1/flow/upload/chunk",
    ] {
        Mock::given(path(endpoint))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
    }

    let harness = Harness::new(&server.uri());
    let outcome = harness.orchestrator().run_file_flow().await;

    assert_eq!(outcome, FlowOutcome::Failed(FlowFailure::FlowCreationFailed));
    let snap = harness.metrics.snapshot();
    assert_eq!(snap.counter(metrics::FLOW_CREATIONS, "failed"), 1);
}

#[tokio::test]
async fn test_stop_signal_cancels_a_polling_flow() {
    let server = MockServer::start().await;
    mount_flow_setup(&server).await;

    Mock::given(method("GET"))
        .and(path("/etl/api/v1/flow/run/run-A/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/sql/execute"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let harness = Harness::new(&server.uri());
    // Shutdown already acted upon: the flow runs until it reaches the
    // polling phase and then backs out.
    harness.stop.set_stop_called();
    let outcome = harness.orchestrator().run_file_flow().await;

    assert_eq!(outcome, FlowOutcome::Cancelled);
}

#[tokio::test]
async fn test_database_not_found_fails_before_upload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/etl/api/v1/flow/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": FLOW_ID})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/etl/api/v1/flow/dag_params/v2/spm_file_loader_v2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [
                ["target_connection", {"value": "pg_main"}],
                ["target_schema", {"value": "load_schema"}]
            ]
        })))
        .mount(&server)
        .await;
    // No database carries this user's name.
    Mock::given(method("GET"))
        .and(path("/api/v1/database/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [
                {"id": 9, "database_name": "ProcessMiningDB_someoneelse", "created_by": {"username": "admin"}}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(path("/etl/api/v1/flow/upload/start"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let harness = Harness::new(&server.uri());
    let outcome = harness.orchestrator().run_file_flow().await;

    assert_eq!(outcome, FlowOutcome::Failed(FlowFailure::DatabaseNotFound));
}

#[tokio::test]
async fn test_process_metrics_chains_after_success() {
    let server = MockServer::start().await;
    mount_flow_setup(&server).await;

    Mock::given(method("GET"))
        .and(path("/etl/api/v1/flow/run/run-A/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/sql/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "columns": ["count"],
            "rows": [[30]]
        })))
        .mount(&server)
        .await;

    // PM chain: params off the completed flow, a second flow, its run, and
    // the dashboard artefact lookup.
    Mock::given(method("GET"))
        .and(path("/etl/api/v1/flow/dag_params/v2/spm_process_mining_v2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [
                ["source_connection", {"value": "pg_main"}],
                ["source_schema", {"value": "load_schema"}],
                ["storage_connection", {"value": "s3_store"}],
                ["compute_connection", {"value": "spark_main"}]
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/etl/api/v1/flow/43/run"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"run_id": "run-PM"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/etl/api/v1/flow/run/run-PM/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "block_run_ids": {"spm_dashboard_creation_v_0_2[0]": "br-1"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(
            "/etl/api/v1/flow/43/block/spm_dashboard_creation_v_0_2[0]/run/br-1/artefacts",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [{"name": "dashboard_url", "value": format!("{}/dash/1", server.uri())}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/dash/1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut harness = Harness::new(&server.uri());
    harness.config.process_metrics = true;

    // The second flow creation on the shared endpoint gets the next id.
    Mock::given(method("POST"))
        .and(path("/etl/api/v1/flow/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 43})))
        .mount(&server)
        .await;

    let outcome = harness.orchestrator().run_iteration().await;

    assert!(matches!(outcome.file_flow, FlowOutcome::Succeeded(_)));
    match outcome.process_metrics {
        Some(FlowOutcome::Succeeded(report)) => {
            assert_eq!(report.flow_id, 43);
            assert_eq!(report.flow_name, "load_100001_pm");
        },
        other => panic!("expected a successful PM flow, got {other:?}"),
    }
}

//! Chunked upload pipeline
//!
//! Consumes the lazy chunk iterator and drives each chunk through the
//! executor-backed client. A chunk that spends all its attempts is logged and
//! skipped in best-effort mode (the historical default), so the achieved
//! count can fall short of the announced total; fail-fast mode aborts the
//! flow instead. The chunks-in-progress gauge is bracketed by an RAII guard
//! so concurrent observers see how many uploads are active system-wide even
//! when a pipeline exits early.

use crate::api::{ChunkUploadMeta, EtlClient};
use crate::chunks::ChunkSource;
use crate::config::ChunkFailureMode;
use crate::error::{FlowError, Result};
use crate::metrics::MetricsRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Where the chunks are going
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub upload_id: String,
    pub database_id: u64,
    pub schema: String,
    pub table: String,
}

/// Outcome of one pipeline run; `uploaded <= total` always holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReport {
    pub uploaded: u64,
    pub total: u64,
}

struct InProgressGuard<'a>(&'a MetricsRegistry);

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.upload_finished();
    }
}

/// Drives all chunks of one upload
pub struct UploadPipeline<'a> {
    client: &'a EtlClient,
    metrics: Arc<MetricsRegistry>,
    mode: ChunkFailureMode,
    max_retries: u32,
    retry_delay: Duration,
}

impl<'a> UploadPipeline<'a> {
    pub fn new(
        client: &'a EtlClient,
        metrics: Arc<MetricsRegistry>,
        mode: ChunkFailureMode,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            client,
            metrics,
            mode,
            max_retries,
            retry_delay,
        }
    }

    /// Upload every chunk of `source` to `target`
    ///
    /// Chunk numbering is taken from the source, so part numbers run `1..N`
    /// in order no matter how many individual attempts were retried.
    pub async fn run(
        &self,
        source: &ChunkSource,
        target: &UploadTarget,
        flow_id: u64,
        chunk_timeout: Duration,
    ) -> Result<UploadReport> {
        let total = source.total_chunks();
        self.metrics.upload_started();
        let _guard = InProgressGuard(&self.metrics);

        let mut uploaded = 0;
        for chunk in source.chunks()? {
            let chunk = chunk?;
            let meta = ChunkUploadMeta {
                upload_id: target.upload_id.clone(),
                part_num: chunk.number,
                total_chunks: total,
                database_id: target.database_id,
                schema: target.schema.clone(),
                table: target.table.clone(),
            };

            match self.upload_one(&meta, chunk.payload, chunk_timeout).await {
                Ok(duration) => {
                    uploaded += 1;
                    self.metrics.record_chunk_upload(flow_id, true);
                    self.metrics.record_chunk_upload_duration(duration);
                    self.metrics
                        .set_upload_progress(flow_id, uploaded as f64 / total as f64 * 100.0);
                },
                Err(e) => {
                    self.metrics.record_chunk_upload(flow_id, false);
                    error!(
                        flow_id,
                        part_num = meta.part_num,
                        error = %e,
                        "Chunk upload gave up"
                    );
                    if self.mode == ChunkFailureMode::FailFast {
                        return Err(e);
                    }
                },
            }
        }

        info!(flow_id, uploaded, total, "Chunk upload completed");
        Ok(UploadReport { uploaded, total })
    }

    /// Upload a single chunk with linear backoff between attempts
    async fn upload_one(
        &self,
        meta: &ChunkUploadMeta,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Duration> {
        let mut last_err = None;

        for attempt in 1..=self.max_retries {
            let started = Instant::now();
            match self
                .client
                .upload_chunk(meta, payload.clone(), timeout)
                .await
            {
                Ok(()) => return Ok(started.elapsed()),
                // 4xx means the server rejected the chunk outright.
                Err(e @ FlowError::ClientRequest { .. }) => return Err(e),
                Err(e) => {
                    warn!(
                        part_num = meta.part_num,
                        attempt,
                        error = %e,
                        "Chunk attempt failed"
                    );
                    last_err = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(self.retry_delay.saturating_mul(attempt)).await;
                    }
                },
            }
        }

        Err(last_err.unwrap_or_else(|| FlowError::Exhausted("Upload chunk".to_string())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::executor::RequestExecutor;
    use crate::metrics;
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn three_chunk_source() -> (tempfile::NamedTempFile, ChunkSource) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "case_id,activity,timestamp").unwrap();
        for i in 0..30 {
            writeln!(file, "case_{i},step,2026-01-01T00:00:00").unwrap();
        }
        file.flush().unwrap();
        // Roughly a third of the file per chunk.
        let source = ChunkSource::open(file.path(), 350).unwrap();
        assert_eq!(source.total_chunks(), 3);
        (file, source)
    }

    fn client_for(server_uri: &str, registry: Arc<MetricsRegistry>, max_retries: u32) -> EtlClient {
        let executor = RequestExecutor::new(
            reqwest::Client::new(),
            max_retries,
            Duration::from_millis(2),
            registry,
        );
        EtlClient::new(executor, server_uri.to_string(), "/etl/api/v1/flow/")
    }

    fn target() -> UploadTarget {
        UploadTarget {
            upload_id: "100001_spm_file_loader_v2".to_string(),
            database_id: 7,
            schema: "load_schema".to_string(),
            table: "load_100001".to_string(),
        }
    }

    #[tokio::test]
    async fn test_part_numbers_run_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/etl/api/v1/flow/upload/chunk"))
            .respond_with(ResponseTemplate::new(200))
            .expect(3)
            .mount(&server)
            .await;

        let registry = Arc::new(MetricsRegistry::new());
        let client = client_for(&server.uri(), Arc::clone(&registry), 1);
        let (_file, source) = three_chunk_source();

        let pipeline = UploadPipeline::new(
            &client,
            Arc::clone(&registry),
            ChunkFailureMode::BestEffort,
            1,
            Duration::from_millis(2),
        );
        let report = pipeline
            .run(&source, &target(), 100001, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(report, UploadReport { uploaded: 3, total: 3 });

        // Multipart bodies carry the part file names in upload order.
        let requests = server.received_requests().await.unwrap();
        let positions: Vec<usize> = (1..=3)
            .map(|n| {
                requests
                    .iter()
                    .position(|r| {
                        String::from_utf8_lossy(&r.body).contains(&format!("part_{n}.csv"))
                    })
                    .unwrap()
            })
            .collect();
        assert_eq!(positions, vec![0, 1, 2]);

        let snap = registry.snapshot();
        assert_eq!(snap.gauge(metrics::UPLOAD_PROGRESS, "100001"), Some(100.0));
        assert_eq!(snap.gauge(metrics::CHUNKS_IN_PROGRESS, ""), Some(0.0));
    }

    #[tokio::test]
    async fn test_best_effort_continues_past_dead_chunk() {
        let server = MockServer::start().await;
        // First chunk dies (executor budget is 1 attempt), the rest succeed.
        Mock::given(method("POST"))
            .and(path("/etl/api/v1/flow/upload/chunk"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/etl/api/v1/flow/upload/chunk"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let registry = Arc::new(MetricsRegistry::new());
        let client = client_for(&server.uri(), Arc::clone(&registry), 1);
        let (_file, source) = three_chunk_source();

        let pipeline = UploadPipeline::new(
            &client,
            Arc::clone(&registry),
            ChunkFailureMode::BestEffort,
            1,
            Duration::from_millis(2),
        );
        let report = pipeline
            .run(&source, &target(), 100001, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(report, UploadReport { uploaded: 2, total: 3 });

        let snap = registry.snapshot();
        assert_eq!(snap.counter(metrics::CHUNK_UPLOADS, "100001:failed"), 1);
        assert_eq!(snap.counter(metrics::CHUNK_UPLOADS, "100001:success"), 2);
    }

    #[tokio::test]
    async fn test_fail_fast_aborts_on_dead_chunk() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/etl/api/v1/flow/upload/chunk"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let registry = Arc::new(MetricsRegistry::new());
        let client = client_for(&server.uri(), Arc::clone(&registry), 1);
        let (_file, source) = three_chunk_source();

        let pipeline = UploadPipeline::new(
            &client,
            Arc::clone(&registry),
            ChunkFailureMode::FailFast,
            2,
            Duration::from_millis(2),
        );
        let result = pipeline
            .run(&source, &target(), 100001, Duration::from_secs(5))
            .await;

        assert!(result.is_err());

        // The in-progress gauge still unwinds through the guard.
        let snap = registry.snapshot();
        assert_eq!(snap.gauge(metrics::CHUNKS_IN_PROGRESS, ""), Some(0.0));
    }

    #[tokio::test]
    async fn test_retries_use_the_chunk_budget() {
        let server = MockServer::start().await;
        // One 500, then success: the pipeline-level retry recovers the chunk
        // even with an executor budget of a single attempt.
        Mock::given(method("POST"))
            .and(path("/etl/api/v1/flow/upload/chunk"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/etl/api/v1/flow/upload/chunk"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let registry = Arc::new(MetricsRegistry::new());
        let client = client_for(&server.uri(), Arc::clone(&registry), 1);
        let (_file, source) = three_chunk_source();

        let pipeline = UploadPipeline::new(
            &client,
            Arc::clone(&registry),
            ChunkFailureMode::BestEffort,
            3,
            Duration::from_millis(2),
        );
        let report = pipeline
            .run(&source, &target(), 100001, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(report, UploadReport { uploaded: 3, total: 3 });
    }
}

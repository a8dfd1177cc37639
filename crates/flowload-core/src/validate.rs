//! Row-count validation
//!
//! Post-success consistency check: count the rows that actually landed in
//! the target table and compare against the source file's line count. Purely
//! observability; the flow is already succeeded from the server's point of
//! view whatever the comparison says.

use crate::api::EtlClient;
use crate::error::{FlowError, Result};
use crate::metrics::MetricsRegistry;
use tracing::{info, warn};

/// Compare the target table's row count to the expected count
pub async fn validate_row_count(
    client: &EtlClient,
    metrics: &MetricsRegistry,
    schema: &str,
    table: &str,
    expected: u64,
) -> Result<bool> {
    let sql = format!("SELECT COUNT(*) FROM {schema}.{table}");
    let result = client.execute_sql(sql).await?;

    let actual = result
        .scalar()
        .and_then(|v| v.as_u64())
        .ok_or_else(|| FlowError::protocol("count query returned no numeric value"))?;

    metrics.set_db_row_count(table, actual);
    let passed = actual == expected;
    metrics.record_validation(passed);

    if passed {
        info!(table, rows = actual, "Row count validation passed");
    } else {
        warn!(table, expected, actual, "Row count validation failed");
    }

    Ok(passed)
}

//! Persistence of drift summaries
//!
//! One append-only row per monitored batch in the `dummy_metrics` table.
//! Row order is insertion order (SQLite rowid).

use crate::drift::DriftReport;
use crate::models::MetricsRow;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default bound for a single append
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS dummy_metrics (
    drifted_column_count INTEGER,
    reference_quantile_value FLOAT
)
"#;

const DROP_TABLE_SQL: &str = "DROP TABLE IF EXISTS dummy_metrics";

const INSERT_SQL: &str =
    "INSERT INTO dummy_metrics (drifted_column_count, reference_quantile_value) VALUES (?, ?)";

const SELECT_SQL: &str =
    "SELECT drifted_column_count, reference_quantile_value FROM dummy_metrics ORDER BY rowid";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("metrics write timed out after {0:?}")]
    Timeout(Duration),

    #[error("refusing to persist non-finite quantile value {0}")]
    NonFinite(f64),
}

/// SQLite-backed drift metrics table
#[derive(Debug, Clone)]
pub struct MetricsStore {
    pool: SqlitePool,
    write_timeout: Duration,
}

impl MetricsStore {
    /// Open the database at `database_url`, creating the file if needed
    pub async fn connect(database_url: &str, write_timeout: Duration) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        info!(url = %database_url, "Connected to metrics store");
        Ok(Self {
            pool,
            write_timeout,
        })
    }

    /// Private in-memory database. A single connection that never expires
    /// keeps the data alive for the lifetime of the store.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Ok(Self {
            pool,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        })
    }

    /// Create the metrics table if absent. Existing rows are kept.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_TABLE_SQL).execute(&self.pool).await?;
        debug!("Metrics schema ensured");
        Ok(())
    }

    /// Drop and recreate the metrics table, discarding every row
    pub async fn reset_schema(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(DROP_TABLE_SQL).execute(&mut *tx).await?;
        sqlx::query(CREATE_TABLE_SQL).execute(&mut *tx).await?;
        tx.commit().await?;

        warn!("Metrics table reset, previous rows discarded");
        Ok(())
    }

    /// Insert one row for `report` in its own transaction
    pub async fn append(&self, report: &DriftReport) -> Result<MetricsRow, StoreError> {
        let row = MetricsRow {
            drifted_column_count: report.drifted_column_count,
            reference_quantile_value: report.reference_quantile_value,
        };
        if !row.reference_quantile_value.is_finite() {
            return Err(StoreError::NonFinite(row.reference_quantile_value));
        }

        let write = async {
            let mut tx = self.pool.begin().await?;
            sqlx::query(INSERT_SQL)
                .bind(row.drifted_column_count)
                .bind(row.reference_quantile_value)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok::<_, StoreError>(())
        };

        tokio::time::timeout(self.write_timeout, write)
            .await
            .map_err(|_| StoreError::Timeout(self.write_timeout))??;

        debug!(
            drifted_column_count = row.drifted_column_count,
            reference_quantile_value = row.reference_quantile_value,
            "Persisted drift metrics"
        );
        Ok(row)
    }

    /// Every stored row in insertion order
    pub async fn rows(&self) -> Result<Vec<MetricsRow>, StoreError> {
        let rows: Vec<(i64, f64)> = sqlx::query_as(SELECT_SQL).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(drifted_column_count, reference_quantile_value)| MetricsRow {
                drifted_column_count,
                reference_quantile_value,
            })
            .collect())
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dummy_metrics")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Cheap connectivity check for readiness
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

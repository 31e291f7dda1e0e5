//! Metric storage for the Tally server.
//!
//! All backends implement [`MetricStore`]. The server holds a single store for its lifetime and
//! shares it between request handlers:
//!
//!  - [`MemoryStore`] keeps metrics in process memory and can snapshot them to a JSON file.
//!  - [`SqlStore`] writes through to a SQL database, retrying transient failures.
//!
//! Use [`from_config`] to create the store selected by the configuration.
#![warn(missing_docs)]

mod memory;
mod sql;

use std::collections::BTreeMap;
use std::sync::Arc;

use tally_common::CancellationToken;
use tally_common::retry::{Retryable, is_retryable_sqlstate};
use tally_config::{Config, StorageBackend};
use tally_metrics::{CounterType, GaugeType, Metric, MetricType, MetricValue};

pub use self::memory::*;
pub use self::sql::*;

/// An error returned by [`MetricStore`] operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested metric does not exist.
    #[error("{ty} {id:?} not found")]
    NotFound {
        /// The requested type.
        ty: MetricType,
        /// The requested name.
        id: String,
    },

    /// A database failure that may succeed on a later attempt.
    #[error("transient database error")]
    Transient(#[source] sqlx::Error),

    /// A write violated a unique constraint.
    #[error("unique constraint violated")]
    UniqueViolation(#[source] sqlx::Error),

    /// Retrying a transient failure was given up.
    #[error("giving up after {attempts} attempts")]
    MaxRetriesExceeded {
        /// The number of attempts made.
        attempts: usize,
        /// The error of the last attempt.
        #[source]
        source: Box<StoreError>,
    },

    /// The operation was interrupted by shutdown while waiting for a retry.
    #[error("operation cancelled")]
    Cancelled,

    /// The snapshot file could not be read or written.
    #[error("failed to persist snapshot")]
    Persistence(#[source] PersistenceError),

    /// Any other database failure.
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

impl StoreError {
    /// Returns `true` if the error is a unique constraint violation.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        let (unique, transient) = match &error {
            sqlx::Error::Database(db) => (
                db.kind() == sqlx::error::ErrorKind::UniqueViolation,
                db.code().is_some_and(|code| is_retryable_sqlstate(&code)),
            ),
            sqlx::Error::PoolTimedOut => (false, true),
            sqlx::Error::Io(io) => (false, io.kind() == std::io::ErrorKind::TimedOut),
            _ => (false, false),
        };

        if unique {
            Self::UniqueViolation(error)
        } else if transient {
            Self::Transient(error)
        } else {
            Self::Database(error)
        }
    }
}

impl From<PersistenceError> for StoreError {
    fn from(error: PersistenceError) -> Self {
        Self::Persistence(error)
    }
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Storage of gauges and counters.
///
/// Gauges and counters are separate namespaces. Reads of unknown metrics return `Ok(None)`.
#[async_trait::async_trait]
pub trait MetricStore: Send + Sync {
    /// Replaces the value of a gauge.
    async fn set_gauge(&self, id: &str, value: GaugeType) -> Result<(), StoreError>;

    /// Adds `delta` to the total of a counter. Unknown counters start at `0`.
    async fn add_counter(&self, id: &str, delta: CounterType) -> Result<(), StoreError>;

    /// Returns the current value of a gauge.
    async fn get_gauge(&self, id: &str) -> Result<Option<GaugeType>, StoreError>;

    /// Returns the current total of a counter.
    async fn get_counter(&self, id: &str) -> Result<Option<CounterType>, StoreError>;

    /// Returns all gauges sorted by name.
    async fn gauges(&self) -> Result<BTreeMap<String, GaugeType>, StoreError>;

    /// Returns all counters sorted by name.
    async fn counters(&self) -> Result<BTreeMap<String, CounterType>, StoreError>;

    /// Applies a batch of metrics in order.
    async fn update_batch(&self, metrics: &[Metric]) -> Result<(), StoreError> {
        for metric in metrics {
            self.update(metric).await?;
        }
        Ok(())
    }

    /// Persists a snapshot of the current state, if the backend supports it.
    async fn save(&self) -> Result<(), StoreError>;

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Applies a single metric.
    async fn update(&self, metric: &Metric) -> Result<(), StoreError> {
        match metric.value {
            MetricValue::Gauge(value) => self.set_gauge(&metric.id, value).await,
            MetricValue::Counter(delta) => self.add_counter(&metric.id, delta).await,
        }
    }

    /// Returns the stored value of a metric.
    async fn get(&self, ty: MetricType, id: &str) -> Result<Option<MetricValue>, StoreError> {
        Ok(match ty {
            MetricType::Gauge => self.get_gauge(id).await?.map(MetricValue::Gauge),
            MetricType::Counter => self.get_counter(id).await?.map(MetricValue::Counter),
        })
    }
}

/// Creates the store selected by the configuration.
///
/// For the in-memory backend, the snapshot is restored when configured. A snapshot that cannot be
/// read is logged and the store starts empty. `cancel` interrupts retries of the SQL backend.
pub async fn from_config(
    config: &Config,
    cancel: CancellationToken,
) -> Result<Arc<dyn MetricStore>, StoreError> {
    match config.storage_backend() {
        StorageBackend::Sql(dsn) => {
            tally_log::info!("connecting to database");
            let store = SqlStore::connect(&dsn, config, cancel).await?;
            tally_log::info!("database ready");
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            let store = MemoryStore::new(config.snapshot_path().map(Into::into));

            if config.restore() {
                match store.load().await {
                    Ok(()) => tally_log::info!("metrics restored from snapshot"),
                    Err(error) => tally_log::warn!(
                        error = &error as &dyn std::error::Error,
                        "could not restore metrics from snapshot"
                    ),
                }
            }

            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_sqlx_errors() {
        assert!(StoreError::from(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(
            StoreError::from(sqlx::Error::Io(std::io::ErrorKind::TimedOut.into())).is_retryable()
        );
        assert!(!StoreError::from(sqlx::Error::RowNotFound).is_retryable());
        assert!(!StoreError::from(sqlx::Error::PoolClosed).is_retryable());
    }

    #[tokio::test]
    async fn test_from_config_restore_missing_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let config = Config::from_json_value(serde_json::json!({
            "server": {
                "file_storage_path": path,
                "restore": true,
            }
        }))
        .unwrap();

        let store = from_config(&config, CancellationToken::new()).await.unwrap();
        assert!(store.gauges().await.unwrap().is_empty());
        assert!(store.counters().await.unwrap().is_empty());
    }
}

use std::collections::BTreeMap;

use sqlx::any::{AnyPoolOptions, install_default_drivers};
use sqlx::{Any, AnyPool, Row, Transaction};
use tally_common::CancellationToken;
use tally_common::retry::{self, RetryError, RetrySchedule};
use tally_config::Config;
use tally_metrics::{CounterType, GaugeType, Metric, MetricValue};

use crate::{MetricStore, StoreError};

const CREATE_GAUGES: &str = "CREATE TABLE IF NOT EXISTS gauges (
    name TEXT PRIMARY KEY,
    value DOUBLE PRECISION NOT NULL
)";

const CREATE_COUNTERS: &str = "CREATE TABLE IF NOT EXISTS counters (
    name TEXT PRIMARY KEY,
    value BIGINT NOT NULL
)";

const UPSERT_GAUGE: &str = "INSERT INTO gauges (name, value) VALUES ($1, $2)
    ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value";

const UPSERT_COUNTER: &str = "INSERT INTO counters (name, value) VALUES ($1, $2)
    ON CONFLICT (name) DO UPDATE SET value = counters.value + EXCLUDED.value";

/// A store backed by a SQL database.
///
/// Postgres is the production backend, SQLite is supported for local use and tests. Every write
/// runs in a transaction that is retried as a whole on transient failures. Counter accumulation
/// happens in the database through an upsert, never as read-modify-write in the application.
#[derive(Debug, Clone)]
pub struct SqlStore {
    db: AnyPool,
    retry: RetrySchedule,
    cancel: CancellationToken,
}

impl SqlStore {
    /// Connects to the database at `dsn` and creates the tables if needed.
    ///
    /// Pool size and acquire timeout are taken from the configuration, as is the retry schedule.
    /// Firing `cancel` aborts operations that are waiting for a retry.
    pub async fn connect(
        dsn: &str,
        config: &Config,
        cancel: CancellationToken,
    ) -> Result<Self, StoreError> {
        install_default_drivers();

        let db = AnyPoolOptions::new()
            .max_connections(config.db_max_connections())
            .acquire_timeout(config.db_acquire_timeout())
            .connect(dsn)
            .await?;

        let store = Self::new(db, RetrySchedule::new(config.retry_delays()), cancel);
        store.prepare().await?;
        Ok(store)
    }

    /// Creates a store from an existing pool.
    ///
    /// Call [`prepare`](Self::prepare) before use unless the tables already exist.
    pub fn new(db: AnyPool, retry: RetrySchedule, cancel: CancellationToken) -> Self {
        Self { db, retry, cancel }
    }

    /// Creates the `gauges` and `counters` tables if they do not exist.
    pub async fn prepare(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_GAUGES).execute(&self.db).await?;
        sqlx::query(CREATE_COUNTERS).execute(&self.db).await?;
        Ok(())
    }

    /// Applies all metrics in a single transaction, retrying the transaction on transient errors.
    async fn write(&self, metrics: &[Metric]) -> Result<(), StoreError> {
        let result = retry::retry(&self.retry, &self.cancel, |attempt| async move {
            if attempt > 0 {
                tally_log::debug!(attempt, "retrying database transaction");
            }
            self.try_write(metrics).await
        })
        .await;

        result.map_err(|error| match error {
            RetryError::NonRetriable(error) => error,
            RetryError::MaxRetriesExceeded { attempts, source } => {
                StoreError::MaxRetriesExceeded {
                    attempts,
                    source: Box::new(source),
                }
            }
            RetryError::Cancelled => StoreError::Cancelled,
        })
    }

    async fn try_write(&self, metrics: &[Metric]) -> Result<(), StoreError> {
        let mut tx = self.db.begin().await?;

        for metric in metrics {
            upsert(&mut tx, metric).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

async fn upsert(tx: &mut Transaction<'_, Any>, metric: &Metric) -> Result<(), StoreError> {
    let query = match metric.value {
        MetricValue::Gauge(value) => sqlx::query(UPSERT_GAUGE)
            .bind(metric.id.as_str())
            .bind(value),
        MetricValue::Counter(delta) => sqlx::query(UPSERT_COUNTER)
            .bind(metric.id.as_str())
            .bind(delta),
    };

    query.execute(&mut **tx).await?;
    Ok(())
}

#[async_trait::async_trait]
impl MetricStore for SqlStore {
    async fn set_gauge(&self, id: &str, value: GaugeType) -> Result<(), StoreError> {
        self.write(&[Metric::gauge(id, value)]).await
    }

    async fn add_counter(&self, id: &str, delta: CounterType) -> Result<(), StoreError> {
        self.write(&[Metric::counter(id, delta)]).await
    }

    async fn get_gauge(&self, id: &str) -> Result<Option<GaugeType>, StoreError> {
        let row = sqlx::query("SELECT value FROM gauges WHERE name = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(row.map(|row| row.try_get(0)).transpose()?)
    }

    async fn get_counter(&self, id: &str) -> Result<Option<CounterType>, StoreError> {
        let row = sqlx::query("SELECT value FROM counters WHERE name = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(row.map(|row| row.try_get(0)).transpose()?)
    }

    async fn gauges(&self) -> Result<BTreeMap<String, GaugeType>, StoreError> {
        let rows = sqlx::query("SELECT name, value FROM gauges")
            .fetch_all(&self.db)
            .await?;

        rows.iter()
            .map(|row| -> Result<(String, GaugeType), StoreError> {
                Ok((row.try_get(0)?, row.try_get(1)?))
            })
            .collect()
    }

    async fn counters(&self) -> Result<BTreeMap<String, CounterType>, StoreError> {
        let rows = sqlx::query("SELECT name, value FROM counters")
            .fetch_all(&self.db)
            .await?;

        rows.iter()
            .map(|row| -> Result<(String, CounterType), StoreError> {
                Ok((row.try_get(0)?, row.try_get(1)?))
            })
            .collect()
    }

    async fn update_batch(&self, metrics: &[Metric]) -> Result<(), StoreError> {
        if metrics.is_empty() {
            return Ok(());
        }
        self.write(metrics).await
    }

    async fn save(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}

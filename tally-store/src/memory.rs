use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tally_metrics::{CounterType, GaugeType, Metric, MetricValue};

use crate::{MetricStore, StoreError};

/// An error returned when reading or writing a snapshot file.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Reading or writing the file failed.
    #[error("could not access snapshot file {path:?}")]
    Io {
        /// The snapshot path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The file content is not a valid snapshot.
    #[error("could not (de)serialize snapshot")]
    Json(#[from] serde_json::Error),
}

/// The complete state of a [`MemoryStore`], and the serialized format of its snapshot file.
///
/// ```json
/// {
///     "gauges": {"Alloc": 1048576.0},
///     "counters": {"PollCount": 5}
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Snapshot {
    /// Current values of all gauges.
    #[serde(default)]
    pub gauges: BTreeMap<String, GaugeType>,
    /// Current totals of all counters.
    #[serde(default)]
    pub counters: BTreeMap<String, CounterType>,
}

impl Snapshot {
    fn apply(&mut self, metric: &Metric) {
        match metric.value {
            MetricValue::Gauge(value) => {
                self.gauges.insert(metric.id.clone(), value);
            }
            MetricValue::Counter(delta) => {
                let total = self.counters.entry(metric.id.clone()).or_default();
                *total = total.saturating_add(delta);
            }
        }
    }

    /// Serializes the snapshot as pretty JSON with a trailing newline.
    fn to_json(&self) -> Result<Vec<u8>, PersistenceError> {
        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        self.serialize(&mut serializer)?;
        buffer.push(b'\n');
        Ok(buffer)
    }
}

/// A store that keeps all metrics in process memory.
///
/// Both maps are guarded by a single lock. Writes hold the lock for the duration of the mutation,
/// reads return copies. Batches are applied under one lock acquisition, so concurrent requests
/// never observe a partially applied batch.
///
/// If created with a path, [`save`](MetricStore::save) writes the state to that file and
/// [`load`](Self::load) restores it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Snapshot>,
    path: Option<PathBuf>,
    save_lock: tokio::sync::Mutex<()>,
}

impl MemoryStore {
    /// Creates an empty store, persisting snapshots to `path` if given.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            state: Mutex::new(Snapshot::default()),
            path,
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns the path of the snapshot file.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> Snapshot {
        self.state.lock().clone()
    }

    /// Replaces the current state with the content of the snapshot file.
    ///
    /// A missing file leaves the store empty and is not an error.
    pub async fn load(&self) -> Result<(), StoreError> {
        let Some(path) = self.path() else {
            return Ok(());
        };

        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                tally_log::debug!("no snapshot at {}, starting empty", path.display());
                return Ok(());
            }
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: path.to_owned(),
                    source,
                }
                .into());
            }
        };

        let snapshot: Snapshot = serde_json::from_slice(&data).map_err(PersistenceError::from)?;
        *self.state.lock() = snapshot;
        Ok(())
    }

    async fn write_snapshot(&self, path: &Path) -> Result<(), PersistenceError> {
        let _guard = self.save_lock.lock().await;

        let data = self.state.lock().to_json()?;
        let io_error = |source| PersistenceError::Io {
            path: path.to_owned(),
            source,
        };

        // Replace atomically so a crash never leaves a truncated snapshot behind.
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, data).await.map_err(io_error)?;
        tokio::fs::rename(&temp_path, path).await.map_err(io_error)?;

        tally_log::debug!("metrics saved to {}", path.display());
        Ok(())
    }
}

#[async_trait::async_trait]
impl MetricStore for MemoryStore {
    async fn set_gauge(&self, id: &str, value: GaugeType) -> Result<(), StoreError> {
        self.state.lock().gauges.insert(id.to_owned(), value);
        Ok(())
    }

    async fn add_counter(&self, id: &str, delta: CounterType) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let total = state.counters.entry(id.to_owned()).or_default();
        *total = total.saturating_add(delta);
        Ok(())
    }

    async fn get_gauge(&self, id: &str) -> Result<Option<GaugeType>, StoreError> {
        Ok(self.state.lock().gauges.get(id).copied())
    }

    async fn get_counter(&self, id: &str) -> Result<Option<CounterType>, StoreError> {
        Ok(self.state.lock().counters.get(id).copied())
    }

    async fn gauges(&self) -> Result<BTreeMap<String, GaugeType>, StoreError> {
        Ok(self.state.lock().gauges.clone())
    }

    async fn counters(&self) -> Result<BTreeMap<String, CounterType>, StoreError> {
        Ok(self.state.lock().counters.clone())
    }

    async fn update_batch(&self, metrics: &[Metric]) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        for metric in metrics {
            state.apply(metric);
        }
        Ok(())
    }

    async fn save(&self) -> Result<(), StoreError> {
        match self.path() {
            Some(path) => Ok(self.write_snapshot(path).await?),
            None => Ok(()),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

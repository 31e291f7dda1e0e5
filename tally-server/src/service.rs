use std::sync::Arc;

use tally_common::CancellationToken;
use tally_common::signature::Signer;
use tally_config::Config;
use tally_store::MetricStore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Server state shared by all request handlers.
#[derive(Clone)]
pub struct ServiceState {
    config: Arc<Config>,
    store: Arc<dyn MetricStore>,
    signer: Option<Signer>,
}

impl ServiceState {
    /// Creates the state for the given store.
    pub fn new(config: Arc<Config>, store: Arc<dyn MetricStore>) -> Self {
        let signer = config.signing_key().and_then(Signer::new);

        Self {
            config,
            store,
            signer,
        }
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the metric store.
    pub fn store(&self) -> &dyn MetricStore {
        self.store.as_ref()
    }

    /// Returns the payload signer, if a key is configured.
    pub fn signer(&self) -> Option<&Signer> {
        self.signer.as_ref()
    }
}

/// Periodically saves snapshots of the store until `shutdown` fires.
///
/// Returns `None` if the configuration does not request periodic snapshots.
pub fn spawn_snapshots(state: ServiceState, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
    let period = state.config().store_interval()?;

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => save(&state).await,
            }
        }
    });

    Some(handle)
}

/// Saves the store and logs failures.
pub async fn save(state: &ServiceState) {
    if let Err(error) = state.store().save().await {
        tally_log::error!(
            error = &error as &dyn std::error::Error,
            "failed to save metrics snapshot"
        );
    }
}

/// Saves the store one last time before the process exits, bounded by the shutdown timeout.
pub async fn final_save(state: &ServiceState) {
    let timeout = state.config().shutdown_timeout();

    match tokio::time::timeout(timeout, save(state)).await {
        Ok(()) => tally_log::info!("metrics saved on shutdown"),
        Err(_) => tally_log::error!("timed out saving metrics on shutdown"),
    }
}

//! The Tally collecting agent.
//!
//! The agent periodically samples runtime statistics of the host and its own process through the
//! [`Sampler`], accumulates them in a [`MetricsBuffer`](tally_metrics::MetricsBuffer), and reports
//! the buffer to the server through the [`Sender`]:
//!
//!  - Gauges keep their most recent sample.
//!  - Counters are summed up across samples, so each report carries one delta per counter.
//!
//! Reports are gzip compressed and optionally signed with the shared key. Transient failures are
//! retried on a fixed delay schedule, see [`tally_common::retry`].
#![warn(missing_docs)]

mod agent;
mod sampler;
mod sender;
#[cfg(test)]
mod testutils;

use std::sync::Arc;

use tally_common::CancellationToken;
use tally_config::Config;

pub use self::agent::Agent;
pub use self::sampler::*;
pub use self::sender::*;

/// Runs the agent until `shutdown` fires.
pub async fn run(config: Arc<Config>, shutdown: CancellationToken) -> Result<(), SenderError> {
    Agent::new(config)?.run(shutdown).await;
    Ok(())
}

use std::sync::Arc;
use std::time::Duration;

use tally_common::CancellationToken;
use tally_config::Config;
use tally_metrics::MetricsBuffer;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::sampler::Sampler;
use crate::sender::{Sender, SenderError};

fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Samples runtime statistics and reports them to the server.
///
/// Samples are merged into a [`MetricsBuffer`] on every poll tick. On every report tick, the
/// buffer is sent in one batch and only cleared if the send succeeded. Failed batches are put
/// back so that the next report includes them.
pub struct Agent {
    config: Arc<Config>,
    sampler: Sampler,
    sender: Sender,
    buffer: MetricsBuffer,
}

impl Agent {
    /// Creates an agent reporting to the server configured in `config`.
    pub fn new(config: Arc<Config>) -> Result<Self, SenderError> {
        let sender = Sender::new(&config)?;

        Ok(Self {
            config,
            sampler: Sampler::new(),
            sender,
            buffer: MetricsBuffer::new(),
        })
    }

    /// Returns the metrics waiting to be reported.
    pub fn buffer(&self) -> &MetricsBuffer {
        &self.buffer
    }

    /// Takes a sample and merges it into the buffer.
    pub fn poll(&mut self) {
        let samples = self.sampler.sample();
        tally_log::trace!(count = samples.len(), "collected samples");
        self.buffer.update(samples);
    }

    /// Sends the buffered metrics.
    ///
    /// Returns `true` if the buffer was delivered or empty. On failure, the batch is kept.
    pub async fn report(&mut self, cancel: &CancellationToken) -> bool {
        if self.buffer.is_empty() {
            return true;
        }

        let batch = self.buffer.take();
        match self.sender.send_batch(cancel, &batch.to_vec()).await {
            Ok(()) => true,
            Err(error) => {
                tally_log::error!(
                    error = &error as &dyn std::error::Error,
                    count = batch.len(),
                    "failed to send metrics batch"
                );
                self.buffer.merge(batch);
                false
            }
        }
    }

    /// Runs the poll and report schedules until `shutdown` fires.
    ///
    /// On shutdown, pending metrics are flushed one last time. The flush is bounded by the
    /// shutdown timeout and is not interrupted by `shutdown` itself.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tally_log::info!(
            poll_interval = ?self.config.poll_interval(),
            report_interval = ?self.config.report_interval(),
            "spawning agent, reporting to {}",
            self.sender.url()
        );

        let mut poll = ticker(self.config.poll_interval());
        let mut report = ticker(self.config.report_interval());

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = poll.tick() => self.poll(),
                _ = report.tick() => {
                    self.report(&shutdown).await;
                }
            }
        }

        self.flush().await;
    }

    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            tally_log::info!("agent stopped");
            return;
        }

        tally_log::info!(count = self.buffer.len(), "flushing metrics before shutdown");
        let timeout = self.config.shutdown_timeout();
        let cancel = CancellationToken::new();

        match tokio::time::timeout(timeout, self.report(&cancel)).await {
            Ok(true) => tally_log::info!("agent stopped"),
            Ok(false) => tally_log::warn!("agent stopped with undelivered metrics"),
            Err(_) => tally_log::error!("timed out flushing metrics on shutdown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use tally_metrics::{MetricType, MetricValue};

    use crate::sampler::POLL_COUNT;
    use crate::testutils::TestServer;

    use super::*;

    fn poll_count(json: &str) -> i64 {
        let batch: Vec<tally_metrics::WireMetric> = serde_json::from_str(json).unwrap();
        batch
            .into_iter()
            .find(|metric| metric.id == POLL_COUNT)
            .and_then(|metric| metric.delta)
            .unwrap()
    }

    #[tokio::test]
    async fn test_report_clears_buffer() {
        let server = TestServer::start(&[]).await;
        let mut agent = Agent::new(Arc::new(server.config(serde_json::json!({})))).unwrap();

        agent.poll();
        agent.poll();
        assert!(agent.report(&CancellationToken::new()).await);
        assert!(agent.buffer().is_empty());

        let received = server.take_received();
        assert_eq!(received.len(), 1);
        assert_eq!(poll_count(&received[0].json()), 2);
    }

    #[tokio::test]
    async fn test_failed_report_keeps_batch() {
        tally_log::init_test!();

        let server = TestServer::start(&[StatusCode::BAD_REQUEST]).await;
        let mut agent = Agent::new(Arc::new(server.config(serde_json::json!({})))).unwrap();

        agent.poll();
        assert!(!agent.report(&CancellationToken::new()).await);
        assert_eq!(
            agent.buffer().get(MetricType::Counter, POLL_COUNT),
            Some(MetricValue::Counter(1))
        );

        // The next report carries the kept batch plus newer samples.
        agent.poll();
        assert!(agent.report(&CancellationToken::new()).await);

        let received = server.take_received();
        assert_eq!(received.len(), 2);
        assert_eq!(poll_count(&received[1].json()), 2);
    }

    #[tokio::test]
    async fn test_empty_report_sends_nothing() {
        let server = TestServer::start(&[]).await;
        let mut agent = Agent::new(Arc::new(server.config(serde_json::json!({})))).unwrap();

        assert!(agent.report(&CancellationToken::new()).await);
        assert!(server.take_received().is_empty());
    }

    #[tokio::test]
    async fn test_run_flushes_on_shutdown() {
        tally_log::init_test!();

        let server = TestServer::start(&[]).await;
        let config = server.config(serde_json::json!({
            "agent": {
                "address": server.addr().to_string(),
                "poll_interval": 1,
                "report_interval": 60,
            },
        }));
        let agent = Agent::new(Arc::new(config)).unwrap();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(agent.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        let received = server.take_received();
        assert_eq!(received.len(), 1);
        assert_eq!(poll_count(&received[0].json()), 1);
    }
}

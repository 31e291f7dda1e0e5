use std::io;

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{self, HeaderMap, HeaderValue};
use tally_common::constants::{BATCH_PATH, SIGNATURE_HEADER};
use tally_common::retry::{self, RetryError, RetrySchedule, Retryable};
use tally_common::signature::Signer;
use tally_common::{CancellationToken, gzip};
use tally_config::Config;
use tally_metrics::{Metric, WireMetric};

/// An error returned by [`Sender::new`].
#[derive(Debug, thiserror::Error)]
pub enum SenderError {
    /// The HTTP client could not be configured.
    #[error("failed to build http client")]
    Client(#[from] reqwest::Error),
}

/// The failure of a single request.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The request could not be sent or the response not received.
    #[error("could not send request")]
    Http(#[from] reqwest::Error),

    /// The server responded with an unsuccessful status.
    #[error("server responded with status {0}")]
    Status(StatusCode),
}

impl Retryable for RequestError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Http(error) => {
                error.is_timeout()
                    || retry::is_io_timeout(error)
                    || retry::is_temporary_dns_failure(error)
            }
            Self::Status(status) => retry::is_retryable_status(*status),
        }
    }
}

/// An error returned by [`Sender::send_batch`].
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// There was nothing to send.
    #[error("metrics batch is empty")]
    EmptyBatch,

    /// The batch could not be serialized.
    #[error("failed to serialize metrics batch")]
    Serialize(#[from] serde_json::Error),

    /// The batch could not be compressed.
    #[error("failed to compress metrics batch")]
    Compress(#[from] io::Error),

    /// The request failed with a permanent error.
    #[error("non-retriable error")]
    NonRetriable(#[source] RequestError),

    /// All attempts failed with transient errors.
    #[error("giving up after {attempts} attempts")]
    MaxRetriesExceeded {
        /// The number of attempts made.
        attempts: usize,
        /// The error of the last attempt.
        #[source]
        source: RequestError,
    },

    /// The send was cancelled while waiting for a retry.
    #[error("send cancelled")]
    Cancelled,
}

impl From<RetryError<RequestError>> for SendError {
    fn from(error: RetryError<RequestError>) -> Self {
        match error {
            RetryError::NonRetriable(error) => Self::NonRetriable(error),
            RetryError::MaxRetriesExceeded { attempts, source } => {
                Self::MaxRetriesExceeded { attempts, source }
            }
            RetryError::Cancelled => Self::Cancelled,
        }
    }
}

/// Transport client delivering metric batches to the server.
#[derive(Debug)]
pub struct Sender {
    client: reqwest::Client,
    url: String,
    signer: Option<Signer>,
    retry: RetrySchedule,
}

impl Sender {
    /// Creates a sender for the server address, key and retry schedule in `config`.
    pub fn new(config: &Config) -> Result<Self, SenderError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));

        let client = reqwest::Client::builder()
            .connect_timeout(config.http_connection_timeout())
            .timeout(config.http_timeout())
            .gzip(true)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            url: format!("http://{}{BATCH_PATH}", config.agent_address()),
            signer: config.signing_key().and_then(Signer::new),
            retry: RetrySchedule::new(config.retry_delays()),
        })
    }

    /// Returns the URL batches are posted to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends a batch, retrying transient failures.
    ///
    /// The body is a gzip compressed JSON array. With a key configured, the signature of the
    /// uncompressed JSON is sent along. The wait between attempts ends early with
    /// [`SendError::Cancelled`] if `cancel` fires.
    pub async fn send_batch(
        &self,
        cancel: &CancellationToken,
        batch: &[Metric],
    ) -> Result<(), SendError> {
        if batch.is_empty() {
            return Err(SendError::EmptyBatch);
        }

        let wire: Vec<WireMetric> = batch.iter().map(WireMetric::from).collect();
        let json = serde_json::to_vec(&wire)?;
        let signature = self.signer.as_ref().map(|signer| signer.sign(&json));
        let body = Bytes::from(gzip::compress(&json)?);

        retry::retry(&self.retry, cancel, |attempt| {
            let mut request = self
                .client
                .post(&self.url)
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::CONTENT_ENCODING, "gzip")
                .body(body.clone());

            if let Some(ref signature) = signature {
                request = request.header(SIGNATURE_HEADER, signature.as_str());
            }

            async move {
                tally_log::trace!(attempt, "sending metrics batch");
                let response = request.send().await?;
                let status = response.status();

                if status.is_success() {
                    Ok(())
                } else {
                    Err(RequestError::Status(status))
                }
            }
        })
        .await?;

        tally_log::debug!(count = batch.len(), "sent metrics batch");
        Ok(())
    }
}

//! Bounded retries with a fixed delay schedule.
//!
//! Operations are retried only if their error is classified as transient through the
//! [`Retryable`] trait. Between attempts, [`retry`] sleeps the delay of the [`RetrySchedule`]
//! while watching a [`CancellationToken`], so that a shutdown interrupts the wait immediately.

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;

use http::StatusCode;
use tokio_util::sync::CancellationToken;

/// The default delays before the first, second and third retry.
pub const DEFAULT_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

/// SQLSTATE codes of database errors that are worth another attempt.
///
/// Connection exceptions (class `08`) except protocol violations, and serialization failures.
pub const RETRYABLE_SQLSTATES: &[&str] = &[
    "08000", // connection_exception
    "08003", // connection_does_not_exist
    "08006", // connection_failure
    "08001", // sqlclient_unable_to_establish_sqlconnection
    "08004", // sqlserver_rejected_establishment_of_sqlconnection
    "08007", // transaction_resolution_unknown
    "40001", // serialization_failure
];

/// Classifies errors into transient and permanent failures.
pub trait Retryable {
    /// Returns `true` if the failed operation may succeed when attempted again.
    fn is_retryable(&self) -> bool;
}

/// Returns `true` for HTTP status codes that signal a temporary condition on the server.
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Returns `true` if the SQLSTATE `code` is one of [`RETRYABLE_SQLSTATES`].
pub fn is_retryable_sqlstate(code: &str) -> bool {
    RETRYABLE_SQLSTATES.contains(&code)
}

/// Iterates over an error and all of its sources.
fn chain<'a>(error: &'a (dyn Error + 'static)) -> impl Iterator<Item = &'a (dyn Error + 'static)> {
    std::iter::successors(Some(error), |e| (*e).source())
}

/// Returns `true` if an I/O timeout is anywhere in the source chain of `error`.
pub fn is_io_timeout(error: &(dyn Error + 'static)) -> bool {
    chain(error).any(|e| {
        e.downcast_ref::<io::Error>()
            .is_some_and(|e| e.kind() == io::ErrorKind::TimedOut)
    })
}

/// Returns `true` if name resolution failed temporarily somewhere in the source chain of `error`.
///
/// This corresponds to `EAI_AGAIN` from the system resolver.
pub fn is_temporary_dns_failure(error: &(dyn Error + 'static)) -> bool {
    chain(error).any(|e| {
        let message = e.to_string().to_ascii_lowercase();
        message.contains("temporary failure in name resolution")
            || message.contains("name resolution temporarily")
    })
}

/// The delays between attempts of a retried operation.
///
/// The number of delays is the number of retries, so an operation runs at most `len + 1` times.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
}

impl RetrySchedule {
    /// Creates a schedule from explicit delays.
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Creates a schedule that never retries.
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    /// The number of retries after the first attempt.
    pub fn max_retries(&self) -> usize {
        self.delays.len()
    }

    /// Returns the delay to wait after the failed `attempt`, counting from zero.
    ///
    /// `None` once the schedule is exhausted.
    pub fn delay(&self, attempt: usize) -> Option<Duration> {
        self.delays.get(attempt).copied()
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAYS.to_vec())
    }
}

/// The failure of a retried operation.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The operation failed with an error that is not worth retrying.
    #[error("non-retriable error")]
    NonRetriable(#[source] E),
    /// All attempts failed with transient errors.
    #[error("giving up after {attempts} attempts")]
    MaxRetriesExceeded {
        /// The number of attempts made.
        attempts: usize,
        /// The error of the last attempt.
        #[source]
        source: E,
    },
    /// The cancellation token fired while waiting for the next attempt.
    #[error("operation cancelled")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// Returns the error of the last attempt, if any.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::NonRetriable(error) => Some(error),
            Self::MaxRetriesExceeded { source, .. } => Some(source),
            Self::Cancelled => None,
        }
    }

    /// Maps the error of the last attempt.
    pub fn map<F, T>(self, f: F) -> RetryError<T>
    where
        F: FnOnce(E) -> T,
    {
        match self {
            Self::NonRetriable(error) => RetryError::NonRetriable(f(error)),
            Self::MaxRetriesExceeded { attempts, source } => RetryError::MaxRetriesExceeded {
                attempts,
                source: f(source),
            },
            Self::Cancelled => RetryError::Cancelled,
        }
    }
}

/// Runs `operation` until it succeeds, fails permanently, or the schedule is exhausted.
///
/// The closure receives the zero-based attempt number. Permanent failures are returned
/// immediately without waiting. The wait between attempts ends early with
/// [`RetryError::Cancelled`] if `cancel` fires.
pub async fn retry<T, E, F, Fut>(
    schedule: &RetrySchedule,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let mut attempt = 0;

    loop {
        let error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !error.is_retryable() {
            return Err(RetryError::NonRetriable(error));
        }

        let Some(delay) = schedule.delay(attempt) else {
            return Err(RetryError::MaxRetriesExceeded {
                attempts: attempt + 1,
                source: error,
            });
        };

        tally_log::warn!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "attempt failed with transient error, retrying: {error}"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::Instant;

    use super::*;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    /// Fails with a transient error until `failures` attempts were made.
    async fn flaky(
        calls: Arc<AtomicUsize>,
        failures: usize,
        error: TestError,
    ) -> Result<usize, TestError> {
        let attempt = calls.fetch_add(1, Ordering::SeqCst);
        if attempt < failures { Err(error) } else { Ok(attempt) }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_fourth_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();

        let result = retry(
            &RetrySchedule::default(),
            &CancellationToken::new(),
            |_| flaky(calls.clone(), 3, TestError::Transient),
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 1s + 3s + 5s of backoff, nothing else.
        assert_eq!(start.elapsed(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_schedule() {
        let calls = Arc::new(AtomicUsize::new(0));

        let result = retry(
            &RetrySchedule::default(),
            &CancellationToken::new(),
            |_| flaky(calls.clone(), usize::MAX, TestError::Transient),
        )
        .await;

        match result {
            Err(RetryError::MaxRetriesExceeded { attempts, source }) => {
                assert_eq!(attempts, 4);
                assert_eq!(source, TestError::Transient);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();

        let result = retry(
            &RetrySchedule::default(),
            &CancellationToken::new(),
            |_| flaky(calls.clone(), usize::MAX, TestError::Permanent),
        )
        .await;

        assert!(matches!(
            result,
            Err(RetryError::NonRetriable(TestError::Permanent))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let result = retry(&RetrySchedule::default(), &cancel, |_| {
            flaky(calls.clone(), usize::MAX, TestError::Transient)
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_empty_schedule_tries_once() {
        let calls = Arc::new(AtomicUsize::new(0));

        let result = retry(&RetrySchedule::none(), &CancellationToken::new(), |_| {
            flaky(calls.clone(), usize::MAX, TestError::Transient)
        })
        .await;

        assert!(matches!(
            result,
            Err(RetryError::MaxRetriesExceeded { attempts: 1, .. })
        ));
    }

    #[test]
    fn test_retryable_status() {
        assert!(is_retryable_status(StatusCode::REQUEST_TIMEOUT));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable_status(StatusCode::GATEWAY_TIMEOUT));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_retryable_status(StatusCode::BAD_GATEWAY));
    }

    #[test]
    fn test_retryable_sqlstate() {
        for code in ["08000", "08003", "08006", "08001", "08004", "08007", "40001"] {
            assert!(is_retryable_sqlstate(code), "{code}");
        }
        assert!(!is_retryable_sqlstate("23505"));
        assert!(!is_retryable_sqlstate("08P01"));
        assert!(!is_retryable_sqlstate("40P01"));
    }

    #[derive(Debug)]
    struct Wrapped(io::Error);

    impl fmt::Display for Wrapped {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("request failed")
        }
    }

    impl Error for Wrapped {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_error_chain_classification() {
        let timeout = Wrapped(io::Error::from(io::ErrorKind::TimedOut));
        assert!(is_io_timeout(&timeout));
        assert!(!is_temporary_dns_failure(&timeout));

        let dns = Wrapped(io::Error::other(
            "failed to lookup address information: Temporary failure in name resolution",
        ));
        assert!(is_temporary_dns_failure(&dns));
        assert!(!is_io_timeout(&dns));

        let refused = Wrapped(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(!is_io_timeout(&refused));
        assert!(!is_temporary_dns_failure(&refused));
    }
}

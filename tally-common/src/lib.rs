//! Common functionality shared by the Tally server and agent.
#![warn(missing_docs)]

pub mod constants;
pub mod gzip;
pub mod retry;
pub mod signature;

pub use tokio_util::sync::CancellationToken;

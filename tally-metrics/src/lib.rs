//! Metrics protocol and processing.
//!
//! Tally knows two kinds of metrics, distinguished by their [`MetricType`]:
//!
//!  - **Gauges** store absolute snapshots of values. The last write wins.
//!  - **Counters** accumulate integer deltas. Every write adds to the stored total.
//!
//! # Wire Format
//!
//! Metrics are transmitted as JSON objects. Gauges carry a floating point `value`, counters an
//! integer `delta`. Only the field matching the type is present:
//!
//! ```json
//! [
//!   {"id": "Alloc", "type": "gauge", "value": 1048576.0},
//!   {"id": "PollCount", "type": "counter", "delta": 5}
//! ]
//! ```
//!
//! Alternatively, a single metric can be submitted in positional text form as the path segments
//! `/{type}/{name}/{value}`, see [`decode_text`].
//!
//! All decoded metrics arrive as a [`WireMetric`] and must pass [`WireMetric::validate`] before they reach
//! storage. The validated [`Metric`] cannot represent a gauge without a value or a counter without
//! a delta.
#![warn(missing_docs)]

mod buffer;
mod ingest;
mod protocol;

pub use self::buffer::*;
pub use self::ingest::*;
pub use self::protocol::*;

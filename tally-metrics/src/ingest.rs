//! Decoding and validation of submitted metrics.
//!
//! Untrusted input is decoded into [`WireMetric`]s first and converted into [`Metric`]s through
//! [`WireMetric::validate`]. Nothing reaches storage without passing validation.

use crate::protocol::{CounterType, GaugeType, Metric, MetricType, ParseMetricTypeError, WireMetric};

/// An error returned when a submission cannot be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The body is not valid JSON or has fields of the wrong type.
    #[error("invalid metric json")]
    Json(#[from] serde_json::Error),

    /// The metric type is not known.
    #[error("invalid metric type")]
    InvalidType(#[from] ParseMetricTypeError),

    /// The positional value does not parse into the metric type's number format.
    #[error("invalid {ty} value {value:?}")]
    InvalidValue {
        /// The type the value was parsed for.
        ty: MetricType,
        /// The raw value.
        value: String,
    },

    /// The decoded metric is incomplete.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// An error returned by [`WireMetric::validate`] and [`validate_batch`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The `type` field is neither `"gauge"` nor `"counter"`.
    #[error("unknown metric type {0:?}")]
    InvalidType(String),

    /// The `id` field is missing or empty.
    #[error("missing metric id")]
    MissingId,

    /// A gauge without a `value`.
    #[error("missing value for gauge {0:?}")]
    MissingValue(String),

    /// A counter without a `delta`.
    #[error("missing delta for counter {0:?}")]
    MissingDelta(String),

    /// A batch without any entries.
    #[error("empty metrics batch")]
    EmptyBatch,
}

impl WireMetric {
    /// Converts this wire metric into a validated [`Metric`].
    pub fn validate(self) -> Result<Metric, ValidationError> {
        let ty = parse_type(&self.ty)?;

        if self.id.is_empty() {
            return Err(ValidationError::MissingId);
        }

        match ty {
            MetricType::Gauge => match self.value {
                Some(value) => Ok(Metric::gauge(self.id, value)),
                None => Err(ValidationError::MissingValue(self.id)),
            },
            MetricType::Counter => match self.delta {
                Some(delta) => Ok(Metric::counter(self.id, delta)),
                None => Err(ValidationError::MissingDelta(self.id)),
            },
        }
    }
}

fn parse_type(ty: &str) -> Result<MetricType, ValidationError> {
    ty.parse()
        .map_err(|_| ValidationError::InvalidType(ty.to_owned()))
}

/// Validates every entry of a batch.
///
/// Either all entries are valid and returned in their original order, or the first error is
/// returned and no metric is produced. Empty batches are rejected.
pub fn validate_batch(batch: Vec<WireMetric>) -> Result<Vec<Metric>, ValidationError> {
    if batch.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }

    batch.into_iter().map(WireMetric::validate).collect()
}

/// Decodes a metric from its positional text form `/{type}/{name}/{value}`.
///
/// Gauge values must parse as finite floating point numbers, counter values as signed integers.
///
/// # Example
///
/// ```
/// use tally_metrics::{Metric, decode_text};
///
/// let metric = decode_text("counter", "PollCount", "5").unwrap();
/// assert_eq!(metric, Metric::counter("PollCount", 5));
/// ```
pub fn decode_text(ty: &str, name: &str, value: &str) -> Result<Metric, DecodeError> {
    let ty = ty.parse::<MetricType>()?;

    if name.is_empty() {
        return Err(ValidationError::MissingId.into());
    }

    let invalid = || DecodeError::InvalidValue {
        ty,
        value: value.to_owned(),
    };

    Ok(match ty {
        MetricType::Gauge => {
            let value = value.parse::<GaugeType>().map_err(|_| invalid())?;
            if !value.is_finite() {
                return Err(invalid());
            }
            Metric::gauge(name, value)
        }
        MetricType::Counter => {
            let delta = value.parse::<CounterType>().map_err(|_| invalid())?;
            Metric::counter(name, delta)
        }
    })
}

/// Decodes a single JSON metric object.
pub fn decode_json(bytes: &[u8]) -> Result<WireMetric, DecodeError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Decodes a JSON array of metric objects.
///
/// A single object is accepted as well and yields a batch of one.
pub fn decode_json_batch(bytes: &[u8]) -> Result<Vec<WireMetric>, DecodeError> {
    let is_object = bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'{');

    if is_object {
        return Ok(vec![decode_json(bytes)?]);
    }

    Ok(serde_json::from_slice(bytes)?)
}

/// Extracts the lookup key of a value query.
///
/// Only `id` and `type` are considered, any value or delta is ignored.
pub fn decode_query(query: WireMetric) -> Result<(MetricType, String), ValidationError> {
    let ty = parse_type(&query.ty)?;

    if query.id.is_empty() {
        return Err(ValidationError::MissingId);
    }

    Ok((ty, query.id))
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Type used for Gauge values.
pub type GaugeType = f64;

/// Type used for Counter deltas and totals.
pub type CounterType = i64;

/// The type of a [`MetricValue`], determining how writes are combined.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Stores absolute snapshots of values.
    ///
    /// Every write replaces the previously stored value.
    Gauge,
    /// Accumulates integer deltas.
    ///
    /// Every write adds its delta to the stored total. The initial total is `0`.
    Counter,
}

impl MetricType {
    /// Returns the wire name of this metric type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Gauge => "gauge",
            MetricType::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned when parsing an unknown [`MetricType`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown metric type {0:?}")]
pub struct ParseMetricTypeError(String);

impl FromStr for MetricType {
    type Err = ParseMetricTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "gauge" => Self::Gauge,
            "counter" => Self::Counter,
            _ => return Err(ParseMetricTypeError(s.to_owned())),
        })
    }
}

/// The typed value of a [`Metric`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricValue {
    /// The current value of a gauge. See [`MetricType::Gauge`].
    Gauge(GaugeType),
    /// A delta or total of a counter. See [`MetricType::Counter`].
    Counter(CounterType),
}

impl MetricValue {
    /// Returns the type of this value.
    pub fn ty(&self) -> MetricType {
        match self {
            Self::Gauge(_) => MetricType::Gauge,
            Self::Counter(_) => MetricType::Counter,
        }
    }

    /// Combines `other` into this value.
    ///
    /// Gauges are overwritten, counters are added with saturating arithmetic. If the types do not
    /// match, `other` replaces this value entirely.
    pub fn merge(&mut self, other: MetricValue) {
        match (self, other) {
            (Self::Counter(total), Self::Counter(delta)) => *total = total.saturating_add(delta),
            (this, other) => *this = other,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(value) => f.write_str(&format_gauge(*value)),
            MetricValue::Counter(value) => value.fmt(f),
        }
    }
}

/// Formats a gauge value for human consumption.
///
/// The value is rounded to three decimal places, and trailing zeros as well as a trailing decimal
/// point are removed. `1.5` formats as `"1.5"`, `2.0` as `"2"` and `0.12345` as `"0.123"`.
pub fn format_gauge(value: GaugeType) -> String {
    let formatted = format!("{value:.3}");
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_owned()
}

/// A single validated metric.
///
/// A `Metric` always carries the field matching its type. Use [`WireMetric::validate`] to obtain
/// one from untrusted input.
#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    /// The name of the metric, unique within its type.
    pub id: String,
    /// The typed value.
    pub value: MetricValue,
}

impl Metric {
    /// Creates a gauge metric.
    pub fn gauge(id: impl Into<String>, value: GaugeType) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Gauge(value),
        }
    }

    /// Creates a counter metric.
    pub fn counter(id: impl Into<String>, delta: CounterType) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Counter(delta),
        }
    }

    /// Returns the type of this metric.
    pub fn ty(&self) -> MetricType {
        self.value.ty()
    }
}

/// The JSON transport form of a metric.
///
/// This is the shape of request and response bodies. It is not validated, see
/// [`WireMetric::validate`].
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct WireMetric {
    /// The name of the metric.
    #[serde(default)]
    pub id: String,

    /// The metric type as string, either `"gauge"` or `"counter"`.
    #[serde(rename = "type", default)]
    pub ty: String,

    /// The gauge value. Only present for gauges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<GaugeType>,

    /// The counter delta. Only present for counters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<CounterType>,
}

impl From<&Metric> for WireMetric {
    fn from(metric: &Metric) -> Self {
        let (value, delta) = match metric.value {
            MetricValue::Gauge(value) => (Some(value), None),
            MetricValue::Counter(delta) => (None, Some(delta)),
        };

        Self {
            id: metric.id.clone(),
            ty: metric.ty().as_str().to_owned(),
            value,
            delta,
        }
    }
}

impl From<Metric> for WireMetric {
    fn from(metric: Metric) -> Self {
        Self::from(&metric)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_parse_type() {
        assert_eq!("gauge".parse::<MetricType>(), Ok(MetricType::Gauge));
        assert_eq!("counter".parse::<MetricType>(), Ok(MetricType::Counter));
        assert!("histogram".parse::<MetricType>().is_err());
        assert!("Gauge".parse::<MetricType>().is_err());
    }

    #[test]
    fn test_merge_counter_saturates() {
        let mut value = MetricValue::Counter(i64::MAX - 1);
        value.merge(MetricValue::Counter(5));
        assert_eq!(value, MetricValue::Counter(i64::MAX));
    }

    #[test]
    fn test_merge_gauge_overwrites() {
        let mut value = MetricValue::Gauge(1.0);
        value.merge(MetricValue::Gauge(-3.5));
        assert_eq!(value, MetricValue::Gauge(-3.5));
    }

    #[test]
    fn test_format_gauge() {
        assert_eq!(format_gauge(1.5), "1.5");
        assert_eq!(format_gauge(2.0), "2");
        assert_eq!(format_gauge(0.12345), "0.123");
        assert_eq!(format_gauge(100.0), "100");
        assert_eq!(format_gauge(0.0), "0");
    }

    #[test]
    fn test_wire_omits_foreign_field() {
        let gauge = serde_json::to_string(&WireMetric::from(Metric::gauge("Alloc", 2.5))).unwrap();
        assert_eq!(gauge, r#"{"id":"Alloc","type":"gauge","value":2.5}"#);

        let counter = serde_json::to_string(&WireMetric::from(Metric::counter("PollCount", 3))).unwrap();
        assert_eq!(counter, r#"{"id":"PollCount","type":"counter","delta":3}"#);
    }
}

//! Data structures for acquired heart rate values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The value carried by a sample: a reading, or an explicit "no reading".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleValue {
    /// Beats per minute
    Bpm(u32),
    /// The source could not produce a reading for this event or tick
    Unavailable,
}

impl SampleValue {
    /// Returns the reading, if any.
    pub fn bpm(&self) -> Option<u32> {
        match self {
            Self::Bpm(value) => Some(*value),
            Self::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Bpm(_))
    }
}

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bpm(value) => write!(f, "{}", value),
            Self::Unavailable => write!(f, "N/A"),
        }
    }
}

/// A single observation of the metric. The newest sample supersedes all earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// The observed value
    pub value: SampleValue,
    /// When the value was observed locally
    pub observed_at: DateTime<Utc>,
}

impl MetricSample {
    /// Create a sample holding a reading, stamped now.
    pub fn bpm(value: u32) -> Self {
        Self {
            value: SampleValue::Bpm(value),
            observed_at: Utc::now(),
        }
    }

    /// Create an "unavailable" sample, stamped now.
    pub fn unavailable() -> Self {
        Self {
            value: SampleValue::Unavailable,
            observed_at: Utc::now(),
        }
    }

    /// Text shown on the overlay label for this sample.
    pub fn label(&self) -> String {
        format!("{} bpm", self.value)
    }

    /// Interpret text scraped from the dashboard element.
    pub fn from_element_text(text: &str) -> Self {
        match text.trim().parse::<u32>() {
            Ok(value) => Self::bpm(value),
            Err(_) => Self::unavailable(),
        }
    }
}

/// Lifecycle of a live value client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Discovering,
    Connecting,
    Connected,
    /// The last fetch or parse failed, but the channel is presumed alive
    Degraded,
    Closed,
}

/// A streaming endpoint found by observing the dashboard's own traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredEndpoint {
    pub url: String,
    pub discovered_at: DateTime<Utc>,
}

impl DiscoveredEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            discovered_at: Utc::now(),
        }
    }
}

/// An event emitted by a live value client, in generation order.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Sample(MetricSample),
    State(ConnectionState),
}

/// Wire shape of a streaming message: `{"timestamp": 1, "data": {"heartRate": 73}}`.
///
/// Only `data.heartRate` is used; unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct HeartRateMessage {
    data: HeartRateData,
}

#[derive(Debug, Deserialize)]
struct HeartRateData {
    #[serde(rename = "heartRate")]
    heart_rate: u32,
}

/// Parse a streaming message into a sample.
///
/// Never fails: a malformed frame yields an unavailable sample so the stream keeps going.
pub fn parse_message(text: &str) -> MetricSample {
    match serde_json::from_str::<HeartRateMessage>(text) {
        Ok(message) => MetricSample::bpm(message.data.heart_rate),
        Err(e) => {
            tracing::debug!("Malformed streaming message ({}): {}", e, text);
            MetricSample::unavailable()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_heart_rate_message() {
        let sample = parse_message(r#"{"timestamp":1,"data":{"heartRate":73}}"#);
        assert_eq!(sample.value, SampleValue::Bpm(73));
        assert_eq!(sample.label(), "73 bpm");
    }

    #[test]
    fn test_parse_missing_heart_rate() {
        let sample = parse_message(r#"{"timestamp":2,"data":{}}"#);
        assert_eq!(sample.value, SampleValue::Unavailable);
        assert_eq!(sample.label(), "N/A bpm");
    }

    #[test]
    fn test_parse_ignores_unknown_fields() {
        let sample = parse_message(
            r#"{"timestamp":1742694828170,"data":{"heartRate":88,"zone":"cardio"},"device":"band"}"#,
        );
        assert_eq!(sample.value.bpm(), Some(88));
    }

    #[test]
    fn test_parse_garbage() {
        for text in ["", "not json", "[]", r#"{"data":{"heartRate":"fast"}}"#, r#"{"data":{"heartRate":-5}}"#] {
            assert!(!parse_message(text).value.is_available(), "{}", text);
        }
    }

    #[test]
    fn test_element_text() {
        assert_eq!(MetricSample::from_element_text(" 91 \n").value, SampleValue::Bpm(91));
        assert_eq!(MetricSample::from_element_text("--").value, SampleValue::Unavailable);
    }
}

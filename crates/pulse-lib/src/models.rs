//! Core data models for the network quality pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when a reading cannot become a [`MetricSample`]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SampleError {
    #[error("{field} is not finite: {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("{field} is negative: {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("loss percent out of range: {0}")]
    LossOutOfRange(f64),
}

/// A single network quality reading
///
/// Values are validated on construction and never change afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Round-trip time in milliseconds
    pub rtt_ms: f64,
    /// Interarrival jitter in milliseconds
    pub jitter_ms: f64,
    /// Packet loss in percent (0-100)
    pub loss_percent: f64,
    /// Wall-clock time the reading was taken
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    /// Create a sample stamped with the current time
    pub fn new(rtt_ms: f64, jitter_ms: f64, loss_percent: f64) -> Result<Self, SampleError> {
        Self::at(rtt_ms, jitter_ms, loss_percent, Utc::now())
    }

    /// Create a sample with an explicit timestamp
    pub fn at(
        rtt_ms: f64,
        jitter_ms: f64,
        loss_percent: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, SampleError> {
        check_field("rtt_ms", rtt_ms)?;
        check_field("jitter_ms", jitter_ms)?;
        check_field("loss_percent", loss_percent)?;
        if loss_percent > 100.0 {
            return Err(SampleError::LossOutOfRange(loss_percent));
        }

        Ok(Self {
            rtt_ms,
            jitter_ms,
            loss_percent,
            timestamp,
        })
    }

    /// Re-check the numeric invariants (deserialized samples bypass the constructor)
    pub fn validate(&self) -> Result<(), SampleError> {
        Self::at(self.rtt_ms, self.jitter_ms, self.loss_percent, self.timestamp).map(|_| ())
    }

    /// Same values, new timestamp
    pub fn restamped(&self, timestamp: DateTime<Utc>) -> Self {
        Self { timestamp, ..*self }
    }

    /// Chart label for this sample (local wall-clock time)
    pub fn label(&self) -> String {
        self.timestamp
            .with_timezone(&chrono::Local)
            .format("%H:%M:%S")
            .to_string()
    }
}

fn check_field(field: &'static str, value: f64) -> Result<(), SampleError> {
    if !value.is_finite() {
        return Err(SampleError::NonFinite { field, value });
    }
    if value < 0.0 {
        return Err(SampleError::Negative { field, value });
    }
    Ok(())
}

/// Health classification of a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthTier {
    Good,
    Warning,
    Critical,
}

impl HealthTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthTier::Good => "good",
            HealthTier::Warning => "warning",
            HealthTier::Critical => "critical",
        }
    }

    /// Numeric level used for gauges (0 = good, 2 = critical)
    pub fn level(&self) -> i64 {
        match self {
            HealthTier::Good => 0,
            HealthTier::Warning => 1,
            HealthTier::Critical => 2,
        }
    }
}

impl std::fmt::Display for HealthTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite readiness score in the range 0-100
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadinessScore(u8);

impl ReadinessScore {
    pub const MAX: ReadinessScore = ReadinessScore(100);

    /// Build a score, saturating at 100
    pub fn new(value: u8) -> Self {
        Self(value.min(100))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for ReadinessScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the sample for a tick came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleSource {
    /// Live transport statistics (enriched)
    Live,
    /// Simulated random walk
    Simulated,
    /// Previous sample reused because the poll overran the tick
    Reused,
}

/// A classified sample as published to presentation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub sample: MetricSample,
    pub tier: HealthTier,
    pub score: ReadinessScore,
    pub source: SampleSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_accepts_valid_values() {
        let sample = MetricSample::new(42.0, 3.5, 0.1).unwrap();
        assert_eq!(sample.rtt_ms, 42.0);
        assert_eq!(sample.jitter_ms, 3.5);
        assert_eq!(sample.loss_percent, 0.1);
    }

    #[test]
    fn test_sample_rejects_non_finite() {
        let err = MetricSample::new(f64::NAN, 1.0, 0.0).unwrap_err();
        assert!(matches!(err, SampleError::NonFinite { field: "rtt_ms", .. }));

        let err = MetricSample::new(1.0, f64::INFINITY, 0.0).unwrap_err();
        assert!(matches!(err, SampleError::NonFinite { field: "jitter_ms", .. }));
    }

    #[test]
    fn test_sample_rejects_negative_and_excess_loss() {
        assert!(matches!(
            MetricSample::new(1.0, 1.0, -0.5),
            Err(SampleError::Negative { field: "loss_percent", .. })
        ));
        assert_eq!(
            MetricSample::new(1.0, 1.0, 100.5),
            Err(SampleError::LossOutOfRange(100.5))
        );
    }

    #[test]
    fn test_validate_catches_deserialized_garbage() {
        let json = r#"{"rtt_ms":-3.0,"jitter_ms":1.0,"loss_percent":0.0,"timestamp":"2024-01-01T00:00:00Z"}"#;
        let sample: MetricSample = serde_json::from_str(json).unwrap();
        assert!(sample.validate().is_err());
    }

    #[test]
    fn test_readiness_score_saturates() {
        assert_eq!(ReadinessScore::new(250).value(), 100);
        assert_eq!(ReadinessScore::new(37).value(), 37);
    }

    #[test]
    fn test_tier_serializes_lowercase() {
        let json = serde_json::to_string(&HealthTier::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
        assert!(HealthTier::Critical > HealthTier::Warning);
    }
}

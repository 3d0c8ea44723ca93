//! Health tier classification and readiness scoring
//!
//! Both functions are pure: the same sample always yields the same tier and score.

use crate::models::{HealthTier, MetricSample, ReadinessScore};

/// RTT above this is critical (ms)
pub const RTT_CRITICAL_MS: f64 = 200.0;
/// RTT above this is a warning (ms)
pub const RTT_WARNING_MS: f64 = 100.0;
/// Jitter above this is critical (ms)
pub const JITTER_CRITICAL_MS: f64 = 50.0;
/// Jitter above this is a warning (ms)
pub const JITTER_WARNING_MS: f64 = 20.0;
/// Loss above this is critical (%)
pub const LOSS_CRITICAL_PERCENT: f64 = 2.0;
/// Loss above this is a warning (%)
pub const LOSS_WARNING_PERCENT: f64 = 0.2;

const RTT_PENALTY_BASE_MS: f64 = 50.0;
const RTT_PENALTY_DIVISOR: f64 = 2.0;
const RTT_PENALTY_MAX: f64 = 30.0;

const JITTER_PENALTY_BASE_MS: f64 = 10.0;
const JITTER_PENALTY_DIVISOR: f64 = 1.5;
const JITTER_PENALTY_MAX: f64 = 20.0;

const LOSS_PENALTY_FACTOR: f64 = 25.0;
const LOSS_PENALTY_MAX: f64 = 50.0;

/// Classify a sample into a health tier
///
/// Critical thresholds are checked first, so a single critical metric is never
/// masked by the others.
pub fn classify_health(sample: &MetricSample) -> HealthTier {
    if sample.rtt_ms > RTT_CRITICAL_MS
        || sample.jitter_ms > JITTER_CRITICAL_MS
        || sample.loss_percent > LOSS_CRITICAL_PERCENT
    {
        HealthTier::Critical
    } else if sample.rtt_ms > RTT_WARNING_MS
        || sample.jitter_ms > JITTER_WARNING_MS
        || sample.loss_percent > LOSS_WARNING_PERCENT
    {
        HealthTier::Warning
    } else {
        HealthTier::Good
    }
}

/// Compute the 0-100 readiness score for a sample
///
/// Each metric contributes an independently clamped penalty. Loss carries the
/// largest weight (up to 50 points).
pub fn compute_readiness_score(sample: &MetricSample) -> ReadinessScore {
    let penalty = rtt_penalty(sample.rtt_ms)
        + jitter_penalty(sample.jitter_ms)
        + loss_penalty(sample.loss_percent);

    let score = (100.0 - penalty).clamp(0.0, 100.0).round();
    ReadinessScore::new(score as u8)
}

fn rtt_penalty(rtt_ms: f64) -> f64 {
    ((rtt_ms - RTT_PENALTY_BASE_MS) / RTT_PENALTY_DIVISOR).clamp(0.0, RTT_PENALTY_MAX)
}

fn jitter_penalty(jitter_ms: f64) -> f64 {
    ((jitter_ms - JITTER_PENALTY_BASE_MS) / JITTER_PENALTY_DIVISOR).clamp(0.0, JITTER_PENALTY_MAX)
}

fn loss_penalty(loss_percent: f64) -> f64 {
    (loss_percent * LOSS_PENALTY_FACTOR).clamp(0.0, LOSS_PENALTY_MAX)
}

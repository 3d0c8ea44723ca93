//! Observability for the network monitor
//!
//! Provides:
//! - Prometheus gauges for the latest reading, plus tick and fallback counters
//! - Structured JSON logging of session lifecycle events with tracing

use crate::models::{HealthTier, Reading};
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_gauge, Gauge,
    Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for probe poll latency (in seconds)
const POLL_LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// Global metrics instance, `None` if registration failed
static GLOBAL_METRICS: OnceLock<Option<PulseMetricsInner>> = OnceLock::new();

struct PulseMetricsInner {
    rtt_ms: Gauge,
    jitter_ms: Gauge,
    loss_percent: Gauge,
    readiness_score: IntGauge,
    health_tier: IntGauge,
    simulated_mode: IntGauge,
    stress_active: IntGauge,
    ticks: IntCounter,
    fallbacks: IntCounter,
    poll_latency_seconds: Histogram,
}

impl PulseMetricsInner {
    fn register() -> prometheus::Result<Self> {
        Ok(Self {
            rtt_ms: register_gauge!("netpulse_rtt_ms", "Round-trip time of the latest reading")?,
            jitter_ms: register_gauge!("netpulse_jitter_ms", "Jitter of the latest reading")?,
            loss_percent: register_gauge!(
                "netpulse_loss_percent",
                "Packet loss of the latest reading"
            )?,
            readiness_score: register_int_gauge!(
                "netpulse_readiness_score",
                "Readiness score of the latest reading (0-100)"
            )?,
            health_tier: register_int_gauge!(
                "netpulse_health_tier",
                "Health tier of the latest reading (0=good, 1=warning, 2=critical)"
            )?,
            simulated_mode: register_int_gauge!(
                "netpulse_simulated_mode",
                "1 when the session runs on simulated samples"
            )?,
            stress_active: register_int_gauge!(
                "netpulse_stress_active",
                "1 while a stress test is running"
            )?,
            ticks: register_int_counter!(
                "netpulse_ticks_total",
                "Total number of readings recorded"
            )?,
            fallbacks: register_int_counter!(
                "netpulse_fallbacks_total",
                "Live ticks that fell back to a simulated or reused sample"
            )?,
            poll_latency_seconds: register_histogram!(
                "netpulse_poll_latency_seconds",
                "Time spent taking one reading",
                POLL_LATENCY_BUCKETS.to_vec()
            )?,
        })
    }
}

/// Metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct PulseMetrics {
    _private: (),
}

impl Default for PulseMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseMetrics {
    /// Create a new metrics handle (registers global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(|| match PulseMetricsInner::register() {
            Ok(inner) => Some(inner),
            Err(e) => {
                warn!(error = %e, "Failed to register metrics, metrics disabled");
                None
            }
        });
        Self { _private: () }
    }

    fn inner(&self) -> Option<&PulseMetricsInner> {
        GLOBAL_METRICS.get().and_then(Option::as_ref)
    }

    /// Publish the latest reading and count the tick
    pub fn record_reading(&self, reading: &Reading) {
        let Some(inner) = self.inner() else { return };
        inner.rtt_ms.set(reading.sample.rtt_ms);
        inner.jitter_ms.set(reading.sample.jitter_ms);
        inner.loss_percent.set(reading.sample.loss_percent);
        inner.readiness_score.set(i64::from(reading.score.value()));
        inner.health_tier.set(reading.tier.level());
        inner.ticks.inc();
    }

    /// Record how long one reading took
    pub fn observe_poll_latency(&self, duration_secs: f64) {
        if let Some(inner) = self.inner() {
            inner.poll_latency_seconds.observe(duration_secs);
        }
    }

    pub fn set_simulated_mode(&self, simulated: bool) {
        if let Some(inner) = self.inner() {
            inner.simulated_mode.set(i64::from(simulated));
        }
    }

    pub fn set_stress_active(&self, active: bool) {
        if let Some(inner) = self.inner() {
            inner.stress_active.set(i64::from(active));
        }
    }

    /// Count a live tick that did not yield a live sample
    pub fn inc_fallbacks(&self) {
        if let Some(inner) = self.inner() {
            inner.fallbacks.inc();
        }
    }
}

/// Structured logger for monitor events
///
/// Every event carries an `event` field so log pipelines can filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_session_started(&self, source: &str, simulated: bool) {
        info!(
            event = "session_started",
            node = %self.node_name,
            source = %source,
            simulated = simulated,
            "Monitoring session started"
        );
    }

    pub fn log_session_stopped(&self, ticks: u64) {
        info!(
            event = "session_stopped",
            node = %self.node_name,
            ticks = ticks,
            "Monitoring session stopped"
        );
    }

    /// Log a health tier transition; the first reading has no previous tier
    pub fn log_tier_change(&self, previous: Option<HealthTier>, tier: HealthTier, score: u8) {
        let previous = previous.map(|t| t.as_str()).unwrap_or("none");
        match tier {
            HealthTier::Critical => {
                warn!(
                    event = "tier_changed",
                    node = %self.node_name,
                    previous = %previous,
                    tier = %tier,
                    score = score,
                    "Network health is critical"
                );
            }
            _ => {
                info!(
                    event = "tier_changed",
                    node = %self.node_name,
                    previous = %previous,
                    tier = %tier,
                    score = score,
                    "Network health tier changed"
                );
            }
        }
    }

    pub fn log_stress_started(&self, ticks: u32) {
        info!(
            event = "stress_started",
            node = %self.node_name,
            ticks = ticks,
            "Stress test started"
        );
    }

    pub fn log_stress_completed(&self) {
        info!(
            event = "stress_completed",
            node = %self.node_name,
            "Stress test completed"
        );
    }

    /// Log that the live probe could not be acquired
    pub fn log_probe_fallback(&self, source: &str) {
        warn!(
            event = "probe_fallback",
            node = %self.node_name,
            source = %source,
            "Live probe unavailable, running on simulated samples"
        );
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "daemon_started",
            node = %self.node_name,
            version = %version,
            "Network monitor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "daemon_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Network monitor shutting down"
        );
    }
}

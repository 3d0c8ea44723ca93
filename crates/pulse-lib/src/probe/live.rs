//! Live probe backed by transport statistics
//!
//! RTT comes from the succeeded candidate pair, jitter from the remote-inbound
//! report (falling back to the inbound stream). Loss is the larger of the
//! reported fraction lost and a locally computed ratio over the packets seen
//! since the previous poll of the same stream.

use super::{
    CandidatePairState, Probe, ProbeError, ProbeKind, StatsConnection, StatsReport, StatsSource,
};
use crate::models::MetricSample;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Default bound on connection negotiation
pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Cumulative counters of an inbound stream at the previous poll
#[derive(Debug, Clone, PartialEq, Eq)]
struct StreamBaseline {
    id: String,
    packets_received: u64,
    packets_lost: u64,
}

/// Fields pulled out of one statistics poll
#[derive(Debug, Default)]
struct ExtractedStats {
    rtt_secs: Option<f64>,
    remote_jitter_secs: Option<f64>,
    inbound_jitter_secs: Option<f64>,
    fraction_lost: Option<f64>,
    inbound: Option<StreamBaseline>,
    saw_inbound: bool,
}

impl ExtractedStats {
    fn from_reports(reports: &[StatsReport]) -> Self {
        let mut stats = Self::default();

        for report in reports {
            match report {
                StatsReport::CandidatePair {
                    state: CandidatePairState::Succeeded,
                    current_round_trip_time,
                } => {
                    if stats.rtt_secs.is_none() {
                        stats.rtt_secs = *current_round_trip_time;
                    }
                }
                StatsReport::CandidatePair { .. } => {}
                StatsReport::RemoteInboundRtp {
                    jitter,
                    fraction_lost,
                    ..
                } => {
                    stats.saw_inbound = true;
                    stats.remote_jitter_secs = stats.remote_jitter_secs.or(*jitter);
                    stats.fraction_lost = stats.fraction_lost.or(*fraction_lost);
                }
                StatsReport::InboundRtp {
                    id,
                    jitter,
                    packets_received,
                    packets_lost,
                } => {
                    stats.saw_inbound = true;
                    stats.inbound_jitter_secs = stats.inbound_jitter_secs.or(*jitter);
                    if stats.inbound.is_none() {
                        stats.inbound = Some(StreamBaseline {
                            id: id.clone(),
                            packets_received: *packets_received,
                            packets_lost: *packets_lost,
                        });
                    }
                }
            }
        }

        stats
    }
}

/// Probe that reads statistics from a live transport connection
pub struct LiveProbe {
    source: Arc<dyn StatsSource>,
    connection: Option<Box<dyn StatsConnection>>,
    baseline: Option<StreamBaseline>,
    negotiation_timeout: Duration,
}

impl LiveProbe {
    /// Create a live probe over the given source
    pub fn new(source: Arc<dyn StatsSource>) -> Self {
        Self {
            source,
            connection: None,
            baseline: None,
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
        }
    }

    /// Set the negotiation timeout
    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Loss over the packets seen since the previous poll of the same stream
    ///
    /// A new stream id resets the baseline and yields zero. Counters that went
    /// backwards are treated as no change.
    fn delta_loss_percent(&mut self, current: Option<StreamBaseline>) -> f64 {
        let Some(current) = current else {
            return 0.0;
        };

        let loss = match &self.baseline {
            Some(prev) if prev.id == current.id => {
                let received = current.packets_received.saturating_sub(prev.packets_received);
                let lost = current.packets_lost.saturating_sub(prev.packets_lost);
                let total = received + lost;
                if total == 0 {
                    0.0
                } else {
                    lost as f64 / total as f64 * 100.0
                }
            }
            _ => 0.0,
        };

        self.baseline = Some(current);
        loss
    }
}

#[async_trait]
impl Probe for LiveProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Live
    }

    async fn start(&mut self) -> Result<(), ProbeError> {
        if self.connection.is_some() {
            return Ok(());
        }

        let connection = tokio::time::timeout(self.negotiation_timeout, self.source.connect())
            .await
            .map_err(|_| ProbeError::NegotiationTimeout(self.negotiation_timeout))??;

        info!(source = %self.source.name(), "Live transport connected");
        self.connection = Some(connection);
        self.baseline = None;
        Ok(())
    }

    async fn poll(&mut self) -> Result<Option<MetricSample>, ProbeError> {
        let connection = self.connection.as_mut().ok_or(ProbeError::NotStarted)?;
        let reports = connection.get_stats().await?;
        let stats = ExtractedStats::from_reports(&reports);

        if stats.rtt_secs.is_none() && !stats.saw_inbound {
            debug!(reports = reports.len(), "No usable transport statistics yet");
            return Ok(None);
        }

        let delta_loss = self.delta_loss_percent(stats.inbound);
        let reported_loss = stats.fraction_lost.map(|f| f * 100.0).unwrap_or(0.0);

        let rtt_ms = stats.rtt_secs.unwrap_or(0.0) * 1000.0;
        let jitter_ms = stats
            .remote_jitter_secs
            .or(stats.inbound_jitter_secs)
            .unwrap_or(0.0)
            * 1000.0;
        let loss_percent = reported_loss.max(delta_loss);

        let sample = MetricSample::new(rtt_ms, jitter_ms, loss_percent)?;
        Ok(Some(sample))
    }

    async fn stop(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
            info!(source = %self.source.name(), "Live transport closed");
        }
        self.baseline = None;
    }
}

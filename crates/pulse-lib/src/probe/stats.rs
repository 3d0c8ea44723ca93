//! Transport statistics capability consumed by the live probe

use super::ProbeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// State of a candidate transport path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidatePairState {
    Frozen,
    Waiting,
    InProgress,
    Failed,
    Succeeded,
}

/// One statistics record returned by a transport
///
/// Times are in seconds, loss fractions are ratios in 0..=1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StatsReport {
    CandidatePair {
        state: CandidatePairState,
        current_round_trip_time: Option<f64>,
    },
    RemoteInboundRtp {
        id: String,
        jitter: Option<f64>,
        fraction_lost: Option<f64>,
    },
    InboundRtp {
        id: String,
        jitter: Option<f64>,
        packets_received: u64,
        packets_lost: u64,
    },
}

/// Factory for live transport connections
#[async_trait]
pub trait StatsSource: Send + Sync {
    /// Human-readable name for logs
    fn name(&self) -> &str;

    /// Negotiate a connection able to report traffic statistics
    async fn connect(&self) -> Result<Box<dyn StatsConnection>, ProbeError>;
}

/// An established connection that can be queried for statistics
#[async_trait]
pub trait StatsConnection: Send {
    /// Fetch the current statistics records
    async fn get_stats(&mut self) -> Result<Vec<StatsReport>, ProbeError>;

    /// Tear the connection down
    async fn close(&mut self);
}

/// Source used when no live transport exists on this host
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableSource;

#[async_trait]
impl StatsSource for UnavailableSource {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn connect(&self) -> Result<Box<dyn StatsConnection>, ProbeError> {
        Err(ProbeError::Unavailable(
            "no live transport configured".to_string(),
        ))
    }
}

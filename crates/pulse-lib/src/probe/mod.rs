//! Metric acquisition from live transports and simulation
//!
//! A [`Probe`] produces [`MetricSample`]s on demand. Two variants exist:
//! - [`LiveProbe`] reads transport statistics from a [`StatsSource`]
//! - [`SimulatedProbe`] produces a bounded random walk
//!
//! The session picks one at start time depending on whether the live source
//! can be acquired.

mod live;
mod simulated;
mod stats;
mod udp_echo;

pub use live::{LiveProbe, DEFAULT_NEGOTIATION_TIMEOUT};
pub use simulated::{FieldWalk, SimulatedProbe, Simulator, WalkParams, WalkProfile};
pub use stats::{
    CandidatePairState, StatsConnection, StatsReport, StatsSource, UnavailableSource,
};
pub use udp_echo::{
    EchoTarget, UdpEchoConfig, UdpEchoSource, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_REPLY_TIMEOUT,
};

use crate::models::{MetricSample, SampleError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use async_trait::async_trait;

/// Errors raised while acquiring or polling a probe
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The live capability cannot be acquired at all
    #[error("live probe unavailable: {0}")]
    Unavailable(String),

    /// Connection negotiation did not finish in time
    #[error("negotiation timed out after {0:?}")]
    NegotiationTimeout(std::time::Duration),

    /// Poll called before `start` or after `stop`
    #[error("probe is not started")]
    NotStarted,

    /// Statistics retrieval failed for this poll
    #[error("statistics retrieval failed: {0}")]
    Stats(String),

    /// Statistics were returned but do not form a valid sample
    #[error("invalid reading: {0}")]
    InvalidReading(#[from] SampleError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Which probe variant is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Live,
    Simulated,
}

/// Capability that produces metric samples
#[async_trait]
pub trait Probe: Send {
    /// Variant of this probe
    fn kind(&self) -> ProbeKind;

    /// Acquire underlying resources. Failure means the caller should fall back
    /// to simulation.
    async fn start(&mut self) -> Result<(), ProbeError>;

    /// Take one reading. `Ok(None)` means no usable data yet.
    async fn poll(&mut self) -> Result<Option<MetricSample>, ProbeError>;

    /// Release all resources. Calling this on a stopped probe does nothing.
    async fn stop(&mut self);

    /// Switch between normal and stress parameter sets
    fn set_stress(&mut self, _active: bool) {}
}

/// Try the live probe first and fall back to the simulator
///
/// Returns the started probe and whether it is simulated.
pub async fn acquire_probe(mut live: LiveProbe, simulator: Simulator) -> (Box<dyn Probe>, bool) {
    match live.start().await {
        Ok(()) => {
            tracing::info!("Live probe acquired");
            (Box::new(live), false)
        }
        Err(e) => {
            tracing::info!(error = %e, "Live probe unavailable, using simulated samples");
            let mut simulated = SimulatedProbe::new(simulator);
            if let Err(e) = simulated.start().await {
                tracing::warn!(error = %e, "Simulated probe failed to start");
            }
            (Box::new(simulated), true)
        }
    }
}

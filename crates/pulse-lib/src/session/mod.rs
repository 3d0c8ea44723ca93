//! Monitoring session lifecycle
//!
//! A [`Session`] owns the active probe, the fallback simulator and the rolling
//! history. It moves through `Idle -> Starting -> Running -> Stopping -> Idle`
//! and, while running, can enter a timed stress sub-state.
//!
//! The session itself holds no timers. [`SessionController`] drives it with a
//! repeating tick timer and a stress countdown timer and publishes snapshots.

mod controller;
mod timer;

#[cfg(test)]
mod tests;

pub use controller::{SessionController, SessionControllerBuilder, SessionHandle};
pub use timer::RepeatingTimer;

use crate::classifier::{classify_health, compute_readiness_score};
use crate::history::{HistorySnapshot, HistorySummary, RollingHistory, MAX_POINTS};
use crate::models::{MetricSample, Reading, SampleSource};
use crate::probe::{
    acquire_probe, LiveProbe, Probe, ProbeError, ProbeKind, SimulatedProbe, Simulator,
    StatsSource, WalkProfile, DEFAULT_NEGOTIATION_TIMEOUT,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default tick cadence
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Default stress sub-session length in countdown ticks
pub const DEFAULT_STRESS_TICKS: u32 = 30;

/// Errors returned by session operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session is not running")]
    NotRunning,

    #[error("session controller has shut down")]
    ControllerClosed,
}

/// Configuration for a monitoring session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Tick cadence; also how long a tick waits on an in-flight poll
    pub poll_interval: Duration,
    /// Rolling history capacity
    pub history_capacity: usize,
    /// Stress countdown length
    pub stress_ticks: u32,
    /// Stress countdown cadence
    pub stress_interval: Duration,
    /// Bound on live probe negotiation
    pub negotiation_timeout: Duration,
    /// Fixed RNG seed for reproducible simulation
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            history_capacity: MAX_POINTS,
            stress_ticks: DEFAULT_STRESS_TICKS,
            stress_interval: Duration::from_secs(1),
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            seed: None,
        }
    }
}

impl SessionConfig {
    fn simulator(&self, stream: u64) -> Simulator {
        match self.seed {
            Some(seed) => Simulator::seeded(seed.wrapping_add(stream)),
            None => Simulator::new(),
        }
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Result of one stress countdown step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStep {
    /// No stress sub-session is active
    Inactive,
    /// Still in stress with this many ticks left
    Remaining(u32),
    /// Countdown reached zero, back to normal
    Completed,
}

/// Everything presentation needs for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub state: SessionState,
    pub running: bool,
    pub simulated_mode: bool,
    pub probe: Option<ProbeKind>,
    pub stress_active: bool,
    pub stress_remaining_ticks: u32,
    pub current: Option<Reading>,
    pub history: HistorySnapshot,
    pub summary: Option<HistorySummary>,
    pub tick: u64,
}

impl DashboardSnapshot {
    /// Snapshot of a session that has never started
    pub fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            running: false,
            simulated_mode: false,
            probe: None,
            stress_active: false,
            stress_remaining_ticks: 0,
            current: None,
            history: HistorySnapshot::default(),
            summary: None,
            tick: 0,
        }
    }
}

/// A poll running on its own task, handing the probe back when it finishes
type InFlightPoll = JoinHandle<(Box<dyn Probe>, Result<Option<MetricSample>, ProbeError>)>;

/// What a tick got from the probe
enum PollOutcome {
    Ready(Result<Option<MetricSample>, ProbeError>),
    /// The poll is still running; this tick is coalesced into it
    InFlight,
}

/// A single monitoring session
///
/// At most one poll is in flight. A poll that outlives its tick keeps running
/// and is collected by a later tick; the ticks in between reuse the previous
/// sample rather than starting a concurrent poll.
pub struct Session {
    config: SessionConfig,
    source: Arc<dyn StatsSource>,
    state: SessionState,
    probe: Option<Box<dyn Probe>>,
    probe_kind: Option<ProbeKind>,
    in_flight: Option<InFlightPoll>,
    fallback: Simulator,
    simulated_mode: bool,
    stress_remaining: Option<u32>,
    last_sample: Option<MetricSample>,
    current: Option<Reading>,
    history: RollingHistory,
    tick: u64,
}

impl Session {
    /// Create an idle session that will try `source` on start
    pub fn new(config: SessionConfig, source: Arc<dyn StatsSource>) -> Self {
        Self {
            fallback: config.simulator(1),
            history: RollingHistory::new(config.history_capacity),
            config,
            source,
            state: SessionState::Idle,
            probe: None,
            probe_kind: None,
            in_flight: None,
            simulated_mode: false,
            stress_remaining: None,
            last_sample: None,
            current: None,
            tick: 0,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    pub fn simulated_mode(&self) -> bool {
        self.simulated_mode
    }

    pub fn stress_active(&self) -> bool {
        self.stress_remaining.is_some()
    }

    pub fn stress_remaining(&self) -> u32 {
        self.stress_remaining.unwrap_or(0)
    }

    pub fn probe_kind(&self) -> Option<ProbeKind> {
        self.probe_kind
    }

    pub fn history(&self) -> &RollingHistory {
        &self.history
    }

    pub fn current(&self) -> Option<&Reading> {
        self.current.as_ref()
    }

    pub fn last_sample(&self) -> Option<&MetricSample> {
        self.last_sample.as_ref()
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Start monitoring
    ///
    /// Returns `false` without side effects if the session is already running.
    /// A live probe failure only switches the session to simulated mode.
    pub async fn start(&mut self) -> bool {
        if self.state != SessionState::Idle {
            debug!(state = ?self.state, "Start ignored, session already active");
            return false;
        }

        self.state = SessionState::Starting;
        self.history.reset();
        self.last_sample = None;
        self.current = None;
        self.stress_remaining = None;
        self.tick = 0;

        let live = LiveProbe::new(self.source.clone())
            .with_negotiation_timeout(self.config.negotiation_timeout);
        let (probe, simulated) = acquire_probe(live, self.config.simulator(0)).await;

        self.probe_kind = Some(probe.kind());
        self.probe = Some(probe);
        self.simulated_mode = simulated;
        self.state = SessionState::Running;

        info!(
            source = %self.source.name(),
            simulated = simulated,
            "Monitoring session started"
        );
        true
    }

    /// Stop monitoring and release the probe
    ///
    /// Returns `false` if the session was already idle.
    pub async fn stop(&mut self) -> bool {
        if self.state == SessionState::Idle {
            return false;
        }

        self.state = SessionState::Stopping;
        if let Some(poll) = self.in_flight.take() {
            // The probe is dropped with the task, which releases its transport
            poll.abort();
            debug!("Abandoned in-flight poll on stop");
        }
        if let Some(mut probe) = self.probe.take() {
            probe.stop().await;
        }
        self.probe_kind = None;

        self.history.reset();
        self.stress_remaining = None;
        self.simulated_mode = false;
        self.last_sample = None;
        self.current = None;
        self.state = SessionState::Idle;

        info!(ticks = self.tick, "Monitoring session stopped");
        true
    }

    /// Enter the stress sub-state
    ///
    /// Returns `Ok(false)` if a stress countdown is already running.
    pub fn begin_stress(&mut self) -> Result<bool, SessionError> {
        if !self.is_running() {
            return Err(SessionError::NotRunning);
        }
        if self.stress_remaining.is_some() {
            return Ok(false);
        }

        self.stress_remaining = Some(self.config.stress_ticks.max(1));
        if let Some(probe) = self.probe.as_mut() {
            probe.set_stress(true);
        }
        info!(ticks = self.config.stress_ticks, "Stress test started");
        Ok(true)
    }

    /// Advance the stress countdown by one step
    pub fn countdown_tick(&mut self) -> CountdownStep {
        let Some(remaining) = self.stress_remaining else {
            return CountdownStep::Inactive;
        };

        let remaining = remaining.saturating_sub(1);
        if remaining > 0 {
            self.stress_remaining = Some(remaining);
            return CountdownStep::Remaining(remaining);
        }

        self.stress_remaining = None;
        if let Some(probe) = self.probe.as_mut() {
            probe.set_stress(false);
        }
        info!("Stress test completed");
        CountdownStep::Completed
    }

    /// Take one reading, classify it and append it to the history
    ///
    /// Returns `None` when the session is not running.
    pub async fn tick(&mut self) -> Option<Reading> {
        if !self.is_running() {
            return None;
        }

        let profile = WalkProfile::from_stress(self.stress_active());
        let polled = self.collect_poll().await?;

        let (sample, source) = match polled {
            PollOutcome::Ready(Ok(Some(sample))) => match (sample.validate(), self.probe_kind) {
                (Ok(()), Some(ProbeKind::Live)) => {
                    (self.fallback.enrich(&sample, profile), SampleSource::Live)
                }
                (Ok(()), _) => (sample, SampleSource::Simulated),
                (Err(e), _) => {
                    warn!(error = %e, "Rejected invalid reading");
                    (self.simulate(profile), SampleSource::Simulated)
                }
            },
            PollOutcome::Ready(Ok(None)) => {
                debug!("No data from probe this tick");
                (self.simulate(profile), SampleSource::Simulated)
            }
            PollOutcome::Ready(Err(e)) => {
                debug!(error = %e, "Probe poll missed");
                (self.simulate(profile), SampleSource::Simulated)
            }
            PollOutcome::InFlight => match self.last_sample {
                Some(previous) => {
                    debug!("Probe poll still in flight, reusing previous sample");
                    (previous.restamped(Utc::now()), SampleSource::Reused)
                }
                None => (self.simulate(profile), SampleSource::Simulated),
            },
        };

        Some(self.record(sample, source))
    }

    /// Start a poll unless one is in flight, then wait up to one interval for it
    ///
    /// Returns `None` when there is no probe.
    async fn collect_poll(&mut self) -> Option<PollOutcome> {
        if self.in_flight.is_none() {
            let mut probe = self.probe.take()?;
            self.in_flight = Some(tokio::spawn(async move {
                let polled = probe.poll().await;
                (probe, polled)
            }));
        }

        let poll = self.in_flight.as_mut()?;
        let joined = match tokio::time::timeout(self.config.poll_interval, poll).await {
            Ok(joined) => joined,
            Err(_) => return Some(PollOutcome::InFlight),
        };
        self.in_flight = None;

        match joined {
            Ok((mut probe, polled)) => {
                // Stress may have toggled while the probe was away
                probe.set_stress(self.stress_active());
                self.probe = Some(probe);
                Some(PollOutcome::Ready(polled))
            }
            Err(e) => {
                warn!(error = %e, "Poll task failed, switching to simulated samples");
                let mut probe = SimulatedProbe::new(self.config.simulator(2));
                if let Err(e) = probe.start().await {
                    warn!(error = %e, "Simulated probe failed to start");
                }
                probe.set_stress(self.stress_active());
                self.probe_kind = Some(probe.kind());
                self.probe = Some(Box::new(probe));
                self.simulated_mode = true;
                Some(PollOutcome::Ready(Err(ProbeError::Stats(e.to_string()))))
            }
        }
    }

    fn simulate(&mut self, profile: WalkProfile) -> MetricSample {
        self.fallback.next_sample(self.last_sample.as_ref(), profile)
    }

    fn record(&mut self, sample: MetricSample, source: SampleSource) -> Reading {
        let reading = Reading {
            sample,
            tier: classify_health(&sample),
            score: compute_readiness_score(&sample),
            source,
        };

        self.history
            .append(sample.jitter_ms, sample.rtt_ms, sample.label());
        self.last_sample = Some(sample);
        self.current = Some(reading);
        self.tick += 1;

        reading
    }

    /// Read-only view for presentation
    pub fn snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            state: self.state,
            running: self.is_running(),
            simulated_mode: self.simulated_mode,
            probe: self.probe_kind(),
            stress_active: self.stress_active(),
            stress_remaining_ticks: self.stress_remaining(),
            current: self.current,
            history: self.history.snapshot(),
            summary: self.history.summary(),
            tick: self.tick,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(poll) = self.in_flight.take() {
            poll.abort();
        }
    }
}

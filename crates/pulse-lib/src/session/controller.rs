//! Session controller task
//!
//! Owns the [`Session`] plus its two timers and processes commands between
//! ticks. Because commands and ticks are handled by the same task, a stop
//! request cancels both timers before any further tick can run.

use super::{
    CountdownStep, DashboardSnapshot, RepeatingTimer, Session, SessionConfig, SessionError,
};
use crate::health::{components, HealthRegistry};
use crate::models::{HealthTier, Reading, SampleSource};
use crate::observability::{PulseMetrics, StructuredLogger};
use crate::probe::StatsSource;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Command channel depth
const COMMAND_BUFFER: usize = 16;

enum Command {
    Start(oneshot::Sender<DashboardSnapshot>),
    Stop(oneshot::Sender<DashboardSnapshot>),
    Stress(oneshot::Sender<Result<DashboardSnapshot, SessionError>>),
}

/// Cloneable handle used by the API layer to drive the controller
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<DashboardSnapshot>,
}

impl SessionHandle {
    /// Start monitoring (no-op if already running)
    pub async fn start(&self) -> Result<DashboardSnapshot, SessionError> {
        self.request(Command::Start).await
    }

    /// Stop monitoring (no-op if idle)
    pub async fn stop(&self) -> Result<DashboardSnapshot, SessionError> {
        self.request(Command::Stop).await
    }

    /// Begin a stress sub-session
    pub async fn run_stress_test(&self) -> Result<DashboardSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Stress(tx))
            .await
            .map_err(|_| SessionError::ControllerClosed)?;
        rx.await.map_err(|_| SessionError::ControllerClosed)?
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> DashboardSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<DashboardSnapshot> {
        self.snapshots.clone()
    }

    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<DashboardSnapshot>) -> Command,
    ) -> Result<DashboardSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| SessionError::ControllerClosed)?;
        rx.await.map_err(|_| SessionError::ControllerClosed)
    }
}

/// Task that drives a session on a fixed cadence
pub struct SessionController {
    session: Session,
    tick_timer: RepeatingTimer,
    stress_timer: RepeatingTimer,
    commands: mpsc::Receiver<Command>,
    snapshot_tx: watch::Sender<DashboardSnapshot>,
    metrics: PulseMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
    last_tier: Option<HealthTier>,
}

impl SessionController {
    /// Create a controller and its handle
    pub fn new(
        session: Session,
        metrics: PulseMetrics,
        logger: StructuredLogger,
        health: Option<HealthRegistry>,
    ) -> (Self, SessionHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());

        let controller = Self {
            session,
            tick_timer: RepeatingTimer::new(),
            stress_timer: RepeatingTimer::new(),
            commands: command_rx,
            snapshot_tx,
            metrics,
            logger,
            health,
            last_tier: None,
        };
        let handle = SessionHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
        };

        (controller, handle)
    }

    /// Run until shutdown is signalled or every handle is dropped
    ///
    /// The session is always stopped on exit so a live connection is never
    /// leaked.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = self.session.config().poll_interval.as_millis() as u64,
            source = %self.session.source_name(),
            "Starting session controller"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("Shutting down session controller");
                    break;
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => {
                        debug!("All session handles dropped");
                        break;
                    }
                },
                _ = self.stress_timer.tick() => self.on_countdown(),
                _ = self.tick_timer.tick() => self.on_tick().await,
            }
        }

        self.stop().await;
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                self.start().await;
                let _ = reply.send(self.session.snapshot());
            }
            Command::Stop(reply) => {
                self.stop().await;
                let _ = reply.send(self.session.snapshot());
            }
            Command::Stress(reply) => {
                let result = self.begin_stress().map(|_| self.session.snapshot());
                let _ = reply.send(result);
            }
        }
    }

    async fn start(&mut self) {
        if !self.session.start().await {
            return;
        }

        self.tick_timer.arm(self.session.config().poll_interval);
        self.last_tier = None;

        let simulated = self.session.simulated_mode();
        self.metrics.set_simulated_mode(simulated);
        self.logger
            .log_session_started(self.session.source_name(), simulated);

        if let Some(health) = &self.health {
            health.set_healthy(components::SESSION).await;
            if simulated {
                health
                    .set_degraded(components::PROBE, "live probe unavailable, simulating")
                    .await;
                self.logger.log_probe_fallback(self.session.source_name());
            } else {
                health.set_healthy(components::PROBE).await;
            }
        }

        self.publish();
    }

    async fn stop(&mut self) {
        self.tick_timer.cancel();
        self.stress_timer.cancel();

        let ticks = self.session.snapshot().tick;
        if !self.session.stop().await {
            return;
        }

        self.last_tier = None;
        self.metrics.set_stress_active(false);
        self.metrics.set_simulated_mode(false);
        self.logger.log_session_stopped(ticks);

        if let Some(health) = &self.health {
            health.set_healthy(components::PROBE).await;
        }

        self.publish();
    }

    fn begin_stress(&mut self) -> Result<(), SessionError> {
        if self.session.begin_stress()? {
            self.stress_timer.arm(self.session.config().stress_interval);
            self.metrics.set_stress_active(true);
            self.logger.log_stress_started(self.session.config().stress_ticks);
            self.publish();
        }
        Ok(())
    }

    fn on_countdown(&mut self) {
        match self.session.countdown_tick() {
            CountdownStep::Completed => {
                self.stress_timer.cancel();
                self.metrics.set_stress_active(false);
                self.logger.log_stress_completed();
                self.publish();
            }
            CountdownStep::Remaining(_) => self.publish(),
            CountdownStep::Inactive => {
                warn!("Stress timer fired without an active stress test");
                self.stress_timer.cancel();
            }
        }
    }

    async fn on_tick(&mut self) {
        let started = Instant::now();
        let Some(reading) = self.session.tick().await else {
            return;
        };
        self.metrics
            .observe_poll_latency(started.elapsed().as_secs_f64());
        self.record(&reading);
        self.publish();
    }

    fn record(&mut self, reading: &Reading) {
        self.metrics.record_reading(reading);

        let fell_back = !self.session.simulated_mode() && reading.source != SampleSource::Live;
        if fell_back {
            self.metrics.inc_fallbacks();
        }

        if self.last_tier != Some(reading.tier) {
            self.logger
                .log_tier_change(self.last_tier, reading.tier, reading.score.value());
            self.last_tier = Some(reading.tier);
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.session.snapshot());
    }
}

/// Builder for creating a controller
pub struct SessionControllerBuilder {
    source: Option<Arc<dyn StatsSource>>,
    config: SessionConfig,
    metrics: Option<PulseMetrics>,
    logger: Option<StructuredLogger>,
    health: Option<HealthRegistry>,
}

impl SessionControllerBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            source: None,
            config: SessionConfig::default(),
            metrics: None,
            logger: None,
            health: None,
        }
    }

    /// Set the live statistics source
    pub fn source(mut self, source: Arc<dyn StatsSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Replace the whole session configuration
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the tick interval
    pub fn poll_interval(mut self, interval: std::time::Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the rolling history capacity
    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.config.history_capacity = capacity;
        self
    }

    /// Set the structured logger
    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Set the metrics handle
    pub fn metrics(mut self, metrics: PulseMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Report probe and session health to this registry
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Build the controller
    pub fn build(self) -> Result<(SessionController, SessionHandle)> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Statistics source is required"))?;
        if self.config.poll_interval.is_zero() {
            anyhow::bail!("Poll interval must be greater than zero");
        }
        if self.config.stress_interval.is_zero() {
            anyhow::bail!("Stress interval must be greater than zero");
        }

        let session = Session::new(self.config, source);
        Ok(SessionController::new(
            session,
            self.metrics.unwrap_or_default(),
            self.logger.unwrap_or_else(|| StructuredLogger::new("local")),
            self.health,
        ))
    }
}

impl Default for SessionControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Session lifecycle and controller tests
//!
//! Scripted statistics sources stand in for a real transport so every
//! fallback path can be driven deterministically.

#[cfg(test)]
mod lifecycle_tests {
    use crate::models::SampleSource;
    use crate::probe::{
        async_trait, CandidatePairState, ProbeError, ProbeKind, StatsConnection, StatsReport,
        StatsSource, UnavailableSource,
    };
    use crate::session::{
        CountdownStep, Session, SessionConfig, SessionError, SessionState, DEFAULT_STRESS_TICKS,
    };
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// What the scripted connection does on one poll
    pub(super) enum Step {
        Reports(Vec<StatsReport>),
        Fail,
        Hang,
        /// Good reports after a delay
        Slow(Duration),
    }

    /// Source whose connections replay a fixed script, then repeat the last step
    pub(super) struct ScriptedSource {
        script: Arc<Mutex<VecDeque<Step>>>,
    }

    impl ScriptedSource {
        pub(super) fn new(steps: Vec<Step>) -> Self {
            Self {
                script: Arc::new(Mutex::new(steps.into())),
            }
        }
    }

    struct ScriptedConnection {
        script: Arc<Mutex<VecDeque<Step>>>,
    }

    #[async_trait]
    impl StatsSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn connect(&self) -> Result<Box<dyn StatsConnection>, ProbeError> {
            Ok(Box::new(ScriptedConnection {
                script: self.script.clone(),
            }))
        }
    }

    #[async_trait]
    impl StatsConnection for ScriptedConnection {
        async fn get_stats(&mut self) -> Result<Vec<StatsReport>, ProbeError> {
            let step = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.pop_front()
                } else {
                    script.front().map(|step| match step {
                        Step::Reports(reports) => Step::Reports(reports.clone()),
                        Step::Fail => Step::Fail,
                        Step::Hang => Step::Hang,
                        Step::Slow(delay) => Step::Slow(*delay),
                    })
                }
            };

            match step {
                Some(Step::Reports(reports)) => Ok(reports),
                Some(Step::Fail) => Err(ProbeError::Stats("scripted failure".to_string())),
                Some(Step::Hang) => std::future::pending().await,
                Some(Step::Slow(delay)) => {
                    tokio::time::sleep(delay).await;
                    Ok(good_reports())
                }
                None => Ok(Vec::new()),
            }
        }

        async fn close(&mut self) {}
    }

    pub(super) fn good_reports() -> Vec<StatsReport> {
        vec![
            StatsReport::CandidatePair {
                state: CandidatePairState::Succeeded,
                current_round_trip_time: Some(0.030),
            },
            StatsReport::RemoteInboundRtp {
                id: "audio".to_string(),
                jitter: Some(0.004),
                fraction_lost: Some(0.0),
            },
        ]
    }

    pub(super) fn config() -> SessionConfig {
        SessionConfig {
            seed: Some(42),
            ..SessionConfig::default()
        }
    }

    fn session_with(source: impl StatsSource + 'static) -> Session {
        Session::new(config(), Arc::new(source))
    }

    #[tokio::test]
    async fn test_stop_while_idle_is_noop() {
        let mut session = session_with(UnavailableSource);

        assert!(!session.stop().await);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.tick().await.is_none());
    }

    #[tokio::test]
    async fn test_start_while_running_is_idempotent() {
        let mut session = session_with(UnavailableSource);

        assert!(session.start().await);
        session.tick().await.unwrap();
        session.tick().await.unwrap();

        assert!(!session.start().await);
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.state(), SessionState::Running);
    }

    #[tokio::test]
    async fn test_unavailable_source_runs_simulated() {
        let mut session = session_with(UnavailableSource);
        session.start().await;

        assert!(session.simulated_mode());
        assert_eq!(session.probe_kind(), Some(ProbeKind::Simulated));

        for _ in 0..3 {
            let reading = session.tick().await.unwrap();
            assert_eq!(reading.source, SampleSource::Simulated);
            assert!(reading.sample.validate().is_ok());
        }
        assert_eq!(session.history().len(), 3);
        assert_eq!(session.snapshot().tick, 3);
    }

    #[tokio::test]
    async fn test_live_readings_are_enriched() {
        let mut session = session_with(ScriptedSource::new(vec![Step::Reports(good_reports())]));
        session.start().await;
        assert!(!session.simulated_mode());

        let reading = session.tick().await.unwrap();
        assert_eq!(reading.source, SampleSource::Live);
        // Normal enrichment adds 0..10 ms of RTT and 0..3 ms of jitter
        assert!(reading.sample.rtt_ms >= 30.0 && reading.sample.rtt_ms < 40.0);
        assert!(reading.sample.jitter_ms >= 4.0 && reading.sample.jitter_ms < 7.0);
    }

    #[tokio::test]
    async fn test_missing_data_falls_back_to_simulation() {
        let mut session = session_with(ScriptedSource::new(vec![Step::Reports(Vec::new())]));
        session.start().await;

        let reading = session.tick().await.unwrap();
        assert_eq!(reading.source, SampleSource::Simulated);
        // Per-tick fallback does not flip the session into simulated mode
        assert!(!session.simulated_mode());
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_and_failed_polls_fall_back() {
        let invalid = vec![StatsReport::CandidatePair {
            state: CandidatePairState::Succeeded,
            current_round_trip_time: Some(-0.5),
        }];
        let mut session = session_with(ScriptedSource::new(vec![
            Step::Reports(invalid),
            Step::Fail,
            Step::Reports(good_reports()),
        ]));
        session.start().await;

        assert_eq!(session.tick().await.unwrap().source, SampleSource::Simulated);
        assert_eq!(session.tick().await.unwrap().source, SampleSource::Simulated);
        assert_eq!(session.tick().await.unwrap().source, SampleSource::Live);
        assert_eq!(session.history().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_poll_reuses_previous_sample() {
        let mut session = session_with(ScriptedSource::new(vec![
            Step::Reports(good_reports()),
            Step::Hang,
        ]));
        session.start().await;

        let first = session.tick().await.unwrap();
        let second = session.tick().await.unwrap();

        assert_eq!(second.source, SampleSource::Reused);
        assert_eq!(second.sample.rtt_ms, first.sample.rtt_ms);
        assert_eq!(second.sample.jitter_ms, first.sample.jitter_ms);
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrun_without_previous_sample_simulates() {
        let mut session = session_with(ScriptedSource::new(vec![Step::Hang]));
        session.start().await;

        let reading = session.tick().await.unwrap();
        assert_eq!(reading.source, SampleSource::Simulated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_poll_is_collected_by_next_tick() {
        // Every poll takes 1.2 intervals
        let mut session = session_with(ScriptedSource::new(vec![Step::Slow(
            Duration::from_millis(1200),
        )]));
        session.start().await;

        let mut readings = Vec::new();
        for _ in 0..10 {
            readings.push(session.tick().await.unwrap());
        }
        let sources: Vec<SampleSource> = readings.iter().map(|r| r.source).collect();

        assert!(!session.simulated_mode());
        assert_eq!(sources[0], SampleSource::Simulated);
        assert_eq!(sources[1], SampleSource::Live);
        // Only ticks that land on an in-flight poll reuse the previous sample
        for pair in sources[1..].chunks(2) {
            assert_eq!(pair[0], SampleSource::Live);
            if let Some(second) = pair.get(1) {
                assert_eq!(*second, SampleSource::Reused);
            }
        }

        let live_rtts: Vec<f64> = readings
            .iter()
            .filter(|r| r.source == SampleSource::Live)
            .map(|r| r.sample.rtt_ms)
            .collect();
        assert_eq!(live_rtts.len(), 5);
        assert!(live_rtts.windows(2).any(|w| w[0] != w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_in_flight_poll() {
        let mut session = session_with(ScriptedSource::new(vec![Step::Hang]));
        session.start().await;
        session.tick().await.unwrap();

        assert!(session.stop().await);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.probe_kind(), None);

        // A fresh start polls again instead of waiting on the abandoned task
        assert!(session.start().await);
        assert_eq!(session.probe_kind(), Some(ProbeKind::Live));
        let reading = session.tick().await.unwrap();
        assert_eq!(reading.source, SampleSource::Simulated);
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn test_stress_requires_running_session() {
        let mut session = session_with(UnavailableSource);
        assert_eq!(session.begin_stress(), Err(SessionError::NotRunning));
        assert_eq!(session.countdown_tick(), CountdownStep::Inactive);
    }

    #[tokio::test]
    async fn test_stress_lasts_exactly_configured_ticks() {
        let mut session = session_with(UnavailableSource);
        session.start().await;

        assert_eq!(session.begin_stress(), Ok(true));
        assert_eq!(session.stress_remaining(), DEFAULT_STRESS_TICKS);
        // Second request while stressed changes nothing
        assert_eq!(session.begin_stress(), Ok(false));

        for tick in 1..DEFAULT_STRESS_TICKS {
            assert_eq!(
                session.countdown_tick(),
                CountdownStep::Remaining(DEFAULT_STRESS_TICKS - tick)
            );
            assert!(session.stress_active());
        }
        assert_eq!(session.countdown_tick(), CountdownStep::Completed);
        assert!(!session.stress_active());
        assert_eq!(session.countdown_tick(), CountdownStep::Inactive);
    }

    #[tokio::test]
    async fn test_stress_widens_simulated_samples() {
        let mut session = session_with(UnavailableSource);
        session.start().await;
        session.begin_stress().unwrap();

        for _ in 0..5 {
            let reading = session.tick().await.unwrap();
            assert!(reading.sample.rtt_ms >= 80.0);
            assert!(reading.sample.jitter_ms >= 15.0);
            assert!(reading.sample.loss_percent >= 0.5);
        }
    }

    #[tokio::test]
    async fn test_stop_resets_session() {
        let mut session = session_with(UnavailableSource);
        session.start().await;
        session.begin_stress().unwrap();
        session.tick().await.unwrap();

        assert!(session.stop().await);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.history().is_empty());
        assert!(!session.stress_active());
        assert!(!session.simulated_mode());
        assert!(session.current().is_none());
        assert!(session.probe_kind().is_none());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let mut session = Session::new(
            SessionConfig {
                history_capacity: 5,
                ..config()
            },
            Arc::new(UnavailableSource),
        );
        session.start().await;

        for _ in 0..8 {
            session.tick().await.unwrap();
        }
        let snapshot = session.snapshot();
        assert_eq!(snapshot.history.latency.len(), 5);
        assert_eq!(snapshot.history.jitter.len(), 5);
        assert_eq!(snapshot.history.labels.len(), 5);
        assert_eq!(snapshot.tick, 8);
    }

    #[tokio::test]
    async fn test_zero_stress_ticks_still_counts_one() {
        let mut session = Session::new(
            SessionConfig {
                stress_ticks: 0,
                ..config()
            },
            Arc::new(UnavailableSource),
        );
        session.start().await;
        session.begin_stress().unwrap();
        assert_eq!(session.countdown_tick(), CountdownStep::Completed);
    }
}

#[cfg(test)]
mod controller_tests {
    use super::lifecycle_tests::{config, good_reports, ScriptedSource, Step};
    use crate::health::{components, ComponentStatus, HealthRegistry};
    use crate::probe::UnavailableSource;
    use crate::session::{SessionControllerBuilder, SessionError, SessionState};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::broadcast;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test(start_paused = true)]
    async fn test_ticks_follow_poll_interval() {
        let (controller, handle) = SessionControllerBuilder::new()
            .source(Arc::new(UnavailableSource))
            .config(config())
            .build()
            .unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(controller.run(shutdown_rx));

        let started = assert_ok!(handle.start().await);
        assert!(started.running);
        assert!(started.simulated_mode);
        assert_eq!(started.tick, 0);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.tick, 3);
        assert_eq!(snapshot.history.latency.len(), 3);
        assert!(snapshot.current.is_some());

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
        assert_eq!(handle.snapshot().state, SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_ticks() {
        let (controller, handle) = SessionControllerBuilder::new()
            .source(Arc::new(UnavailableSource))
            .config(config())
            .build()
            .unwrap();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(controller.run(shutdown_rx));

        assert_ok!(handle.start().await);
        tokio::time::sleep(Duration::from_millis(2500)).await;

        let stopped = assert_ok!(handle.stop().await);
        assert!(!stopped.running);
        assert!(stopped.history.latency.is_empty());

        let mut updates = handle.subscribe();
        updates.borrow_and_update();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!updates.has_changed().unwrap());
        assert!(handle.snapshot().current.is_none());

        // Stopping again is a no-op
        assert!(!assert_ok!(handle.stop().await).running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stress_requires_running_controller() {
        let (controller, handle) = SessionControllerBuilder::new()
            .source(Arc::new(UnavailableSource))
            .config(config())
            .build()
            .unwrap();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(controller.run(shutdown_rx));

        let err = assert_err!(handle.run_stress_test().await);
        assert_eq!(err, SessionError::NotRunning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stress_countdown_returns_to_normal() {
        let (controller, handle) = SessionControllerBuilder::new()
            .source(Arc::new(UnavailableSource))
            .config(config())
            .build()
            .unwrap();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(controller.run(shutdown_rx));

        assert_ok!(handle.start().await);
        let stressed = assert_ok!(handle.run_stress_test().await);
        assert!(stressed.stress_active);
        assert_eq!(stressed.stress_remaining_ticks, 30);

        tokio::time::sleep(Duration::from_millis(29_500)).await;
        let snapshot = handle.snapshot();
        assert!(snapshot.stress_active);
        assert_eq!(snapshot.stress_remaining_ticks, 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let snapshot = handle.snapshot();
        assert!(!snapshot.stress_active);
        assert_eq!(snapshot.stress_remaining_ticks, 0);
        assert!(snapshot.running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_reflects_probe_mode() {
        let health = HealthRegistry::new();
        let (controller, handle) = SessionControllerBuilder::new()
            .source(Arc::new(UnavailableSource))
            .config(config())
            .health(health.clone())
            .build()
            .unwrap();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(controller.run(shutdown_rx));

        assert_ok!(handle.start().await);
        let report = health.health().await;
        assert_eq!(
            report.components[components::PROBE].status,
            ComponentStatus::Degraded
        );
        assert_eq!(
            report.components[components::SESSION].status,
            ComponentStatus::Healthy
        );

        assert_ok!(handle.stop().await);
        let report = health.health().await;
        assert_eq!(report.status, ComponentStatus::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_controller_reports_live_probe() {
        let source = ScriptedSource::new(vec![Step::Reports(good_reports())]);
        let (controller, handle) = SessionControllerBuilder::new()
            .source(Arc::new(source))
            .config(config())
            .build()
            .unwrap();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(controller.run(shutdown_rx));

        let started = assert_ok!(handle.start().await);
        assert!(!started.simulated_mode);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.tick, 1);
        assert_eq!(
            snapshot.current.map(|r| r.source),
            Some(crate::models::SampleSource::Live)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_live_source_still_reports_live() {
        let source = ScriptedSource::new(vec![Step::Slow(Duration::from_millis(1200))]);
        let (controller, handle) = SessionControllerBuilder::new()
            .source(Arc::new(source))
            .config(config())
            .build()
            .unwrap();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(controller.run(shutdown_rx));

        assert_ok!(handle.start().await);
        tokio::time::sleep(Duration::from_millis(2500)).await;

        let snapshot = handle.snapshot();
        assert!(!snapshot.simulated_mode);
        assert_eq!(snapshot.tick, 2);
        assert_eq!(
            snapshot.current.map(|r| r.source),
            Some(crate::models::SampleSource::Live)
        );
    }

    #[test]
    fn test_builder_rejects_missing_source_and_zero_interval() {
        assert!(SessionControllerBuilder::new().build().is_err());
        assert!(SessionControllerBuilder::new()
            .source(Arc::new(UnavailableSource))
            .poll_interval(Duration::ZERO)
            .build()
            .is_err());
    }

    #[tokio::test]
    async fn test_handle_errors_after_controller_exit() {
        let (controller, handle) = SessionControllerBuilder::new()
            .source(Arc::new(UnavailableSource))
            .build()
            .unwrap();
        drop(controller);

        assert_eq!(
            handle.start().await.unwrap_err(),
            SessionError::ControllerClosed
        );
    }
}

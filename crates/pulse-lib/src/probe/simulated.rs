//! Simulated samples via a bounded random walk
//!
//! Each field moves by a uniform delta scaled by its step size and is clamped
//! to the profile's range. The stress profile widens ranges and steps to mimic
//! a congested path.

use super::{Probe, ProbeError, ProbeKind};
use crate::models::MetricSample;
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Starting point of the walk when no previous sample exists
const DEFAULT_RTT_MS: f64 = 40.0;
const DEFAULT_JITTER_MS: f64 = 5.0;
const DEFAULT_LOSS_PERCENT: f64 = 0.0;

/// Parameter set selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalkProfile {
    Normal,
    Stress,
}

impl WalkProfile {
    pub fn from_stress(active: bool) -> Self {
        if active {
            WalkProfile::Stress
        } else {
            WalkProfile::Normal
        }
    }

    /// Random-walk bounds for this profile
    pub fn walk(&self) -> WalkParams {
        match self {
            WalkProfile::Normal => WalkParams {
                rtt: FieldWalk::new(10.0, 120.0, 8.0),
                jitter: FieldWalk::new(1.0, 25.0, 3.0),
                loss: FieldWalk::new(0.0, 0.5, 0.1),
            },
            WalkProfile::Stress => WalkParams {
                rtt: FieldWalk::new(80.0, 400.0, 40.0),
                jitter: FieldWalk::new(15.0, 120.0, 15.0),
                loss: FieldWalk::new(0.5, 8.0, 1.0),
            },
        }
    }

    /// Extra impairment added on top of live readings
    ///
    /// Loopback paths underestimate what a real call path sees, so live samples
    /// get a small randomized contribution per field.
    pub fn enrichment(&self) -> WalkParams {
        match self {
            WalkProfile::Normal => WalkParams {
                rtt: FieldWalk::new(0.0, 10.0, 0.0),
                jitter: FieldWalk::new(0.0, 3.0, 0.0),
                loss: FieldWalk::new(0.0, 0.1, 0.0),
            },
            WalkProfile::Stress => WalkParams {
                rtt: FieldWalk::new(20.0, 80.0, 0.0),
                jitter: FieldWalk::new(5.0, 25.0, 0.0),
                loss: FieldWalk::new(0.2, 2.0, 0.0),
            },
        }
    }
}

/// Bounds and step for one field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldWalk {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl FieldWalk {
    const fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }
}

/// Per-field walk parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WalkParams {
    pub rtt: FieldWalk,
    pub jitter: FieldWalk,
    pub loss: FieldWalk,
}

/// Random sample generator
#[derive(Debug, Clone)]
pub struct Simulator {
    rng: StdRng,
}

impl Simulator {
    /// Simulator seeded from OS entropy
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic simulator for tests and replays
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Next sample of the walk starting at `previous` (or the defaults)
    pub fn next_sample(
        &mut self,
        previous: Option<&MetricSample>,
        profile: WalkProfile,
    ) -> MetricSample {
        let (rtt, jitter, loss) = previous
            .map(|s| (s.rtt_ms, s.jitter_ms, s.loss_percent))
            .unwrap_or((DEFAULT_RTT_MS, DEFAULT_JITTER_MS, DEFAULT_LOSS_PERCENT));
        let params = profile.walk();

        MetricSample {
            rtt_ms: self.step(rtt, params.rtt),
            jitter_ms: self.step(jitter, params.jitter),
            loss_percent: self.step(loss, params.loss),
            timestamp: Utc::now(),
        }
    }

    /// Add the profile's enrichment contribution to a live sample
    pub fn enrich(&mut self, sample: &MetricSample, profile: WalkProfile) -> MetricSample {
        let extra = profile.enrichment();

        MetricSample {
            rtt_ms: sample.rtt_ms + self.uniform(extra.rtt),
            jitter_ms: sample.jitter_ms + self.uniform(extra.jitter),
            loss_percent: (sample.loss_percent + self.uniform(extra.loss)).min(100.0),
            timestamp: sample.timestamp,
        }
    }

    fn step(&mut self, value: f64, walk: FieldWalk) -> f64 {
        let delta = self.rng.gen_range(-1.0_f64..=1.0) * walk.step;
        (value + delta).clamp(walk.min, walk.max)
    }

    fn uniform(&mut self, range: FieldWalk) -> f64 {
        if range.max <= range.min {
            return range.min;
        }
        self.rng.gen_range(range.min..range.max)
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Probe variant that never touches the network
pub struct SimulatedProbe {
    simulator: Simulator,
    last: Option<MetricSample>,
    stress: bool,
    started: bool,
}

impl SimulatedProbe {
    pub fn new(simulator: Simulator) -> Self {
        Self {
            simulator,
            last: None,
            stress: false,
            started: false,
        }
    }

    pub fn is_stressed(&self) -> bool {
        self.stress
    }
}

#[async_trait]
impl Probe for SimulatedProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Simulated
    }

    async fn start(&mut self) -> Result<(), ProbeError> {
        self.started = true;
        Ok(())
    }

    async fn poll(&mut self) -> Result<Option<MetricSample>, ProbeError> {
        if !self.started {
            return Err(ProbeError::NotStarted);
        }

        let sample = self
            .simulator
            .next_sample(self.last.as_ref(), WalkProfile::from_stress(self.stress));
        self.last = Some(sample);
        Ok(Some(sample))
    }

    async fn stop(&mut self) {
        self.started = false;
        self.last = None;
        self.stress = false;
    }

    fn set_stress(&mut self, active: bool) {
        self.stress = active;
    }
}

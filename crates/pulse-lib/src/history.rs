//! Rolling history buffer for charting
//!
//! Holds the last `capacity` samples as three parallel series (jitter, latency,
//! label) that always move together. Oldest entries are dropped first.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of points kept in the window
pub const MAX_POINTS: usize = 60;

/// Fixed-capacity FIFO of chart points
#[derive(Debug, Clone)]
pub struct RollingHistory {
    jitter: VecDeque<f64>,
    latency: VecDeque<f64>,
    labels: VecDeque<String>,
    capacity: usize,
}

impl RollingHistory {
    /// Create an empty history holding at most `capacity` points
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            jitter: VecDeque::with_capacity(capacity),
            latency: VecDeque::with_capacity(capacity),
            labels: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append one point to every series, evicting from the front past capacity
    pub fn append(&mut self, jitter: f64, latency: f64, label: impl Into<String>) {
        self.jitter.push_back(jitter);
        self.latency.push_back(latency);
        self.labels.push_back(label.into());

        while self.labels.len() > self.capacity {
            self.jitter.pop_front();
            self.latency.pop_front();
            self.labels.pop_front();
        }

        debug_assert!(
            self.jitter.len() == self.latency.len() && self.latency.len() == self.labels.len()
        );
    }

    /// Drop every point
    pub fn reset(&mut self) {
        self.jitter.clear();
        self.latency.clear();
        self.labels.clear();
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Owned copy of the current window for presentation
    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            jitter: self.jitter.iter().copied().collect(),
            latency: self.latency.iter().copied().collect(),
            labels: self.labels.iter().cloned().collect(),
        }
    }

    /// Aggregate statistics over the window, `None` when empty
    pub fn summary(&self) -> Option<HistorySummary> {
        Some(HistorySummary {
            points: self.len(),
            latency: SeriesStats::from_values(&self.latency)?,
            jitter: SeriesStats::from_values(&self.jitter)?,
        })
    }
}

impl Default for RollingHistory {
    fn default() -> Self {
        Self::new(MAX_POINTS)
    }
}

/// Read-only copy of the rolling history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub jitter: Vec<f64>,
    pub latency: Vec<f64>,
    pub labels: Vec<String>,
}

impl HistorySnapshot {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Window statistics for the status cards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySummary {
    pub points: usize,
    pub latency: SeriesStats,
    pub jitter: SeriesStats,
}

/// Min/max/mean/p95 of one series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p95: f64,
}

impl SeriesStats {
    fn from_values(values: &VecDeque<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let mut sorted: Vec<f64> = values.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
        // Nearest-rank percentile
        let rank = ((0.95 * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());

        Some(Self {
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            mean,
            p95: sorted[rank - 1],
        })
    }
}

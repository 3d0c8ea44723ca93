//! Cancellable repeating timer for use inside `tokio::select!`

use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// A periodic timer that can be armed and cancelled
///
/// While disarmed, [`RepeatingTimer::tick`] never completes, so the timer can sit
/// in a `select!` branch unconditionally. Missed ticks are skipped rather than
/// bursted, which coalesces ticks that overlap a slow handler.
#[derive(Debug, Default)]
pub struct RepeatingTimer {
    interval: Option<Interval>,
}

impl RepeatingTimer {
    pub fn new() -> Self {
        Self { interval: None }
    }

    /// Start ticking every `period`, first tick one period from now
    ///
    /// Re-arming an armed timer restarts its phase.
    pub fn arm(&mut self, period: Duration) {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.interval = Some(interval);
    }

    /// Stop ticking. No tick is delivered after this returns.
    pub fn cancel(&mut self) {
        self.interval = None;
    }

    pub fn is_armed(&self) -> bool {
        self.interval.is_some()
    }

    /// Wait for the next tick
    pub async fn tick(&mut self) -> Instant {
        match self.interval.as_mut() {
            Some(interval) => interval.tick().await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_period() {
        let mut timer = RepeatingTimer::new();
        timer.arm(Duration::from_secs(1));

        let start = Instant::now();
        timer.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        timer.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarmed_timer_never_fires() {
        let mut timer = RepeatingTimer::new();
        timer.arm(Duration::from_millis(100));
        timer.cancel();
        assert!(!timer.is_armed());

        let fired = tokio::time::timeout(Duration::from_secs(10), timer.tick()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_ticks_are_skipped() {
        let mut timer = RepeatingTimer::new();
        timer.arm(Duration::from_secs(1));
        let start = Instant::now();

        // Simulate a handler that overran three periods
        tokio::time::sleep(Duration::from_millis(3500)).await;
        timer.tick().await;
        timer.tick().await;

        // The second tick lands on the next period boundary, not immediately
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }
}

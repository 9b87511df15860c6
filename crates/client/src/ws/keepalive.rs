//! Keepalive timer for an open connection.

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Periodic liveness probe schedule.
///
/// Stopped timers never tick, so the connection actor can always poll
/// [`Keepalive::tick`] inside its `select!` loop.
#[derive(Debug)]
pub struct Keepalive {
    period: Duration,
    interval: Option<Interval>,
    last_ack: Option<Instant>,
}

impl Keepalive {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
            last_ack: None,
        }
    }

    /// Starts (or restarts) the schedule; the first probe is one period away.
    pub fn start(&mut self) {
        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
        self.last_ack = None;
    }

    pub fn stop(&mut self) {
        self.interval = None;
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Records a probe acknowledgment. Missing acknowledgments are not acted on.
    pub fn record_ack(&mut self) {
        self.last_ack = Some(Instant::now());
    }

    pub fn last_ack(&self) -> Option<Instant> {
        self.last_ack
    }

    /// Resolves when the next probe is due; pends forever while stopped.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_period_after_start() {
        let mut keepalive = Keepalive::new(Duration::from_secs(30));
        keepalive.start();
        let started = Instant::now();

        keepalive.tick().await;
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        keepalive.tick().await;
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_timer_never_ticks() {
        let mut keepalive = Keepalive::new(Duration::from_secs(1));
        keepalive.start();
        keepalive.stop();
        assert!(!keepalive.is_running());
        assert!(timeout(Duration::from_secs(10), keepalive.tick())
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_clears_ack() {
        let mut keepalive = Keepalive::new(Duration::from_secs(1));
        keepalive.start();
        keepalive.record_ack();
        assert!(keepalive.last_ack().is_some());
        keepalive.start();
        assert!(keepalive.last_ack().is_none());
    }
}

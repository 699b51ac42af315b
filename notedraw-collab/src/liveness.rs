//! Heartbeat emission for an open connection.
//!
//! A [`Heartbeat`] is created when the stream opens and dropped when it
//! closes, so it can never outlive its connection. Failure detection is left
//! entirely to stream closure: `pong` replies are accepted but not tracked,
//! and a silent server is only noticed once the socket itself closes.

use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::protocol::ClientMessage;

/// Periodic `ping` source.
pub struct Heartbeat {
    interval: Interval,
    period: Duration,
    sent: u64,
}

impl Heartbeat {
    /// Start a heartbeat whose first tick is one full `period` from now.
    pub fn start(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let mut interval = time::interval_at(Instant::now() + period, period);
        // A stalled runtime must not cause a burst of catch-up pings.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            period,
            sent: 0,
        }
    }

    /// Wait for the next tick and return the ping to send.
    ///
    /// Cancel-safe, so it can sit in a `tokio::select!` loop.
    pub async fn tick(&mut self) -> ClientMessage {
        self.interval.tick().await;
        self.sent += 1;
        ClientMessage::ping()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Number of pings produced so far.
    pub fn pings_sent(&self) -> u64 {
        self.sent
    }
}

/// Record a `pong`. Replies carry no information we act on.
pub fn observe_pong() {
    log::trace!("pong received");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_at(start: Instant, expected: Duration) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(5),
            "expected tick at {expected:?}, got {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_ping_after_full_period() {
        let start = Instant::now();
        let mut heartbeat = Heartbeat::start(Duration::from_secs(30));

        let msg = heartbeat.tick().await;
        assert_eq!(msg, ClientMessage::ping());
        assert_at(start, Duration::from_secs(30));
        assert_eq!(heartbeat.pings_sent(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_ping_per_period() {
        let start = Instant::now();
        let mut heartbeat = Heartbeat::start(Duration::from_secs(30));

        for n in 1..=4u32 {
            heartbeat.tick().await;
            assert_at(start, Duration::from_secs(30) * n);
        }
        assert_eq!(heartbeat.pings_sent(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ping_before_period() {
        let mut heartbeat = Heartbeat::start(Duration::from_secs(30));
        let early = time::timeout(Duration::from_secs(29), heartbeat.tick()).await;
        assert!(early.is_err());
        assert_eq!(heartbeat.pings_sent(), 0);
    }

    #[tokio::test]
    async fn test_zero_period_clamped() {
        let heartbeat = Heartbeat::start(Duration::ZERO);
        assert_eq!(heartbeat.period(), Duration::from_millis(1));
    }
}

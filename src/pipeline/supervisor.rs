//! Connection supervision with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

/// Connection lifecycle as seen by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Doubling retry delay, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// The delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(5))
    }
}

/// Something that can open a connection to a job source.
pub trait Connector {
    type Connection;

    fn connect(&mut self) -> impl Future<Output = anyhow::Result<Self::Connection>>;
}

/// Keeps retrying a [`Connector`] until it yields a connection.
pub struct Supervisor<C: Connector> {
    connector: C,
    backoff: Backoff,
    state: ConnectionState,
    max_attempts: Option<u32>,
}

impl<C: Connector> Supervisor<C> {
    pub fn new(connector: C, backoff: Backoff) -> Self {
        Self {
            connector,
            backoff,
            state: ConnectionState::Disconnected,
            max_attempts: None,
        }
    }

    /// Give up after `attempts` consecutive failures instead of retrying forever.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Connect, sleeping with backoff between failed attempts.
    pub async fn connect(&mut self) -> anyhow::Result<C::Connection> {
        let mut failures = 0u32;
        loop {
            self.transition(ConnectionState::Connecting);
            match self.connector.connect().await {
                Ok(connection) => {
                    self.transition(ConnectionState::Connected);
                    self.backoff.reset();
                    return Ok(connection);
                }
                Err(e) => {
                    failures += 1;
                    self.transition(ConnectionState::Disconnected);
                    if self.max_attempts.is_some_and(|max| failures >= max) {
                        return Err(e.context(format!("giving up after {} attempts", failures)));
                    }
                    let delay = self.backoff.next_delay();
                    warn!(
                        error = %e,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Record that an established connection was lost.
    pub fn disconnected(&mut self) {
        self.transition(ConnectionState::Disconnected);
    }

    fn transition(&mut self, to: ConnectionState) {
        if self.state != to {
            info!(from = ?self.state, to = ?to, "connection state changed");
            self.state = to;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_initial_is_capped() {
        let mut backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    struct Flaky {
        failures_left: u32,
        attempts: u32,
    }

    impl Connector for Flaky {
        type Connection = u32;

        async fn connect(&mut self) -> anyhow::Result<u32> {
            self.attempts += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                anyhow::bail!("broker unavailable");
            }
            Ok(self.attempts)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_until_success() {
        let mut supervisor = Supervisor::new(
            Flaky {
                failures_left: 3,
                attempts: 0,
            },
            Backoff::default(),
        );
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);

        let started = tokio::time::Instant::now();
        let attempt = supervisor.connect().await.unwrap();
        assert_eq!(attempt, 4);
        assert_eq!(supervisor.state(), ConnectionState::Connected);
        // 500ms + 1s + 2s of backoff
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(3500) && waited < Duration::from_secs(4));

        supervisor.disconnected();
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up() {
        let mut supervisor = Supervisor::new(
            Flaky {
                failures_left: 10,
                attempts: 0,
            },
            Backoff::default(),
        )
        .with_max_attempts(2);

        let err = supervisor.connect().await.unwrap_err();
        assert!(format!("{:#}", err).contains("giving up after 2 attempts"));
        assert_eq!(supervisor.connector().attempts, 2);
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }
}

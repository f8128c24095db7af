use std::time::Duration;

use lms_core::model::ConnectionStatus;

/// What to do about the push channel after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconnect {
    After(Duration),
    /// Retry budget exhausted; wait for an explicit reconnect request.
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Polling fallback was just switched on.
    pub start_polling: bool,
    pub retry: Reconnect,
}

/// Connection state machine for the notification coordinator.
///
/// Pure bookkeeping: it decides statuses, backoff delays and when polling
/// starts or stops, but performs no I/O.
///
/// ```text
/// disconnected -> connecting -> connected
///                 connecting -> disconnected   (attempt failed, retry with backoff)
///                 connecting -> polling        (attempts >= polling threshold)
/// connected    -> connecting                   (channel dropped)
/// polling      -> connected                    (push recovered; polling stops)
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    status: ConnectionStatus,
    attempts: u32,
    polling: bool,
    polling_threshold: u32,
    max_attempts: u32,
    base_backoff: Duration,
}

impl ConnectionMachine {
    #[must_use]
    pub fn new(polling_threshold: u32, max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            attempts: 0,
            polling: false,
            polling_threshold,
            max_attempts,
            base_backoff,
        }
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.polling
    }

    /// A connect attempt is starting. An active fallback keeps reporting `Polling`.
    pub fn connecting(&mut self) {
        if !self.polling {
            self.status = ConnectionStatus::Connecting;
        }
    }

    /// The push channel opened. Returns `true` if polling must stop.
    pub fn connected(&mut self) -> bool {
        let was_polling = self.polling;
        self.status = ConnectionStatus::Connected;
        self.attempts = 0;
        self.polling = false;
        was_polling
    }

    /// A connect attempt failed.
    pub fn connect_failed(&mut self) -> Transition {
        let transition = self.schedule_retry();
        self.status = if self.polling {
            ConnectionStatus::Polling
        } else {
            ConnectionStatus::Disconnected
        };
        transition
    }

    /// An open channel dropped. Reconnection counts against the same budget.
    pub fn channel_closed(&mut self) -> Transition {
        let transition = self.schedule_retry();
        self.status = if self.polling {
            ConnectionStatus::Polling
        } else {
            ConnectionStatus::Connecting
        };
        transition
    }

    /// Start a fresh retry burst, e.g. after a manual reconnect request.
    pub fn reset_attempts(&mut self) {
        self.attempts = 0;
    }

    /// No push transport is configured.
    pub fn start_polling_only(&mut self) {
        self.polling = true;
        self.status = ConnectionStatus::Polling;
    }

    pub fn disconnect(&mut self) {
        self.polling = false;
        self.status = ConnectionStatus::Disconnected;
    }

    fn schedule_retry(&mut self) -> Transition {
        let delay = self.backoff(self.attempts);
        self.attempts = self.attempts.saturating_add(1);

        let start_polling = !self.polling && self.attempts >= self.polling_threshold;
        self.polling |= start_polling;

        let retry = if self.attempts >= self.max_attempts {
            Reconnect::GiveUp
        } else {
            Reconnect::After(delay)
        };
        Transition {
            start_polling,
            retry,
        }
    }

    // base * 2^attempt
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> ConnectionMachine {
        ConnectionMachine::new(3, 5, Duration::from_secs(1))
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let mut m = machine();
        let delays: Vec<_> = (0..4)
            .map(|_| {
                m.connecting();
                m.connect_failed().retry
            })
            .collect();
        assert_eq!(
            delays,
            vec![
                Reconnect::After(Duration::from_secs(1)),
                Reconnect::After(Duration::from_secs(2)),
                Reconnect::After(Duration::from_secs(4)),
                Reconnect::After(Duration::from_secs(8)),
            ]
        );
    }

    #[test]
    fn third_failure_starts_polling() {
        let mut m = machine();
        m.connecting();
        assert_eq!(m.status(), ConnectionStatus::Connecting);

        assert!(!m.connect_failed().start_polling);
        assert_eq!(m.status(), ConnectionStatus::Disconnected);
        m.connecting();
        assert!(!m.connect_failed().start_polling);
        m.connecting();
        assert!(m.connect_failed().start_polling);
        assert_eq!(m.status(), ConnectionStatus::Polling);

        m.connecting();
        assert_eq!(m.status(), ConnectionStatus::Polling);
        assert!(!m.connect_failed().start_polling);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut m = machine();
        for _ in 0..4 {
            assert!(matches!(m.connect_failed().retry, Reconnect::After(_)));
        }
        assert_eq!(m.connect_failed().retry, Reconnect::GiveUp);
        assert!(m.is_polling());

        m.reset_attempts();
        assert_eq!(
            m.connect_failed().retry,
            Reconnect::After(Duration::from_secs(1))
        );
    }

    #[test]
    fn recovery_stops_polling() {
        let mut m = machine();
        for _ in 0..3 {
            m.connect_failed();
        }
        assert!(m.connected());
        assert_eq!(m.status(), ConnectionStatus::Connected);
        assert!(!m.is_polling());
        assert_eq!(m.attempts(), 0);
        assert!(!m.connected());
    }

    #[test]
    fn drop_returns_to_connecting() {
        let mut m = machine();
        m.connected();
        let transition = m.channel_closed();
        assert_eq!(m.status(), ConnectionStatus::Connecting);
        assert_eq!(transition.retry, Reconnect::After(Duration::from_secs(1)));
        assert!(!transition.start_polling);
    }

    #[test]
    fn polling_only_mode() {
        let mut m = machine();
        m.start_polling_only();
        assert_eq!(m.status(), ConnectionStatus::Polling);
        m.disconnect();
        assert_eq!(m.status(), ConnectionStatus::Disconnected);
        assert!(!m.is_polling());
    }
}

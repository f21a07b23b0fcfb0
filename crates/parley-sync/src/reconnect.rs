use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub(crate) fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ReconnectPolicy {
    pub(crate) base: Duration,
    pub(crate) cap: Duration,
    pub(crate) max_retries: Option<u32>,
}

impl ReconnectPolicy {
    fn next_delay(&self, current: Duration) -> Duration {
        let doubled = current + current;
        if doubled > self.cap {
            self.cap
        } else {
            doubled
        }
    }
}

/// Tracks where the link is in its lifecycle and how long to wait before the
/// next attempt. Delays double per consecutive failure up to the cap and reset
/// once a connection sticks.
#[derive(Debug)]
pub(crate) struct ReconnectSchedule {
    policy: ReconnectPolicy,
    state: ConnectionState,
    delay: Duration,
    attempts: u32,
}

impl ReconnectSchedule {
    pub(crate) fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            delay: policy.base,
            attempts: 0,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn opening(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    pub(crate) fn opened(&mut self) {
        self.state = ConnectionState::Connected;
        self.delay = self.policy.base;
        self.attempts = 0;
    }

    /// Records a failed attempt or a dropped link. Returns how long to wait
    /// before trying again, or None once the retry ceiling is spent.
    pub(crate) fn retry_after_failure(&mut self) -> Option<Duration> {
        if let Some(max) = self.policy.max_retries {
            if self.attempts >= max {
                self.state = ConnectionState::Disconnected;
                return None;
            }
        }
        self.attempts += 1;
        self.state = ConnectionState::Reconnecting;
        let wait = self.delay;
        self.delay = self.policy.next_delay(self.delay);
        Some(wait)
    }

    pub(crate) fn shutdown(&mut self) {
        self.state = ConnectionState::Disconnected;
    }
}

use std::time::Duration;

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const IO_TIMEOUT: Duration = Duration::from_millis(1000);
/// Most controllers reset when the port is opened and need time to boot.
pub const SETTLE_DELAY: Duration = Duration::from_millis(2000);
pub const HANDSHAKE_WINDOW: Duration = Duration::from_millis(1000);
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const RECONNECT_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// Consecutive failed attempts before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    pub fn unbounded(delay: Duration) -> ReconnectPolicy {
        ReconnectPolicy {
            delay,
            max_attempts: None,
        }
    }

    pub fn bounded(delay: Duration, max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            delay,
            max_attempts: Some(max_attempts),
        }
    }

    pub fn allows(&self, consecutive_failures: u32) -> bool {
        match self.max_attempts {
            Some(max) => consecutive_failures < max,
            None => true,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::unbounded(RECONNECT_DELAY)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    pub baud_rate: u32,
    pub io_timeout: Duration,
    pub settle_delay: Duration,
    pub handshake_window: Duration,
    pub poll_interval: Duration,
    pub reconnect: ReconnectPolicy,
}

impl LinkConfig {
    pub fn with_baud_rate(baud_rate: u32) -> LinkConfig {
        LinkConfig {
            baud_rate,
            ..LinkConfig::default()
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            baud_rate: DEFAULT_BAUD_RATE,
            io_timeout: IO_TIMEOUT,
            settle_delay: SETTLE_DELAY,
            handshake_window: HANDSHAKE_WINDOW,
            poll_interval: POLL_INTERVAL,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

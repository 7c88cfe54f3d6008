use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

use crate::protocol::v3::types::Watch;

use super::reader::DEFAULT_MAX_LINE_LEN;

/// TCP port gpsd listens on unless configured otherwise
pub const DEFAULT_PORT: u16 = 2947;

/// How the client recovers from a lost or refused connection
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    /// Delay before the first retry; doubled after every failed attempt
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub initial_backoff: Duration,
    /// Ceiling for the retry delay
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_backoff: Duration,
}

impl ReconnectPolicy {
    /// Policy that gives up after the first lost connection
    pub fn disabled() -> Self {
        ReconnectPolicy {
            enabled: false,
            ..Default::default()
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            enabled: true,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Configuration for a [`GpsdClient`](super::GpsdClient)
///
/// Start from [`ClientOptions::default()`] and adjust with the builder
/// methods, or deserialize it from a config file; missing keys keep their
/// defaults.
///
/// ```
/// use std::time::Duration;
/// use gpsd_dispatch::client::ClientOptions;
///
/// let options = ClientOptions::default()
///     .pps(true)
///     .connect_timeout(Duration::from_secs(2))
///     .subscriber_capacity(32);
/// assert_eq!(options.watch.pps, Some(true));
/// ```
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Body of the `?WATCH` command sent on every new connection
    pub watch: Watch,
    pub reconnect: ReconnectPolicy,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub connect_timeout: Duration,
    /// Records buffered per subscriber before deliveries are dropped
    pub subscriber_capacity: usize,
    /// Lifecycle events buffered per observer
    pub event_capacity: usize,
    /// Longest accepted line in bytes
    pub max_line_len: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            watch: Watch::json(),
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(5),
            subscriber_capacity: 256,
            event_capacity: 64,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}

impl ClientOptions {
    /// Enables or disables PPS (Pulse Per Second) sentences
    pub fn pps(mut self, enable: bool) -> Self {
        self.watch.pps = Some(enable);
        self
    }

    /// Enables or disables TOFF/PPS timing sentences
    pub fn timing(mut self, enable: bool) -> Self {
        self.watch.timing = Some(enable);
        self
    }

    /// Enables or disables scaled output
    pub fn scaled(mut self, enable: bool) -> Self {
        self.watch.scaled = Some(enable);
        self
    }

    /// Restricts the watch to one device
    ///
    /// # Arguments
    /// * `device` - Path to the GPS device (e.g., "/dev/ttyUSB0")
    pub fn device<S: AsRef<str>>(mut self, device: S) -> Self {
        self.watch.device = Some(device.as_ref().into());
        self
    }

    /// Replaces the reconnect policy
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Sets the retry delays, keeping reconnection enabled
    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect.enabled = true;
        self.reconnect.initial_backoff = initial;
        self.reconnect.max_backoff = max.max(initial);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn subscriber_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_capacity = capacity.max(1);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn max_line_len(mut self, len: usize) -> Self {
        self.max_line_len = len;
        self
    }
}

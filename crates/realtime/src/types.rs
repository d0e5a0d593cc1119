//! Public types for the realtime connection manager.

use std::time::Duration;

use serde::Serialize;

use geoqueue_protocol::constants::{
    CLOSE_NORMAL, HEARTBEAT_INTERVAL, MAX_RECONNECT_ATTEMPTS, PONG_TIMEOUT, RECONNECT_BASE_DELAY,
    RECONNECT_MAX_DELAY, WS_MAX_MESSAGE_SIZE,
};

/// Lifecycle state of the physical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel, or the last one closed.
    Disconnected,
    /// Handshake in flight.
    Connecting,
    /// Open and dispatching frames.
    Open,
    /// Closed locally, waiting for the old channel to wind down.
    Closing,
}

/// Coarse connection status for UI observers (banner, indicators).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Nobody holds a reference; no channel is wanted.
    Offline,
    Connecting,
    Online,
    /// Waiting for a backoff delay before the next attempt.
    Reconnecting { attempt: u32, next_retry_secs: f64 },
    /// Reconnect attempts exhausted. Persists until the next `connect()`.
    Lost,
}

/// How a channel ended.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseInfo {
    /// Close code, `None` when the stream died without a close frame.
    pub code: Option<u16>,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            reason: reason.into(),
        }
    }

    /// Channel dropped without a close handshake.
    pub fn lost(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
        }
    }

    /// Anything other than a normal close is retried.
    pub fn is_abnormal(&self) -> bool {
        self.code != Some(CLOSE_NORMAL)
    }
}

/// Channel-level events, delivered through the router's lifecycle
/// subscription surface.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected {
        code: Option<u16>,
        reason: String,
        will_reconnect: bool,
    },
    Reconnecting {
        attempt: u32,
        next_retry_secs: f64,
    },
    MaxReconnectAttemptsReached {
        attempts: u32,
    },
    /// Transport error (handshake failure, malformed endpoint).
    Error {
        message: String,
    },
}

/// Discriminant of [`ConnectionEvent`], used to filter lifecycle
/// subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleKind {
    Connected,
    Disconnected,
    Reconnecting,
    MaxReconnectAttemptsReached,
    Error,
}

impl ConnectionEvent {
    pub fn kind(&self) -> LifecycleKind {
        match self {
            ConnectionEvent::Connected => LifecycleKind::Connected,
            ConnectionEvent::Disconnected { .. } => LifecycleKind::Disconnected,
            ConnectionEvent::Reconnecting { .. } => LifecycleKind::Reconnecting,
            ConnectionEvent::MaxReconnectAttemptsReached { .. } => {
                LifecycleKind::MaxReconnectAttemptsReached
            }
            ConnectionEvent::Error { .. } => LifecycleKind::Error,
        }
    }
}

/// Configuration for automatic reconnection with exponential backoff.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: RECONNECT_BASE_DELAY,
            max_delay: RECONNECT_MAX_DELAY,
            backoff_factor: 2.0,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ReconnectConfig {
    /// Delay for a given attempt number (1-based):
    /// `min(initial × factor^(attempt−1), max)`.
    ///
    /// Deterministic on purpose: observers show the exact countdown.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

/// Application-level keepalive timing.
#[derive(Debug, Clone)]
pub struct KeepaliveConfig {
    /// Interval between `ping` frames.
    pub interval: Duration,
    /// Deadline for the `pong` that answers a ping.
    pub pong_timeout: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: HEARTBEAT_INTERVAL,
            pong_timeout: PONG_TIMEOUT,
        }
    }
}

/// Everything the [`ConnectionManager`](crate::ConnectionManager) needs to
/// reach one endpoint.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// WebSocket endpoint (`ws://` or `wss://`).
    pub url: String,
    pub reconnect: ReconnectConfig,
    pub keepalive: KeepaliveConfig,
    /// Frames larger than this are dropped unread.
    pub max_message_size: usize,
}

impl ManagerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            keepalive: KeepaliveConfig::default(),
            max_message_size: WS_MAX_MESSAGE_SIZE,
        }
    }
}

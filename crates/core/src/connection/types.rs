//! Types for the connection client.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::ControlConfig;

/// State of the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connect request received yet.
    Waiting,
    /// Socket opening or handshake in flight.
    Connecting,
    /// Subscribe request sent, heartbeat running.
    Subscribed,
    /// Socket lost, reconnect scheduled.
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Waiting => "waiting",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Subscribed => "subscribed",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A remote request to take a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakeCaptureCommand {
    pub instance_id: String,
    pub session_id: String,
    pub user_id: String,
    pub tag: String,
}

/// Notifications delivered to the subscriber of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionNotice {
    /// Subscribe request sent; the channel is usable.
    Ready { url: String },
    /// A take-capture command arrived.
    TakeCapture(TakeCaptureCommand),
}

/// Parameters of a `Connect` request, cached for reconnects.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub url: String,
    pub token: String,
    pub org_id: String,
    pub subscriber: mpsc::UnboundedSender<ConnectionNotice>,
}

/// Timing of the connection client.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionTiming {
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
}

impl Default for ConnectionTiming {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(3),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl From<&ControlConfig> for ConnectionTiming {
    fn from(config: &ControlConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
        }
    }
}

/// Events reported by a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Closed(String),
}

/// Messages processed by the connection client's loop.
#[derive(Debug)]
pub enum ConnectionMsg {
    Connect(ConnectParams),
    /// Socket event from the connection attempt `generation`.
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    HeartbeatTick {
        generation: u64,
    },
    ReconnectTick {
        generation: u64,
    },
    Shutdown,
}

//! Connection to the remote control service.
//!
//! This module provides the `ConnectionClient`, a reconnecting state machine
//! that:
//! - Opens the control socket and sends an authenticated subscribe request
//! - Keeps the channel alive with a heartbeat while subscribed
//! - Reconnects after a fixed delay whenever the socket closes
//! - Forwards take-capture commands to its subscriber
//!
//! # Example
//!
//! ```ignore
//! use snap_core::connection::{ConnectionClient, ConnectionTiming, ConnectParams, WebSocketConnector};
//!
//! let (handle, client) = ConnectionClient::new(Arc::new(WebSocketConnector::new()), ConnectionTiming::default());
//! tokio::spawn(client.run());
//!
//! let (subscriber, mut notices) = tokio::sync::mpsc::unbounded_channel();
//! handle.connect(ConnectParams { url, token, org_id, subscriber });
//!
//! while let Some(notice) = notices.recv().await {
//!     println!("{:?}", notice);
//! }
//! ```

mod client;
mod protocol;
mod timer;
mod transport;
mod types;
mod websocket;

pub use client::{ConnectionClient, ConnectionHandle};
pub use protocol::{
    parse_frame, subscribe_path, ControlRequest, ProtocolError, EVENT_PREFIX, HEARTBEAT_FRAME,
    REQUEST_PREFIX, TAKE_CAPTURE_TYPE,
};
pub use timer::TimerHandle;
pub use transport::{Connector, SocketHandle, TransportEvents};
pub use types::{
    ConnectParams, ConnectionMsg, ConnectionNotice, ConnectionState, ConnectionTiming,
    TakeCaptureCommand, TransportEvent,
};
pub use websocket::WebSocketConnector;

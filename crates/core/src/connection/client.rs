//! Reconnecting client for the control channel.
//!
//! The client is a single task consuming one inbox. Socket events, timer
//! firings and requests from the application all arrive as messages, so the
//! state machine is never re-entered.
//!
//! ```text
//! Waiting --Connect--> Connecting --Opened/subscribe--> Subscribed
//!                         ^   |                            |
//!                         |   +--------Closed--------+     |
//!                  ReconnectTick                     v     |
//!                         +-------------------- Disconnected <--Closed
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::metrics;

use super::protocol::{parse_frame, ControlRequest, HEARTBEAT_FRAME};
use super::timer::TimerHandle;
use super::transport::{Connector, SocketHandle, TransportEvents};
use super::types::{
    ConnectParams, ConnectionMsg, ConnectionNotice, ConnectionState, ConnectionTiming,
    TransportEvent,
};

/// Handle for driving a [`ConnectionClient`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<ConnectionMsg>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    /// Asks the client to connect; ignored unless it is still waiting.
    pub fn connect(&self, params: ConnectParams) {
        if self.tx.send(ConnectionMsg::Connect(params)).is_err() {
            warn!("Connection client is not running, connect request dropped");
        }
    }

    /// Stops the client, closing the socket and canceling timers.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ConnectionMsg::Shutdown);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

/// The control channel state machine.
pub struct ConnectionClient<C: Connector> {
    connector: Arc<C>,
    timing: ConnectionTiming,
    inbox_tx: mpsc::UnboundedSender<ConnectionMsg>,
    inbox: mpsc::UnboundedReceiver<ConnectionMsg>,
    state_tx: watch::Sender<ConnectionState>,
    state: ConnectionState,
    params: Option<ConnectParams>,
    /// Bumped on every connect attempt; events from older attempts are stale.
    generation: u64,
    socket: Option<SocketHandle>,
    heartbeat: Option<TimerHandle>,
    reconnect: Option<TimerHandle>,
}

impl<C: Connector> ConnectionClient<C> {
    /// Creates the client and its handle. Spawn `client.run()` to start it.
    pub fn new(connector: Arc<C>, timing: ConnectionTiming) -> (ConnectionHandle, Self) {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Waiting);

        let handle = ConnectionHandle {
            tx: inbox_tx.clone(),
            state: state_rx,
        };

        let client = Self {
            connector,
            timing,
            inbox_tx,
            inbox,
            state_tx,
            state: ConnectionState::Waiting,
            params: None,
            generation: 0,
            socket: None,
            heartbeat: None,
            reconnect: None,
        };

        (handle, client)
    }

    /// Processes messages until shut down.
    pub async fn run(mut self) {
        info!("Connection client started");

        while let Some(msg) = self.inbox.recv().await {
            match msg {
                ConnectionMsg::Connect(params) => self.on_connect(params),
                ConnectionMsg::Transport { generation, event } => {
                    if generation != self.generation {
                        debug!(
                            "Ignoring {:?} from stale socket (generation {}, current {})",
                            event, generation, self.generation
                        );
                        continue;
                    }
                    self.on_transport(event);
                }
                ConnectionMsg::HeartbeatTick { generation } => self.on_heartbeat(generation),
                ConnectionMsg::ReconnectTick { generation } => self.on_reconnect(generation),
                ConnectionMsg::Shutdown => break,
            }
        }

        self.cancel_timers();
        self.dispose_socket();
        info!("Connection client stopped");
    }

    fn on_connect(&mut self, params: ConnectParams) {
        if self.state != ConnectionState::Waiting {
            warn!(
                "Ignoring connect request while {} (already connected once)",
                self.state
            );
            return;
        }

        self.params = Some(params);
        self.enter_connecting();
    }

    fn on_transport(&mut self, event: TransportEvent) {
        match (self.state, event) {
            (ConnectionState::Connecting, TransportEvent::Opened) => self.subscribe(),
            (
                ConnectionState::Connecting | ConnectionState::Subscribed,
                TransportEvent::Message(text),
            ) => self.on_frame(&text),
            (
                ConnectionState::Connecting | ConnectionState::Subscribed,
                TransportEvent::Closed(reason),
            ) => {
                info!("Control socket closed while {}: {}", self.state, reason);
                self.enter_disconnected();
            }
            (state, event) => debug!("Ignoring {:?} while {}", event, state),
        }
    }

    fn on_heartbeat(&mut self, generation: u64) {
        // A tick may already be queued when the state changes.
        if self.state != ConnectionState::Subscribed || generation != self.generation {
            return;
        }

        if let Some(socket) = &self.socket {
            if !socket.send(HEARTBEAT_FRAME) {
                warn!("Could not send heartbeat");
            }
        }
    }

    fn on_reconnect(&mut self, generation: u64) {
        if self.state != ConnectionState::Disconnected || generation != self.generation {
            return;
        }

        info!("Reconnecting control channel");
        self.enter_connecting();
    }

    fn on_frame(&mut self, text: &str) {
        match parse_frame(text) {
            Ok(Some(command)) => {
                metrics::COMMANDS_RECEIVED.inc();
                info!(
                    "Take-capture received for instance {} (session {}, tag {})",
                    command.instance_id, command.session_id, command.tag
                );
                if let Some(params) = &self.params {
                    if params
                        .subscriber
                        .send(ConnectionNotice::TakeCapture(command))
                        .is_err()
                    {
                        warn!("Subscriber is gone, dropping take-capture command");
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                metrics::FRAMES_DROPPED.inc();
                warn!("Dropping malformed frame: {} ({})", e, text);
            }
        }
    }

    fn enter_connecting(&mut self) {
        let Some(params) = self.params.clone() else {
            warn!("No connection parameters cached, staying {}", self.state);
            return;
        };

        self.cancel_timers();
        self.dispose_socket();

        self.generation += 1;
        self.set_state(ConnectionState::Connecting);
        metrics::CONNECTION_ATTEMPTS.inc();

        info!(
            "Connecting to {} (attempt generation {})",
            params.url, self.generation
        );
        let events = TransportEvents::new(self.generation, self.inbox_tx.clone());
        self.socket = Some(self.connector.connect(&params.url, events));
    }

    fn subscribe(&mut self) {
        let Some(params) = self.params.clone() else {
            return;
        };

        let frame = ControlRequest::subscribe(&params.org_id, &params.token).to_frame();
        let sent = self.socket.as_ref().is_some_and(|s| s.send(frame));
        if !sent {
            // The close event that follows will drive the reconnect.
            warn!("Could not send subscribe request");
        }

        // No acknowledgment is awaited for the subscribe request.
        self.set_state(ConnectionState::Subscribed);
        metrics::SUBSCRIPTIONS.inc();

        let generation = self.generation;
        self.heartbeat = Some(TimerHandle::repeating(
            self.timing.heartbeat_interval,
            self.inbox_tx.clone(),
            move || ConnectionMsg::HeartbeatTick { generation },
        ));

        info!("Subscribed to events for organization {}", params.org_id);
        if params
            .subscriber
            .send(ConnectionNotice::Ready {
                url: params.url.clone(),
            })
            .is_err()
        {
            warn!("Subscriber is gone, ready notice dropped");
        }
    }

    fn enter_disconnected(&mut self) {
        self.cancel_timers();
        self.dispose_socket();
        self.set_state(ConnectionState::Disconnected);

        info!(
            "Scheduling reconnect in {}ms",
            self.timing.reconnect_delay.as_millis()
        );
        self.reconnect = Some(TimerHandle::once(
            self.timing.reconnect_delay,
            self.inbox_tx.clone(),
            ConnectionMsg::ReconnectTick {
                generation: self.generation,
            },
        ));
    }

    fn cancel_timers(&mut self) {
        if let Some(mut timer) = self.heartbeat.take() {
            timer.cancel();
        }
        if let Some(mut timer) = self.reconnect.take() {
            timer.cancel();
        }
    }

    fn dispose_socket(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.close();
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        debug!("Connection state {} -> {}", self.state, state);
        self.state = state;
        self.state_tx.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnector;
    use std::time::Duration;

    fn timing() -> ConnectionTiming {
        ConnectionTiming {
            heartbeat_interval: Duration::from_secs(3),
            reconnect_delay: Duration::from_secs(5),
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn start() -> (
        ConnectionHandle,
        MockConnector,
        mpsc::UnboundedReceiver<ConnectionNotice>,
    ) {
        let connector = MockConnector::new();
        let (handle, client) = ConnectionClient::new(Arc::new(connector.clone()), timing());
        tokio::spawn(client.run());

        let (subscriber, notices) = mpsc::unbounded_channel();
        handle.connect(ConnectParams {
            url: "ws://control.test/socket".to_string(),
            token: "tok".to_string(),
            org_id: "org1".to_string(),
            subscriber,
        });
        (handle, connector, notices)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_opens_socket() {
        let (handle, connector, _notices) = start();
        settle().await;

        assert_eq!(handle.state(), ConnectionState::Connecting);
        assert_eq!(connector.attempts(), 1);
        assert_eq!(connector.url(0).as_deref(), Some("ws://control.test/socket"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_sends_subscribe_and_notifies_ready() {
        let (handle, connector, mut notices) = start();
        settle().await;

        connector.open(0);
        settle().await;

        assert_eq!(handle.state(), ConnectionState::Subscribed);
        let frames = connector.sent(0);
        assert!(frames[0].contains("/v1/org/org1/snap/subscribe"));
        assert!(frames[0].contains("Bearer tok"));
        assert_eq!(
            notices.try_recv().ok(),
            Some(ConnectionNotice::Ready {
                url: "ws://control.test/socket".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_connect_is_ignored() {
        let (handle, connector, _notices) = start();
        settle().await;

        let (subscriber, _rx) = mpsc::unbounded_channel();
        handle.connect(ConnectParams {
            url: "ws://other".to_string(),
            token: "x".to_string(),
            org_id: "x".to_string(),
            subscriber,
        });
        settle().await;

        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_keeps_connection() {
        let (handle, connector, mut notices) = start();
        settle().await;
        connector.open(0);
        settle().await;
        let _ready = notices.try_recv();

        connector.deliver(0, r#"42["message",{"type":]"#);
        connector.deliver(0, "40");
        settle().await;

        assert_eq!(handle.state(), ConnectionState::Subscribed);
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_socket() {
        let (handle, connector, _notices) = start();
        settle().await;
        connector.open(0);
        settle().await;

        handle.shutdown();
        settle().await;

        let frames_before = connector.sent(0).len();
        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(connector.sent(0).len(), frames_before);
        assert_eq!(connector.attempts(), 1);
    }
}

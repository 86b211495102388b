//! Socket seam between the connection client and the network.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::types::{ConnectionMsg, TransportEvent};

/// Opens sockets on behalf of the connection client.
///
/// Implementations must report every outcome through `events`; a failed
/// connect is reported as `Closed`, never returned to the caller.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str, events: TransportEvents) -> SocketHandle;
}

/// Reports socket events into the connection client's inbox, tagged with the
/// attempt they belong to.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<ConnectionMsg>,
}

impl TransportEvents {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<ConnectionMsg>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn opened(&self) {
        self.emit(TransportEvent::Opened);
    }

    pub fn message(&self, text: impl Into<String>) {
        self.emit(TransportEvent::Message(text.into()));
    }

    pub fn closed(&self, reason: impl Into<String>) {
        self.emit(TransportEvent::Closed(reason.into()));
    }

    fn emit(&self, event: TransportEvent) {
        // The client going away means nobody cares about this socket anymore.
        let _ = self.tx.send(ConnectionMsg::Transport {
            generation: self.generation,
            event,
        });
    }
}

/// Owned handle to an open (or opening) socket.
#[derive(Debug)]
pub struct SocketHandle {
    outbound: mpsc::UnboundedSender<String>,
    task: Option<JoinHandle<()>>,
}

impl SocketHandle {
    /// `task` is the I/O task driving the socket, if any; it is aborted on close.
    pub fn new(outbound: mpsc::UnboundedSender<String>, task: Option<JoinHandle<()>>) -> Self {
        Self { outbound, task }
    }

    /// Queues a text frame. Returns false if the socket is gone.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        self.outbound.send(frame.into()).is_ok()
    }

    /// Tears the socket down. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        self.close();
    }
}

//! Mock socket connector for testing.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::connection::{Connector, SocketHandle, TransportEvents};

/// One `connect` call and the socket it produced.
#[derive(Debug)]
struct Attempt {
    url: String,
    events: TransportEvents,
    outbound: mpsc::UnboundedReceiver<String>,
    sent: Vec<String>,
}

impl Attempt {
    fn drain(&mut self) {
        while let Ok(frame) = self.outbound.try_recv() {
            self.sent.push(frame);
        }
    }
}

/// Mock implementation of the Connector trait.
///
/// Every `connect` is recorded as an attempt, indexed from 0. Tests play the
/// server side of each attempt by hand:
/// - `open(i)` / `close(i, reason)` report transport events
/// - `deliver(i, text)` pushes an inbound frame
/// - `sent(i)` returns every frame the client wrote to that socket
///
/// Events for an old attempt still carry that attempt's generation, which is
/// how stale socket events are simulated.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    attempts: Arc<Mutex<Vec<Attempt>>>,
}

impl MockConnector {
    /// Create a new mock connector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `connect` calls so far.
    pub fn attempts(&self) -> usize {
        self.lock().len()
    }

    /// URL passed to attempt `i`.
    pub fn url(&self, i: usize) -> Option<String> {
        self.lock().get(i).map(|a| a.url.clone())
    }

    /// Generation the client assigned to attempt `i`.
    pub fn generation(&self, i: usize) -> Option<u64> {
        self.lock().get(i).map(|a| a.events.generation())
    }

    /// Reports attempt `i` as open.
    pub fn open(&self, i: usize) {
        self.with_attempt(i, |a| a.events.opened());
    }

    /// Pushes an inbound text frame on attempt `i`.
    pub fn deliver(&self, i: usize, text: &str) {
        self.with_attempt(i, |a| a.events.message(text));
    }

    /// Reports attempt `i` as closed (or failed to connect).
    pub fn close(&self, i: usize, reason: &str) {
        self.with_attempt(i, |a| a.events.closed(reason));
    }

    /// Frames written by the client on attempt `i`, oldest first.
    pub fn sent(&self, i: usize) -> Vec<String> {
        let mut attempts = self.lock();
        match attempts.get_mut(i) {
            Some(attempt) => {
                attempt.drain();
                attempt.sent.clone()
            }
            None => Vec::new(),
        }
    }

    fn with_attempt(&self, i: usize, f: impl FnOnce(&Attempt)) {
        let attempts = self.lock();
        let attempt = attempts
            .get(i)
            .unwrap_or_else(|| panic!("no connect attempt {}", i));
        f(attempt);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Attempt>> {
        self.attempts.lock().expect("mock connector lock poisoned")
    }
}

impl Connector for MockConnector {
    fn connect(&self, url: &str, events: TransportEvents) -> SocketHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(Attempt {
            url: url.to_string(),
            events,
            outbound: rx,
            sent: Vec::new(),
        });
        SocketHandle::new(tx, None)
    }
}

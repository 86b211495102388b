//! WebSocket implementation of [`Connector`].

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::transport::{Connector, SocketHandle, TransportEvents};

/// Connects with `tokio-tungstenite`.
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self, url: &str, events: TransportEvents) -> SocketHandle {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(url.to_string(), events, outbound_rx));
        SocketHandle::new(outbound_tx, Some(task))
    }
}

async fn run_socket(
    url: String,
    events: TransportEvents,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    info!("Opening control socket to {}", url);

    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            warn!("Control socket connect failed: {}", e);
            events.closed(e.to_string());
            return;
        }
    };

    events.opened();
    let (mut sink, mut source) = stream.split();

    let reason = loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    break "client dropped socket".to_string();
                };
                if let Err(e) = sink.send(Message::Text(frame.clone())).await {
                    warn!("Could not send frame {}: {}", frame, e);
                    break e.to_string();
                }
            }
            incoming = source.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => events.message(text),
                    Some(Ok(Message::Close(close))) => {
                        break close
                            .map(|c| format!("{} {}", c.code, c.reason))
                            .unwrap_or_else(|| "closed by peer".to_string());
                    }
                    Some(Ok(other)) => debug!("Ignoring non-text frame: {:?}", other),
                    Some(Err(e)) => break e.to_string(),
                    None => break "stream ended".to_string(),
                }
            }
        }
    };

    info!("Control socket closed: {}", reason);
    events.closed(reason);
}

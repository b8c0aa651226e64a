//! Transport abstraction: a [`Connector`] opens a [`TransportLink`], a pair of
//! channels carrying text frames out and [`TransportEvent`]s in.
//!
//! The WebSocket implementation runs one writer pump and one reader pump per
//! link. Dropping the link closes the socket.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::ConnectionError;

/// What a link reports back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text frame.
    Frame(String),
    /// The remote side closed the link.
    Closed { reason: Option<String> },
    /// The link broke.
    Failed(String),
}

/// An open transport connection.
#[derive(Debug)]
pub struct TransportLink {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportLink {
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { outbound, inbound }
    }

    /// Queue one text frame for the writer. `false` if the writer is gone.
    pub fn send(&self, text: String) -> bool {
        self.outbound.send(text).is_ok()
    }

    /// Next event from the link. A vanished reader counts as a close.
    pub async fn recv(&mut self) -> TransportEvent {
        self.inbound
            .recv()
            .await
            .unwrap_or(TransportEvent::Closed { reason: None })
    }
}

/// Opens transport links to a URL.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, url: &str) -> Result<TransportLink, ConnectionError>;
}

/// `ws://` / `wss://` transport built on tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &str) -> Result<TransportLink, ConnectionError> {
        let (stream, _response) =
            connect_async(url)
                .await
                .map_err(|e| ConnectionError::Open {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

        info!(url = %url, "WebSocket handshake complete");

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // Writer pump: ends when the link owner drops its sender.
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::text(text)).await {
                    warn!(error = %e, "WebSocket write failed");
                    return;
                }
            }
            if let Err(e) = sink.close().await {
                debug!(error = %e, "WebSocket close after link drop failed");
            }
        });

        // Reader pump: ends on close, error, or when the owner stops listening.
        tokio::spawn(async move {
            while let Some(item) = source.next().await {
                let event = match item {
                    Ok(Message::Text(text)) => TransportEvent::Frame(text.as_str().to_owned()),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => TransportEvent::Frame(text),
                        Err(_) => {
                            debug!(len = bytes.len(), "Ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_owned())
                            .filter(|r| !r.is_empty());
                        let _ = in_tx.send(TransportEvent::Closed { reason });
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = in_tx.send(TransportEvent::Failed(e.to_string()));
                        return;
                    }
                };
                if in_tx.send(event).is_err() {
                    return;
                }
            }
            let _ = in_tx.send(TransportEvent::Closed { reason: None });
        });

        Ok(TransportLink::new(out_tx, in_rx))
    }
}

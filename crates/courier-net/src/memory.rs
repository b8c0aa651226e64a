//! In-process transport for tests and embedding.
//!
//! Each successful [`MemoryConnector::open`] creates a [`MemoryPeer`] that
//! plays the remote endpoint. Failures and open latency are scripted through
//! the connector handle.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use courier_shared::protocol::Frame;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use crate::error::ConnectionError;
use crate::transport::{Connector, TransportEvent, TransportLink};

#[derive(Debug, Default)]
struct Script {
    fail_next: u32,
    refuse_all: bool,
    open_delay: Duration,
    attempts: Vec<Instant>,
    peers: VecDeque<MemoryPeer>,
}

#[derive(Debug, Default)]
struct Shared {
    script: Mutex<Script>,
    accepted: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` open attempts fail.
    pub fn fail_next(&self, n: u32) {
        self.shared.lock().fail_next = n;
    }

    /// Refuse every open attempt until switched off.
    pub fn refuse_all(&self, refuse: bool) {
        self.shared.lock().refuse_all = refuse;
    }

    /// Latency applied to every open attempt.
    pub fn set_open_delay(&self, delay: Duration) {
        self.shared.lock().open_delay = delay;
    }

    pub fn attempt_count(&self) -> usize {
        self.shared.lock().attempts.len()
    }

    /// When each open attempt started.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.shared.lock().attempts.clone()
    }

    /// Wait for the next successfully opened link and return its remote end.
    pub async fn accept(&self) -> MemoryPeer {
        loop {
            let notified = self.shared.accepted.notified();
            if let Some(peer) = self.shared.lock().peers.pop_front() {
                return peer;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, url: &str) -> Result<TransportLink, ConnectionError> {
        let delay = {
            let mut script = self.shared.lock();
            script.attempts.push(Instant::now());
            script.open_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        {
            let mut script = self.shared.lock();
            if script.refuse_all || script.fail_next > 0 {
                script.fail_next = script.fail_next.saturating_sub(1);
                return Err(ConnectionError::Open {
                    url: url.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            to_client: in_tx,
            from_client: out_rx,
        };
        self.shared.lock().peers.push_back(peer);
        self.shared.accepted.notify_waiters();

        Ok(TransportLink::new(out_tx, in_rx))
    }
}

/// The remote end of one in-memory link.
#[derive(Debug)]
pub struct MemoryPeer {
    to_client: mpsc::UnboundedSender<TransportEvent>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    pub fn push(&self, frame: &Frame) -> bool {
        match frame.to_json() {
            Ok(text) => self.push_text(text),
            Err(_) => false,
        }
    }

    pub fn push_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(TransportEvent::Frame(text.into())).is_ok()
    }

    /// Close the link from the remote side.
    pub fn close(self, reason: Option<&str>) {
        let _ = self.to_client.send(TransportEvent::Closed {
            reason: reason.map(str::to_owned),
        });
    }

    /// Break the link as if the network dropped.
    pub fn fail(self, reason: &str) {
        let _ = self.to_client.send(TransportEvent::Failed(reason.to_owned()));
    }

    /// Next text frame written by the client, or `None` once it hung up.
    pub async fn next_text(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next frame written by the client, decoded.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        let text = self.next_text().await?;
        Frame::parse(&text).ok()
    }

    /// Stop reading what the client writes without closing the link, like a
    /// half-open socket. Later client writes fail.
    pub fn stop_reading(&mut self) {
        self.from_client.close();
    }

    pub fn try_next_text(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }
}

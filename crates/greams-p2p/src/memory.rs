//! In-process transport.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::transport::{Connection, ConnectionEvent, Incoming, Transport};
use crate::{P2pError, PeerId, Result};

/// A set of peers that can reach each other inside one process.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    peers: Arc<Mutex<HashMap<PeerId, mpsc::UnboundedSender<Connection>>>>,
}

impl MemoryNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `local` and returns its transport and inbound connections.
    pub fn join(&self, local: PeerId) -> (MemoryTransport, Incoming) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.lock().insert(local.clone(), tx);
        (
            MemoryTransport {
                local,
                network: self.clone(),
            },
            rx,
        )
    }
}

/// Transport endpoint of one peer on a [`MemoryNetwork`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    local: PeerId,
    network: MemoryNetwork,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn opened(&self) -> Result<()> {
        Ok(())
    }

    async fn connect(&self, remote: &PeerId) -> Result<Connection> {
        let incoming = self
            .network
            .peers
            .lock()
            .get(remote)
            .cloned()
            .ok_or_else(|| P2pError::PeerNotFound(remote.to_string()))?;

        let (ours, theirs) = connection_pair(self.local.clone(), remote.clone());
        incoming
            .send(theirs)
            .map_err(|_| P2pError::PeerNotFound(remote.to_string()))?;

        debug!(local = %self.local.short_id(), remote = %remote.short_id(), "Memory connection opened");
        Ok(ours)
    }
}

/// Creates two connected ends: the first is `a`'s view of `b`, the second
/// is `b`'s view of `a`. Both report [`ConnectionEvent::Open`] immediately.
///
/// Must be called from within a tokio runtime.
pub fn connection_pair(a: PeerId, b: PeerId) -> (Connection, Connection) {
    let (a_out, a_out_rx) = mpsc::unbounded_channel();
    let (b_out, b_out_rx) = mpsc::unbounded_channel();
    let (a_events, a_events_rx) = mpsc::unbounded_channel();
    let (b_events, b_events_rx) = mpsc::unbounded_channel();

    let _ = a_events.send(ConnectionEvent::Open);
    let _ = b_events.send(ConnectionEvent::Open);

    tokio::spawn(forward(a_out_rx, b_events));
    tokio::spawn(forward(b_out_rx, a_events));

    (
        Connection {
            remote: b,
            outbound: a_out,
            events: a_events_rx,
        },
        Connection {
            remote: a,
            outbound: b_out,
            events: b_events_rx,
        },
    )
}

async fn forward(
    mut outbound: mpsc::UnboundedReceiver<crate::Message>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    while let Some(message) = outbound.recv().await {
        if events.send(ConnectionEvent::Message(message)).is_err() {
            return;
        }
    }
    let _ = events.send(ConnectionEvent::Closed);
}

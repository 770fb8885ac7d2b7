//! Interface to the underlying peer connections.
//!
//! Connection establishment (signaling, NAT traversal, the data channel
//! itself) lives behind [`Transport`]. A link only needs an ordered outbound
//! message queue and an ordered stream of [`ConnectionEvent`]s.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{Message, PeerId, Result};

/// Something that happened on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection is open and may carry messages.
    Open,
    /// A message arrived.
    Message(Message),
    /// The transport reported an error. The connection may still be usable.
    Error(String),
    /// The connection is gone.
    Closed,
}

/// One established (or establishing) connection to a remote peer.
#[derive(Debug)]
pub struct Connection {
    /// Identity declared by the remote side.
    pub remote: PeerId,
    /// Messages queued here are delivered to the remote in order.
    pub outbound: mpsc::UnboundedSender<Message>,
    /// Events observed on the connection, in order.
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

/// Receiving end of a transport's inbound connections.
pub type Incoming = mpsc::UnboundedReceiver<Connection>;

/// A way to reach other peers.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Resolves once the local endpoint is registered and can connect.
    async fn opened(&self) -> Result<()>;

    /// Starts a connection to `remote`.
    ///
    /// The returned connection emits [`ConnectionEvent::Open`] once it can
    /// carry messages.
    async fn connect(&self, remote: &PeerId) -> Result<Connection>;
}

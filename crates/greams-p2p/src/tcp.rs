//! TCP transport with a static peer directory.
//!
//! Each message is one length-delimited JSON frame. The first frame in each
//! direction is a hello carrying the sender's identity.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use crate::transport::{Connection, ConnectionEvent, Incoming, Transport};
use crate::{Message, P2pError, PeerId, Result};

/// Largest accepted frame; bodies travel base64-encoded inside one frame.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

type FramedStream = Framed<TcpStream, LengthDelimitedCodec>;

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    identity: PeerId,
}

/// Transport over plain TCP connections.
#[derive(Debug)]
pub struct TcpTransport {
    local: PeerId,
    local_addr: SocketAddr,
    directory: HashMap<PeerId, SocketAddr>,
}

impl TcpTransport {
    /// Listens on `listen_addr` and returns the transport with its inbound
    /// connections. `directory` maps the peers this node may dial.
    pub async fn bind(
        local: PeerId,
        listen_addr: SocketAddr,
        directory: HashMap<PeerId, SocketAddr>,
    ) -> Result<(Self, Incoming)> {
        let listener = TcpListener::bind(listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(listen(listener, local.clone(), tx));
        info!(identity = %local, addr = %local_addr, "TCP transport listening");
        Ok((
            Self {
                local,
                local_addr,
                directory,
            },
            rx,
        ))
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn opened(&self) -> Result<()> {
        Ok(())
    }

    async fn connect(&self, remote: &PeerId) -> Result<Connection> {
        let addr = self
            .directory
            .get(remote)
            .copied()
            .ok_or_else(|| P2pError::PeerNotFound(remote.to_string()))?;

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| P2pError::Connection(format!("{addr}: {e}")))?;
        let mut framed = framed(stream);
        let declared = handshake(&mut framed, &self.local).await?;
        if &declared != remote {
            return Err(P2pError::Connection(format!(
                "{addr} identified as {declared}, expected {remote}"
            )));
        }

        debug!(peer = %remote.short_id(), addr = %addr, "TCP connection established");
        Ok(spawn_io(declared, framed))
    }
}

fn framed(stream: TcpStream) -> FramedStream {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_framed(stream)
}

async fn handshake(framed: &mut FramedStream, local: &PeerId) -> Result<PeerId> {
    let hello = serde_json::to_vec(&Hello {
        identity: local.clone(),
    })?;
    framed.send(Bytes::from(hello)).await?;
    let frame = framed.next().await.ok_or(P2pError::ConnectionClosed)??;
    let hello: Hello = serde_json::from_slice(&frame)?;
    Ok(hello.identity)
}

async fn listen(listener: TcpListener, local: PeerId, incoming: mpsc::UnboundedSender<Connection>) {
    let mut failures = 0u32;
    while !incoming.is_closed() {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => {
                failures = 0;
                accepted
            }
            Err(e) => {
                let delay = accept_backoff(failures);
                failures = failures.saturating_add(1);
                warn!(
                    error = %e,
                    retry_ms = delay.as_millis() as u64,
                    "Failed to accept TCP connection"
                );
                tokio::time::sleep(delay).await;
                continue;
            }
        };

        let local = local.clone();
        let incoming = incoming.clone();
        tokio::spawn(async move {
            let mut framed = framed(stream);
            match handshake(&mut framed, &local).await {
                Ok(remote) => {
                    debug!(peer = %remote.short_id(), addr = %addr, "TCP connection accepted");
                    let _ = incoming.send(spawn_io(remote, framed));
                }
                Err(e) => warn!(addr = %addr, error = %e, "Handshake failed"),
            }
        });
    }
}

/// Delay before retrying `accept` after `failures` consecutive errors.
fn accept_backoff(failures: u32) -> Duration {
    ACCEPT_BACKOFF_MIN
        .saturating_mul(1 << failures.min(16))
        .min(ACCEPT_BACKOFF_MAX)
}

fn spawn_io(remote: PeerId, framed: FramedStream) -> Connection {
    let (mut sink, mut stream) = framed.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
    let (events, events_rx) = mpsc::unbounded_channel();
    let _ = events.send(ConnectionEvent::Open);

    let writer_events = events.clone();
    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let frame = match message.encode() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(request_id = %message.request_id, error = %e, "Failed to encode message");
                    continue;
                }
            };
            if let Err(e) = sink.send(frame).await {
                let _ = writer_events.send(ConnectionEvent::Error(e.to_string()));
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(frame) => match Message::decode(&frame) {
                    Ok(message) => {
                        if events.send(ConnectionEvent::Message(message)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = events.send(ConnectionEvent::Error(e.to_string()));
                    }
                },
                Err(e) => {
                    let _ = events.send(ConnectionEvent::Error(e.to_string()));
                    break;
                }
            }
        }
        let _ = events.send(ConnectionEvent::Closed);
    });

    Connection {
        remote,
        outbound,
        events: events_rx,
    }
}

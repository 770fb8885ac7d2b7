//! Request/response correlation over one peer connection.
//!
//! A [`PeerLink`] owns the connection to a single remote peer. Outgoing
//! requests get a fresh request id and wait for the response carrying the
//! same id; inbound requests are answered by the session's handler.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::handler::{respond, RequestHandler};
use crate::message::{Message, Request, Response, PROTOCOL_TAG};
use crate::transport::{Connection, ConnectionEvent};
use crate::{P2pError, PeerId, Result};

type PendingMap = HashMap<String, oneshot::Sender<Result<Message>>>;

/// Connection state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Waiting for the connection to open.
    Connecting,
    /// Messages can be exchanged.
    Ready,
    /// The connection is gone; the link cannot be reused.
    Closed,
}

struct Shared {
    local: PeerId,
    remote: PeerId,
    outbound: mpsc::UnboundedSender<Message>,
    pending: Mutex<PendingMap>,
    state: watch::Sender<LinkState>,
    handler: Arc<dyn RequestHandler>,
}

/// Link to one remote peer.
pub struct PeerLink {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("local", &self.shared.local)
            .field("remote", &self.shared.remote)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl PeerLink {
    /// Wraps `connection` and starts processing its events.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(local: PeerId, connection: Connection, handler: Arc<dyn RequestHandler>) -> Self {
        let Connection {
            remote,
            outbound,
            events,
        } = connection;
        let (state, _) = watch::channel(LinkState::Connecting);
        let shared = Arc::new(Shared {
            local,
            remote,
            outbound,
            pending: Mutex::new(HashMap::new()),
            state,
            handler,
        });
        tokio::spawn(drive(Arc::downgrade(&shared), events));
        Self { shared }
    }

    /// Identity of the remote peer.
    pub fn remote(&self) -> &PeerId {
        &self.shared.remote
    }

    /// Current connection state.
    pub fn state(&self) -> LinkState {
        *self.shared.state.borrow()
    }

    /// Returns true once the connection has opened and until it closes.
    pub fn is_ready(&self) -> bool {
        self.state() == LinkState::Ready
    }

    /// Returns true once the connection has closed.
    pub fn is_closed(&self) -> bool {
        self.state() == LinkState::Closed
    }

    /// Number of requests waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Waits until the connection is open.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::ConnectionClosed`] if the connection closes first.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut state = self.shared.state.subscribe();
        let current = state
            .wait_for(|s| *s != LinkState::Connecting)
            .await
            .map(|s| *s)
            .map_err(|_| P2pError::ConnectionClosed)?;
        match current {
            LinkState::Ready => Ok(()),
            _ => Err(P2pError::ConnectionClosed),
        }
    }

    /// Sends `request` and waits up to `timeout` for the matching response.
    ///
    /// Nothing is sent before the connection is open. The timeout starts
    /// once the request has been handed to the connection.
    ///
    /// # Errors
    ///
    /// - [`P2pError::Timeout`] if no response arrives in time
    /// - [`P2pError::Transport`] if the transport reports an error meanwhile
    /// - [`P2pError::ConnectionClosed`] if the connection closes
    /// - [`P2pError::Body`] if a streaming request body fails
    pub async fn send_request(&self, request: Request, timeout: Duration) -> Result<Response> {
        self.wait_ready().await?;

        let body = match request.body {
            Some(body) => Some(body.collect().await?),
            None => None,
        };

        let (tx, rx) = oneshot::channel();
        let request_id = {
            let mut pending = self.shared.pending.lock();
            let mut id = Uuid::new_v4().to_string();
            while pending.contains_key(&id) {
                id = Uuid::new_v4().to_string();
            }
            pending.insert(id.clone(), tx);
            id
        };
        let _guard = PendingGuard {
            pending: &self.shared.pending,
            request_id: request_id.clone(),
        };

        let message = Message {
            protocol_tag: PROTOCOL_TAG.to_string(),
            is_request: true,
            src_identity: self.shared.local.clone(),
            dst_identity: self.shared.remote.clone(),
            request_id: request_id.clone(),
            url: request.url,
            method: request.method,
            headers: request.headers,
            body,
            status: None,
            status_text: None,
        };
        debug!(
            remote = %self.shared.remote.short_id(),
            request_id = %request_id,
            method = %message.method,
            url = %message.url,
            "Sending request"
        );
        self.shared
            .outbound
            .send(message)
            .map_err(|_| P2pError::ConnectionClosed)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result.map(Response::from),
            Ok(Err(_)) => Err(P2pError::ConnectionClosed),
            Err(_) => {
                warn!(
                    remote = %self.shared.remote.short_id(),
                    request_id = %request_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Request timed out"
                );
                Err(P2pError::Timeout {
                    request_id,
                    duration: timeout,
                })
            }
        }
    }
}

/// Removes a pending entry however the request ends.
struct PendingGuard<'a> {
    pending: &'a Mutex<PendingMap>,
    request_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.request_id);
    }
}

impl Shared {
    fn on_inbound(&self, message: Message) {
        if !message.is_supported() {
            debug!(
                remote = %self.remote.short_id(),
                protocol_tag = %message.protocol_tag,
                "Ignoring message with unsupported protocol tag"
            );
            return;
        }

        if message.is_request {
            let handler = Arc::clone(&self.handler);
            let outbound = self.outbound.clone();
            tokio::spawn(async move {
                let response = respond(handler.as_ref(), &message).await;
                if outbound.send(response).is_err() {
                    debug!(request_id = %message.request_id, "Link closed before response was sent");
                }
            });
            return;
        }

        let waiter = self.pending.lock().remove(&message.request_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(Ok(message));
            }
            None => debug!(
                remote = %self.remote.short_id(),
                request_id = %message.request_id,
                "Discarding response with no pending request"
            ),
        }
    }

    fn fail_pending(&self, error: impl Fn() -> P2pError) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        for (_, tx) in drained {
            let _ = tx.send(Err(error()));
        }
    }

    fn close(&self) {
        self.state.send_replace(LinkState::Closed);
        self.fail_pending(|| P2pError::ConnectionClosed);
    }
}

async fn drive(shared: Weak<Shared>, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        match event {
            ConnectionEvent::Open => {
                debug!(remote = %shared.remote.short_id(), "Link ready");
                shared.state.send_replace(LinkState::Ready);
            }
            ConnectionEvent::Message(message) => shared.on_inbound(message),
            ConnectionEvent::Error(error) => {
                warn!(remote = %shared.remote.short_id(), error = %error, "Transport error");
                shared.fail_pending(|| P2pError::Transport(error.clone()));
            }
            ConnectionEvent::Closed => break,
        }
    }

    if let Some(shared) = shared.upgrade() {
        debug!(remote = %shared.remote.short_id(), "Link closed");
        shared.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, HandlerResponse};
    use crate::message::BoxError;
    use bytes::Bytes;

    const TIMEOUT: Duration = Duration::from_secs(16);

    struct Harness {
        link: Arc<PeerLink>,
        sent: mpsc::UnboundedReceiver<Message>,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    }

    fn harness() -> Harness {
        let (outbound, sent) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let handler = Arc::new(handler_fn(|req: crate::InboundRequest| async move {
            Ok::<_, BoxError>(HandlerResponse::ok(format!("echo {}", req.url)))
        }));
        let link = PeerLink::new(
            PeerId::parse("alice").unwrap(),
            Connection {
                remote: PeerId::parse("bob").unwrap(),
                outbound,
                events: events_rx,
            },
            handler,
        );
        Harness {
            link: Arc::new(link),
            sent,
            events,
        }
    }

    fn reply(request: &Message, body: &str) -> ConnectionEvent {
        ConnectionEvent::Message(Message {
            is_request: false,
            src_identity: request.dst_identity.clone(),
            dst_identity: request.src_identity.clone(),
            body: Some(Bytes::from(body.to_string())),
            status: Some(200),
            status_text: Some("OK".to_string()),
            ..request.clone()
        })
    }

    fn spawn_get(
        link: &Arc<PeerLink>,
        url: &str,
    ) -> tokio::task::JoinHandle<Result<Response>> {
        let link = Arc::clone(link);
        let url = url.to_string();
        tokio::spawn(async move { link.send_request(Request::get(url), TIMEOUT).await })
    }

    #[tokio::test]
    async fn nothing_is_sent_before_open() {
        let mut h = harness();
        let task = spawn_get(&h.link, "http://bob.webrtcpeer/a");

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(h.sent.try_recv().is_err());
        assert_eq!(h.link.state(), LinkState::Connecting);

        h.events.send(ConnectionEvent::Open).unwrap();
        let sent = h.sent.recv().await.unwrap();
        assert!(sent.is_request);
        assert_eq!(sent.protocol_tag, PROTOCOL_TAG);
        assert_eq!(sent.src_identity.as_str(), "alice");
        assert_eq!(sent.dst_identity.as_str(), "bob");

        h.events.send(reply(&sent, "a")).unwrap();
        let response = task.await.unwrap().unwrap();
        assert_eq!(response.body_bytes(), Bytes::from_static(b"a"));
        assert_eq!(h.link.pending_count(), 0);
    }

    #[tokio::test]
    async fn responses_in_any_order_reach_their_requests() {
        let mut h = harness();
        h.events.send(ConnectionEvent::Open).unwrap();

        let urls = ["http://bob.webrtcpeer/0", "http://bob.webrtcpeer/1", "http://bob.webrtcpeer/2"];
        let tasks: Vec<_> = urls.iter().map(|url| spawn_get(&h.link, url)).collect();

        let mut sent = Vec::new();
        for _ in 0..urls.len() {
            sent.push(h.sent.recv().await.unwrap());
        }
        let ids: std::collections::HashSet<_> = sent.iter().map(|m| m.request_id.clone()).collect();
        assert_eq!(ids.len(), urls.len());

        for request in sent.iter().rev() {
            h.events.send(reply(request, &request.url)).unwrap();
        }
        for (task, url) in tasks.into_iter().zip(urls) {
            let response = task.await.unwrap().unwrap();
            assert_eq!(response.body_bytes(), Bytes::from(url.to_string()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_abandons_only_that_request() {
        let mut h = harness();
        h.events.send(ConnectionEvent::Open).unwrap();

        let slow = spawn_get(&h.link, "http://bob.webrtcpeer/slow");
        let slow_request = h.sent.recv().await.unwrap();

        let result = slow.await.unwrap();
        match result {
            Err(P2pError::Timeout {
                request_id,
                duration,
            }) => {
                assert_eq!(request_id, slow_request.request_id);
                assert_eq!(duration, TIMEOUT);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(h.link.pending_count(), 0);

        let fast = spawn_get(&h.link, "http://bob.webrtcpeer/fast");
        let fast_request = h.sent.recv().await.unwrap();

        // A late response for the abandoned request is dropped.
        h.events.send(reply(&slow_request, "late")).unwrap();
        h.events.send(reply(&fast_request, "fast")).unwrap();

        let response = fast.await.unwrap().unwrap();
        assert_eq!(response.body_bytes(), Bytes::from_static(b"fast"));
        assert!(h.link.is_ready());
    }

    #[tokio::test]
    async fn transport_error_fails_pending_requests() {
        let mut h = harness();
        h.events.send(ConnectionEvent::Open).unwrap();

        let task = spawn_get(&h.link, "http://bob.webrtcpeer/a");
        h.sent.recv().await.unwrap();
        h.events
            .send(ConnectionEvent::Error("ice failed".to_string()))
            .unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(P2pError::Transport(msg)) if msg == "ice failed"));
        assert!(h.link.is_ready());
    }

    #[tokio::test]
    async fn close_fails_pending_and_later_requests() {
        let mut h = harness();
        h.events.send(ConnectionEvent::Open).unwrap();

        let task = spawn_get(&h.link, "http://bob.webrtcpeer/a");
        h.sent.recv().await.unwrap();
        h.events.send(ConnectionEvent::Closed).unwrap();

        assert!(matches!(task.await.unwrap(), Err(P2pError::ConnectionClosed)));
        assert!(h.link.is_closed());
        let later = h
            .link
            .send_request(Request::get("http://bob.webrtcpeer/b"), TIMEOUT)
            .await;
        assert!(matches!(later, Err(P2pError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn inbound_requests_are_answered() {
        let mut h = harness();
        h.events.send(ConnectionEvent::Open).unwrap();

        let request = Message {
            protocol_tag: PROTOCOL_TAG.to_string(),
            is_request: true,
            src_identity: PeerId::parse("bob").unwrap(),
            dst_identity: PeerId::parse("alice").unwrap(),
            request_id: "from-bob".to_string(),
            url: "http://alice.webrtcpeer/x".to_string(),
            method: "GET".to_string(),
            headers: Default::default(),
            body: None,
            status: None,
            status_text: None,
        };
        h.events.send(ConnectionEvent::Message(request)).unwrap();

        let response = h.sent.recv().await.unwrap();
        assert!(!response.is_request);
        assert_eq!(response.request_id, "from-bob");
        assert_eq!(response.dst_identity.as_str(), "bob");
        assert_eq!(
            response.body,
            Some(Bytes::from_static(b"echo http://alice.webrtcpeer/x"))
        );
    }

    #[tokio::test]
    async fn unsupported_messages_are_ignored() {
        let mut h = harness();
        h.events.send(ConnectionEvent::Open).unwrap();

        let task = spawn_get(&h.link, "http://bob.webrtcpeer/a");
        let request = h.sent.recv().await.unwrap();

        let mut foreign = Message {
            protocol_tag: "JSON-HTTP-2".to_string(),
            ..request.clone()
        };
        foreign.is_request = false;
        foreign.body = Some(Bytes::from_static(b"wrong"));
        h.events.send(ConnectionEvent::Message(foreign)).unwrap();
        h.events.send(reply(&request, "right")).unwrap();

        let response = task.await.unwrap().unwrap();
        assert_eq!(response.body_bytes(), Bytes::from_static(b"right"));
    }
}

//! Session manager: one local identity and its links to remote peers.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::address::parse_peer_url;
use crate::handler::RequestHandler;
use crate::link::PeerLink;
use crate::message::{Request, Response};
use crate::transport::{Incoming, Transport};
use crate::{P2pError, PeerId, Result, DEFAULT_REQUEST_TIMEOUT};

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a request waits for its response, and the bound on
    /// opening a new connection.
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

struct Inner {
    local: PeerId,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn RequestHandler>,
    config: SessionConfig,
    links: RwLock<HashMap<PeerId, Arc<PeerLink>>>,
    connecting: Mutex<HashMap<PeerId, Arc<tokio::sync::Mutex<()>>>>,
}

/// Routes requests to peers and serves their requests with one handler.
///
/// Cloning a session is cheap; clones share the same links.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("local", &self.inner.local)
            .field("peers", &self.peers())
            .finish()
    }
}

impl Session {
    /// Creates a session and starts accepting connections from `incoming`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        local: PeerId,
        transport: Arc<dyn Transport>,
        incoming: Incoming,
        handler: Arc<dyn RequestHandler>,
        config: SessionConfig,
    ) -> Self {
        let inner = Arc::new(Inner {
            local,
            transport,
            handler,
            config,
            links: RwLock::new(HashMap::new()),
            connecting: Mutex::new(HashMap::new()),
        });
        tokio::spawn(accept(Arc::downgrade(&inner), incoming));
        info!(identity = %inner.local, "Session started");
        Self { inner }
    }

    /// The local identity.
    pub fn local_id(&self) -> &PeerId {
        &self.inner.local
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Identities with a registered link.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<_> = self.inner.links.read().keys().cloned().collect();
        peers.sort();
        peers
    }

    /// The registered link to `peer`, if any.
    pub fn link(&self, peer: &PeerId) -> Option<Arc<PeerLink>> {
        self.inner.links.read().get(peer).cloned()
    }

    /// Sends `request` to the peer named by its url and waits for the
    /// response.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::P2pError::InvalidAddress`] before any suspension
    /// when the url is not a peer url; otherwise with any error from
    /// connecting or from [`PeerLink::send_request`].
    pub async fn route_request(&self, request: Request) -> Result<Response> {
        let remote = parse_peer_url(&request.url)?;
        self.inner.transport.opened().await?;
        let link = self.link_for(&remote).await?;
        link.send_request(request, self.inner.config.request_timeout)
            .await
    }

    async fn link_for(&self, remote: &PeerId) -> Result<Arc<PeerLink>> {
        if let Some(link) = self.live_link(remote) {
            return Ok(link);
        }

        // Serialized per peer; a stalled connect never blocks other peers.
        let lock = Arc::clone(
            self.inner
                .connecting
                .lock()
                .entry(remote.clone())
                .or_default(),
        );
        let _connecting = lock.lock().await;
        if let Some(link) = self.live_link(remote) {
            return Ok(link);
        }

        let timeout = self.inner.config.request_timeout;
        let connection = tokio::time::timeout(timeout, self.inner.transport.connect(remote))
            .await
            .map_err(|_| {
                warn!(
                    peer = %remote.short_id(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Connect timed out"
                );
                P2pError::Connection(format!(
                    "connecting to {remote} timed out after {} millis",
                    timeout.as_millis()
                ))
            })??;
        let link = Arc::new(PeerLink::new(
            self.inner.local.clone(),
            connection,
            Arc::clone(&self.inner.handler),
        ));
        self.inner
            .links
            .write()
            .insert(remote.clone(), Arc::clone(&link));
        info!(peer = %remote.short_id(), "Connected to peer");
        Ok(link)
    }

    fn live_link(&self, remote: &PeerId) -> Option<Arc<PeerLink>> {
        self.inner
            .links
            .read()
            .get(remote)
            .filter(|link| !link.is_closed())
            .cloned()
    }
}

async fn accept(inner: Weak<Inner>, mut incoming: Incoming) {
    while let Some(connection) = incoming.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let remote = connection.remote.clone();
        let link = Arc::new(PeerLink::new(
            inner.local.clone(),
            connection,
            Arc::clone(&inner.handler),
        ));
        if inner.links.write().insert(remote.clone(), link).is_some() {
            debug!(peer = %remote.short_id(), "Replaced existing link");
        }
        info!(peer = %remote.short_id(), "Accepted peer connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::peer_url;
    use crate::handler::{handler_fn, HandlerResponse, InboundRequest};
    use crate::memory::MemoryNetwork;
    use crate::message::BoxError;
    use crate::memory::MemoryTransport;
    use crate::transport::Connection;
    use async_trait::async_trait;
    use bytes::Bytes;

    fn session(network: &MemoryNetwork, name: &str) -> Session {
        let id = PeerId::parse(name).unwrap();
        let (transport, incoming) = network.join(id.clone());
        let me = name.to_string();
        let handler = handler_fn(move |req: InboundRequest| {
            let me = me.clone();
            async move {
                Ok::<_, BoxError>(HandlerResponse::ok(format!("{me} got {} from {}", req.method, req.src)))
            }
        });
        Session::new(
            id,
            Arc::new(transport),
            incoming,
            Arc::new(handler),
            SessionConfig::default(),
        )
    }

    #[tokio::test]
    async fn routes_to_peer_and_back() {
        let network = MemoryNetwork::new();
        let alice = session(&network, "alice");
        let bob = session(&network, "bob");

        let response = alice
            .route_request(Request::get(peer_url(bob.local_id(), "ping")))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body_bytes(), Bytes::from_static(b"bob got GET from alice"));
        assert_eq!(alice.peers(), vec![bob.local_id().clone()]);

        // Bob answers over the link alice opened.
        let response = bob
            .route_request(Request::post(peer_url(alice.local_id(), "x"), "hi"))
            .await
            .unwrap();
        assert_eq!(response.body_bytes(), Bytes::from_static(b"alice got POST from bob"));
        assert_eq!(bob.peers(), vec![alice.local_id().clone()]);
    }

    #[tokio::test]
    async fn link_is_reused() {
        let network = MemoryNetwork::new();
        let alice = session(&network, "alice");
        let bob = session(&network, "bob");

        for _ in 0..3 {
            alice
                .route_request(Request::get(peer_url(bob.local_id(), "ping")))
                .await
                .unwrap();
        }
        let first = alice.link(bob.local_id()).unwrap();
        alice
            .route_request(Request::get(peer_url(bob.local_id(), "ping")))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &alice.link(bob.local_id()).unwrap()));
    }

    #[tokio::test]
    async fn invalid_address_is_rejected() {
        let network = MemoryNetwork::new();
        let alice = session(&network, "alice");

        for url in ["http://sub.bob.webrtcpeer/x", "http://bob.other/x", "not a url"] {
            let result = alice.route_request(Request::get(url)).await;
            assert!(matches!(result, Err(P2pError::InvalidAddress(_))), "{url}");
        }
        assert!(alice.peers().is_empty());
    }

    #[tokio::test]
    async fn unknown_peer_fails() {
        let network = MemoryNetwork::new();
        let alice = session(&network, "alice");
        let result = alice
            .route_request(Request::get("http://nobody.webrtcpeer/x"))
            .await;
        assert!(matches!(result, Err(P2pError::PeerNotFound(_))));
    }

    /// Connects through the memory network, except to one peer that never
    /// answers.
    struct StallingTransport {
        inner: MemoryTransport,
        stalled: PeerId,
    }

    #[async_trait]
    impl Transport for StallingTransport {
        async fn opened(&self) -> Result<()> {
            self.inner.opened().await
        }

        async fn connect(&self, remote: &PeerId) -> Result<Connection> {
            if *remote == self.stalled {
                std::future::pending::<()>().await;
            }
            self.inner.connect(remote).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_connect_does_not_block_other_peers() {
        let network = MemoryNetwork::new();
        let bob = session(&network, "bob");
        let id = PeerId::parse("alice").unwrap();
        let (inner, incoming) = network.join(id.clone());
        let transport = StallingTransport {
            inner,
            stalled: PeerId::parse("silent").unwrap(),
        };
        let config = SessionConfig {
            request_timeout: Duration::from_secs(5),
        };
        let handler = handler_fn(|_req| async { Ok::<_, BoxError>(HandlerResponse::ok("pong")) });
        let alice = Session::new(id, Arc::new(transport), incoming, Arc::new(handler), config);

        let stalled = {
            let alice = alice.clone();
            tokio::spawn(async move {
                alice
                    .route_request(Request::get("http://silent.webrtcpeer/x"))
                    .await
            })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let start = tokio::time::Instant::now();
        let response = alice
            .route_request(Request::get(peer_url(bob.local_id(), "ping")))
            .await
            .unwrap();
        assert_eq!(response.body_bytes(), Bytes::from_static(b"bob got GET from alice"));
        assert!(start.elapsed() < Duration::from_secs(5));

        let result = stalled.await.unwrap();
        assert!(matches!(result, Err(P2pError::Connection(_))), "{result:?}");
        assert_eq!(alice.peers(), vec![bob.local_id().clone()]);
    }

    #[tokio::test]
    async fn panicking_handler_is_answered_with_500() {
        let network = MemoryNetwork::new();
        let alice = session(&network, "alice");
        let id = PeerId::parse("bob").unwrap();
        let (transport, incoming) = network.join(id.clone());
        let handler = handler_fn(|req: InboundRequest| async move {
            if req.url.ends_with("/x") {
                panic!("handler bug");
            }
            Ok::<_, BoxError>(HandlerResponse::ok("unreachable"))
        });
        let _bob = Session::new(
            id.clone(),
            Arc::new(transport),
            incoming,
            Arc::new(handler),
            SessionConfig::default(),
        );

        let response = alice
            .route_request(Request::get(peer_url(&id, "x")))
            .await
            .unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(
            response.body_bytes(),
            Bytes::from_static(b"request handler panicked: handler bug")
        );
    }
}

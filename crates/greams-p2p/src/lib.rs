//! # GReAMS P2P
//!
//! HTTP-like request/response messaging over peer-to-peer message channels.
//!
//! A [`Session`] owns the local [`PeerId`] and one [`PeerLink`] per remote
//! peer. Requests are addressed with urls of the form
//! `http://{peer-id}.webrtcpeer/...`; each link correlates responses with
//! requests by request id, so responses may arrive in any order.
//!
//! ```rust,no_run
//! use greams_p2p::{handler_fn, peer_url, HandlerResponse, MemoryNetwork, PeerId, Request, Session, SessionConfig};
//! use std::sync::Arc;
//!
//! # async fn demo() -> greams_p2p::Result<()> {
//! let network = MemoryNetwork::new();
//! let bob = PeerId::generate();
//! let (transport, incoming) = network.join(PeerId::generate());
//! let handler = handler_fn(|_req| async { Ok::<_, greams_p2p::BoxError>(HandlerResponse::ok("pong")) });
//! let session = Session::new(
//!     PeerId::generate(),
//!     Arc::new(transport),
//!     incoming,
//!     Arc::new(handler),
//!     SessionConfig::default(),
//! );
//! let response = session.route_request(Request::get(peer_url(&bob, "ping"))).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
mod error;
pub mod handler;
pub mod link;
pub mod memory;
pub mod message;
mod peer;
pub mod session;
pub mod tcp;
pub mod transport;

pub use address::{is_peer_url, parse_peer_url, peer_url, PEER_TLD};
pub use error::{P2pError, Result};
pub use handler::{handler_fn, HandlerFn, HandlerResponse, InboundRequest, RequestHandler};
pub use link::{LinkState, PeerLink};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use message::{Body, BoxError, Headers, Message, Request, Response, PROTOCOL_TAG};
pub use peer::PeerId;
pub use session::{Session, SessionConfig};
pub use tcp::TcpTransport;
pub use transport::{Connection, ConnectionEvent, Incoming, Transport};

use std::time::Duration;

/// Default time a request waits for its response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(16_000);

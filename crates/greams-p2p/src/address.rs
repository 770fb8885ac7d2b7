//! Peer url addressing.
//!
//! A url routed over the peer transport has a host of the form
//! `{peer-id}.webrtcpeer`, e.g. `http://3f2c…-9a1e.webrtcpeer/GReAMS.git/info/refs`.

use crate::{P2pError, PeerId, Result};
use url::Url;

/// Reserved pseudo top-level domain for peer urls.
pub const PEER_TLD: &str = "webrtcpeer";

/// Extracts the target peer from a peer url.
///
/// # Errors
///
/// Returns [`P2pError::InvalidAddress`] unless the host is exactly
/// `{peer-id}.webrtcpeer`.
pub fn parse_peer_url(url: &str) -> Result<PeerId> {
    let invalid = || P2pError::InvalidAddress(url.to_string());

    let parsed = Url::parse(url).map_err(|_| invalid())?;
    let host = parsed.host_str().ok_or_else(invalid)?;

    let mut labels = host.rsplit('.');
    let tld = labels.next();
    let peer = labels.next();
    let rest = labels.next();

    match (tld, peer, rest) {
        (Some(PEER_TLD), Some(peer), None) if !peer.is_empty() => {
            PeerId::parse(peer).map_err(|_| invalid())
        }
        _ => Err(invalid()),
    }
}

/// Returns true if `url` should be routed over the peer transport.
pub fn is_peer_url(url: &str) -> bool {
    parse_peer_url(url).is_ok()
}

/// Builds a url addressing `path` on `peer`.
pub fn peer_url(peer: &PeerId, path: &str) -> String {
    format!(
        "http://{}.{}/{}",
        peer,
        PEER_TLD,
        path.trim_start_matches('/')
    )
}

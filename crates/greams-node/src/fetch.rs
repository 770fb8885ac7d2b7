//! Fetching a repository from a peer.

use bytes::Bytes;
use greams_git::{
    demux, parse_ref_advertisement, ObjectId, PktLineReader, RefAdvertisement, SideBand,
    UploadRequest, UPLOAD_PACK,
};
use greams_p2p::{peer_url, PeerId, Request, Response, Session};
use std::io::Cursor;
use tracing::{debug, info};

use crate::store::FileStore;
use crate::{NodeError, Result};

/// What a fetch brought back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Refs advertised by the peer.
    pub refs: Vec<RefAdvertisement>,
    /// The received pack; empty when the peer has no refs.
    pub pack: Bytes,
    /// Progress messages received on the side-band.
    pub progress: Vec<Bytes>,
    /// Store path the pack was written to, if any.
    pub pack_path: Option<String>,
}

/// Fetches every advertised ref of `repo_name` from `peer` and writes the
/// pack and refs into `store`.
///
/// The pack is stored unindexed under `objects/pack/`; refs go to
/// `packed-refs`, and a detached `HEAD` when the peer advertises one.
pub async fn fetch(
    session: &Session,
    peer: &PeerId,
    repo_name: &str,
    side_band: SideBand,
    store: &dyn FileStore,
) -> Result<FetchOutcome> {
    let advertisement = expect_success(
        session
            .route_request(Request::get(peer_url(
                peer,
                &format!("{repo_name}/info/refs?service={UPLOAD_PACK}"),
            )))
            .await?,
    )?;
    let (refs, capabilities) = parse_ref_advertisement(&advertisement.body_bytes())?;
    info!(peer = %peer.short_id(), refs = refs.len(), "Received ref advertisement");

    if refs.is_empty() {
        return Ok(FetchOutcome::default());
    }

    let negotiated = if capabilities.iter().any(|c| c == side_band.capability()) {
        Some(side_band)
    } else {
        SideBand::negotiate(capabilities.iter().map(String::as_str))
    };

    let mut wants: Vec<ObjectId> = Vec::new();
    for r in &refs {
        if !wants.contains(&r.id) {
            wants.push(r.id.clone());
        }
    }
    let upload = UploadRequest {
        wants,
        haves: Vec::new(),
        capabilities: negotiated
            .map(|sb| vec![sb.capability().to_string()])
            .unwrap_or_default(),
    };

    let response = expect_success(
        session
            .route_request(
                Request::post(
                    peer_url(peer, &format!("{repo_name}/{UPLOAD_PACK}")),
                    upload.encode()?,
                )
                .with_header("content-type", "application/x-git-upload-pack-request"),
            )
            .await?,
    )?;

    let (pack, progress) = match negotiated {
        Some(_) => {
            let demuxed = demux(&response.body_bytes())?;
            (demuxed.packfile, demuxed.progress)
        }
        None => (strip_nak(response.body_bytes())?, Vec::new()),
    };
    debug!(bytes = pack.len(), side_band = ?negotiated, "Received pack");

    let pack_path = if pack.is_empty() {
        None
    } else {
        let path = format!("objects/pack/pack-{}.pack", upload.wants[0]);
        store.write(&path, pack.clone()).await?;
        Some(path)
    };
    write_refs(store, &refs).await?;

    info!(
        peer = %peer.short_id(),
        refs = refs.len(),
        bytes = pack.len(),
        "Fetch complete"
    );
    Ok(FetchOutcome {
        refs,
        pack,
        progress,
        pack_path,
    })
}

fn expect_success(response: Response) -> Result<Response> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(NodeError::Status {
            status: response.status,
            status_text: response.status_text,
        })
    }
}

/// Drops the leading `NAK` line of a response sent without side-band.
fn strip_nak(body: Bytes) -> Result<Bytes> {
    let mut reader = PktLineReader::new(Cursor::new(body.clone()));
    reader.read()?;
    let consumed = reader.into_inner().position() as usize;
    Ok(body.slice(consumed..))
}

async fn write_refs(store: &dyn FileStore, refs: &[RefAdvertisement]) -> Result<()> {
    let mut packed = String::new();
    for r in refs.iter().filter(|r| r.name != "HEAD") {
        packed.push_str(&format!("{} {}\n", r.id, r.name));
    }
    store.write("packed-refs", Bytes::from(packed)).await?;

    if let Some(head) = refs.iter().find(|r| r.name == "HEAD") {
        store
            .write("HEAD", Bytes::from(format!("{}\n", head.id)))
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use greams_git::encode_frame;

    #[test]
    fn strip_nak_keeps_raw_pack() {
        let mut body = encode_frame(b"NAK\n").unwrap().to_vec();
        body.extend_from_slice(b"PACKdata");
        assert_eq!(strip_nak(Bytes::from(body)).unwrap(), Bytes::from_static(b"PACKdata"));
    }

    #[test]
    fn non_success_is_an_error() {
        let response = Response {
            url: String::new(),
            method: "GET".to_string(),
            status: 404,
            status_text: "Not Found".to_string(),
            body: None,
            headers: Default::default(),
        };
        assert!(matches!(
            expect_success(response),
            Err(NodeError::Status { status: 404, .. })
        ));
    }
}

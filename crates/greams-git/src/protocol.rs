//! Git smart protocol, upload-pack side.
//!
//! See: https://git-scm.com/docs/http-protocol

use crate::output::{output_sequence, OutputSequence};
use crate::pktline::{encode_frame, PktLine, PktLineReader, PktLineWriter};
use crate::sideband::{mux, SideBand};
use crate::source::{ObjectId, PackSource, RefAdvertisement};
use crate::{GitError, Result};
use bytes::Bytes;
use std::io::Cursor;
use tracing::debug;

/// Service name for fetch and clone.
pub const UPLOAD_PACK: &str = "git-upload-pack";

/// Git capabilities we advertise.
const CAPABILITIES: &str = "side-band side-band-64k no-progress agent=greams/0.1.0";

/// Writes the ref advertisement for `service`.
pub fn advertise_refs(service: &str, refs: &[RefAdvertisement]) -> Result<Bytes> {
    let mut out = Vec::new();
    let mut pkt_writer = PktLineWriter::new(&mut out);

    pkt_writer.write_line(&format!("# service={}", service))?;
    pkt_writer.flush_pkt()?;

    // First line includes capabilities
    match refs.split_first() {
        Some((first, rest)) => {
            pkt_writer.write_line(&format!("{} {}\0{}", first.id, first.name, CAPABILITIES))?;
            for r in rest {
                pkt_writer.write_line(&format!("{} {}", r.id, r.name))?;
            }
        }
        None => {
            pkt_writer.write_line(&format!(
                "{} capabilities^{{}}\0{}",
                ObjectId::zero(),
                CAPABILITIES
            ))?;
        }
    }

    pkt_writer.flush_pkt()?;
    Ok(Bytes::from(out))
}

/// Parses a ref advertisement, as produced by [`advertise_refs`].
///
/// Returns the refs and the capability list sent on the first line.
pub fn parse_ref_advertisement(input: &[u8]) -> Result<(Vec<RefAdvertisement>, Vec<String>)> {
    let mut reader = PktLineReader::new(Cursor::new(input));
    let mut refs = Vec::new();
    let mut capabilities = Vec::new();

    let mut pkt = reader.read()?;
    if let Some(line) = pkt.as_ref().and_then(PktLine::as_str) {
        if line.starts_with("# service=") {
            if reader.read()? != Some(PktLine::Flush) {
                return Err(GitError::Protocol("expected flush after service line".into()));
            }
            pkt = reader.read()?;
        }
    }

    while let Some(PktLine::Data(data)) = pkt {
        let text = String::from_utf8_lossy(&data);
        let text = text.trim_end_matches('\n');
        let (line, caps) = match text.split_once('\0') {
            Some((line, caps)) => (line, Some(caps)),
            None => (text, None),
        };
        if let Some(caps) = caps {
            capabilities.extend(caps.split_whitespace().map(str::to_string));
        }

        let (id, name) = line
            .split_once(' ')
            .ok_or_else(|| GitError::Protocol(format!("malformed ref line: {line}")))?;
        if name != "capabilities^{}" {
            refs.push(RefAdvertisement::new(ObjectId::from_hex(id)?, name));
        }
        pkt = reader.read()?;
    }

    Ok((refs, capabilities))
}

/// Want/have negotiation sent by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadRequest {
    /// Object IDs the client wants.
    pub wants: Vec<ObjectId>,
    /// Object IDs the client already has.
    pub haves: Vec<ObjectId>,
    /// Capabilities listed on the first want line.
    pub capabilities: Vec<String>,
}

impl UploadRequest {
    /// Parses want/have lines from the client.
    pub fn parse(input: &[u8]) -> Result<Self> {
        let mut pkt_reader = PktLineReader::new(Cursor::new(input));
        let mut request = Self::default();

        loop {
            match pkt_reader.read()? {
                Some(PktLine::Data(data)) => {
                    let line = String::from_utf8_lossy(&data);
                    let line = line.trim();

                    if let Some(rest) = line.strip_prefix("want ") {
                        let mut parts = rest.split_whitespace();
                        let id = parts
                            .next()
                            .ok_or_else(|| GitError::Protocol("empty want line".into()))?;
                        request.wants.push(ObjectId::from_hex(id)?);
                        if request.wants.len() == 1 {
                            request.capabilities = parts.map(str::to_string).collect();
                        }
                    } else if let Some(id) = line.strip_prefix("have ") {
                        request.haves.push(ObjectId::from_hex(id.trim())?);
                    } else if line == "done" {
                        break;
                    }
                }
                // Flush separates the wants from the haves
                Some(PktLine::Flush) => continue,
                _ => break,
            }
        }

        Ok(request)
    }

    /// Encodes the request as a client would send it.
    pub fn encode(&self) -> Result<Bytes> {
        let mut out = Vec::new();
        let mut pkt_writer = PktLineWriter::new(&mut out);

        for (i, want) in self.wants.iter().enumerate() {
            if i == 0 && !self.capabilities.is_empty() {
                pkt_writer.write_line(&format!("want {} {}", want, self.capabilities.join(" ")))?;
            } else {
                pkt_writer.write_line(&format!("want {}", want))?;
            }
        }
        pkt_writer.flush_pkt()?;
        for have in &self.haves {
            pkt_writer.write_line(&format!("have {}", have))?;
        }
        pkt_writer.write_line("done")?;
        Ok(Bytes::from(out))
    }

    /// Side-band flavour negotiated by the client, if any.
    pub fn side_band(&self) -> Option<SideBand> {
        SideBand::negotiate(self.capabilities.iter().map(String::as_str))
    }
}

/// Handles git-upload-pack (fetch/clone).
///
/// The response starts with `NAK` since no common-ancestor negotiation is
/// performed. The pack follows on the data channel when a side-band was
/// negotiated, or raw otherwise.
pub async fn upload_pack(body: &[u8], source: &dyn PackSource) -> Result<OutputSequence> {
    let request = UploadRequest::parse(body)?;
    let side_band = request.side_band();

    let pack = if request.wants.is_empty() {
        Bytes::new()
    } else {
        let oids = source.list_objects(&request.wants, &request.haves).await?;
        let oids: Vec<ObjectId> = oids.into_iter().collect();
        debug!(
            wants = request.wants.len(),
            haves = request.haves.len(),
            objects = oids.len(),
            "Packing objects"
        );
        source.pack_objects(&oids).await?
    };

    match side_band {
        Some(side_band) => mux(side_band, ["NAK\n"], pack),
        None => {
            let (sink, output) = output_sequence();
            sink.append(encode_frame(b"NAK\n")?)?;
            if !pack.is_empty() {
                sink.append(pack)?;
            }
            sink.end()?;
            Ok(output)
        }
    }
}

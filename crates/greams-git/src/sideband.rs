//! Side-band multiplexing of pack data and status lines.
//!
//! With side-band enabled every frame after the negotiation lines begins with
//! a channel byte: 1 carries pack data, 2 carries progress text, 3 carries a
//! fatal error message.

use crate::chunk::chunks;
use crate::output::{output_sequence, OutputSequence};
use crate::pktline::{encode_flush, encode_frame, encode_tagged, PktLine, PktLineReader};
use crate::{GitError, Result};
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

/// Channel carrying pack data.
pub const CHANNEL_DATA: u8 = 0x01;
/// Channel carrying progress and control text.
pub const CHANNEL_PROGRESS: u8 = 0x02;
/// Channel carrying a fatal error message.
pub const CHANNEL_ERROR: u8 = 0x03;

/// Negotiated side-band flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SideBand {
    /// `side-band`: frames of at most 1000 bytes.
    Small,
    /// `side-band-64k`: frames of at most 65520 bytes.
    #[default]
    Large,
}

impl SideBand {
    /// Largest data chunk carried by one frame, excluding the channel byte.
    pub const fn max_payload(self) -> usize {
        match self {
            Self::Small => 999,
            Self::Large => 65519,
        }
    }

    /// Capability name as advertised on the wire.
    pub const fn capability(self) -> &'static str {
        match self {
            Self::Small => "side-band",
            Self::Large => "side-band-64k",
        }
    }

    /// Picks the widest side-band listed in `capabilities`.
    pub fn negotiate<'a>(capabilities: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let mut found = None;
        for cap in capabilities {
            match cap.parse::<Self>() {
                Ok(Self::Large) => return Some(Self::Large),
                Ok(Self::Small) => found = Some(Self::Small),
                Err(_) => {}
            }
        }
        found
    }
}

impl fmt::Display for SideBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.capability())
    }
}

impl FromStr for SideBand {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "side-band" => Ok(Self::Small),
            "side-band-64k" => Ok(Self::Large),
            other => Err(GitError::Protocol(format!("unknown side-band: {other}"))),
        }
    }
}

/// Frames `packfile` on the data channel after the given control lines.
///
/// The returned sequence is already ended. When the pack is non-empty it is
/// followed by an end-of-data marker on the progress channel and a flush
/// packet.
///
/// # Errors
///
/// Returns [`GitError::FrameTooLarge`] if a control line does not fit in one
/// frame.
pub fn mux<I, L>(side_band: SideBand, control_lines: I, packfile: Bytes) -> Result<OutputSequence>
where
    I: IntoIterator<Item = L>,
    L: AsRef<[u8]>,
{
    let (sink, output) = output_sequence();

    for line in control_lines {
        sink.append(encode_frame(line.as_ref())?)?;
    }

    let mut frames = 0usize;
    for chunk in chunks(packfile, side_band.max_payload()) {
        sink.append(encode_tagged(CHANNEL_DATA, &chunk)?)?;
        frames += 1;
    }

    if frames > 0 {
        sink.append(encode_tagged(CHANNEL_PROGRESS, b"\n")?)?;
        sink.append(encode_flush())?;
    }

    sink.end()?;
    tracing::trace!(side_band = %side_band, frames, "Muxed pack onto side-band");
    Ok(output)
}

/// A side-band response split back into its channels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Demuxed {
    /// Plain pkt-lines sent before the side-band data (for example `NAK`).
    pub lines: Vec<Bytes>,
    /// Concatenated channel 1 payloads.
    pub packfile: Bytes,
    /// Channel 2 messages in arrival order.
    pub progress: Vec<Bytes>,
}

/// Splits a complete side-band response into its channels.
///
/// Reading stops at the first flush packet or at end of input.
///
/// # Errors
///
/// Returns [`GitError::Remote`] when the remote reports an error on
/// channel 3, and [`GitError::InvalidPktLine`] for malformed frames.
pub fn demux(input: &[u8]) -> Result<Demuxed> {
    let mut reader = PktLineReader::new(Cursor::new(input));
    let mut lines = Vec::new();
    let mut packfile = BytesMut::new();
    let mut progress = Vec::new();

    while let Some(pkt) = reader.read()? {
        let data = match pkt {
            PktLine::Data(data) => data,
            PktLine::Flush => break,
            PktLine::Delimiter | PktLine::ResponseEnd => continue,
        };
        match data.first() {
            Some(&CHANNEL_DATA) => packfile.extend_from_slice(&data[1..]),
            Some(&CHANNEL_PROGRESS) => progress.push(Bytes::copy_from_slice(&data[1..])),
            Some(&CHANNEL_ERROR) => {
                return Err(GitError::Remote(
                    String::from_utf8_lossy(&data[1..]).trim_end().to_string(),
                ))
            }
            _ => lines.push(Bytes::from(data)),
        }
    }

    Ok(Demuxed {
        lines,
        packfile: packfile.freeze(),
        progress,
    })
}

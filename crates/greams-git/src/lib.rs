//! Git wire framing for GReAMS.
//!
//! This crate implements the pkt-line format, side-band multiplexing of pack
//! data, and the upload-pack exchange a peer needs to serve a clone. Walking
//! the object graph and encoding packs is delegated to a [`PackSource`].

mod chunk;
mod error;
mod output;
mod pktline;
mod protocol;
mod sideband;
mod source;

pub use chunk::{chunks, Chunks};
pub use error::GitError;
pub use output::{output_sequence, OutputSequence, OutputSink};
pub use pktline::{
    encode_flush, encode_frame, encode_tagged, PktLine, PktLineReader, PktLineWriter,
    MAX_FRAME_LEN, MAX_PAYLOAD_LEN,
};
pub use protocol::{
    advertise_refs, parse_ref_advertisement, upload_pack, UploadRequest, UPLOAD_PACK,
};
pub use sideband::{demux, mux, Demuxed, SideBand, CHANNEL_DATA, CHANNEL_ERROR, CHANNEL_PROGRESS};
pub use source::{ObjectId, PackSource, RefAdvertisement};

/// Result type for git protocol operations.
pub type Result<T> = std::result::Result<T, GitError>;

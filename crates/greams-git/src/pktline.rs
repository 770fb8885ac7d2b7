//! Git pkt-line format implementation.
//!
//! Every frame starts with a 4-character lowercase hex length that counts the
//! header itself, so `"000ahello\n"` carries six payload bytes. `0000` is the
//! flush packet and has no payload.

use crate::{GitError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{Read, Write};

/// Size of the hex length header.
pub const LENGTH_HEADER_LEN: usize = 4;

/// Largest frame that the 4 hex digit header can describe.
pub const MAX_FRAME_LEN: usize = 0xffff;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - LENGTH_HEADER_LEN;

const FLUSH: &[u8; 4] = b"0000";

/// A pkt-line packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// Data line with content.
    Data(Vec<u8>),
    /// Flush packet (0000).
    Flush,
    /// Delimiter packet (0001).
    Delimiter,
    /// Response-end packet (0002).
    ResponseEnd,
}

impl PktLine {
    /// Creates a data packet from a string slice.
    pub fn from_string(s: &str) -> Self {
        Self::Data(s.as_bytes().to_vec())
    }

    /// Encodes the packet to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`GitError::FrameTooLarge`] when the payload does not fit in
    /// one frame.
    pub fn encode(&self) -> Result<Bytes> {
        match self {
            Self::Data(data) => encode_frame(data),
            Self::Flush => Ok(encode_flush()),
            Self::Delimiter => Ok(Bytes::from_static(b"0001")),
            Self::ResponseEnd => Ok(Bytes::from_static(b"0002")),
        }
    }

    /// Returns the data content, or None for special packets.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the data as a string, trimming any trailing newline.
    pub fn as_str(&self) -> Option<&str> {
        self.data()
            .and_then(|d| std::str::from_utf8(d).ok())
            .map(|s| s.trim_end_matches('\n'))
    }
}

/// Encodes `payload` as one length-prefixed frame.
///
/// # Errors
///
/// Returns [`GitError::FrameTooLarge`] if the frame would exceed
/// [`MAX_FRAME_LEN`] bytes.
pub fn encode_frame(payload: &[u8]) -> Result<Bytes> {
    let mut frame = frame_with_capacity(payload.len())?;
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Encodes a frame whose payload is a side-band channel tag followed by
/// `payload`.
///
/// # Errors
///
/// Returns [`GitError::FrameTooLarge`] if the frame would exceed
/// [`MAX_FRAME_LEN`] bytes.
pub fn encode_tagged(channel: u8, payload: &[u8]) -> Result<Bytes> {
    let mut frame = frame_with_capacity(payload.len() + 1)?;
    frame.put_u8(channel);
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Returns the flush packet.
pub fn encode_flush() -> Bytes {
    Bytes::from_static(FLUSH)
}

fn frame_with_capacity(payload_len: usize) -> Result<BytesMut> {
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(GitError::FrameTooLarge(payload_len));
    }
    let len = payload_len + LENGTH_HEADER_LEN;
    let mut frame = BytesMut::with_capacity(len);
    frame.put_slice(format!("{:04x}", len).as_bytes());
    Ok(frame)
}

/// Reader for pkt-line format.
pub struct PktLineReader<R> {
    reader: R,
}

impl<R: Read> PktLineReader<R> {
    /// Creates a new pkt-line reader.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads the next packet, or `None` at a clean end of input.
    ///
    /// Input ending inside a length header is an error, not a clean end.
    pub fn read(&mut self) -> Result<Option<PktLine>> {
        let mut len_buf = [0u8; LENGTH_HEADER_LEN];
        let mut filled = 0;
        while filled < LENGTH_HEADER_LEN {
            match self.reader.read(&mut len_buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        match filled {
            0 => return Ok(None),
            LENGTH_HEADER_LEN => {}
            _ => return Err(GitError::InvalidPktLine("truncated header".to_string())),
        }

        if !len_buf.iter().all(u8::is_ascii_hexdigit) {
            return Err(GitError::InvalidPktLine("invalid length prefix".to_string()));
        }
        let len_str = std::str::from_utf8(&len_buf)
            .map_err(|_| GitError::InvalidPktLine("invalid length prefix".to_string()))?;

        match len_str {
            "0000" => Ok(Some(PktLine::Flush)),
            "0001" => Ok(Some(PktLine::Delimiter)),
            "0002" => Ok(Some(PktLine::ResponseEnd)),
            _ => {
                let len = u16::from_str_radix(len_str, 16)
                    .map_err(|_| GitError::InvalidPktLine("invalid length".to_string()))?
                    as usize;

                if len < LENGTH_HEADER_LEN {
                    return Err(GitError::InvalidPktLine("length too small".to_string()));
                }

                let mut data = vec![0u8; len - LENGTH_HEADER_LEN];
                self.reader.read_exact(&mut data).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::UnexpectedEof {
                        GitError::InvalidPktLine("truncated packet".to_string())
                    } else {
                        e.into()
                    }
                })?;

                Ok(Some(PktLine::Data(data)))
            }
        }
    }

    /// Consumes the reader and returns the inner reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writer for pkt-line format.
pub struct PktLineWriter<W> {
    writer: W,
}

impl<W: Write> PktLineWriter<W> {
    /// Creates a new pkt-line writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes a packet.
    pub fn write(&mut self, pkt: &PktLine) -> Result<()> {
        self.writer.write_all(&pkt.encode()?)?;
        Ok(())
    }

    /// Writes a data line.
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(&encode_frame(data)?)?;
        Ok(())
    }

    /// Writes a string line, appending a newline if missing.
    pub fn write_line(&mut self, s: &str) -> Result<()> {
        let mut data = s.as_bytes().to_vec();
        if !s.ends_with('\n') {
            data.push(b'\n');
        }
        self.write_data(&data)
    }

    /// Writes a flush packet.
    pub fn flush_pkt(&mut self) -> Result<()> {
        self.write(&PktLine::Flush)
    }

    /// Flushes the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn test_pktline_encode() {
        assert_eq!(
            &PktLine::from_string("hello\n").encode().unwrap()[..],
            b"000ahello\n"
        );
        assert_eq!(&PktLine::Flush.encode().unwrap()[..], b"0000");
        assert_eq!(&PktLine::Delimiter.encode().unwrap()[..], b"0001");
        assert_eq!(&PktLine::ResponseEnd.encode().unwrap()[..], b"0002");
    }

    #[test]
    fn test_header_is_lowercase_hex() {
        let frame = encode_frame(&[0u8; 0xab - 4]).unwrap();
        assert_eq!(&frame[..4], b"00ab");
    }

    #[test]
    fn test_pktline_roundtrip() {
        let packets = vec![
            PktLine::from_string("hello\n"),
            PktLine::from_string("world\n"),
            PktLine::Flush,
        ];

        let mut buf = Vec::new();
        {
            let mut writer = PktLineWriter::new(&mut buf);
            for pkt in &packets {
                writer.write(pkt).unwrap();
            }
        }

        let mut reader = PktLineReader::new(Cursor::new(buf));
        assert_eq!(reader.read().unwrap(), Some(packets[0].clone()));
        assert_eq!(reader.read().unwrap(), Some(packets[1].clone()));
        assert_eq!(reader.read().unwrap(), Some(PktLine::Flush));
        assert_eq!(reader.read().unwrap(), None);
    }

    #[test]
    fn test_pktline_as_str() {
        assert_eq!(PktLine::from_string("hello\n").as_str(), Some("hello"));
        assert_eq!(PktLine::from_string("no newline").as_str(), Some("no newline"));
        assert!(PktLine::Data(vec![0xff, 0xfe]).as_str().is_none());
        assert!(PktLine::Flush.as_str().is_none());
    }

    #[test]
    fn test_pktline_read_truncated_header() {
        for tail in [&b"0"[..], b"00", b"000"] {
            let mut input = b"0009line\n".to_vec();
            input.extend_from_slice(tail);
            let mut reader = PktLineReader::new(Cursor::new(input));
            assert_eq!(reader.read().unwrap().unwrap().as_str(), Some("line"));
            assert!(matches!(
                reader.read(),
                Err(GitError::InvalidPktLine(msg)) if msg == "truncated header"
            ));
        }
    }

    #[test]
    fn test_pktline_writer_write_line_with_newline() {
        let mut buf = Vec::new();
        {
            let mut writer = PktLineWriter::new(&mut buf);
            writer.write_line("test\n").unwrap();
        }
        assert_eq!(buf, b"0009test\n");
    }

    #[test]
    fn test_pktline_read_invalid_length() {
        let mut reader = PktLineReader::new(Cursor::new(b"0003".to_vec()));
        assert!(reader.read().is_err());

        let mut reader = PktLineReader::new(Cursor::new(b"zzzz".to_vec()));
        assert!(reader.read().is_err());

        let mut reader = PktLineReader::new(Cursor::new(b"+009test\n".to_vec()));
        assert!(matches!(reader.read(), Err(GitError::InvalidPktLine(_))));
    }

    #[test]
    fn test_pktline_read_truncated() {
        let mut reader = PktLineReader::new(Cursor::new(b"000ahel".to_vec()));
        assert!(matches!(reader.read(), Err(GitError::InvalidPktLine(_))));
    }

    #[test]
    fn test_pktline_empty_data() {
        assert_eq!(&encode_frame(&[]).unwrap()[..], b"0004");
    }

    #[test]
    fn test_frame_size_limit() {
        let max = encode_frame(&vec![7u8; MAX_PAYLOAD_LEN]).unwrap();
        assert_eq!(&max[..4], b"ffff");
        assert_eq!(max.len(), MAX_FRAME_LEN);

        assert!(matches!(
            encode_frame(&vec![7u8; MAX_PAYLOAD_LEN + 1]),
            Err(GitError::FrameTooLarge(n)) if n == MAX_PAYLOAD_LEN + 1
        ));
        assert!(matches!(
            encode_tagged(1, &vec![7u8; MAX_PAYLOAD_LEN]),
            Err(GitError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_encode_tagged() {
        assert_eq!(&encode_tagged(2, b"\n").unwrap()[..], b"0006\x02\n");
    }

    proptest! {
        #[test]
        fn header_matches_frame_length(payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let frame = encode_frame(&payload).unwrap();
            let declared = usize::from_str_radix(std::str::from_utf8(&frame[..4]).unwrap(), 16).unwrap();
            prop_assert_eq!(declared, frame.len());
            prop_assert_eq!(&frame[4..], &payload[..]);
        }

        #[test]
        fn header_matches_frame_length_near_limit(extra in 0usize..64) {
            let payload = vec![0x5au8; MAX_PAYLOAD_LEN - extra];
            let frame = encode_frame(&payload).unwrap();
            let declared = usize::from_str_radix(std::str::from_utf8(&frame[..4]).unwrap(), 16).unwrap();
            prop_assert_eq!(declared, frame.len());
        }
    }
}

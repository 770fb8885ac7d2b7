//! Splitting a payload into bounded slices.

use bytes::Bytes;

/// Iterator over consecutive slices of at most `max_size` bytes.
///
/// Slices share the source buffer. The iterator is `Clone`, so a sequence
/// can be restarted from any point by cloning it.
#[derive(Debug, Clone)]
pub struct Chunks {
    remaining: Bytes,
    max_size: usize,
}

/// Splits `bytes` into slices of `max_size` bytes; the last may be shorter.
///
/// # Panics
///
/// Panics if `max_size` is zero.
pub fn chunks(bytes: Bytes, max_size: usize) -> Chunks {
    assert!(max_size > 0, "chunk size must be non-zero");
    Chunks {
        remaining: bytes,
        max_size,
    }
}

impl Iterator for Chunks {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.remaining.is_empty() {
            return None;
        }
        let at = self.max_size.min(self.remaining.len());
        Some(self.remaining.split_to(at))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining.len().div_ceil(self.max_size);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Chunks {}

impl std::iter::FusedIterator for Chunks {}

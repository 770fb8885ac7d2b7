//! Single-producer, single-consumer output sequence.
//!
//! The producer side ([`OutputSink`]) may append frames eagerly while the
//! consumer side ([`OutputSequence`]) pulls them lazily as a
//! [`futures::Stream`]. Only one consumer exists per sequence and polling
//! requires `&mut`, so reads are always issued one at a time.

use crate::{GitError, Result};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

#[derive(Debug)]
enum State {
    Open,
    Ended,
    Errored(String),
}

#[derive(Debug)]
struct Shared {
    queue: VecDeque<Bytes>,
    state: State,
    waker: Option<Waker>,
}

impl Shared {
    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

/// Producer half of an output sequence.
#[derive(Debug)]
pub struct OutputSink {
    shared: Arc<Mutex<Shared>>,
}

/// Consumer half of an output sequence.
#[derive(Debug)]
pub struct OutputSequence {
    shared: Arc<Mutex<Shared>>,
}

/// Creates a connected producer/consumer pair.
pub fn output_sequence() -> (OutputSink, OutputSequence) {
    let shared = Arc::new(Mutex::new(Shared {
        queue: VecDeque::new(),
        state: State::Open,
        waker: None,
    }));
    (
        OutputSink {
            shared: shared.clone(),
        },
        OutputSequence { shared },
    )
}

impl OutputSink {
    /// Appends an item to the tail of the sequence.
    ///
    /// # Errors
    ///
    /// Returns [`GitError::IllegalState`] after [`end`](Self::end) or
    /// [`abort`](Self::abort).
    pub fn append(&self, item: impl Into<Bytes>) -> Result<()> {
        let mut shared = self.shared.lock();
        if !matches!(shared.state, State::Open) {
            return Err(GitError::IllegalState("append after end of output"));
        }
        shared.queue.push_back(item.into());
        shared.wake();
        Ok(())
    }

    /// Marks that no more items will be appended.
    ///
    /// # Errors
    ///
    /// Returns [`GitError::IllegalState`] if the sequence was already ended
    /// or aborted; the existing state is left untouched.
    pub fn end(&self) -> Result<()> {
        let mut shared = self.shared.lock();
        if !matches!(shared.state, State::Open) {
            return Err(GitError::IllegalState("output already ended"));
        }
        shared.state = State::Ended;
        shared.wake();
        Ok(())
    }

    /// Fails the sequence. Every later read reports `reason`, including
    /// reads that would otherwise have returned buffered items.
    pub fn abort(&self, reason: impl Into<String>) {
        let mut shared = self.shared.lock();
        shared.state = State::Errored(reason.into());
        shared.queue.clear();
        shared.wake();
    }
}

impl OutputSequence {
    /// Drains the sequence and concatenates every item.
    pub async fn collect_bytes(mut self) -> Result<Bytes> {
        let mut out = BytesMut::new();
        while let Some(item) = self.next().await {
            out.extend_from_slice(&item?);
        }
        Ok(out.freeze())
    }
}

impl Stream for OutputSequence {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut shared = self.shared.lock();
        if let State::Errored(reason) = &shared.state {
            return Poll::Ready(Some(Err(GitError::Aborted(reason.clone()))));
        }
        if let Some(item) = shared.queue.pop_front() {
            return Poll::Ready(Some(Ok(item)));
        }
        if matches!(shared.state, State::Ended) {
            return Poll::Ready(None);
        }
        shared.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn buffered_items_then_done() {
        let (sink, mut seq) = output_sequence();
        sink.append(Bytes::from_static(b"a")).unwrap();
        sink.append(Bytes::from_static(b"b")).unwrap();
        sink.end().unwrap();

        assert_eq!(seq.next().await.unwrap().unwrap(), Bytes::from_static(b"a"));
        assert_eq!(seq.next().await.unwrap().unwrap(), Bytes::from_static(b"b"));
        assert!(seq.next().await.is_none());
        assert!(seq.next().await.is_none());
    }

    #[tokio::test]
    async fn waiting_reader_is_woken() {
        let (sink, mut seq) = output_sequence();
        let reader = tokio::spawn(async move {
            let first = seq.next().await;
            let second = seq.next().await;
            (first, second)
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        sink.append(Bytes::from_static(b"late")).unwrap();
        sink.end().unwrap();

        let (first, second) = reader.await.unwrap();
        assert_eq!(first.unwrap().unwrap(), Bytes::from_static(b"late"));
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn end_wakes_waiting_reader() {
        let (sink, mut seq) = output_sequence();
        let reader = tokio::spawn(async move { seq.next().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        sink.end().unwrap();
        assert!(reader.await.unwrap().is_none());
    }

    #[test]
    fn append_after_end_is_rejected() {
        let (sink, _seq) = output_sequence();
        sink.end().unwrap();
        assert!(matches!(
            sink.append(Bytes::from_static(b"x")),
            Err(GitError::IllegalState(_))
        ));
    }

    #[tokio::test]
    async fn double_end_keeps_state() {
        let (sink, mut seq) = output_sequence();
        sink.append(Bytes::from_static(b"x")).unwrap();
        sink.end().unwrap();
        assert!(matches!(sink.end(), Err(GitError::IllegalState(_))));

        assert_eq!(seq.next().await.unwrap().unwrap(), Bytes::from_static(b"x"));
        assert!(seq.next().await.is_none());
    }

    #[tokio::test]
    async fn abort_overrides_buffered_items() {
        let (sink, mut seq) = output_sequence();
        sink.append(Bytes::from_static(b"x")).unwrap();
        sink.abort("pack failed");

        assert!(matches!(seq.next().await, Some(Err(GitError::Aborted(r))) if r == "pack failed"));
        assert!(matches!(seq.next().await, Some(Err(GitError::Aborted(_)))));
        assert!(sink.append(Bytes::from_static(b"y")).is_err());
    }

    #[tokio::test]
    async fn collect_bytes_concatenates() {
        let (sink, seq) = output_sequence();
        sink.append(Bytes::from_static(b"ab")).unwrap();
        sink.append(Bytes::from_static(b"cd")).unwrap();
        sink.end().unwrap();
        assert_eq!(seq.collect_bytes().await.unwrap(), Bytes::from_static(b"abcd"));
    }
}

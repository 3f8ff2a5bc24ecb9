//! Push-based byte sinks fed by the exporter.

use std::io::Write;

use bytes::Bytes;
use keel_crypto::{Hash, NarHasher};

use crate::error::SinkError;

/// How a stream ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamStatus {
    /// Every chunk of a well-formed archive was delivered.
    Complete,
    /// The producer stopped early; the reason is for diagnostics only.
    Truncated(String),
}

impl StreamStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// Destination of an archive stream.
///
/// `write` may block to apply backpressure. `close` is called exactly once,
/// after the last `write`, whether or not the export succeeded.
pub trait StreamSink: Send {
    fn write(&mut self, chunk: Bytes) -> Result<(), SinkError>;

    fn close(&mut self, status: StreamStatus) -> Result<(), SinkError>;
}

impl<S: StreamSink + ?Sized> StreamSink for &mut S {
    fn write(&mut self, chunk: Bytes) -> Result<(), SinkError> {
        (**self).write(chunk)
    }

    fn close(&mut self, status: StreamStatus) -> Result<(), SinkError> {
        (**self).close(status)
    }
}

impl<S: StreamSink + ?Sized> StreamSink for Box<S> {
    fn write(&mut self, chunk: Bytes) -> Result<(), SinkError> {
        (**self).write(chunk)
    }

    fn close(&mut self, status: StreamStatus) -> Result<(), SinkError> {
        (**self).close(status)
    }
}

// ---------------------------------------------------------------------------
// WriterSink
// ---------------------------------------------------------------------------

/// Sink over any [`std::io::Write`]. Flushes on a complete close.
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: W,
    status: Option<StreamStatus>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            status: None,
        }
    }

    /// Status passed to `close`, if it has been called.
    pub fn status(&self) -> Option<&StreamStatus> {
        self.status.as_ref()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> StreamSink for WriterSink<W> {
    fn write(&mut self, chunk: Bytes) -> Result<(), SinkError> {
        self.writer.write_all(&chunk)?;
        Ok(())
    }

    fn close(&mut self, status: StreamStatus) -> Result<(), SinkError> {
        let complete = status.is_complete();
        self.status = Some(status);
        if complete {
            self.writer.flush()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CallbackSink
// ---------------------------------------------------------------------------

/// Sink that hands each chunk to a closure.
pub struct CallbackSink<F> {
    on_chunk: F,
    status: Option<StreamStatus>,
}

impl<F> CallbackSink<F>
where
    F: FnMut(Bytes) -> Result<(), SinkError> + Send,
{
    pub fn new(on_chunk: F) -> Self {
        Self {
            on_chunk,
            status: None,
        }
    }

    pub fn status(&self) -> Option<&StreamStatus> {
        self.status.as_ref()
    }
}

impl<F> StreamSink for CallbackSink<F>
where
    F: FnMut(Bytes) -> Result<(), SinkError> + Send,
{
    fn write(&mut self, chunk: Bytes) -> Result<(), SinkError> {
        (self.on_chunk)(chunk)
    }

    fn close(&mut self, status: StreamStatus) -> Result<(), SinkError> {
        self.status = Some(status);
        Ok(())
    }
}

impl<F> std::fmt::Debug for CallbackSink<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSink")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// DiscardSink / HashingSink
// ---------------------------------------------------------------------------

/// Sink that drops everything it receives.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscardSink;

impl StreamSink for DiscardSink {
    fn write(&mut self, _chunk: Bytes) -> Result<(), SinkError> {
        Ok(())
    }

    fn close(&mut self, _status: StreamStatus) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Forwards to an inner sink while computing the archive's hash and size.
#[derive(Debug)]
pub struct HashingSink<S> {
    inner: S,
    hasher: NarHasher,
}

impl<S: StreamSink> HashingSink<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            hasher: NarHasher::new(),
        }
    }

    /// Bytes seen so far.
    pub fn size(&self) -> u64 {
        self.hasher.size()
    }

    pub fn finish(self) -> (Hash, u64, S) {
        let (hash, size) = self.hasher.finish();
        (hash, size, self.inner)
    }
}

impl HashingSink<DiscardSink> {
    /// Hash an archive without keeping it.
    pub fn discarding() -> Self {
        Self::new(DiscardSink)
    }
}

impl<S: StreamSink> StreamSink for HashingSink<S> {
    fn write(&mut self, chunk: Bytes) -> Result<(), SinkError> {
        self.hasher.update(&chunk);
        self.inner.write(chunk)
    }

    fn close(&mut self, status: StreamStatus) -> Result<(), SinkError> {
        self.inner.close(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_sink_collects_and_records_status() {
        let mut sink = WriterSink::new(Vec::new());
        sink.write(Bytes::from_static(b"abc")).unwrap();
        sink.write(Bytes::from_static(b"def")).unwrap();
        sink.close(StreamStatus::Complete).unwrap();
        assert_eq!(sink.status(), Some(&StreamStatus::Complete));
        assert_eq!(sink.into_inner(), b"abcdef");
    }

    #[test]
    fn callback_sink_propagates_errors() {
        let mut seen = 0;
        let mut sink = CallbackSink::new(|chunk: Bytes| {
            seen += chunk.len();
            if seen > 4 {
                Err(SinkError::Downstream("full".into()))
            } else {
                Ok(())
            }
        });
        sink.write(Bytes::from_static(b"1234")).unwrap();
        assert!(matches!(
            sink.write(Bytes::from_static(b"5")),
            Err(SinkError::Downstream(_))
        ));
        sink.close(StreamStatus::Truncated("full".into())).unwrap();
        assert_eq!(
            sink.status(),
            Some(&StreamStatus::Truncated("full".into()))
        );
    }

    #[test]
    fn hashing_sink_matches_direct_hash() {
        let mut sink = HashingSink::new(WriterSink::new(Vec::new()));
        sink.write(Bytes::from_static(b"hello ")).unwrap();
        sink.write(Bytes::from_static(b"world")).unwrap();
        sink.close(StreamStatus::Complete).unwrap();
        let (hash, size, inner) = sink.finish();
        assert_eq!(size, 11);
        assert_eq!(hash, Hash::sha256_from_bytes(b"hello world"));
        assert_eq!(inner.into_inner(), b"hello world");
    }

    #[test]
    fn sink_through_mutable_reference() {
        fn feed(mut sink: impl StreamSink) {
            sink.write(Bytes::from_static(b"x")).unwrap();
            sink.close(StreamStatus::Complete).unwrap();
        }
        let mut sink = WriterSink::new(Vec::new());
        feed(&mut sink);
        assert_eq!(sink.into_inner(), b"x");
    }
}

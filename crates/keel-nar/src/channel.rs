//! Bridge from the blocking exporter to an async consumer.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{NarError, NarResult, SinkError};
use crate::sink::{StreamSink, StreamStatus};

#[derive(Debug)]
enum Message {
    Chunk(Bytes),
    End(StreamStatus),
}

/// Create a bounded channel carrying one archive.
///
/// The exporter writes into the [`ChannelSink`] from a blocking thread; a
/// full channel blocks it until the [`NarStream`] side catches up.
pub fn nar_channel(capacity: usize) -> (ChannelSink, NarStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ChannelSink { tx },
        NarStream {
            rx,
            finished: false,
        },
    )
}

/// Producer half. Must be driven from a blocking context, never from
/// inside an async task.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Message>,
}

impl StreamSink for ChannelSink {
    fn write(&mut self, chunk: Bytes) -> Result<(), SinkError> {
        self.tx
            .blocking_send(Message::Chunk(chunk))
            .map_err(|_| SinkError::Cancelled)
    }

    fn close(&mut self, status: StreamStatus) -> Result<(), SinkError> {
        self.tx
            .blocking_send(Message::End(status))
            .map_err(|_| SinkError::Cancelled)
    }
}

/// Consumer half. Dropping it cancels the export.
#[derive(Debug)]
pub struct NarStream {
    rx: mpsc::Receiver<Message>,
    finished: bool,
}

impl NarStream {
    /// Next chunk of the archive, or `None` once it is complete.
    ///
    /// A producer that stopped early yields [`NarError::Truncated`].
    pub async fn next_chunk(&mut self) -> NarResult<Option<Bytes>> {
        if self.finished {
            return Ok(None);
        }
        let message = self.rx.recv().await;
        self.on_message(message)
    }

    /// Blocking variant of [`next_chunk`](Self::next_chunk) for synchronous
    /// consumers.
    pub fn blocking_next_chunk(&mut self) -> NarResult<Option<Bytes>> {
        if self.finished {
            return Ok(None);
        }
        let message = self.rx.blocking_recv();
        self.on_message(message)
    }

    fn on_message(&mut self, message: Option<Message>) -> NarResult<Option<Bytes>> {
        match message {
            Some(Message::Chunk(chunk)) => Ok(Some(chunk)),
            Some(Message::End(StreamStatus::Complete)) => {
                self.finished = true;
                Ok(None)
            }
            Some(Message::End(StreamStatus::Truncated(reason))) => {
                self.finished = true;
                Err(NarError::Truncated(reason))
            }
            None => {
                self.finished = true;
                Err(NarError::Truncated(
                    "producer exited without closing the stream".into(),
                ))
            }
        }
    }

    /// Read the whole archive into memory.
    pub async fn collect(mut self) -> NarResult<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

//! Serialization of a store object's file tree into a NAR stream.

use std::io::Read;
use std::path::Path;

use bytes::{BufMut, Bytes, BytesMut};
use keel_store::{name_to_path, EntryKind, ObjectReader, StoreProvider};
use keel_types::StorePath;

use crate::error::{NarError, NarResult};
use crate::format::{self, padding_len};
use crate::sink::{StreamSink, StreamStatus};

/// Default size of chunks handed to the sink.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Writes store objects as NAR streams.
///
/// Output is deterministic: directory entries are emitted in ascending byte
/// order of their names, and only the executable bit of a file's mode is
/// recorded. File contents are read in chunk-sized pieces.
#[derive(Clone, Debug)]
pub struct ArchiveExporter {
    chunk_size: usize,
}

impl ArchiveExporter {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Stream the archive of `path` into `sink`, returning its size.
    ///
    /// The sink is closed exactly once whatever happens: with
    /// [`StreamStatus::Complete`] on success, otherwise with
    /// [`StreamStatus::Truncated`] before the error is returned.
    pub fn export<S, K>(&self, store: &S, path: &StorePath, sink: &mut K) -> NarResult<u64>
    where
        S: StoreProvider + ?Sized,
        K: StreamSink + ?Sized,
    {
        tracing::debug!(path = %path, "starting export");
        let result = store
            .open_object(path)
            .map_err(NarError::from)
            .and_then(|tree| self.write_archive(tree.as_ref(), sink));
        let result = finish(sink, result);
        if let Ok(size) = result {
            tracing::debug!(path = %path, size, "export complete");
        }
        result
    }

    /// Stream the archive of an already opened tree. Same close guarantee as
    /// [`export`](Self::export).
    pub fn export_tree<K>(&self, tree: &dyn ObjectReader, sink: &mut K) -> NarResult<u64>
    where
        K: StreamSink + ?Sized,
    {
        let result = self.write_archive(tree, sink);
        finish(sink, result)
    }

    fn write_archive<K: StreamSink + ?Sized>(
        &self,
        tree: &dyn ObjectReader,
        sink: &mut K,
    ) -> NarResult<u64> {
        let mut encoder = Encoder {
            sink,
            buf: BytesMut::with_capacity(self.chunk_size),
            chunk_size: self.chunk_size,
            written: 0,
        };
        encoder.token(format::NAR_VERSION_MAGIC)?;
        encoder.node(tree, Path::new(""))?;
        encoder.flush()?;
        Ok(encoder.written)
    }
}

impl Default for ArchiveExporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize a whole tree into memory.
pub fn archive_to_vec(tree: &dyn ObjectReader) -> NarResult<Vec<u8>> {
    let mut sink = crate::sink::WriterSink::new(Vec::new());
    ArchiveExporter::new().export_tree(tree, &mut sink)?;
    Ok(sink.into_inner())
}

/// Deliver the termination signal for an export that produced `result`.
fn finish<K: StreamSink + ?Sized>(sink: &mut K, result: NarResult<u64>) -> NarResult<u64> {
    match result {
        Ok(size) => {
            sink.close(StreamStatus::Complete)?;
            Ok(size)
        }
        Err(err) => {
            if let Err(close_err) = sink.close(StreamStatus::Truncated(err.to_string())) {
                tracing::warn!(error = %close_err, "failed to close sink after export error");
            }
            Err(err)
        }
    }
}

/// Buffers tokens and hands full chunks to the sink.
struct Encoder<'s, K: ?Sized> {
    sink: &'s mut K,
    buf: BytesMut,
    chunk_size: usize,
    written: u64,
}

impl<K: StreamSink + ?Sized> Encoder<'_, K> {
    fn raw(&mut self, data: &[u8]) -> NarResult<()> {
        let mut data = data;
        while !data.is_empty() {
            let room = self.chunk_size - self.buf.len();
            let take = room.min(data.len());
            self.buf.put_slice(&data[..take]);
            data = &data[take..];
            if self.buf.len() == self.chunk_size {
                self.emit()?;
            }
        }
        Ok(())
    }

    fn emit(&mut self) -> NarResult<()> {
        let chunk: Bytes = self.buf.split().freeze();
        self.written += chunk.len() as u64;
        self.sink.write(chunk)?;
        Ok(())
    }

    fn flush(&mut self) -> NarResult<()> {
        if !self.buf.is_empty() {
            self.emit()?;
        }
        Ok(())
    }

    fn len_prefix(&mut self, len: u64) -> NarResult<()> {
        self.raw(&len.to_le_bytes())
    }

    fn pad(&mut self, len: u64) -> NarResult<()> {
        const ZEROS: [u8; 8] = [0; 8];
        self.raw(&ZEROS[..padding_len(len)])
    }

    fn token(&mut self, data: &[u8]) -> NarResult<()> {
        self.len_prefix(data.len() as u64)?;
        self.raw(data)?;
        self.pad(data.len() as u64)
    }

    fn node(&mut self, tree: &dyn ObjectReader, rel: &Path) -> NarResult<()> {
        let kind = tree.entry(rel).map_err(|e| io_error(rel, e))?;
        self.token(format::OPEN)?;
        self.token(format::TYPE)?;
        match kind {
            EntryKind::Regular { executable, size } => {
                self.token(format::REGULAR)?;
                if executable {
                    self.token(format::EXECUTABLE)?;
                    self.token(b"")?;
                }
                self.token(format::CONTENTS)?;
                self.contents(tree, rel, size)?;
            }
            EntryKind::Symlink { target } => {
                self.token(format::SYMLINK)?;
                self.token(format::TARGET)?;
                self.token(&target)?;
            }
            EntryKind::Directory => {
                self.token(format::DIRECTORY)?;
                let mut names = tree.list(rel).map_err(|e| io_error(rel, e))?;
                names.sort_unstable();
                for name in &names {
                    format::validate_name(name)?;
                    self.token(format::ENTRY)?;
                    self.token(format::OPEN)?;
                    self.token(format::NAME)?;
                    self.token(name)?;
                    self.token(format::NODE)?;
                    let child = name_to_path(name).map_err(|e| io_error(rel, e))?;
                    self.node(tree, &rel.join(child))?;
                    self.token(format::CLOSE)?;
                }
            }
        }
        self.token(format::CLOSE)
    }

    /// Stream exactly `size` bytes of file contents plus padding.
    fn contents(&mut self, tree: &dyn ObjectReader, rel: &Path, size: u64) -> NarResult<()> {
        self.len_prefix(size)?;
        let mut reader = tree.open(rel).map_err(|e| io_error(rel, e))?;
        let scratch_len = usize::try_from(size).map_or(self.chunk_size, |s| s.clamp(1, self.chunk_size));
        let mut scratch = vec![0u8; scratch_len];
        let mut remaining = size;

        while remaining > 0 {
            let want = usize::try_from(remaining).map_or(scratch.len(), |r| r.min(scratch.len()));
            let n = reader
                .read(&mut scratch[..want])
                .map_err(|e| io_error(rel, e))?;
            if n == 0 {
                return Err(size_changed(rel, size, size - remaining));
            }
            self.raw(&scratch[..n])?;
            remaining -= n as u64;
        }

        let mut extra = [0u8; 1];
        if reader.read(&mut extra).map_err(|e| io_error(rel, e))? != 0 {
            return Err(size_changed(rel, size, size + 1));
        }

        self.pad(size)
    }
}

fn io_error(rel: &Path, source: std::io::Error) -> NarError {
    NarError::Io {
        path: rel.display().to_string(),
        source,
    }
}

fn size_changed(rel: &Path, expected: u64, actual: u64) -> NarError {
    NarError::SizeChanged {
        path: rel.display().to_string(),
        expected,
        actual,
    }
}

//! Streaming Nix archive (NAR) export for Keel.
//!
//! A NAR is the canonical serialization of a store object's file tree: it
//! is what `nar_hash` and `nar_size` describe. This crate writes one from
//! any [`ObjectReader`](keel_store::ObjectReader) into a push-based
//! [`StreamSink`], and reads one back with [`NarDecoder`].
//!
//! # Sinks
//!
//! - [`ChannelSink`] / [`NarStream`] -- bounded channel to an async consumer
//! - [`WriterSink`] -- any `std::io::Write`
//! - [`CallbackSink`] -- a closure per chunk
//! - [`HashingSink`] -- computes the NAR hash while forwarding
//!
//! Whatever happens during an export, the sink's `close` is called exactly
//! once, after the last `write`, and says whether the stream is complete.

pub mod channel;
pub mod decoder;
pub mod error;
pub mod exporter;
pub mod format;
pub mod sink;

pub use channel::{nar_channel, ChannelSink, NarStream};
pub use decoder::{decode_nar, NarDecoder};
pub use error::{NarError, NarResult, SinkError};
pub use exporter::{archive_to_vec, ArchiveExporter, DEFAULT_CHUNK_SIZE};
pub use format::NAR_VERSION_MAGIC;
pub use sink::{CallbackSink, DiscardSink, HashingSink, StreamSink, StreamStatus, WriterSink};

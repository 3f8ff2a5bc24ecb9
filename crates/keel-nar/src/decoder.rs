//! Parsing NAR streams back into file trees.

use std::collections::BTreeMap;
use std::io::{self, Read};

use keel_store::MemoryNode;

use crate::error::{NarError, NarResult};
use crate::format::{self, padding_len, MAX_STRING_LEN};

/// Nesting depth beyond which an archive is rejected.
const MAX_DEPTH: usize = 256;

/// Reads one archive from a byte source.
///
/// Enforces the same grammar the exporter produces: zero padding, entries in
/// strictly ascending name order, valid names, and nothing after the root
/// node.
pub struct NarDecoder<R> {
    reader: R,
    offset: u64,
}

impl<R: Read> NarDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, offset: 0 }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn decode(mut self) -> NarResult<MemoryNode> {
        self.expect(format::NAR_VERSION_MAGIC)?;
        let root = self.node(0)?;

        let mut extra = [0u8; 1];
        let n = self.reader.read(&mut extra).map_err(|e| self.io(e))?;
        if n != 0 {
            return Err(self.malformed("trailing data after archive"));
        }
        Ok(root)
    }

    fn node(&mut self, depth: usize) -> NarResult<MemoryNode> {
        if depth > MAX_DEPTH {
            return Err(self.malformed("directory nesting too deep"));
        }
        self.expect(format::OPEN)?;
        self.expect(format::TYPE)?;
        let kind = self.string_token()?;

        let node = match kind.as_slice() {
            format::REGULAR => {
                let mut tag = self.string_token()?;
                let executable = tag == format::EXECUTABLE;
                if executable {
                    self.expect(b"")?;
                    tag = self.string_token()?;
                }
                if tag != format::CONTENTS {
                    return Err(self.unexpected("contents", &tag));
                }
                let contents = self.contents()?;
                self.expect(format::CLOSE)?;
                MemoryNode::Regular {
                    executable,
                    contents,
                }
            }
            format::SYMLINK => {
                self.expect(format::TARGET)?;
                let target = self.string_token()?;
                self.expect(format::CLOSE)?;
                MemoryNode::Symlink { target }
            }
            format::DIRECTORY => {
                let mut entries: BTreeMap<Vec<u8>, MemoryNode> = BTreeMap::new();
                loop {
                    let tag = self.string_token()?;
                    if tag == format::CLOSE {
                        break;
                    }
                    if tag != format::ENTRY {
                        return Err(self.unexpected("entry", &tag));
                    }
                    self.expect(format::OPEN)?;
                    self.expect(format::NAME)?;
                    let name = self.string_token()?;
                    format::validate_name(&name)?;
                    if let Some((last, _)) = entries.last_key_value() {
                        if name <= *last {
                            return Err(self.malformed(format!(
                                "entry {:?} is not after {:?}",
                                String::from_utf8_lossy(&name),
                                String::from_utf8_lossy(last)
                            )));
                        }
                    }
                    self.expect(format::NODE)?;
                    let child = self.node(depth + 1)?;
                    self.expect(format::CLOSE)?;
                    entries.insert(name, child);
                }
                MemoryNode::Directory { entries }
            }
            _ => return Err(self.unexpected("node type", &kind)),
        };
        Ok(node)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> NarResult<()> {
        self.reader.read_exact(buf).map_err(|e| self.io(e))?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    fn length(&mut self) -> NarResult<u64> {
        let mut len = [0u8; 8];
        self.read_exact(&mut len)?;
        Ok(u64::from_le_bytes(len))
    }

    fn padding(&mut self, len: u64) -> NarResult<()> {
        let mut pad = [0u8; 8];
        let pad = &mut pad[..padding_len(len)];
        self.read_exact(pad)?;
        if pad.iter().any(|&b| b != 0) {
            return Err(self.malformed("non-zero padding"));
        }
        Ok(())
    }

    /// A short token: a keyword, name or symlink target.
    fn string_token(&mut self) -> NarResult<Vec<u8>> {
        let len = self.length()?;
        if len > MAX_STRING_LEN {
            return Err(self.malformed(format!("string of {len} bytes is too long")));
        }
        let mut data = vec![0u8; len as usize];
        self.read_exact(&mut data)?;
        self.padding(len)?;
        Ok(data)
    }

    fn contents(&mut self) -> NarResult<Vec<u8>> {
        let len = self.length()?;
        let mut data = Vec::new();
        let result = (&mut self.reader).take(len).read_to_end(&mut data);
        let read = result.map_err(|e| self.io(e))?;
        self.offset += read as u64;
        if read as u64 != len {
            return Err(NarError::Truncated(format!(
                "file contents end after {read} of {len} bytes"
            )));
        }
        self.padding(len)?;
        Ok(data)
    }

    fn expect(&mut self, token: &[u8]) -> NarResult<()> {
        let start = self.offset;
        let actual = self.string_token()?;
        if actual != token {
            return Err(NarError::Malformed {
                offset: start,
                reason: format!(
                    "expected {:?}, found {:?}",
                    String::from_utf8_lossy(token),
                    String::from_utf8_lossy(&actual)
                ),
            });
        }
        Ok(())
    }

    fn unexpected(&self, wanted: &str, actual: &[u8]) -> NarError {
        self.malformed(format!(
            "expected {wanted}, found {:?}",
            String::from_utf8_lossy(actual)
        ))
    }

    fn malformed(&self, reason: impl Into<String>) -> NarError {
        NarError::Malformed {
            offset: self.offset,
            reason: reason.into(),
        }
    }

    fn io(&self, err: io::Error) -> NarError {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            NarError::Truncated(format!("archive ends at offset {}", self.offset))
        } else {
            NarError::Io {
                path: format!("<archive offset {}>", self.offset),
                source: err,
            }
        }
    }
}

/// Decode an archive held in memory.
pub fn decode_nar(bytes: &[u8]) -> NarResult<MemoryNode> {
    NarDecoder::new(bytes).decode()
}

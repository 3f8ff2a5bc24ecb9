//! Token vocabulary of the Nix archive format.
//!
//! Every token is a byte string written as a little-endian `u64` length,
//! the bytes, and zero padding up to a multiple of 8.

use crate::error::{NarError, NarResult};

pub const NAR_VERSION_MAGIC: &[u8] = b"nix-archive-1";

pub(crate) const OPEN: &[u8] = b"(";
pub(crate) const CLOSE: &[u8] = b")";
pub(crate) const TYPE: &[u8] = b"type";
pub(crate) const REGULAR: &[u8] = b"regular";
pub(crate) const DIRECTORY: &[u8] = b"directory";
pub(crate) const SYMLINK: &[u8] = b"symlink";
pub(crate) const EXECUTABLE: &[u8] = b"executable";
pub(crate) const CONTENTS: &[u8] = b"contents";
pub(crate) const TARGET: &[u8] = b"target";
pub(crate) const ENTRY: &[u8] = b"entry";
pub(crate) const NAME: &[u8] = b"name";
pub(crate) const NODE: &[u8] = b"node";

/// Longest name or symlink target accepted when decoding.
pub(crate) const MAX_STRING_LEN: u64 = 4096;

/// Zero bytes needed after a token of `len` bytes.
pub(crate) fn padding_len(len: u64) -> usize {
    ((8 - len % 8) % 8) as usize
}

/// Encoded size of a token of `len` bytes.
pub fn token_size(len: u64) -> u64 {
    8 + len + padding_len(len) as u64
}

/// Check a directory entry name. Any other byte sequence is allowed.
pub fn validate_name(name: &[u8]) -> NarResult<()> {
    let reason = if name.is_empty() {
        "empty"
    } else if name == b"." || name == b".." {
        "reserved"
    } else if name.contains(&b'/') {
        "contains '/'"
    } else if name.contains(&0) {
        "contains NUL"
    } else {
        return Ok(());
    };
    Err(NarError::InvalidName {
        name: String::from_utf8_lossy(name).into_owned(),
        reason,
    })
}

//! Read access to the file tree of one store object.
//!
//! Paths passed to an [`ObjectReader`] are relative to the object root; the
//! empty path names the root itself. Entry names and symlink targets are raw
//! bytes, since archives record them without any encoding.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Kind of a node in an object's file tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Regular { executable: bool, size: u64 },
    Directory,
    Symlink { target: Vec<u8> },
}

/// Handle for walking one store object's file tree.
pub trait ObjectReader: Send {
    /// Describe the node at `path` without following symlinks.
    fn entry(&self, path: &Path) -> io::Result<EntryKind>;

    /// Names of the entries of the directory at `path`, in any order.
    fn list(&self, path: &Path) -> io::Result<Vec<Vec<u8>>>;

    /// Stream the contents of the regular file at `path`.
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send + '_>>;
}

// ---------------------------------------------------------------------------
// On-disk objects
// ---------------------------------------------------------------------------

/// A store object on the real filesystem.
#[derive(Clone, Debug)]
pub struct DiskObject {
    root: PathBuf,
}

impl DiskObject {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.as_os_str().is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }
}

impl ObjectReader for DiskObject {
    fn entry(&self, path: &Path) -> io::Result<EntryKind> {
        let full = self.resolve(path);
        let meta = fs::symlink_metadata(&full)?;
        let file_type = meta.file_type();

        if file_type.is_symlink() {
            let target = os_into_bytes(fs::read_link(&full)?.into_os_string()).map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("symlink target of {} is not representable", full.display()),
                )
            })?;
            Ok(EntryKind::Symlink { target })
        } else if file_type.is_dir() {
            Ok(EntryKind::Directory)
        } else if file_type.is_file() {
            Ok(EntryKind::Regular {
                executable: is_executable(&meta),
                size: meta.len(),
            })
        } else {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{} is not a regular file, directory or symlink", full.display()),
            ))
        }
    }

    fn list(&self, path: &Path) -> io::Result<Vec<Vec<u8>>> {
        let full = self.resolve(path);
        let mut names = Vec::new();
        for entry in fs::read_dir(&full)? {
            let name = os_into_bytes(entry?.file_name()).map_err(|name| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("entry {name:?} in {} is not representable", full.display()),
                )
            })?;
            names.push(name);
        }
        Ok(names)
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send + '_>> {
        Ok(Box::new(fs::File::open(self.resolve(path))?))
    }
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o100 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    false
}

#[cfg(unix)]
fn os_into_bytes(s: OsString) -> Result<Vec<u8>, OsString> {
    use std::os::unix::ffi::OsStringExt;
    Ok(s.into_vec())
}

#[cfg(not(unix))]
fn os_into_bytes(s: OsString) -> Result<Vec<u8>, OsString> {
    s.into_string().map(String::into_bytes)
}

#[cfg(unix)]
fn os_as_bytes(s: &OsStr) -> Option<&[u8]> {
    use std::os::unix::ffi::OsStrExt;
    Some(s.as_bytes())
}

#[cfg(not(unix))]
fn os_as_bytes(s: &OsStr) -> Option<&[u8]> {
    s.to_str().map(str::as_bytes)
}

/// View an entry name as a relative path component.
///
/// Every name is representable on unix. Elsewhere only UTF-8 names are.
#[cfg(unix)]
pub fn name_to_path(name: &[u8]) -> io::Result<&Path> {
    use std::os::unix::ffi::OsStrExt;
    Ok(Path::new(OsStr::from_bytes(name)))
}

#[cfg(not(unix))]
pub fn name_to_path(name: &[u8]) -> io::Result<&Path> {
    std::str::from_utf8(name).map(Path::new).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("entry {:?} is not valid UTF-8", String::from_utf8_lossy(name)),
        )
    })
}

// ---------------------------------------------------------------------------
// In-memory objects
// ---------------------------------------------------------------------------

/// An owned file tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemoryNode {
    Regular { executable: bool, contents: Vec<u8> },
    Directory { entries: BTreeMap<Vec<u8>, MemoryNode> },
    Symlink { target: Vec<u8> },
}

impl MemoryNode {
    pub fn regular(contents: impl Into<Vec<u8>>) -> Self {
        Self::Regular {
            executable: false,
            contents: contents.into(),
        }
    }

    pub fn executable(contents: impl Into<Vec<u8>>) -> Self {
        Self::Regular {
            executable: true,
            contents: contents.into(),
        }
    }

    pub fn symlink(target: impl Into<Vec<u8>>) -> Self {
        Self::Symlink {
            target: target.into(),
        }
    }

    pub fn directory<N: Into<Vec<u8>>>(entries: impl IntoIterator<Item = (N, MemoryNode)>) -> Self {
        Self::Directory {
            entries: entries.into_iter().map(|(n, node)| (n.into(), node)).collect(),
        }
    }

    pub fn empty_directory() -> Self {
        Self::Directory {
            entries: BTreeMap::new(),
        }
    }

    /// Find the node at a relative path.
    pub fn lookup(&self, path: &Path) -> io::Result<&MemoryNode> {
        let mut node = self;
        for component in path.components() {
            let Component::Normal(name) = component else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("path {} is not a plain relative path", path.display()),
                ));
            };
            let child = match (node, os_as_bytes(name)) {
                (MemoryNode::Directory { entries }, Some(name)) => entries.get(name),
                _ => None,
            };
            node = child.ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no entry at {}", path.display()),
                )
            })?;
        }
        Ok(node)
    }
}

/// [`ObjectReader`] over a shared [`MemoryNode`].
#[derive(Clone, Debug)]
pub struct MemoryObject {
    root: Arc<MemoryNode>,
}

impl MemoryObject {
    pub fn new(root: impl Into<Arc<MemoryNode>>) -> Self {
        Self { root: root.into() }
    }
}

impl ObjectReader for MemoryObject {
    fn entry(&self, path: &Path) -> io::Result<EntryKind> {
        Ok(match self.root.lookup(path)? {
            MemoryNode::Regular {
                executable,
                contents,
            } => EntryKind::Regular {
                executable: *executable,
                size: contents.len() as u64,
            },
            MemoryNode::Directory { .. } => EntryKind::Directory,
            MemoryNode::Symlink { target } => EntryKind::Symlink {
                target: target.clone(),
            },
        })
    }

    fn list(&self, path: &Path) -> io::Result<Vec<Vec<u8>>> {
        match self.root.lookup(path)? {
            MemoryNode::Directory { entries } => Ok(entries.keys().cloned().collect()),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", path.display()),
            )),
        }
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send + '_>> {
        match self.root.lookup(path)? {
            MemoryNode::Regular { contents, .. } => Ok(Box::new(io::Cursor::new(contents.as_slice()))),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            )),
        }
    }
}

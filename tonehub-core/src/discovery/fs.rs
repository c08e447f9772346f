use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{IndexError, Result};

/// Minimal, async-capable filesystem abstraction used by the discoverer.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Check whether a path exists.
    async fn path_exists(&self, path: &Path) -> bool;

    /// Open a directory for iteration.
    async fn read_dir(&self, path: &Path) -> Result<Box<dyn ReadDirStream + Send>>;

    /// Fetch lightweight file metadata. Symlinks are resolved, but flagged.
    async fn metadata(&self, path: &Path) -> Result<FsMetadata>;
}

/// Lightweight metadata needed by the discoverer.
#[derive(Debug, Clone, Copy)]
pub struct FsMetadata {
    pub is_dir: bool,
    pub is_file: bool,
    pub is_symlink: bool,
    pub len: u64,
    /// Last modified time if available
    pub modified: Option<SystemTime>,
}

/// Async directory iterator (similar to tokio::fs::ReadDir).
#[async_trait]
pub trait ReadDirStream {
    /// Return next entry's path, or None when exhausted.
    async fn next_entry(&mut self) -> Result<Option<PathBuf>>;
}

/// Real filesystem implementation backed by tokio::fs.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for RealFs {
    async fn path_exists(&self, path: &Path) -> bool {
        // try_exists avoids errors for permission issues by returning false
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn read_dir(&self, path: &Path) -> Result<Box<dyn ReadDirStream + Send>> {
        let rd = tokio::fs::read_dir(path).await.map_err(|err| {
            IndexError::Io(io::Error::new(
                err.kind(),
                format!("read_dir failed for {}: {err}", path.display()),
            ))
        })?;
        Ok(Box::new(RealReadDir { inner: rd }))
    }

    async fn metadata(&self, path: &Path) -> Result<FsMetadata> {
        let link = tokio::fs::symlink_metadata(path).await?;
        let is_symlink = link.file_type().is_symlink();
        let md = if is_symlink {
            tokio::fs::metadata(path).await?
        } else {
            link
        };
        Ok(FsMetadata {
            is_dir: md.is_dir(),
            is_file: md.is_file(),
            is_symlink,
            len: md.len(),
            modified: md.modified().ok(),
        })
    }
}

struct RealReadDir {
    inner: tokio::fs::ReadDir,
}

#[async_trait]
impl ReadDirStream for RealReadDir {
    async fn next_entry(&mut self) -> Result<Option<PathBuf>> {
        Ok(self.inner.next_entry().await?.map(|entry| entry.path()))
    }
}

/// In-memory filesystem for tests.
/// Note: Paths are treated literally; callers should use consistent absolute or relative paths.
#[derive(Debug, Default, Clone)]
pub struct InMemoryFs {
    nodes: HashMap<PathBuf, Node>,
}

#[derive(Debug, Clone)]
enum Node {
    Dir { children: Vec<PathBuf> },
    File { len: u64, modified: Option<SystemTime> },
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    pub fn add_dir<P: Into<PathBuf>>(&mut self, path: P) {
        let path = path.into();
        if self.nodes.contains_key(&path) {
            return;
        }
        self.ensure_parent_link(&path);
        self.nodes.insert(
            path,
            Node::Dir {
                children: Vec::new(),
            },
        );
    }

    pub fn add_file<P: Into<PathBuf>>(&mut self, path: P, len: u64) {
        self.add_file_modified(path, len, None);
    }

    pub fn add_file_modified<P: Into<PathBuf>>(
        &mut self,
        path: P,
        len: u64,
        modified: Option<SystemTime>,
    ) {
        let path = path.into();
        self.ensure_parent_link(&path);
        self.nodes.insert(path, Node::File { len, modified });
    }

    fn ensure_parent_link(&mut self, path: &Path) {
        if let Some(parent) = path.parent() {
            // Ensure parent directory exists
            if !self.nodes.contains_key(parent) {
                self.nodes.insert(
                    parent.to_path_buf(),
                    Node::Dir {
                        children: Vec::new(),
                    },
                );
                // Recurse to ensure its parent exists
                self.ensure_parent_link(parent);
            }
            // Link child into parent
            if let Some(Node::Dir { children }) = self.nodes.get_mut(parent)
                && !children.iter().any(|p| p.as_path() == path)
            {
                children.push(path.to_path_buf());
            }
        }
    }
}

fn missing(path: &Path, op: &str) -> IndexError {
    IndexError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("{op} on missing path: {}", path.display()),
    ))
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn path_exists(&self, path: &Path) -> bool {
        self.nodes.contains_key(path)
    }

    async fn read_dir(&self, path: &Path) -> Result<Box<dyn ReadDirStream + Send>> {
        match self.nodes.get(path) {
            Some(Node::Dir { children }) => Ok(Box::new(InMemReadDir {
                queue: children.clone().into(),
            })),
            Some(Node::File { .. }) => Err(IndexError::Io(io::Error::other(
                format!("read_dir on file: {}", path.display()),
            ))),
            None => Err(missing(path, "read_dir")),
        }
    }

    async fn metadata(&self, path: &Path) -> Result<FsMetadata> {
        match self.nodes.get(path) {
            Some(Node::Dir { .. }) => Ok(FsMetadata {
                is_dir: true,
                is_file: false,
                is_symlink: false,
                len: 0,
                modified: None,
            }),
            Some(Node::File { len, modified }) => Ok(FsMetadata {
                is_dir: false,
                is_file: true,
                is_symlink: false,
                len: *len,
                modified: *modified,
            }),
            None => Err(missing(path, "metadata")),
        }
    }
}

struct InMemReadDir {
    queue: VecDeque<PathBuf>,
}

#[async_trait]
impl ReadDirStream for InMemReadDir {
    async fn next_entry(&mut self) -> Result<Option<PathBuf>> {
        Ok(self.queue.pop_front())
    }
}

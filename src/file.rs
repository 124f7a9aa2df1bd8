//! The followed file: its handle, identity, size baseline and ring buffer.
//!
//! Everything here runs synchronously under the shared mutex. Async callers
//! go through [`with_file`], which moves the work onto the blocking pool.

use crate::error::{Error, Result};
use crate::options::StartPosition;
use crate::ring::RingBuffer;
use std::fs::{File, Metadata};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Handle and buffer shared by the reader and the background loops.
pub(crate) type SharedFile = Arc<Mutex<TrackedFile>>;

/// Device and inode of a file; equal ids mean the same underlying file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileId {
    dev: u64,
    ino: u64,
}

impl FileId {
    #[cfg(unix)]
    pub(crate) fn from_metadata(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    /// Without inodes every file looks the same, leaving truncation as the only signal.
    #[cfg(not(unix))]
    pub(crate) fn from_metadata(_metadata: &Metadata) -> Self {
        Self { dev: 0, ino: 0 }
    }
}

/// Identity of whatever currently sits at `path`, or `None` if nothing does.
pub(crate) fn path_identity(path: &Path) -> io::Result<Option<FileId>> {
    match std::fs::metadata(path) {
        Ok(metadata) => Ok(Some(FileId::from_metadata(&metadata))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Makes `path` absolute once, canonicalizing the directory but not the file
/// name so a symlinked log is followed by name.
pub(crate) fn resolve_path(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path).map_err(|e| Error::InvalidPath {
        message: format!("{}: {}", path.display(), e),
    })?;
    let file_name = absolute.file_name().ok_or_else(|| Error::InvalidPath {
        message: format!("{} does not name a file", path.display()),
    })?;

    match absolute.parent().map(Path::canonicalize) {
        Some(Ok(dir)) => Ok(dir.join(file_name)),
        _ => Ok(absolute),
    }
}

/// The currently tracked file.
#[derive(Debug)]
pub(crate) struct TrackedFile {
    path: PathBuf,
    file: Option<File>,
    identity: Option<FileId>,
    last_size: u64,
    ring: RingBuffer,
    closed: bool,
}

impl TrackedFile {
    /// Opens `path` for reading, positioned according to `start`.
    pub(crate) fn open(path: PathBuf, start: StartPosition, capacity: usize) -> Result<Self> {
        let mut file = File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::FileNotFound {
                path: path.display().to_string(),
            },
            _ => Error::Io(e),
        })?;
        let metadata = file.metadata()?;
        if start == StartPosition::End {
            file.seek(SeekFrom::End(0))?;
        }

        Ok(Self {
            identity: Some(FileId::from_metadata(&metadata)),
            last_size: metadata.len(),
            file: Some(file),
            ring: RingBuffer::new(capacity),
            path,
            closed: false,
        })
    }

    pub(crate) fn identity(&self) -> Option<FileId> {
        self.identity
    }

    #[cfg(test)]
    pub(crate) fn has_handle(&self) -> bool {
        self.file.is_some()
    }

    /// Bytes waiting in the ring buffer.
    pub(crate) fn buffered(&self) -> usize {
        self.ring.len()
    }

    /// Whether the last fill stopped because the ring buffer had no room left.
    pub(crate) fn is_backlogged(&self) -> bool {
        self.ring.is_full()
    }

    /// Moves buffered bytes into `dst`.
    pub(crate) fn read_buffered(&mut self, dst: &mut [u8]) -> usize {
        self.ring.read(dst)
    }

    /// Copies whatever the handle has into the ring buffer.
    ///
    /// End-of-file and a full buffer are normal; so is having no handle
    /// while the path is missing.
    pub(crate) fn fill(&mut self) -> Result<usize> {
        if self.closed {
            return Ok(0);
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };

        let n = self.ring.read_from(file)?;
        if n > 0 {
            tracing::trace!(path = %self.path.display(), bytes = n, buffered = self.ring.len(), "filled");
        }
        if self.ring.is_full() {
            tracing::trace!(path = %self.path.display(), "buffer full, rest waits for the reader");
        }
        Ok(n)
    }

    /// Drops the current handle and opens the path again from offset 0.
    ///
    /// A missing path leaves the follower without a handle until a later
    /// cycle finds the file again.
    pub(crate) fn reopen(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.file = None;

        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "file missing, waiting for it to reappear");
                self.identity = None;
                self.last_size = 0;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let metadata = file.metadata()?;
        self.identity = Some(FileId::from_metadata(&metadata));
        self.last_size = metadata.len();
        self.file = Some(file);
        tracing::debug!(path = %self.path.display(), size = self.last_size, "reopened file");
        Ok(())
    }

    /// Whether the open file shrank below the last seen size or below our
    /// read offset. Records the new size either way.
    pub(crate) fn is_truncated(&mut self) -> Result<bool> {
        let Some(file) = self.file.as_mut() else {
            return Ok(false);
        };

        let size = file.metadata()?.len();
        let offset = file.stream_position()?;
        let truncated = detect_truncation(size, self.last_size, offset);
        self.last_size = size;

        if truncated {
            tracing::debug!(path = %self.path.display(), size, offset, "file truncated");
        }
        Ok(truncated)
    }

    /// Reopens when the file shrank in place. Returns whether it did.
    pub(crate) fn reopen_if_truncated(&mut self) -> Result<bool> {
        if self.is_truncated()? {
            self.reopen()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// One pass of rotation detection against the path on disk.
    ///
    /// A different file at the path is adopted; the same file is checked for
    /// truncation; a missing path is left alone until it comes back.
    pub(crate) fn check_rotation(&mut self) -> Result<()> {
        match path_identity(&self.path) {
            Ok(None) => Ok(()),
            Ok(Some(current)) if Some(current) == self.identity => {
                self.reopen_if_truncated().map(|_| ())
            }
            Ok(Some(_)) => {
                tracing::debug!(path = %self.path.display(), "file rotated");
                self.reopen()
            }
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "stat failed, reopening");
                self.reopen()
            }
        }
    }

    /// Releases the handle and buffered bytes. Later fills and reopens do nothing.
    pub(crate) fn close(&mut self) {
        self.closed = true;
        self.file = None;
        self.ring.clear();
    }
}

fn detect_truncation(size: u64, last_size: u64, offset: u64) -> bool {
    size < last_size || size < offset
}

/// Runs `op` on the tracked file from the blocking pool.
pub(crate) async fn with_file<T, F>(shared: &SharedFile, op: F) -> Result<T>
where
    F: FnOnce(&mut TrackedFile) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let shared = Arc::clone(shared);
    tokio::task::spawn_blocking(move || {
        let mut tracked = shared.lock().map_err(|_| Error::Poisoned)?;
        op(&mut tracked)
    })
    .await?
}

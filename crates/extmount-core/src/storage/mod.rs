//! The storage contract shared by every external backend.
//!
//! A [`Storage`] exposes one remote (or local) tree through a small set of
//! filesystem operations. Paths are always relative to the storage root,
//! use `/` as separator and may carry leading/trailing slashes; backends
//! normalize them with [`normalize_path`] before use.
//!
//! The provided methods on [`Storage`] implement the behaviour shared by most
//! backends (copy-then-delete rename, recursive copy, MIME guessing), so a
//! backend only overrides what its protocol can do natively.
//!
//! # Modules
//!
//! - [`local`]: a directory on the server's own filesystem
//! - [`stream_wrapper`]: generic contract over a URL-addressed transport
//! - [`object_store`]: folder emulation over flat key/value object stores
//! - [`wrapper`]: permission masks applied after construction
//! - [`failed`]: placeholder for storages that could not be constructed

pub mod error;
pub mod failed;
pub mod local;
pub mod mime;
pub mod object_store;
pub mod stream;
pub mod stream_wrapper;
pub mod wrapper;
pub mod write_back;

pub use error::{StorageError, StorageResult};
pub use failed::FailedStorage;
pub use local::LocalStorage;
pub use stream::{FileStream, LocalFileStream, OpenMode, ReadStream};
pub use write_back::{Uploader, WriteBackStream};

use serde::Serialize;
use std::io::{self, Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

/// MIME type reserved for directories.
pub const DIRECTORY_MIME_TYPE: &str = "httpd/unix-directory";

/// Kind of a filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// A directory (native or emulated)
    Dir,
    /// A regular file
    File,
}

impl FileType {
    /// The wire name (`dir` / `file`)
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dir => "dir",
            Self::File => "file",
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Size and timestamps of an entry, in bytes and Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FileStat {
    /// Size in bytes (0 for directories that cannot report one)
    pub size: u64,
    /// Last modification time
    pub mtime: i64,
    /// Change/creation time, equal to `mtime` when the remote has no separate value
    pub ctime: i64,
}

impl FileStat {
    /// Stat with identical mtime and ctime
    pub fn new(size: u64, mtime: i64) -> Self {
        Self {
            size,
            mtime,
            ctime: mtime,
        }
    }
}

/// Free space reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FreeSpace {
    /// Bytes available
    Known(u64),
    /// The protocol cannot report free space
    Unknown,
}

/// The uniform filesystem contract.
///
/// All operations are blocking. Errors use [`StorageError`]; "false"-style
/// answers (`file_exists`, `is_readable`) are `Ok(false)`, not errors.
pub trait Storage: Send + Sync {
    /// Stable identifier of this storage (backend prefix plus connection identity)
    fn id(&self) -> String;

    /// Create a directory; fails if it already exists
    fn mkdir(&self, path: &str) -> StorageResult<()>;

    /// Remove a directory together with everything below it
    fn rmdir(&self, path: &str) -> StorageResult<()>;

    /// Names of the direct children of a directory
    fn opendir(&self, path: &str) -> StorageResult<Vec<String>>;

    /// Size and timestamps of an entry
    fn stat(&self, path: &str) -> StorageResult<FileStat>;

    /// Whether the entry is a file or a directory
    fn filetype(&self, path: &str) -> StorageResult<FileType>;

    /// Whether the entry exists
    fn file_exists(&self, path: &str) -> StorageResult<bool>;

    /// Delete a file
    fn unlink(&self, path: &str) -> StorageResult<()>;

    /// Open a file in the given mode
    fn fopen(&self, path: &str, mode: OpenMode) -> StorageResult<Box<dyn FileStream>>;

    /// Set the modification time, creating an empty file when missing.
    ///
    /// `None` means "now".
    fn touch(&self, path: &str, mtime: Option<i64>) -> StorageResult<()>;

    /// Check that the remote is reachable with the configured credentials.
    ///
    /// Must not mutate remote state beyond what the protocol makes
    /// unavoidable.
    fn test(&self) -> StorageResult<()> {
        if self.file_exists("")? {
            Ok(())
        } else {
            Err(StorageError::not_available(
                "storage root does not exist",
                error::code::ERROR,
            ))
        }
    }

    /// Whether the entry is a directory
    fn is_dir(&self, path: &str) -> StorageResult<bool> {
        match self.filetype(path) {
            Ok(kind) => Ok(kind == FileType::Dir),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Whether the entry is a regular file
    fn is_file(&self, path: &str) -> StorageResult<bool> {
        match self.filetype(path) {
            Ok(kind) => Ok(kind == FileType::File),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Whether the entry can be read
    fn is_readable(&self, path: &str) -> StorageResult<bool> {
        self.file_exists(path)
    }

    /// Whether the entry can be modified
    fn is_updatable(&self, path: &str) -> StorageResult<bool> {
        self.file_exists(path)
    }

    /// Whether new entries can be created inside the directory
    fn is_creatable(&self, path: &str) -> StorageResult<bool> {
        Ok(self.is_dir(path)? && self.is_updatable(path)?)
    }

    /// Whether the entry can be deleted
    fn is_deletable(&self, path: &str) -> StorageResult<bool> {
        let parent = dirname(&normalize_path(path));
        self.is_updatable(&parent)
    }

    /// Whether the entry may be shared
    fn is_sharable(&self, path: &str) -> StorageResult<bool> {
        self.is_readable(path)
    }

    /// Rename an entry; the default copies then deletes the source
    fn rename(&self, source: &str, target: &str) -> StorageResult<()> {
        self.copy(source, target)?;
        if self.is_dir(source)? {
            self.rmdir(source)
        } else {
            self.unlink(source)
        }
    }

    /// Copy an entry; directories are copied recursively
    fn copy(&self, source: &str, target: &str) -> StorageResult<()> {
        if self.is_dir(source)? {
            if !self.file_exists(target)? {
                self.mkdir(target)?;
            }
            for name in self.opendir(source)? {
                self.copy(&join_path(source, &name), &join_path(target, &name))?;
            }
            return Ok(());
        }
        let mut input = self.fopen(source, OpenMode::Read)?;
        let mut output = self.fopen(target, OpenMode::Truncate)?;
        io::copy(&mut input, &mut output)?;
        input.close()?;
        output.close()
    }

    /// MIME type of the entry; directories are `httpd/unix-directory`
    fn mime_type(&self, path: &str) -> StorageResult<String> {
        if self.is_dir(path)? {
            return Ok(DIRECTORY_MIME_TYPE.to_string());
        }
        if !self.file_exists(path)? {
            return Err(StorageError::NotFound(path.to_string()));
        }
        Ok(mime::guess_from_path(path))
    }

    /// Free space available below `path`
    fn free_space(&self, _path: &str) -> StorageResult<FreeSpace> {
        Ok(FreeSpace::Unknown)
    }

    /// Read a whole file into memory
    fn file_get_contents(&self, path: &str) -> StorageResult<Vec<u8>> {
        let mut stream = self.fopen(path, OpenMode::Read)?;
        let mut data = Vec::new();
        stream.read_to_end(&mut data)?;
        stream.close()?;
        Ok(data)
    }

    /// Replace a whole file
    fn file_put_contents(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        let mut stream = self.fopen(path, OpenMode::Truncate)?;
        stream.write_all(data)?;
        stream.close()
    }
}

/// Strip leading/trailing slashes and collapse `.` and empty segments.
///
/// The storage root is the empty string.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a normalized directory and a child name.
pub fn join_path(dir: &str, name: &str) -> String {
    let dir = normalize_path(dir);
    let name = name.trim_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Parent of a normalized path ("" for top-level entries).
pub fn dirname(path: &str) -> String {
    let path = normalize_path(path);
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

/// Last segment of a path.
pub fn basename(path: &str) -> String {
    let path = normalize_path(path);
    match path.rfind('/') {
        Some(idx) => path[idx + 1..].to_string(),
        None => path,
    }
}

/// Current time as Unix seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Convert a `SystemTime` to Unix seconds, clamping pre-epoch values to 0.
pub fn to_unix(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

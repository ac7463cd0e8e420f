//! Storage contract over a URL-addressed transport.
//!
//! FTP, SMB and iRODS all address entries by URL and offer the same small
//! set of primitives (stat, list, mkdir, delete, rename, whole-file get/put).
//! A backend for such a protocol implements [`StreamBackend`], providing only
//! `construct_url` and a lazily opened [`UrlTransport`]; [`StreamWrapper`]
//! turns that into a full [`Storage`], with write modes emulated through
//! [`WriteBackStream`].

use super::error::{StorageError, StorageResult};
use super::stream::{FileStream, OpenMode, ReadStream};
use super::write_back::WriteBackStream;
use super::{FileStat, FileType, FreeSpace, Storage, join_path, normalize_path};
use parking_lot::Mutex;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

/// Metadata of one URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrlStat {
    /// Entry kind
    pub kind: FileType,
    /// Size in bytes
    pub size: u64,
    /// Modification time (Unix seconds)
    pub mtime: i64,
}

/// Primitive operations of a URL-addressed protocol.
pub trait UrlTransport: Send + Sync {
    /// Metadata of the entry, `None` when it does not exist
    fn stat(&self, url: &str) -> StorageResult<Option<UrlStat>>;

    /// Names of the children of a directory URL
    fn list(&self, url: &str) -> StorageResult<Vec<String>>;

    /// Create a directory
    fn mkdir(&self, url: &str) -> StorageResult<()>;

    /// Remove an empty directory
    fn rmdir(&self, url: &str) -> StorageResult<()>;

    /// Remove a file
    fn unlink(&self, url: &str) -> StorageResult<()>;

    /// Rename an entry
    fn rename(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Write the file content into `sink`
    fn download(&self, url: &str, sink: &mut dyn Write) -> StorageResult<()>;

    /// Replace the file with the content of a local file
    fn upload(&self, url: &str, source: &Path) -> StorageResult<()>;

    /// Free space below the URL
    fn free_space(&self, _url: &str) -> StorageResult<FreeSpace> {
        Ok(FreeSpace::Unknown)
    }
}

/// A backend reachable through a [`UrlTransport`].
pub trait StreamBackend: Send + Sync {
    /// Transport type used by this backend
    type Transport: UrlTransport + 'static;

    /// Storage identifier
    fn id(&self) -> String;

    /// Full URL of a storage-relative path
    fn construct_url(&self, path: &str) -> String;

    /// The transport, connected on first use
    fn transport(&self) -> StorageResult<Arc<Self::Transport>>;
}

/// Connection slot that is filled on first use and reused afterwards.
pub struct LazyConnection<T> {
    slot: Mutex<Option<Arc<T>>>,
}

impl<T> Default for LazyConnection<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<T> LazyConnection<T> {
    /// Empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached connection or open one with `connect`
    pub fn get_or_connect<F>(&self, connect: F) -> StorageResult<Arc<T>>
    where
        F: FnOnce() -> StorageResult<T>,
    {
        let mut slot = self.slot.lock();
        if let Some(conn) = slot.as_ref() {
            return Ok(Arc::clone(conn));
        }
        let conn = Arc::new(connect()?);
        *slot = Some(Arc::clone(&conn));
        Ok(conn)
    }

    /// Drop the cached connection so the next call reconnects
    pub fn reset(&self) {
        *self.slot.lock() = None;
    }

    /// Whether a connection has been opened
    pub fn is_connected(&self) -> bool {
        self.slot.lock().is_some()
    }
}

/// Full [`Storage`] implementation for any [`StreamBackend`].
pub struct StreamWrapper<B> {
    backend: B,
}

impl<B: StreamBackend> StreamWrapper<B> {
    /// Wrap a backend
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// The wrapped backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn url(&self, path: &str) -> String {
        self.backend.construct_url(&normalize_path(path))
    }

    fn lookup(&self, path: &str) -> StorageResult<Option<UrlStat>> {
        self.backend.transport()?.stat(&self.url(path))
    }

    fn require(&self, path: &str) -> StorageResult<UrlStat> {
        self.lookup(path)?
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }
}

impl<B: StreamBackend> Storage for StreamWrapper<B> {
    fn id(&self) -> String {
        self.backend.id()
    }

    fn mkdir(&self, path: &str) -> StorageResult<()> {
        if self.lookup(path)?.is_some() {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }
        self.backend.transport()?.mkdir(&self.url(path))
    }

    fn rmdir(&self, path: &str) -> StorageResult<()> {
        let stat = self.require(path)?;
        if stat.kind != FileType::Dir {
            return Err(StorageError::NotADirectory(path.to_string()));
        }
        for name in self.opendir(path)? {
            let child = join_path(path, &name);
            if self.is_dir(&child)? {
                self.rmdir(&child)?;
            } else {
                self.unlink(&child)?;
            }
        }
        self.backend.transport()?.rmdir(&self.url(path))
    }

    fn opendir(&self, path: &str) -> StorageResult<Vec<String>> {
        let names = self.backend.transport()?.list(&self.url(path))?;
        Ok(names
            .into_iter()
            .filter(|name| name != "." && name != "..")
            .collect())
    }

    fn stat(&self, path: &str) -> StorageResult<FileStat> {
        let stat = self.require(path)?;
        Ok(FileStat::new(stat.size, stat.mtime))
    }

    fn filetype(&self, path: &str) -> StorageResult<FileType> {
        Ok(self.require(path)?.kind)
    }

    fn file_exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.lookup(path)?.is_some())
    }

    fn unlink(&self, path: &str) -> StorageResult<()> {
        match self.require(path)?.kind {
            FileType::Dir => self.rmdir(path),
            FileType::File => self.backend.transport()?.unlink(&self.url(path)),
        }
    }

    fn fopen(&self, path: &str, mode: OpenMode) -> StorageResult<Box<dyn FileStream>> {
        let transport = self.backend.transport()?;
        let url = self.url(path);
        let existing = transport.stat(&url)?;

        if existing.is_some_and(|s| s.kind == FileType::Dir) {
            return Err(StorageError::IsADirectory(path.to_string()));
        }
        if mode.requires_existing() && existing.is_none() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        if mode == OpenMode::CreateNew && existing.is_some() {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }

        if mode == OpenMode::Read {
            let stream = ReadStream::download(|sink| transport.download(&url, sink))?;
            return Ok(Box::new(stream));
        }

        let mut current = if mode.keeps_content() && existing.is_some() {
            let mut file = tempfile::tempfile()?;
            transport.download(&url, &mut file)?;
            file.seek(SeekFrom::Start(0))?;
            Some(file)
        } else {
            None
        };

        let upload_transport = Arc::clone(&transport);
        let upload_url = url.clone();
        let stream = WriteBackStream::open(
            path,
            mode,
            current.as_mut().map(|f| f as &mut dyn std::io::Read),
            Box::new(move |staged: &Path| upload_transport.upload(&upload_url, staged)),
        )?;
        Ok(Box::new(stream))
    }

    fn touch(&self, path: &str, mtime: Option<i64>) -> StorageResult<()> {
        if self.file_exists(path)? {
            if mtime.is_some() {
                return Err(StorageError::NotSupported(
                    "setting an explicit mtime over this protocol".to_string(),
                ));
            }
            let mut stream = self.fopen(path, OpenMode::Append)?;
            stream.write_all(b"")?;
            stream.close()
        } else {
            self.file_put_contents(path, b"")
        }
    }

    fn rename(&self, source: &str, target: &str) -> StorageResult<()> {
        self.require(source)?;
        self.backend
            .transport()?
            .rename(&self.url(source), &self.url(target))
    }

    fn free_space(&self, path: &str) -> StorageResult<FreeSpace> {
        self.backend.transport()?.free_space(&self.url(path))
    }

    fn test(&self) -> StorageResult<()> {
        match self.lookup("")? {
            Some(stat) if stat.kind == FileType::Dir => Ok(()),
            _ => Err(StorageError::not_available(
                format!("root {} is not a directory", self.url("")),
                super::error::code::ERROR,
            )),
        }
    }
}

/// In-memory transport for exercising [`StreamWrapper`] without a server.
#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Default)]
    pub struct MemoryTransport {
        pub entries: Mutex<BTreeMap<String, Option<Vec<u8>>>>,
        pub fail_uploads: bool,
    }

    impl MemoryTransport {
        pub fn with_root(root: &str) -> Self {
            let t = Self::default();
            t.entries.lock().insert(root.trim_end_matches('/').to_string(), None);
            t
        }

        fn parent(url: &str) -> &str {
            url.rfind('/').map_or("", |i| &url[..i])
        }
    }

    impl UrlTransport for MemoryTransport {
        fn stat(&self, url: &str) -> StorageResult<Option<UrlStat>> {
            let url = url.trim_end_matches('/');
            Ok(self.entries.lock().get(url).map(|e| UrlStat {
                kind: if e.is_some() { FileType::File } else { FileType::Dir },
                size: e.as_ref().map_or(0, |d| d.len() as u64),
                mtime: 42,
            }))
        }

        fn list(&self, url: &str) -> StorageResult<Vec<String>> {
            let url = url.trim_end_matches('/');
            Ok(self
                .entries
                .lock()
                .keys()
                .filter(|k| Self::parent(k) == url && k.as_str() != url)
                .map(|k| k[url.len() + 1..].to_string())
                .collect())
        }

        fn mkdir(&self, url: &str) -> StorageResult<()> {
            self.entries.lock().insert(url.trim_end_matches('/').to_string(), None);
            Ok(())
        }

        fn rmdir(&self, url: &str) -> StorageResult<()> {
            let url = url.trim_end_matches('/');
            let mut entries = self.entries.lock();
            if entries.keys().any(|k| Self::parent(k) == url && k != url) {
                return Err(StorageError::NotEmpty(url.to_string()));
            }
            entries.remove(url);
            Ok(())
        }

        fn unlink(&self, url: &str) -> StorageResult<()> {
            self.entries.lock().remove(url);
            Ok(())
        }

        fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
            let mut entries = self.entries.lock();
            let value = entries
                .remove(from)
                .ok_or_else(|| StorageError::NotFound(from.to_string()))?;
            entries.insert(to.to_string(), value);
            Ok(())
        }

        fn download(&self, url: &str, sink: &mut dyn Write) -> StorageResult<()> {
            let entries = self.entries.lock();
            let data = entries
                .get(url)
                .and_then(Option::as_ref)
                .ok_or_else(|| StorageError::NotFound(url.to_string()))?;
            sink.write_all(data)?;
            Ok(())
        }

        fn upload(&self, url: &str, source: &Path) -> StorageResult<()> {
            if self.fail_uploads {
                return Err(StorageError::protocol("simulated upload failure"));
            }
            let data = std::fs::read(source)?;
            self.entries.lock().insert(url.to_string(), Some(data));
            Ok(())
        }
    }

    pub struct MemoryBackend {
        pub transport: Arc<MemoryTransport>,
    }

    impl StreamBackend for MemoryBackend {
        type Transport = MemoryTransport;

        fn id(&self) -> String {
            "memory::test".to_string()
        }

        fn construct_url(&self, path: &str) -> String {
            if path.is_empty() {
                "mem://root".to_string()
            } else {
                format!("mem://root/{path}")
            }
        }

        fn transport(&self) -> StorageResult<Arc<MemoryTransport>> {
            Ok(Arc::clone(&self.transport))
        }
    }
}

//! Folder emulation over flat object stores.
//!
//! S3 buckets and Swift containers have no directories, only keys. A
//! directory `foo/bar` is represented by a zero-byte marker object with key
//! `foo/bar/`; entries below it simply share the prefix. Prefixes that exist
//! without a marker (objects uploaded by other tools) are still reported as
//! directories.
//!
//! Protocol specifics live behind [`ObjectClient`]; [`ObjectStore`] implements
//! the storage contract on top of it.

use super::error::{StorageError, StorageResult};
use super::stream::{FileStream, OpenMode, ReadStream};
use super::write_back::WriteBackStream;
use super::{
    DIRECTORY_MIME_TYPE, FileStat, FileType, Storage, mime, normalize_path, unix_now,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Metadata of a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Full key
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Modification time (Unix seconds)
    pub last_modified: i64,
    /// Content type recorded at upload time
    pub content_type: Option<String>,
}

/// Result of a prefix listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectListing {
    /// Objects directly matching the listing
    pub objects: Vec<ObjectInfo>,
    /// Sub-prefixes ending in `/` (only for delimited listings)
    pub common_prefixes: Vec<String>,
}

/// Primitive operations of an object store.
pub trait ObjectClient: Send + Sync {
    /// Storage identifier (for example `amazon::bucket`)
    fn id(&self) -> String;

    /// Metadata of an object, `None` when absent
    fn head(&self, key: &str) -> StorageResult<Option<ObjectInfo>>;

    /// Write the object body into `sink`
    fn get(&self, key: &str, sink: &mut dyn Write) -> StorageResult<()>;

    /// Store an object from memory
    fn put(&self, key: &str, data: &[u8], content_type: &str) -> StorageResult<()>;

    /// Store an object from a local file
    fn put_file(&self, key: &str, source: &Path, content_type: &str) -> StorageResult<()> {
        let data = std::fs::read(source)?;
        self.put(key, &data, content_type)
    }

    /// Delete an object; deleting a missing object is not an error
    fn delete(&self, key: &str) -> StorageResult<()>;

    /// Server-side copy
    fn copy(&self, source: &str, target: &str) -> StorageResult<()>;

    /// Update the modification time of an existing object
    fn touch(&self, key: &str, mtime: i64) -> StorageResult<()>;

    /// List keys starting with `prefix`.
    ///
    /// With `delimited`, keys containing a further `/` after the prefix are
    /// folded into `common_prefixes`.
    fn list(&self, prefix: &str, delimited: bool) -> StorageResult<ObjectListing>;

    /// Verify that the bucket/container is reachable
    fn test(&self) -> StorageResult<()>;
}

/// Storage contract over an [`ObjectClient`].
pub struct ObjectStore<C> {
    client: Arc<C>,
}

impl<C: ObjectClient + 'static> ObjectStore<C> {
    /// Wrap a client
    pub fn new(client: C) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    /// The underlying client
    pub fn client(&self) -> &C {
        &self.client
    }

    fn marker(key: &str) -> String {
        format!("{key}/")
    }

    fn prefix(key: &str) -> String {
        if key.is_empty() {
            String::new()
        } else {
            Self::marker(key)
        }
    }

    fn kind(&self, key: &str) -> StorageResult<Option<FileType>> {
        if key.is_empty() {
            return Ok(Some(FileType::Dir));
        }
        if self.client.head(key)?.is_some() {
            return Ok(Some(FileType::File));
        }
        if self.client.head(&Self::marker(key))?.is_some() {
            return Ok(Some(FileType::Dir));
        }
        let listing = self.client.list(&Self::marker(key), true)?;
        if listing.objects.is_empty() && listing.common_prefixes.is_empty() {
            Ok(None)
        } else {
            Ok(Some(FileType::Dir))
        }
    }

    fn require_kind(&self, path: &str) -> StorageResult<FileType> {
        self.kind(&normalize_path(path))?
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    /// Every key below a directory, deepest first, including its marker
    fn keys_below(&self, key: &str) -> StorageResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .client
            .list(&Self::prefix(key), false)?
            .objects
            .into_iter()
            .map(|o| o.key)
            .collect();
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        Ok(keys)
    }

    fn copy_tree(&self, source: &str, target: &str) -> StorageResult<()> {
        let from_prefix = Self::marker(source);
        let to_prefix = Self::marker(target);
        self.client.put(&to_prefix, b"", DIRECTORY_MIME_TYPE)?;
        for key in self.keys_below(source)? {
            if key == from_prefix {
                continue;
            }
            let suffix = &key[from_prefix.len()..];
            self.client.copy(&key, &format!("{to_prefix}{suffix}"))?;
        }
        Ok(())
    }
}

impl<C: ObjectClient + 'static> Storage for ObjectStore<C> {
    fn id(&self) -> String {
        self.client.id()
    }

    fn mkdir(&self, path: &str) -> StorageResult<()> {
        let key = normalize_path(path);
        if self.kind(&key)?.is_some() {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }
        debug!(key = %key, "Creating directory marker");
        self.client.put(&Self::marker(&key), b"", DIRECTORY_MIME_TYPE)
    }

    fn rmdir(&self, path: &str) -> StorageResult<()> {
        let key = normalize_path(path);
        if key.is_empty() {
            return Err(StorageError::PermissionDenied(
                "cannot remove the bucket root".to_string(),
            ));
        }
        if self.require_kind(&key)? != FileType::Dir {
            return Err(StorageError::NotADirectory(path.to_string()));
        }
        let keys = self.keys_below(&key)?;
        debug!(key = %key, count = keys.len(), "Removing emulated directory");
        for child in &keys {
            self.client.delete(child)?;
        }
        let marker = Self::marker(&key);
        if !keys.contains(&marker) {
            self.client.delete(&marker)?;
        }
        Ok(())
    }

    fn opendir(&self, path: &str) -> StorageResult<Vec<String>> {
        let key = normalize_path(path);
        if self.require_kind(&key)? != FileType::Dir {
            return Err(StorageError::NotADirectory(path.to_string()));
        }
        let prefix = Self::prefix(&key);
        let listing = self.client.list(&prefix, true)?;
        let mut names: Vec<String> = listing
            .objects
            .iter()
            .filter(|o| o.key != prefix)
            .map(|o| o.key[prefix.len()..].to_string())
            .chain(
                listing
                    .common_prefixes
                    .iter()
                    .map(|p| p[prefix.len()..].trim_end_matches('/').to_string()),
            )
            .filter(|name| !name.is_empty())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn stat(&self, path: &str) -> StorageResult<FileStat> {
        let key = normalize_path(path);
        match self.require_kind(&key)? {
            FileType::File => {
                let info = self
                    .client
                    .head(&key)?
                    .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
                Ok(FileStat::new(info.size, info.last_modified))
            }
            FileType::Dir => {
                let mtime = if key.is_empty() {
                    None
                } else {
                    self.client.head(&Self::marker(&key))?.map(|m| m.last_modified)
                };
                Ok(FileStat::new(0, mtime.unwrap_or_else(unix_now)))
            }
        }
    }

    fn filetype(&self, path: &str) -> StorageResult<FileType> {
        self.require_kind(path)
    }

    fn file_exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.kind(&normalize_path(path))?.is_some())
    }

    fn unlink(&self, path: &str) -> StorageResult<()> {
        match self.require_kind(path)? {
            FileType::Dir => self.rmdir(path),
            FileType::File => self.client.delete(&normalize_path(path)),
        }
    }

    fn fopen(&self, path: &str, mode: OpenMode) -> StorageResult<Box<dyn FileStream>> {
        let key = normalize_path(path);
        let existing = self.kind(&key)?;
        if existing == Some(FileType::Dir) {
            return Err(StorageError::IsADirectory(path.to_string()));
        }
        if mode.requires_existing() && existing.is_none() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        if mode == OpenMode::CreateNew && existing.is_some() {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }

        if mode == OpenMode::Read {
            let client = Arc::clone(&self.client);
            let stream = ReadStream::download(|sink| client.get(&key, sink))?;
            return Ok(Box::new(stream));
        }

        let mut current = if mode.keeps_content() && existing.is_some() {
            let mut file = tempfile::tempfile()?;
            self.client.get(&key, &mut file)?;
            file.seek(SeekFrom::Start(0))?;
            Some(file)
        } else {
            None
        };

        let client = Arc::clone(&self.client);
        let content_type = mime::guess_from_path(&key);
        let upload_key = key.clone();
        let stream = WriteBackStream::open(
            key,
            mode,
            current.as_mut().map(|f| f as &mut dyn std::io::Read),
            Box::new(move |staged: &Path| client.put_file(&upload_key, staged, &content_type)),
        )?;
        Ok(Box::new(stream))
    }

    fn touch(&self, path: &str, mtime: Option<i64>) -> StorageResult<()> {
        let key = normalize_path(path);
        let mtime = mtime.unwrap_or_else(unix_now);
        match self.kind(&key)? {
            Some(FileType::File) => self.client.touch(&key, mtime),
            Some(FileType::Dir) if key.is_empty() => Ok(()),
            Some(FileType::Dir) => {
                let marker = Self::marker(&key);
                if self.client.head(&marker)?.is_some() {
                    self.client.touch(&marker, mtime)
                } else {
                    self.client.put(&marker, b"", DIRECTORY_MIME_TYPE)
                }
            }
            None => self.client.put(&key, b"", &mime::guess_from_path(&key)),
        }
    }

    fn rename(&self, source: &str, target: &str) -> StorageResult<()> {
        let from = normalize_path(source);
        let to = normalize_path(target);
        match self.require_kind(&from)? {
            FileType::File => {
                self.client.copy(&from, &to)?;
                self.client.delete(&from)
            }
            FileType::Dir => {
                self.copy_tree(&from, &to)?;
                self.rmdir(&from)
            }
        }
    }

    fn copy(&self, source: &str, target: &str) -> StorageResult<()> {
        let from = normalize_path(source);
        let to = normalize_path(target);
        match self.require_kind(&from)? {
            FileType::File => self.client.copy(&from, &to),
            FileType::Dir => self.copy_tree(&from, &to),
        }
    }

    fn mime_type(&self, path: &str) -> StorageResult<String> {
        let key = normalize_path(path);
        match self.require_kind(&key)? {
            FileType::Dir => Ok(DIRECTORY_MIME_TYPE.to_string()),
            FileType::File => Ok(self
                .client
                .head(&key)?
                .and_then(|info| info.content_type)
                .filter(|ct| !ct.is_empty())
                .unwrap_or_else(|| mime::guess_from_path(&key))),
        }
    }

    fn test(&self) -> StorageResult<()> {
        self.client.test()
    }
}

/// Object client that keeps everything in memory.
///
/// Useful for exercising folder emulation and write-back without a network.
#[derive(Default)]
pub struct MemoryObjectClient {
    name: String,
    objects: Mutex<BTreeMap<String, (Vec<u8>, ObjectInfo)>>,
}

impl MemoryObjectClient {
    /// Empty bucket named `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    /// All keys currently stored
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    /// Body of an object
    pub fn body(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(key).map(|(data, _)| data.clone())
    }
}

impl ObjectClient for MemoryObjectClient {
    fn id(&self) -> String {
        format!("memory::{}", self.name)
    }

    fn head(&self, key: &str) -> StorageResult<Option<ObjectInfo>> {
        Ok(self.objects.lock().get(key).map(|(_, info)| info.clone()))
    }

    fn get(&self, key: &str, sink: &mut dyn Write) -> StorageResult<()> {
        let data = self
            .body(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        sink.write_all(&data)?;
        Ok(())
    }

    fn put(&self, key: &str, data: &[u8], content_type: &str) -> StorageResult<()> {
        let info = ObjectInfo {
            key: key.to_string(),
            size: data.len() as u64,
            last_modified: unix_now(),
            content_type: Some(content_type.to_string()),
        };
        self.objects
            .lock()
            .insert(key.to_string(), (data.to_vec(), info));
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects.lock().remove(key);
        Ok(())
    }

    fn copy(&self, source: &str, target: &str) -> StorageResult<()> {
        let mut objects = self.objects.lock();
        let (data, mut info) = objects
            .get(source)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(source.to_string()))?;
        info.key = target.to_string();
        objects.insert(target.to_string(), (data, info));
        Ok(())
    }

    fn touch(&self, key: &str, mtime: i64) -> StorageResult<()> {
        let mut objects = self.objects.lock();
        let (_, info) = objects
            .get_mut(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        info.last_modified = mtime;
        Ok(())
    }

    fn list(&self, prefix: &str, delimited: bool) -> StorageResult<ObjectListing> {
        let objects = self.objects.lock();
        let mut listing = ObjectListing::default();
        for (key, (_, info)) in objects.range(prefix.to_string()..) {
            let Some(rest) = key.strip_prefix(prefix) else {
                break;
            };
            match rest.find('/') {
                Some(idx) if delimited => {
                    let common = format!("{prefix}{}", &rest[..=idx]);
                    if !listing.common_prefixes.contains(&common) {
                        listing.common_prefixes.push(common);
                    }
                }
                _ => listing.objects.push(info.clone()),
            }
        }
        Ok(listing)
    }

    fn test(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn store() -> ObjectStore<MemoryObjectClient> {
        ObjectStore::new(MemoryObjectClient::new("bucket"))
    }

    #[test]
    fn test_mkdir_creates_marker_and_reports_dir() {
        let storage = store();
        storage.mkdir("/foo").unwrap();
        assert_eq!(storage.filetype("/foo").unwrap(), FileType::Dir);
        assert_eq!(storage.client().keys(), vec!["foo/"]);
        assert_eq!(storage.client().body("foo/").unwrap().len(), 0);
        assert!(matches!(storage.mkdir("foo"), Err(StorageError::AlreadyExists(_))));
    }

    #[test]
    fn test_rmdir_removes_contents_recursively() {
        let storage = store();
        storage.mkdir("/foo").unwrap();
        storage.mkdir("/foo/sub").unwrap();
        storage.file_put_contents("/foo/a.txt", b"a").unwrap();
        storage.file_put_contents("/foo/sub/b.txt", b"b").unwrap();
        storage.file_put_contents("/keep.txt", b"k").unwrap();

        storage.rmdir("/foo").unwrap();
        assert_eq!(storage.client().keys(), vec!["keep.txt"]);
        assert!(!storage.file_exists("/foo").unwrap());
    }

    #[test]
    fn test_listing_merges_markers_and_implicit_prefixes() {
        let storage = store();
        storage.mkdir("photos").unwrap();
        storage.file_put_contents("photos/a.jpg", b"1").unwrap();
        // uploaded by another tool, no marker for "raw/"
        storage.client().put("raw/x.bin", b"2", "application/octet-stream").unwrap();
        storage.file_put_contents("readme.md", b"3").unwrap();

        assert_eq!(storage.opendir("").unwrap(), vec!["photos", "raw", "readme.md"]);
        assert_eq!(storage.opendir("photos").unwrap(), vec!["a.jpg"]);
        assert_eq!(storage.filetype("raw").unwrap(), FileType::Dir);
    }

    #[test]
    fn test_write_back_upload_sets_content_type() {
        let storage = store();
        let mut stream = storage.fopen("notes.txt", OpenMode::Truncate).unwrap();
        stream.write_all(b"hello").unwrap();
        stream.close().unwrap();
        assert_eq!(storage.file_get_contents("notes.txt").unwrap(), b"hello");
        assert_eq!(storage.mime_type("notes.txt").unwrap(), "text/plain");
        assert_eq!(storage.stat("notes.txt").unwrap().size, 5);
    }

    #[test]
    fn test_rename_directory_moves_tree() {
        let storage = store();
        storage.mkdir("a").unwrap();
        storage.file_put_contents("a/f", b"x").unwrap();
        storage.rename("a", "b").unwrap();
        assert_eq!(storage.client().keys(), vec!["b/", "b/f"]);
        assert_eq!(storage.mime_type("b").unwrap(), DIRECTORY_MIME_TYPE);
    }

    #[test]
    fn test_touch_updates_existing_mtime() {
        let storage = store();
        storage.touch("t.txt", None).unwrap();
        storage.touch("t.txt", Some(1234)).unwrap();
        assert_eq!(storage.stat("t.txt").unwrap().mtime, 1234);
    }

    #[test]
    fn test_missing_paths() {
        let storage = store();
        assert!(!storage.file_exists("nope").unwrap());
        assert!(storage.stat("nope").unwrap_err().is_not_found());
        assert!(storage.fopen("nope", OpenMode::Read).is_err());
    }
}

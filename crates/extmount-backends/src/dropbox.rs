//! Dropbox, through the v2 HTTP API.
//!
//! [`DropboxStorage`] maps the storage contract onto a [`DropboxApi`]; the
//! production implementation is [`DropboxHttp`]. Metadata seen while listing
//! a folder is cached until the next change below that folder.

use crate::http::{HttpClient, HttpRequest, HttpResponse, UreqClient};
use crate::options;
use chrono::DateTime;
use extmount_core::definition::auth::{mechanism, scheme};
use extmount_core::storage::error::code;
use extmount_core::storage::stream::ReadStream;
use extmount_core::storage::write_back::WriteBackStream;
use extmount_core::storage::{
    FileStat, FileStream, FileType, FreeSpace, OpenMode, Storage, StorageError, normalize_path,
    unix_now,
};
use extmount_core::{BackendDefinition, BackendOptions, StorageContext, StorageResult};
use parking_lot::Mutex;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Backend identifier
pub const ID: &str = "dropbox";

const API_URL: &str = "https://api.dropboxapi.com/2";
const CONTENT_URL: &str = "https://content.dropboxapi.com/2";

/// One file or folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropboxEntry {
    /// Display name
    pub name: String,
    /// Folder rather than file
    pub is_dir: bool,
    /// Size in bytes (0 for folders)
    pub size: u64,
    /// Server modification time; folders have none
    pub modified: Option<i64>,
}

/// Remote operations the storage needs.
///
/// Paths are absolute and start with `/`; the root folder is `/`.
pub trait DropboxApi: Send + Sync {
    /// Account label, used to verify the token
    fn account(&self) -> StorageResult<String>;
    /// Metadata, `None` when nothing exists at `path`
    fn metadata(&self, path: &str) -> StorageResult<Option<DropboxEntry>>;
    /// Entries directly inside a folder
    fn list_folder(&self, path: &str) -> StorageResult<Vec<DropboxEntry>>;
    /// Create a folder
    fn create_folder(&self, path: &str) -> StorageResult<()>;
    /// Delete a file or a folder with its contents
    fn delete(&self, path: &str) -> StorageResult<()>;
    /// Move or rename
    fn move_entry(&self, from: &str, to: &str) -> StorageResult<()>;
    /// Server-side copy
    fn copy_entry(&self, from: &str, to: &str) -> StorageResult<()>;
    /// Write file content into `sink`
    fn download(&self, path: &str, sink: &mut dyn Write) -> StorageResult<()>;
    /// Replace file content from a local file
    fn upload(&self, path: &str, source: &Path) -> StorageResult<()>;
    /// Used and allocated bytes
    fn space_usage(&self) -> StorageResult<(u64, u64)>;
}

fn api_path(path: &str) -> String {
    format!("/{}", normalize_path(path))
}

fn parse_entry(value: &Value) -> StorageResult<DropboxEntry> {
    let name = value["name"]
        .as_str()
        .ok_or_else(|| StorageError::protocol("entry without a name"))?;
    Ok(DropboxEntry {
        name: name.to_string(),
        is_dir: value[".tag"] == "folder",
        size: value["size"].as_u64().unwrap_or(0),
        modified: value["server_modified"]
            .as_str()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.timestamp()),
    })
}

/// Map a Dropbox error response.
///
/// Endpoint errors come back as 409 with an `error_summary` such as
/// `path/not_found/..` or `to/conflict/folder/..`.
fn api_error(response: &HttpResponse, path: &str) -> StorageError {
    if response.status != 409 {
        return response.clone().error_for_status(path).err().unwrap_or_else(|| {
            StorageError::protocol(format!("unexpected status {} for {path}", response.status))
        });
    }
    let summary = response
        .json()
        .ok()
        .and_then(|v| v["error_summary"].as_str().map(ToString::to_string))
        .unwrap_or_else(|| response.text());
    if summary.contains("not_found") {
        StorageError::NotFound(path.to_string())
    } else if summary.contains("conflict") {
        StorageError::AlreadyExists(path.to_string())
    } else if summary.contains("no_write_permission") || summary.contains("insufficient") {
        StorageError::PermissionDenied(format!("{path}: {summary}"))
    } else {
        StorageError::protocol(format!("{path}: {summary}"))
    }
}

/// [`DropboxApi`] over HTTPS.
pub struct DropboxHttp {
    http: Arc<dyn HttpClient>,
    token: String,
    api_url: String,
    content_url: String,
}

impl std::fmt::Debug for DropboxHttp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropboxHttp")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl DropboxHttp {
    /// Client using a bearer token
    pub fn new(http: Arc<dyn HttpClient>, token: impl Into<String>) -> Self {
        Self {
            http,
            token: token.into(),
            api_url: API_URL.to_string(),
            content_url: CONTENT_URL.to_string(),
        }
    }

    fn rpc(&self, endpoint: &str, args: &Value) -> StorageResult<HttpResponse> {
        let request = HttpRequest::new("POST", format!("{}/{endpoint}", self.api_url))
            .header("Authorization", format!("Bearer {}", self.token));
        let request = if args.is_null() { request } else { request.json(args) };
        let response = self.http.send(request)?;
        if response.status == 401 {
            return Err(StorageError::not_available(
                "Dropbox rejected the access token",
                code::UNAUTHORIZED,
            ));
        }
        Ok(response)
    }

    fn rpc_ok(&self, endpoint: &str, args: &Value, path: &str) -> StorageResult<Value> {
        let response = self.rpc(endpoint, args)?;
        if !response.is_success() {
            return Err(api_error(&response, path));
        }
        response.json()
    }

    /// Root is addressed as the empty string by the API
    fn wire_path(path: &str) -> &str {
        if path == "/" { "" } else { path }
    }
}

impl DropboxApi for DropboxHttp {
    fn account(&self) -> StorageResult<String> {
        let account = self.rpc_ok("users/get_current_account", &Value::Null, "/")?;
        Ok(account["email"].as_str().unwrap_or_default().to_string())
    }

    fn metadata(&self, path: &str) -> StorageResult<Option<DropboxEntry>> {
        if path == "/" {
            return Ok(Some(DropboxEntry {
                name: String::new(),
                is_dir: true,
                size: 0,
                modified: None,
            }));
        }
        let response = self.rpc("files/get_metadata", &json!({ "path": path }))?;
        if response.is_success() {
            return parse_entry(&response.json()?).map(Some);
        }
        match api_error(&response, path) {
            StorageError::NotFound(_) => Ok(None),
            other => Err(other),
        }
    }

    fn list_folder(&self, path: &str) -> StorageResult<Vec<DropboxEntry>> {
        let mut page = self.rpc_ok(
            "files/list_folder",
            &json!({ "path": Self::wire_path(path) }),
            path,
        )?;
        let mut entries = Vec::new();
        loop {
            for entry in page["entries"].as_array().map(Vec::as_slice).unwrap_or_default() {
                entries.push(parse_entry(entry)?);
            }
            if page["has_more"] != true {
                break;
            }
            let cursor = page["cursor"].as_str().unwrap_or_default().to_string();
            page = self.rpc_ok("files/list_folder/continue", &json!({ "cursor": cursor }), path)?;
        }
        Ok(entries)
    }

    fn create_folder(&self, path: &str) -> StorageResult<()> {
        self.rpc_ok("files/create_folder_v2", &json!({ "path": path }), path)
            .map(|_| ())
    }

    fn delete(&self, path: &str) -> StorageResult<()> {
        self.rpc_ok("files/delete_v2", &json!({ "path": path }), path)
            .map(|_| ())
    }

    fn move_entry(&self, from: &str, to: &str) -> StorageResult<()> {
        self.rpc_ok("files/move_v2", &json!({ "from_path": from, "to_path": to }), from)
            .map(|_| ())
    }

    fn copy_entry(&self, from: &str, to: &str) -> StorageResult<()> {
        self.rpc_ok("files/copy_v2", &json!({ "from_path": from, "to_path": to }), from)
            .map(|_| ())
    }

    fn download(&self, path: &str, sink: &mut dyn Write) -> StorageResult<()> {
        let request = HttpRequest::new("POST", format!("{}/files/download", self.content_url))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Dropbox-API-Arg", json!({ "path": path }).to_string());
        let response = self.http.execute(request, Some(sink))?;
        if response.is_success() {
            Ok(())
        } else {
            Err(api_error(&response, path))
        }
    }

    fn upload(&self, path: &str, source: &Path) -> StorageResult<()> {
        let request = HttpRequest::new("POST", format!("{}/files/upload", self.content_url))
            .header("Authorization", format!("Bearer {}", self.token))
            .header(
                "Dropbox-API-Arg",
                json!({ "path": path, "mode": "overwrite", "mute": true }).to_string(),
            )
            .header("Content-Type", "application/octet-stream")
            .file_body(source);
        let response = self.http.send(request)?;
        if response.is_success() {
            Ok(())
        } else {
            Err(api_error(&response, path))
        }
    }

    fn space_usage(&self) -> StorageResult<(u64, u64)> {
        let usage = self.rpc_ok("users/get_space_usage", &Value::Null, "/")?;
        Ok((
            usage["used"].as_u64().unwrap_or(0),
            usage["allocation"]["allocated"].as_u64().unwrap_or(0),
        ))
    }
}

/// Storage contract over a [`DropboxApi`].
pub struct DropboxStorage {
    id: String,
    api: Arc<dyn DropboxApi>,
    cache: Mutex<HashMap<String, DropboxEntry>>,
}

impl std::fmt::Debug for DropboxStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropboxStorage").field("id", &self.id).finish_non_exhaustive()
    }
}

impl DropboxStorage {
    /// Storage identified by `account_key`
    pub fn new(account_key: &str, api: Arc<dyn DropboxApi>) -> Self {
        Self {
            id: format!("dropbox::{account_key}"),
            api,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, path: &str) -> StorageResult<Option<DropboxEntry>> {
        let path = api_path(path);
        if let Some(entry) = self.cache.lock().get(&path) {
            return Ok(Some(entry.clone()));
        }
        let entry = self.api.metadata(&path)?;
        if let Some(entry) = &entry {
            self.cache.lock().insert(path, entry.clone());
        }
        Ok(entry)
    }

    fn require(&self, path: &str) -> StorageResult<DropboxEntry> {
        self.entry(path)?
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    /// Drop cached metadata for `path` and everything below it
    fn forget(&self, path: &str) {
        let path = api_path(path);
        let below = format!("{path}/");
        self.cache
            .lock()
            .retain(|k, _| k != &path && !k.starts_with(&below));
    }
}

impl Storage for DropboxStorage {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn mkdir(&self, path: &str) -> StorageResult<()> {
        if self.entry(path)?.is_some() {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }
        self.api.create_folder(&api_path(path))
    }

    fn rmdir(&self, path: &str) -> StorageResult<()> {
        if normalize_path(path).is_empty() {
            return Err(StorageError::PermissionDenied("cannot remove the Dropbox root".into()));
        }
        if !self.require(path)?.is_dir {
            return Err(StorageError::NotADirectory(path.to_string()));
        }
        self.forget(path);
        self.api.delete(&api_path(path))
    }

    fn opendir(&self, path: &str) -> StorageResult<Vec<String>> {
        if !self.require(path)?.is_dir {
            return Err(StorageError::NotADirectory(path.to_string()));
        }
        let dir = normalize_path(path);
        let entries = self.api.list_folder(&api_path(&dir))?;
        let mut cache = self.cache.lock();
        let names = entries
            .into_iter()
            .map(|entry| {
                let name = entry.name.clone();
                let child = if dir.is_empty() {
                    format!("/{name}")
                } else {
                    format!("/{dir}/{name}")
                };
                cache.insert(child, entry);
                name
            })
            .collect();
        Ok(names)
    }

    fn stat(&self, path: &str) -> StorageResult<FileStat> {
        let entry = self.require(path)?;
        Ok(FileStat::new(entry.size, entry.modified.unwrap_or_else(unix_now)))
    }

    fn filetype(&self, path: &str) -> StorageResult<FileType> {
        Ok(if self.require(path)?.is_dir {
            FileType::Dir
        } else {
            FileType::File
        })
    }

    fn file_exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.entry(path)?.is_some())
    }

    fn unlink(&self, path: &str) -> StorageResult<()> {
        if self.require(path)?.is_dir {
            return self.rmdir(path);
        }
        self.forget(path);
        self.api.delete(&api_path(path))
    }

    fn fopen(&self, path: &str, mode: OpenMode) -> StorageResult<Box<dyn FileStream>> {
        let existing = self.entry(path)?;
        if existing.as_ref().is_some_and(|e| e.is_dir) {
            return Err(StorageError::IsADirectory(path.to_string()));
        }
        if mode.requires_existing() && existing.is_none() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        if mode == OpenMode::CreateNew && existing.is_some() {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }
        let remote = api_path(path);
        if mode == OpenMode::Read {
            let stream = ReadStream::download(|sink| self.api.download(&remote, sink))?;
            return Ok(Box::new(stream));
        }

        let mut current = if mode.keeps_content() && existing.is_some() {
            let mut file = tempfile::tempfile()?;
            self.api.download(&remote, &mut file)?;
            std::io::Seek::rewind(&mut file)?;
            Some(file)
        } else {
            None
        };
        self.forget(path);
        let api = Arc::clone(&self.api);
        let upload_path = remote.clone();
        let stream = WriteBackStream::open(
            remote,
            mode,
            current.as_mut().map(|f| f as &mut dyn std::io::Read),
            Box::new(move |staged: &Path| api.upload(&upload_path, staged)),
        )?;
        Ok(Box::new(stream))
    }

    /// Dropbox keeps its own modification times, so only creation works
    fn touch(&self, path: &str, mtime: Option<i64>) -> StorageResult<()> {
        if self.entry(path)?.is_some() {
            return match mtime {
                None => Ok(()),
                Some(_) => Err(StorageError::NotSupported("setting modification times on Dropbox".into())),
            };
        }
        let empty = tempfile::NamedTempFile::new()?;
        self.api.upload(&api_path(path), empty.path())
    }

    fn rename(&self, source: &str, target: &str) -> StorageResult<()> {
        self.require(source)?;
        if self.entry(target)?.is_some() {
            self.unlink(target)?;
        }
        self.forget(source);
        debug!(source, target, "Moving Dropbox entry");
        self.api.move_entry(&api_path(source), &api_path(target))
    }

    fn copy(&self, source: &str, target: &str) -> StorageResult<()> {
        self.require(source)?;
        if self.entry(target)?.is_some() {
            self.unlink(target)?;
        }
        self.api.copy_entry(&api_path(source), &api_path(target))
    }

    fn free_space(&self, _path: &str) -> StorageResult<FreeSpace> {
        let (used, allocated) = self.api.space_usage()?;
        Ok(if allocated == 0 {
            FreeSpace::Unknown
        } else {
            FreeSpace::Known(allocated.saturating_sub(used))
        })
    }

    fn test(&self) -> StorageResult<()> {
        self.api.account().map(|_| ())
    }
}

/// Storage over the Dropbox account the token belongs to
pub fn connect(options: &BackendOptions, context: &StorageContext) -> StorageResult<Arc<dyn Storage>> {
    let token = options::access_token(options)?;
    let key = match options::string(options, "client_id") {
        Some(client) => format!("{client}{}", &hex::encode(Sha256::digest(token.as_bytes()))[..16]),
        None => hex::encode(Sha256::digest(token.as_bytes()))[..16].to_string(),
    };
    let http = Arc::new(UreqClient::new(context.timeout));
    Ok(Arc::new(DropboxStorage::new(&key, Arc::new(DropboxHttp::new(http, token)))))
}

/// Backend definition
pub fn definition() -> BackendDefinition {
    BackendDefinition::new(ID, "Dropbox", connect)
        .with_alias("\\OC\\Files\\Storage\\Dropbox")
        .with_auth_schemes(&[scheme::OAUTH2])
        .with_legacy_auth_mechanism(mechanism::OAUTH2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::fake::FakeHttp;
    use std::collections::BTreeMap;
    use std::io::Read;

    /// Folder tree kept in memory
    #[derive(Default)]
    struct MemoryDropbox {
        files: Mutex<BTreeMap<String, Vec<u8>>>,
        folders: Mutex<Vec<String>>,
        metadata_calls: Mutex<usize>,
    }

    impl MemoryDropbox {
        fn with_folder(self, path: &str) -> Self {
            self.folders.lock().push(path.to_string());
            self
        }

        fn with_file(self, path: &str, data: &[u8]) -> Self {
            self.files.lock().insert(path.to_string(), data.to_vec());
            self
        }

        fn name(path: &str) -> String {
            path.rsplit('/').next().unwrap_or_default().to_string()
        }
    }

    impl DropboxApi for MemoryDropbox {
        fn account(&self) -> StorageResult<String> {
            Ok("alice@example.com".into())
        }

        fn metadata(&self, path: &str) -> StorageResult<Option<DropboxEntry>> {
            *self.metadata_calls.lock() += 1;
            if path == "/" || self.folders.lock().iter().any(|f| f == path) {
                return Ok(Some(DropboxEntry { name: Self::name(path), is_dir: true, size: 0, modified: None }));
            }
            Ok(self.files.lock().get(path).map(|data| DropboxEntry {
                name: Self::name(path),
                is_dir: false,
                size: data.len() as u64,
                modified: Some(1_000),
            }))
        }

        fn list_folder(&self, path: &str) -> StorageResult<Vec<DropboxEntry>> {
            let prefix = if path == "/" { "/".to_string() } else { format!("{path}/") };
            let direct = |p: &String| p.starts_with(&prefix) && !p[prefix.len()..].contains('/');
            let mut entries = Vec::new();
            for folder in self.folders.lock().iter().filter(|p| direct(p)) {
                entries.push(DropboxEntry { name: Self::name(folder), is_dir: true, size: 0, modified: None });
            }
            for (file, data) in self.files.lock().iter().filter(|(p, _)| direct(p)) {
                entries.push(DropboxEntry {
                    name: Self::name(file),
                    is_dir: false,
                    size: data.len() as u64,
                    modified: Some(1_000),
                });
            }
            Ok(entries)
        }

        fn create_folder(&self, path: &str) -> StorageResult<()> {
            self.folders.lock().push(path.to_string());
            Ok(())
        }

        fn delete(&self, path: &str) -> StorageResult<()> {
            let below = format!("{path}/");
            self.folders.lock().retain(|f| f != path && !f.starts_with(&below));
            self.files.lock().retain(|f, _| f != path && !f.starts_with(&below));
            Ok(())
        }

        fn move_entry(&self, from: &str, to: &str) -> StorageResult<()> {
            let data = self
                .files
                .lock()
                .remove(from)
                .ok_or_else(|| StorageError::NotFound(from.into()))?;
            self.files.lock().insert(to.to_string(), data);
            Ok(())
        }

        fn copy_entry(&self, from: &str, to: &str) -> StorageResult<()> {
            let data = self.files.lock().get(from).cloned().unwrap_or_default();
            self.files.lock().insert(to.to_string(), data);
            Ok(())
        }

        fn download(&self, path: &str, sink: &mut dyn Write) -> StorageResult<()> {
            let data = self.files.lock().get(path).cloned().ok_or_else(|| StorageError::NotFound(path.into()))?;
            sink.write_all(&data)?;
            Ok(())
        }

        fn upload(&self, path: &str, source: &Path) -> StorageResult<()> {
            self.files.lock().insert(path.to_string(), std::fs::read(source)?);
            Ok(())
        }

        fn space_usage(&self) -> StorageResult<(u64, u64)> {
            Ok((300, 1_000))
        }
    }

    fn storage(api: MemoryDropbox) -> (Arc<MemoryDropbox>, DropboxStorage) {
        let api = Arc::new(api);
        let storage = DropboxStorage::new("test", Arc::clone(&api) as Arc<dyn DropboxApi>);
        (api, storage)
    }

    #[test]
    fn test_listing_fills_metadata_cache() {
        let (api, storage) = storage(
            MemoryDropbox::default()
                .with_folder("/Photos")
                .with_file("/Photos/a.jpg", b"jpeg")
                .with_file("/notes.txt", b"hi"),
        );
        let mut names = storage.opendir("").unwrap();
        names.sort();
        assert_eq!(names, vec!["Photos", "notes.txt"]);

        let calls = *api.metadata_calls.lock();
        assert_eq!(storage.stat("notes.txt").unwrap().size, 2);
        assert_eq!(storage.filetype("Photos").unwrap(), FileType::Dir);
        assert_eq!(*api.metadata_calls.lock(), calls);
    }

    #[test]
    fn test_write_back_uploads_on_close() {
        let (api, storage) = storage(MemoryDropbox::default().with_file("/log.txt", b"one\n"));
        let mut stream = storage.fopen("log.txt", OpenMode::Append).unwrap();
        stream.write_all(b"two\n").unwrap();
        stream.close().unwrap();
        assert_eq!(api.files.lock().get("/log.txt").unwrap(), b"one\ntwo\n");

        let mut reader = storage.fopen("log.txt", OpenMode::Read).unwrap();
        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();
        assert_eq!(text, "one\ntwo\n");
    }

    #[test]
    fn test_rename_invalidates_cache() {
        let (_, storage) = storage(MemoryDropbox::default().with_file("/a.txt", b"x"));
        storage.opendir("").unwrap();
        storage.rename("a.txt", "b.txt").unwrap();
        assert!(!storage.file_exists("a.txt").unwrap());
        assert!(storage.file_exists("b.txt").unwrap());
    }

    #[test]
    fn test_rmdir_and_touch() {
        let (api, storage) = storage(MemoryDropbox::default().with_folder("/d").with_file("/d/f", b"1"));
        assert!(storage.rmdir("d/f").is_err());
        storage.rmdir("d").unwrap();
        assert!(api.files.lock().is_empty());
        assert!(matches!(storage.rmdir(""), Err(StorageError::PermissionDenied(_))));

        storage.touch("new.txt", None).unwrap();
        assert_eq!(api.files.lock().get("/new.txt").unwrap(), b"");
        assert!(matches!(storage.touch("new.txt", Some(5)), Err(StorageError::NotSupported(_))));
    }

    #[test]
    fn test_free_space() {
        let (_, storage) = storage(MemoryDropbox::default());
        assert_eq!(storage.free_space("").unwrap(), FreeSpace::Known(700));
    }

    #[test]
    fn test_http_metadata_and_paging() {
        let http = FakeHttp::new(|req| {
            let body: Value = match &req.body {
                crate::http::RequestBody::Bytes(b) => serde_json::from_slice(b).unwrap_or(Value::Null),
                _ => Value::Null,
            };
            match req.url.rsplit("/2/").next().unwrap_or_default() {
                "files/get_metadata" => HttpResponse::new(
                    409,
                    json!({"error_summary": "path/not_found/.."}).to_string(),
                ),
                "files/list_folder" => {
                    assert_eq!(body["path"], "");
                    HttpResponse::new(200, json!({
                        "entries": [{".tag": "folder", "name": "A"}],
                        "has_more": true, "cursor": "c1"
                    }).to_string())
                }
                "files/list_folder/continue" => {
                    assert_eq!(body["cursor"], "c1");
                    HttpResponse::new(200, json!({
                        "entries": [{".tag": "file", "name": "b.txt", "size": 3,
                                     "server_modified": "2015-05-12T15:50:38Z"}],
                        "has_more": false
                    }).to_string())
                }
                "files/create_folder_v2" => HttpResponse::new(
                    409,
                    json!({"error_summary": "path/conflict/folder/."}).to_string(),
                ),
                _ => HttpResponse::new(401, ""),
            }
        });
        let api = DropboxHttp::new(Arc::new(http), "tok");
        assert_eq!(api.metadata("/missing").unwrap(), None);
        let entries = api.list_folder("/").unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_dir);
        assert_eq!(entries[1].modified, Some(1_431_445_838));
        assert!(matches!(api.create_folder("/A"), Err(StorageError::AlreadyExists(_))));
        assert_eq!(api.account().unwrap_err().code(), code::UNAUTHORIZED);
    }
}

//! Google Drive, through the Drive v3 API.
//!
//! Drive addresses files by id and allows several files with the same name
//! in one folder. Paths are resolved by walking folder listings from the
//! root, and each listing keeps only the first entry for a name; the others
//! are logged and hidden.
//!
//! Native Google documents have no file content of their own. They are
//! listed with a synthesized extension and read by exporting them:
//!
//! | Drive type     | Extension | Exported as |
//! |----------------|-----------|-------------|
//! | `document`     | `.odt`    | OpenDocument text |
//! | `spreadsheet`  | `.ods`    | OpenDocument spreadsheet |
//! | `drawing`      | `.jpg`    | JPEG |
//! | `presentation` | `.pdf`    | PDF |

use crate::http::{HttpClient, HttpRequest, HttpResponse, UreqClient};
use crate::options;
use chrono::{DateTime, SecondsFormat, Utc};
use extmount_core::definition::auth::{mechanism, scheme};
use extmount_core::storage::error::code;
use extmount_core::storage::{
    DIRECTORY_MIME_TYPE, FileStat, FileStream, FileType, FreeSpace, OpenMode, ReadStream, Storage,
    StorageError, WriteBackStream, basename, dirname, join_path, mime, normalize_path, unix_now,
};
use extmount_core::{BackendDefinition, BackendOptions, StorageContext, StorageResult};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::io::{Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Backend identifier
pub const ID: &str = "googledrive";

const API_URL: &str = "https://www.googleapis.com/drive/v3";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const FILE_FIELDS: &str = "id,name,mimeType,size,modifiedTime";
const ROOT_ID: &str = "root";

/// Extension and export type for native Google documents
pub fn native_export(mime_type: &str) -> Option<(&'static str, &'static str)> {
    match mime_type {
        "application/vnd.google-apps.document" => {
            Some(("odt", "application/vnd.oasis.opendocument.text"))
        }
        "application/vnd.google-apps.spreadsheet" => {
            Some(("ods", "application/x-vnd.oasis.opendocument.spreadsheet"))
        }
        "application/vnd.google-apps.drawing" => Some(("jpg", "image/jpeg")),
        "application/vnd.google-apps.presentation" => Some(("pdf", "application/pdf")),
        _ => None,
    }
}

/// One Drive file or folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveFile {
    /// Drive id
    pub id: String,
    /// Name as stored on Drive
    pub name: String,
    /// Drive MIME type
    pub mime_type: String,
    /// Size in bytes; native documents have none
    pub size: Option<u64>,
    /// Modification time
    pub modified: Option<i64>,
}

impl DriveFile {
    fn root() -> Self {
        Self {
            id: ROOT_ID.to_string(),
            name: String::new(),
            mime_type: FOLDER_MIME.to_string(),
            size: None,
            modified: None,
        }
    }

    /// Whether this is a folder
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME
    }

    /// Whether this is a native document that must be exported
    pub fn is_native(&self) -> bool {
        native_export(&self.mime_type).is_some()
    }

    /// Name shown in listings, with the export extension for native documents
    pub fn display_name(&self) -> String {
        match native_export(&self.mime_type) {
            Some((ext, _)) if !self.name.to_lowercase().ends_with(&format!(".{ext}")) => {
                format!("{}.{ext}", self.name)
            }
            _ => self.name.clone(),
        }
    }

    /// MIME type of the content a read returns
    pub fn content_mime(&self) -> String {
        if self.is_folder() {
            DIRECTORY_MIME_TYPE.to_string()
        } else if let Some((_, export)) = native_export(&self.mime_type) {
            export.to_string()
        } else {
            self.mime_type.clone()
        }
    }
}

/// Remote operations the storage needs
pub trait DriveApi: Send + Sync {
    /// Used bytes and quota limit, if the account has one
    fn quota(&self) -> StorageResult<(u64, Option<u64>)>;
    /// Files in a folder, excluding trashed ones, in Drive's order
    fn children(&self, folder_id: &str) -> StorageResult<Vec<DriveFile>>;
    /// Create a folder
    fn create_folder(&self, parent_id: &str, name: &str) -> StorageResult<DriveFile>;
    /// Create a file or replace the content of `existing`
    fn upload(&self, parent_id: &str, name: &str, existing: Option<&str>, mime_type: &str, source: &Path) -> StorageResult<DriveFile>;
    /// Write file content into `sink`, exporting as `export_mime` when given
    fn download(&self, id: &str, export_mime: Option<&str>, sink: &mut dyn Write) -> StorageResult<()>;
    /// Move to the trash
    fn trash(&self, id: &str) -> StorageResult<()>;
    /// Rename and/or move between folders
    fn relocate(&self, id: &str, name: &str, from_parent: &str, to_parent: &str) -> StorageResult<()>;
    /// Set the modification time
    fn set_modified(&self, id: &str, mtime: i64) -> StorageResult<()>;
    /// Server-side copy of a file
    fn copy(&self, id: &str, parent_id: &str, name: &str) -> StorageResult<DriveFile>;
}

fn parse_file(value: &Value) -> StorageResult<DriveFile> {
    let text = |key: &str| value[key].as_str().map(ToString::to_string);
    Ok(DriveFile {
        id: text("id").ok_or_else(|| StorageError::protocol("file without an id"))?,
        name: text("name").unwrap_or_default(),
        mime_type: text("mimeType").unwrap_or_default(),
        // Drive sends int64 fields as strings
        size: value["size"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .or_else(|| value["size"].as_u64()),
        modified: value["modifiedTime"]
            .as_str()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.timestamp()),
    })
}

fn rfc3339(mtime: i64) -> String {
    DateTime::<Utc>::from_timestamp(mtime, 0)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// [`DriveApi`] over HTTPS.
pub struct DriveHttp {
    http: Arc<dyn HttpClient>,
    token: String,
    api_url: String,
    upload_url: String,
}

impl std::fmt::Debug for DriveHttp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveHttp").field("api_url", &self.api_url).finish_non_exhaustive()
    }
}

impl DriveHttp {
    /// Client using a bearer token
    pub fn new(http: Arc<dyn HttpClient>, token: impl Into<String>) -> Self {
        Self {
            http,
            token: token.into(),
            api_url: API_URL.to_string(),
            upload_url: UPLOAD_URL.to_string(),
        }
    }

    fn url(&self, base: &str, path: &str, query: &[(&str, &str)]) -> StorageResult<String> {
        let mut url = Url::parse(&format!("{base}/{path}"))
            .map_err(|e| StorageError::InvalidConfig(format!("invalid Drive URL: {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url.into())
    }

    fn request(&self, method: &str, url: String) -> HttpRequest {
        HttpRequest::new(method, url).header("Authorization", format!("Bearer {}", self.token))
    }

    fn send(&self, request: HttpRequest, what: &str) -> StorageResult<HttpResponse> {
        let response = self.http.send(request)?;
        if response.status == 401 {
            return Err(StorageError::not_available(
                "Google rejected the access token",
                code::UNAUTHORIZED,
            ));
        }
        response.error_for_status(what)
    }
}

impl DriveApi for DriveHttp {
    fn quota(&self) -> StorageResult<(u64, Option<u64>)> {
        let url = self.url(&self.api_url, "about", &[("fields", "storageQuota")])?;
        let about = self.send(self.request("GET", url), "about")?.json()?;
        let field = |key: &str| {
            about["storageQuota"][key]
                .as_str()
                .and_then(|s| s.parse::<u64>().ok())
        };
        Ok((field("usage").unwrap_or(0), field("limit")))
    }

    fn children(&self, folder_id: &str) -> StorageResult<Vec<DriveFile>> {
        let query = format!("'{folder_id}' in parents and trashed = false");
        let fields = format!("nextPageToken,files({FILE_FIELDS})");
        let mut files = Vec::new();
        let mut page_token = String::new();
        loop {
            let mut params = vec![
                ("q", query.as_str()),
                ("fields", fields.as_str()),
                ("pageSize", "1000"),
                ("orderBy", "createdTime"),
            ];
            if !page_token.is_empty() {
                params.push(("pageToken", page_token.as_str()));
            }
            let url = self.url(&self.api_url, "files", &params)?;
            let page = self.send(self.request("GET", url), folder_id)?.json()?;
            for file in page["files"].as_array().map(Vec::as_slice).unwrap_or_default() {
                files.push(parse_file(file)?);
            }
            match page["nextPageToken"].as_str() {
                Some(next) => page_token = next.to_string(),
                None => break,
            }
        }
        Ok(files)
    }

    fn create_folder(&self, parent_id: &str, name: &str) -> StorageResult<DriveFile> {
        let url = self.url(&self.api_url, "files", &[("fields", FILE_FIELDS)])?;
        let body = json!({ "name": name, "mimeType": FOLDER_MIME, "parents": [parent_id] });
        parse_file(&self.send(self.request("POST", url).json(&body), name)?.json()?)
    }

    fn upload(&self, parent_id: &str, name: &str, existing: Option<&str>, mime_type: &str, source: &Path) -> StorageResult<DriveFile> {
        let id = match existing {
            Some(id) => id.to_string(),
            None => {
                let url = self.url(&self.api_url, "files", &[("fields", "id")])?;
                let body = json!({ "name": name, "mimeType": mime_type, "parents": [parent_id] });
                let created = self.send(self.request("POST", url).json(&body), name)?.json()?;
                parse_file(&created)?.id
            }
        };
        let url = self.url(
            &self.upload_url,
            &format!("files/{id}"),
            &[("uploadType", "media"), ("fields", FILE_FIELDS)],
        )?;
        let request = self
            .request("PATCH", url)
            .header("Content-Type", mime_type)
            .file_body(source);
        parse_file(&self.send(request, name)?.json()?)
    }

    fn download(&self, id: &str, export_mime: Option<&str>, sink: &mut dyn Write) -> StorageResult<()> {
        let url = match export_mime {
            Some(mime) => self.url(&self.api_url, &format!("files/{id}/export"), &[("mimeType", mime)])?,
            None => self.url(&self.api_url, &format!("files/{id}"), &[("alt", "media")])?,
        };
        let response = self.http.execute(self.request("GET", url), Some(sink))?;
        if response.status == 401 {
            return Err(StorageError::not_available("Google rejected the access token", code::UNAUTHORIZED));
        }
        response.error_for_status(id).map(|_| ())
    }

    fn trash(&self, id: &str) -> StorageResult<()> {
        let url = self.url(&self.api_url, &format!("files/{id}"), &[])?;
        self.send(self.request("PATCH", url).json(&json!({ "trashed": true })), id)
            .map(|_| ())
    }

    fn relocate(&self, id: &str, name: &str, from_parent: &str, to_parent: &str) -> StorageResult<()> {
        let mut query = Vec::new();
        if from_parent != to_parent {
            query.push(("addParents", to_parent));
            query.push(("removeParents", from_parent));
        }
        let url = self.url(&self.api_url, &format!("files/{id}"), &query)?;
        self.send(self.request("PATCH", url).json(&json!({ "name": name })), id)
            .map(|_| ())
    }

    fn set_modified(&self, id: &str, mtime: i64) -> StorageResult<()> {
        let url = self.url(&self.api_url, &format!("files/{id}"), &[])?;
        let body = json!({ "modifiedTime": rfc3339(mtime) });
        self.send(self.request("PATCH", url).json(&body), id).map(|_| ())
    }

    fn copy(&self, id: &str, parent_id: &str, name: &str) -> StorageResult<DriveFile> {
        let url = self.url(&self.api_url, &format!("files/{id}/copy"), &[("fields", FILE_FIELDS)])?;
        let body = json!({ "name": name, "parents": [parent_id] });
        parse_file(&self.send(self.request("POST", url).json(&body), id)?.json()?)
    }
}

/// Storage contract over a [`DriveApi`].
pub struct GoogleDriveStorage {
    id: String,
    api: Arc<dyn DriveApi>,
    /// Resolved path -> file, filled from folder listings
    cache: Mutex<HashMap<String, DriveFile>>,
}

impl std::fmt::Debug for GoogleDriveStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleDriveStorage").field("id", &self.id).finish_non_exhaustive()
    }
}

impl GoogleDriveStorage {
    /// Storage identified by `account_key`
    pub fn new(account_key: &str, api: Arc<dyn DriveApi>) -> Self {
        Self {
            id: format!("google::{account_key}"),
            api,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// List a folder, keeping the first entry for each display name
    fn list(&self, dir: &str, folder: &DriveFile) -> StorageResult<Vec<(String, DriveFile)>> {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for file in self.api.children(&folder.id)? {
            let name = file.display_name();
            if !seen.insert(name.clone()) {
                warn!(
                    app = "files_external",
                    path = %join_path(dir, &name),
                    id = %file.id,
                    "Ignoring duplicate file name on Google Drive"
                );
                continue;
            }
            entries.push((name, file));
        }
        let mut cache = self.cache.lock();
        for (name, file) in &entries {
            cache.insert(join_path(dir, name), file.clone());
        }
        Ok(entries)
    }

    fn resolve(&self, path: &str) -> StorageResult<Option<DriveFile>> {
        let path = normalize_path(path);
        if path.is_empty() {
            return Ok(Some(DriveFile::root()));
        }
        if let Some(file) = self.cache.lock().get(&path) {
            return Ok(Some(file.clone()));
        }
        let parent_path = dirname(&path);
        let Some(parent) = self.resolve(&parent_path)? else {
            return Ok(None);
        };
        if !parent.is_folder() {
            return Ok(None);
        }
        let name = basename(&path);
        Ok(self
            .list(&parent_path, &parent)?
            .into_iter()
            .find(|(n, _)| *n == name)
            .map(|(_, file)| file))
    }

    fn require(&self, path: &str) -> StorageResult<DriveFile> {
        self.resolve(path)?
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    fn require_folder(&self, path: &str) -> StorageResult<DriveFile> {
        let folder = self.require(path)?;
        if !folder.is_folder() {
            return Err(StorageError::NotADirectory(path.to_string()));
        }
        Ok(folder)
    }

    fn forget(&self, path: &str) {
        let path = normalize_path(path);
        let below = format!("{path}/");
        self.cache
            .lock()
            .retain(|k, _| *k != path && !k.starts_with(&below));
    }

    fn trash_path(&self, path: &str) -> StorageResult<()> {
        if normalize_path(path).is_empty() {
            return Err(StorageError::PermissionDenied("cannot remove the Drive root".into()));
        }
        let file = self.require(path)?;
        self.forget(path);
        self.api.trash(&file.id)
    }
}

impl Storage for GoogleDriveStorage {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn mkdir(&self, path: &str) -> StorageResult<()> {
        if self.resolve(path)?.is_some() {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }
        let parent = self.require_folder(&dirname(path))?;
        let folder = self.api.create_folder(&parent.id, &basename(path))?;
        self.cache.lock().insert(normalize_path(path), folder);
        Ok(())
    }

    fn rmdir(&self, path: &str) -> StorageResult<()> {
        self.require_folder(path)?;
        self.trash_path(path)
    }

    fn opendir(&self, path: &str) -> StorageResult<Vec<String>> {
        let folder = self.require_folder(path)?;
        let names = self
            .list(&normalize_path(path), &folder)?
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        Ok(names)
    }

    fn stat(&self, path: &str) -> StorageResult<FileStat> {
        let file = self.require(path)?;
        Ok(FileStat::new(
            file.size.unwrap_or(0),
            file.modified.unwrap_or_else(unix_now),
        ))
    }

    fn filetype(&self, path: &str) -> StorageResult<FileType> {
        Ok(if self.require(path)?.is_folder() {
            FileType::Dir
        } else {
            FileType::File
        })
    }

    fn file_exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.resolve(path)?.is_some())
    }

    fn unlink(&self, path: &str) -> StorageResult<()> {
        self.trash_path(path)
    }

    fn fopen(&self, path: &str, mode: OpenMode) -> StorageResult<Box<dyn FileStream>> {
        let existing = self.resolve(path)?;
        if let Some(file) = &existing {
            if file.is_folder() {
                return Err(StorageError::IsADirectory(path.to_string()));
            }
            if mode == OpenMode::CreateNew {
                return Err(StorageError::AlreadyExists(path.to_string()));
            }
        } else if mode.requires_existing() {
            return Err(StorageError::NotFound(path.to_string()));
        }

        if mode == OpenMode::Read {
            let file = existing.ok_or_else(|| StorageError::NotFound(path.to_string()))?;
            let export = native_export(&file.mime_type).map(|(_, mime)| mime);
            let stream = ReadStream::download(|sink| self.api.download(&file.id, export, sink))?;
            return Ok(Box::new(stream));
        }
        if existing.as_ref().is_some_and(DriveFile::is_native) {
            return Err(StorageError::NotSupported("writing native Google documents".into()));
        }

        let parent = self.require_folder(&dirname(path))?;
        let mut current = match &existing {
            Some(file) if mode.keeps_content() => {
                let mut local = tempfile::tempfile()?;
                self.api.download(&file.id, None, &mut local)?;
                local.rewind()?;
                Some(local)
            }
            _ => None,
        };
        self.forget(path);

        let api = Arc::clone(&self.api);
        let name = basename(path);
        let mime_type = mime::guess_from_path(&name);
        let existing_id = existing.map(|f| f.id);
        let stream = WriteBackStream::open(
            normalize_path(path),
            mode,
            current.as_mut().map(|f| f as &mut dyn Read),
            Box::new(move |staged: &Path| {
                api.upload(&parent.id, &name, existing_id.as_deref(), &mime_type, staged)
                    .map(|_| ())
            }),
        )?;
        Ok(Box::new(stream))
    }

    fn touch(&self, path: &str, mtime: Option<i64>) -> StorageResult<()> {
        let mtime = mtime.unwrap_or_else(unix_now);
        if let Some(file) = self.resolve(path)? {
            self.forget(path);
            return self.api.set_modified(&file.id, mtime);
        }
        let parent = self.require_folder(&dirname(path))?;
        let name = basename(path);
        let empty = tempfile::NamedTempFile::new()?;
        self.api
            .upload(&parent.id, &name, None, &mime::guess_from_path(&name), empty.path())?;
        Ok(())
    }

    fn rename(&self, source: &str, target: &str) -> StorageResult<()> {
        let file = self.require(source)?;
        let from_parent = self.require_folder(&dirname(source))?;
        let to_parent = self.require_folder(&dirname(target))?;
        if let Some(existing) = self.resolve(target)? {
            debug!(target, "Trashing rename target");
            self.forget(target);
            self.api.trash(&existing.id)?;
        }
        self.forget(source);
        self.api
            .relocate(&file.id, &basename(target), &from_parent.id, &to_parent.id)
    }

    fn copy(&self, source: &str, target: &str) -> StorageResult<()> {
        let file = self.require(source)?;
        if file.is_folder() {
            self.mkdir(target)?;
            for name in self.opendir(source)? {
                self.copy(&join_path(source, &name), &join_path(target, &name))?;
            }
            return Ok(());
        }
        let parent = self.require_folder(&dirname(target))?;
        if let Some(existing) = self.resolve(target)? {
            self.forget(target);
            self.api.trash(&existing.id)?;
        }
        let copied = self.api.copy(&file.id, &parent.id, &basename(target))?;
        self.cache.lock().insert(normalize_path(target), copied);
        Ok(())
    }

    fn mime_type(&self, path: &str) -> StorageResult<String> {
        let file = self.require(path)?;
        let mime = file.content_mime();
        Ok(if mime.is_empty() {
            mime::guess_from_path(path)
        } else {
            mime
        })
    }

    fn free_space(&self, _path: &str) -> StorageResult<FreeSpace> {
        Ok(match self.api.quota()? {
            (used, Some(limit)) => FreeSpace::Known(limit.saturating_sub(used)),
            (_, None) => FreeSpace::Unknown,
        })
    }

    fn test(&self) -> StorageResult<()> {
        self.api.quota().map(|_| ())
    }
}

/// Storage over the Drive account the token belongs to
pub fn connect(options: &BackendOptions, context: &StorageContext) -> StorageResult<Arc<dyn Storage>> {
    let token = options::access_token(options)?;
    let client_id = options::string_or(options, "client_id", "");
    let http = Arc::new(UreqClient::new(context.timeout));
    Ok(Arc::new(GoogleDriveStorage::new(
        &format!("{client_id}{}", context.user.as_deref().unwrap_or_default()),
        Arc::new(DriveHttp::new(http, token)),
    )))
}

/// Backend definition
pub fn definition() -> BackendDefinition {
    BackendDefinition::new(ID, "Google Drive", connect)
        .with_alias("\\OC\\Files\\Storage\\Google")
        .with_auth_schemes(&[scheme::OAUTH2])
        .with_legacy_auth_mechanism(mechanism::OAUTH2)
}

//! WebDAV servers, and ownCloud instances reached through their WebDAV
//! endpoint.

use crate::http::{HttpClient, HttpRequest, HttpResponse, UreqClient};
use crate::options;
use crate::xml::{self, XmlNode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::DateTime;
use extmount_core::definition::auth::{mechanism, scheme};
use extmount_core::storage::error::code;
use extmount_core::storage::{
    DIRECTORY_MIME_TYPE, FileStat, FileStream, FileType, FreeSpace, OpenMode, ReadStream, Storage,
    StorageError, WriteBackStream, mime, normalize_path, unix_now,
};
use extmount_core::{BackendDefinition, BackendOptions, DefinitionParameter, StorageContext, StorageResult};
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Backend identifier
pub const ID: &str = "dav";

/// ownCloud backend identifier
pub const OWNCLOUD_ID: &str = "owncloud";

const OWNCLOUD_WEBDAV_ROOT: &str = "remote.php/webdav";

/// Characters escaped in a path segment
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:getlastmodified/>
    <d:getcontentlength/>
    <d:getcontenttype/>
    <d:resourcetype/>
    <d:getetag/>
    <d:quota-available-bytes/>
  </d:prop>
</d:propfind>"#;

fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Connection settings
#[derive(Clone)]
pub struct DavConfig {
    /// Host with optional port
    pub host: String,
    /// Use HTTPS
    pub secure: bool,
    /// Path of the collection that becomes the storage root
    pub root: String,
    /// User name, empty for anonymous access
    pub user: String,
    /// Password
    pub password: String,
}

impl std::fmt::Debug for DavConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DavConfig")
            .field("host", &self.host)
            .field("secure", &self.secure)
            .field("root", &self.root)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl DavConfig {
    /// Settings from mount options
    pub fn from_options(options: &BackendOptions) -> StorageResult<Self> {
        let (host, scheme_secure) = options::split_host(&options::required(options, "host")?);
        let secure = if options.contains_key("secure") {
            options::flag(options, "secure")
        } else {
            scheme_secure.unwrap_or(false)
        };
        Ok(Self {
            host,
            secure,
            root: options::root(options, "root"),
            user: options::string(options, "user").unwrap_or_default(),
            password: options::string(options, "password").unwrap_or_default(),
        })
    }

    /// Settings for an ownCloud server.
    ///
    /// The host may carry the installation's web path
    /// (`cloud.example.com/owncloud`); the WebDAV endpoint is inserted
    /// between it and the configured root.
    pub fn owncloud(options: &BackendOptions) -> StorageResult<Self> {
        let mut config = Self::from_options(options)?;
        let (host, context) = match config.host.split_once('/') {
            Some((host, context)) => (host.to_string(), context.trim_matches('/').to_string()),
            None => (config.host.clone(), String::new()),
        };
        let root = [context.as_str(), OWNCLOUD_WEBDAV_ROOT, config.root.as_str()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/");
        config.host = host;
        config.root = root;
        Ok(config)
    }

    fn base_path(&self) -> String {
        if self.root.is_empty() {
            "/".to_string()
        } else {
            format!("/{}/", self.root)
        }
    }
}

/// Properties of one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavEntry {
    /// Path relative to the storage root
    pub path: String,
    /// Collection or plain resource
    pub kind: FileType,
    /// Content length
    pub size: u64,
    /// Last modification (Unix seconds)
    pub mtime: Option<i64>,
    /// Content type
    pub content_type: Option<String>,
    /// Free bytes below this collection, when the server reports it
    pub quota_available: Option<i64>,
}

/// Parse a `multistatus` body into entries relative to `base_path`
pub fn parse_multistatus(body: &str, base_path: &str) -> StorageResult<Vec<DavEntry>> {
    let root = xml::parse(body)?;
    let mut entries = Vec::new();
    for response in root.children_named("response") {
        let Some(href) = response.child_text("href") else {
            continue;
        };
        let Some(prop) = successful_props(response) else {
            continue;
        };
        let href_path = match href.find("://") {
            Some(idx) => href[idx + 3..].find('/').map_or("/", |p| &href[idx + 3 + p..]),
            None => href,
        };
        let decoded = percent_decode_str(href_path).decode_utf8_lossy();
        let relative = decoded
            .strip_prefix(base_path)
            .or_else(|| decoded.strip_prefix(base_path.trim_end_matches('/')))
            .unwrap_or(&*decoded);
        let is_collection = prop
            .child("resourcetype")
            .is_some_and(|r| r.child("collection").is_some());
        entries.push(DavEntry {
            path: normalize_path(relative),
            kind: if is_collection { FileType::Dir } else { FileType::File },
            size: prop
                .child_text("getcontentlength")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0),
            mtime: prop
                .child_text("getlastmodified")
                .and_then(|s| DateTime::parse_from_rfc2822(s.trim()).ok())
                .map(|t| t.timestamp()),
            content_type: prop
                .child_text("getcontenttype")
                .filter(|s| !s.is_empty())
                .map(ToString::to_string),
            quota_available: prop
                .child_text("quota-available-bytes")
                .and_then(|s| s.trim().parse().ok()),
        });
    }
    Ok(entries)
}

/// The `prop` element of the first 2xx `propstat`
fn successful_props(response: &XmlNode) -> Option<&XmlNode> {
    response
        .children_named("propstat")
        .find(|ps| {
            ps.child_text("status")
                .is_none_or(|s| s.split_whitespace().nth(1).is_some_and(|c| c.starts_with('2')))
        })
        .and_then(|ps| ps.child("prop"))
}

/// WebDAV client implementing the storage contract.
pub struct DavStorage {
    id: String,
    config: DavConfig,
    http: Arc<dyn HttpClient>,
}

impl std::fmt::Debug for DavStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DavStorage").field("id", &self.id).finish_non_exhaustive()
    }
}

impl DavStorage {
    /// Storage over an HTTP transport
    pub fn new(config: DavConfig, http: Arc<dyn HttpClient>) -> Self {
        let id = format!("webdav::{}@{}/{}", config.user, config.host, config.root);
        Self { id, config, http }
    }

    /// Absolute URL; a trailing `/` on `path` addresses a collection
    fn url(&self, path: &str) -> String {
        let scheme = if self.config.secure { "https" } else { "http" };
        let relative = normalize_path(path);
        let slash = if path.ends_with('/') && !relative.is_empty() { "/" } else { "" };
        format!(
            "{scheme}://{}{}{}{slash}",
            self.config.host,
            encode_path(&self.config.base_path()),
            encode_path(&relative)
        )
    }

    fn request(&self, method: &str, path: &str) -> HttpRequest {
        let request = HttpRequest::new(method, self.url(path));
        if self.config.user.is_empty() {
            return request;
        }
        let credentials = STANDARD.encode(format!("{}:{}", self.config.user, self.config.password));
        request.header("Authorization", format!("Basic {credentials}"))
    }

    fn send(&self, request: HttpRequest) -> StorageResult<HttpResponse> {
        self.http.send(request)
    }

    fn propfind(&self, path: &str, depth: u8) -> StorageResult<Option<Vec<DavEntry>>> {
        let request = self
            .request("PROPFIND", path)
            .header("Depth", depth.to_string())
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(PROPFIND_BODY);
        let response = self.send(request)?;
        if response.status == 404 {
            return Ok(None);
        }
        let response = response.error_for_status(path)?;
        parse_multistatus(&response.text(), &self.config.base_path()).map(Some)
    }

    fn entry(&self, path: &str) -> StorageResult<Option<DavEntry>> {
        let target = normalize_path(path);
        Ok(self
            .propfind(&target, 0)?
            .and_then(|entries| entries.into_iter().find(|e| e.path == target)))
    }

    fn require(&self, path: &str) -> StorageResult<DavEntry> {
        self.entry(path)?
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    fn transfer(&self, method: &str, source: &str, target: &str) -> StorageResult<()> {
        let request = self
            .request(method, source)
            .header("Destination", self.url(target))
            .header("Overwrite", "T");
        self.send(request)?.error_for_status(source)?;
        Ok(())
    }
}

impl Storage for DavStorage {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn mkdir(&self, path: &str) -> StorageResult<()> {
        let response = self.send(self.request("MKCOL", &format!("{}/", normalize_path(path))))?;
        response.error_for_status(path)?;
        Ok(())
    }

    fn rmdir(&self, path: &str) -> StorageResult<()> {
        if normalize_path(path).is_empty() {
            return Err(StorageError::PermissionDenied("cannot remove the share root".into()));
        }
        if self.require(path)?.kind != FileType::Dir {
            return Err(StorageError::NotADirectory(path.to_string()));
        }
        self.send(self.request("DELETE", &format!("{}/", normalize_path(path))))?
            .error_for_status(path)?;
        Ok(())
    }

    fn opendir(&self, path: &str) -> StorageResult<Vec<String>> {
        let dir = normalize_path(path);
        let entries = self
            .propfind(&format!("{dir}/"), 1)?
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        let mut names = Vec::new();
        for entry in entries {
            if entry.path == dir {
                if entry.kind != FileType::Dir {
                    return Err(StorageError::NotADirectory(path.to_string()));
                }
                continue;
            }
            let name = if dir.is_empty() {
                entry.path.as_str()
            } else {
                entry.path.strip_prefix(&format!("{dir}/")).unwrap_or(&entry.path)
            };
            if !name.is_empty() && !name.contains('/') {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn stat(&self, path: &str) -> StorageResult<FileStat> {
        let entry = self.require(path)?;
        Ok(FileStat::new(entry.size, entry.mtime.unwrap_or_else(unix_now)))
    }

    fn filetype(&self, path: &str) -> StorageResult<FileType> {
        Ok(self.require(path)?.kind)
    }

    fn file_exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.entry(path)?.is_some())
    }

    fn unlink(&self, path: &str) -> StorageResult<()> {
        let response = self.send(self.request("DELETE", path))?;
        response.error_for_status(path)?;
        Ok(())
    }

    fn fopen(&self, path: &str, mode: OpenMode) -> StorageResult<Box<dyn FileStream>> {
        if mode == OpenMode::Read {
            let request = self.request("GET", path);
            let stream = ReadStream::download(|sink| {
                self.http.execute(request, Some(sink))?.error_for_status(path)?;
                Ok(())
            })?;
            return Ok(Box::new(stream));
        }

        let existing = self.entry(path)?;
        match &existing {
            Some(e) if e.kind == FileType::Dir => {
                return Err(StorageError::IsADirectory(path.to_string()));
            }
            Some(_) if mode == OpenMode::CreateNew => {
                return Err(StorageError::AlreadyExists(path.to_string()));
            }
            None if mode.requires_existing() => {
                return Err(StorageError::NotFound(path.to_string()));
            }
            _ => {}
        }

        let mut current = if mode.keeps_content() && existing.is_some() {
            let mut file = tempfile::tempfile()?;
            self.http
                .execute(self.request("GET", path), Some(&mut file))?
                .error_for_status(path)?;
            file.rewind()?;
            Some(file)
        } else {
            None
        };

        let http = Arc::clone(&self.http);
        let put = self
            .request("PUT", path)
            .header("Content-Type", mime::guess_from_path(path));
        let remote = normalize_path(path);
        let label = remote.clone();
        let stream = WriteBackStream::open(
            remote,
            mode,
            current.as_mut().map(|f| f as &mut dyn Read),
            Box::new(move |staged: &Path| {
                http.send(put.file_body(staged))?.error_for_status(&label)?;
                Ok(())
            }),
        )?;
        Ok(Box::new(stream))
    }

    fn touch(&self, path: &str, mtime: Option<i64>) -> StorageResult<()> {
        if self.entry(path)?.is_none() {
            self.send(self.request("PUT", path).body(Vec::new()))?
                .error_for_status(path)?;
            if mtime.is_none() {
                return Ok(());
            }
        }
        let mtime = mtime.unwrap_or_else(unix_now);
        let body = format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<d:propertyupdate xmlns:d="DAV:"><d:set><d:prop><d:lastmodified>{}</d:lastmodified></d:prop></d:set></d:propertyupdate>"#,
            xml::escape(&mtime.to_string())
        );
        let response = self.send(
            self.request("PROPPATCH", path)
                .header("Content-Type", "application/xml; charset=utf-8")
                .body(body),
        )?;
        // Servers that cannot set the time still answer 207; the file exists either way
        if response.status == 207 || response.is_success() {
            Ok(())
        } else {
            debug!(path, status = response.status, "PROPPATCH rejected");
            Err(StorageError::NotSupported("setting modification times".into()))
        }
    }

    fn rename(&self, source: &str, target: &str) -> StorageResult<()> {
        let entry = self.require(source)?;
        let (from, to) = match entry.kind {
            FileType::Dir => (format!("{}/", normalize_path(source)), format!("{}/", normalize_path(target))),
            FileType::File => (normalize_path(source), normalize_path(target)),
        };
        self.transfer("MOVE", &from, &to)
    }

    fn copy(&self, source: &str, target: &str) -> StorageResult<()> {
        let entry = self.require(source)?;
        let (from, to) = match entry.kind {
            FileType::Dir => (format!("{}/", normalize_path(source)), format!("{}/", normalize_path(target))),
            FileType::File => (normalize_path(source), normalize_path(target)),
        };
        self.transfer("COPY", &from, &to)
    }

    fn mime_type(&self, path: &str) -> StorageResult<String> {
        let entry = self.require(path)?;
        Ok(match entry.kind {
            FileType::Dir => DIRECTORY_MIME_TYPE.to_string(),
            FileType::File => entry
                .content_type
                .unwrap_or_else(|| mime::guess_from_path(path)),
        })
    }

    fn free_space(&self, path: &str) -> StorageResult<FreeSpace> {
        let entry = self.require(path)?;
        Ok(match entry.quota_available {
            Some(bytes) if bytes >= 0 => FreeSpace::Known(bytes as u64),
            _ => FreeSpace::Unknown,
        })
    }

    fn test(&self) -> StorageResult<()> {
        let response = self.send(
            self.request("PROPFIND", "")
                .header("Depth", "0")
                .body(PROPFIND_BODY),
        )?;
        match response.status {
            401 => Err(StorageError::not_available(
                "the server rejected the credentials",
                code::UNAUTHORIZED,
            )),
            404 => Err(StorageError::not_available(
                format!("{} does not exist on the server", self.config.base_path()),
                code::INCOMPLETE_CONF,
            )),
            _ => response.error_for_status("").map(|_| ()),
        }
    }
}

/// Storage over a generic WebDAV server
pub fn connect(options: &BackendOptions, context: &StorageContext) -> StorageResult<Arc<dyn Storage>> {
    let config = DavConfig::from_options(options)?;
    Ok(Arc::new(DavStorage::new(config, Arc::new(UreqClient::new(context.timeout)))))
}

/// Storage over an ownCloud server
pub fn connect_owncloud(options: &BackendOptions, context: &StorageContext) -> StorageResult<Arc<dyn Storage>> {
    let config = DavConfig::owncloud(options)?;
    Ok(Arc::new(DavStorage::new(config, Arc::new(UreqClient::new(context.timeout)))))
}

/// WebDAV backend definition
pub fn definition() -> BackendDefinition {
    BackendDefinition::new(ID, "WebDAV", connect)
        .with_alias("\\OC\\Files\\Storage\\DAV")
        .with_parameter(DefinitionParameter::new("host", "URL"))
        .with_parameter(DefinitionParameter::new("root", "Remote subfolder").optional())
        .with_parameter(DefinitionParameter::new("secure", "Secure https://").boolean().optional())
        .with_auth_schemes(&[scheme::PASSWORD])
        .with_legacy_auth_mechanism(mechanism::PASSWORD)
}

/// ownCloud backend definition
pub fn owncloud_definition() -> BackendDefinition {
    BackendDefinition::new(OWNCLOUD_ID, "ownCloud", connect_owncloud)
        .with_alias("\\OC\\Files\\Storage\\OwnCloud")
        .with_parameter(DefinitionParameter::new("host", "URL"))
        .with_parameter(DefinitionParameter::new("root", "Remote subfolder").optional())
        .with_parameter(DefinitionParameter::new("secure", "Secure https://").boolean().optional())
        .with_auth_schemes(&[scheme::PASSWORD])
        .with_legacy_auth_mechanism(mechanism::PASSWORD)
}

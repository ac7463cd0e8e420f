//! OpenStack Object Storage (Swift).
//!
//! Authenticates against a Keystone v2 identity endpoint, with either a
//! password or a Rackspace API key, and stores objects in one container.
//! The container is created on first use when it does not exist.

use crate::http::{HttpClient, HttpRequest, HttpResponse, UreqClient};
use crate::options;
use chrono::{DateTime, NaiveDateTime};
use extmount_core::definition::auth::scheme;
use extmount_core::storage::error::code;
use extmount_core::storage::object_store::{ObjectClient, ObjectInfo, ObjectListing, ObjectStore};
use extmount_core::storage::{Storage, StorageError, unix_now};
use extmount_core::{BackendDefinition, BackendOptions, DefinitionParameter, StorageContext, StorageResult};
use parking_lot::Mutex;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::{Value, json};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Backend identifier
pub const ID: &str = "swift";

const RACKSPACE_IDENTITY: &str = "https://identity.api.rackspacecloud.com/v2.0";
const MTIME_HEADER: &str = "X-Object-Meta-Mtime";
const PAGE_SIZE: usize = 1000;

const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn encode(value: &str) -> String {
    utf8_percent_encode(value, PATH_SEGMENT).to_string()
}

fn encode_key(key: &str) -> String {
    key.split('/').map(encode).collect::<Vec<_>>().join("/")
}

/// How to authenticate
#[derive(Clone, PartialEq, Eq)]
pub enum SwiftAuth {
    /// Keystone password credentials
    Password {
        /// Password
        password: String,
        /// Tenant (project) name
        tenant: Option<String>,
    },
    /// Rackspace API key
    ApiKey(String),
}

impl std::fmt::Debug for SwiftAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password { tenant, .. } => f
                .debug_struct("Password")
                .field("tenant", tenant)
                .finish_non_exhaustive(),
            Self::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
        }
    }
}

/// Connection settings
#[derive(Debug, Clone)]
pub struct SwiftConfig {
    /// Identity endpoint
    pub auth_url: String,
    /// User name
    pub user: String,
    /// Credentials
    pub auth: SwiftAuth,
    /// Container
    pub container: String,
    /// Region of the object-store endpoint; empty takes the first
    pub region: String,
    /// Service catalog name
    pub service_name: String,
    /// Request timeout override
    pub timeout: Option<Duration>,
}

impl SwiftConfig {
    /// Settings from mount options
    pub fn from_options(options: &BackendOptions) -> StorageResult<Self> {
        let auth = match (options::string(options, "password"), options::string(options, "key")) {
            (Some(password), _) => SwiftAuth::Password {
                password,
                tenant: options::string(options, "tenant"),
            },
            (None, Some(key)) => SwiftAuth::ApiKey(key),
            (None, None) => {
                return Err(StorageError::InvalidConfig(
                    "either a password or an API key is required".into(),
                ));
            }
        };
        let default_service = match auth {
            SwiftAuth::ApiKey(_) => "cloudFiles",
            SwiftAuth::Password { .. } => "swift",
        };
        let timeout = match options::string(options, "timeout") {
            Some(secs) => Some(Duration::from_secs(secs.parse().map_err(|_| {
                StorageError::InvalidConfig(format!("invalid timeout '{secs}'"))
            })?)),
            None => None,
        };
        Ok(Self {
            auth_url: options::string_or(options, "url", RACKSPACE_IDENTITY)
                .trim_end_matches('/')
                .to_string(),
            user: options::required(options, "user")?,
            auth,
            container: options::required(options, "bucket")?,
            region: options::string(options, "region").unwrap_or_default(),
            service_name: options::string_or(options, "service_name", default_service),
            timeout,
        })
    }

    fn token_request(&self) -> Value {
        match &self.auth {
            SwiftAuth::Password { password, tenant } => {
                let mut auth = json!({
                    "passwordCredentials": {"username": self.user, "password": password}
                });
                if let Some(tenant) = tenant {
                    auth["tenantName"] = json!(tenant);
                }
                json!({ "auth": auth })
            }
            SwiftAuth::ApiKey(key) => json!({
                "auth": {"RAX-KSKEY:apiKeyCredentials": {"username": self.user, "apiKey": key}}
            }),
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    token: String,
    endpoint: String,
}

/// Pick the object-store endpoint out of a Keystone v2 token response
fn parse_token_response(body: &Value, service_name: &str, region: &str) -> StorageResult<(String, String)> {
    let access = &body["access"];
    let token = access["token"]["id"]
        .as_str()
        .ok_or_else(|| StorageError::protocol("token missing from identity response"))?;
    let catalog = access["serviceCatalog"]
        .as_array()
        .ok_or_else(|| StorageError::protocol("service catalog missing from identity response"))?;
    let service = catalog
        .iter()
        .find(|s| s["name"] == service_name)
        .or_else(|| catalog.iter().find(|s| s["type"] == "object-store"))
        .ok_or_else(|| {
            StorageError::not_available(
                format!("no object-store service named {service_name}"),
                code::INCOMPLETE_CONF,
            )
        })?;
    let endpoints = service["endpoints"].as_array().map(Vec::as_slice).unwrap_or_default();
    let endpoint = endpoints
        .iter()
        .find(|e| region.is_empty() || e["region"] == region)
        .and_then(|e| e["publicURL"].as_str())
        .ok_or_else(|| {
            StorageError::not_available(
                format!("no object-store endpoint in region '{region}'"),
                code::INCOMPLETE_CONF,
            )
        })?;
    Ok((token.to_string(), endpoint.trim_end_matches('/').to_string()))
}

/// Swift listing timestamps carry no zone and are UTC
fn parse_listing_time(value: &str) -> i64 {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|t| t.and_utc().timestamp())
        .unwrap_or(0)
}

/// [`ObjectClient`] over the Swift API.
pub struct SwiftClient {
    config: SwiftConfig,
    http: Arc<dyn HttpClient>,
    session: Mutex<Option<Session>>,
}

impl std::fmt::Debug for SwiftClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwiftClient")
            .field("container", &self.config.container)
            .field("auth_url", &self.config.auth_url)
            .finish_non_exhaustive()
    }
}

impl SwiftClient {
    /// Client over an HTTP transport; authentication is deferred to first use
    pub fn new(config: SwiftConfig, http: Arc<dyn HttpClient>) -> Self {
        Self {
            config,
            http,
            session: Mutex::new(None),
        }
    }

    fn session(&self) -> StorageResult<Session> {
        let mut slot = self.session.lock();
        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }
        let request = HttpRequest::new("POST", format!("{}/tokens", self.config.auth_url))
            .json(&self.config.token_request());
        let response = self.http.send(request)?;
        if response.status == 401 {
            return Err(StorageError::not_available(
                "identity service rejected the credentials",
                code::UNAUTHORIZED,
            ));
        }
        let body = response.error_for_status("tokens")?.json()?;
        let (token, endpoint) =
            parse_token_response(&body, &self.config.service_name, &self.config.region)?;
        let session = Session { token, endpoint };
        self.ensure_container(&session)?;
        *slot = Some(session.clone());
        Ok(session)
    }

    fn ensure_container(&self, session: &Session) -> StorageResult<()> {
        let url = format!("{}/{}", session.endpoint, encode(&self.config.container));
        let head = self
            .http
            .send(HttpRequest::new("HEAD", url.clone()).header("X-Auth-Token", session.token.clone()))?;
        if head.status == 404 {
            info!(container = %self.config.container, "Creating container");
            self.http
                .send(HttpRequest::new("PUT", url).header("X-Auth-Token", session.token.clone()))?
                .error_for_status(&self.config.container)?;
        } else {
            head.error_for_status(&self.config.container)?;
        }
        Ok(())
    }

    fn container_url(&self, session: &Session) -> String {
        format!("{}/{}", session.endpoint, encode(&self.config.container))
    }

    fn object_request(&self, method: &str, key: &str) -> StorageResult<HttpRequest> {
        let session = self.session()?;
        Ok(HttpRequest::new(
            method,
            format!("{}/{}", self.container_url(&session), encode_key(key)),
        )
        .header("X-Auth-Token", session.token))
    }

    fn send(&self, request: HttpRequest) -> StorageResult<HttpResponse> {
        let response = self.http.send(request)?;
        if response.status == 401 {
            // Token expired; authenticate again on the next call
            self.session.lock().take();
        }
        Ok(response)
    }
}

impl ObjectClient for SwiftClient {
    fn id(&self) -> String {
        format!("swift::{}", self.config.container)
    }

    fn head(&self, key: &str) -> StorageResult<Option<ObjectInfo>> {
        let response = self.send(self.object_request("HEAD", key)?)?;
        if response.status == 404 {
            return Ok(None);
        }
        let response = response.error_for_status(key)?;
        let last_modified = response
            .header(MTIME_HEADER)
            .and_then(|v| v.parse().ok())
            .or_else(|| {
                response
                    .header("Last-Modified")
                    .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
                    .map(|t| t.timestamp())
            })
            .unwrap_or(0);
        Ok(Some(ObjectInfo {
            key: key.to_string(),
            size: response
                .header("Content-Length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            last_modified,
            content_type: response.header("Content-Type").map(ToString::to_string),
        }))
    }

    fn get(&self, key: &str, sink: &mut dyn Write) -> StorageResult<()> {
        self.http
            .execute(self.object_request("GET", key)?, Some(sink))?
            .error_for_status(key)?;
        Ok(())
    }

    fn put(&self, key: &str, data: &[u8], content_type: &str) -> StorageResult<()> {
        let request = self
            .object_request("PUT", key)?
            .header("Content-Type", content_type)
            .header(MTIME_HEADER, unix_now().to_string())
            .body(data.to_vec());
        self.send(request)?.error_for_status(key)?;
        Ok(())
    }

    fn put_file(&self, key: &str, source: &Path, content_type: &str) -> StorageResult<()> {
        let request = self
            .object_request("PUT", key)?
            .header("Content-Type", content_type)
            .header(MTIME_HEADER, unix_now().to_string())
            .file_body(source);
        self.send(request)?.error_for_status(key)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        let response = self.send(self.object_request("DELETE", key)?)?;
        if response.status != 404 {
            response.error_for_status(key)?;
        }
        Ok(())
    }

    fn copy(&self, source: &str, target: &str) -> StorageResult<()> {
        let from = format!("/{}/{}", encode(&self.config.container), encode_key(source));
        let request = self.object_request("PUT", target)?.header("X-Copy-From", from);
        self.send(request)?.error_for_status(source)?;
        Ok(())
    }

    fn touch(&self, key: &str, mtime: i64) -> StorageResult<()> {
        let request = self
            .object_request("POST", key)?
            .header(MTIME_HEADER, mtime.to_string());
        self.send(request)?.error_for_status(key)?;
        Ok(())
    }

    fn list(&self, prefix: &str, delimited: bool) -> StorageResult<ObjectListing> {
        let session = self.session()?;
        let mut listing = ObjectListing::default();
        let mut marker = String::new();
        loop {
            let mut url = format!(
                "{}?format=json&limit={PAGE_SIZE}&prefix={}",
                self.container_url(&session),
                encode(prefix)
            );
            if delimited {
                url.push_str("&delimiter=%2F");
            }
            if !marker.is_empty() {
                url.push_str(&format!("&marker={}", encode(&marker)));
            }
            let request = HttpRequest::new("GET", url).header("X-Auth-Token", session.token.clone());
            let page = self.send(request)?.error_for_status(prefix)?.json()?;
            let entries = page.as_array().map(Vec::as_slice).unwrap_or_default();
            for entry in entries {
                if let Some(subdir) = entry["subdir"].as_str() {
                    listing.common_prefixes.push(subdir.to_string());
                    marker = subdir.to_string();
                } else if let Some(name) = entry["name"].as_str() {
                    listing.objects.push(ObjectInfo {
                        key: name.to_string(),
                        size: entry["bytes"].as_u64().unwrap_or(0),
                        last_modified: entry["last_modified"].as_str().map_or(0, parse_listing_time),
                        content_type: entry["content_type"].as_str().map(ToString::to_string),
                    });
                    marker = name.to_string();
                }
            }
            if entries.len() < PAGE_SIZE {
                break;
            }
        }
        debug!(prefix, objects = listing.objects.len(), "Listed container");
        Ok(listing)
    }

    fn test(&self) -> StorageResult<()> {
        self.session().map(|_| ())
    }
}

/// Storage over a Swift container
pub fn connect(options: &BackendOptions, context: &StorageContext) -> StorageResult<Arc<dyn Storage>> {
    let config = SwiftConfig::from_options(options)?;
    let http = Arc::new(UreqClient::new(config.timeout.unwrap_or(context.timeout)));
    Ok(Arc::new(ObjectStore::new(SwiftClient::new(config, http))))
}

/// Backend definition
pub fn definition() -> BackendDefinition {
    BackendDefinition::new(ID, "OpenStack Object Storage", connect)
        .with_alias("\\OC\\Files\\Storage\\Swift")
        .with_parameter(DefinitionParameter::new("user", "Username"))
        .with_parameter(DefinitionParameter::new("bucket", "Bucket"))
        .with_parameter(DefinitionParameter::new("region", "Region (optional for OpenStack Object Storage)").optional())
        .with_parameter(DefinitionParameter::new("key", "API Key (required for Rackspace Cloud Files)").password().optional())
        .with_parameter(DefinitionParameter::new("tenant", "Tenantname (required for OpenStack Object Storage)").optional())
        .with_parameter(DefinitionParameter::new("password", "Password (required for OpenStack Object Storage)").password().optional())
        .with_parameter(DefinitionParameter::new("service_name", "Service Name (required for OpenStack Object Storage)").optional())
        .with_parameter(DefinitionParameter::new("url", "URL of identity endpoint (required for OpenStack Object Storage)").optional())
        .with_parameter(DefinitionParameter::new("timeout", "Timeout of HTTP requests in seconds").optional())
        .with_auth_schemes(&[scheme::BUILTIN])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RequestBody;
    use crate::http::fake::FakeHttp;
    use extmount_core::storage::FileType;
    use std::collections::BTreeMap;

    fn options(value: Value) -> BackendOptions {
        serde_json::from_value(value).unwrap()
    }

    fn config() -> SwiftConfig {
        SwiftConfig::from_options(&options(json!({
            "user": "demo", "password": "pw", "tenant": "proj", "bucket": "files",
            "region": "RegionOne", "url": "http://keystone:5000/v2.0/"
        })))
        .unwrap()
    }

    fn token_body() -> Value {
        json!({"access": {
            "token": {"id": "tok"},
            "serviceCatalog": [
                {"name": "nova", "type": "compute", "endpoints": []},
                {"name": "swift", "type": "object-store", "endpoints": [
                    {"region": "RegionTwo", "publicURL": "http://two/v1/AUTH_p"},
                    {"region": "RegionOne", "publicURL": "http://one/v1/AUTH_p/"}
                ]}
            ]
        }})
    }

    /// Keystone plus a container that stores objects in memory
    fn server() -> (Arc<Mutex<BTreeMap<String, Vec<u8>>>>, Arc<Mutex<bool>>, FakeHttp) {
        let objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>> = Arc::default();
        let container_exists = Arc::new(Mutex::new(false));
        let (store, exists) = (Arc::clone(&objects), Arc::clone(&container_exists));
        let http = FakeHttp::new(move |req| {
            if req.url == "http://keystone:5000/v2.0/tokens" {
                let body: Value = match &req.body {
                    RequestBody::Bytes(b) => serde_json::from_slice(b).unwrap(),
                    _ => Value::Null,
                };
                if body["auth"]["passwordCredentials"]["password"] != "pw" {
                    return HttpResponse::new(401, "");
                }
                assert_eq!(body["auth"]["tenantName"], "proj");
                return HttpResponse::new(200, token_body().to_string());
            }
            assert_eq!(req.header_value("x-auth-token"), Some("tok"));
            let url = url::Url::parse(&req.url).unwrap();
            let path = url.path().trim_start_matches("/v1/AUTH_p/files");
            let key = percent_encoding::percent_decode_str(path.trim_start_matches('/'))
                .decode_utf8_lossy()
                .into_owned();
            let mut objects = store.lock();
            match (req.method.as_str(), key.is_empty()) {
                ("HEAD", true) => HttpResponse::new(if *exists.lock() { 204 } else { 404 }, ""),
                ("PUT", true) => {
                    *exists.lock() = true;
                    HttpResponse::new(201, "")
                }
                ("GET", true) => {
                    let query: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
                    let prefix = query.get("prefix").cloned().unwrap_or_default();
                    let mut entries = Vec::new();
                    let mut subdirs = Vec::new();
                    for (k, v) in objects.range(prefix.clone()..) {
                        let Some(rest) = k.strip_prefix(&prefix) else { break };
                        match rest.find('/') {
                            Some(i) if query.contains_key("delimiter") => {
                                let sub = format!("{prefix}{}", &rest[..=i]);
                                if !subdirs.contains(&sub) {
                                    subdirs.push(sub.clone());
                                    entries.push(json!({"subdir": sub}));
                                }
                            }
                            _ => entries.push(json!({
                                "name": k, "bytes": v.len(),
                                "last_modified": "2016-03-02T11:20:51.123456"
                            })),
                        }
                    }
                    HttpResponse::new(200, Value::from(entries).to_string())
                }
                ("HEAD", false) => match objects.get(&key) {
                    Some(v) => HttpResponse::new(200, "").with_header("Content-Length", v.len().to_string()),
                    None => HttpResponse::new(404, ""),
                },
                ("GET", false) => match objects.get(&key) {
                    Some(v) => HttpResponse::new(200, v.clone()),
                    None => HttpResponse::new(404, ""),
                },
                ("PUT", false) => {
                    let data = match (req.header_value("x-copy-from"), &req.body) {
                        (Some(src), _) => {
                            let src = percent_encoding::percent_decode_str(src.trim_start_matches("/files/"))
                                .decode_utf8_lossy()
                                .into_owned();
                            objects.get(&src).cloned().unwrap_or_default()
                        }
                        (None, RequestBody::Bytes(b)) => b.clone(),
                        (None, _) => Vec::new(),
                    };
                    objects.insert(key, data);
                    HttpResponse::new(201, "")
                }
                ("DELETE", false) => match objects.remove(&key) {
                    Some(_) => HttpResponse::new(204, ""),
                    None => HttpResponse::new(404, ""),
                },
                ("POST", false) => HttpResponse::new(202, ""),
                _ => HttpResponse::new(405, ""),
            }
        });
        (objects, container_exists, http)
    }

    #[test]
    fn test_options() {
        let cfg = config();
        assert_eq!(cfg.auth_url, "http://keystone:5000/v2.0");
        assert_eq!(cfg.service_name, "swift");
        let rax = SwiftConfig::from_options(&options(json!({"user": "u", "key": "k", "bucket": "b"}))).unwrap();
        assert_eq!(rax.service_name, "cloudFiles");
        assert_eq!(rax.auth_url, RACKSPACE_IDENTITY);
        assert!(SwiftConfig::from_options(&options(json!({"user": "u", "bucket": "b"}))).is_err());
    }

    #[test]
    fn test_catalog_selection() {
        let (token, endpoint) = parse_token_response(&token_body(), "swift", "RegionOne").unwrap();
        assert_eq!(token, "tok");
        assert_eq!(endpoint, "http://one/v1/AUTH_p");
        let (_, first) = parse_token_response(&token_body(), "other", "").unwrap();
        assert_eq!(first, "http://two/v1/AUTH_p");
        assert!(parse_token_response(&token_body(), "swift", "Nowhere").is_err());
    }

    #[test]
    fn test_listing_time() {
        assert_eq!(parse_listing_time("1970-01-02T00:00:00.5"), 86_400);
        assert_eq!(parse_listing_time("garbage"), 0);
    }

    #[test]
    fn test_container_created_and_dirs_emulated() {
        let (objects, exists, http) = server();
        let store = ObjectStore::new(SwiftClient::new(config(), Arc::new(http)));
        store.test().unwrap();
        assert!(*exists.lock());

        store.mkdir("docs").unwrap();
        store.file_put_contents("docs/a.txt", b"hello").unwrap();
        store.mkdir("docs/deep").unwrap();
        store.file_put_contents("docs/deep/b.txt", b"x").unwrap();
        assert_eq!(store.filetype("docs").unwrap(), FileType::Dir);
        assert_eq!(store.opendir("docs").unwrap(), vec!["a.txt", "deep"]);
        assert_eq!(store.file_get_contents("docs/a.txt").unwrap(), b"hello");

        store.copy("docs/a.txt", "copy.txt").unwrap();
        assert_eq!(objects.lock().get("copy.txt").unwrap(), b"hello");

        store.rmdir("docs").unwrap();
        assert_eq!(objects.lock().keys().collect::<Vec<_>>(), vec!["copy.txt"]);
    }

    #[test]
    fn test_rejected_credentials() {
        let (_, _, http) = server();
        let mut cfg = config();
        cfg.auth = SwiftAuth::Password {
            password: "wrong".into(),
            tenant: Some("proj".into()),
        };
        let client = SwiftClient::new(cfg, Arc::new(http));
        assert_eq!(client.test().unwrap_err().code(), code::UNAUTHORIZED);
    }
}

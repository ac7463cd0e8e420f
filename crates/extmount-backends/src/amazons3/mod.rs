//! Amazon S3 and S3-compatible object stores.
//!
//! Requests are signed with SigV4 and sent through an [`HttpClient`];
//! directories are emulated by [`ObjectStore`] with marker objects.

mod sigv4;

pub use sigv4::{Credentials, Signer};

use crate::http::{HttpClient, HttpRequest, HttpResponse, UreqClient};
use crate::options;
use crate::xml;
use chrono::{DateTime, Utc};
use extmount_core::definition::auth::scheme;
use extmount_core::storage::error::code;
use extmount_core::storage::object_store::{ObjectClient, ObjectInfo, ObjectListing, ObjectStore};
use extmount_core::storage::{Storage, StorageError, unix_now};
use extmount_core::{BackendDefinition, BackendOptions, DefinitionParameter, StorageContext, StorageResult};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Backend identifier
pub const ID: &str = "amazons3";

const DEFAULT_HOST: &str = "s3.amazonaws.com";
const DEFAULT_REGION: &str = "eu-west-1";
const MTIME_HEADER: &str = "x-amz-meta-mtime";

/// Connection settings
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Bucket name
    pub bucket: String,
    /// Endpoint host, with port if any
    pub host: String,
    /// Signing region
    pub region: String,
    /// Use HTTPS
    pub use_ssl: bool,
    /// Address the bucket in the path instead of the host name
    pub path_style: bool,
    /// Access keys
    pub credentials: Credentials,
}

impl S3Config {
    /// Settings from mount options
    pub fn from_options(options: &BackendOptions) -> StorageResult<Self> {
        let bucket = options::required(options, "bucket")?;
        let region = options::string_or(options, "region", DEFAULT_REGION);
        let custom_host = options::string(options, "hostname");
        let (mut host, scheme_secure) = match &custom_host {
            Some(h) => options::split_host(h),
            None => (DEFAULT_HOST.to_string(), None),
        };
        if let Some(port) = options::string(options, "port") {
            host = format!("{host}:{port}");
        }
        let use_ssl = options
            .get("use_ssl")
            .map_or(scheme_secure.unwrap_or(true), |_| options::flag(options, "use_ssl"));
        Ok(Self {
            bucket,
            host,
            region,
            use_ssl,
            path_style: options::flag(options, "use_path_style") || custom_host.is_some(),
            credentials: Credentials {
                access_key: options::required(options, "key")?,
                secret_key: options::required(options, "secret")?,
            },
        })
    }

    fn base_url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        if self.path_style {
            format!("{scheme}://{}/{}", self.host, self.bucket)
        } else {
            format!("{scheme}://{}.{}", self.bucket, self.host)
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url(), sigv4::encode_key(key))
    }
}

/// [`ObjectClient`] speaking the S3 REST protocol.
pub struct S3Client {
    config: S3Config,
    signer: Signer,
    http: Arc<dyn HttpClient>,
}

impl std::fmt::Debug for S3Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Client")
            .field("bucket", &self.config.bucket)
            .field("host", &self.config.host)
            .finish_non_exhaustive()
    }
}

impl S3Client {
    /// Client over an HTTP transport
    pub fn new(config: S3Config, http: Arc<dyn HttpClient>) -> Self {
        let signer = Signer::new(config.credentials.clone(), config.region.clone());
        Self {
            config,
            signer,
            http,
        }
    }

    fn signed(&self, mut request: HttpRequest, payload: &str) -> StorageResult<HttpRequest> {
        self.signer.sign(&mut request, payload, Utc::now())?;
        Ok(request)
    }

    fn send(&self, request: HttpRequest, payload: &str) -> StorageResult<HttpResponse> {
        self.http.send(self.signed(request, payload)?)
    }

    fn copy_source(&self, key: &str) -> String {
        format!("/{}/{}", self.config.bucket, sigv4::encode_key(key))
    }

    fn list_page(
        &self,
        prefix: &str,
        delimited: bool,
        token: Option<&str>,
        listing: &mut ObjectListing,
    ) -> StorageResult<Option<String>> {
        let mut url = format!(
            "{}/?list-type=2&prefix={}",
            self.config.base_url(),
            sigv4::uri_encode(prefix)
        );
        if delimited {
            url.push_str("&delimiter=%2F");
        }
        if let Some(token) = token {
            url.push_str(&format!("&continuation-token={}", sigv4::uri_encode(token)));
        }
        let response = self
            .send(HttpRequest::new("GET", url), sigv4::EMPTY_PAYLOAD_SHA256)?
            .error_for_status(prefix)?;
        parse_list_page(&response.text(), listing)
    }
}

/// Fold one `ListObjectsV2` page into `listing`, returning the next token
fn parse_list_page(body: &str, listing: &mut ObjectListing) -> StorageResult<Option<String>> {
    let root = xml::parse(body)?;
    for contents in root.children_named("Contents") {
        let Some(key) = contents.child_text("Key") else {
            continue;
        };
        listing.objects.push(ObjectInfo {
            key: key.to_string(),
            size: contents
                .child_text("Size")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            last_modified: contents
                .child_text("LastModified")
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map_or(0, |t| t.timestamp()),
            content_type: None,
        });
    }
    for common in root.children_named("CommonPrefixes") {
        if let Some(prefix) = common.child_text("Prefix") {
            listing.common_prefixes.push(prefix.to_string());
        }
    }
    let truncated = root.child_text("IsTruncated") == Some("true");
    Ok(if truncated {
        root.child_text("NextContinuationToken").map(ToString::to_string)
    } else {
        None
    })
}

fn info_from_head(key: &str, response: &HttpResponse) -> ObjectInfo {
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
    ObjectInfo {
        key: key.to_string(),
        size: response
            .header("Content-Length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        last_modified,
        content_type: response.header("Content-Type").map(ToString::to_string),
    }
}

impl ObjectClient for S3Client {
    fn id(&self) -> String {
        format!("amazon::{}", self.config.bucket)
    }

    fn head(&self, key: &str) -> StorageResult<Option<ObjectInfo>> {
        let response = self.send(
            HttpRequest::new("HEAD", self.config.object_url(key)),
            sigv4::EMPTY_PAYLOAD_SHA256,
        )?;
        if response.status == 404 {
            return Ok(None);
        }
        let response = response.error_for_status(key)?;
        Ok(Some(info_from_head(key, &response)))
    }

    fn get(&self, key: &str, sink: &mut dyn Write) -> StorageResult<()> {
        let request = self.signed(
            HttpRequest::new("GET", self.config.object_url(key)),
            sigv4::EMPTY_PAYLOAD_SHA256,
        )?;
        self.http.execute(request, Some(sink))?.error_for_status(key)?;
        Ok(())
    }

    fn put(&self, key: &str, data: &[u8], content_type: &str) -> StorageResult<()> {
        let request = HttpRequest::new("PUT", self.config.object_url(key))
            .header("Content-Type", content_type)
            .header(MTIME_HEADER, unix_now().to_string())
            .body(data.to_vec());
        self.send(request, &sigv4::payload_hash(data))?
            .error_for_status(key)?;
        Ok(())
    }

    fn put_file(&self, key: &str, source: &Path, content_type: &str) -> StorageResult<()> {
        let request = HttpRequest::new("PUT", self.config.object_url(key))
            .header("Content-Type", content_type)
            .header(MTIME_HEADER, unix_now().to_string())
            .file_body(source);
        self.send(request, sigv4::UNSIGNED_PAYLOAD)?
            .error_for_status(key)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        let response = self.send(
            HttpRequest::new("DELETE", self.config.object_url(key)),
            sigv4::EMPTY_PAYLOAD_SHA256,
        )?;
        if response.status == 404 {
            return Ok(());
        }
        response.error_for_status(key)?;
        Ok(())
    }

    fn copy(&self, source: &str, target: &str) -> StorageResult<()> {
        let request = HttpRequest::new("PUT", self.config.object_url(target))
            .header("x-amz-copy-source", self.copy_source(source));
        self.send(request, sigv4::EMPTY_PAYLOAD_SHA256)?
            .error_for_status(source)?;
        Ok(())
    }

    fn touch(&self, key: &str, mtime: i64) -> StorageResult<()> {
        let info = self
            .head(key)?
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        let request = HttpRequest::new("PUT", self.config.object_url(key))
            .header("x-amz-copy-source", self.copy_source(key))
            .header("x-amz-metadata-directive", "REPLACE")
            .header(
                "Content-Type",
                info.content_type
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
            )
            .header(MTIME_HEADER, mtime.to_string());
        self.send(request, sigv4::EMPTY_PAYLOAD_SHA256)?
            .error_for_status(key)?;
        Ok(())
    }

    fn list(&self, prefix: &str, delimited: bool) -> StorageResult<ObjectListing> {
        let mut listing = ObjectListing::default();
        let mut token = None;
        loop {
            token = self.list_page(prefix, delimited, token.as_deref(), &mut listing)?;
            if token.is_none() {
                break;
            }
        }
        debug!(prefix, objects = listing.objects.len(), "Listed bucket");
        Ok(listing)
    }

    fn test(&self) -> StorageResult<()> {
        let response = self.send(
            HttpRequest::new("HEAD", format!("{}/", self.config.base_url())),
            sigv4::EMPTY_PAYLOAD_SHA256,
        )?;
        match response.status {
            200..=299 => Ok(()),
            404 => Err(StorageError::not_available(
                format!("bucket {} does not exist", self.config.bucket),
                code::INCOMPLETE_CONF,
            )),
            403 | 401 => Err(StorageError::not_available(
                "access to the bucket was denied",
                code::UNAUTHORIZED,
            )),
            status => Err(StorageError::not_available(
                format!("bucket check returned {status}"),
                code::ERROR,
            )),
        }
    }
}

/// Storage over an S3 bucket
pub fn connect(options: &BackendOptions, context: &StorageContext) -> StorageResult<Arc<dyn Storage>> {
    let config = S3Config::from_options(options)?;
    let http = Arc::new(UreqClient::new(context.timeout));
    Ok(Arc::new(ObjectStore::new(S3Client::new(config, http))))
}

/// Backend definition
pub fn definition() -> BackendDefinition {
    BackendDefinition::new(ID, "Amazon S3", connect)
        .with_alias("\\OC\\Files\\Storage\\AmazonS3")
        .with_parameter(DefinitionParameter::new("key", "Access Key"))
        .with_parameter(DefinitionParameter::new("secret", "Secret Key").password())
        .with_parameter(DefinitionParameter::new("bucket", "Bucket"))
        .with_parameter(DefinitionParameter::new("hostname", "Hostname").optional())
        .with_parameter(DefinitionParameter::new("port", "Port").optional())
        .with_parameter(DefinitionParameter::new("region", "Region").optional())
        .with_parameter(DefinitionParameter::new("use_ssl", "Enable SSL").boolean().optional())
        .with_parameter(
            DefinitionParameter::new("use_path_style", "Enable Path Style")
                .boolean()
                .optional(),
        )
        .with_auth_schemes(&[scheme::BUILTIN])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::fake::FakeHttp;
    use extmount_core::storage::FileType;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn options(value: serde_json::Value) -> BackendOptions {
        serde_json::from_value(value).unwrap()
    }

    fn config() -> S3Config {
        S3Config::from_options(&options(json!({
            "key": "AK", "secret": "SK", "bucket": "b", "hostname": "http://minio:9000"
        })))
        .unwrap()
    }

    /// Tiny bucket: PUT/GET/HEAD/DELETE on keys, list-type=2 listings
    fn bucket_server() -> (Arc<Mutex<BTreeMap<String, Vec<u8>>>>, FakeHttp) {
        let objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>> = Arc::default();
        let store = Arc::clone(&objects);
        let http = FakeHttp::new(move |req| {
            assert!(req.header_value("authorization").is_some());
            let url = url::Url::parse(&req.url).unwrap();
            let path = url.path();
            let path = path.strip_prefix("/b").unwrap_or(path).trim_start_matches('/');
            let key = percent_encoding::percent_decode_str(path)
                .decode_utf8_lossy()
                .into_owned();
            let mut objects = store.lock();
            if let Some(query) = url.query().filter(|q| q.contains("list-type=2")) {
                let prefix = url::form_urlencoded::parse(query.as_bytes())
                    .find(|(k, _)| k == "prefix")
                    .map(|(_, v)| v.into_owned())
                    .unwrap_or_default();
                let delimited = query.contains("delimiter");
                let mut body = String::from("<ListBucketResult>");
                let mut prefixes = Vec::new();
                for (k, v) in objects.range(prefix.clone()..) {
                    let Some(rest) = k.strip_prefix(&prefix) else { break };
                    match rest.find('/') {
                        Some(i) if delimited => {
                            let p = format!("{prefix}{}", &rest[..=i]);
                            if !prefixes.contains(&p) {
                                prefixes.push(p);
                            }
                        }
                        _ => body.push_str(&format!(
                            "<Contents><Key>{}</Key><Size>{}</Size><LastModified>2024-01-02T03:04:05.000Z</LastModified></Contents>",
                            xml::escape(k),
                            v.len()
                        )),
                    }
                }
                for p in prefixes {
                    body.push_str(&format!("<CommonPrefixes><Prefix>{p}</Prefix></CommonPrefixes>"));
                }
                body.push_str("<IsTruncated>false</IsTruncated></ListBucketResult>");
                return HttpResponse::new(200, body);
            }
            match req.method.as_str() {
                "HEAD" if key.is_empty() => HttpResponse::new(200, ""),
                "HEAD" => match objects.get(&key) {
                    Some(v) => HttpResponse::new(200, "")
                        .with_header("Content-Length", v.len().to_string())
                        .with_header("x-amz-meta-mtime", "1700000000"),
                    None => HttpResponse::new(404, ""),
                },
                "GET" => match objects.get(&key) {
                    Some(v) => HttpResponse::new(200, v.clone()),
                    None => HttpResponse::new(404, "<Error><Code>NoSuchKey</Code></Error>"),
                },
                "PUT" => {
                    let body = match &req.body {
                        crate::http::RequestBody::Bytes(b) => b.clone(),
                        _ => Vec::new(),
                    };
                    let data = match req.header_value("x-amz-copy-source") {
                        Some(src) => {
                            let src = src.trim_start_matches("/b/");
                            let src = percent_encoding::percent_decode_str(src).decode_utf8_lossy();
                            match objects.get(src.as_ref()) {
                                Some(v) => v.clone(),
                                None => return HttpResponse::new(404, ""),
                            }
                        }
                        None => body,
                    };
                    objects.insert(key, data);
                    HttpResponse::new(200, "")
                }
                "DELETE" => {
                    objects.remove(&key);
                    HttpResponse::new(204, "")
                }
                _ => HttpResponse::new(405, ""),
            }
        });
        (objects, http)
    }

    #[test]
    fn test_options() {
        let cfg = config();
        assert!(cfg.path_style);
        assert!(!cfg.use_ssl);
        assert_eq!(cfg.object_url("a b/c"), "http://minio:9000/b/a%20b/c");

        let aws = S3Config::from_options(&options(json!({"key": "k", "secret": "s", "bucket": "photos"})))
            .unwrap();
        assert_eq!(aws.object_url("x"), "https://photos.s3.amazonaws.com/x");
        assert_eq!(aws.region, "eu-west-1");

        assert!(S3Config::from_options(&options(json!({"key": "k", "bucket": "b"}))).is_err());
    }

    #[test]
    fn test_list_page_parsing() {
        let body = r"<ListBucketResult>
            <Contents><Key>a/x.txt</Key><Size>3</Size><LastModified>2009-10-12T17:50:30.000Z</LastModified></Contents>
            <CommonPrefixes><Prefix>a/sub/</Prefix></CommonPrefixes>
            <IsTruncated>true</IsTruncated><NextContinuationToken>tok</NextContinuationToken>
        </ListBucketResult>";
        let mut listing = ObjectListing::default();
        let token = parse_list_page(body, &mut listing).unwrap();
        assert_eq!(token.as_deref(), Some("tok"));
        assert_eq!(listing.objects[0].key, "a/x.txt");
        assert_eq!(listing.objects[0].size, 3);
        assert_eq!(listing.objects[0].last_modified, 1_255_369_830);
        assert_eq!(listing.common_prefixes, vec!["a/sub/"]);
    }

    #[test]
    fn test_directory_emulation_over_http() {
        let (objects, http) = bucket_server();
        let store = ObjectStore::new(S3Client::new(config(), Arc::new(http)));

        store.mkdir("foo").unwrap();
        assert_eq!(store.filetype("foo").unwrap(), FileType::Dir);
        assert!(objects.lock().contains_key("foo/"));

        store.file_put_contents("foo/a.txt", b"alpha").unwrap();
        store.mkdir("foo/sub").unwrap();
        store.file_put_contents("foo/sub/b.txt", b"beta").unwrap();
        assert_eq!(store.opendir("foo").unwrap(), vec!["a.txt", "sub"]);
        assert_eq!(store.file_get_contents("foo/sub/b.txt").unwrap(), b"beta");
        assert_eq!(store.stat("foo/a.txt").unwrap().mtime, 1_700_000_000);

        store.rename("foo/a.txt", "foo/c.txt").unwrap();
        assert!(!store.file_exists("foo/a.txt").unwrap());

        store.rmdir("foo").unwrap();
        assert!(objects.lock().is_empty());
        assert!(!store.file_exists("foo").unwrap());
    }

    #[test]
    fn test_bucket_test_status() {
        let http = FakeHttp::new(|_| HttpResponse::new(404, ""));
        let client = S3Client::new(config(), Arc::new(http));
        let err = client.test().unwrap_err();
        assert_eq!(err.code(), code::INCOMPLETE_CONF);
    }

    #[test]
    fn test_definition() {
        let def = definition();
        assert_eq!(def.id(), ID);
        assert!(def.identifier().matches("\\OC\\Files\\Storage\\AmazonS3"));
        let opts = options(json!({"key": "k", "secret": "s"}));
        assert_eq!(def.validate_options(&opts), Err("bucket".to_string()));
    }
}

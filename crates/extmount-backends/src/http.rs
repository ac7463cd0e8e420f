//! Blocking HTTP plumbing shared by the REST and WebDAV backends.
//!
//! Backends build [`HttpRequest`]s and hand them to an [`HttpClient`]. The
//! production client is [`UreqClient`]; tests substitute an in-process
//! handler so protocol logic runs without a server.

use extmount_core::storage::error::code;
use extmount_core::storage::StorageError;
use extmount_core::StorageResult;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::trace;

/// Request body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestBody {
    /// No body
    #[default]
    Empty,
    /// In-memory body
    Bytes(Vec<u8>),
    /// Body streamed from a local file
    File(PathBuf),
}

/// An outgoing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method, including WebDAV extensions such as `PROPFIND`
    pub method: String,
    /// Absolute URL
    pub url: String,
    /// Header pairs in send order
    pub headers: Vec<(String, String)>,
    /// Body
    pub body: RequestBody,
}

impl HttpRequest {
    /// Request without headers or body
    pub fn new(method: &str, url: impl Into<String>) -> Self {
        Self {
            method: method.to_string(),
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Set an in-memory body
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = RequestBody::Bytes(body.into());
        self
    }

    /// Stream the body from a file
    #[must_use]
    pub fn file_body(mut self, path: impl Into<PathBuf>) -> Self {
        self.body = RequestBody::File(path.into());
        self
    }

    /// JSON body with the matching content type
    #[must_use]
    pub fn json(self, value: &serde_json::Value) -> Self {
        self.header("Content-Type", "application/json")
            .body(value.to_string())
    }

    /// First header value with this name, case-insensitively
    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A received response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Header pairs
    pub headers: Vec<(String, String)>,
    /// Body; empty when it was streamed into a sink
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Response with a status and body
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header value with this name, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Body as UTF-8, lossily
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body parsed as JSON
    pub fn json(&self) -> StorageResult<serde_json::Value> {
        serde_json::from_slice(&self.body)
            .map_err(|e| StorageError::protocol(format!("invalid JSON response: {e}")))
    }

    /// Turn a non-2xx status into the matching error
    pub fn error_for_status(self, path: &str) -> StorageResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(status_error(self.status, path, &self.text()))
        }
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Map an HTTP status to a storage error
pub fn status_error(status: u16, path: &str, body: &str) -> StorageError {
    match status {
        401 => StorageError::Unauthorized(format!("{path}: {}", snippet(body))),
        403 => StorageError::PermissionDenied(path.to_string()),
        404 => StorageError::NotFound(path.to_string()),
        405 | 412 => StorageError::AlreadyExists(path.to_string()),
        409 => StorageError::NotFound(format!("parent of {path}")),
        423 => StorageError::PermissionDenied(format!("{path} is locked")),
        503 | 502 | 504 => StorageError::not_available(
            format!("remote returned {status}"),
            code::NETWORK_ERROR,
        ),
        _ => StorageError::protocol(format!("unexpected status {status} for {path}: {}", snippet(body))),
    }
}

fn snippet(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(200)
        .map_or(body.len(), |(idx, _)| idx);
    body[..end].trim()
}

/// Transport for [`HttpRequest`]s.
pub trait HttpClient: Send + Sync {
    /// Perform the request.
    ///
    /// With a `sink`, a 2xx body is streamed into it and the returned body is
    /// empty; error bodies are always buffered.
    fn execute(&self, request: HttpRequest, sink: Option<&mut dyn Write>) -> StorageResult<HttpResponse>;

    /// Perform the request, buffering the body
    fn send(&self, request: HttpRequest) -> StorageResult<HttpResponse> {
        self.execute(request, None)
    }
}

/// [`HttpClient`] over a `ureq` agent.
pub struct UreqClient {
    agent: ureq::Agent,
    timeout: Duration,
}

impl std::fmt::Debug for UreqClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UreqClient")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl UreqClient {
    /// Client whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .allow_non_standard_methods(true)
            .build()
            .into();
        Self { agent, timeout }
    }

    fn map_error(&self, err: ureq::Error) -> StorageError {
        match err {
            ureq::Error::Timeout(_) => StorageError::Timeout(self.timeout),
            ureq::Error::Io(e) => StorageError::not_available(e.to_string(), code::NETWORK_ERROR),
            other => StorageError::not_available(other.to_string(), code::NETWORK_ERROR),
        }
    }
}

impl HttpClient for UreqClient {
    fn execute(&self, request: HttpRequest, sink: Option<&mut dyn Write>) -> StorageResult<HttpResponse> {
        trace!(method = %request.method, url = %request.url, "HTTP request");
        let mut builder = ureq::http::Request::builder()
            .method(request.method.as_str())
            .uri(request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let invalid = |e: ureq::http::Error| StorageError::InvalidConfig(format!("invalid request: {e}"));

        let result = match request.body {
            RequestBody::Empty => self.agent.run(builder.body(Vec::<u8>::new()).map_err(invalid)?),
            RequestBody::Bytes(bytes) => self.agent.run(builder.body(bytes).map_err(invalid)?),
            RequestBody::File(path) => {
                let mut file = File::open(&path)?;
                let body = ureq::SendBody::from_reader(&mut file);
                self.agent.run(builder.body(body).map_err(invalid)?)
            }
        };
        let mut response = result.map_err(|e| self.map_error(e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let mut body = Vec::new();
        let mut reader = response.body_mut().as_reader();
        match sink {
            Some(sink) if (200..300).contains(&status) => {
                io::copy(&mut reader, sink)?;
            }
            _ => {
                io::copy(&mut reader, &mut body)?;
            }
        }
        trace!(status, "HTTP response");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

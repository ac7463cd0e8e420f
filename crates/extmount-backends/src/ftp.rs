//! FTP servers, through a small passive-mode client.
//!
//! The client speaks plain FTP on one control connection and opens a data
//! connection per transfer. Entry metadata comes from the parent's `LIST`
//! output, so both Unix and DOS style listings are understood.

use crate::options;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Utc};
use extmount_core::definition::auth::{mechanism, scheme};
use extmount_core::storage::error::code;
use extmount_core::storage::stream_wrapper::{LazyConnection, StreamBackend, StreamWrapper, UrlStat, UrlTransport};
use extmount_core::storage::{FileType, Storage, StorageError};
use extmount_core::{BackendDefinition, BackendOptions, DefinitionParameter, StorageContext, StorageResult};
use parking_lot::Mutex;
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use regex::Regex;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, trace};

/// Backend identifier
pub const ID: &str = "ftp";

const DEFAULT_PORT: u16 = 21;

const PATH_ESCAPE: &AsciiSet = &CONTROLS.add(b' ').add(b'%').add(b'#').add(b'?');

static UNIX_LIST: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^([\-dlcbps])\S{9}\S*\s+\d+\s+\S+\s+\S+\s+(\d+)\s+(\w{3})\s+(\d{1,2})\s+(\d{1,2}:\d{2}|\d{4})\s+(.+)$",
    )
    .ok()
});

static DOS_LIST: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(\d{2})-(\d{2})-(\d{2,4})\s+(\d{1,2}):(\d{2})(AM|PM)\s+(<DIR>|\d+)\s+(.+)$").ok()
});

/// One line of a `LIST` response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Entry name
    pub name: String,
    /// Metadata
    pub stat: UrlStat,
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lower = name.to_ascii_lowercase();
    MONTHS.iter().position(|m| *m == lower).map(|i| i as u32 + 1)
}

/// Parse one `LIST` line; `now` resolves the year of recent Unix entries
pub fn parse_list_line(line: &str, now: NaiveDateTime) -> Option<ListEntry> {
    if let Some(caps) = UNIX_LIST.as_ref().and_then(|re| re.captures(line)) {
        let kind = if &caps[1] == "d" { FileType::Dir } else { FileType::File };
        let size = caps[2].parse().unwrap_or(0);
        let month = month_number(&caps[3])?;
        let day: u32 = caps[4].parse().ok()?;
        let (year, hour, minute) = match caps[5].split_once(':') {
            Some((h, m)) => {
                // Recent entries omit the year; a date ahead of now belongs to last year
                let mut year = now.year();
                if NaiveDate::from_ymd_opt(year, month, day).is_some_and(|d| d > now.date()) {
                    year -= 1;
                }
                (year, h.parse().ok()?, m.parse().ok()?)
            }
            None => (caps[5].parse().ok()?, 0, 0),
        };
        let mtime = NaiveDate::from_ymd_opt(year, month, day)?
            .and_hms_opt(hour, minute, 0)?
            .and_utc()
            .timestamp();
        let mut name = caps[6].to_string();
        if &caps[1] == "l"
            && let Some((link, _)) = name.split_once(" -> ")
        {
            name = link.to_string();
        }
        return Some(ListEntry { name, stat: UrlStat { kind, size, mtime } });
    }
    if let Some(caps) = DOS_LIST.as_ref().and_then(|re| re.captures(line)) {
        let month: u32 = caps[1].parse().ok()?;
        let day: u32 = caps[2].parse().ok()?;
        let mut year: i32 = caps[3].parse().ok()?;
        if year < 100 {
            year += if year < 70 { 2000 } else { 1900 };
        }
        let mut hour: u32 = caps[4].parse().ok()?;
        let minute: u32 = caps[5].parse().ok()?;
        match (&caps[6], hour) {
            ("PM", h) if h < 12 => hour += 12,
            ("AM", 12) => hour = 0,
            _ => {}
        }
        let (kind, size) = match &caps[7] {
            "<DIR>" => (FileType::Dir, 0),
            size => (FileType::File, size.parse().unwrap_or(0)),
        };
        let mtime = NaiveDate::from_ymd_opt(year, month, day)?
            .and_hms_opt(hour, minute, 0)?
            .and_utc()
            .timestamp();
        return Some(ListEntry {
            name: caps[8].to_string(),
            stat: UrlStat { kind, size, mtime },
        });
    }
    None
}

/// Read one reply, following multi-line `123-` continuations
pub fn read_reply<R: BufRead>(reader: &mut R) -> StorageResult<(u16, String)> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(StorageError::not_available("FTP server closed the connection", code::NETWORK_ERROR));
    }
    let code: u16 = line
        .get(..3)
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| StorageError::protocol(format!("malformed FTP reply: {}", line.trim_end())))?;
    let mut text = line[3..].trim_start_matches([' ', '-']).trim_end().to_string();
    if line.as_bytes().get(3) == Some(&b'-') {
        let terminator = format!("{code} ");
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Err(StorageError::protocol("truncated multi-line FTP reply"));
            }
            text.push('\n');
            text.push_str(line.trim_end());
            if line.starts_with(&terminator) {
                break;
            }
        }
    }
    trace!(code, text = %text, "FTP reply");
    Ok((code, text))
}

/// Data address from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply
pub fn parse_pasv(text: &str) -> StorageResult<SocketAddr> {
    let start = text.find('(').map_or(0, |i| i + 1);
    let end = text[start..].find(')').map_or(text.len(), |i| start + i);
    let numbers: Vec<u8> = text[start..end]
        .split(',')
        .map(|n| n.trim().parse())
        .collect::<Result<_, _>>()
        .map_err(|_| StorageError::protocol(format!("malformed PASV reply: {text}")))?;
    let [a, b, c, d, p1, p2] = numbers[..] else {
        return Err(StorageError::protocol(format!("malformed PASV reply: {text}")));
    };
    Ok(SocketAddr::new(
        IpAddr::V4(Ipv4Addr::new(a, b, c, d)),
        (u16::from(p1) << 8) | u16::from(p2),
    ))
}

fn reply_error(status: u16, text: &str, path: &str) -> StorageError {
    match status {
        530 => StorageError::not_available(format!("FTP login failed: {text}"), code::UNAUTHORIZED),
        550 if text.to_lowercase().contains("permission") => StorageError::PermissionDenied(path.to_string()),
        550 => StorageError::NotFound(path.to_string()),
        553 => StorageError::PermissionDenied(path.to_string()),
        421 | 425 | 426 => StorageError::not_available(format!("FTP: {text}"), code::NETWORK_ERROR),
        _ => StorageError::protocol(format!("FTP {status} for {path}: {text}")),
    }
}

/// Connection settings
#[derive(Clone)]
pub struct FtpConfig {
    /// Host name
    pub host: String,
    /// Control port
    pub port: u16,
    /// Login name
    pub user: String,
    /// Password
    pub password: String,
    /// Remote directory used as the storage root
    pub root: String,
    /// Per-operation timeout
    pub timeout: Duration,
}

impl std::fmt::Debug for FtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl FtpConfig {
    /// Settings from mount options
    pub fn from_options(options: &BackendOptions, timeout: Duration) -> StorageResult<Self> {
        if options::flag(options, "secure") {
            return Err(StorageError::NotSupported("FTP over TLS".into()));
        }
        let (host, _) = options::split_host(&options::required(options, "host")?);
        let (host, port) = match host.rsplit_once(':') {
            Some((h, p)) if p.chars().all(|c| c.is_ascii_digit()) => (
                h.to_string(),
                p.parse().map_err(|_| StorageError::InvalidConfig(format!("invalid port '{p}'")))?,
            ),
            _ => (host, options::port(options, "port", DEFAULT_PORT)?),
        };
        Ok(Self {
            host,
            port,
            user: options::string(options, "user").unwrap_or_else(|| "anonymous".into()),
            password: options::string(options, "password").unwrap_or_default(),
            root: options::root(options, "root"),
            timeout,
        })
    }
}

struct Control {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Control {
    fn command(&mut self, command: &str) -> StorageResult<(u16, String)> {
        // A line break would end the command early and start another one
        if command.contains(['\r', '\n', '\0']) {
            return Err(StorageError::PermissionDenied(
                "FTP command contains a line break or NUL".into(),
            ));
        }
        let shown = if command.starts_with("PASS ") { "PASS ****" } else { command };
        trace!(command = shown, "FTP command");
        self.writer.write_all(command.as_bytes())?;
        self.writer.write_all(b"\r\n")?;
        read_reply(&mut self.reader)
    }

    fn expect(&mut self, command: &str, ok: &[u16], path: &str) -> StorageResult<String> {
        let (code, text) = self.command(command)?;
        if ok.contains(&code) {
            Ok(text)
        } else {
            Err(reply_error(code, &text, path))
        }
    }
}

/// Logged-in control connection.
pub struct FtpClient {
    control: Mutex<Control>,
    peer: IpAddr,
    timeout: Duration,
}

impl std::fmt::Debug for FtpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpClient").field("peer", &self.peer).finish_non_exhaustive()
    }
}

impl FtpClient {
    /// Connect and log in
    pub fn connect(config: &FtpConfig) -> StorageResult<Self> {
        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| StorageError::not_available(format!("cannot resolve {}: {e}", config.host), code::NETWORK_ERROR))?
            .next()
            .ok_or_else(|| StorageError::not_available(format!("no address for {}", config.host), code::NETWORK_ERROR))?;
        let stream = TcpStream::connect_timeout(&addr, config.timeout).map_err(|e| match e.kind() {
            io::ErrorKind::TimedOut => StorageError::Timeout(config.timeout),
            _ => StorageError::not_available(format!("cannot connect to {addr}: {e}"), code::NETWORK_ERROR),
        })?;
        stream.set_read_timeout(Some(config.timeout))?;
        stream.set_write_timeout(Some(config.timeout))?;
        let mut control = Control {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
        };

        let (greeting, text) = read_reply(&mut control.reader)?;
        if greeting != 220 {
            return Err(reply_error(greeting, &text, "/"));
        }
        match control.command(&format!("USER {}", config.user))? {
            (230, _) => {}
            (331 | 332, _) => {
                control.expect(&format!("PASS {}", config.password), &[230, 202], "/")?;
            }
            (code, text) => return Err(reply_error(code, &text, "/")),
        }
        control.expect("TYPE I", &[200], "/")?;
        debug!(host = %config.host, user = %config.user, "FTP session established");
        Ok(Self {
            control: Mutex::new(control),
            peer: addr.ip(),
            timeout: config.timeout,
        })
    }

    /// Run a command and require one of the `ok` codes
    pub fn simple(&self, command: &str, ok: &[u16], path: &str) -> StorageResult<String> {
        self.control.lock().expect(command, ok, path)
    }

    /// Run a transfer command over a passive data connection
    fn transfer<F>(&self, command: &str, path: &str, mut io: F) -> StorageResult<()>
    where
        F: FnMut(&mut TcpStream) -> io::Result<()>,
    {
        let mut control = self.control.lock();
        let pasv = control.expect("PASV", &[227], path)?;
        // Servers behind NAT often advertise a private address; reuse the control peer
        let port = parse_pasv(&pasv)?.port();
        let mut data = TcpStream::connect_timeout(&SocketAddr::new(self.peer, port), self.timeout)?;
        data.set_read_timeout(Some(self.timeout))?;
        data.set_write_timeout(Some(self.timeout))?;

        let (code, text) = control.command(command)?;
        if code != 150 && code != 125 {
            return Err(reply_error(code, &text, path));
        }
        io(&mut data)?;
        drop(data);
        let (code, text) = read_reply(&mut control.reader)?;
        if code != 226 && code != 250 {
            return Err(reply_error(code, &text, path));
        }
        Ok(())
    }

    /// Raw `LIST` lines for a directory
    pub fn list(&self, path: &str) -> StorageResult<Vec<String>> {
        let mut raw = Vec::new();
        self.transfer(&format!("LIST {path}"), path, |data| {
            data.read_to_end(&mut raw).map(|_| ())
        })?;
        Ok(String::from_utf8_lossy(&raw)
            .lines()
            .map(str::to_string)
            .filter(|l| !l.is_empty() && !l.starts_with("total "))
            .collect())
    }

    /// Download a file into `sink`
    pub fn retrieve(&self, path: &str, sink: &mut dyn Write) -> StorageResult<()> {
        self.transfer(&format!("RETR {path}"), path, |data| io::copy(data, &mut *sink).map(|_| ()))
    }

    /// Upload a local file
    pub fn store(&self, path: &str, source: &Path) -> StorageResult<()> {
        let mut file = std::fs::File::open(source)?;
        self.transfer(&format!("STOR {path}"), path, |data| io::copy(&mut file, data).map(|_| ()))
    }

    /// Log out, ignoring failures
    pub fn quit(&self) {
        let _ = self.control.lock().command("QUIT");
    }
}

impl Drop for FtpClient {
    fn drop(&mut self) {
        self.quit();
    }
}

/// Remote path addressed by an `ftp://` URL
/// Decoded server path of an `ftp://` URL; line breaks and NUL are refused
fn url_path(url: &str) -> StorageResult<String> {
    let rest = url.strip_prefix("ftp://").unwrap_or(url);
    let path = rest.find('/').map_or("/", |i| &rest[i..]);
    let path = percent_decode_str(path).decode_utf8_lossy().into_owned();
    if path.contains(['\r', '\n', '\0']) {
        return Err(StorageError::PermissionDenied(format!(
            "FTP path contains a line break or NUL: {path:?}"
        )));
    }
    Ok(path)
}

fn split_parent(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(i) => (&trimmed[..i], &trimmed[i + 1..]),
        None => ("/", trimmed),
    }
}

/// [`UrlTransport`] over an [`FtpClient`]
#[derive(Debug)]
pub struct FtpTransport {
    client: FtpClient,
}

impl UrlTransport for FtpTransport {
    fn stat(&self, url: &str) -> StorageResult<Option<UrlStat>> {
        let path = url_path(url)?;
        if path.trim_end_matches('/').is_empty() {
            return Ok(Some(UrlStat { kind: FileType::Dir, size: 0, mtime: Utc::now().timestamp() }));
        }
        let (parent, name) = split_parent(&path);
        let lines = match self.client.list(parent) {
            Ok(lines) => lines,
            Err(StorageError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let now = Utc::now().naive_utc();
        Ok(lines
            .iter()
            .filter_map(|l| parse_list_line(l, now))
            .find(|e| e.name == name)
            .map(|e| e.stat))
    }

    fn list(&self, url: &str) -> StorageResult<Vec<String>> {
        let now = Utc::now().naive_utc();
        Ok(self
            .client
            .list(&url_path(url)?)?
            .iter()
            .filter_map(|l| parse_list_line(l, now))
            .map(|e| e.name)
            .collect())
    }

    fn mkdir(&self, url: &str) -> StorageResult<()> {
        let path = url_path(url)?;
        self.client.simple(&format!("MKD {path}"), &[257, 250], &path).map(|_| ())
    }

    fn rmdir(&self, url: &str) -> StorageResult<()> {
        let path = url_path(url)?;
        self.client.simple(&format!("RMD {path}"), &[250], &path).map(|_| ())
    }

    fn unlink(&self, url: &str) -> StorageResult<()> {
        let path = url_path(url)?;
        self.client.simple(&format!("DELE {path}"), &[250], &path).map(|_| ())
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let (from, to) = (url_path(from)?, url_path(to)?);
        let mut control = self.client.control.lock();
        control.expect(&format!("RNFR {from}"), &[350], &from)?;
        control.expect(&format!("RNTO {to}"), &[250], &to)?;
        Ok(())
    }

    fn download(&self, url: &str, sink: &mut dyn Write) -> StorageResult<()> {
        self.client.retrieve(&url_path(url)?, sink)
    }

    fn upload(&self, url: &str, source: &Path) -> StorageResult<()> {
        self.client.store(&url_path(url)?, source)
    }
}

/// FTP mount: URL construction plus a lazily opened session
pub struct FtpBackend {
    config: FtpConfig,
    connection: LazyConnection<FtpTransport>,
}

impl std::fmt::Debug for FtpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpBackend").field("config", &self.config).finish_non_exhaustive()
    }
}

impl FtpBackend {
    /// Backend for the given settings; nothing is opened until first use
    pub fn new(config: FtpConfig) -> Self {
        Self {
            config,
            connection: LazyConnection::new(),
        }
    }
}

impl StreamBackend for FtpBackend {
    type Transport = FtpTransport;

    fn id(&self) -> String {
        format!("ftp::{}@{}/{}", self.config.user, self.config.host, self.config.root)
    }

    fn construct_url(&self, path: &str) -> String {
        let full = [self.config.root.as_str(), path]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "ftp://{}@{}:{}/{}",
            utf8_percent_encode(&self.config.user, PATH_ESCAPE),
            self.config.host,
            self.config.port,
            utf8_percent_encode(&full, PATH_ESCAPE)
        )
    }

    fn transport(&self) -> StorageResult<Arc<FtpTransport>> {
        self.connection.get_or_connect(|| {
            Ok(FtpTransport {
                client: FtpClient::connect(&self.config)?,
            })
        })
    }
}

/// Storage over an FTP server
pub fn connect(options: &BackendOptions, context: &StorageContext) -> StorageResult<Arc<dyn Storage>> {
    let config = FtpConfig::from_options(options, context.timeout)?;
    Ok(Arc::new(StreamWrapper::new(FtpBackend::new(config))))
}

/// Backend definition
pub fn definition() -> BackendDefinition {
    BackendDefinition::new(ID, "FTP", connect)
        .with_alias("\\OC\\Files\\Storage\\FTP")
        .with_parameter(DefinitionParameter::new("host", "Host"))
        .with_parameter(DefinitionParameter::new("root", "Remote subfolder").optional())
        .with_parameter(DefinitionParameter::new("secure", "Secure ftps://").boolean().optional())
        .with_auth_schemes(&[scheme::PASSWORD])
        .with_legacy_auth_mechanism(mechanism::PASSWORD)
}

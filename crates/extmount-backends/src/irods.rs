//! iRODS data grids through the icommands client tools.
//!
//! The session is opened once with `iinit`; after that each operation is one
//! `ils`, `imkdir`, `irm`, `imv`, `iget` or `iput` call. Connection settings
//! are passed to every call through the icommands environment variables.

use crate::deps;
use crate::options;
use crate::process::{CommandOutput, CommandRunner, ProcessRunner};
use chrono::NaiveDateTime;
use extmount_core::definition::auth::{mechanism, scheme};
use extmount_core::storage::error::code;
use extmount_core::storage::stream_wrapper::{LazyConnection, StreamBackend, StreamWrapper, UrlStat, UrlTransport};
use extmount_core::storage::{FileType, Storage, StorageError, basename, unix_now};
use extmount_core::{BackendDefinition, BackendOptions, DefinitionParameter, StorageContext, StorageResult};
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use regex::Regex;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

/// Backend identifier
pub const ID: &str = "irods";

/// Programs the backend needs on `PATH`
pub const ICOMMANDS: &[&str] = &["iinit", "ils", "imkdir", "irm", "imv", "iget", "iput"];

const DEFAULT_PORT: u16 = 1247;

const PATH_ESCAPE: &AsciiSet = &CONTROLS.add(b' ').add(b'%').add(b'#').add(b'?');

// `  owner  replica resource  size  2016-01-08.17:45 & name`
static LONG_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^\s+\S+\s+\d+\s+\S+\s+(\d+)\s+(\d{4}-\d{2}-\d{2}\.\d{2}:\d{2})\s+&?\s*(.+?)\s*$").ok()
});

/// Parse one data object line of `ils -l` output
pub fn parse_long_line(line: &str) -> Option<(String, UrlStat)> {
    let caps = LONG_LINE.as_ref()?.captures(line)?;
    let mtime = NaiveDateTime::parse_from_str(&caps[2], "%Y-%m-%d.%H:%M")
        .map_or_else(|_| unix_now(), |t| t.and_utc().timestamp());
    Some((
        caps[3].to_string(),
        UrlStat {
            kind: FileType::File,
            size: caps[1].parse().unwrap_or(0),
            mtime,
        },
    ))
}

/// Child names from plain `ils` output of a collection
pub fn parse_listing(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.starts_with(' '))
        .map(|line| {
            let entry = line.trim();
            match entry.strip_prefix("C- ") {
                Some(collection) => basename(collection.trim()),
                None => entry.to_string(),
            }
        })
        .filter(|name| !name.is_empty())
        .collect()
}

fn status_error(output: &CommandOutput, path: &str) -> Option<StorageError> {
    if output.success() {
        return None;
    }
    let text = output.combined();
    let has = |needle: &str| text.contains(needle);
    let error = if has("does not exist") || has("USER_FILE_DOES_NOT_EXIST") || has("CAT_NO_ROWS_FOUND") {
        StorageError::NotFound(path.to_string())
    } else if has("CAT_INVALID_AUTHENTICATION") || has("CAT_INVALID_USER") || has("PAM_AUTH") {
        StorageError::not_available("the grid rejected the credentials", code::UNAUTHORIZED)
    } else if has("CAT_NO_ACCESS_PERMISSION") || has("lacks access permission") {
        StorageError::PermissionDenied(path.to_string())
    } else if has("CATALOG_ALREADY_HAS_ITEM_BY_THAT_NAME") || has("OVERWRITE_WITHOUT_FORCE_FLAG") {
        StorageError::AlreadyExists(path.to_string())
    } else if has("CAT_COLLECTION_NOT_EMPTY") {
        StorageError::NotEmpty(path.to_string())
    } else if has("USER_SOCK_CONNECT_ERR") || has("connectToRhost") || has("SYS_SOCK_READ_TIMEDOUT") {
        StorageError::not_available(text.trim().to_string(), code::NETWORK_ERROR)
    } else {
        StorageError::protocol(format!("icommand failed for {path}: {}", text.trim()))
    };
    Some(error)
}

/// Connection settings
#[derive(Clone)]
pub struct IrodsConfig {
    /// Grid host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Zone name
    pub zone: String,
    /// User name
    pub user: String,
    /// Password
    pub password: String,
    /// Authentication scheme (`native`, `PAM`)
    pub auth_mode: Option<String>,
    /// Absolute collection used as storage root
    pub root: String,
}

impl std::fmt::Debug for IrodsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrodsConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("zone", &self.zone)
            .field("user", &self.user)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl IrodsConfig {
    /// Settings from mount options; the root defaults to the user's home
    /// collection
    pub fn from_options(options: &BackendOptions) -> StorageResult<Self> {
        let zone = options::required(options, "zone")?;
        let user = options::required(options, "user")?;
        let root = match options::root(options, "root") {
            root if root.is_empty() => format!("{zone}/home/{user}"),
            root => root,
        };
        Ok(Self {
            host: options::required(options, "host")?,
            port: options::port(options, "port", DEFAULT_PORT)?,
            zone,
            user,
            password: options::string(options, "password").unwrap_or_default(),
            auth_mode: options::string(options, "auth_mode"),
            root,
        })
    }

    fn environment(&self) -> Vec<(&'static str, String)> {
        let mut env = vec![
            ("irodsHost", self.host.clone()),
            ("irodsPort", self.port.to_string()),
            ("irodsUserName", self.user.clone()),
            ("irodsZone", self.zone.clone()),
        ];
        if let Some(mode) = &self.auth_mode {
            env.push(("irodsAuthScheme", mode.clone()));
        }
        env
    }
}

/// [`UrlTransport`] running icommands
pub struct IrodsTransport {
    config: IrodsConfig,
    runner: Arc<dyn CommandRunner>,
}

impl IrodsTransport {
    /// Authenticate with `iinit` and return the transport
    pub fn connect(config: IrodsConfig, runner: Arc<dyn CommandRunner>) -> StorageResult<Self> {
        let transport = Self { config, runner };
        transport.run("iinit", vec![transport.config.password.clone()], "/")?;
        info!(host = %transport.config.host, zone = %transport.config.zone, "iRODS session initialized");
        Ok(transport)
    }

    /// Absolute grid path addressed by a `rods://` URL
    fn grid_path(url: &str) -> String {
        let rest = url.strip_prefix("rods://").unwrap_or(url);
        let path = rest.find('/').map_or("", |i| &rest[i..]);
        let decoded = percent_decode_str(path).decode_utf8_lossy();
        let trimmed = decoded.trim_end_matches('/');
        if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() }
    }

    fn run(&self, program: &str, args: Vec<String>, path: &str) -> StorageResult<CommandOutput> {
        let env = self.config.environment();
        let env: Vec<(&str, &str)> = env.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let output = self.runner.run(program, &args, &env)?;
        match status_error(&output, path) {
            Some(error) => Err(error),
            None => Ok(output),
        }
    }
}

impl UrlTransport for IrodsTransport {
    fn stat(&self, url: &str) -> StorageResult<Option<UrlStat>> {
        let path = Self::grid_path(url);
        let output = match self.run("ils", vec!["-l".into(), path.clone()], &path) {
            Ok(output) => output,
            Err(StorageError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut lines = output.stdout.lines();
        match lines.next() {
            // a collection prints its own path as a header
            Some(header) if header.trim_end().ends_with(':') => Ok(Some(UrlStat {
                kind: FileType::Dir,
                size: 0,
                mtime: unix_now(),
            })),
            Some(line) => Ok(parse_long_line(line).map(|(_, stat)| stat)),
            None => Ok(None),
        }
    }

    fn list(&self, url: &str) -> StorageResult<Vec<String>> {
        let path = Self::grid_path(url);
        let output = self.run("ils", vec![path.clone()], &path)?;
        Ok(parse_listing(&output.stdout))
    }

    fn mkdir(&self, url: &str) -> StorageResult<()> {
        let path = Self::grid_path(url);
        self.run("imkdir", vec![path.clone()], &path).map(|_| ())
    }

    fn rmdir(&self, url: &str) -> StorageResult<()> {
        let path = Self::grid_path(url);
        self.run("irm", vec!["-r".into(), "-f".into(), path.clone()], &path).map(|_| ())
    }

    fn unlink(&self, url: &str) -> StorageResult<()> {
        let path = Self::grid_path(url);
        self.run("irm", vec!["-f".into(), path.clone()], &path).map(|_| ())
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let (from, to) = (Self::grid_path(from), Self::grid_path(to));
        self.run("imv", vec![from.clone(), to], &from).map(|_| ())
    }

    fn download(&self, url: &str, sink: &mut dyn Write) -> StorageResult<()> {
        let path = Self::grid_path(url);
        let local = tempfile::NamedTempFile::new()?;
        let target = local.path().to_string_lossy().into_owned();
        self.run("iget", vec!["-f".into(), path.clone(), target], &path)?;
        std::io::copy(&mut std::fs::File::open(local.path())?, sink)?;
        Ok(())
    }

    fn upload(&self, url: &str, source: &Path) -> StorageResult<()> {
        let path = Self::grid_path(url);
        debug!(path = %path, "Uploading data object");
        self.run(
            "iput",
            vec!["-f".into(), source.to_string_lossy().into_owned(), path.clone()],
            &path,
        )
        .map(|_| ())
    }
}

/// iRODS mount
pub struct IrodsBackend {
    config: IrodsConfig,
    runner: Arc<dyn CommandRunner>,
    connection: LazyConnection<IrodsTransport>,
}

impl IrodsBackend {
    /// Backend over `runner`; `iinit` runs on first use
    pub fn new(config: IrodsConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            connection: LazyConnection::new(),
        }
    }
}

impl StreamBackend for IrodsBackend {
    type Transport = IrodsTransport;

    fn id(&self) -> String {
        format!("irods::{}@{}/{}", self.config.user, self.config.host, self.config.root)
    }

    fn construct_url(&self, path: &str) -> String {
        let full = [self.config.root.as_str(), path]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "rods://{}@{}:{}/{}",
            utf8_percent_encode(&self.config.user, PATH_ESCAPE),
            self.config.host,
            self.config.port,
            utf8_percent_encode(&full, PATH_ESCAPE)
        )
    }

    fn transport(&self) -> StorageResult<Arc<IrodsTransport>> {
        self.connection
            .get_or_connect(|| IrodsTransport::connect(self.config.clone(), Arc::clone(&self.runner)))
    }
}

/// Storage over an iRODS collection
pub fn connect(options: &BackendOptions, _context: &StorageContext) -> StorageResult<Arc<dyn Storage>> {
    let config = IrodsConfig::from_options(options)?;
    Ok(Arc::new(StreamWrapper::new(IrodsBackend::new(config, Arc::new(ProcessRunner)))))
}

/// Backend definition
pub fn definition() -> BackendDefinition {
    BackendDefinition::new(ID, "iRODS", connect)
        .with_alias("\\OC\\Files\\Storage\\iRODS")
        .with_parameter(DefinitionParameter::new("host", "Host"))
        .with_parameter(DefinitionParameter::new("port", "Port").optional())
        .with_parameter(DefinitionParameter::new("zone", "Zone"))
        .with_parameter(DefinitionParameter::new("root", "Collection").optional())
        .with_parameter(DefinitionParameter::new("auth_mode", "Authentication mode").optional())
        .with_auth_schemes(&[scheme::PASSWORD])
        .with_legacy_auth_mechanism(mechanism::PASSWORD)
        .with_dependency_check(|| deps::missing_executables(ICOMMANDS, &["iRODS"]))
}

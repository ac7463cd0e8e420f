//! SFTP mounts with password or RSA key authentication.
//!
//! Server host keys are pinned per user in
//! `<data_dir>/<user>/files_external/ssh_hostKeys`. The first key seen for a
//! host is stored; any later connection presenting a different key fails
//! with [`StorageError::HostKeyMismatch`].
//!
//! The libssh2 session lives behind the `sftp` cargo feature. Without it
//! both SFTP backends report `libssh2` as a missing dependency.

use crate::options;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use extmount_core::definition::MissingDependency;
use extmount_core::definition::auth::{mechanism, scheme};
use extmount_core::definition::capability::dependency_message;
use extmount_core::storage::stream_wrapper::{LazyConnection, StreamBackend, StreamWrapper, UrlStat, UrlTransport};
use extmount_core::storage::{Storage, StorageError};
use extmount_core::{BackendDefinition, BackendOptions, DefinitionParameter, StorageContext, StorageResult};
use parking_lot::Mutex;
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Password backend identifier
pub const ID: &str = "sftp";

/// Key backend identifier
pub const KEY_ID: &str = "sftp_key";

const DEFAULT_PORT: u16 = 22;

const HOST_KEYS_FILE: &str = "ssh_hostKeys";

const PATH_ESCAPE: &AsciiSet = &CONTROLS.add(b' ').add(b'%').add(b'#').add(b'?');

/// How the client proves its identity
#[derive(Clone)]
pub enum SftpCredential {
    /// Password login
    Password(String),
    /// RSA key pair in OpenSSH format
    Key {
        /// Public key
        public: String,
        /// Private key (PEM)
        private: String,
    },
}

/// Connection settings
#[derive(Clone)]
pub struct SftpConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Login name
    pub user: String,
    /// Credential
    pub credential: SftpCredential,
    /// Absolute directory used as storage root, without slashes at the ends
    pub root: String,
    /// Connect and I/O timeout
    pub timeout: Duration,
    /// Host key store of the acting user
    pub host_keys: PathBuf,
}

impl std::fmt::Debug for SftpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("root", &self.root)
            .field("host_keys", &self.host_keys)
            .finish_non_exhaustive()
    }
}

impl SftpConfig {
    fn base(options: &BackendOptions, context: &StorageContext, credential: SftpCredential) -> StorageResult<Self> {
        let host = options::split_host(&options::required(options, "host")?).0;
        // host:port is accepted in the host option
        let (host, port) = match host.rsplit_once(':') {
            Some((name, port)) if !name.contains(':') => (
                name.to_string(),
                port.parse()
                    .map_err(|_| StorageError::InvalidConfig(format!("invalid port in host {host}")))?,
            ),
            _ => (host.clone(), options::port(options, "port", DEFAULT_PORT)?),
        };
        Ok(Self {
            host,
            port,
            user: options::required(options, "user")?,
            credential,
            root: options::root(options, "root"),
            timeout: context.timeout,
            host_keys: host_keys_path(context),
        })
    }

    /// Settings for password login
    pub fn password(options: &BackendOptions, context: &StorageContext) -> StorageResult<Self> {
        let password = options::string(options, "password").unwrap_or_default();
        Self::base(options, context, SftpCredential::Password(password))
    }

    /// Settings for key login
    pub fn key(options: &BackendOptions, context: &StorageContext) -> StorageResult<Self> {
        let credential = SftpCredential::Key {
            public: options::required(options, "public_key")?,
            private: options::required(options, "private_key")?,
        };
        Self::base(options, context, credential)
    }

    /// Name the host key is pinned under
    pub fn host_key_name(&self) -> String {
        if self.port == DEFAULT_PORT {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Location of the host key store for the context's user
pub fn host_keys_path(context: &StorageContext) -> PathBuf {
    let mut path = context.data_dir.clone();
    if let Some(user) = &context.user {
        path.push(user);
    }
    path.join("files_external").join(HOST_KEYS_FILE)
}

/// Pinned server host keys, one `host::base64key` line per host.
#[derive(Debug)]
pub struct HostKeyStore {
    path: PathBuf,
}

impl HostKeyStore {
    /// Store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Pinned keys by host; a missing file is an empty store
    pub fn load(&self) -> StorageResult<BTreeMap<String, String>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(content
            .lines()
            .filter_map(|line| line.split_once("::"))
            .map(|(host, key)| (host.to_string(), key.trim().to_string()))
            .collect())
    }

    fn save(&self, keys: &BTreeMap<String, String>) -> StorageResult<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        for (host, key) in keys {
            writeln!(staged, "{host}::{key}")?;
        }
        staged.persist(&self.path).map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }

    /// Accept `key` for `host`: pin it when the host is new, fail when a
    /// different key is pinned
    pub fn verify(&self, host: &str, key: &[u8]) -> StorageResult<()> {
        let encoded = STANDARD.encode(key);
        let mut keys = self.load()?;
        match keys.get(host) {
            Some(known) if *known == encoded => Ok(()),
            Some(_) => {
                warn!(host, store = %self.path.display(), "SSH host key changed");
                Err(StorageError::HostKeyMismatch { host: host.to_string() })
            }
            None => {
                info!(host, "Pinning SSH host key");
                keys.insert(host.to_string(), encoded);
                self.save(&keys)
            }
        }
    }
}

/// An SSH connection with a started handshake.
pub trait SftpSession: Send + Sync {
    /// Host key the server presented
    fn host_key(&self) -> Option<Vec<u8>>;

    /// Log in; called after the host key was accepted
    fn authenticate(&self, user: &str, credential: &SftpCredential) -> StorageResult<()>;

    /// Metadata of a remote path, `None` when it does not exist
    fn stat(&self, path: &str) -> StorageResult<Option<UrlStat>>;

    /// Child names of a directory
    fn read_dir(&self, path: &str) -> StorageResult<Vec<String>>;

    /// Create a directory
    fn mkdir(&self, path: &str) -> StorageResult<()>;

    /// Remove an empty directory
    fn rmdir(&self, path: &str) -> StorageResult<()>;

    /// Remove a file
    fn unlink(&self, path: &str) -> StorageResult<()>;

    /// Rename, replacing the target
    fn rename(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Stream a file into `sink`
    fn download(&self, path: &str, sink: &mut dyn Write) -> StorageResult<()>;

    /// Replace a file with the content of `source`
    fn upload(&self, path: &str, source: &Path) -> StorageResult<()>;
}

/// Opens sessions; swapped out in tests
pub type SftpConnector = Arc<dyn Fn(&SftpConfig) -> StorageResult<Box<dyn SftpSession>> + Send + Sync>;

/// [`UrlTransport`] over one authenticated session
pub struct SftpTransport {
    session: Mutex<Box<dyn SftpSession>>,
}

impl SftpTransport {
    /// Connect, check the host key, then log in
    pub fn connect(config: &SftpConfig, connector: &SftpConnector) -> StorageResult<Self> {
        let session = connector(config)?;
        let key = session
            .host_key()
            .ok_or_else(|| StorageError::protocol("server presented no host key"))?;
        HostKeyStore::new(&config.host_keys).verify(&config.host_key_name(), &key)?;
        session.authenticate(&config.user, &config.credential)?;
        Ok(Self {
            session: Mutex::new(session),
        })
    }

    fn remote_path(url: &str) -> String {
        let rest = url.strip_prefix("sftp://").unwrap_or(url);
        let path = rest.find('/').map_or("/", |i| &rest[i..]);
        let decoded = percent_decode_str(path).decode_utf8_lossy();
        match decoded.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        }
    }
}

impl UrlTransport for SftpTransport {
    fn stat(&self, url: &str) -> StorageResult<Option<UrlStat>> {
        self.session.lock().stat(&Self::remote_path(url))
    }

    fn list(&self, url: &str) -> StorageResult<Vec<String>> {
        self.session.lock().read_dir(&Self::remote_path(url))
    }

    fn mkdir(&self, url: &str) -> StorageResult<()> {
        self.session.lock().mkdir(&Self::remote_path(url))
    }

    fn rmdir(&self, url: &str) -> StorageResult<()> {
        self.session.lock().rmdir(&Self::remote_path(url))
    }

    fn unlink(&self, url: &str) -> StorageResult<()> {
        self.session.lock().unlink(&Self::remote_path(url))
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        self.session
            .lock()
            .rename(&Self::remote_path(from), &Self::remote_path(to))
    }

    fn download(&self, url: &str, sink: &mut dyn Write) -> StorageResult<()> {
        self.session.lock().download(&Self::remote_path(url), sink)
    }

    fn upload(&self, url: &str, source: &Path) -> StorageResult<()> {
        self.session.lock().upload(&Self::remote_path(url), source)
    }
}

/// SFTP mount
pub struct SftpBackend {
    config: SftpConfig,
    connector: SftpConnector,
    connection: LazyConnection<SftpTransport>,
}

impl SftpBackend {
    /// Backend opening sessions through `connector`
    pub fn new(config: SftpConfig, connector: SftpConnector) -> Self {
        Self {
            config,
            connector,
            connection: LazyConnection::new(),
        }
    }
}

impl StreamBackend for SftpBackend {
    type Transport = SftpTransport;

    fn id(&self) -> String {
        format!("sftp::{}@{}/{}", self.config.user, self.config.host_key_name(), self.config.root)
    }

    fn construct_url(&self, path: &str) -> String {
        let full = [self.config.root.as_str(), path]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "sftp://{}@{}:{}/{}",
            utf8_percent_encode(&self.config.user, PATH_ESCAPE),
            self.config.host,
            self.config.port,
            utf8_percent_encode(&full, PATH_ESCAPE)
        )
    }

    fn transport(&self) -> StorageResult<Arc<SftpTransport>> {
        self.connection
            .get_or_connect(|| SftpTransport::connect(&self.config, &self.connector))
    }
}

#[cfg(feature = "sftp")]
mod libssh2 {
    use super::{SftpConfig, SftpCredential, SftpSession};
    use extmount_core::storage::error::code;
    use extmount_core::storage::stream_wrapper::UrlStat;
    use extmount_core::storage::{FileType, StorageError, unix_now};
    use extmount_core::StorageResult;
    use parking_lot::Mutex;
    use std::io::Write;
    use std::net::{TcpStream, ToSocketAddrs};
    use std::path::Path;

    // libssh2 SFTP status codes
    const FX_NO_SUCH_FILE: i32 = 2;
    const FX_PERMISSION_DENIED: i32 = 3;
    const FX_FILE_ALREADY_EXISTS: i32 = 11;
    const FX_DIR_NOT_EMPTY: i32 = 18;

    fn map_error(error: &ssh2::Error, path: &str) -> StorageError {
        match error.code() {
            ssh2::ErrorCode::SFTP(FX_NO_SUCH_FILE) => StorageError::NotFound(path.to_string()),
            ssh2::ErrorCode::SFTP(FX_PERMISSION_DENIED) => StorageError::PermissionDenied(path.to_string()),
            ssh2::ErrorCode::SFTP(FX_FILE_ALREADY_EXISTS) => StorageError::AlreadyExists(path.to_string()),
            ssh2::ErrorCode::SFTP(FX_DIR_NOT_EMPTY) => StorageError::NotEmpty(path.to_string()),
            _ => StorageError::protocol(format!("{path}: {}", error.message())),
        }
    }

    struct Inner {
        session: ssh2::Session,
        sftp: Option<ssh2::Sftp>,
    }

    /// Session backed by libssh2
    pub struct Ssh2Session {
        inner: Mutex<Inner>,
    }

    impl Ssh2Session {
        /// TCP connect and SSH handshake
        pub fn open(config: &SftpConfig) -> StorageResult<Box<dyn SftpSession>> {
            let address = (config.host.as_str(), config.port)
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| StorageError::not_available(format!("cannot resolve {}", config.host), code::NETWORK_ERROR))?;
            let tcp = TcpStream::connect_timeout(&address, config.timeout)
                .map_err(|e| StorageError::not_available(format!("{}: {e}", config.host), code::NETWORK_ERROR))?;
            let mut session = ssh2::Session::new().map_err(|e| StorageError::protocol(e.message()))?;
            session.set_tcp_stream(tcp);
            session.set_timeout(u32::try_from(config.timeout.as_millis()).unwrap_or(u32::MAX));
            session
                .handshake()
                .map_err(|e| StorageError::not_available(format!("SSH handshake failed: {}", e.message()), code::NETWORK_ERROR))?;
            Ok(Box::new(Self {
                inner: Mutex::new(Inner { session, sftp: None }),
            }))
        }

        fn with_sftp<T>(&self, path: &str, op: impl FnOnce(&ssh2::Sftp) -> Result<T, ssh2::Error>) -> StorageResult<T> {
            let inner = self.inner.lock();
            let sftp = inner
                .sftp
                .as_ref()
                .ok_or_else(|| StorageError::protocol("SFTP subsystem not started"))?;
            op(sftp).map_err(|e| map_error(&e, path))
        }
    }

    impl SftpSession for Ssh2Session {
        fn host_key(&self) -> Option<Vec<u8>> {
            self.inner.lock().session.host_key().map(|(key, _)| key.to_vec())
        }

        fn authenticate(&self, user: &str, credential: &SftpCredential) -> StorageResult<()> {
            let mut inner = self.inner.lock();
            let result = match credential {
                SftpCredential::Password(password) => inner.session.userauth_password(user, password),
                SftpCredential::Key { public, private } => {
                    inner.session.userauth_pubkey_memory(user, Some(public), private, None)
                }
            };
            if result.is_err() || !inner.session.authenticated() {
                return Err(StorageError::Unauthorized(format!("SSH login failed for {user}")));
            }
            let sftp = inner.session.sftp().map_err(|e| StorageError::protocol(e.message()))?;
            inner.sftp = Some(sftp);
            Ok(())
        }

        fn stat(&self, path: &str) -> StorageResult<Option<UrlStat>> {
            match self.with_sftp(path, |sftp| sftp.stat(Path::new(path))) {
                Ok(stat) => Ok(Some(UrlStat {
                    kind: if stat.is_dir() { FileType::Dir } else { FileType::File },
                    size: stat.size.unwrap_or(0),
                    mtime: stat.mtime.and_then(|t| i64::try_from(t).ok()).unwrap_or_else(unix_now),
                })),
                Err(StorageError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            }
        }

        fn read_dir(&self, path: &str) -> StorageResult<Vec<String>> {
            let entries = self.with_sftp(path, |sftp| sftp.readdir(Path::new(path)))?;
            Ok(entries
                .into_iter()
                .filter_map(|(p, _)| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .collect())
        }

        fn mkdir(&self, path: &str) -> StorageResult<()> {
            self.with_sftp(path, |sftp| sftp.mkdir(Path::new(path), 0o755))
        }

        fn rmdir(&self, path: &str) -> StorageResult<()> {
            self.with_sftp(path, |sftp| sftp.rmdir(Path::new(path)))
        }

        fn unlink(&self, path: &str) -> StorageResult<()> {
            self.with_sftp(path, |sftp| sftp.unlink(Path::new(path)))
        }

        fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
            let flags = ssh2::RenameFlags::OVERWRITE | ssh2::RenameFlags::ATOMIC | ssh2::RenameFlags::NATIVE;
            self.with_sftp(from, |sftp| sftp.rename(Path::new(from), Path::new(to), Some(flags)))
        }

        fn download(&self, path: &str, sink: &mut dyn Write) -> StorageResult<()> {
            let mut file = self.with_sftp(path, |sftp| sftp.open(Path::new(path)))?;
            std::io::copy(&mut file, sink)?;
            Ok(())
        }

        fn upload(&self, path: &str, source: &Path) -> StorageResult<()> {
            let mut remote = self.with_sftp(path, |sftp| sftp.create(Path::new(path)))?;
            std::io::copy(&mut std::fs::File::open(source)?, &mut remote)?;
            Ok(())
        }
    }
}

/// Connector opening real SSH sessions
#[cfg(feature = "sftp")]
pub fn default_connector() -> SftpConnector {
    Arc::new(libssh2::Ssh2Session::open)
}

/// Connector that always fails: built without SSH support
#[cfg(not(feature = "sftp"))]
pub fn default_connector() -> SftpConnector {
    Arc::new(|_| {
        Err(StorageError::NotSupported(
            "SFTP support was not compiled in (enable the `sftp` feature)".to_string(),
        ))
    })
}

fn missing_libssh2() -> Vec<MissingDependency> {
    if cfg!(feature = "sftp") {
        Vec::new()
    } else {
        vec![MissingDependency::new("libssh2").with_message(dependency_message("libssh2", &["SFTP", "SFTP with secret key login"]))]
    }
}

/// Password-authenticated storage
pub fn connect(options: &BackendOptions, context: &StorageContext) -> StorageResult<Arc<dyn Storage>> {
    let config = SftpConfig::password(options, context)?;
    Ok(Arc::new(StreamWrapper::new(SftpBackend::new(config, default_connector()))))
}

/// Key-authenticated storage
pub fn connect_key(options: &BackendOptions, context: &StorageContext) -> StorageResult<Arc<dyn Storage>> {
    let config = SftpConfig::key(options, context)?;
    Ok(Arc::new(StreamWrapper::new(SftpBackend::new(config, default_connector()))))
}

/// Password backend definition
pub fn definition() -> BackendDefinition {
    BackendDefinition::new(ID, "SFTP", connect)
        .with_alias("\\OC\\Files\\Storage\\SFTP")
        .with_parameter(DefinitionParameter::new("host", "Host"))
        .with_parameter(DefinitionParameter::new("root", "Root").optional())
        .with_auth_schemes(&[scheme::PASSWORD, scheme::PUBLICKEY])
        .with_legacy_auth_mechanism(mechanism::PASSWORD)
        .with_dependency_check(missing_libssh2)
}

/// Key backend definition
pub fn key_definition() -> BackendDefinition {
    BackendDefinition::new(KEY_ID, "SFTP with secret key login", connect_key)
        .with_alias("\\OC\\Files\\Storage\\SFTP_Key")
        .with_parameter(DefinitionParameter::new("host", "Host"))
        .with_parameter(DefinitionParameter::new("root", "Remote subfolder").optional())
        .with_auth_schemes(&[scheme::PUBLICKEY])
        .with_legacy_auth_mechanism(mechanism::RSA)
        .with_dependency_check(missing_libssh2)
}

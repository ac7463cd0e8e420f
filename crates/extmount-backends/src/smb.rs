//! Windows shares (SMB / CIFS) through `smbclient`.
//!
//! Every operation runs one `smbclient -c` command against the share. The
//! password travels in the `PASSWD` environment variable, never on the
//! command line.

use crate::deps;
use crate::options;
use crate::process::{CommandOutput, CommandRunner, ProcessRunner};
use chrono::NaiveDateTime;
use extmount_core::definition::auth::{mechanism, scheme};
use extmount_core::storage::error::code;
use extmount_core::storage::stream_wrapper::{LazyConnection, StreamBackend, StreamWrapper, UrlStat, UrlTransport};
use extmount_core::storage::{FileType, FreeSpace, Storage, StorageError, unix_now};
use extmount_core::{BackendDefinition, BackendOptions, DefinitionParameter, StorageContext, StorageResult};
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use regex::Regex;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::debug;

/// Backend identifier
pub const ID: &str = "smb";

/// Client program
pub const SMBCLIENT: &str = "smbclient";

const PATH_ESCAPE: &AsciiSet = &CONTROLS.add(b' ').add(b'%').add(b'#').add(b'?');

static LS_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^\s+(.+?)\s+([ADHSRNVI]*)\s+(\d+)\s+(\w{3} \w{3} [ \d]\d \d{2}:\d{2}:\d{2} \d{4})\s*$").ok()
});

static DU_LINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d+) blocks of size (\d+)\. (\d+) blocks available").ok());

/// Parse `ls` output into `(name, stat)` pairs, skipping `.` and `..`
pub fn parse_ls(output: &str) -> Vec<(String, UrlStat)> {
    let Some(re) = LS_LINE.as_ref() else {
        return Vec::new();
    };
    output
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            let name = caps[1].to_string();
            if name == "." || name == ".." {
                return None;
            }
            let kind = if caps[2].contains('D') { FileType::Dir } else { FileType::File };
            let mtime = NaiveDateTime::parse_from_str(&caps[4].replace("  ", " "), "%a %b %e %H:%M:%S %Y")
                .map(|t| t.and_utc().timestamp())
                .unwrap_or_else(|_| unix_now());
            Some((
                name,
                UrlStat {
                    kind,
                    size: caps[3].parse().unwrap_or(0),
                    mtime,
                },
            ))
        })
        .collect()
}

/// Free bytes from `du` output
pub fn parse_du(output: &str) -> Option<u64> {
    let caps = DU_LINE.as_ref()?.captures(output)?;
    let block: u64 = caps[2].parse().ok()?;
    let available: u64 = caps[3].parse().ok()?;
    Some(block * available)
}

/// Map `NT_STATUS_*` codes in client output to errors
fn status_error(output: &CommandOutput, path: &str) -> Option<StorageError> {
    let text = output.combined();
    let error = if text.contains("NT_STATUS_OBJECT_NAME_NOT_FOUND")
        || text.contains("NT_STATUS_OBJECT_PATH_NOT_FOUND")
        || text.contains("NT_STATUS_NO_SUCH_FILE")
    {
        StorageError::NotFound(path.to_string())
    } else if text.contains("NT_STATUS_LOGON_FAILURE") || text.contains("NT_STATUS_WRONG_PASSWORD") {
        StorageError::not_available("the server rejected the credentials", code::UNAUTHORIZED)
    } else if text.contains("NT_STATUS_ACCESS_DENIED") {
        StorageError::PermissionDenied(path.to_string())
    } else if text.contains("NT_STATUS_OBJECT_NAME_COLLISION") {
        StorageError::AlreadyExists(path.to_string())
    } else if text.contains("NT_STATUS_DIRECTORY_NOT_EMPTY") {
        StorageError::NotEmpty(path.to_string())
    } else if text.contains("NT_STATUS_BAD_NETWORK_NAME") {
        StorageError::not_available("share does not exist", code::INCOMPLETE_CONF)
    } else if text.contains("NT_STATUS_IO_TIMEOUT") || text.contains("NT_STATUS_CONNECTION_REFUSED")
        || text.contains("NT_STATUS_HOST_UNREACHABLE") || text.contains("Connection to")
    {
        StorageError::not_available(text.trim().to_string(), code::NETWORK_ERROR)
    } else if !output.success() {
        StorageError::protocol(format!("smbclient failed for {path}: {}", text.trim()))
    } else if let Some(line) = text.lines().find(|l| l.contains("NT_STATUS_")) {
        StorageError::protocol(format!("{path}: {}", line.trim()))
    } else {
        return None;
    };
    Some(error)
}

/// Connection settings
#[derive(Clone)]
pub struct SmbConfig {
    /// Server host
    pub host: String,
    /// Share name
    pub share: String,
    /// Directory within the share used as storage root
    pub root: String,
    /// User name
    pub user: String,
    /// Password
    pub password: String,
    /// Workgroup or domain
    pub domain: Option<String>,
    /// Connection timeout
    pub timeout: Duration,
}

impl std::fmt::Debug for SmbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmbConfig")
            .field("host", &self.host)
            .field("share", &self.share)
            .field("root", &self.root)
            .field("user", &self.user)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl SmbConfig {
    /// Settings from mount options
    pub fn from_options(options: &BackendOptions, timeout: Duration) -> StorageResult<Self> {
        let user = options::required(options, "user")?;
        // DOMAIN\user is accepted as well as a separate domain option
        let (domain, user) = match user.split_once('\\') {
            Some((domain, user)) => (Some(domain.to_string()), user.to_string()),
            None => (options::string(options, "domain"), user),
        };
        Ok(Self {
            host: options::split_host(&options::required(options, "host")?).0,
            share: options::root(options, "share"),
            root: options::root(options, "root"),
            user,
            password: options::string(options, "password").unwrap_or_default(),
            domain,
            timeout,
        })
    }
}

/// Quote a path for an `smbclient -c` command
fn quote(path: &str) -> StorageResult<String> {
    if path.contains('"') || path.contains(';') {
        return Err(StorageError::InvalidConfig(format!("unsupported character in SMB path {path}")));
    }
    Ok(format!("\"{}\"", path.replace('/', "\\")))
}

/// [`UrlTransport`] driving `smbclient`
pub struct SmbTransport {
    config: SmbConfig,
    runner: Arc<dyn CommandRunner>,
}

impl SmbTransport {
    /// Transport using `runner` to start the client
    pub fn new(config: SmbConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    /// Share-relative path addressed by an `smb://` URL
    fn share_path(&self, url: &str) -> String {
        let rest = url.strip_prefix("smb://").unwrap_or(url);
        let path = rest.find('/').map_or("", |i| &rest[i + 1..]);
        let decoded = percent_decode_str(path).decode_utf8_lossy().into_owned();
        let without_share = decoded
            .strip_prefix(&self.config.share)
            .unwrap_or(&decoded)
            .trim_matches('/');
        without_share.to_string()
    }

    fn smbclient(&self, command: &str, path: &str) -> StorageResult<CommandOutput> {
        let mut args = vec![
            format!("//{}/{}", self.config.host, self.config.share),
            "-U".to_string(),
            self.config.user.clone(),
            "-t".to_string(),
            self.config.timeout.as_secs().max(1).to_string(),
        ];
        if let Some(domain) = &self.config.domain {
            args.push("-W".to_string());
            args.push(domain.clone());
        }
        args.push("-c".to_string());
        args.push(command.to_string());
        let output = self
            .runner
            .run(SMBCLIENT, &args, &[("PASSWD", self.config.password.as_str())])?;
        match status_error(&output, path) {
            Some(error) => Err(error),
            None => Ok(output),
        }
    }

    fn parent_and_name(path: &str) -> (&str, &str) {
        match path.rfind('/') {
            Some(i) => (&path[..i], &path[i + 1..]),
            None => ("", path),
        }
    }
}

impl UrlTransport for SmbTransport {
    fn stat(&self, url: &str) -> StorageResult<Option<UrlStat>> {
        let path = self.share_path(url);
        if path.is_empty() {
            self.smbclient("ls", "/")?;
            return Ok(Some(UrlStat { kind: FileType::Dir, size: 0, mtime: unix_now() }));
        }
        let (parent, name) = Self::parent_and_name(&path);
        let pattern = if parent.is_empty() {
            "*".to_string()
        } else {
            format!("{parent}/*")
        };
        let output = match self.smbclient(&format!("ls {}", quote(&pattern)?), &path) {
            Ok(output) => output,
            Err(StorageError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(parse_ls(&output.stdout)
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, stat)| stat))
    }

    fn list(&self, url: &str) -> StorageResult<Vec<String>> {
        let path = self.share_path(url);
        let pattern = if path.is_empty() { "*".to_string() } else { format!("{path}/*") };
        let output = self.smbclient(&format!("ls {}", quote(&pattern)?), &path)?;
        Ok(parse_ls(&output.stdout).into_iter().map(|(name, _)| name).collect())
    }

    fn mkdir(&self, url: &str) -> StorageResult<()> {
        let path = self.share_path(url);
        self.smbclient(&format!("mkdir {}", quote(&path)?), &path).map(|_| ())
    }

    fn rmdir(&self, url: &str) -> StorageResult<()> {
        let path = self.share_path(url);
        self.smbclient(&format!("rmdir {}", quote(&path)?), &path).map(|_| ())
    }

    fn unlink(&self, url: &str) -> StorageResult<()> {
        let path = self.share_path(url);
        self.smbclient(&format!("del {}", quote(&path)?), &path).map(|_| ())
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let (from, to) = (self.share_path(from), self.share_path(to));
        self.smbclient(&format!("rename {} {} -f", quote(&from)?, quote(&to)?), &from)
            .map(|_| ())
    }

    fn download(&self, url: &str, sink: &mut dyn Write) -> StorageResult<()> {
        let path = self.share_path(url);
        let local = tempfile::NamedTempFile::new()?;
        let local_path = local.path().to_string_lossy().into_owned();
        self.smbclient(&format!("get {} {}", quote(&path)?, quote(&local_path)?.replace('\\', "/")), &path)?;
        std::io::copy(&mut std::fs::File::open(local.path())?, sink)?;
        Ok(())
    }

    fn upload(&self, url: &str, source: &Path) -> StorageResult<()> {
        let path = self.share_path(url);
        let local = source.to_string_lossy();
        self.smbclient(&format!("put {} {}", quote(&local)?.replace('\\', "/"), quote(&path)?), &path)
            .map(|_| ())
    }

    fn free_space(&self, _url: &str) -> StorageResult<FreeSpace> {
        let output = self.smbclient("du", "/")?;
        Ok(parse_du(&output.stdout).map_or(FreeSpace::Unknown, FreeSpace::Known))
    }
}

/// SMB mount
pub struct SmbBackend {
    config: SmbConfig,
    runner: Arc<dyn CommandRunner>,
    connection: LazyConnection<SmbTransport>,
}

impl SmbBackend {
    /// Backend over `runner`
    pub fn new(config: SmbConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            connection: LazyConnection::new(),
        }
    }
}

impl StreamBackend for SmbBackend {
    type Transport = SmbTransport;

    fn id(&self) -> String {
        format!("smb::{}@{}//{}/{}", self.config.user, self.config.host, self.config.share, self.config.root)
    }

    fn construct_url(&self, path: &str) -> String {
        let full = [self.config.share.as_str(), self.config.root.as_str(), path]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "smb://{}@{}/{}",
            utf8_percent_encode(&self.config.user, PATH_ESCAPE),
            self.config.host,
            utf8_percent_encode(&full, PATH_ESCAPE)
        )
    }

    fn transport(&self) -> StorageResult<Arc<SmbTransport>> {
        self.connection.get_or_connect(|| {
            debug!(host = %self.config.host, share = %self.config.share, "Using smbclient transport");
            Ok(SmbTransport::new(self.config.clone(), Arc::clone(&self.runner)))
        })
    }
}

/// Storage over an SMB share
pub fn connect(options: &BackendOptions, context: &StorageContext) -> StorageResult<Arc<dyn Storage>> {
    let config = SmbConfig::from_options(options, context.timeout)?;
    Ok(Arc::new(StreamWrapper::new(SmbBackend::new(config, Arc::new(ProcessRunner)))))
}

/// Backend definition
pub fn definition() -> BackendDefinition {
    BackendDefinition::new(ID, "SMB / CIFS", connect)
        .with_alias("\\OC\\Files\\Storage\\SMB")
        .with_parameter(DefinitionParameter::new("host", "Host"))
        .with_parameter(DefinitionParameter::new("share", "Share"))
        .with_parameter(DefinitionParameter::new("root", "Remote subfolder").optional())
        .with_parameter(DefinitionParameter::new("domain", "Domain").optional())
        .with_auth_schemes(&[scheme::PASSWORD])
        .with_legacy_auth_mechanism(mechanism::PASSWORD)
        .with_dependency_check(|| deps::missing_executables(&[SMBCLIENT], &["SMB / CIFS"]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::{FakeRunner, failed, ok};
    use serde_json::json;

    const LISTING: &str = "  .                                   D        0  Mon Mar 14 12:34:56 2016
  ..                                  D        0  Mon Mar 14 12:34:56 2016
  Reports                             D        0  Tue Feb  2 08:00:00 2016
  budget 2016.xlsx                    A    20480  Fri Jan  8 17:45:10 2016

\t\t5232896 blocks of size 1024. 1024 blocks available
";

    fn config() -> SmbConfig {
        SmbConfig::from_options(
            &serde_json::from_value(json!({
                "host": "fileserver", "share": "/finance/", "root": "2016",
                "user": "CORP\\alice", "password": "s3cret"
            }))
            .unwrap(),
            Duration::from_secs(10),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_ls() {
        let entries = parse_ls(LISTING);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "Reports");
        assert_eq!(entries[0].1.kind, FileType::Dir);
        assert_eq!(entries[1].0, "budget 2016.xlsx");
        assert_eq!(entries[1].1.size, 20480);
        assert_eq!(
            entries[1].1.mtime,
            chrono::NaiveDate::from_ymd_opt(2016, 1, 8).unwrap().and_hms_opt(17, 45, 10).unwrap().and_utc().timestamp()
        );
        assert_eq!(parse_du(LISTING), Some(1024 * 1024));
    }

    #[test]
    fn test_options_split_domain() {
        let cfg = config();
        assert_eq!(cfg.domain.as_deref(), Some("CORP"));
        assert_eq!(cfg.user, "alice");
        assert_eq!(cfg.share, "finance");
    }

    #[test]
    fn test_commands_and_password_env() {
        let runner = Arc::new(FakeRunner::new(|_, args| {
            let command = args.last().cloned().unwrap_or_default();
            if command.starts_with("ls \"2016\\*\"") {
                ok(LISTING)
            } else if command.starts_with("ls") {
                failed("NT_STATUS_OBJECT_NAME_NOT_FOUND listing \\missing\\*")
            } else {
                ok("")
            }
        }));
        let backend = SmbBackend::new(config(), Arc::clone(&runner) as Arc<dyn CommandRunner>);
        let storage = StreamWrapper::new(backend);

        assert_eq!(storage.filetype("Reports").unwrap(), FileType::Dir);
        assert_eq!(storage.stat("budget 2016.xlsx").unwrap().size, 20480);
        assert!(!storage.file_exists("missing/x").unwrap());
        storage.mkdir("New").unwrap();

        let calls = runner.calls.lock();
        let (program, args, env) = &calls[0];
        assert_eq!(program, SMBCLIENT);
        assert_eq!(&args[..5], ["//fileserver/finance", "-U", "alice", "-t", "10"]);
        assert!(args.contains(&"-W".to_string()) && args.contains(&"CORP".to_string()));
        assert!(!args.iter().any(|a| a.contains("s3cret")));
        assert_eq!(env, &[("PASSWD".to_string(), "s3cret".to_string())]);
        assert_eq!(calls.last().unwrap().1.last().unwrap(), "mkdir \"2016\\New\"");
    }

    #[test]
    fn test_status_mapping() {
        let err = |text: &str| status_error(&failed(text), "p");
        assert!(matches!(err("NT_STATUS_ACCESS_DENIED"), Some(StorageError::PermissionDenied(_))));
        assert_eq!(err("session setup failed: NT_STATUS_LOGON_FAILURE").unwrap().code(), code::UNAUTHORIZED);
        assert_eq!(err("tree connect failed: NT_STATUS_BAD_NETWORK_NAME").unwrap().code(), code::INCOMPLETE_CONF);
        assert!(matches!(err("NT_STATUS_OBJECT_NAME_COLLISION"), Some(StorageError::AlreadyExists(_))));
        assert!(status_error(&ok("fine"), "p").is_none());
        assert!(quote("bad\"name").is_err());
    }

    #[test]
    fn test_definition_reports_dependency() {
        let def = definition();
        assert!(def.identifier().matches("\\OC\\Files\\Storage\\SMB"));
        // smbclient may or may not be installed here; a report always names it
        for missing in def.check_dependencies() {
            assert_eq!(missing.dependency, SMBCLIENT);
        }
    }
}

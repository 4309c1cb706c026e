//! FTP / explicit FTPS connector (suppaftp, blocking client on tokio's blocking pool).
//!
//! Each operation opens one session, performs its commands and quits. Sessions are never
//! shared between calls.

use std::net::ToSocketAddrs;
use std::time::{Duration, Instant};

use chrono::Utc;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode, Status};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{IngestionError, IngestionResult};
use crate::types::{FileMetadata, SourceDescriptor};

use super::{NamePattern, content_type_for, file_name_of, join_remote, parse_remote_address, run_blocking};

pub const DEFAULT_PORT: u16 = 21;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings, parsed from the descriptor on every call.
#[derive(Clone, PartialEq, Eq)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub passive: bool,
    /// Explicit TLS (`AUTH TLS`). Requires the `ftps` cargo feature.
    pub use_tls: bool,
    pub timeout: Duration,
    /// Remote working directory; empty means the login directory.
    pub directory: String,
}

impl std::fmt::Debug for FtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("passive", &self.passive)
            .field("use_tls", &self.use_tls)
            .field("timeout", &self.timeout)
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

impl FtpConfig {
    /// Options: `FtpServer`, `FtpPort` (21), `FtpUsername` ("anonymous"), `FtpPassword` (""),
    /// `FtpUsePassiveMode` (true), `FtpUseSsl` (false), `FtpTimeoutSeconds` (30).
    pub fn from_source(source: &SourceDescriptor) -> IngestionResult<Self> {
        let target = parse_remote_address(source.address(), &["ftp", "ftps"], source.option_string("FtpServer")?)?;
        Ok(Self {
            port: source.option_port("FtpPort")?.or(target.port).unwrap_or(DEFAULT_PORT),
            host: target.host,
            username: source
                .option_string("FtpUsername")?
                .unwrap_or_else(|| "anonymous".to_string()),
            password: source.option_string("FtpPassword")?.unwrap_or_default(),
            passive: source.option_bool("FtpUsePassiveMode")?.unwrap_or(true),
            use_tls: source.option_bool("FtpUseSsl")?.unwrap_or(false),
            timeout: source
                .option_u64("FtpTimeoutSeconds")?
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
            directory: target.directory,
        })
    }

    fn endpoint(&self) -> String {
        format!("ftp://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FtpConnector;

impl FtpConnector {
    pub async fn read(
        &self,
        source: &SourceDescriptor,
        reference: &str,
        cancel: &CancellationToken,
    ) -> IngestionResult<Vec<u8>> {
        let config = FtpConfig::from_source(source)?;
        let path = join_remote(&config.directory, reference);
        let endpoint = config.endpoint();
        let data = run_blocking("ftp read", cancel, {
            let path = path.clone();
            move || with_session(&config, |s| s.retrieve(&path))
        })
        .await?;
        info!(endpoint = %endpoint, path = %path, bytes = data.len(), "downloaded ftp file");
        Ok(data)
    }

    pub async fn list(
        &self,
        source: &SourceDescriptor,
        pattern: &str,
        cancel: &CancellationToken,
    ) -> IngestionResult<Vec<String>> {
        let config = FtpConfig::from_source(source)?;
        let matcher = NamePattern::new(pattern)?;
        let endpoint = config.endpoint();
        let files = run_blocking("ftp list", cancel, move || {
            let lines = with_session(&config, |s| s.list(&config.directory))?;
            Ok(lines
                .iter()
                .filter_map(|line| FtpListEntry::parse(line))
                .filter(|e| e.is_file && matcher.matches(&e.name))
                .map(|e| e.name)
                .collect::<Vec<_>>())
        })
        .await?;
        info!(endpoint = %endpoint, pattern, count = files.len(), "listed ftp directory");
        Ok(files)
    }

    pub(crate) async fn probe(&self, source: &SourceDescriptor, cancel: &CancellationToken) -> IngestionResult<()> {
        let config = FtpConfig::from_source(source)?;
        run_blocking("ftp test", cancel, move || {
            with_session(&config, |s| s.pwd()).map(|dir| debug!(dir = %dir, "ftp login ok"))
        })
        .await
    }

    pub async fn describe(
        &self,
        source: &SourceDescriptor,
        reference: &str,
        cancel: &CancellationToken,
    ) -> IngestionResult<FileMetadata> {
        let config = FtpConfig::from_source(source)?;
        let path = join_remote(&config.directory, reference);
        run_blocking("ftp describe", cancel, move || {
            with_session(&config, |s| {
                let size = s.size(&path)?;
                let modified = match s.mdtm(&path) {
                    Ok(ts) => ts.and_utc(),
                    Err(e) => {
                        debug!(path = %path, error = %e, "MDTM unavailable; using current time");
                        Utc::now()
                    }
                };
                let listing = s
                    .list(&path)
                    .ok()
                    .and_then(|lines| lines.iter().find_map(|l| FtpListEntry::parse(l)));

                let name = file_name_of(&path).to_string();
                let mut meta = FileMetadata {
                    path: path.clone(),
                    content_type: content_type_for(&name).to_string(),
                    name,
                    size_bytes: size as u64,
                    last_modified_utc: modified,
                    created_utc: None,
                    extra: Default::default(),
                };
                if let Some(entry) = listing {
                    meta.extra.insert("FtpPermissions".to_string(), entry.permissions);
                    meta.extra.insert("FtpOwner".to_string(), entry.owner);
                }
                Ok(meta)
            })
        })
        .await
    }
}

/// One logged-in control connection.
enum FtpSession {
    Plain(FtpStream),
    #[cfg(feature = "ftps")]
    Secure(suppaftp::NativeTlsFtpStream),
}

macro_rules! on_stream {
    ($session:expr, $s:ident => $body:expr) => {
        match $session {
            FtpSession::Plain($s) => $body,
            #[cfg(feature = "ftps")]
            FtpSession::Secure($s) => $body,
        }
    };
}

/// Session wrapper that attaches the path under operation to every error.
struct Session<'a> {
    inner: FtpSession,
    config: &'a FtpConfig,
}

impl Session<'_> {
    fn retrieve(&mut self, path: &str) -> IngestionResult<Vec<u8>> {
        on_stream!(&mut self.inner, s => s.retr_as_buffer(path))
            .map(|cursor| cursor.into_inner())
            .map_err(|e| map_ftp_error(e, self.config, "RETR", Some(path)))
    }

    fn list(&mut self, path: &str) -> IngestionResult<Vec<String>> {
        let dir = (!path.is_empty()).then_some(path);
        on_stream!(&mut self.inner, s => s.list(dir)).map_err(|e| map_ftp_error(e, self.config, "LIST", Some(path)))
    }

    fn size(&mut self, path: &str) -> IngestionResult<usize> {
        on_stream!(&mut self.inner, s => s.size(path)).map_err(|e| map_ftp_error(e, self.config, "SIZE", Some(path)))
    }

    fn mdtm(&mut self, path: &str) -> IngestionResult<chrono::NaiveDateTime> {
        on_stream!(&mut self.inner, s => s.mdtm(path)).map_err(|e| map_ftp_error(e, self.config, "MDTM", Some(path)))
    }

    fn pwd(&mut self) -> IngestionResult<String> {
        on_stream!(&mut self.inner, s => s.pwd()).map_err(|e| map_ftp_error(e, self.config, "PWD", None))
    }

    fn quit(mut self) {
        if let Err(e) = on_stream!(&mut self.inner, s => s.quit()) {
            warn!(error = %e, "failed to quit ftp session gracefully");
        }
    }
}

/// Open a session, run `op`, then quit regardless of the outcome.
fn with_session<T>(config: &FtpConfig, op: impl FnOnce(&mut Session<'_>) -> IngestionResult<T>) -> IngestionResult<T> {
    let mut session = Session {
        inner: connect(config)?,
        config,
    };
    let out = op(&mut session);
    session.quit();
    out
}

fn connect(config: &FtpConfig) -> IngestionResult<FtpSession> {
    let endpoint = config.endpoint();
    let addr = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| IngestionError::connection(&endpoint, format!("cannot resolve host: {e}")))?
        .next()
        .ok_or_else(|| IngestionError::connection(&endpoint, "host resolved to no addresses"))?;

    debug!(endpoint = %endpoint, passive = config.passive, tls = config.use_tls, "connecting to ftp server");
    let started = Instant::now();
    let mut stream = FtpStream::connect_timeout(addr, config.timeout)
        .map_err(|e| map_connect_error(e, config, started))?;
    stream.get_ref().set_read_timeout(Some(config.timeout))?;
    stream.get_ref().set_write_timeout(Some(config.timeout))?;
    stream.set_mode(if config.passive { Mode::Passive } else { Mode::Active });

    let mut session = if config.use_tls {
        secure(stream, config)?
    } else {
        FtpSession::Plain(stream)
    };

    on_stream!(&mut session, s => s.login(&config.username, &config.password))
        .map_err(|e| IngestionError::connection(&endpoint, format!("login failed for '{}': {e}", config.username)))?;
    on_stream!(&mut session, s => s.transfer_type(FileType::Binary))
        .map_err(|e| IngestionError::connection(&endpoint, format!("cannot switch to binary mode: {e}")))?;
    Ok(session)
}

#[cfg(feature = "ftps")]
fn secure(stream: FtpStream, config: &FtpConfig) -> IngestionResult<FtpSession> {
    use suppaftp::NativeTlsConnector;
    use suppaftp::native_tls::TlsConnector;

    let endpoint = config.endpoint();
    let tls = TlsConnector::new().map_err(|e| IngestionError::connection(&endpoint, format!("tls setup failed: {e}")))?;
    stream
        .into_secure(NativeTlsConnector::from(tls), &config.host)
        .map(FtpSession::Secure)
        .map_err(|e| IngestionError::connection(&endpoint, format!("AUTH TLS failed: {e}")))
}

#[cfg(not(feature = "ftps"))]
fn secure(_stream: FtpStream, config: &FtpConfig) -> IngestionResult<FtpSession> {
    Err(IngestionError::connection(
        config.endpoint(),
        "FtpUseSsl requires the 'ftps' cargo feature",
    ))
}

fn map_connect_error(e: FtpError, config: &FtpConfig, started: Instant) -> IngestionError {
    match &e {
        FtpError::ConnectionError(io) if io.kind() == std::io::ErrorKind::TimedOut => IngestionError::Timeout {
            operation: format!("connect {}", config.endpoint()),
            elapsed: started.elapsed(),
        },
        _ => IngestionError::connection(config.endpoint(), e),
    }
}

fn map_ftp_error(e: FtpError, config: &FtpConfig, command: &str, path: Option<&str>) -> IngestionError {
    match (&e, path) {
        (FtpError::UnexpectedResponse(resp), Some(path)) if resp.status == Status::FileUnavailable => {
            IngestionError::not_found(format!("{}{}", config.endpoint(), path))
        }
        (FtpError::ConnectionError(io), _)
            if matches!(io.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock) =>
        {
            IngestionError::Timeout {
                operation: format!("{command} {}", path.unwrap_or_default()),
                elapsed: config.timeout,
            }
        }
        _ => IngestionError::connection(config.endpoint(), format!("{command} failed: {e}")),
    }
}

/// One parsed line of a LIST response (Unix `ls -l` or IIS/DOS style).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpListEntry {
    pub name: String,
    pub is_file: bool,
    pub size: Option<u64>,
    /// Raw permission string, e.g. `-rw-r--r--` (empty for DOS listings).
    pub permissions: String,
    /// Owning user (empty for DOS listings).
    pub owner: String,
}

impl FtpListEntry {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with("total ") {
            return None;
        }
        if line.as_bytes()[0].is_ascii_digit() {
            Self::parse_dos(line)
        } else {
            Self::parse_unix(line)
        }
    }

    // -rw-r--r--   1 ftp ftp  1234 Jan 15 12:00 file name.txt
    fn parse_unix(line: &str) -> Option<Self> {
        let (fields, rest) = split_fields(line, 8)?;
        let permissions = fields[0];
        let name = match rest.split_once(" -> ") {
            Some((link, _target)) => link,
            None => rest,
        };
        Some(Self {
            name: name.to_string(),
            is_file: permissions.starts_with('-'),
            size: fields[4].parse().ok(),
            permissions: permissions.to_string(),
            owner: fields[2].to_string(),
        })
    }

    // 01-15-24  12:00PM       <DIR>          folder
    // 01-15-24  12:00PM                 1234 file.txt
    fn parse_dos(line: &str) -> Option<Self> {
        let (fields, rest) = split_fields(line, 3)?;
        let is_dir = fields[2].eq_ignore_ascii_case("<DIR>");
        Some(Self {
            name: rest.to_string(),
            is_file: !is_dir,
            size: if is_dir { None } else { fields[2].parse().ok() },
            permissions: String::new(),
            owner: String::new(),
        })
    }
}

/// Split off `n` whitespace-separated fields and return them with the (untrimmed-inside) rest.
fn split_fields(line: &str, n: usize) -> Option<(Vec<&str>, &str)> {
    let mut fields = Vec::with_capacity(n);
    let mut rest = line.trim_start();
    for _ in 0..n {
        let (field, tail) = rest.split_once(char::is_whitespace)?;
        fields.push(field);
        rest = tail.trim_start();
    }
    let rest = rest.trim_end();
    (!rest.is_empty()).then_some((fields, rest))
}

//! SFTP connector (libssh2 through the `ssh2` crate, password authentication).

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use ssh2::{ErrorCode, Session, Sftp};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{IngestionError, IngestionResult};
use crate::types::{FileMetadata, SourceDescriptor};

use super::{NamePattern, content_type_for, file_name_of, join_remote, parse_remote_address, run_blocking};

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// `LIBSSH2_FX_NO_SUCH_FILE`
const FX_NO_SUCH_FILE: i32 = 2;

#[derive(Clone, PartialEq, Eq)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
    /// Remote working directory; empty means the login directory.
    pub directory: String,
}

impl std::fmt::Debug for SftpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("timeout", &self.timeout)
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

impl SftpConfig {
    /// Options: `SftpServer`, `SftpPort` (22), `SftpUsername` (required), `SftpPassword`,
    /// `SftpTimeoutSeconds` (30).
    pub fn from_source(source: &SourceDescriptor) -> IngestionResult<Self> {
        let target = parse_remote_address(source.address(), &["sftp", "ssh"], source.option_string("SftpServer")?)?;
        let username = source
            .option_string("SftpUsername")?
            .filter(|u| !u.is_empty())
            .ok_or_else(|| IngestionError::invalid_argument("option 'SftpUsername' is required for sftp sources"))?;
        Ok(Self {
            port: source.option_port("SftpPort")?.or(target.port).unwrap_or(DEFAULT_PORT),
            host: target.host,
            username,
            password: source.option_string("SftpPassword")?.unwrap_or_default(),
            timeout: source
                .option_u64("SftpTimeoutSeconds")?
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
            directory: target.directory,
        })
    }

    fn endpoint(&self) -> String {
        format!("sftp://{}@{}:{}", self.username, self.host, self.port)
    }

    fn working_dir(&self) -> &str {
        if self.directory.is_empty() { "." } else { &self.directory }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SftpConnector;

impl SftpConnector {
    pub async fn read(
        &self,
        source: &SourceDescriptor,
        reference: &str,
        cancel: &CancellationToken,
    ) -> IngestionResult<Vec<u8>> {
        let config = SftpConfig::from_source(source)?;
        let path = join_remote(&config.directory, reference);
        let endpoint = config.endpoint();
        let data = run_blocking("sftp read", cancel, {
            let path = path.clone();
            move || {
                with_sftp(&config, |sftp| {
                    let mut file = sftp
                        .open(Path::new(&path))
                        .map_err(|e| map_sftp_error(e, &config, Some(&path)))?;
                    let mut data = Vec::new();
                    file.read_to_end(&mut data)?;
                    Ok(data)
                })
            }
        })
        .await?;
        info!(endpoint = %endpoint, path = %path, bytes = data.len(), "downloaded sftp file");
        Ok(data)
    }

    pub async fn list(
        &self,
        source: &SourceDescriptor,
        pattern: &str,
        cancel: &CancellationToken,
    ) -> IngestionResult<Vec<String>> {
        let config = SftpConfig::from_source(source)?;
        let matcher = NamePattern::new(pattern)?;
        let endpoint = config.endpoint();
        let files = run_blocking("sftp list", cancel, move || {
            with_sftp(&config, |sftp| {
                let dir = config.working_dir();
                let entries = sftp
                    .readdir(Path::new(dir))
                    .map_err(|e| map_sftp_error(e, &config, Some(dir)))?;
                let mut names: Vec<String> = entries
                    .into_iter()
                    .filter(|(_, stat)| stat.is_file())
                    .filter_map(|(path, _)| path.file_name().map(|n| n.to_string_lossy().into_owned()))
                    .filter(|name| matcher.matches(name))
                    .collect();
                // readdir order is server-defined; name order matches the local connector.
                names.sort();
                Ok(names)
            })
        })
        .await?;
        info!(endpoint = %endpoint, pattern, count = files.len(), "listed sftp directory");
        Ok(files)
    }

    pub(crate) async fn probe(&self, source: &SourceDescriptor, cancel: &CancellationToken) -> IngestionResult<()> {
        let config = SftpConfig::from_source(source)?;
        run_blocking("sftp test", cancel, move || {
            with_sftp(&config, |sftp| {
                let dir = config.working_dir();
                sftp.stat(Path::new(dir))
                    .map(|_| ())
                    .map_err(|e| map_sftp_error(e, &config, Some(dir)))
            })
        })
        .await
    }

    pub async fn describe(
        &self,
        source: &SourceDescriptor,
        reference: &str,
        cancel: &CancellationToken,
    ) -> IngestionResult<FileMetadata> {
        let config = SftpConfig::from_source(source)?;
        let path = join_remote(&config.directory, reference);
        run_blocking("sftp describe", cancel, move || {
            with_sftp(&config, |sftp| {
                let stat = sftp
                    .stat(Path::new(&path))
                    .map_err(|e| map_sftp_error(e, &config, Some(&path)))?;
                if !stat.is_file() {
                    return Err(IngestionError::not_found(&path));
                }

                let name = file_name_of(&path).to_string();
                let mut meta = FileMetadata {
                    path: path.clone(),
                    content_type: content_type_for(&name).to_string(),
                    name,
                    size_bytes: stat.size.unwrap_or(0),
                    last_modified_utc: stat
                        .mtime
                        .and_then(|t| DateTime::<Utc>::from_timestamp(t as i64, 0))
                        .unwrap_or_else(Utc::now),
                    created_utc: None,
                    extra: Default::default(),
                };
                if let Some(perm) = stat.perm {
                    meta.extra.insert("SftpPermissions".to_string(), format!("{:o}", perm & 0o7777));
                }
                if let Some(uid) = stat.uid {
                    meta.extra.insert("SftpUserId".to_string(), uid.to_string());
                }
                Ok(meta)
            })
        })
        .await
    }
}

/// Open an authenticated session, run `op` on its SFTP channel, then disconnect.
fn with_sftp<T>(config: &SftpConfig, op: impl FnOnce(&Sftp) -> IngestionResult<T>) -> IngestionResult<T> {
    let (session, sftp) = connect(config)?;
    let out = op(&sftp);
    drop(sftp);
    if let Err(e) = session.disconnect(None, "done", None) {
        warn!(error = %e, "failed to close sftp session gracefully");
    }
    out
}

fn connect(config: &SftpConfig) -> IngestionResult<(Session, Sftp)> {
    let endpoint = config.endpoint();
    let addr = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| IngestionError::connection(&endpoint, format!("cannot resolve host: {e}")))?
        .next()
        .ok_or_else(|| IngestionError::connection(&endpoint, "host resolved to no addresses"))?;

    debug!(endpoint = %endpoint, "connecting to sftp server");
    let started = Instant::now();
    let tcp = TcpStream::connect_timeout(&addr, config.timeout).map_err(|e| {
        if e.kind() == std::io::ErrorKind::TimedOut {
            IngestionError::Timeout {
                operation: format!("connect {endpoint}"),
                elapsed: started.elapsed(),
            }
        } else {
            IngestionError::connection(&endpoint, e)
        }
    })?;

    let mut session = Session::new().map_err(|e| IngestionError::connection(&endpoint, e))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(u32::try_from(config.timeout.as_millis()).unwrap_or(u32::MAX));
    session
        .handshake()
        .map_err(|e| IngestionError::connection(&endpoint, format!("ssh handshake failed: {e}")))?;
    session
        .userauth_password(&config.username, &config.password)
        .map_err(|e| IngestionError::connection(&endpoint, format!("authentication failed: {e}")))?;
    if !session.authenticated() {
        return Err(IngestionError::connection(&endpoint, "authentication rejected"));
    }
    let sftp = session
        .sftp()
        .map_err(|e| IngestionError::connection(&endpoint, format!("cannot open sftp channel: {e}")))?;
    Ok((session, sftp))
}

fn map_sftp_error(e: ssh2::Error, config: &SftpConfig, path: Option<&str>) -> IngestionError {
    match (e.code(), path) {
        (ErrorCode::SFTP(FX_NO_SUCH_FILE), Some(path)) => IngestionError::not_found(format!("{}{}", config.endpoint(), path)),
        (ErrorCode::Session(-9), _) => IngestionError::Timeout {
            operation: format!("sftp {}", path.unwrap_or_default()),
            elapsed: config.timeout,
        },
        _ => IngestionError::connection(config.endpoint(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::SftpConfig;
    use crate::error::ErrorKind;
    use crate::types::{SourceDescriptor, SourceType};

    #[test]
    fn config_requires_username_and_defaults_port() {
        let src = SourceDescriptor::new(SourceType::Sftp, "sftp://files.example.com/upload");
        assert_eq!(SftpConfig::from_source(&src).unwrap_err().kind(), ErrorKind::InvalidArgument);

        let src = src.with_option("SftpUsername", "etl").with_option("SftpPassword", "s3cret");
        let cfg = SftpConfig::from_source(&src).unwrap();
        assert_eq!((cfg.host.as_str(), cfg.port, cfg.directory.as_str()), ("files.example.com", 22, "/upload"));
        assert!(!format!("{cfg:?}").contains("s3cret"));
    }
}

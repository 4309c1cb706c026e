//! Transport connectors.
//!
//! A [`Connector`] turns a [`SourceDescriptor`] plus a file reference into bytes and
//! [`FileMetadata`]. There is one variant per compiled-in transport:
//!
//! | source type | module | cargo feature |
//! |---|---|---|
//! | `local` | [`local`] | always on |
//! | `ftp` | `ftp` | `ftp` (default), `ftps` for explicit TLS |
//! | `sftp` | `sftp` | `sftp` |
//! | `kafka` | [`kafka`] | `kafka` |
//! | `http` | `http` | `http` (default) |
//!
//! Every operation takes a [`CancellationToken`]. Blocking client libraries run on tokio's
//! blocking pool and are raced against the token, so a cancelled call returns promptly even
//! when the transport is stuck (the abandoned session is dropped once its own socket timeout
//! fires).

#[cfg(feature = "ftp")]
pub mod ftp;
#[cfg(feature = "http")]
pub mod http;
pub mod kafka;
pub mod local;
#[cfg(feature = "sftp")]
pub mod sftp;

use std::path::Path;

use glob::{MatchOptions, Pattern};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{IngestionError, IngestionResult};
use crate::types::{FileMetadata, SourceDescriptor, SourceType};

#[cfg(feature = "ftp")]
pub use ftp::{FtpConfig, FtpConnector};
#[cfg(feature = "http")]
pub use http::{HttpAuth, HttpConfig, HttpConnector};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaConfig, KafkaConnector};
pub use kafka::KafkaReference;
pub use local::{LocalConfig, LocalConnector};
#[cfg(feature = "sftp")]
pub use sftp::{SftpConfig, SftpConnector};

/// One compiled-in transport.
#[derive(Debug, Clone)]
pub enum Connector {
    Local(LocalConnector),
    #[cfg(feature = "ftp")]
    Ftp(FtpConnector),
    #[cfg(feature = "sftp")]
    Sftp(SftpConnector),
    #[cfg(feature = "kafka")]
    Kafka(KafkaConnector),
    #[cfg(feature = "http")]
    Http(HttpConnector),
}

impl Connector {
    pub fn source_type(&self) -> SourceType {
        match self {
            Self::Local(_) => SourceType::Local,
            #[cfg(feature = "ftp")]
            Self::Ftp(_) => SourceType::Ftp,
            #[cfg(feature = "sftp")]
            Self::Sftp(_) => SourceType::Sftp,
            #[cfg(feature = "kafka")]
            Self::Kafka(_) => SourceType::Kafka,
            #[cfg(feature = "http")]
            Self::Http(_) => SourceType::Http,
        }
    }

    /// Fetch the full content of one file.
    pub async fn read(
        &self,
        source: &SourceDescriptor,
        reference: &str,
        cancel: &CancellationToken,
    ) -> IngestionResult<Vec<u8>> {
        self.precheck(source, "read", cancel)?;
        match self {
            Self::Local(c) => c.read(source, reference, cancel).await,
            #[cfg(feature = "ftp")]
            Self::Ftp(c) => c.read(source, reference, cancel).await,
            #[cfg(feature = "sftp")]
            Self::Sftp(c) => c.read(source, reference, cancel).await,
            #[cfg(feature = "kafka")]
            Self::Kafka(c) => c.read(source, reference, cancel).await,
            #[cfg(feature = "http")]
            Self::Http(c) => c.read(source, reference, cancel).await,
        }
    }

    /// References of the files at the source whose name matches `pattern`.
    ///
    /// `pattern` is a case-insensitive glob; `*` and `*.*` match everything.
    pub async fn list(
        &self,
        source: &SourceDescriptor,
        pattern: &str,
        cancel: &CancellationToken,
    ) -> IngestionResult<Vec<String>> {
        self.precheck(source, "list", cancel)?;
        match self {
            Self::Local(c) => c.list(source, pattern, cancel).await,
            #[cfg(feature = "ftp")]
            Self::Ftp(c) => c.list(source, pattern, cancel).await,
            #[cfg(feature = "sftp")]
            Self::Sftp(c) => c.list(source, pattern, cancel).await,
            #[cfg(feature = "kafka")]
            Self::Kafka(c) => c.list(source, pattern, cancel).await,
            #[cfg(feature = "http")]
            Self::Http(c) => c.list(source, pattern, cancel).await,
        }
    }

    /// Whether the source is reachable with its configured credentials.
    ///
    /// Never fails: every problem (including a bad descriptor) is logged and reported as `false`.
    pub async fn test(&self, source: &SourceDescriptor, cancel: &CancellationToken) -> bool {
        let result = match self.precheck(source, "test", cancel) {
            Err(e) => Err(e),
            Ok(()) => match self {
                Self::Local(c) => c.probe(source, cancel).await,
                #[cfg(feature = "ftp")]
                Self::Ftp(c) => c.probe(source, cancel).await,
                #[cfg(feature = "sftp")]
                Self::Sftp(c) => c.probe(source, cancel).await,
                #[cfg(feature = "kafka")]
                Self::Kafka(c) => c.probe(source, cancel).await,
                #[cfg(feature = "http")]
                Self::Http(c) => c.probe(source, cancel).await,
            },
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    source_type = %self.source_type(),
                    address = source.address(),
                    error = %e,
                    "connection test failed"
                );
                false
            }
        }
    }

    /// Metadata for one file, without reading its content.
    pub async fn describe(
        &self,
        source: &SourceDescriptor,
        reference: &str,
        cancel: &CancellationToken,
    ) -> IngestionResult<FileMetadata> {
        self.precheck(source, "describe", cancel)?;
        match self {
            Self::Local(c) => c.describe(source, reference, cancel).await,
            #[cfg(feature = "ftp")]
            Self::Ftp(c) => c.describe(source, reference, cancel).await,
            #[cfg(feature = "sftp")]
            Self::Sftp(c) => c.describe(source, reference, cancel).await,
            #[cfg(feature = "kafka")]
            Self::Kafka(c) => c.describe(source, reference, cancel).await,
            #[cfg(feature = "http")]
            Self::Http(c) => c.describe(source, reference, cancel).await,
        }
    }

    fn precheck(&self, source: &SourceDescriptor, operation: &str, cancel: &CancellationToken) -> IngestionResult<()> {
        if cancel.is_cancelled() {
            return Err(IngestionError::cancelled(format!("{} {operation}", self.source_type())));
        }
        if source.source_type() != self.source_type() {
            return Err(IngestionError::invalid_argument(format!(
                "{} connector cannot serve a '{}' source",
                self.source_type(),
                source.source_type()
            )));
        }
        Ok(())
    }
}

/// Immutable lookup from source type to connector.
#[derive(Debug, Clone)]
pub struct ConnectorRegistry {
    connectors: Vec<Connector>,
}

impl ConnectorRegistry {
    /// One instance of every connector enabled by the current cargo features.
    ///
    /// Fails only if a shared client cannot be initialized (e.g. the HTTP TLS backend).
    pub fn builtin() -> IngestionResult<Self> {
        let mut connectors = vec![Connector::Local(LocalConnector)];
        #[cfg(feature = "ftp")]
        connectors.push(Connector::Ftp(FtpConnector));
        #[cfg(feature = "sftp")]
        connectors.push(Connector::Sftp(SftpConnector));
        #[cfg(feature = "kafka")]
        connectors.push(Connector::Kafka(KafkaConnector));
        #[cfg(feature = "http")]
        connectors.push(Connector::Http(HttpConnector::new()?));
        Ok(Self { connectors })
    }

    pub fn source_types(&self) -> impl Iterator<Item = SourceType> + '_ {
        self.connectors.iter().map(Connector::source_type)
    }

    /// Connector for a source-type tag such as `"ftp"` (case-insensitive).
    pub fn resolve(&self, tag: &str) -> IngestionResult<&Connector> {
        self.resolve_type(tag.parse()?)
    }

    pub fn resolve_type(&self, source_type: SourceType) -> IngestionResult<&Connector> {
        self.connectors
            .iter()
            .find(|c| c.source_type() == source_type)
            .ok_or_else(|| {
                IngestionError::UnsupportedSourceType(format!(
                    "{source_type} (enable cargo feature '{source_type}')"
                ))
            })
    }
}

/// Case-insensitive file-name glob.
#[derive(Debug, Clone)]
pub struct NamePattern {
    pattern: Option<Pattern>,
}

const NAME_MATCH: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

impl NamePattern {
    /// `*`, `*.*` and the empty pattern match every name.
    pub fn new(pattern: &str) -> IngestionResult<Self> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() || trimmed == "*" || trimmed == "*.*" {
            return Ok(Self { pattern: None });
        }
        Pattern::new(trimmed)
            .map(|p| Self { pattern: Some(p) })
            .map_err(|e| IngestionError::invalid_argument(format!("invalid glob pattern '{pattern}': {e}")))
    }

    pub fn matches(&self, name: &str) -> bool {
        match &self.pattern {
            Some(p) => p.matches_with(name, NAME_MATCH),
            None => true,
        }
    }
}

/// MIME type inferred from a file name's extension.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("csv") => "text/csv",
        Some("txt") => "text/plain",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("xls") => "application/vnd.ms-excel",
        _ => "application/octet-stream",
    }
}

/// Last `/`-separated segment of a remote path or URL path.
pub(crate) fn file_name_of(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Run a blocking client call on tokio's blocking pool, racing it against `cancel`.
pub(crate) async fn run_blocking<T, F>(operation: &str, cancel: &CancellationToken, f: F) -> IngestionResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> IngestionResult<T> + Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(IngestionError::cancelled(operation));
    }
    let task = tokio::task::spawn_blocking(f);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(IngestionError::cancelled(operation)),
        joined = task => match joined {
            Ok(result) => result,
            Err(e) => Err(IngestionError::connection(operation, format!("blocking task failed: {e}"))),
        },
    }
}

/// Host, optional port and working directory of an FTP/SFTP source.
#[cfg(any(feature = "ftp", feature = "sftp"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RemoteTarget {
    pub host: String,
    pub port: Option<u16>,
    /// Empty means the login directory.
    pub directory: String,
}

/// Interpret a descriptor address for FTP/SFTP.
///
/// Accepted shapes: `scheme://host[:port]/dir`, `host[:port][/dir]`, or (when a server option
/// is set) just the remote directory.
#[cfg(any(feature = "ftp", feature = "sftp"))]
pub(crate) fn parse_remote_address(
    address: &str,
    schemes: &[&str],
    server: Option<String>,
) -> IngestionResult<RemoteTarget> {
    let address = address.trim();
    if address.contains("://") {
        let url = url::Url::parse(address)
            .map_err(|e| IngestionError::invalid_argument(format!("invalid address '{address}': {e}")))?;
        if !schemes.contains(&url.scheme()) {
            return Err(IngestionError::invalid_argument(format!(
                "address '{address}' must use one of the schemes {schemes:?}"
            )));
        }
        let host = match server {
            Some(s) => s,
            None => url
                .host_str()
                .ok_or_else(|| IngestionError::invalid_argument(format!("address '{address}' has no host")))?
                .to_string(),
        };
        return Ok(RemoteTarget {
            host,
            port: url.port(),
            directory: url.path().to_string(),
        });
    }

    if let Some(host) = server {
        return Ok(RemoteTarget {
            host,
            port: None,
            directory: address.to_string(),
        });
    }

    let (authority, directory) = match address.find('/') {
        Some(idx) => (&address[..idx], address[idx..].to_string()),
        None => (address, String::new()),
    };
    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) => {
            let port = p
                .parse::<u16>()
                .map_err(|_| IngestionError::invalid_argument(format!("invalid port in address '{address}'")))?;
            (h.to_string(), Some(port))
        }
        None => (authority.to_string(), None),
    };
    if host.is_empty() {
        return Err(IngestionError::invalid_argument(format!(
            "address '{address}' has no host (set the server option or use scheme://host/dir)"
        )));
    }
    Ok(RemoteTarget { host, port, directory })
}

/// Resolve a reference against a remote working directory. Absolute references pass through.
#[cfg(any(feature = "ftp", feature = "sftp"))]
pub(crate) fn join_remote(directory: &str, reference: &str) -> String {
    if reference.starts_with('/') || directory.is_empty() {
        reference.to_string()
    } else {
        format!("{}/{}", directory.trim_end_matches('/'), reference)
    }
}

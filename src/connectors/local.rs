//! Local filesystem connector.
//!
//! `address` is a directory. References are paths relative to it (absolute paths are used
//! as-is).

use std::fs::{self, File, TryLockError};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{IngestionError, IngestionResult};
use crate::types::{FileMetadata, SourceDescriptor};

use super::{NamePattern, content_type_for, run_blocking};

/// Options understood by the local connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalConfig {
    pub root: PathBuf,
    /// `LocalRecursive` (default `false`): walk subdirectories and return relative paths.
    pub recursive: bool,
}

impl LocalConfig {
    pub fn from_source(source: &SourceDescriptor) -> IngestionResult<Self> {
        Ok(Self {
            root: PathBuf::from(source.address()),
            recursive: source.option_bool("LocalRecursive")?.unwrap_or(false),
        })
    }

    fn resolve(&self, reference: &str) -> PathBuf {
        self.root.join(reference)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalConnector;

impl LocalConnector {
    pub async fn read(
        &self,
        source: &SourceDescriptor,
        reference: &str,
        cancel: &CancellationToken,
    ) -> IngestionResult<Vec<u8>> {
        let path = LocalConfig::from_source(source)?.resolve(reference);
        let reference = reference.to_string();
        let data = run_blocking("local read", cancel, move || read_locked(&path, &reference)).await?;
        info!(address = source.address(), bytes = data.len(), "read local file");
        Ok(data)
    }

    pub async fn list(
        &self,
        source: &SourceDescriptor,
        pattern: &str,
        cancel: &CancellationToken,
    ) -> IngestionResult<Vec<String>> {
        let config = LocalConfig::from_source(source)?;
        let matcher = NamePattern::new(pattern)?;
        let files = run_blocking("local list", cancel, move || list_files(&config, &matcher)).await?;
        info!(address = source.address(), pattern, count = files.len(), "listed local files");
        Ok(files)
    }

    pub(crate) async fn probe(&self, source: &SourceDescriptor, cancel: &CancellationToken) -> IngestionResult<()> {
        let config = LocalConfig::from_source(source)?;
        run_blocking("local test", cancel, move || {
            fs::read_dir(&config.root)?;
            Ok(())
        })
        .await
    }

    pub async fn describe(
        &self,
        source: &SourceDescriptor,
        reference: &str,
        cancel: &CancellationToken,
    ) -> IngestionResult<FileMetadata> {
        let path = LocalConfig::from_source(source)?.resolve(reference);
        let reference = reference.to_string();
        run_blocking("local describe", cancel, move || describe_file(&path, &reference)).await
    }
}

fn map_open_error(e: io::Error, reference: &str) -> IngestionError {
    if e.kind() == io::ErrorKind::NotFound {
        IngestionError::not_found(reference)
    } else {
        IngestionError::Io(e)
    }
}

/// Read the whole file under a shared lock, failing if a writer holds it exclusively.
fn read_locked(path: &Path, reference: &str) -> IngestionResult<Vec<u8>> {
    let meta = fs::metadata(path).map_err(|e| map_open_error(e, reference))?;
    if !meta.is_file() {
        return Err(IngestionError::not_found(reference));
    }
    let mut file = File::open(path).map_err(|e| map_open_error(e, reference))?;
    match file.try_lock_shared() {
        Ok(()) => {}
        Err(TryLockError::WouldBlock) => {
            return Err(IngestionError::connection(
                path.display().to_string(),
                "file is locked by another writer",
            ));
        }
        Err(TryLockError::Error(e)) if e.kind() == io::ErrorKind::Unsupported => {
            debug!(path = %path.display(), "advisory locks unsupported here; reading unlocked");
        }
        Err(TryLockError::Error(e)) => return Err(e.into()),
    }

    let mut data = Vec::with_capacity(meta.len() as usize);
    file.read_to_end(&mut data)?;
    Ok(data)
}

fn list_files(config: &LocalConfig, matcher: &NamePattern) -> IngestionResult<Vec<String>> {
    if !config.root.is_dir() {
        debug!(root = %config.root.display(), "directory does not exist; nothing to list");
        return Ok(Vec::new());
    }

    // Name order, so repeated listings of an unchanged directory agree.
    let mut walker = WalkDir::new(&config.root)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    if !config.recursive {
        walker = walker.max_depth(1);
    }

    let mut out = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) if e.depth() == 0 => {
                return Err(e
                    .into_io_error()
                    .map(IngestionError::Io)
                    .unwrap_or_else(|| IngestionError::connection(config.root.display().to_string(), "cannot read directory")));
            }
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if !matcher.matches(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let relative = entry.path().strip_prefix(&config.root).unwrap_or(entry.path());
        out.push(relative.to_string_lossy().replace('\\', "/"));
    }
    Ok(out)
}

fn describe_file(path: &Path, reference: &str) -> IngestionResult<FileMetadata> {
    let meta = fs::metadata(path).map_err(|e| map_open_error(e, reference))?;
    if !meta.is_file() {
        return Err(IngestionError::not_found(reference));
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| reference.to_string());

    Ok(FileMetadata {
        path: path.display().to_string(),
        content_type: content_type_for(&name).to_string(),
        name,
        size_bytes: meta.len(),
        last_modified_utc: meta.modified().map(DateTime::<Utc>::from)?,
        created_utc: meta.created().ok().map(DateTime::<Utc>::from),
        extra: Default::default(),
    })
}

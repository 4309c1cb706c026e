use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{error, info, warn};

use crate::error::{ErrorKind, IngestionError};
use crate::types::SourceType;

use super::unified::IngestionFormat;

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IngestionSeverity {
    /// Informational event.
    Info,
    /// Warning-level event (non-fatal).
    Warning,
    /// Error-level event (operation failed).
    Error,
    /// Critical error (transport, timeout or local I/O failures).
    Critical,
}

impl IngestionSeverity {
    /// Severity assigned to a failed ingestion.
    ///
    /// Infrastructure failures are `Critical`; bad data and bad requests are `Error`;
    /// cancellation is a `Warning` since the caller asked for it.
    pub fn for_error(e: &IngestionError) -> Self {
        match e.kind() {
            ErrorKind::Connection | ErrorKind::Timeout => Self::Critical,
            ErrorKind::Cancelled => Self::Warning,
            ErrorKind::NotFound
            | ErrorKind::Format
            | ErrorKind::InvalidArgument
            | ErrorKind::UnsupportedSourceType
            | ErrorKind::UnsupportedFormat => Self::Error,
        }
    }
}

/// Context about one ingestion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionContext {
    pub source_type: SourceType,
    /// Descriptor address (directory, host, topic or base URL).
    pub address: String,
    /// File reference within the source.
    pub reference: String,
    /// Format used for conversion; `None` when the attempt failed before one was resolved.
    pub format: Option<IngestionFormat>,
}

impl fmt::Display for IngestionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{} ref={}", self.source_type, self.address, self.reference)?;
        if let Some(format) = self.format {
            write!(f, " format={format}")?;
        }
        Ok(())
    }
}

/// Minimal stats reported on successful ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionStats {
    /// Raw bytes read from the source.
    pub bytes_read: u64,
    /// Length of the canonical JSON output.
    pub json_bytes: u64,
    /// Top-level records in the output (array length, or 1 for a non-array document).
    pub records: usize,
}

/// Observer interface for ingestion outcomes.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait IngestionObserver: Send + Sync {
    /// Called when ingestion succeeds.
    fn on_success(&self, _ctx: &IngestionContext, _stats: IngestionStats) {}

    /// Called when ingestion fails.
    fn on_failure(&self, _ctx: &IngestionContext, _severity: IngestionSeverity, _error: &IngestionError) {}

    /// Called when an ingestion failure meets an alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.on_failure(ctx, severity, error)
    }
}

/// An observer that fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn IngestionObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn IngestionObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl IngestionObserver for CompositeObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: IngestionStats) {
        for o in &self.observers {
            o.on_success(ctx, stats);
        }
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        for o in &self.observers {
            o.on_failure(ctx, severity, error);
        }
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        for o in &self.observers {
            o.on_alert(ctx, severity, error);
        }
    }
}

/// Emits ingestion events as `tracing` events (target `ingest`).
#[derive(Debug, Default)]
pub struct TracingObserver;

impl IngestionObserver for TracingObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: IngestionStats) {
        info!(
            target: "ingest",
            source_type = %ctx.source_type,
            address = %ctx.address,
            reference = %ctx.reference,
            format = ?ctx.format,
            bytes_read = stats.bytes_read,
            records = stats.records,
            "ingested file"
        );
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        warn!(
            target: "ingest",
            ?severity,
            source_type = %ctx.source_type,
            address = %ctx.address,
            reference = %ctx.reference,
            format = ?ctx.format,
            error = %error,
            "ingestion failed"
        );
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        error!(
            target: "ingest",
            alert = true,
            ?severity,
            source_type = %ctx.source_type,
            address = %ctx.address,
            reference = %ctx.reference,
            error = %error,
            "ingestion alert"
        );
    }
}

/// Appends ingestion events to a local log file.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    /// Create a file observer that appends events to `path`.
    ///
    /// Writes are best-effort; failures to open/write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().ok();
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{line}");
        }
    }
}

impl IngestionObserver for FileObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: IngestionStats) {
        self.append_line(&format!(
            "{} ok {} bytes={} records={}",
            Utc::now().to_rfc3339(),
            ctx,
            stats.bytes_read,
            stats.records
        ));
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.append_line(&format!(
            "{} fail severity={:?} {} err={}",
            Utc::now().to_rfc3339(),
            severity,
            ctx,
            error
        ));
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.append_line(&format!(
            "{} ALERT severity={:?} {} err={}",
            Utc::now().to_rfc3339(),
            severity,
            ctx,
            error
        ));
    }
}

//! Read → describe → detect → convert, for one file or every file matching a pattern.
//!
//! ```no_run
//! use rust_data_ingestion::pipeline::IngestionPipeline;
//! use rust_data_ingestion::types::{SourceDescriptor, SourceType};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), rust_data_ingestion::IngestionError> {
//! let pipeline = IngestionPipeline::builtin()?;
//! let source = SourceDescriptor::new(SourceType::Local, "/data/incoming");
//!
//! for outcome in pipeline.ingest_matching(&source, "*.csv", &CancellationToken::new()).await? {
//!     match outcome.result {
//!         Ok(file) => println!("{} -> {} bytes of JSON", outcome.reference, file.json.len()),
//!         Err(e) => eprintln!("{} failed: {e}", outcome.reference),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use serde::de::{Deserialize, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::connectors::{ConnectorRegistry, run_blocking};
use crate::error::{IngestionError, IngestionResult};
use crate::ingestion::observability::{IngestionContext, IngestionObserver, IngestionSeverity, IngestionStats};
use crate::ingestion::unified::{ConversionHints, ConverterRegistry, IngestionFormat};
use crate::types::{ConversionMetadata, FileMetadata, SourceDescriptor};

/// Options controlling pipeline behavior.
///
/// Use [`Default`] for common cases.
#[derive(Clone)]
pub struct IngestionOptions {
    /// If `None`, the format is sniffed from the content.
    pub format: Option<IngestionFormat>,
    /// Encoding / delimiter hints forwarded to the converter.
    pub hints: ConversionHints,
    /// Optional observer for logging/alerts.
    pub observer: Option<Arc<dyn IngestionObserver>>,
    /// Severity threshold at which `on_alert` is invoked.
    pub alert_at_or_above: IngestionSeverity,
}

impl fmt::Debug for IngestionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionOptions")
            .field("format", &self.format)
            .field("hints", &self.hints)
            .field("observer_set", &self.observer.is_some())
            .field("alert_at_or_above", &self.alert_at_or_above)
            .finish()
    }
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            format: None,
            hints: ConversionHints::default(),
            observer: None,
            alert_at_or_above: IngestionSeverity::Critical,
        }
    }
}

/// One successfully ingested file.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestedFile {
    pub reference: String,
    pub format: IngestionFormat,
    /// Canonical JSON.
    pub json: String,
    pub bytes_read: u64,
    pub file_metadata: FileMetadata,
    pub conversion_metadata: ConversionMetadata,
}

/// Per-file result of a batch ingestion.
#[derive(Debug)]
pub struct FileOutcome {
    pub reference: String,
    pub result: IngestionResult<IngestedFile>,
}

impl FileOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Stateless orchestrator over a connector registry and a converter registry.
///
/// Cheap to clone; the registries are shared.
#[derive(Clone)]
pub struct IngestionPipeline {
    connectors: Arc<ConnectorRegistry>,
    converters: Arc<ConverterRegistry>,
    options: IngestionOptions,
}

impl fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("source_types", &self.connectors.source_types().collect::<Vec<_>>())
            .field("formats", &self.converters.formats().collect::<Vec<_>>())
            .field("options", &self.options)
            .finish()
    }
}

impl IngestionPipeline {
    pub fn new(connectors: ConnectorRegistry, converters: ConverterRegistry) -> Self {
        Self {
            connectors: Arc::new(connectors),
            converters: Arc::new(converters),
            options: IngestionOptions::default(),
        }
    }

    /// Pipeline over every compiled-in connector and converter.
    pub fn builtin() -> IngestionResult<Self> {
        Ok(Self::new(ConnectorRegistry::builtin()?, ConverterRegistry::builtin()))
    }

    pub fn with_options(mut self, options: IngestionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &IngestionOptions {
        &self.options
    }

    pub fn connectors(&self) -> &ConnectorRegistry {
        &self.connectors
    }

    pub fn converters(&self) -> &ConverterRegistry {
        &self.converters
    }

    /// Ingest one file.
    ///
    /// When an observer is configured, this reports:
    ///
    /// - `on_success` on success, with byte/record stats
    /// - `on_failure` on failure, with a computed severity
    /// - `on_alert` on failure when the computed severity is >= `options.alert_at_or_above`
    #[instrument(level = "debug", skip_all, fields(source_type = %source.source_type(), reference = %reference))]
    pub async fn ingest_file(
        &self,
        source: &SourceDescriptor,
        reference: &str,
        cancel: &CancellationToken,
    ) -> IngestionResult<IngestedFile> {
        let mut ctx = IngestionContext {
            source_type: source.source_type(),
            address: source.address().to_string(),
            reference: reference.to_string(),
            format: self.options.format,
        };

        let result = self.ingest_file_inner(source, reference, cancel, &mut ctx).await;

        if let Some(obs) = self.options.observer.as_ref() {
            match &result {
                Ok(file) => obs.on_success(
                    &ctx,
                    IngestionStats {
                        bytes_read: file.bytes_read,
                        json_bytes: file.json.len() as u64,
                        records: count_records(&file.json),
                    },
                ),
                Err(e) => {
                    let sev = IngestionSeverity::for_error(e);
                    obs.on_failure(&ctx, sev, e);
                    if sev >= self.options.alert_at_or_above {
                        obs.on_alert(&ctx, sev, e);
                    }
                }
            }
        }

        result
    }

    async fn ingest_file_inner(
        &self,
        source: &SourceDescriptor,
        reference: &str,
        cancel: &CancellationToken,
        ctx: &mut IngestionContext,
    ) -> IngestionResult<IngestedFile> {
        let connector = self.connectors.resolve_type(source.source_type())?;
        let data = connector.read(source, reference, cancel).await?;
        let file_metadata = connector.describe(source, reference, cancel).await?;
        let bytes_read = data.len() as u64;

        let converter = match self.options.format {
            Some(format) => self.converters.resolve_format(format)?.clone(),
            None => self
                .converters
                .detect_with(&mut Cursor::new(data.as_slice()), &self.options.hints)?
                .clone(),
        };
        let format = converter.format();
        ctx.format = Some(format);
        debug!(%format, bytes_read, "converting");

        let hints = self.options.hints.clone();
        let (json, conversion_metadata) = run_blocking("convert", cancel, move || {
            let mut stream = Cursor::new(data);
            let metadata = converter.extract_metadata_with(&mut stream, &hints)?;
            let json = converter.convert(&mut stream, &hints)?;
            Ok((json, metadata))
        })
        .await?;

        Ok(IngestedFile {
            reference: reference.to_string(),
            format,
            json,
            bytes_read,
            file_metadata,
            conversion_metadata,
        })
    }

    /// List the source and ingest every matching file, one after another.
    ///
    /// Listing failures fail the whole call; per-file failures are reported in the returned
    /// outcomes and never stop the remaining files. Use
    /// [`crate::execution::ExecutionEngine`] to ingest with bounded concurrency instead.
    pub async fn ingest_matching(
        &self,
        source: &SourceDescriptor,
        pattern: &str,
        cancel: &CancellationToken,
    ) -> IngestionResult<Vec<FileOutcome>> {
        let references = self.list(source, pattern, cancel).await?;
        let mut outcomes = Vec::with_capacity(references.len());
        for reference in references {
            let result = if cancel.is_cancelled() {
                Err(IngestionError::cancelled(format!("ingest {reference}")))
            } else {
                self.ingest_file(source, &reference, cancel).await
            };
            outcomes.push(FileOutcome { reference, result });
        }
        Ok(outcomes)
    }

    pub async fn list(
        &self,
        source: &SourceDescriptor,
        pattern: &str,
        cancel: &CancellationToken,
    ) -> IngestionResult<Vec<String>> {
        self.connectors
            .resolve_type(source.source_type())?
            .list(source, pattern, cancel)
            .await
    }
}

/// Number of top-level records: the array length, or 1 for any other JSON document.
pub fn count_records(json: &str) -> usize {
    serde_json::from_str::<TopLevelCount>(json).map(|c| c.0).unwrap_or(0)
}

struct TopLevelCount(usize);

impl<'de> Deserialize<'de> for TopLevelCount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CountVisitor;

        impl<'de> Visitor<'de> for CountVisitor {
            type Value = usize;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("any JSON value")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<usize, A::Error> {
                let mut n = 0;
                while seq.next_element::<IgnoredAny>()?.is_some() {
                    n += 1;
                }
                Ok(n)
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<usize, A::Error> {
                while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
                Ok(1)
            }

            fn visit_bool<E>(self, _: bool) -> Result<usize, E> {
                Ok(1)
            }

            fn visit_i64<E>(self, _: i64) -> Result<usize, E> {
                Ok(1)
            }

            fn visit_u64<E>(self, _: u64) -> Result<usize, E> {
                Ok(1)
            }

            fn visit_f64<E>(self, _: f64) -> Result<usize, E> {
                Ok(1)
            }

            fn visit_str<E>(self, _: &str) -> Result<usize, E> {
                Ok(1)
            }

            fn visit_unit<E>(self) -> Result<usize, E> {
                Ok(1)
            }
        }

        deserializer.deserialize_any(CountVisitor).map(TopLevelCount)
    }
}

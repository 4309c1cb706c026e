//! `rust-data-ingestion` pulls files from heterogeneous sources and normalizes them into
//! canonical JSON, together with provenance metadata about where each file came from and what
//! was inside it.
//!
//! The primary entrypoint is [`pipeline::IngestionPipeline`], which reads a file through a
//! [`connectors::Connector`], sniffs its format (or uses a forced one from
//! [`pipeline::IngestionOptions`]) and converts it with an [`ingestion::Converter`].
//!
//! ## Sources
//!
//! Selected by [`types::SourceType`] on a [`types::SourceDescriptor`]:
//!
//! - **Local**: a directory on disk (always available)
//! - **FTP**: feature `ftp` (default), explicit FTPS with `ftps`
//! - **SFTP**: feature `sftp` (libssh2)
//! - **Kafka**: feature `kafka` (librdkafka); references are `topic:partition:offset`
//! - **HTTP(S)**: feature `http` (default)
//!
//! Connector settings travel as named options on the descriptor (`FtpUsername`, `HttpAuthType`,
//! `KafkaBootstrapServers`, ...). A source type whose feature is not compiled in resolves to
//! [`IngestionError::UnsupportedSourceType`].
//!
//! ## Formats
//!
//! Detection tries JSON, XML, CSV, then Excel:
//!
//! - **JSON**: passed through after validation (BOM stripped)
//! - **XML**: element tree → nested objects; repeated sibling tags become arrays
//! - **CSV**: array of objects keyed by header, all values as strings
//! - **Excel** (feature `excel`): first worksheet as an array of objects with typed cells
//!
//! ## Quick example
//!
//! ```no_run
//! use rust_data_ingestion::pipeline::IngestionPipeline;
//! use rust_data_ingestion::types::{SourceDescriptor, SourceType};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), rust_data_ingestion::IngestionError> {
//! let pipeline = IngestionPipeline::builtin()?;
//! let source = SourceDescriptor::new(SourceType::Ftp, "ftp://ftp.example.com/exports")
//!     .with_option("FtpUsername", "etl")
//!     .with_option("FtpPassword", "secret");
//!
//! let file = pipeline.ingest_file(&source, "orders.csv", &CancellationToken::new()).await?;
//! println!("{} ({}): {}", file.reference, file.format, file.json);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`connectors`]: per-transport read/list/describe/test and the connector registry
//! - [`ingestion`]: format converters, detection and ingestion observers
//! - [`pipeline`]: single-file and pattern-based ingestion
//! - [`execution`]: concurrent batch ingestion with throttling and metrics
//! - [`types`]: source descriptors and metadata records
//! - [`error`]: error taxonomy shared by every operation

pub mod connectors;
pub mod error;
pub mod execution;
pub mod ingestion;
pub mod pipeline;
pub mod types;

pub use error::{ErrorKind, IngestionError, IngestionResult};

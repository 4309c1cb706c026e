//! Execution engine for batch ingestion with bounded file-level concurrency.
//!
//! This module sits "above" [`crate::pipeline`] and provides:
//!
//! - Concurrent ingestion of many references from one source
//! - Throttling via a cap on in-flight files
//! - Real-time metrics + observer hooks for monitoring

mod observer;
mod semaphore;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{IngestionError, IngestionResult};
use crate::pipeline::{FileOutcome, IngestionPipeline};
use crate::types::SourceDescriptor;

pub use observer::{
    ExecutionEvent, ExecutionMetrics, ExecutionMetricsSnapshot, ExecutionObserver, TracingExecutionObserver,
};

use semaphore::Throttle;

/// Configuration for the [`ExecutionEngine`].
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Upper bound on files being read or converted at the same time.
    pub max_in_flight_files: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        let n = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            max_in_flight_files: n.max(1),
        }
    }
}

/// Runs an [`IngestionPipeline`] over many references concurrently.
pub struct ExecutionEngine {
    opts: ExecutionOptions,
    observer: Option<Arc<dyn ExecutionObserver>>,
    metrics: Arc<ExecutionMetrics>,
}

impl ExecutionEngine {
    /// Create a new engine with the given options.
    ///
    /// # Panics
    ///
    /// Panics if `max_in_flight_files == 0`.
    pub fn new(opts: ExecutionOptions) -> Self {
        assert!(opts.max_in_flight_files > 0, "max_in_flight_files must be > 0");
        Self {
            opts,
            observer: None,
            metrics: Arc::new(ExecutionMetrics::new()),
        }
    }

    /// Attach an observer for execution events (metrics/logging).
    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get a handle to real-time execution metrics.
    pub fn metrics(&self) -> Arc<ExecutionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Ingest every reference, at most `max_in_flight_files` at a time.
    ///
    /// Outcomes are returned in the order of `references`. Files still waiting for a slot when
    /// `cancel` fires fail with [`IngestionError::Cancelled`] without touching the source.
    pub async fn ingest_all(
        &self,
        pipeline: &IngestionPipeline,
        source: &SourceDescriptor,
        references: Vec<String>,
        cancel: &CancellationToken,
    ) -> Vec<FileOutcome> {
        let start = Instant::now();
        self.metrics.begin_run();
        self.emit(ExecutionEvent::RunStarted {
            files: references.len(),
        });

        let throttle = Throttle::new(self.opts.max_in_flight_files);
        let tasks = references
            .into_iter()
            .map(|reference| self.ingest_one(pipeline, source, reference, &throttle, cancel));
        let outcomes = join_all(tasks).await;

        self.metrics.end_run(start.elapsed());
        self.emit(ExecutionEvent::RunFinished {
            elapsed: start.elapsed(),
            metrics: self.metrics.snapshot(),
        });
        outcomes
    }

    /// List `source` with `pattern`, then [`Self::ingest_all`] the matches.
    pub async fn ingest_matching(
        &self,
        pipeline: &IngestionPipeline,
        source: &SourceDescriptor,
        pattern: &str,
        cancel: &CancellationToken,
    ) -> IngestionResult<Vec<FileOutcome>> {
        let references = pipeline.list(source, pattern, cancel).await?;
        Ok(self.ingest_all(pipeline, source, references, cancel).await)
    }

    async fn ingest_one(
        &self,
        pipeline: &IngestionPipeline,
        source: &SourceDescriptor,
        reference: String,
        throttle: &Throttle,
        cancel: &CancellationToken,
    ) -> FileOutcome {
        let (_permit, waited) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let result = Err(IngestionError::cancelled(format!("ingest {reference}")));
                return FileOutcome { reference, result };
            }
            acquired = throttle.acquire() => acquired,
        };
        if waited > Duration::ZERO {
            self.metrics.on_throttle_wait(waited);
            self.emit(ExecutionEvent::ThrottleWaited { duration: waited });
        }

        self.metrics.on_file_start();
        self.emit(ExecutionEvent::FileStarted {
            reference: reference.clone(),
        });

        let result = pipeline.ingest_file(source, &reference, cancel).await;
        let bytes_read = match &result {
            Ok(file) => {
                self.metrics.on_file_succeeded(file.bytes_read);
                file.bytes_read
            }
            Err(_) => {
                self.metrics.on_file_failed();
                0
            }
        };
        self.emit(ExecutionEvent::FileFinished {
            reference: reference.clone(),
            succeeded: result.is_ok(),
            bytes_read,
        });

        FileOutcome { reference, result }
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}

use std::fs;
use std::sync::{Arc, Mutex};

use rust_data_ingestion::ingestion::{
    CompositeObserver, FileObserver, IngestionContext, IngestionFormat, IngestionObserver, IngestionSeverity, IngestionStats,
};
use rust_data_ingestion::pipeline::{IngestionOptions, IngestionPipeline};
use rust_data_ingestion::types::{SourceDescriptor, SourceType};
use rust_data_ingestion::IngestionError;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingObserver {
    successes: Mutex<Vec<(IngestionContext, IngestionStats)>>,
    failures: Mutex<Vec<IngestionSeverity>>,
    alerts: Mutex<Vec<IngestionSeverity>>,
}

impl IngestionObserver for RecordingObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: IngestionStats) {
        self.successes.lock().unwrap().push((ctx.clone(), stats));
    }

    fn on_failure(&self, _ctx: &IngestionContext, severity: IngestionSeverity, _error: &IngestionError) {
        self.failures.lock().unwrap().push(severity);
    }

    fn on_alert(&self, _ctx: &IngestionContext, severity: IngestionSeverity, _error: &IngestionError) {
        self.alerts.lock().unwrap().push(severity);
    }
}

fn local_dir_with(name: &str, contents: &str) -> (tempfile::TempDir, SourceDescriptor) {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(name), contents).unwrap();
    let source = SourceDescriptor::new(SourceType::Local, dir.path().to_string_lossy());
    (dir, source)
}

fn pipeline_with(obs: Arc<RecordingObserver>, alert_at_or_above: IngestionSeverity) -> IngestionPipeline {
    IngestionPipeline::builtin().unwrap().with_options(IngestionOptions {
        observer: Some(obs),
        alert_at_or_above,
        ..Default::default()
    })
}

#[tokio::test]
async fn observer_receives_success_stats() {
    let (_dir, source) = local_dir_with("people.csv", "id,name\n1,Ada\n2,Grace\n");
    let obs = Arc::new(RecordingObserver::default());
    let pipeline = pipeline_with(obs.clone(), IngestionSeverity::Critical);

    pipeline
        .ingest_file(&source, "people.csv", &CancellationToken::new())
        .await
        .unwrap();

    let successes = obs.successes.lock().unwrap().clone();
    assert_eq!(successes.len(), 1);
    let (ctx, stats) = &successes[0];
    assert_eq!(ctx.reference, "people.csv");
    assert_eq!(ctx.format, Some(IngestionFormat::Csv));
    assert_eq!(stats.records, 2);
    assert_eq!(stats.bytes_read, "id,name\n1,Ada\n2,Grace\n".len() as u64);
    assert!(obs.failures.lock().unwrap().is_empty());
}

#[tokio::test]
async fn observer_receives_failure_without_alert_for_non_critical_error() {
    let (_dir, source) = local_dir_with("people.csv", "id,name\n1,Ada\n");
    let obs = Arc::new(RecordingObserver::default());
    let pipeline = pipeline_with(obs.clone(), IngestionSeverity::Critical);

    // Missing file -> NotFound -> Error severity, below the Critical threshold.
    let _ = pipeline
        .ingest_file(&source, "does_not_exist.csv", &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(obs.failures.lock().unwrap().clone(), vec![IngestionSeverity::Error]);
    assert!(obs.alerts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn lowering_the_threshold_alerts_on_format_errors() {
    let (_dir, source) = local_dir_with("broken.json", "{\"id\": 1,");
    let obs = Arc::new(RecordingObserver::default());
    let pipeline = IngestionPipeline::builtin().unwrap().with_options(IngestionOptions {
        format: Some(IngestionFormat::Json),
        observer: Some(obs.clone()),
        alert_at_or_above: IngestionSeverity::Error,
        ..Default::default()
    });

    let _ = pipeline
        .ingest_file(&source, "broken.json", &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(obs.failures.lock().unwrap().clone(), vec![IngestionSeverity::Error]);
    assert_eq!(obs.alerts.lock().unwrap().clone(), vec![IngestionSeverity::Error]);
}

#[cfg(feature = "ftp")]
#[tokio::test]
async fn observer_receives_failure_and_alert_on_critical_connection_error() {
    // Port 1 on loopback refuses connections.
    let source = SourceDescriptor::new(SourceType::Ftp, "ftp://127.0.0.1:1/")
        .with_option("FtpTimeoutSeconds", 2i64);
    let obs = Arc::new(RecordingObserver::default());
    let pipeline = pipeline_with(obs.clone(), IngestionSeverity::Critical);

    let _ = pipeline
        .ingest_file(&source, "orders.csv", &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(obs.failures.lock().unwrap().clone(), vec![IngestionSeverity::Critical]);
    assert_eq!(obs.alerts.lock().unwrap().clone(), vec![IngestionSeverity::Critical]);
}

#[tokio::test]
async fn file_observer_appends_one_line_per_event() {
    let (dir, source) = local_dir_with("people.csv", "id,name\n1,Ada\n");
    let log = dir.path().join("ingest.log");
    let pipeline = IngestionPipeline::builtin().unwrap().with_options(IngestionOptions {
        observer: Some(Arc::new(FileObserver::new(&log))),
        ..Default::default()
    });

    let cancel = CancellationToken::new();
    pipeline.ingest_file(&source, "people.csv", &cancel).await.unwrap();
    let _ = pipeline.ingest_file(&source, "missing.csv", &cancel).await.unwrap_err();

    let text = fs::read_to_string(&log).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains(" ok ") && lines[0].contains("ref=people.csv") && lines[0].contains("records=1"));
    assert!(lines[1].contains("ref=missing.csv"));
}

#[tokio::test]
async fn composite_observer_fans_out_to_every_member() {
    let (dir, source) = local_dir_with("ok.json", r#"[{"id":1},{"id":2}]"#);
    fs::write(dir.path().join("bad.json"), "{ nope").unwrap();
    let first = Arc::new(RecordingObserver::default());
    let second = Arc::new(RecordingObserver::default());
    let composite = CompositeObserver::new(vec![first.clone(), second.clone()]);

    let pipeline = IngestionPipeline::builtin().unwrap().with_options(IngestionOptions {
        observer: Some(Arc::new(composite)),
        alert_at_or_above: IngestionSeverity::Error,
        ..Default::default()
    });
    let cancel = CancellationToken::new();
    pipeline.ingest_file(&source, "ok.json", &cancel).await.unwrap();
    pipeline.ingest_file(&source, "bad.json", &cancel).await.unwrap_err();

    for obs in [&first, &second] {
        let successes = obs.successes.lock().unwrap().clone();
        assert_eq!(successes.len(), 1);
        assert_eq!(successes[0].0.reference, "ok.json");
        assert_eq!(successes[0].1.records, 2);
        assert_eq!(*obs.alerts.lock().unwrap(), vec![IngestionSeverity::Error]);
    }
}

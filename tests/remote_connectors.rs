//! Remote connectors against endpoints that are guaranteed not to answer.

#[cfg(any(feature = "ftp", feature = "sftp", feature = "kafka"))]
use rust_data_ingestion::ErrorKind;
#[cfg(any(feature = "ftp", feature = "sftp", feature = "kafka"))]
use rust_data_ingestion::connectors::{Connector, ConnectorRegistry};
#[cfg(any(feature = "ftp", feature = "sftp", feature = "kafka"))]
use rust_data_ingestion::types::{SourceDescriptor, SourceType};
#[cfg(any(feature = "ftp", feature = "sftp", feature = "kafka"))]
use tokio_util::sync::CancellationToken;

#[cfg(any(feature = "ftp", feature = "sftp", feature = "kafka"))]
fn connector(tag: &str) -> Connector {
    ConnectorRegistry::builtin().unwrap().resolve(tag).unwrap().clone()
}

#[cfg(feature = "ftp")]
#[tokio::test]
async fn ftp_test_is_false_when_server_unreachable() {
    let src = SourceDescriptor::new(SourceType::Ftp, "ftp://127.0.0.1:1/incoming")
        .with_option("FtpTimeoutSeconds", 2i64);
    assert!(!connector("ftp").test(&src, &CancellationToken::new()).await);
}

#[cfg(feature = "ftp")]
#[tokio::test]
async fn ftp_read_fails_with_connection_error() {
    let src = SourceDescriptor::new(SourceType::Ftp, "127.0.0.1")
        .with_option("FtpPort", 1i64)
        .with_option("FtpTimeoutSeconds", 2i64);
    let err = connector("ftp")
        .read(&src, "orders.csv", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Connection | ErrorKind::Timeout), "{err}");
}

#[cfg(feature = "ftp")]
#[tokio::test]
async fn ftp_mistyped_option_is_invalid_argument() {
    let src = SourceDescriptor::new(SourceType::Ftp, "ftp://127.0.0.1/").with_option("FtpPort", "twenty-one");
    let err = connector("ftp")
        .list(&src, "*", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[cfg(all(feature = "ftp", not(feature = "ftps")))]
#[tokio::test]
async fn ftp_tls_without_feature_is_reported() {
    let src = SourceDescriptor::new(SourceType::Ftp, "ftp://127.0.0.1:1/")
        .with_option("FtpUseSsl", true)
        .with_option("FtpTimeoutSeconds", 2i64);
    let err = connector("ftp")
        .read(&src, "a.csv", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[cfg(feature = "ftp")]
#[tokio::test]
async fn ftp_cancelled_before_start() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let src = SourceDescriptor::new(SourceType::Ftp, "ftp://127.0.0.1:1/");
    let err = connector("ftp").list(&src, "*", &cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}

#[cfg(feature = "sftp")]
#[tokio::test]
async fn sftp_test_is_false_when_server_unreachable() {
    let src = SourceDescriptor::new(SourceType::Sftp, "sftp://127.0.0.1:1/upload")
        .with_option("SftpUsername", "etl")
        .with_option("SftpTimeoutSeconds", 2i64);
    assert!(!connector("sftp").test(&src, &CancellationToken::new()).await);
}

#[cfg(feature = "kafka")]
#[tokio::test]
async fn kafka_rejects_malformed_references_before_connecting() {
    let src = SourceDescriptor::new(SourceType::Kafka, "orders");
    for bad in ["orders", "orders:0", "orders:x:1", "orders:0:-1"] {
        let err = connector("kafka")
            .read(&src, bad, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{bad}");
    }
}

#![cfg(feature = "http")]

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rust_data_ingestion::ErrorKind;
use rust_data_ingestion::connectors::{Connector, ConnectorRegistry};
use rust_data_ingestion::ingestion::IngestionFormat;
use rust_data_ingestion::pipeline::IngestionPipeline;
use rust_data_ingestion::types::{SourceDescriptor, SourceType};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn http_connector() -> Connector {
    ConnectorRegistry::builtin().unwrap().resolve("http").unwrap().clone()
}

fn source(server: &MockServer) -> SourceDescriptor {
    SourceDescriptor::new(SourceType::Http, format!("{}/files/", server.uri()))
}

#[tokio::test]
async fn reads_relative_reference_with_bearer_auth_and_custom_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/orders.json"))
        .and(header("authorization", "Bearer t0ken"))
        .and(header("x-tenant", "acme"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"[{"id":1}]"#))
        .expect(1)
        .mount(&server)
        .await;

    let headers = BTreeMap::from([("X-Tenant".to_string(), "acme".to_string())]);
    let src = source(&server)
        .with_option("HttpAuthType", "Bearer")
        .with_option("HttpBearerToken", "t0ken")
        .with_option("HttpCustomHeaders", headers);

    let body = http_connector()
        .read(&src, "orders.json", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(body, br#"[{"id":1}]"#);
}

#[tokio::test]
async fn basic_auth_is_sent() {
    let server = MockServer::start().await;
    // "etl:pw" base64-encoded.
    Mock::given(method("GET"))
        .and(path("/files/a.csv"))
        .and(header("authorization", "Basic ZXRsOnB3"))
        .respond_with(ResponseTemplate::new(200).set_body_string("id\n1\n"))
        .mount(&server)
        .await;

    let src = source(&server)
        .with_option("HttpAuthType", "basic")
        .with_option("HttpUsername", "etl")
        .with_option("HttpPassword", "pw");
    let body = http_connector()
        .read(&src, "a.csv", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(body, b"id\n1\n");
}

#[tokio::test]
async fn missing_resource_is_not_found_and_server_error_is_connection() {
    let server = MockServer::start().await;
    Mock::given(path("/files/gone.csv"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(path("/files/broken.csv"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let connector = http_connector();
    let cancel = CancellationToken::new();
    let err = connector.read(&source(&server), "gone.csv", &cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = connector.read(&source(&server), "broken.csv", &cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn list_uses_endpoint_and_filters_by_file_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            "2024/a.csv",
            "2024/b.json",
            "https://cdn.example.com/c.CSV",
            "export/d.csv?page=2",
            "export/e.json?as=csv"
        ])))
        .mount(&server)
        .await;

    let src = source(&server).with_option("HttpListEndpoint", "/index");
    let refs = http_connector()
        .list(&src, "*.csv", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        refs,
        vec!["2024/a.csv", "https://cdn.example.com/c.CSV", "export/d.csv?page=2"]
    );
}

#[tokio::test]
async fn cancelling_a_slow_download_returns_promptly() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/slow.csv"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("a,b\n1,2\n")
                .set_delay(Duration::from_secs(60)),
        )
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = http_connector()
        .read(&source(&server), "slow.csv", &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(10), "took {:?}", started.elapsed());
}

#[tokio::test]
async fn list_without_endpoint_returns_the_address() {
    let src = SourceDescriptor::new(SourceType::Http, "https://example.com/export.json");
    let refs = http_connector()
        .list(&src, "*.csv", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(refs, vec!["https://example.com/export.json"]);
}

#[tokio::test]
async fn describe_reads_head_headers() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/files/report.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("x".repeat(42), "application/xml; charset=utf-8")
                .insert_header("last-modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
        )
        .mount(&server)
        .await;

    let meta = http_connector()
        .describe(&source(&server), "report.xml", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(meta.name, "report.xml");
    assert_eq!(meta.size_bytes, 42);
    assert_eq!(meta.content_type, "application/xml");
    assert_eq!(meta.last_modified_utc.to_rfc3339(), "2015-10-21T07:28:00+00:00");
    assert_eq!(meta.created_utc, None);
}

#[tokio::test]
async fn test_checks_base_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let connector = http_connector();
    let cancel = CancellationToken::new();
    assert!(connector.test(&source(&server), &cancel).await);

    let down = SourceDescriptor::new(SourceType::Http, "http://127.0.0.1:1/")
        .with_option("HttpTimeoutSeconds", 2i64);
    assert!(!connector.test(&down, &cancel).await);
}

#[tokio::test]
async fn unknown_auth_type_is_invalid_argument() {
    let src = SourceDescriptor::new(SourceType::Http, "https://example.com/")
        .with_option("HttpAuthType", "kerberos");
    let err = http_connector()
        .read(&src, "a.csv", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn pipeline_ingests_xml_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<feed><entry>a</entry><entry>b</entry></feed>"))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/files/feed.xml"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/xml"))
        .mount(&server)
        .await;

    let pipeline = IngestionPipeline::builtin().unwrap();
    let file = pipeline
        .ingest_file(&source(&server), "feed.xml", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(file.format, IngestionFormat::Xml);
    assert_eq!(file.json, r#"{"entry":["a","b"]}"#);
    assert_eq!(file.file_metadata.content_type, "text/xml");
}

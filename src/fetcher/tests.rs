use super::*;
use crate::types::MetadataValue;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn downloader() -> HttpDownloader {
    HttpDownloader::new(&HttpConfig::default()).unwrap()
}

#[tokio::test]
async fn test_download_streams_body_and_reports_metadata() {
    let server = MockServer::start().await;
    let body: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();

    Mock::given(method("GET"))
        .and(path("/file.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body.clone())
                .insert_header("content-type", "application/octet-stream"),
        )
        .mount(&server)
        .await;

    let mut dest = Vec::new();
    let metadata = downloader()
        .download(&format!("{}/file.bin", server.uri()), &mut dest)
        .await
        .unwrap();

    assert_eq!(dest, body);
    assert_eq!(
        metadata.get(SIZE_METADATA_KEY),
        Some(&MetadataValue::Integer(body.len() as i64))
    );
    assert_eq!(
        metadata
            .get(CONTENT_TYPE_METADATA_KEY)
            .and_then(MetadataValue::as_str),
        Some("application/octet-stream")
    );
}

#[tokio::test]
async fn test_non_success_status_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mut dest = Vec::new();
    let err = downloader()
        .download(&format!("{}/missing", server.uri()), &mut dest)
        .await
        .unwrap_err();

    assert!(err.is_transient());
    match err {
        Error::Download(DownloadError::HttpStatus { status, .. }) => assert_eq!(status, 404),
        other => panic!("expected HttpStatus, got {:?}", other),
    }
    assert!(dest.is_empty());
}

#[tokio::test]
async fn test_invalid_url_makes_no_request() {
    let mut dest = Vec::new();

    for url in ["", "not a url", "ftp://example.com/file"] {
        let err = downloader().download(url, &mut dest).await.unwrap_err();
        assert!(
            matches!(err, Error::Download(DownloadError::InvalidUrl(_))),
            "{:?} should be rejected, got {:?}",
            url,
            err
        );
    }
}

#[tokio::test]
async fn test_request_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let config = HttpConfig {
        request_timeout: Some(Duration::from_millis(200)),
        ..HttpConfig::default()
    };
    let mut dest = Vec::new();
    let err = HttpDownloader::new(&config)
        .unwrap()
        .download(&format!("{}/slow", server.uri()), &mut dest)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Download(DownloadError::Timeout)));
}

#[test]
fn test_registry_lookup() {
    let registry = DownloaderRegistry::with_http(&HttpConfig::default()).unwrap();
    assert!(registry.get(DownloadType::Http).is_some());
    assert!(registry.get(DownloadType::Unsupported(2)).is_none());
    assert!(DownloaderRegistry::new().get(DownloadType::Http).is_none());
}

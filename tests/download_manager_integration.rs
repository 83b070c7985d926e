//! Integration tests for the download manager.
//!
//! These tests drive the standard PMC and Europe PMC sources against a mock
//! server, plus an instrumented source for the concurrency bound.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pmcfetch_core::download::{
    DownloadError, DownloadManager, DownloadRequest, DownloadStatus, HttpClient, Source,
    default_sources, partial_path,
};
use pmcfetch_core::{CacheStore, Config, Endpoints, RateLimiter};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PDF_BYTES: &[u8] = b"%PDF-1.4\n1 0 obj\n<<>>\nendobj\n%%EOF";

fn config(dir: &Path, concurrency: usize) -> Config {
    Config {
        concurrency,
        delay_seconds: 0.0,
        delay_jitter_seconds: 0.0,
        output_dir: dir.join("pdfs"),
        cache_dir: dir.join("cache"),
        ..Config::default()
    }
}

async fn http_manager(server: &MockServer, dir: &Path) -> DownloadManager {
    let config = config(dir, 3);
    let cache = CacheStore::open(&config.cache_dir).await.expect("cache opens");
    let client = HttpClient::new(None).expect("client builds");
    let sources = default_sources(&Endpoints::under(&server.uri()), &client);
    DownloadManager::new(&config, sources, cache, Arc::new(RateLimiter::disabled()))
        .expect("valid config")
}

fn pdf_response() -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("Content-Type", "application/pdf")
        .set_body_bytes(PDF_BYTES.to_vec())
}

#[tokio::test]
async fn test_fallback_tries_sources_in_order() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    Mock::given(method("GET"))
        .and(path("/pmc/articles/PMC123/pdf/"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pmc/articles/PMC123/pdf/PMC123.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/html; charset=utf-8")
                .set_body_string("<html>captcha</html>"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/epmc/articles/PMC123"))
        .and(query_param("pdf", "render"))
        .respond_with(pdf_response())
        .expect(1)
        .mount(&server)
        .await;

    let manager = http_manager(&server, temp_dir.path()).await;
    let results = manager.download_all(vec!["123".into()]).await;

    let result = &results[0];
    assert_eq!(result.status, DownloadStatus::Success);
    let sources: Vec<&str> = result.attempts.iter().map(|a| a.source.as_str()).collect();
    assert_eq!(
        sources,
        ["pmc_pdf_directory", "pmc_named_pdf", "europe_pmc_render"]
    );
    assert!(result.attempts[0].error.as_deref().is_some_and(|e| e.contains("404")));
    assert!(result.attempts[1].error.is_some());
    assert!(result.attempts[2].error.is_none());

    let file = result.path.as_ref().expect("successful download has a path");
    assert_eq!(file, &temp_dir.path().join("pdfs").join("PMC123.pdf"));
    assert_eq!(std::fs::read(file).expect("should read file"), PDF_BYTES);
    assert!(!partial_path(file).exists(), "no partial file should remain");
}

#[tokio::test]
async fn test_second_request_within_ttl_is_cache_hit_without_network() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    Mock::given(method("GET"))
        .and(path("/pmc/articles/PMC42/pdf/"))
        .respond_with(pdf_response())
        .expect(1)
        .mount(&server)
        .await;

    let manager = http_manager(&server, temp_dir.path()).await;
    let first = manager.download_all(vec!["42".into()]).await;
    assert_eq!(first[0].status, DownloadStatus::Success);

    let second = manager.download_all(vec!["42".into()]).await;
    assert_eq!(second[0].status, DownloadStatus::CacheHit);
    assert!(second[0].attempts.is_empty());
    assert_eq!(second[0].path, first[0].path);
}

#[tokio::test]
async fn test_all_sources_failing_is_source_exhausted() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let manager = http_manager(&server, temp_dir.path()).await;
    let results = manager.download_all(vec!["9".into()]).await;

    assert_eq!(results[0].status, DownloadStatus::SourceExhausted);
    assert_eq!(results[0].attempts.len(), 3);
    assert!(results[0].path.is_none());
    assert!(!temp_dir.path().join("pdfs").join("PMC9.pdf").exists());
}

#[tokio::test]
async fn test_empty_pdf_body_is_rejected() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Type", "application/pdf"))
        .mount(&server)
        .await;

    let manager = http_manager(&server, temp_dir.path()).await;
    let results = manager.download_all(vec!["5".into()]).await;

    assert_eq!(results[0].status, DownloadStatus::SourceExhausted);
    assert!(
        results[0]
            .attempts
            .iter()
            .all(|a| a.error.as_deref().is_some_and(|e| e.contains("empty")))
    );
}

#[tokio::test]
async fn test_doi_is_part_of_file_name() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    Mock::given(method("GET"))
        .and(path("/pmc/articles/PMC77/pdf/"))
        .respond_with(pdf_response())
        .mount(&server)
        .await;

    let manager = http_manager(&server, temp_dir.path()).await;
    let results = manager
        .download_all(vec![DownloadRequest::new("77").with_doi("10.1038/nature12373")])
        .await;

    let name = results[0]
        .path
        .as_ref()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .map(ToString::to_string);
    assert_eq!(name.as_deref(), Some("PMC77_10.1038_nature12373.pdf"));
}

/// Source that records how many fetches overlap.
#[derive(Default)]
struct GaugeSource {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl Source for GaugeSource {
    fn name(&self) -> &'static str {
        "gauge"
    }

    fn service_id(&self) -> &'static str {
        "gauge"
    }

    fn url(&self, pmcid: &str) -> String {
        format!("gauge://{pmcid}")
    }

    async fn fetch(&self, _pmcid: &str, dest: &Path) -> Result<u64, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(25)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        tokio::fs::write(dest, PDF_BYTES)
            .await
            .map_err(|e| DownloadError::io(dest, e))?;
        Ok(PDF_BYTES.len() as u64)
    }
}

#[tokio::test]
async fn test_in_flight_downloads_never_exceed_concurrency() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let config = config(temp_dir.path(), 3);
    let cache = CacheStore::open(&config.cache_dir).await.expect("cache opens");
    let gauge = Arc::new(GaugeSource::default());
    let manager = DownloadManager::new(
        &config,
        vec![gauge.clone()],
        cache,
        Arc::new(RateLimiter::disabled()),
    )
    .expect("valid config");

    let requests: Vec<DownloadRequest> = (1..=10).map(|n| n.to_string().into()).collect();
    let results = manager.download_all(requests).await;

    assert_eq!(gauge.calls.load(Ordering::SeqCst), 10);
    let max = gauge.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 3, "max in flight was {max}");
    assert!(max >= 2, "downloads should overlap, max was {max}");

    let pmcids: Vec<&str> = results.iter().map(|r| r.pmcid.as_str()).collect();
    assert_eq!(pmcids, ["1", "2", "3", "4", "5", "6", "7", "8", "9", "10"]);
    assert_eq!(manager.stats().succeeded(), 10);
}

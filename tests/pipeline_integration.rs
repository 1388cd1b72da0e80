//! End-to-end pipeline tests against mock catalogs and mirrors.

#![allow(clippy::unwrap_used)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bookfetch::provider::{ArchiveAdapter, PackageAdapter, ProviderHttp};
use bookfetch::{
    DownloadManager, Orchestrator, ProviderAdapter, RateLimiter, RecordCache, Settings,
    TransferClient,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn http() -> ProviderHttp {
    ProviderHttp::new(
        reqwest::Client::new(),
        Arc::new(RateLimiter::per_provider(1000, Duration::from_secs(60))),
    )
}

async fn orchestrator(
    providers: Vec<Box<dyn ProviderAdapter>>,
    output_dir: PathBuf,
) -> Orchestrator {
    let settings = Settings::default();
    let manager = DownloadManager::new(
        TransferClient::new(reqwest::Client::new(), u64::MAX),
        Arc::new(RateLimiter::per_provider(1000, Duration::from_secs(60))),
        output_dir,
    );
    let cache = RecordCache::open_in_memory().await.unwrap();
    Orchestrator::new(providers, manager, cache, &settings)
}

/// Mounts an archive search endpoint returning one row with the given
/// mirror links.
async fn mount_archive_search(server: &MockServer, isbn: &str, links: &[String]) {
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [{
                "title": "Clean Code",
                "authors": "Robert C. Martin",
                "year": "2008",
                "isbn": isbn,
                "extension": "pdf",
                "links": links,
            }]
        })))
        .mount(server)
        .await;
}

// ==================== Merge Across Providers ====================

#[tokio::test]
async fn test_two_catalogs_merge_into_one_download() {
    let server = MockServer::start().await;
    let book_url = format!("{}/files/clean-code.pdf", server.uri());

    mount_archive_search(&server, "978-0-13-235088-4", std::slice::from_ref(&book_url)).await;
    Mock::given(method("GET"))
        .and(path("/api/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "books": [{
                "title": "Clean Code: A Handbook of Agile Software Craftsmanship",
                "author": "Robert C. Martin",
                "isbn": "9780132350884",
                "publisher": "Prentice Hall",
                "download": "/files/clean-code.pdf",
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/clean-code.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 512]))
        .mount(&server)
        .await;

    let providers: Vec<Box<dyn ProviderAdapter>> = vec![
        Box::new(ArchiveAdapter::new(http(), server.uri())),
        Box::new(PackageAdapter::new(http(), server.uri())),
    ];
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(providers, dir.path().to_path_buf()).await;

    let report = orchestrator.run("clean code", 10).await.unwrap();

    // Both fragments share the ISBN, so exactly one record is fetched,
    // and the duplicate mirror URL collapses to one download.
    assert_eq!(report.acquired(), 1);
    assert!(report.abandoned.is_empty());
    assert_eq!(report.merge_conflicts, 0);
    assert!(report.succeeded[0].path.exists());

    // The download endpoint was hit exactly once.
    let downloads = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/files/clean-code.pdf")
        .count();
    assert_eq!(downloads, 1);
}

// ==================== Mirror Fallback ====================

#[tokio::test]
async fn test_transient_mirror_failure_falls_through() {
    let server = MockServer::start().await;
    let bad = format!("{}/mirrors/down.pdf", server.uri());
    let good = format!("{}/mirrors/up.pdf", server.uri());

    mount_archive_search(&server, "978-0-13-235088-4", &[bad, good]).await;
    Mock::given(method("GET"))
        .and(path("/mirrors/down.pdf"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/mirrors/up.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 256]))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(
        vec![Box::new(ArchiveAdapter::new(http(), server.uri()))],
        dir.path().to_path_buf(),
    )
    .await;

    let report = orchestrator.run("clean code", 10).await.unwrap();
    // Fallback happens within one mirror walk, so this is a first-attempt
    // success, not a recovery.
    assert_eq!(report.succeeded.len(), 1);
    assert_eq!(report.succeeded[0].attempts, 1);
    assert!(report.recovered.is_empty());
}

#[tokio::test]
async fn test_integrity_rejection_advances_and_discards() {
    let server = MockServer::start().await;
    let truncated = format!("{}/mirrors/truncated.pdf", server.uri());
    let full = format!("{}/mirrors/full.pdf", server.uri());

    // Declared size 1000; the first mirror serves 5% short.
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [{
                "title": "Clean Code",
                "authors": "Robert C. Martin",
                "isbn": "9780132350884",
                "extension": "pdf",
                "filesize": "1000",
                "links": [truncated, full],
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/mirrors/truncated.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 950]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/mirrors/full.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1000]))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(
        vec![Box::new(ArchiveAdapter::new(http(), server.uri()))],
        dir.path().to_path_buf(),
    )
    .await;

    let report = orchestrator.run("clean code", 10).await.unwrap();
    assert_eq!(report.succeeded.len(), 1);

    // The kept artifact is the full payload, and nothing partial remains.
    let artifact = std::fs::read(&report.succeeded[0].path).unwrap();
    assert_eq!(artifact.len(), 1000);
    let books_dir = dir.path().join("books");
    assert_eq!(std::fs::read_dir(&books_dir).unwrap().count(), 1);
}

// ==================== Retry and Abandonment ====================

#[tokio::test]
async fn test_failed_walk_is_reenqueued_and_recovers() {
    let server = MockServer::start().await;
    let only = format!("{}/mirrors/flaky.pdf", server.uri());

    mount_archive_search(&server, "978-0-13-235088-4", &[only]).await;
    // First walk sees a 500, the re-enqueued walk succeeds.
    Mock::given(method("GET"))
        .and(path("/mirrors/flaky.pdf"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/mirrors/flaky.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![3u8; 128]))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(
        vec![Box::new(ArchiveAdapter::new(http(), server.uri()))],
        dir.path().to_path_buf(),
    )
    .await;

    let report = orchestrator.run("clean code", 10).await.unwrap();
    assert!(report.succeeded.is_empty());
    assert_eq!(report.recovered.len(), 1);
    assert_eq!(report.recovered[0].attempts, 2);
}

#[tokio::test]
async fn test_exhausted_retries_abandon_with_evidence() {
    let server = MockServer::start().await;
    let m1 = format!("{}/mirrors/a.pdf", server.uri());
    let m2 = format!("{}/mirrors/b.pdf", server.uri());

    mount_archive_search(&server, "978-0-13-235088-4", &[m1, m2]).await;
    Mock::given(method("GET"))
        .and(path("/mirrors/a.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/mirrors/b.pdf"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(
        vec![Box::new(ArchiveAdapter::new(http(), server.uri()))],
        dir.path().to_path_buf(),
    )
    .await;

    let report = orchestrator.run("clean code", 10).await.unwrap();
    assert_eq!(report.abandoned.len(), 1);

    let abandoned = &report.abandoned[0];
    // Default ceiling of 2 re-enqueues means three walks happened.
    assert!(abandoned.reason.contains("3 mirror walk(s)"));
    // The final walk reports both mirrors with their last failure.
    assert_eq!(abandoned.mirror_failures.len(), 2);
    assert!(abandoned.mirror_failures[0].reason.contains("404")
        || abandoned.mirror_failures[0].reason.contains("503"));

    // No artifacts were left behind.
    let books_dir = dir.path().join("books");
    let leftover = std::fs::read_dir(&books_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftover, 0);
}

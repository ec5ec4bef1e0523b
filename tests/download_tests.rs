//! Integration tests for the download path
//!
//! These tests use wiremock to simulate the remote file server and
//! exercise whole-body streaming, resumable ranged downloads, retry
//! with backoff, and cancellation.

use deck_transfer::{
    DownloadOptions, Downloader, MemoryStateStore, StateKey, StateStore, TransferConfig,
    TransferError,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FILE_SIZE: usize = 2500;
const CHUNK_SIZE: u64 = 1000;

/// Deterministic file content for byte-exact assertions
fn deck_content() -> Vec<u8> {
    (0..FILE_SIZE).map(|i| (i % 251) as u8).collect()
}

fn test_downloader(spool: &TempDir, store: Arc<dyn StateStore>) -> Downloader {
    let config = TransferConfig {
        spool_dir: spool.path().to_path_buf(),
        ..Default::default()
    };
    Downloader::new(&config, store).unwrap()
}

fn fast_options() -> DownloadOptions {
    DownloadOptions {
        max_retries: 3,
        retry_delay: Duration::from_millis(10),
        timeout: Duration::from_secs(10),
        ..Default::default()
    }
}

fn resumable_options() -> DownloadOptions {
    DownloadOptions {
        resumable: true,
        file_size: Some(FILE_SIZE as u64),
        chunk_size: CHUNK_SIZE,
        ..fast_options()
    }
}

/// Mount a 206 mock for one chunk of the content, tagged with an ETag
async fn mount_chunk(server: &MockServer, range: &str, body: &[u8], expect: u64) {
    Mock::given(method("GET"))
        .and(path("/deck.pptx"))
        .and(header("Range", range))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("ETag", "\"v1\"")
                .set_body_bytes(body.to_vec()),
        )
        .expect(expect)
        .mount(server)
        .await;
}

// =============================================================================
// Whole-body downloads
// =============================================================================

#[tokio::test]
async fn whole_body_download_succeeds() {
    let server = MockServer::start().await;
    let content = deck_content();

    Mock::given(method("GET"))
        .and(path("/deck.pptx"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let spool = TempDir::new().unwrap();
    let downloader = test_downloader(&spool, Arc::new(MemoryStateStore::new()));

    let progress: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&progress);

    let outcome = downloader
        .download_with_retry(
            &format!("{}/deck.pptx", server.uri()),
            "deck.pptx",
            &fast_options(),
            &CancellationToken::new(),
            move |p| sink.lock().push(p.bytes_done),
            |_, _| {},
        )
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.bytes_downloaded, FILE_SIZE as u64);
    assert_eq!(outcome.data.unwrap().as_ref(), content.as_slice());

    let progress = progress.lock();
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[1] >= w[0]));
    assert_eq!(*progress.last().unwrap(), FILE_SIZE as u64);
}

#[tokio::test]
async fn http_404_is_fatal_and_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/deck.pptx"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let spool = TempDir::new().unwrap();
    let downloader = test_downloader(&spool, Arc::new(MemoryStateStore::new()));

    let retries = Arc::new(Mutex::new(Vec::new()));
    let retry_sink = Arc::clone(&retries);

    let outcome = downloader
        .download_with_retry(
            &format!("{}/deck.pptx", server.uri()),
            "deck.pptx",
            &fast_options(),
            &CancellationToken::new(),
            |_| {},
            move |attempt, _| retry_sink.lock().push(attempt),
        )
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.attempts, 1);
    assert!(matches!(
        outcome.error,
        Some(TransferError::Server { status: 404, .. })
    ));
    assert!(retries.lock().is_empty());
}

#[tokio::test]
async fn transient_500_recovers_with_expected_attempts() {
    let server = MockServer::start().await;
    let content = deck_content();

    // Two failures, then success: attempts = k + 1 = 3
    Mock::given(method("GET"))
        .and(path("/deck.pptx"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/deck.pptx"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .mount(&server)
        .await;

    let spool = TempDir::new().unwrap();
    let downloader = test_downloader(&spool, Arc::new(MemoryStateStore::new()));

    let retries = Arc::new(Mutex::new(Vec::new()));
    let retry_sink = Arc::clone(&retries);

    let started = Instant::now();
    let options = DownloadOptions {
        retry_delay: Duration::from_millis(100),
        ..fast_options()
    };
    let outcome = downloader
        .download_with_retry(
            &format!("{}/deck.pptx", server.uri()),
            "deck.pptx",
            &options,
            &CancellationToken::new(),
            |_| {},
            move |attempt, _| retry_sink.lock().push(attempt),
        )
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.data.unwrap().as_ref(), content.as_slice());
    assert_eq!(*retries.lock(), vec![1, 2]);

    // Backoff doubles: 100ms then 200ms before the third attempt
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(300), "elapsed {:?}", elapsed);
}

#[tokio::test]
async fn retries_exhausted_surfaces_last_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/deck.pptx"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let spool = TempDir::new().unwrap();
    let downloader = test_downloader(&spool, Arc::new(MemoryStateStore::new()));

    let outcome = downloader
        .download_with_retry(
            &format!("{}/deck.pptx", server.uri()),
            "deck.pptx",
            &fast_options(),
            &CancellationToken::new(),
            |_| {},
            |_, _| {},
        )
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.attempts, 3);
    assert!(matches!(
        outcome.error,
        Some(TransferError::Server { status: 503, .. })
    ));
}

#[tokio::test]
async fn per_request_timeout_is_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/deck.pptx"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(deck_content())
                .set_delay(Duration::from_secs(5)),
        )
        .expect(2)
        .mount(&server)
        .await;

    let spool = TempDir::new().unwrap();
    let downloader = test_downloader(&spool, Arc::new(MemoryStateStore::new()));

    let options = DownloadOptions {
        max_retries: 2,
        timeout: Duration::from_millis(50),
        ..fast_options()
    };
    let outcome = downloader
        .download_with_retry(
            &format!("{}/deck.pptx", server.uri()),
            "deck.pptx",
            &options,
            &CancellationToken::new(),
            |_| {},
            |_, _| {},
        )
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.attempts, 2);
    let error = outcome.error.unwrap();
    assert!(error.is_retryable(), "timeouts must stay retryable: {}", error);
}

#[tokio::test]
async fn cancellation_mid_flight_stops_retries() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/deck.pptx"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(deck_content())
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let spool = TempDir::new().unwrap();
    let downloader = test_downloader(&spool, Arc::new(MemoryStateStore::new()));

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let outcome = downloader
        .download_with_retry(
            &format!("{}/deck.pptx", server.uri()),
            "deck.pptx",
            &fast_options(),
            &cancel,
            |_| {},
            |_, _| {},
        )
        .await
        .unwrap();

    assert!(!outcome.success);
    assert!(matches!(outcome.error, Some(TransferError::Cancelled)));
    assert_eq!(outcome.attempts, 1);
    assert!(started.elapsed() < Duration::from_secs(5));
}

// =============================================================================
// Resumable ranged downloads
// =============================================================================

#[tokio::test]
async fn resumable_download_fetches_all_chunks() {
    let server = MockServer::start().await;
    let content = deck_content();

    mount_chunk(&server, "bytes=0-999", &content[0..1000], 1).await;
    mount_chunk(&server, "bytes=1000-1999", &content[1000..2000], 1).await;
    mount_chunk(&server, "bytes=2000-2499", &content[2000..2500], 1).await;

    let spool = TempDir::new().unwrap();
    let store = Arc::new(MemoryStateStore::new());
    let downloader = test_downloader(&spool, store.clone());

    let outcome = downloader
        .download_with_retry(
            &format!("{}/deck.pptx", server.uri()),
            "deck.pptx",
            &resumable_options(),
            &CancellationToken::new(),
            |_| {},
            |_, _| {},
        )
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.data.unwrap().as_ref(), content.as_slice());

    // State is cleared on completion
    let key = StateKey::new(format!("{}/deck.pptx", server.uri()), "deck.pptx");
    assert!(store.get(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn resumed_download_requests_only_missing_chunks() {
    let server = MockServer::start().await;
    let content = deck_content();
    let url = format!("{}/deck.pptx", server.uri());

    // Chunk 0 must be fetched exactly once across both calls
    mount_chunk(&server, "bytes=0-999", &content[0..1000], 1).await;
    // Chunk 1 fails once, then succeeds on the resumed call
    Mock::given(method("GET"))
        .and(path("/deck.pptx"))
        .and(header("Range", "bytes=1000-1999"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_chunk(&server, "bytes=1000-1999", &content[1000..2000], 1).await;
    // Chunk 2 is only reached on the resumed call
    mount_chunk(&server, "bytes=2000-2499", &content[2000..2500], 1).await;
    // The resumed call revalidates against the live resource
    Mock::given(method("HEAD"))
        .and(path("/deck.pptx"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"v1\""))
        .expect(1)
        .mount(&server)
        .await;

    let spool = TempDir::new().unwrap();
    let store = Arc::new(MemoryStateStore::new());
    let downloader = test_downloader(&spool, store.clone());
    let key = StateKey::new(&url, "deck.pptx");

    // First call: chunk 0 lands, chunk 1 fails, no retry budget left
    let options = DownloadOptions {
        max_retries: 1,
        ..resumable_options()
    };
    let outcome = downloader
        .download_with_retry(&url, "deck.pptx", &options, &CancellationToken::new(), |_| {}, |_, _| {})
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.bytes_downloaded, 1000);

    let saved = store.get(&key).await.unwrap().expect("state persisted");
    assert!(saved.is_done(0));
    assert!(!saved.is_done(1));
    assert_eq!(saved.remaining(), 2);

    // Second call resumes: chunks 1 and 2 only
    let outcome = downloader
        .download_with_retry(
            &url,
            "deck.pptx",
            &resumable_options(),
            &CancellationToken::new(),
            |_| {},
            |_, _| {},
        )
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.data.unwrap().as_ref(), content.as_slice());
    assert!(store.get(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn changed_etag_discards_persisted_state() {
    let server = MockServer::start().await;
    let content = deck_content();
    let url = format!("{}/deck.pptx", server.uri());

    // Every chunk is refetched because the resource changed
    mount_chunk(&server, "bytes=0-999", &content[0..1000], 1).await;
    mount_chunk(&server, "bytes=1000-1999", &content[1000..2000], 1).await;
    mount_chunk(&server, "bytes=2000-2499", &content[2000..2500], 1).await;
    Mock::given(method("HEAD"))
        .and(path("/deck.pptx"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"v2\""))
        .expect(1)
        .mount(&server)
        .await;

    let spool = TempDir::new().unwrap();
    let store = Arc::new(MemoryStateStore::new());

    // Seed state claiming chunks 0 and 1 from an older version
    let key = StateKey::new(&url, "deck.pptx");
    let mut stale = deck_transfer::ResumableState::new(3, FILE_SIZE as u64);
    stale.mark_done(0);
    stale.mark_done(1);
    stale.etag = Some("\"v1\"".to_string());
    store.set(&key, &stale).await.unwrap();

    let downloader = test_downloader(&spool, store.clone());
    let outcome = downloader
        .download_with_retry(
            &url,
            "deck.pptx",
            &resumable_options(),
            &CancellationToken::new(),
            |_| {},
            |_, _| {},
        )
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.data.unwrap().as_ref(), content.as_slice());
}

#[tokio::test]
async fn seeded_state_with_intact_spool_skips_completed_chunks() {
    let server = MockServer::start().await;
    let content = deck_content();
    let url = format!("{}/deck.pptx", server.uri());

    // Only chunk 2 may be requested
    mount_chunk(&server, "bytes=2000-2499", &content[2000..2500], 1).await;
    Mock::given(method("HEAD"))
        .and(path("/deck.pptx"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"v1\""))
        .expect(1)
        .mount(&server)
        .await;

    let spool = TempDir::new().unwrap();
    let store = Arc::new(MemoryStateStore::new());

    // Seed matching state and a spool file holding chunks 0 and 1
    let key = StateKey::new(&url, "deck.pptx");
    let mut seeded = deck_transfer::ResumableState::new(3, FILE_SIZE as u64);
    seeded.mark_done(0);
    seeded.mark_done(1);
    seeded.etag = Some("\"v1\"".to_string());
    store.set(&key, &seeded).await.unwrap();

    let mut spool_bytes = vec![0u8; FILE_SIZE];
    spool_bytes[0..2000].copy_from_slice(&content[0..2000]);
    std::fs::write(spool.path().join("deck.pptx.part"), &spool_bytes).unwrap();

    let downloader = test_downloader(&spool, store.clone());
    let outcome = downloader
        .download_with_retry(
            &url,
            "deck.pptx",
            &resumable_options(),
            &CancellationToken::new(),
            |_| {},
            |_, _| {},
        )
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.data.unwrap().as_ref(), content.as_slice());
    assert!(store.get(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn zero_byte_resumable_download_completes_immediately() {
    let spool = TempDir::new().unwrap();
    let downloader = test_downloader(&spool, Arc::new(MemoryStateStore::new()));

    let options = DownloadOptions {
        resumable: true,
        file_size: Some(0),
        ..fast_options()
    };
    let outcome = downloader
        .download_with_retry(
            "https://files.example.com/empty.pptx",
            "empty.pptx",
            &options,
            &CancellationToken::new(),
            |_| {},
            |_, _| {},
        )
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.bytes_downloaded, 0);
    assert_eq!(outcome.data.unwrap().len(), 0);
}

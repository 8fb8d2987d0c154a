mod support;

use std::time::Duration;

use assert_matches::assert_matches;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use image_harvest::domain::DownloadStatus;
use image_harvest::paths::ArtifactLayout;
use image_harvest::worker::{FetchWorker, NO_VALID_URL, RetryPolicy};

use support::{Reply, ScriptedFetcher, files_in, instant_policy, item, temp_root};

const JPEG: &[u8] = b"\xff\xd8\xff\xe0\x00\x10JFIF\x00fake-jpeg-body";

#[tokio::test]
async fn item_without_urls_is_skipped_without_network() {
    let (_temp, root) = temp_root();
    let fetcher = ScriptedFetcher::new(Reply::jpeg(JPEG));
    let worker = FetchWorker::new(&fetcher, ArtifactLayout::new(root.clone()), instant_policy(), false);
    let semaphore = Semaphore::new(1);

    let record = worker
        .download(&item(1, None, None), semaphore.acquire().await.unwrap())
        .await;

    assert_eq!(record.status, DownloadStatus::Skipped);
    assert_eq!(record.error_message.as_deref(), Some(NO_VALID_URL));
    assert_eq!(fetcher.call_count(), 0);
    assert!(files_in(&root).is_empty());
}

#[tokio::test]
async fn unusable_url_is_skipped() {
    let (_temp, root) = temp_root();
    let fetcher = ScriptedFetcher::new(Reply::jpeg(JPEG));
    let worker = FetchWorker::new(&fetcher, ArtifactLayout::new(root), instant_policy(), false);
    let semaphore = Semaphore::new(1);

    let record = worker
        .download(
            &item(2, Some("cdn.example.com/a.jpg"), Some("  ")),
            semaphore.acquire().await.unwrap(),
        )
        .await;

    assert_eq!(record.status, DownloadStatus::Skipped);
    assert_eq!(fetcher.call_count(), 0);
}

#[tokio::test]
async fn protocol_relative_jpeg_is_stored_with_sidecar() {
    let (_temp, root) = temp_root();
    let fetcher = ScriptedFetcher::new(Reply::Status(404));
    fetcher.script("https://cdn.example.com/a.jpg", [Reply::jpeg(JPEG)]);
    let worker = FetchWorker::new(&fetcher, ArtifactLayout::new(root.clone()), instant_policy(), false);
    let semaphore = Semaphore::new(1);
    let work = item(3, Some("//cdn.example.com/a.jpg"), None);

    let record = worker.download(&work, semaphore.acquire().await.unwrap()).await;

    assert_eq!(record.status, DownloadStatus::Downloaded);
    assert_eq!(record.byte_size, Some(JPEG.len() as u64));
    assert_eq!(
        record.resolved_url.as_deref(),
        Some("https://cdn.example.com/a.jpg")
    );
    let local_path = record.local_path.unwrap();
    assert!(local_path.ends_with(".jpg"));
    assert_eq!(std::fs::read(&local_path).unwrap(), JPEG);

    let base = ArtifactLayout::base_name(3, &work.variant_kind, Some(800), Some(600), "https://cdn.example.com/a.jpg");
    let sidecar = std::fs::read_to_string(root.join(format!("{base}.txt"))).unwrap();
    assert_eq!(
        sidecar,
        "url: //cdn.example.com/a.jpg\norigin_url: \nimage_id: img-3\nvariant_type: preview\nwidth: 800\nheight: 600\n"
    );
    assert_eq!(files_in(&root).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_waits_for_retry_after() {
    let (_temp, root) = temp_root();
    let fetcher = ScriptedFetcher::new(Reply::Status(404));
    fetcher.script(
        "https://cdn.example.com/b.jpg",
        [
            Reply::TooMany {
                retry_after: Some("2"),
            },
            Reply::jpeg(JPEG),
        ],
    );
    let worker = FetchWorker::new(
        &fetcher,
        ArtifactLayout::new(root),
        RetryPolicy::default(),
        false,
    );
    let semaphore = Semaphore::new(1);
    let started = Instant::now();

    let record = worker
        .download(
            &item(4, Some("https://cdn.example.com/b.jpg"), None),
            semaphore.acquire().await.unwrap(),
        )
        .await;

    assert_eq!(record.status, DownloadStatus::Downloaded);
    assert!(started.elapsed() >= Duration::from_secs(2));
    // 429 waits replace the generic one-second backoff.
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(fetcher.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_without_header_uses_default_wait() {
    let (_temp, root) = temp_root();
    let fetcher = ScriptedFetcher::new(Reply::Status(404));
    fetcher.script(
        "https://cdn.example.com/c.jpg",
        [Reply::TooMany { retry_after: None }, Reply::jpeg(JPEG)],
    );
    let worker = FetchWorker::new(
        &fetcher,
        ArtifactLayout::new(root),
        RetryPolicy::default(),
        false,
    );
    let semaphore = Semaphore::new(1);
    let started = Instant::now();

    let record = worker
        .download(
            &item(5, Some("https://cdn.example.com/c.jpg"), None),
            semaphore.acquire().await.unwrap(),
        )
        .await;

    assert_eq!(record.status, DownloadStatus::Downloaded);
    assert!(started.elapsed() >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn server_errors_exhaust_the_retry_budget() {
    let (_temp, root) = temp_root();
    let fetcher = ScriptedFetcher::new(Reply::Status(500));
    let worker = FetchWorker::new(
        &fetcher,
        ArtifactLayout::new(root.clone()),
        RetryPolicy::default(),
        false,
    );
    let semaphore = Semaphore::new(1);
    let started = Instant::now();

    let record = worker
        .download(
            &item(6, Some("https://cdn.example.com/d.jpg"), None),
            semaphore.acquire().await.unwrap(),
        )
        .await;

    assert_eq!(record.status, DownloadStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some("HTTP 500"));
    assert_eq!(fetcher.call_count(), 4);
    assert!(record.local_path.is_none());
    // Three one-second backoffs between four attempts.
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(files_in(&root).is_empty());
}

#[tokio::test]
async fn rate_limited_on_every_attempt_fails_as_429() {
    let (_temp, root) = temp_root();
    let fetcher = ScriptedFetcher::new(Reply::TooMany {
        retry_after: Some("0"),
    });
    let worker = FetchWorker::new(&fetcher, ArtifactLayout::new(root), instant_policy(), false);
    let semaphore = Semaphore::new(1);

    let record = worker
        .download(
            &item(7, Some("https://cdn.example.com/e.jpg"), None),
            semaphore.acquire().await.unwrap(),
        )
        .await;

    assert_eq!(record.status, DownloadStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some("HTTP 429"));
    assert_eq!(fetcher.call_count(), 4);
}

#[tokio::test]
async fn dropped_stream_leaves_nothing_at_final_path() {
    let (_temp, root) = temp_root();
    let fetcher = ScriptedFetcher::new(Reply::DropMidStream {
        head: JPEG[..6].to_vec(),
    });
    let worker = FetchWorker::new(&fetcher, ArtifactLayout::new(root.clone()), instant_policy(), false);
    let semaphore = Semaphore::new(1);

    let record = worker
        .download(
            &item(8, Some("https://cdn.example.com/f.jpg"), None),
            semaphore.acquire().await.unwrap(),
        )
        .await;

    assert_eq!(record.status, DownloadStatus::Failed);
    assert_eq!(
        record.error_message.as_deref(),
        Some("HTTP client error: decode")
    );
    assert_eq!(fetcher.call_count(), 4);
    assert!(files_in(&root).is_empty());
}

#[tokio::test]
async fn connection_errors_are_classified() {
    let (_temp, root) = temp_root();
    let fetcher = ScriptedFetcher::new(Reply::Connect);
    let worker = FetchWorker::new(&fetcher, ArtifactLayout::new(root), instant_policy(), false);
    let semaphore = Semaphore::new(1);

    let record = worker
        .download(
            &item(9, Some("https://unreachable.example/g.jpg"), None),
            semaphore.acquire().await.unwrap(),
        )
        .await;

    assert_matches!(record.error_message.as_deref(), Some("Connection/timeout error"));
}

#[tokio::test]
async fn existing_artifact_is_not_fetched_again() {
    let (_temp, root) = temp_root();
    let url = "https://cdn.example.com/h.jpg";
    let work = item(10, Some(url), None);
    let layout = ArtifactLayout::new(root.clone());
    let base = ArtifactLayout::base_name(10, &work.variant_kind, work.width, work.height, url);
    let existing = layout.artifact_path(&base, ".jpg");
    std::fs::write(existing.as_std_path(), b"old").unwrap();

    let fetcher = ScriptedFetcher::new(Reply::jpeg(JPEG));
    let worker = FetchWorker::new(&fetcher, layout, instant_policy(), false);
    let semaphore = Semaphore::new(1);

    let record = worker.download(&work, semaphore.acquire().await.unwrap()).await;

    assert_eq!(record.status, DownloadStatus::Downloaded);
    assert_eq!(record.byte_size, Some(3));
    assert_eq!(record.local_path.as_deref(), Some(existing.as_str()));
    assert_eq!(std::fs::read(existing.as_std_path()).unwrap(), b"old");
    assert!(root.join(format!("{base}.txt")).as_std_path().exists());
}

#[tokio::test]
async fn prefer_origin_tries_origin_first() {
    let (_temp, root) = temp_root();
    let fetcher = ScriptedFetcher::new(Reply::jpeg(JPEG));
    let worker = FetchWorker::new(&fetcher, ArtifactLayout::new(root), instant_policy(), true);
    let semaphore = Semaphore::new(1);

    let record = worker
        .download(
            &item(
                11,
                Some("https://thumbs.example.com/i.jpg"),
                Some("//origin.example.com/i.png"),
            ),
            semaphore.acquire().await.unwrap(),
        )
        .await;

    assert_eq!(record.status, DownloadStatus::Downloaded);
    assert_eq!(fetcher.calls(), vec!["https://origin.example.com/i.png"]);
}

#[tokio::test]
async fn failed_fetch_does_not_switch_to_the_other_url() {
    let (_temp, root) = temp_root();
    let fetcher = ScriptedFetcher::new(Reply::jpeg(JPEG));
    fetcher.script("https://thumbs.example.com/j.jpg", [Reply::Status(404)]);
    let worker = FetchWorker::new(&fetcher, ArtifactLayout::new(root), instant_policy(), false);
    let semaphore = Semaphore::new(1);

    let record = worker
        .download(
            &item(
                12,
                Some("https://thumbs.example.com/j.jpg"),
                Some("https://origin.example.com/j.jpg"),
            ),
            semaphore.acquire().await.unwrap(),
        )
        .await;

    assert_eq!(record.status, DownloadStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some("HTTP 404"));
    assert!(
        fetcher
            .calls()
            .iter()
            .all(|url| url == "https://thumbs.example.com/j.jpg")
    );
    assert_eq!(fetcher.call_count(), 4);
}

#[tokio::test]
async fn unknown_content_type_falls_back_to_url_suffix() {
    let (_temp, root) = temp_root();
    let fetcher = ScriptedFetcher::new(Reply::Ok {
        content_type: Some("application/octet-stream"),
        body: b"GIF89a".to_vec(),
    });
    let worker = FetchWorker::new(&fetcher, ArtifactLayout::new(root), instant_policy(), false);
    let semaphore = Semaphore::new(1);

    let record = worker
        .download(
            &item(13, Some("https://cdn.example.com/anim.GIF?x=1"), None),
            semaphore.acquire().await.unwrap(),
        )
        .await;

    assert!(record.local_path.unwrap().ends_with(".gif"));
}

#[tokio::test]
async fn txt_url_suffix_does_not_take_the_sidecar_name() {
    let (_temp, root) = temp_root();
    let fetcher = ScriptedFetcher::new(Reply::Ok {
        content_type: Some("application/octet-stream"),
        body: JPEG.to_vec(),
    });
    let worker = FetchWorker::new(&fetcher, ArtifactLayout::new(root.clone()), instant_policy(), false);
    let semaphore = Semaphore::new(1);

    let record = worker
        .download(
            &item(14, Some("https://cdn.example.com/photo.txt"), None),
            semaphore.acquire().await.unwrap(),
        )
        .await;

    assert_eq!(record.status, DownloadStatus::Downloaded);
    let stored = record.local_path.unwrap();
    assert!(stored.ends_with(".jpg"), "{stored}");
    let files = files_in(&root);
    assert_eq!(files.len(), 2, "{files:?}");
    assert!(files.iter().any(|name| name.ends_with(".jpg")));
    assert!(files.iter().any(|name| name.ends_with(".txt")));
}

use super::*;
use crate::error::ErrorKind;
use crate::test_helpers::{
    TEST_INTERVAL, downloading_body, drain, info_body, mount_progress, mount_progress_once,
    next_matching, request_count, terminal_body, test_client, test_config, wait_until,
};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn queue_for(server: &MockServer) -> QueueManager {
    queue_with_config(server, test_config(server))
}

fn queue_with_config(server: &MockServer, config: Config) -> QueueManager {
    let (event_tx, _) = broadcast::channel(256);
    QueueManager::new(test_client(server), Arc::new(config), event_tx)
}

/// `/info` for form field `url=<url>` answers with session `session_id`
async fn mount_info_for(server: &MockServer, url: &str, session_id: &str) {
    Mock::given(method("POST"))
        .and(path("/info"))
        .and(body_string_contains(format!("url={}", url)))
        .respond_with(ResponseTemplate::new(200).set_body_json(info_body(session_id)))
        .mount(server)
        .await;
}

async fn mount_download_for(server: &MockServer, session_id: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/download"))
        .and(body_string_contains(format!("session_id={}", session_id)))
        .respond_with(response)
        .mount(server)
        .await;
}

fn started() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"status": "started"}))
}

#[tokio::test]
async fn empty_batch_is_rejected_without_requests() {
    let server = MockServer::start().await;
    let queue = queue_for(&server);
    let mut rx = queue.subscribe();

    let err = queue.submit("  \n\n   \n").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmptyInput);
    assert_eq!(err.to_string(), "Please enter at least one URL to download.");
    assert!(queue.entries().await.is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
    assert_eq!(
        drain(&mut rx),
        vec![Event::BatchRejected {
            message: "Please enter at least one URL to download.".to_string()
        }]
    );
}

#[tokio::test]
async fn one_entry_per_line_in_submitted_order() {
    let server = MockServer::start().await;
    for (url, id) in [("one", "s1"), ("two", "s2"), ("three", "s3")] {
        mount_info_for(&server, url, id).await;
        mount_download_for(&server, id, started()).await;
        mount_progress(&server, id, downloading_body(1, 10)).await;
    }
    let queue = queue_for(&server);
    let mut rx = queue.subscribe();

    let ids = queue.submit(" one \n\ntwo\nthree\n").await.unwrap();
    assert_eq!(ids, vec![EntryId(0), EntryId(1), EntryId(2)]);

    let entries = queue.entries().await;
    let urls: Vec<&str> = entries.iter().map(|e| e.source_url.as_str()).collect();
    assert_eq!(urls, vec!["one", "two", "three"]);
    assert!(entries.iter().all(|e| e.state == EntryState::Downloading));

    // all entries are queued before any is processed
    let events = drain(&mut rx);
    let first_non_queued = events
        .iter()
        .position(|e| !matches!(e, Event::EntryQueued { .. }))
        .unwrap();
    assert_eq!(first_non_queued, 3);
    queue.clear().await;
}

#[tokio::test]
async fn info_failure_does_not_halt_the_batch() {
    let server = MockServer::start().await;
    mount_info_for(&server, "one", "s1").await;
    Mock::given(method("POST"))
        .and(path("/info"))
        .and(body_string_contains("url=bad"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "Unsupported URL"})))
        .mount(&server)
        .await;
    mount_info_for(&server, "three", "s3").await;
    for id in ["s1", "s3"] {
        mount_download_for(&server, id, started()).await;
        mount_progress(&server, id, terminal_body("finished")).await;
    }
    let queue = queue_for(&server);
    let mut rx = queue.subscribe();

    queue.submit("one\nbad\nthree").await.unwrap();

    let failed = queue.entry(EntryId(1)).await.unwrap();
    assert_eq!(
        failed.state,
        EntryState::Failed {
            stage: FailureStage::Info,
            message: "Unsupported URL".to_string()
        }
    );
    assert_eq!(failed.status_text, "Info failed: Unsupported URL");
    assert!(failed.session_id.is_none());

    let mut completed = Vec::new();
    while completed.len() < 2 {
        if let Event::EntryCompleted { entry, file_path, .. } =
            next_matching(&mut rx, |e| matches!(e, Event::EntryCompleted { .. })).await
        {
            completed.push((entry, file_path));
        }
    }
    completed.sort_by_key(|(entry, _)| entry.0);
    assert_eq!(
        completed,
        vec![
            (EntryId(0), "/download_file/s1".to_string()),
            (EntryId(2), "/download_file/s3".to_string())
        ]
    );

    let third = queue.entry(EntryId(2)).await.unwrap();
    assert_eq!(third.state, EntryState::Completed);
    assert_eq!(third.status_text, "Completed");
    assert_eq!(third.download.percent(), 100.0);
}

#[tokio::test]
async fn download_failures_are_worded_by_cause() {
    let server = MockServer::start().await;
    mount_info_for(&server, "one", "s1").await;
    mount_info_for(&server, "two", "s2").await;
    mount_download_for(
        &server,
        "s1",
        ResponseTemplate::new(200).set_body_json(json!({"error": "Requested format is not available"})),
    )
    .await;
    mount_download_for(&server, "s2", ResponseTemplate::new(500)).await;
    let queue = queue_for(&server);

    queue.submit("one\ntwo").await.unwrap();

    let remote = queue.entry(EntryId(0)).await.unwrap();
    assert_eq!(remote.status_text, "Download error");
    assert!(matches!(
        remote.state,
        EntryState::Failed { stage: FailureStage::Download, .. }
    ));

    let transport = queue.entry(EntryId(1)).await.unwrap();
    assert_eq!(transport.status_text, "Download start failed");
    assert!(matches!(
        transport.state,
        EntryState::Failed { stage: FailureStage::Download, .. }
    ));
    assert_eq!(request_count(&server, "/progress/s1").await, 0);
    assert_eq!(request_count(&server, "/progress/s2").await, 0);
}

#[tokio::test]
async fn configured_format_code_is_sent() {
    let server = MockServer::start().await;
    mount_info_for(&server, "one", "s1").await;
    Mock::given(method("POST"))
        .and(path("/download"))
        .and(body_string_contains("format_code=best"))
        .respond_with(started())
        .expect(1)
        .mount(&server)
        .await;
    mount_progress(&server, "s1", downloading_body(1, 10)).await;
    let queue = queue_for(&server);

    queue.submit("one").await.unwrap();
    queue.clear().await;
}

#[tokio::test]
async fn combined_format_is_exposed_for_preview() {
    let server = MockServer::start().await;
    mount_info_for(&server, "one", "s1").await;
    mount_download_for(&server, "s1", started()).await;
    mount_progress(&server, "s1", downloading_body(1, 10)).await;
    let queue = queue_for(&server);
    let mut rx = queue.subscribe();

    queue.submit("one").await.unwrap();

    let entry = queue.entry(EntryId(0)).await.unwrap();
    assert_eq!(
        entry.preview_url.as_deref(),
        Some("https://cdn.example.com/s1.mp4")
    );
    assert!(drain(&mut rx).contains(&Event::EntryPreview {
        entry: EntryId(0),
        media_url: "https://cdn.example.com/s1.mp4".to_string()
    }));
    queue.clear().await;
}

#[tokio::test]
async fn progress_updates_only_its_own_entry() {
    let server = MockServer::start().await;
    mount_info_for(&server, "one", "s1").await;
    mount_info_for(&server, "two", "s2").await;
    mount_download_for(&server, "s1", started()).await;
    mount_download_for(&server, "s2", started()).await;
    mount_progress(&server, "s1", downloading_body(50, 100)).await;
    mount_progress(&server, "s2", downloading_body(0, 0)).await;
    let queue = queue_for(&server);
    let mut rx = queue.subscribe();

    queue.submit("one\ntwo").await.unwrap();
    next_matching(&mut rx, |e| {
        matches!(e, Event::EntryProgress { entry: EntryId(0), .. })
    })
    .await;

    let first = queue.entry(EntryId(0)).await.unwrap();
    assert_eq!(first.status_text, "Downloading… 50.0%");
    assert_eq!(first.download.downloaded_bytes, 50);

    let second = queue.entry(EntryId(1)).await.unwrap();
    assert_eq!(second.download.downloaded_bytes, 0);
    queue.clear().await;
}

#[tokio::test]
async fn pausing_one_entry_leaves_siblings_polling() {
    let server = MockServer::start().await;
    mount_info_for(&server, "one", "s1").await;
    mount_info_for(&server, "two", "s2").await;
    mount_download_for(&server, "s1", started()).await;
    mount_download_for(&server, "s2", started()).await;
    mount_progress(&server, "s1", downloading_body(1, 10)).await;
    mount_progress(&server, "s2", downloading_body(1, 10)).await;
    let queue = queue_for(&server);

    queue.submit("one\ntwo").await.unwrap();
    queue.pause(EntryId(0)).await.unwrap();
    queue.pause(EntryId(0)).await.unwrap();

    let paused = queue.entry(EntryId(0)).await.unwrap();
    assert!(paused.is_paused);
    assert_eq!(paused.state, EntryState::Paused);
    assert_eq!(paused.status_text, "Paused");

    tokio::time::sleep(TEST_INTERVAL * 2).await;
    let paused_before = request_count(&server, "/progress/s1").await;
    let sibling_before = request_count(&server, "/progress/s2").await;
    tokio::time::sleep(TEST_INTERVAL * 8).await;
    assert_eq!(request_count(&server, "/progress/s1").await, paused_before);
    assert!(request_count(&server, "/progress/s2").await > sibling_before);

    queue.resume(EntryId(0)).await.unwrap();
    let resumed = queue.entry(EntryId(0)).await.unwrap();
    assert!(!resumed.is_paused);
    assert_eq!(resumed.status_text, "Resuming...");
    assert!(
        wait_until(|| async { request_count(&server, "/progress/s1").await > paused_before })
            .await
    );
    queue.clear().await;
}

#[tokio::test]
async fn polling_error_fails_only_that_entry() {
    let server = MockServer::start().await;
    mount_info_for(&server, "one", "s1").await;
    mount_info_for(&server, "two", "s2").await;
    mount_download_for(&server, "s1", started()).await;
    mount_download_for(&server, "s2", started()).await;
    mount_progress_once(&server, "s1", downloading_body(1, 10), 1).await;
    mount_progress(
        &server,
        "s1",
        json!({"status": "error", "progress": {"error": "Disk full"}}),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/progress/s2"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let queue = queue_for(&server);
    let mut rx = queue.subscribe();

    queue.submit("one\ntwo").await.unwrap();
    let mut failed = 0;
    while failed < 2 {
        next_matching(&mut rx, |e| matches!(e, Event::EntryFailed { .. })).await;
        failed += 1;
    }

    let first = queue.entry(EntryId(0)).await.unwrap();
    assert_eq!(first.status_text, "Error: Disk full");
    assert_eq!(
        first.state,
        EntryState::Failed {
            stage: FailureStage::Progress,
            message: "Disk full".to_string()
        }
    );
    let second = queue.entry(EntryId(1)).await.unwrap();
    assert_eq!(second.status_text, "Polling failed");
}

#[tokio::test]
async fn pause_rejects_waiting_failed_and_unknown_entries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "nope"})))
        .mount(&server)
        .await;
    let queue = queue_for(&server);
    queue.submit("one").await.unwrap();

    assert_eq!(
        queue.pause(EntryId(0)).await.unwrap_err().kind(),
        ErrorKind::InvalidState
    );
    assert_eq!(
        queue.resume(EntryId(0)).await.unwrap_err().kind(),
        ErrorKind::InvalidState
    );
    assert_eq!(
        queue.pause(EntryId(7)).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn resubmitting_stops_previous_batch() {
    let server = MockServer::start().await;
    mount_info_for(&server, "one", "s1").await;
    mount_info_for(&server, "two", "s2").await;
    mount_download_for(&server, "s1", started()).await;
    mount_download_for(&server, "s2", started()).await;
    mount_progress(&server, "s1", downloading_body(1, 10)).await;
    mount_progress(&server, "s2", downloading_body(1, 10)).await;
    let queue = queue_for(&server);

    queue.submit("one").await.unwrap();
    assert!(wait_until(|| async { request_count(&server, "/progress/s1").await > 0 }).await);

    queue.submit("two").await.unwrap();
    let entries = queue.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].source_url, "two");

    tokio::time::sleep(TEST_INTERVAL * 2).await;
    let old = request_count(&server, "/progress/s1").await;
    tokio::time::sleep(TEST_INTERVAL * 6).await;
    assert_eq!(request_count(&server, "/progress/s1").await, old);
    queue.clear().await;
    assert!(queue.entries().await.is_empty());
}

#[tokio::test]
async fn concurrent_mode_starts_every_entry() {
    let server = MockServer::start().await;
    for (url, id) in [("one", "s1"), ("two", "s2"), ("three", "s3")] {
        mount_info_for(&server, url, id).await;
        mount_download_for(&server, id, started()).await;
        mount_progress(&server, id, terminal_body("completed")).await;
    }
    let mut config = test_config(&server);
    config.queue.start_mode = StartMode::Concurrent;
    let queue = queue_with_config(&server, config);

    queue.submit("one\ntwo\nthree").await.unwrap();
    assert!(
        wait_until(|| async {
            queue
                .entries()
                .await
                .iter()
                .all(|e| e.state == EntryState::Completed)
        })
        .await
    );
    let paths: Vec<Option<String>> = queue
        .entries()
        .await
        .into_iter()
        .map(|e| e.file_path)
        .collect();
    assert_eq!(
        paths,
        vec![
            Some("/download_file/s1".to_string()),
            Some("/download_file/s2".to_string()),
            Some("/download_file/s3".to_string())
        ]
    );
}

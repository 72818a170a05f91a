//! Shared test helpers: mock-service wiring, progress payloads and waiting.

use crate::client::{HttpSessionClient, SessionClient};
use crate::config::{Config, ServiceConfig};
use crate::types::Event;
use serde_json::{Value, json};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Short poll interval used throughout the tests
pub(crate) const TEST_INTERVAL: Duration = Duration::from_millis(20);

/// Upper bound for any wait in tests
pub(crate) const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP session client pointed at a mock server
pub(crate) fn test_client(server: &MockServer) -> Arc<dyn SessionClient> {
    Arc::new(
        HttpSessionClient::new(&ServiceConfig {
            base_url: server.uri(),
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .unwrap(),
    )
}

/// Config pointed at a mock server with fast polling
pub(crate) fn test_config(server: &MockServer) -> Config {
    let mut config = Config::with_base_url(server.uri());
    config.polling.single_interval = TEST_INTERVAL;
    config.polling.multi_interval = TEST_INTERVAL;
    config
}

/// `/info` success body for `session_id`
pub(crate) fn info_body(session_id: &str) -> Value {
    json!({
        "session_id": session_id,
        "site": "Youtube",
        "info": {
            "title": format!("Title {}", session_id),
            "uploader": "uploader",
            "duration": 65,
            "thumbnail": null,
            "formats": [
                {"format_id": "", "ext": "mp4", "vcodec": "h264"},
                {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "aac", "filesize": 2048},
                {"format_id": "18", "ext": "mp4", "vcodec": "h264", "acodec": "aac",
                 "format": "18 - 640x360", "url": format!("https://cdn.example.com/{}.mp4", session_id)}
            ],
            "subtitles": {"en": []}
        }
    })
}

/// `/progress` body with status `downloading`
pub(crate) fn downloading_body(downloaded: u64, total: u64) -> Value {
    json!({
        "status": "downloading",
        "progress": {"downloaded_bytes": downloaded, "total_bytes": total, "speed": 2048.0, "eta": 3}
    })
}

/// `/progress` body with a terminal status (`completed`, `finished`)
pub(crate) fn terminal_body(status: &str) -> Value {
    json!({"status": status, "progress": {}})
}

/// Mount a `/progress/<id>` mock that answers `body` at most `times` times
pub(crate) async fn mount_progress_once(server: &MockServer, id: &str, body: Value, times: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/progress/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .up_to_n_times(times)
        .mount(server)
        .await;
}

/// Mount a `/progress/<id>` mock that always answers `body`
pub(crate) async fn mount_progress(server: &MockServer, id: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/progress/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Number of requests the mock server received for `path_str`
pub(crate) async fn request_count(server: &MockServer, path_str: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == path_str)
        .count()
}

/// Poll `check` until it returns true or the wait times out
pub(crate) async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

/// Receive events until one matches `pred`, returning it
pub(crate) async fn next_matching<F>(rx: &mut broadcast::Receiver<Event>, mut pred: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// All events currently buffered on `rx`
pub(crate) fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

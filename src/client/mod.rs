//! Session client: thin request wrapper around the remote service endpoints.
//!
//! | Call      | Request                          |
//! |-----------|----------------------------------|
//! | info      | `POST /info` (form: `url`)       |
//! | download  | `POST /download` (form: `session_id`, `format_code`, `subtitle_lang?`) |
//! | progress  | `GET /progress/:id`              |
//! | retrieve  | `GET /download_file/:id`         |
//!
//! No retries happen here: a failed call returns immediately with a single
//! user-visible message. Retry policy, if any, belongs to the caller.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::{FileCollisionAction, ServiceConfig};
use crate::error::{Error, Operation, Result};
use crate::types::{
    ProgressSnapshot, ProgressStatus, SessionId, SessionInfo, VideoInfo, lenient_u64,
};
use crate::utils::{extract_filename_from_response, get_unique_path};


const INFO_FAILED_MESSAGE: &str = "Failed to fetch video info. Try again.";
const DOWNLOAD_FAILED_MESSAGE: &str = "Failed to start download.";
const POLLING_FAILED_MESSAGE: &str = "Polling failed";
const DEFAULT_REMOTE_FAILURE: &str = "Download failed";

/// Calls against the remote download service
///
/// Implemented over HTTP by [`HttpSessionClient`]; the controllers only depend
/// on this trait.
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Fetch metadata and open a session for `url`
    async fn fetch_info(&self, url: &str) -> Result<SessionInfo>;

    /// Ask the service to start downloading `session_id` with `format_code`
    async fn start_download(
        &self,
        session_id: &SessionId,
        format_code: &str,
        subtitle_lang: Option<&str>,
    ) -> Result<()>;

    /// Current progress of `session_id`
    async fn fetch_progress(&self, session_id: &SessionId) -> Result<ProgressSnapshot>;

    /// Absolute URL of the finished file
    fn file_url(&self, session_id: &SessionId) -> String;

    /// Download the finished file into `dest_dir`, returning the written path
    async fn retrieve_file(
        &self,
        session_id: &SessionId,
        dest_dir: &Path,
        collision: FileCollisionAction,
    ) -> Result<PathBuf>;
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    session_id: Option<String>,
    #[serde(default)]
    site: Option<String>,
    #[serde(default)]
    info: Option<VideoInfo>,
    // The service also sends the merged subtitle map at top level
    #[serde(default)]
    subtitles: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
struct WireProgress {
    #[serde(default, deserialize_with = "lenient_u64")]
    downloaded_bytes: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    total_bytes: Option<u64>,
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    eta: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProgressResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    progress: Option<WireProgress>,
}

/// `error` field of a service payload, if any
fn remote_error(body: &Value) -> Option<String> {
    match body.get("error")? {
        Value::Null => None,
        Value::String(message) => Some(message.clone()),
        other => Some(other.to_string()),
    }
}

impl ProgressResponse {
    fn into_snapshot(self) -> ProgressSnapshot {
        let status = ProgressStatus::from_wire(self.status.as_deref().unwrap_or_default());
        let progress = self.progress.unwrap_or_default();
        let error = match status {
            ProgressStatus::Failed => Some(
                progress
                    .error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| DEFAULT_REMOTE_FAILURE.to_string()),
            ),
            _ => None,
        };

        ProgressSnapshot {
            status,
            downloaded_bytes: progress.downloaded_bytes.unwrap_or(0),
            total_bytes: progress.total_bytes.unwrap_or(0),
            speed_bps: progress.speed,
            eta_secs: progress.eta,
            error,
        }
    }
}

/// HTTP implementation of [`SessionClient`]
#[derive(Clone, Debug)]
pub struct HttpSessionClient {
    http: reqwest::Client,
    base_url: url::Url,
}

impl HttpSessionClient {
    /// Build a client for the configured service
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = url::Url::parse(&base).map_err(|e| Error::Config {
            message: format!("invalid base_url '{}': {}", config.base_url, e),
            key: Some("base_url".to_string()),
        })?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self { http, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<url::Url> {
        Ok(self.base_url.join(path)?)
    }

    fn session_endpoint(&self, prefix: &str, session_id: &SessionId) -> Result<url::Url> {
        self.endpoint(&format!(
            "{}/{}",
            prefix,
            urlencoding::encode(session_id.as_str())
        ))
    }

    /// Send and decode a JSON payload. Err carries a log-only description.
    async fn send_json(
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<(reqwest::StatusCode, Value), String> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                format!("request timed out: {}", e)
            } else if e.is_connect() {
                format!("connection failed: {}", e)
            } else {
                format!("request failed: {}", e)
            }
        })?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| format!("failed to read response body: {}", e))?;
        let value = serde_json::from_slice::<Value>(&body)
            .map_err(|e| format!("invalid JSON (HTTP {}): {}", status, e))?;
        Ok((status, value))
    }
}

#[async_trait]
impl SessionClient for HttpSessionClient {
    async fn fetch_info(&self, url: &str) -> Result<SessionInfo> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::InfoFailed {
                message: "Please enter a URL.".to_string(),
            });
        }

        let info_failed = || Error::InfoFailed {
            message: INFO_FAILED_MESSAGE.to_string(),
        };

        let request = self.http.post(self.endpoint("info")?).form(&[("url", url)]);
        let (status, body) = Self::send_json(request).await.map_err(|cause| {
            warn!(url = %url, error = %cause, "info request failed");
            info_failed()
        })?;

        if let Some(message) = remote_error(&body) {
            debug!(url = %url, status = %status, error = %message, "service rejected info request");
            return Err(Error::RemoteReported {
                operation: Operation::Info,
                message,
            });
        }
        if !status.is_success() {
            warn!(url = %url, status = %status, "info request returned HTTP error");
            return Err(info_failed());
        }

        let parsed: InfoResponse = serde_json::from_value(body).map_err(|e| {
            warn!(url = %url, error = %e, "unexpected info payload");
            info_failed()
        })?;
        let session_id = parsed
            .session_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                warn!(url = %url, "info payload without session_id");
                info_failed()
            })?;

        let mut video_info = parsed.info.ok_or_else(|| {
            warn!(url = %url, "info payload without info object");
            info_failed()
        })?;
        if video_info.subtitles.is_empty()
            && let Some(subtitles) = parsed.subtitles
        {
            video_info.subtitles = subtitles;
        }

        debug!(
            url = %url,
            session_id = %session_id,
            formats = video_info.formats.len(),
            "info fetched"
        );

        Ok(SessionInfo {
            session_id: SessionId::new(session_id),
            site_name: parsed.site.unwrap_or_else(|| "unknown".to_string()),
            video_info,
        })
    }

    async fn start_download(
        &self,
        session_id: &SessionId,
        format_code: &str,
        subtitle_lang: Option<&str>,
    ) -> Result<()> {
        if format_code.trim().is_empty() {
            return Err(Error::DownloadStartFailed {
                message: "No format selected.".to_string(),
            });
        }

        let mut form = vec![
            ("session_id", session_id.as_str()),
            ("format_code", format_code),
        ];
        if let Some(lang) = subtitle_lang.filter(|l| !l.is_empty()) {
            form.push(("subtitle_lang", lang));
        }

        let request = self.http.post(self.endpoint("download")?).form(&form);
        let (status, body) = Self::send_json(request).await.map_err(|cause| {
            warn!(session_id = %session_id, error = %cause, "download request failed");
            Error::DownloadStartFailed {
                message: DOWNLOAD_FAILED_MESSAGE.to_string(),
            }
        })?;

        if let Some(message) = remote_error(&body) {
            debug!(session_id = %session_id, error = %message, "service rejected download request");
            return Err(Error::RemoteReported {
                operation: Operation::Download,
                message,
            });
        }
        if !status.is_success() {
            warn!(session_id = %session_id, status = %status, "download request returned HTTP error");
            return Err(Error::DownloadStartFailed {
                message: DOWNLOAD_FAILED_MESSAGE.to_string(),
            });
        }

        debug!(session_id = %session_id, format_code = %format_code, "download started");
        Ok(())
    }

    async fn fetch_progress(&self, session_id: &SessionId) -> Result<ProgressSnapshot> {
        let polling_failed = || Error::ProgressFailed {
            message: POLLING_FAILED_MESSAGE.to_string(),
        };

        let request = self
            .http
            .get(self.session_endpoint("progress", session_id)?);
        let (status, body) = Self::send_json(request).await.map_err(|cause| {
            warn!(session_id = %session_id, error = %cause, "progress request failed");
            polling_failed()
        })?;

        if let Some(message) = remote_error(&body) {
            debug!(session_id = %session_id, error = %message, "service reported progress error");
            return Err(Error::RemoteReported {
                operation: Operation::Progress,
                message,
            });
        }
        if !status.is_success() {
            warn!(session_id = %session_id, status = %status, "progress request returned HTTP error");
            return Err(polling_failed());
        }

        let parsed: ProgressResponse = serde_json::from_value(body).map_err(|e| {
            warn!(session_id = %session_id, error = %e, "unexpected progress payload");
            polling_failed()
        })?;
        Ok(parsed.into_snapshot())
    }

    fn file_url(&self, session_id: &SessionId) -> String {
        self.session_endpoint("download_file", session_id)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| session_id.file_path())
    }

    async fn retrieve_file(
        &self,
        session_id: &SessionId,
        dest_dir: &Path,
        collision: FileCollisionAction,
    ) -> Result<PathBuf> {
        let url = self.session_endpoint("download_file", session_id)?;
        let mut response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::RetrievalFailed {
                message: format!("request failed: {}", e),
            })?;

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));
        if is_json {
            let body: Value = response.json().await.map_err(|e| Error::RetrievalFailed {
                message: format!("invalid response: {}", e),
            })?;
            let message = remote_error(&body)
                .unwrap_or_else(|| "File not available or not found".to_string());
            return Err(Error::RemoteReported {
                operation: Operation::Retrieve,
                message,
            });
        }
        if !response.status().is_success() {
            return Err(Error::RetrievalFailed {
                message: format!("HTTP {}", response.status()),
            });
        }

        tokio::fs::create_dir_all(dest_dir).await?;
        let name = extract_filename_from_response(&response, url.as_str());
        let target = get_unique_path(&dest_dir.join(name), collision)?;

        let mut file = tokio::fs::File::create(&target).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(|e| Error::RetrievalFailed {
            message: format!("transfer interrupted: {}", e),
        })? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(
            session_id = %session_id,
            path = %target.display(),
            bytes = written,
            "file retrieved"
        );
        Ok(target)
    }
}

//! Core types and events for media-dl-client

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::error::ErrorKind;

/// Server-issued identifier tying together one metadata fetch and its download
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a raw session identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Service-relative path of the finished file (`/download_file/<id>`)
    pub fn file_path(&self) -> String {
        format!("/download_file/{}", self.0)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Position of an entry within the current batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub usize);

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One deliverable encoding offered by the service
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Format {
    /// Format identifier (`format_id`)
    #[serde(default, deserialize_with = "null_as_default")]
    pub format_id: String,
    /// File extension (`ext`)
    #[serde(default, deserialize_with = "null_as_default")]
    pub ext: String,
    /// Video codec, `"none"` for audio-only
    #[serde(default)]
    pub vcodec: Option<String>,
    /// Audio codec, `"none"` for video-only
    #[serde(default)]
    pub acodec: Option<String>,
    /// Human-readable description (`format`)
    #[serde(default)]
    pub format: Option<String>,
    /// Size in bytes when known
    #[serde(default, deserialize_with = "lenient_u64")]
    pub filesize: Option<u64>,
    /// Direct media URL
    #[serde(default)]
    pub url: Option<String>,
}

/// Metadata snapshot captured once from `/info`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Title
    #[serde(default)]
    pub title: Option<String>,
    /// Uploader name
    #[serde(default)]
    pub uploader: Option<String>,
    /// Duration in seconds
    #[serde(default)]
    pub duration: Option<f64>,
    /// Thumbnail URL
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// Offered formats
    #[serde(default, deserialize_with = "null_as_default")]
    pub formats: Vec<Format>,
    /// Subtitle languages; only the keys are used
    #[serde(default, deserialize_with = "null_as_default")]
    pub subtitles: BTreeMap<String, serde_json::Value>,
    /// Canonical page URL
    #[serde(default)]
    pub webpage_url: Option<String>,
}

/// Successful `/info` result
#[derive(Clone, Debug, PartialEq)]
pub struct SessionInfo {
    /// Issued session identifier
    pub session_id: SessionId,
    /// Extractor/site name reported by the service
    pub site_name: String,
    /// Metadata snapshot
    pub video_info: VideoInfo,
}

/// One remote extraction/download job and the user's choices for it
#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    /// Issued session identifier, immutable
    pub session_id: SessionId,
    /// URL the user submitted
    pub source_url: String,
    /// Site name reported by the service
    pub site_name: String,
    /// Metadata snapshot, immutable
    pub video_info: VideoInfo,
    /// Chosen format, frozen at download start
    pub selected_format_id: Option<String>,
    /// Chosen subtitle language, frozen at download start
    pub selected_subtitle_lang: Option<String>,
}

/// Canonical progress status, normalised from both service vocabularies
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    /// Session known but no download activity reported yet (`ready` or unknown)
    Pending,
    /// Transfer in progress
    Downloading,
    /// Terminal success (`completed` or `finished`)
    Finished,
    /// Terminal failure (`error`)
    Failed,
}

impl ProgressStatus {
    /// Map a raw service status string onto the canonical enum
    pub fn from_wire(status: &str) -> Self {
        match status {
            "downloading" => ProgressStatus::Downloading,
            "completed" | "finished" => ProgressStatus::Finished,
            "error" => ProgressStatus::Failed,
            _ => ProgressStatus::Pending,
        }
    }

    /// No further polling after this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressStatus::Finished | ProgressStatus::Failed)
    }
}

/// One parsed `/progress` response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Normalised status
    pub status: ProgressStatus,
    /// Bytes received so far
    pub downloaded_bytes: u64,
    /// Expected size, 0 when unknown
    pub total_bytes: u64,
    /// Transfer speed in bytes per second
    pub speed_bps: Option<f64>,
    /// Estimated seconds remaining
    pub eta_secs: Option<u64>,
    /// Error message carried by an `error` status
    pub error: Option<String>,
}

impl ProgressSnapshot {
    /// Percentage complete, or None when the total is unknown
    pub fn percent(&self) -> Option<f64> {
        if self.total_bytes == 0 {
            return None;
        }
        Some((self.downloaded_bytes as f64 / self.total_bytes as f64 * 100.0).min(100.0))
    }
}

/// Client-side download status of one session
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Nothing started
    #[default]
    Idle,
    /// Download running and being polled
    Downloading,
    /// Polling suspended by the user (the remote job keeps running)
    Paused,
    /// Download finished
    Completed,
    /// Download failed
    Error,
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DownloadStatus::Idle => "idle",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Per-session mutable progress record
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadState {
    /// Current status
    pub status: DownloadStatus,
    /// Bytes received so far
    pub downloaded_bytes: u64,
    /// Expected size, 0 when unknown
    pub total_bytes: u64,
    /// Last reported speed in bytes per second
    pub speed_bytes_per_sec: f64,
    /// Last reported ETA
    pub eta_seconds: Option<u64>,
    /// Set when status is Error
    pub error_message: Option<String>,
}

impl DownloadState {
    /// Commit the byte counters of a `downloading` snapshot
    pub fn apply(&mut self, snapshot: &ProgressSnapshot) {
        self.downloaded_bytes = snapshot.downloaded_bytes;
        self.total_bytes = snapshot.total_bytes;
        self.speed_bytes_per_sec = snapshot.speed_bps.unwrap_or(0.0);
        self.eta_seconds = snapshot.eta_secs;
    }

    /// Mark finished; the progress indicator reads 100%
    pub fn complete(&mut self) {
        self.status = DownloadStatus::Completed;
        if self.total_bytes > 0 {
            self.downloaded_bytes = self.total_bytes;
        }
        self.speed_bytes_per_sec = 0.0;
        self.eta_seconds = Some(0);
        self.error_message = None;
    }

    /// Mark failed with a user-visible message
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = DownloadStatus::Error;
        self.error_message = Some(message.into());
    }

    /// Progress percentage in 0..=100
    pub fn percent(&self) -> f64 {
        if self.status == DownloadStatus::Completed {
            return 100.0;
        }
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.downloaded_bytes as f64 / self.total_bytes as f64 * 100.0).min(100.0)
    }

    /// One-line description as shown under the progress bar
    pub fn status_line(&self) -> String {
        match self.status {
            DownloadStatus::Idle => String::new(),
            DownloadStatus::Downloading if self.total_bytes > 0 => format!(
                "Downloading... {:.1}% - Speed: {:.1} KB/s - ETA: {}s",
                self.percent(),
                self.speed_bytes_per_sec / 1024.0,
                self.eta_seconds.unwrap_or(0)
            ),
            DownloadStatus::Downloading => "Downloading...".to_string(),
            DownloadStatus::Paused => "Paused".to_string(),
            DownloadStatus::Completed => "Download completed!".to_string(),
            DownloadStatus::Error => self.error_message.clone().unwrap_or_default(),
        }
    }
}

/// Which step of a batch entry failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    /// `/info` failed
    Info,
    /// `/download` failed
    Download,
    /// Polling failed or the service reported an error status
    Progress,
}

/// Visual state of a batch entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum EntryState {
    /// Created, not yet started
    Waiting,
    /// Started and polling
    Downloading,
    /// Polling suspended by the user
    Paused,
    /// Finished
    Completed,
    /// Failed at the given stage
    Failed {
        /// Step that failed
        stage: FailureStage,
        /// User-visible message
        message: String,
    },
}

impl EntryState {
    /// Completed or failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryState::Completed | EntryState::Failed { .. })
    }
}

/// Snapshot of one batch entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Position in the batch
    pub id: EntryId,
    /// Submitted URL
    pub source_url: String,
    /// Session issued for this entry, once `/info` succeeded
    pub session_id: Option<SessionId>,
    /// Visual state
    pub state: EntryState,
    /// Progress counters
    pub download: DownloadState,
    /// Local pause flag consulted by the entry's poller
    pub is_paused: bool,
    /// Directly playable media URL for preview
    pub preview_url: Option<String>,
    /// Status text shown on the entry
    pub status_text: String,
    /// Service path of the finished file
    pub file_path: Option<String>,
    /// When the entry was created
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Event emitted to the presentation layer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Single-download controller was reset
    Reset,

    /// All pollers stopped; no further events follow
    Shutdown,

    /// Metadata loaded and a session created
    InfoLoaded {
        /// Session ID
        session_id: SessionId,
        /// Site name
        site: String,
        /// Title (or "Unknown Title")
        title: String,
        /// Number of selectable formats
        formats: usize,
        /// Whether the subtitle control is enabled
        subtitles_available: bool,
    },

    /// Download accepted by the service, polling started
    DownloadStarted {
        /// Session ID
        session_id: SessionId,
        /// Format code sent to the service
        format_code: String,
    },

    /// Progress committed
    Progress {
        /// Session ID
        session_id: SessionId,
        /// Percentage complete
        percent: f64,
        /// Bytes received
        downloaded_bytes: u64,
        /// Expected size
        total_bytes: u64,
        /// Bytes per second
        speed_bps: f64,
        /// Seconds remaining
        #[serde(skip_serializing_if = "Option::is_none")]
        eta_secs: Option<u64>,
    },

    /// Polling suspended
    Paused {
        /// Session ID
        session_id: SessionId,
    },

    /// Polling resumed
    Resumed {
        /// Session ID
        session_id: SessionId,
    },

    /// Download finished; the file can be retrieved from `file_path`. Emitted once per session.
    DownloadReady {
        /// Session ID
        session_id: SessionId,
        /// Service-relative path (`/download_file/<id>`)
        file_path: String,
        /// Absolute URL for copy-to-clipboard
        file_url: String,
    },

    /// Auto-retrieval wrote the finished file
    FileRetrieved {
        /// Session ID
        session_id: SessionId,
        /// Local path written
        path: std::path::PathBuf,
    },

    /// Auto-retrieval of a finished file failed; the download itself stays completed
    RetrievalFailed {
        /// Session ID
        session_id: SessionId,
        /// User-visible message
        message: String,
    },

    /// Single-download flow failed
    Failed {
        /// Session ID if one existed
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        /// Error taxonomy tag
        kind: ErrorKind,
        /// User-visible message
        message: String,
    },

    /// Batch rejected before any entry was created
    BatchRejected {
        /// User-visible message
        message: String,
    },

    /// Batch entry created in Waiting state
    EntryQueued {
        /// Entry ID
        entry: EntryId,
        /// Submitted URL
        url: String,
    },

    /// Preview media URL found for an entry
    EntryPreview {
        /// Entry ID
        entry: EntryId,
        /// Media URL
        media_url: String,
    },

    /// Entry download accepted by the service
    EntryDownloading {
        /// Entry ID
        entry: EntryId,
        /// Session ID
        session_id: SessionId,
    },

    /// Entry progress committed
    EntryProgress {
        /// Entry ID
        entry: EntryId,
        /// Percentage complete
        percent: f64,
    },

    /// Entry polling suspended
    EntryPaused {
        /// Entry ID
        entry: EntryId,
    },

    /// Entry polling resumed
    EntryResumed {
        /// Entry ID
        entry: EntryId,
    },

    /// Entry finished
    EntryCompleted {
        /// Entry ID
        entry: EntryId,
        /// Session ID
        session_id: SessionId,
        /// Service-relative file path
        file_path: String,
    },

    /// Entry failed; siblings are unaffected
    EntryFailed {
        /// Entry ID
        entry: EntryId,
        /// Step that failed
        stage: FailureStage,
        /// User-visible message
        message: String,
    },
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// Sizes and counters sometimes arrive as floats (e.g. 1048576.0)
pub(crate) fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let number = Option::<serde_json::Number>::deserialize(deserializer)?;
    Ok(number.and_then(|n| {
        n.as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
    }))
}

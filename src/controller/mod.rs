//! Single-download controller: one session from metadata to finished file.
//!
//! States: `Idle -> Downloading -> {Completed | Error}`, with `Paused` as a
//! client-local side state of `Downloading` (the remote job keeps running,
//! only polling is suspended).
//!
//! The controller owns its [`DownloadState`]; its poller only proposes
//! snapshots through [`PollObserver`]. Every public operation bumps or checks
//! a generation counter so that results belonging to a superseded session are
//! never committed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::client::SessionClient;
use crate::config::Config;
use crate::error::{Error, ErrorKind, Result};
use crate::formats::{preview_for_format, resolve_format_code, selectable_formats};
use crate::poller::{PauseFlag, PollObserver, ProgressPoller};
use crate::types::{
    DownloadState, DownloadStatus, Event, Format, ProgressSnapshot, Session, SessionId,
};


/// Emitted state of the controller, for presentation code
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    /// Active session, if metadata was fetched
    pub session_id: Option<SessionId>,
    /// Site name of the active session
    pub site_name: Option<String>,
    /// Title ("Unknown Title" when missing)
    pub title: Option<String>,
    /// Formats that may be chosen
    pub selectable_formats: Vec<Format>,
    /// Subtitle language options
    pub subtitle_languages: Vec<String>,
    /// Whether the subtitle control is enabled
    pub subtitles_enabled: bool,
    /// Current format choice
    pub selected_format_id: Option<String>,
    /// Current subtitle choice
    pub selected_subtitle_lang: Option<String>,
    /// Format code sent with the last successful download request
    pub format_code: Option<String>,
    /// Progress record
    pub download: DownloadState,
    /// Percentage for the progress bar
    pub percent: f64,
    /// Progress text
    pub status_line: String,
    /// Whether the download control accepts a click
    pub download_enabled: bool,
    /// Last user-visible error
    pub error_message: Option<String>,
    /// Service path of the finished file (`/download_file/<id>`)
    pub download_link: Option<String>,
    /// Absolute URL of the finished file, for copy-to-clipboard
    pub file_url: Option<String>,
    /// Media URL for the preview player
    pub preview_url: Option<String>,
}

#[derive(Default)]
struct ControllerState {
    session: Option<Session>,
    selectable: Vec<Format>,
    subtitle_languages: Vec<String>,
    download: DownloadState,
    format_code: Option<String>,
    /// A `/download` request is in flight
    starting: bool,
    error: Option<(ErrorKind, String)>,
    download_link: Option<String>,
    file_url: Option<String>,
    ready_emitted: bool,
    paused: PauseFlag,
    poller: Option<ProgressPoller>,
}

impl ControllerState {
    fn stop_poller(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
    }

    fn is_active(&self) -> bool {
        matches!(
            self.download.status,
            DownloadStatus::Downloading | DownloadStatus::Paused
        )
    }

    fn selection_frozen(&self) -> bool {
        self.starting
            || matches!(
                self.download.status,
                DownloadStatus::Downloading | DownloadStatus::Paused | DownloadStatus::Completed
            )
    }

    fn record_error(&mut self, error: &Error) {
        let message = error.to_string();
        self.download.fail(message.clone());
        self.error = Some((error.kind(), message));
        self.starting = false;
    }
}

struct Inner {
    client: Arc<dyn SessionClient>,
    config: Arc<Config>,
    event_tx: broadcast::Sender<Event>,
    state: Mutex<ControllerState>,
    generation: AtomicU64,
}

impl Inner {
    fn emit(&self, event: Event) {
        // no subscribers is fine
        self.event_tx.send(event).ok();
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Controller for one download session at a time
///
/// Cloneable; clones share the same session.
#[derive(Clone)]
pub struct DownloadController {
    inner: Arc<Inner>,
}

impl DownloadController {
    /// Create an idle controller
    pub fn new(
        client: Arc<dyn SessionClient>,
        config: Arc<Config>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                config,
                event_tx,
                state: Mutex::new(ControllerState::default()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to controller events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.event_tx.subscribe()
    }

    /// Discard the current session, stop polling and re-enable the download control
    pub async fn reset(&self) {
        let mut state = self.inner.state.lock().await;
        self.reset_locked(&mut state);
    }

    fn reset_locked(&self, state: &mut ControllerState) {
        state.stop_poller();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        *state = ControllerState::default();
        self.inner.emit(Event::Reset);
    }

    /// Fetch metadata for `url` and open a new session
    ///
    /// All prior state is reset first. On failure the controller is in the
    /// Error state with the service's message and no session exists.
    pub async fn begin(&self, url: &str) -> Result<Session> {
        let generation = {
            let mut state = self.inner.state.lock().await;
            self.reset_locked(&mut state);
            self.inner.current_generation()
        };

        let url = url.trim();
        if url.is_empty() {
            return Err(Error::EmptyInput("Please enter a URL.".to_string()));
        }

        let result = self.inner.client.fetch_info(url).await;

        let mut state = self.inner.state.lock().await;
        if self.inner.current_generation() != generation {
            debug!(url = %url, "discarding info result for superseded session");
            return Err(Error::invalid_state("begin", "superseded"));
        }

        let info = match result {
            Ok(info) => info,
            Err(e) => {
                warn!(url = %url, error = %e, "metadata fetch failed");
                state.record_error(&e);
                self.inner.emit(Event::Failed {
                    session_id: None,
                    kind: e.kind(),
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let selectable = selectable_formats(&info.video_info.formats);
        let subtitle_languages = info.video_info.subtitle_languages();
        let session = Session {
            session_id: info.session_id,
            source_url: url.to_string(),
            site_name: info.site_name,
            selected_format_id: selectable.first().map(|f| f.format_id.clone()),
            selected_subtitle_lang: None,
            video_info: info.video_info,
        };

        info!(
            session_id = %session.session_id,
            site = %session.site_name,
            formats = selectable.len(),
            "session created"
        );
        self.inner.emit(Event::InfoLoaded {
            session_id: session.session_id.clone(),
            site: session.site_name.clone(),
            title: session.video_info.display_title(),
            formats: selectable.len(),
            subtitles_available: !subtitle_languages.is_empty(),
        });

        state.selectable = selectable;
        state.subtitle_languages = subtitle_languages;
        state.session = Some(session.clone());
        Ok(session)
    }

    /// Choose the format to download
    pub async fn select_format(&self, format_id: &str) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.selection_frozen() {
            return Err(Error::invalid_state(
                "change format",
                state.download.status,
            ));
        }
        if !state.selectable.iter().any(|f| f.format_id == format_id) {
            return Err(Error::invalid_state(
                "select format",
                format!("format {} not offered", format_id),
            ));
        }
        let session = state
            .session
            .as_mut()
            .ok_or_else(|| Error::invalid_state("select format", "idle"))?;
        session.selected_format_id = Some(format_id.to_string());
        Ok(())
    }

    /// Choose a subtitle language, or None for no subtitles
    pub async fn select_subtitle(&self, lang: Option<&str>) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.selection_frozen() {
            return Err(Error::invalid_state(
                "change subtitles",
                state.download.status,
            ));
        }
        let lang = lang.filter(|l| !l.is_empty());
        if let Some(lang) = lang
            && !state.subtitle_languages.iter().any(|l| l == lang)
        {
            return Err(Error::invalid_state(
                "select subtitles",
                format!("language {} not offered", lang),
            ));
        }
        let session = state
            .session
            .as_mut()
            .ok_or_else(|| Error::invalid_state("select subtitles", "idle"))?;
        session.selected_subtitle_lang = lang.map(str::to_string);
        Ok(())
    }

    /// Start downloading the active session and begin polling
    ///
    /// `audio_only` selects the audio preference chain instead of the chosen
    /// format. Returns the format code sent to the service. On failure the
    /// controller is in the Error state and the download control is enabled.
    pub async fn download(&self, audio_only: bool) -> Result<String> {
        let (generation, session_id, format_code, subtitle_lang) = {
            let mut state = self.inner.state.lock().await;
            let Some(session) = state.session.as_ref() else {
                return Err(Error::invalid_state("download", "idle"));
            };
            if state.starting || state.is_active() {
                return Err(Error::invalid_state(
                    "download",
                    if state.starting {
                        "starting".to_string()
                    } else {
                        state.download.status.to_string()
                    },
                ));
            }

            let session_id = session.session_id.clone();
            let subtitle_lang = session.selected_subtitle_lang.clone();
            let format_code = resolve_format_code(
                audio_only,
                session.selected_format_id.as_deref(),
                &session.video_info.formats,
            );

            let Some(format_code) = format_code else {
                let e = Error::DownloadStartFailed {
                    message: "No format selected.".to_string(),
                };
                state.record_error(&e);
                self.inner.emit(Event::Failed {
                    session_id: Some(session_id),
                    kind: e.kind(),
                    message: e.to_string(),
                });
                return Err(e);
            };

            state.starting = true;
            state.error = None;
            state.download = DownloadState::default();
            state.download_link = None;
            state.file_url = None;
            state.ready_emitted = false;
            (
                self.inner.current_generation(),
                session_id,
                format_code,
                subtitle_lang,
            )
        };

        let result = self
            .inner
            .client
            .start_download(&session_id, &format_code, subtitle_lang.as_deref())
            .await;

        let mut state = self.inner.state.lock().await;
        if self.inner.current_generation() != generation {
            debug!(session_id = %session_id, "discarding download start for superseded session");
            return Err(Error::invalid_state("download", "superseded"));
        }

        if let Err(e) = result {
            warn!(session_id = %session_id, error = %e, "download start failed");
            state.record_error(&e);
            self.inner.emit(Event::Failed {
                session_id: Some(session_id),
                kind: e.kind(),
                message: e.to_string(),
            });
            return Err(e);
        }

        state.starting = false;
        state.download.status = DownloadStatus::Downloading;
        state.format_code = Some(format_code.clone());
        state.paused = PauseFlag::new();

        let mut poller = ProgressPoller::new(
            self.inner.client.clone(),
            session_id.clone(),
            self.inner.config.polling.single_interval,
            state.paused.clone(),
        );
        poller.start(Arc::new(SessionObserver {
            inner: Arc::downgrade(&self.inner),
            generation,
        }));
        state.poller = Some(poller);

        info!(session_id = %session_id, format_code = %format_code, "download started");
        self.inner.emit(Event::DownloadStarted {
            session_id,
            format_code: format_code.clone(),
        });
        Ok(format_code)
    }

    /// Suspend polling. The remote job is not paused.
    pub async fn pause(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let status = state.download.status;
        match status {
            DownloadStatus::Paused => Ok(()),
            DownloadStatus::Downloading => {
                state.paused.pause();
                state.download.status = DownloadStatus::Paused;
                if let Some(session) = &state.session {
                    debug!(session_id = %session.session_id, "polling paused");
                    self.inner.emit(Event::Paused {
                        session_id: session.session_id.clone(),
                    });
                }
                Ok(())
            }
            other => Err(Error::invalid_state("pause", other)),
        }
    }

    /// Continue polling after [`pause`](Self::pause)
    pub async fn resume(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let status = state.download.status;
        match status {
            DownloadStatus::Downloading => Ok(()),
            DownloadStatus::Paused => {
                state.paused.resume();
                state.download.status = DownloadStatus::Downloading;
                if let Some(session) = &state.session {
                    debug!(session_id = %session.session_id, "polling resumed");
                    self.inner.emit(Event::Resumed {
                        session_id: session.session_id.clone(),
                    });
                }
                Ok(())
            }
            other => Err(Error::invalid_state("resume", other)),
        }
    }

    /// Current status
    pub async fn status(&self) -> DownloadStatus {
        self.inner.state.lock().await.download.status
    }

    /// Active session, if any
    pub async fn session(&self) -> Option<Session> {
        self.inner.state.lock().await.session.clone()
    }

    /// Whether a poller is currently ticking
    pub async fn is_polling(&self) -> bool {
        self.inner
            .state
            .lock()
            .await
            .poller
            .as_ref()
            .is_some_and(|p| p.is_running())
    }

    /// Preview URL of the selected format, if it can be played
    pub async fn preview_url(&self) -> Option<String> {
        let state = self.inner.state.lock().await;
        self.preview_locked(&state)
    }

    fn preview_locked(&self, state: &ControllerState) -> Option<String> {
        let selected = state.session.as_ref()?.selected_format_id.as_deref()?;
        let format = state.selectable.iter().find(|f| f.format_id == selected)?;
        preview_for_format(format, &self.inner.config.preview.blocked_hosts)
    }

    /// Full emitted state
    pub async fn snapshot(&self) -> ControllerSnapshot {
        let state = self.inner.state.lock().await;
        let session = state.session.as_ref();
        ControllerSnapshot {
            session_id: session.map(|s| s.session_id.clone()),
            site_name: session.map(|s| s.site_name.clone()),
            title: session.map(|s| s.video_info.display_title()),
            selectable_formats: state.selectable.clone(),
            subtitle_languages: state.subtitle_languages.clone(),
            subtitles_enabled: !state.subtitle_languages.is_empty(),
            selected_format_id: session.and_then(|s| s.selected_format_id.clone()),
            selected_subtitle_lang: session.and_then(|s| s.selected_subtitle_lang.clone()),
            format_code: state.format_code.clone(),
            download: state.download.clone(),
            percent: state.download.percent(),
            status_line: state.download.status_line(),
            download_enabled: !state.starting && !state.is_active(),
            error_message: state.error.as_ref().map(|(_, m)| m.clone()),
            download_link: state.download_link.clone(),
            file_url: state.file_url.clone(),
            preview_url: self.preview_locked(&state),
        }
    }
}

/// Commits poll results into the controller that started the poller
struct SessionObserver {
    inner: Weak<Inner>,
    generation: u64,
}

impl SessionObserver {
    /// Controller still alive and still on the session this poller belongs to
    fn live(&self) -> Option<Arc<Inner>> {
        let inner = self.inner.upgrade()?;
        (inner.current_generation() == self.generation).then_some(inner)
    }
}

#[async_trait]
impl PollObserver for SessionObserver {
    async fn on_progress(&self, snapshot: ProgressSnapshot) {
        let Some(inner) = self.live() else { return };
        let mut state = inner.state.lock().await;
        if inner.current_generation() != self.generation || !state.is_active() {
            return;
        }
        let Some(session_id) = state.session.as_ref().map(|s| s.session_id.clone()) else {
            return;
        };

        state.download.apply(&snapshot);
        inner.emit(Event::Progress {
            session_id,
            percent: state.download.percent(),
            downloaded_bytes: state.download.downloaded_bytes,
            total_bytes: state.download.total_bytes,
            speed_bps: state.download.speed_bytes_per_sec,
            eta_secs: state.download.eta_seconds,
        });
    }

    async fn on_complete(&self, snapshot: ProgressSnapshot) {
        let Some(inner) = self.live() else { return };
        let mut state = inner.state.lock().await;
        if inner.current_generation() != self.generation
            || !state.is_active()
            || state.ready_emitted
        {
            return;
        }
        let Some(session_id) = state.session.as_ref().map(|s| s.session_id.clone()) else {
            return;
        };

        if snapshot.total_bytes > 0 {
            state.download.apply(&snapshot);
        }
        state.download.complete();
        state.stop_poller();
        state.paused.resume();

        let file_path = session_id.file_path();
        let file_url = inner.client.file_url(&session_id);
        state.download_link = Some(file_path.clone());
        state.file_url = Some(file_url.clone());
        state.ready_emitted = true;

        info!(session_id = %session_id, file = %file_path, "download ready");
        inner.emit(Event::Progress {
            session_id: session_id.clone(),
            percent: 100.0,
            downloaded_bytes: state.download.downloaded_bytes,
            total_bytes: state.download.total_bytes,
            speed_bps: 0.0,
            eta_secs: Some(0),
        });
        inner.emit(Event::DownloadReady {
            session_id: session_id.clone(),
            file_path,
            file_url,
        });
        drop(state);

        if let Some(dir) = inner.config.retrieval.auto_retrieve_dir.clone() {
            spawn_retrieval(inner, session_id, dir);
        }
    }

    async fn on_error(&self, error: Error) {
        let Some(inner) = self.live() else { return };
        let mut state = inner.state.lock().await;
        if inner.current_generation() != self.generation || !state.is_active() {
            return;
        }
        let session_id = state.session.as_ref().map(|s| s.session_id.clone());

        warn!(session_id = ?session_id, error = %error, "download failed");
        state.stop_poller();
        state.paused.resume();
        state.record_error(&error);
        inner.emit(Event::Failed {
            session_id,
            kind: error.kind(),
            message: error.to_string(),
        });
    }
}

/// Fetch the finished file into `dir` (fire and forget)
fn spawn_retrieval(inner: Arc<Inner>, session_id: SessionId, dir: PathBuf) {
    let collision = inner.config.retrieval.file_collision;
    tokio::spawn(async move {
        match inner
            .client
            .retrieve_file(&session_id, &dir, collision)
            .await
        {
            Ok(path) => {
                info!(session_id = %session_id, path = %path.display(), "file retrieved");
                inner.emit(Event::FileRetrieved { session_id, path });
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "file retrieval failed");
                inner.emit(Event::RetrievalFailed {
                    session_id,
                    message: e.to_string(),
                });
            }
        }
    });
}

//! Multi-download queue: one independent slot per submitted URL.
//!
//! Each entry runs `/info`, `/download` (with the configured format code) and
//! then its own [`ProgressPoller`]. Entries never share progress state; one
//! entry failing or pausing leaves its siblings untouched.
//!
//! Entries start one after another by default. Only the start of each entry
//! is sequenced: once an entry's poller is running the queue moves on, so
//! downloads themselves always overlap.

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::client::SessionClient;
use crate::config::{Config, StartMode};
use crate::error::{Error, Result};
use crate::formats::combined_preview;
use crate::poller::{PauseFlag, PollObserver, ProgressPoller};
use crate::types::{
    DownloadState, DownloadStatus, EntryId, EntryState, Event, FailureStage, ProgressSnapshot,
    QueueEntry,
};

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

const EMPTY_BATCH: &str = "Please enter at least one URL to download.";

struct EntrySlot {
    entry: QueueEntry,
    paused: PauseFlag,
    poller: Option<ProgressPoller>,
}

impl EntrySlot {
    fn new(id: EntryId, source_url: String) -> Self {
        Self {
            entry: QueueEntry {
                id,
                source_url,
                session_id: None,
                state: EntryState::Waiting,
                download: DownloadState::default(),
                is_paused: false,
                preview_url: None,
                status_text: "Waiting...".to_string(),
                file_path: None,
                created_at: Utc::now(),
            },
            paused: PauseFlag::new(),
            poller: None,
        }
    }

    fn stop_poller(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
    }

    fn is_active(&self) -> bool {
        matches!(
            self.entry.state,
            EntryState::Downloading | EntryState::Paused
        )
    }

    fn fail(&mut self, stage: FailureStage, message: String, status_text: String) {
        self.stop_poller();
        self.entry.download.fail(message.clone());
        self.entry.state = EntryState::Failed { stage, message };
        self.entry.status_text = status_text;
    }
}

type Slot = Arc<Mutex<EntrySlot>>;

struct QueueInner {
    client: Arc<dyn SessionClient>,
    config: Arc<Config>,
    event_tx: broadcast::Sender<Event>,
    slots: Mutex<Vec<Slot>>,
    batch: AtomicU64,
}

impl QueueInner {
    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    fn current_batch(&self) -> u64 {
        self.batch.load(Ordering::SeqCst)
    }
}

/// Manager for a batch of independent downloads
///
/// Cloneable; clones share the same batch.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<QueueInner>,
}

impl QueueManager {
    /// Create an empty queue
    pub fn new(
        client: Arc<dyn SessionClient>,
        config: Arc<Config>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                client,
                config,
                event_tx,
                slots: Mutex::new(Vec::new()),
                batch: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to queue events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.event_tx.subscribe()
    }

    /// Replace the queue with one entry per non-empty line of `batch`
    ///
    /// Every entry is created in `Waiting` before any is processed. Returns
    /// once each entry has either started polling or failed; downloads keep
    /// running in the background.
    pub async fn submit(&self, batch: &str) -> Result<Vec<EntryId>> {
        let urls: Vec<String> = batch
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        if urls.is_empty() {
            self.inner.emit(Event::BatchRejected {
                message: EMPTY_BATCH.to_string(),
            });
            return Err(Error::EmptyInput(EMPTY_BATCH.to_string()));
        }

        let (generation, slots) = {
            let mut slots = self.inner.slots.lock().await;
            stop_all(&slots).await;
            let generation = self.inner.batch.fetch_add(1, Ordering::SeqCst) + 1;

            *slots = urls
                .iter()
                .enumerate()
                .map(|(i, url)| Arc::new(Mutex::new(EntrySlot::new(EntryId(i), url.clone()))))
                .collect();
            for (i, url) in urls.iter().enumerate() {
                self.inner.emit(Event::EntryQueued {
                    entry: EntryId(i),
                    url: url.clone(),
                });
            }
            (generation, slots.clone())
        };

        info!(
            entries = slots.len(),
            mode = ?self.inner.config.queue.start_mode,
            "batch submitted"
        );

        match self.inner.config.queue.start_mode {
            StartMode::Sequential => {
                for slot in &slots {
                    process_entry(&self.inner, slot, generation).await;
                }
            }
            StartMode::Concurrent => {
                join_all(
                    slots
                        .iter()
                        .map(|slot| process_entry(&self.inner, slot, generation)),
                )
                .await;
            }
        }

        Ok((0..slots.len()).map(EntryId).collect())
    }

    /// Suspend polling for one entry. The remote job is not paused.
    pub async fn pause(&self, id: EntryId) -> Result<()> {
        let slot = self.slot(id).await?;
        let mut slot = slot.lock().await;
        let state = slot.entry.state.clone();
        match state {
            EntryState::Paused => Ok(()),
            EntryState::Downloading => {
                slot.paused.pause();
                slot.entry.is_paused = true;
                slot.entry.state = EntryState::Paused;
                slot.entry.download.status = DownloadStatus::Paused;
                slot.entry.status_text = "Paused".to_string();
                debug!(entry = id.0, "entry paused");
                self.inner.emit(Event::EntryPaused { entry: id });
                Ok(())
            }
            other => Err(Error::invalid_state("pause", entry_state_name(&other))),
        }
    }

    /// Continue polling for one entry
    pub async fn resume(&self, id: EntryId) -> Result<()> {
        let slot = self.slot(id).await?;
        let mut slot = slot.lock().await;
        let state = slot.entry.state.clone();
        match state {
            EntryState::Downloading => Ok(()),
            EntryState::Paused => {
                slot.paused.resume();
                slot.entry.is_paused = false;
                slot.entry.state = EntryState::Downloading;
                slot.entry.download.status = DownloadStatus::Downloading;
                slot.entry.status_text = "Resuming...".to_string();
                debug!(entry = id.0, "entry resumed");
                self.inner.emit(Event::EntryResumed { entry: id });
                Ok(())
            }
            other => Err(Error::invalid_state("resume", entry_state_name(&other))),
        }
    }

    /// Snapshot of every entry, in submitted order
    pub async fn entries(&self) -> Vec<QueueEntry> {
        let slots = self.inner.slots.lock().await.clone();
        let mut entries = Vec::with_capacity(slots.len());
        for slot in slots {
            entries.push(slot.lock().await.entry.clone());
        }
        entries
    }

    /// Snapshot of one entry
    pub async fn entry(&self, id: EntryId) -> Result<QueueEntry> {
        let slot = self.slot(id).await?;
        let entry = slot.lock().await.entry.clone();
        Ok(entry)
    }

    /// Stop every poller and drop all entries
    pub async fn clear(&self) {
        let mut slots = self.inner.slots.lock().await;
        stop_all(&slots).await;
        self.inner.batch.fetch_add(1, Ordering::SeqCst);
        slots.clear();
    }

    async fn slot(&self, id: EntryId) -> Result<Slot> {
        self.inner
            .slots
            .lock()
            .await
            .get(id.0)
            .cloned()
            .ok_or(Error::EntryNotFound(id.0))
    }
}

async fn stop_all(slots: &[Slot]) {
    for slot in slots {
        slot.lock().await.stop_poller();
    }
}

fn entry_state_name(state: &EntryState) -> &'static str {
    match state {
        EntryState::Waiting => "waiting",
        EntryState::Downloading => "downloading",
        EntryState::Paused => "paused",
        EntryState::Completed => "completed",
        EntryState::Failed { .. } => "failed",
    }
}

/// Run one entry up to the point where its poller is ticking
async fn process_entry(inner: &Arc<QueueInner>, slot: &Slot, generation: u64) {
    let (id, url) = {
        let slot = slot.lock().await;
        (slot.entry.id, slot.entry.source_url.clone())
    };

    let info = inner.client.fetch_info(&url).await;
    if inner.current_batch() != generation {
        return;
    }
    let info = match info {
        Ok(info) => info,
        Err(e) => {
            let message = e.to_string();
            warn!(entry = id.0, url = %url, error = %message, "entry metadata fetch failed");
            slot.lock().await.fail(
                FailureStage::Info,
                message.clone(),
                format!("Info failed: {}", message),
            );
            inner.emit(Event::EntryFailed {
                entry: id,
                stage: FailureStage::Info,
                message,
            });
            return;
        }
    };

    let session_id = info.session_id.clone();
    let preview = combined_preview(&info.video_info.formats);
    {
        let mut slot = slot.lock().await;
        slot.entry.session_id = Some(session_id.clone());
        slot.entry.preview_url = preview.clone();
    }
    if let Some(media_url) = preview {
        inner.emit(Event::EntryPreview {
            entry: id,
            media_url,
        });
    }

    let format_code = &inner.config.queue.format_code;
    let started = inner
        .client
        .start_download(&session_id, format_code, None)
        .await;
    if inner.current_batch() != generation {
        return;
    }
    if let Err(e) = started {
        let status_text = match e {
            Error::RemoteReported { .. } => "Download error",
            _ => "Download start failed",
        };
        let message = e.to_string();
        warn!(entry = id.0, session_id = %session_id, error = %message, "entry download start failed");
        slot.lock()
            .await
            .fail(FailureStage::Download, message.clone(), status_text.to_string());
        inner.emit(Event::EntryFailed {
            entry: id,
            stage: FailureStage::Download,
            message,
        });
        return;
    }

    let mut guard = slot.lock().await;
    guard.entry.state = EntryState::Downloading;
    guard.entry.download.status = DownloadStatus::Downloading;
    guard.entry.status_text = "Downloading...".to_string();

    let mut poller = ProgressPoller::new(
        inner.client.clone(),
        session_id.clone(),
        inner.config.polling.multi_interval,
        guard.paused.clone(),
    );
    poller.start(Arc::new(EntryObserver {
        queue: Arc::downgrade(inner),
        slot: Arc::downgrade(slot),
        id,
        generation,
    }));
    guard.poller = Some(poller);
    drop(guard);

    info!(entry = id.0, session_id = %session_id, "entry download started");
    inner.emit(Event::EntryDownloading {
        entry: id,
        session_id,
    });
}

/// Commits poll results into a single entry
struct EntryObserver {
    queue: Weak<QueueInner>,
    slot: Weak<Mutex<EntrySlot>>,
    id: EntryId,
    generation: u64,
}

impl EntryObserver {
    fn live(&self) -> Option<(Arc<QueueInner>, Slot)> {
        let queue = self.queue.upgrade()?;
        if queue.current_batch() != self.generation {
            return None;
        }
        Some((queue, self.slot.upgrade()?))
    }
}

#[async_trait]
impl PollObserver for EntryObserver {
    async fn on_progress(&self, snapshot: ProgressSnapshot) {
        let Some((queue, slot)) = self.live() else {
            return;
        };
        let mut slot = slot.lock().await;
        if !slot.is_active() {
            return;
        }
        slot.entry.download.apply(&snapshot);
        let percent = slot.entry.download.percent();
        if !slot.entry.is_paused {
            slot.entry.status_text = format!("Downloading… {:.1}%", percent);
        }
        queue.emit(Event::EntryProgress {
            entry: self.id,
            percent,
        });
    }

    async fn on_complete(&self, snapshot: ProgressSnapshot) {
        let Some((queue, slot)) = self.live() else {
            return;
        };
        let mut slot = slot.lock().await;
        if !slot.is_active() {
            return;
        }
        let Some(session_id) = slot.entry.session_id.clone() else {
            return;
        };

        if snapshot.total_bytes > 0 {
            slot.entry.download.apply(&snapshot);
        }
        slot.entry.download.complete();
        slot.stop_poller();
        let file_path = session_id.file_path();
        slot.entry.state = EntryState::Completed;
        slot.entry.status_text = "Completed".to_string();
        slot.entry.file_path = Some(file_path.clone());

        info!(entry = self.id.0, session_id = %session_id, "entry completed");
        queue.emit(Event::EntryCompleted {
            entry: self.id,
            session_id,
            file_path,
        });
    }

    async fn on_error(&self, error: Error) {
        let Some((queue, slot)) = self.live() else {
            return;
        };
        let mut slot = slot.lock().await;
        if !slot.is_active() {
            return;
        }

        let message = error.to_string();
        let status_text = match error {
            Error::RemoteReported { .. } => format!("Error: {}", message),
            _ => "Polling failed".to_string(),
        };
        warn!(entry = self.id.0, error = %message, "entry failed");
        slot.fail(FailureStage::Progress, message.clone(), status_text);
        queue.emit(Event::EntryFailed {
            entry: self.id,
            stage: FailureStage::Progress,
            message,
        });
    }
}

//! Fixed-interval progress polling bound to one session.
//!
//! The poller only proposes updates: every parsed `/progress` response is
//! handed to a [`PollObserver`], which owns and commits the session state.
//!
//! - A tick while the pause flag is set is skipped without a network call.
//! - Missed ticks are never replayed (`MissedTickBehavior::Skip`), so resuming
//!   continues at the normal rate.
//! - Ticks run one after another on a single task: at most one tick's effects
//!   are applied per interval.
//! - Terminal statuses and request failures stop the poller and are signalled
//!   exactly once. A result that arrives after [`ProgressPoller::stop`] is
//!   discarded.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::client::SessionClient;
use crate::error::{Error, Operation};
use crate::types::{ProgressSnapshot, ProgressStatus, SessionId};


/// Receiver of poll results for one session
#[async_trait]
pub trait PollObserver: Send + Sync {
    /// A non-terminal `downloading` snapshot
    async fn on_progress(&self, snapshot: ProgressSnapshot);

    /// Terminal success; called at most once per poller run
    async fn on_complete(&self, snapshot: ProgressSnapshot);

    /// Terminal failure (service-reported or transport); called at most once per poller run
    async fn on_error(&self, error: Error);
}

/// Client-local pause flag shared between a controller and its poller
#[derive(Clone, Debug, Default)]
pub struct PauseFlag(Arc<AtomicBool>);

impl PauseFlag {
    /// New, unpaused
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend polling
    pub fn pause(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Continue polling from the next tick
    pub fn resume(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Whether ticks are currently skipped
    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Restartable, cancelable ticking primitive for one session
pub struct ProgressPoller {
    client: Arc<dyn SessionClient>,
    session_id: SessionId,
    interval: Duration,
    paused: PauseFlag,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ProgressPoller {
    /// Create a stopped poller
    pub fn new(
        client: Arc<dyn SessionClient>,
        session_id: SessionId,
        interval: Duration,
        paused: PauseFlag,
    ) -> Self {
        let cancel = CancellationToken::new();
        cancel.cancel();
        Self {
            client,
            session_id,
            interval,
            paused,
            cancel,
            handle: None,
        }
    }

    /// Session this poller is bound to
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Shared pause flag
    pub fn pause_flag(&self) -> &PauseFlag {
        &self.paused
    }

    /// Ticking and not yet stopped
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Start ticking, stopping any previous run first
    ///
    /// The first request goes out one interval after this call.
    pub fn start(&mut self, observer: Arc<dyn PollObserver>) {
        self.stop();
        let cancel = CancellationToken::new();
        self.cancel = cancel.clone();

        debug!(
            session_id = %self.session_id,
            interval_ms = self.interval.as_millis() as u64,
            "progress poller started"
        );

        self.handle = Some(tokio::spawn(run(
            self.client.clone(),
            self.session_id.clone(),
            self.interval,
            self.paused.clone(),
            cancel,
            observer,
        )));
    }

    /// Stop ticking. Calling it again is a no-op.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            debug!(session_id = %self.session_id, "progress poller stopped");
            self.cancel.cancel();
        }
    }
}

impl Drop for ProgressPoller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    client: Arc<dyn SessionClient>,
    session_id: SessionId,
    interval: Duration,
    paused: PauseFlag,
    cancel: CancellationToken,
    observer: Arc<dyn PollObserver>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if paused.is_paused() {
            trace!(session_id = %session_id, "tick skipped while paused");
            continue;
        }

        // No mid-flight cancellation: the request completes, then the stop flag decides
        let result = client.fetch_progress(&session_id).await;
        if cancel.is_cancelled() {
            debug!(session_id = %session_id, "discarding progress result that arrived after stop");
            break;
        }

        match result {
            Ok(snapshot) => match snapshot.status {
                ProgressStatus::Downloading => observer.on_progress(snapshot).await,
                ProgressStatus::Pending => {
                    trace!(session_id = %session_id, "download not started on the service yet");
                }
                ProgressStatus::Finished => {
                    cancel.cancel();
                    debug!(session_id = %session_id, "download finished");
                    observer.on_complete(snapshot).await;
                    break;
                }
                ProgressStatus::Failed => {
                    cancel.cancel();
                    let message = snapshot.error.unwrap_or_default();
                    debug!(session_id = %session_id, error = %message, "service reported download error");
                    observer
                        .on_error(Error::RemoteReported {
                            operation: Operation::Progress,
                            message,
                        })
                        .await;
                    break;
                }
            },
            Err(e) => {
                cancel.cancel();
                debug!(session_id = %session_id, error = %e, "progress poll failed");
                observer.on_error(e).await;
                break;
            }
        }
    }
}

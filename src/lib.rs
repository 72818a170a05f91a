//! # media-dl-client
//!
//! Async client library for a remote media download service exposing
//! `/info`, `/download`, `/progress/:id` and `/download_file/:id`.
//!
//! ## Design Philosophy
//!
//! media-dl-client is designed to be:
//! - **Library-first** - No UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling of the library required
//! - **Isolated sessions** - Every download, single or batched, owns its own progress state
//! - **Sensible defaults** - Works out of the box against a local service
//!
//! ## Quick Start
//!
//! ```no_run
//! use media_dl_client::{Config, MediaDownloader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::with_base_url("http://127.0.0.1:8000");
//!     let downloader = MediaDownloader::new(config)?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let controller = downloader.controller();
//!     controller.begin("https://www.youtube.com/watch?v=dQw4w9WgXcQ").await?;
//!     controller.download(false).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Remote service client
pub mod client;
/// Configuration types
pub mod config;
/// Single-download controller
pub mod controller;
/// Top-level downloader handle
pub mod downloader;
/// Error types
pub mod error;
/// Format selection and metadata presentation
pub mod formats;
/// Fixed-interval progress polling
pub mod poller;
/// Multi-download queue
pub mod queue;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use client::{HttpSessionClient, SessionClient};
pub use config::{
    Config, FileCollisionAction, PollingConfig, PreviewConfig, QueueConfig, RetrievalConfig,
    ServiceConfig, StartMode,
};
pub use controller::{ControllerSnapshot, DownloadController};
pub use downloader::MediaDownloader;
pub use error::{Error, ErrorKind, Operation, Result};
pub use poller::{PauseFlag, PollObserver, ProgressPoller};
pub use queue::QueueManager;
pub use types::{
    DownloadState, DownloadStatus, EntryId, EntryState, Event, FailureStage, Format,
    ProgressSnapshot, ProgressStatus, QueueEntry, Session, SessionId, SessionInfo, VideoInfo,
};

/// Helper function to run the downloader with graceful signal handling.
///
/// Waits for a termination signal and then calls the downloader's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to Ctrl+C if registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use media_dl_client::{Config, MediaDownloader, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = MediaDownloader::new(Config::default())?;
///     run_with_shutdown(downloader).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: MediaDownloader) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
    }
}

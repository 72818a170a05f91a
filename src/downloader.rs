//! Top-level handle wiring the client, controller, queue and event channel.

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::client::{HttpSessionClient, SessionClient};
use crate::config::Config;
use crate::controller::DownloadController;
use crate::error::Result;
use crate::queue::QueueManager;
use crate::types::Event;

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct MediaDownloader {
    config: Arc<Config>,
    event_tx: broadcast::Sender<Event>,
    controller: DownloadController,
    queue: QueueManager,
}

impl MediaDownloader {
    /// Create a downloader talking HTTP to `config.service.base_url`
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let client = Arc::new(HttpSessionClient::new(&config.service)?);
        Self::with_client(config, client)
    }

    /// Create a downloader over any [`SessionClient`]
    pub fn with_client(config: Config, client: Arc<dyn SessionClient>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        // Controller and queue share one channel so a subscriber sees both flows
        let (event_tx, _rx) = broadcast::channel(config.event_channel_capacity);

        let controller = DownloadController::new(client.clone(), config.clone(), event_tx.clone());
        let queue = QueueManager::new(client, config.clone(), event_tx.clone());

        tracing::info!(
            base_url = %config.service.base_url,
            single_interval_ms = config.polling.single_interval.as_millis() as u64,
            multi_interval_ms = config.polling.multi_interval.as_millis() as u64,
            "media downloader initialized"
        );

        Ok(Self {
            config,
            event_tx,
            controller,
            queue,
        })
    }

    /// Single-download controller
    pub fn controller(&self) -> &DownloadController {
        &self.controller
    }

    /// Multi-download queue
    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    /// Current configuration
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Subscribe to events from both the controller and the queue
    ///
    /// Each call returns an independent receiver. A receiver that falls more
    /// than `event_channel_capacity` events behind gets `RecvError::Lagged`.
    ///
    /// ```no_run
    /// # use media_dl_client::{Config, MediaDownloader};
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let downloader = MediaDownloader::new(Config::default())?;
    /// let mut events = downloader.subscribe();
    /// tokio::spawn(async move {
    ///     while let Ok(event) = events.recv().await {
    ///         tracing::info!(?event, "download event");
    ///     }
    /// });
    /// # Ok(())
    /// # }
    /// ```
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Stop every poller and drop all sessions and entries
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("shutting down media downloader");
        self.controller.reset().await;
        self.queue.clear().await;
        self.event_tx.send(Event::Shutdown).ok();
        Ok(())
    }
}

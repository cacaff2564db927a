//! Team monitor that wires the feed, the supervisor and the writer.
//!
//! Each stage runs in its own task and talks to the next one only through
//! a channel:
//!
//! PubSub connection -> `FeedEvent` -> Supervisor -> `SupervisorEvent` -> writer
//!
//! A sink failure is fatal: supervision is cancelled and the error is
//! returned to the caller.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::MonitorConfig;
use crate::connectors::{PubSubClient, PubSubFeed, DEFAULT_PUBSUB_URL};
use crate::events::FeedEvent;
use crate::supervisor::Supervisor;
use crate::writer::{
    FileSink, OutputNames, SinkError, SnapshotSink, SnapshotWriter, ViewerAggregator,
};

/// Environment variable overriding the PubSub endpoint.
pub const PUBSUB_URL_ENV: &str = "TWITCH_PUBSUB_URL";

/// Capacity of the feed and event channels.
const CHANNEL_CAPACITY: usize = 1000;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("{task} task failed: {reason}")]
    TaskFailed { task: &'static str, reason: String },
}

/// Owns the whole pipeline for one configured team.
pub struct TeamMonitor {
    config: MonitorConfig,
    pubsub_url: String,
}

impl TeamMonitor {
    /// Creates a monitor. The endpoint comes from `TWITCH_PUBSUB_URL`.
    pub fn new(config: MonitorConfig) -> Self {
        let pubsub_url =
            std::env::var(PUBSUB_URL_ENV).unwrap_or_else(|_| DEFAULT_PUBSUB_URL.to_string());
        Self::with_pubsub_url(config, pubsub_url)
    }

    /// Creates a monitor with a custom PubSub endpoint.
    pub fn with_pubsub_url(config: MonitorConfig, pubsub_url: impl Into<String>) -> Self {
        Self {
            config,
            pubsub_url: pubsub_url.into(),
        }
    }

    /// Runs until `cancel` fires or the sink fails.
    ///
    /// Returns once the PubSub socket has been released.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), MonitorError> {
        info!("TeamMonitor starting");
        info!("PubSub URL: {}", self.pubsub_url);
        info!(
            "Output directory: {}",
            self.config.writer.output_directory.display()
        );

        let sink = FileSink::prepare(&self.config.writer.output_directory)?;

        let (feed_tx, feed_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (client, connection) = PubSubClient::new(self.pubsub_url, feed_tx);
        let connection_task = tokio::spawn(connection.run());

        let result = run_pipeline(self.config, client, feed_rx, sink, cancel).await;

        // The supervisor disconnected the feed on its way out.
        if let Err(e) = connection_task.await {
            error!("PubSub connection task panicked: {}", e);
        }

        info!("TeamMonitor stopped");
        result
    }
}

/// Runs the supervisor and the writer over the given feed and sink.
///
/// Returns after supervision stopped and the writer drained every event.
pub async fn run_pipeline<F, S>(
    config: MonitorConfig,
    feed: F,
    feed_rx: mpsc::Receiver<FeedEvent>,
    sink: S,
    cancel: CancellationToken,
) -> Result<(), MonitorError>
where
    F: PubSubFeed + 'static,
    S: SnapshotSink + 'static,
{
    // Cancelling on a writer failure must not cancel the caller's token.
    let cancel = cancel.child_token();
    let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let aggregator = Arc::new(ViewerAggregator::new(OutputNames::from(&config.writer), sink));
    let writer = SnapshotWriter::new(aggregator, event_rx);
    let mut supervisor = Supervisor::new(config.supervisor, feed, feed_rx, event_tx);

    let supervisor_cancel = cancel.clone();
    let supervisor_task =
        tokio::spawn(async move { supervisor.supervise(supervisor_cancel).await });
    let writer_task = tokio::spawn(writer.run());

    let writer_result = match writer_task.await {
        Ok(result) => result.map_err(MonitorError::from),
        Err(e) => Err(MonitorError::TaskFailed {
            task: "writer",
            reason: e.to_string(),
        }),
    };

    if writer_result.is_err() {
        error!("Writer failed, stopping supervision");
        cancel.cancel();
    }

    match supervisor_task.await {
        Ok(reason) => info!("Supervision ended: {}", reason),
        Err(e) => {
            error!("Supervisor task panicked: {}", e);
            if writer_result.is_ok() {
                return Err(MonitorError::TaskFailed {
                    task: "supervisor",
                    reason: e.to_string(),
                });
            }
        }
    }

    writer_result
}

impl std::fmt::Debug for TeamMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeamMonitor")
            .field("pubsub_url", &self.pubsub_url)
            .field("channels", &self.config.supervisor.channel_ids)
            .finish()
    }
}

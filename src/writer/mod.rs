//! Aggregation & publication stage.
//!
//! Consumes the supervisor's events in order and publishes the resulting
//! snapshot through a `SnapshotSink`.

mod aggregator;
mod sink;

pub use aggregator::{OutputNames, UpdateTriggers, ViewerAggregator, ViewerSnapshot};
pub use sink::{FileSink, SinkError, SnapshotSink};

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::events::SupervisorEvent;

/// Dispatch loop feeding the aggregator.
pub struct SnapshotWriter<S> {
    aggregator: Arc<ViewerAggregator<S>>,
    event_rx: mpsc::Receiver<SupervisorEvent>,
}

impl<S: SnapshotSink> SnapshotWriter<S> {
    pub fn new(aggregator: Arc<ViewerAggregator<S>>, event_rx: mpsc::Receiver<SupervisorEvent>) -> Self {
        Self {
            aggregator,
            event_rx,
        }
    }

    /// Applies events until the supervisor hangs up.
    ///
    /// A sink failure stops the loop and is returned to the caller.
    pub async fn run(mut self) -> Result<(), SinkError> {
        info!("SnapshotWriter starting");

        while let Some(event) = self.event_rx.recv().await {
            let result = match &event {
                SupervisorEvent::Supervise(start) => self.aggregator.on_supervise(start),
                SupervisorEvent::ChannelUpdate(update) => {
                    self.aggregator.on_channel_update(update).map(|_| ())
                }
            };

            if let Err(e) = result {
                error!("Failed to publish snapshot: {}", e);
                return Err(e);
            }
        }

        info!(
            "SnapshotWriter stopped ({} live, {} viewers)",
            self.aggregator.live_count(),
            self.aggregator.total()
        );
        Ok(())
    }
}

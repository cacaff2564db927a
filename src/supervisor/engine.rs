//! Channel supervisor: feed dispatch and timeout sweep.
//!
//! Feed notifications and sweep ticks are handled by one loop, so a
//! refresh and a timeout for the same channel are always strictly ordered.
//! The loop runs until the cancellation token fires; the feed is released
//! on every exit path.

use chrono::Utc;
use std::fmt;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::SupervisorConfig;
use crate::connectors::PubSubFeed;
use crate::events::{ChannelUpdate, FeedEvent, SuperviseStart, SupervisorEvent};

use super::watermark::WatermarkStore;

/// Why the supervision loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The cancellation token fired.
    Cancelled,
    /// The event consumer hung up.
    ConsumerGone,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::ConsumerGone => write!(f, "event consumer gone"),
        }
    }
}

/// Tracks channel liveness and normalizes feed notifications.
///
/// Responsibilities:
/// - Refreshes watermarks on stream-up and view-count notifications
/// - Drops watermarks on stream-down
/// - Times out channels silent for longer than the timeout interval
/// - Emits `Supervise` once, then `ChannelUpdate`s
pub struct Supervisor<F> {
    config: SupervisorConfig,
    feed: F,
    feed_rx: mpsc::Receiver<FeedEvent>,
    event_tx: mpsc::Sender<SupervisorEvent>,
    watermarks: WatermarkStore,
}

impl<F: PubSubFeed> Supervisor<F> {
    /// Creates a supervisor. Every configured channel is tracked from now.
    pub fn new(
        config: SupervisorConfig,
        feed: F,
        feed_rx: mpsc::Receiver<FeedEvent>,
        event_tx: mpsc::Sender<SupervisorEvent>,
    ) -> Self {
        let watermarks = WatermarkStore::new(config.channel_ids.iter().cloned(), Instant::now());

        Self {
            config,
            feed,
            feed_rx,
            event_tx,
            watermarks,
        }
    }

    /// Returns the watermark store.
    pub fn watermarks(&self) -> &WatermarkStore {
        &self.watermarks
    }

    /// Runs supervision until `cancel` fires or the consumer hangs up.
    ///
    /// Emits `Supervise`, connects the feed, then sweeps every tenth of
    /// the timeout interval. The feed is disconnected before returning.
    pub async fn supervise(&mut self, cancel: CancellationToken) -> StopReason {
        info!(
            "TeamSupervisor starting ({} channel(s), timeout {:?}, sweep every {:?})",
            self.config.channel_ids.len(),
            self.config.timeout_interval,
            self.config.sweep_period()
        );

        let reason = self.run(&cancel).await;

        self.feed.disconnect();
        info!("TeamSupervisor stopped: {}", reason);
        reason
    }

    async fn run(&mut self, cancel: &CancellationToken) -> StopReason {
        let start = SupervisorEvent::Supervise(SuperviseStart {
            channel_ids: self.config.channel_ids.clone(),
            timestamp: Utc::now(),
        });
        if !self.emit(start).await {
            return StopReason::ConsumerGone;
        }

        self.feed.connect();

        let mut sweep = tokio::time::interval(self.config.sweep_period());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut feed_open = true;

        loop {
            let keep_running = tokio::select! {
                biased;

                _ = cancel.cancelled() => return StopReason::Cancelled,

                notification = self.feed_rx.recv(), if feed_open => {
                    match notification {
                        Some(notification) => self.handle_notification(notification).await,
                        None => {
                            // Without notifications every channel eventually times out.
                            warn!("Feed closed, only timeouts will be reported from now on");
                            feed_open = false;
                            true
                        }
                    }
                }

                _ = sweep.tick() => self.sweep().await,
            };

            if !keep_running {
                return StopReason::ConsumerGone;
            }
        }
    }

    /// Applies a feed notification. Returns false if the consumer is gone.
    async fn handle_notification(&mut self, notification: FeedEvent) -> bool {
        match notification {
            FeedEvent::ServiceConnected { .. } => {
                for channel_id in &self.config.channel_ids {
                    info!("[#{}] Listen video playback", channel_id);
                    self.feed.listen_to_video_playback(channel_id);
                }
                debug!("Send channel list");
                self.feed.send_topics();
                true
            }

            FeedEvent::StreamUp {
                channel_id,
                received_at,
            } => {
                self.watermarks.upsert(&channel_id, Instant::now());
                info!("[#{}] Stream up", channel_id);
                let update = ChannelUpdate::live(channel_id, 0).with_timestamp(received_at);
                self.emit(SupervisorEvent::ChannelUpdate(update)).await
            }

            FeedEvent::ViewCount {
                channel_id,
                viewers,
                received_at,
            } => {
                self.watermarks.upsert(&channel_id, Instant::now());
                trace!("[#{}] {} viewer(s)", channel_id, viewers);
                let update = ChannelUpdate::live(channel_id, viewers).with_timestamp(received_at);
                self.emit(SupervisorEvent::ChannelUpdate(update)).await
            }

            FeedEvent::StreamDown {
                channel_id,
                received_at,
            } => {
                if !self.watermarks.remove(&channel_id) {
                    debug!("[#{}] Stream down for an untracked channel", channel_id);
                }
                info!("[#{}] Stream down", channel_id);
                let update = ChannelUpdate::down(channel_id).with_timestamp(received_at);
                self.emit(SupervisorEvent::ChannelUpdate(update)).await
            }
        }
    }

    /// Times out every channel silent for longer than the timeout interval.
    async fn sweep(&mut self) -> bool {
        let mut expired = self
            .watermarks
            .expire(Instant::now(), self.config.timeout_interval);
        expired.sort();

        for channel_id in expired {
            warn!(
                "[#{}] No update for {:?}, channel timed out",
                channel_id, self.config.timeout_interval
            );
            if !self
                .emit(SupervisorEvent::ChannelUpdate(ChannelUpdate::timeout(channel_id)))
                .await
            {
                return false;
            }
        }
        true
    }

    /// Sends an event downstream, waiting for capacity.
    async fn emit(&mut self, event: SupervisorEvent) -> bool {
        if let Err(e) = self.event_tx.send(event).await {
            error!("Failed to emit supervisor event: {}", e);
            return false;
        }
        true
    }
}

impl<F> fmt::Debug for Supervisor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("channels", &self.config.channel_ids.len())
            .field("tracked", &self.watermarks.len())
            .field("timeout_interval", &self.config.timeout_interval)
            .finish()
    }
}

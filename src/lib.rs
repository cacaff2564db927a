//! Team Monitor - live viewer statistics for a team of Twitch channels.
//!
//! Watches the video-playback topics of a configured set of channels and
//! keeps a directory of small text files up to date: one viewer count per
//! channel, the team's total viewers, the number of live channels and the
//! number of configured channels. The files are meant to be read by stream
//! overlays.
//!
//! # Architecture
//!
//! - **Feed**: a PubSub WebSocket connection turns server frames into `FeedEvent`s
//! - **Supervisor**: tracks a last-update watermark per channel and reports
//!   live, down and timed-out channels as `SupervisorEvent`s
//! - **Writer**: aggregates viewer counts and publishes only what changed
//!
//! Stages are connected by channels; each runs in its own task.
//!
//! # Usage
//!
//! ```no_run
//! use team_monitor::{MonitorConfig, TeamMonitor};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = MonitorConfig::from_env()?;
//!     let cancel = CancellationToken::new();
//!
//!     TeamMonitor::new(config).run(cancel).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connectors;
pub mod events;
pub mod monitor;
pub mod supervisor;
pub mod utils;
pub mod writer;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::{ConfigError, MonitorConfig, SupervisorConfig, WriterConfig};
pub use connectors::{PubSubClient, PubSubFeed};
pub use events::{ChannelStatus, ChannelUpdate, FeedEvent, SupervisorEvent};
pub use monitor::{run_pipeline, MonitorError, TeamMonitor};
pub use supervisor::{StopReason, Supervisor};
pub use writer::{FileSink, SnapshotSink, ViewerAggregator};

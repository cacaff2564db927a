//! Normalized channel events.
//!
//! Raw feed notifications are turned into `FeedEvent`s by the connector
//! layer, and the supervisor turns those into `SupervisorEvent`s. The
//! aggregation stage consumes ONLY `SupervisorEvent`.

use chrono::{DateTime, Utc};
use std::fmt;

/// Opaque channel identifier, stable for the process lifetime.
pub type ChannelId = String;

/// Liveness status carried by a `ChannelUpdate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelStatus {
    Live,
    Down,
    Timeout,
}

impl ChannelStatus {
    /// Returns true if the channel is reported as streaming.
    pub fn is_live(&self) -> bool {
        matches!(self, ChannelStatus::Live)
    }

    /// Returns true if the channel leaves the live set.
    pub fn is_removal(&self) -> bool {
        matches!(self, ChannelStatus::Down | ChannelStatus::Timeout)
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChannelStatus::Live => "LIVE",
            ChannelStatus::Down => "DOWN",
            ChannelStatus::Timeout => "TIMEOUT",
        };
        write!(f, "{}", label)
    }
}

/// A single per-channel state change emitted by the supervisor.
///
/// `viewers` is only meaningful for `Live`; the constructors for `Down`
/// and `Timeout` always carry 0. `timestamp` is when the feed delivered
/// the notification, or when the sweep ran for `Timeout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelUpdate {
    pub channel_id: ChannelId,
    pub status: ChannelStatus,
    pub viewers: u32,
    pub timestamp: DateTime<Utc>,
}

impl ChannelUpdate {
    pub fn live(channel_id: impl Into<ChannelId>, viewers: u32) -> Self {
        Self::new(channel_id, ChannelStatus::Live, viewers)
    }

    pub fn down(channel_id: impl Into<ChannelId>) -> Self {
        Self::new(channel_id, ChannelStatus::Down, 0)
    }

    pub fn timeout(channel_id: impl Into<ChannelId>) -> Self {
        Self::new(channel_id, ChannelStatus::Timeout, 0)
    }

    /// Replaces the timestamp, e.g. with the notification's receipt time.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    fn new(channel_id: impl Into<ChannelId>, status: ChannelStatus, viewers: u32) -> Self {
        Self {
            channel_id: channel_id.into(),
            status,
            viewers,
            timestamp: Utc::now(),
        }
    }
}

/// Emitted once when supervision starts, before any `ChannelUpdate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperviseStart {
    pub channel_ids: Vec<ChannelId>,
    pub timestamp: DateTime<Utc>,
}

/// Events flowing from the supervisor to the aggregation stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// Supervision started for the configured channel set.
    Supervise(SuperviseStart),

    /// A channel went live, changed viewer count, went down or timed out.
    ChannelUpdate(ChannelUpdate),
}

/// Notifications delivered by the upstream feed.
///
/// This is the intermediate type produced by the connector layer. It MUST
/// go through the supervisor before reaching the aggregation stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// The feed (re)connected; topics must be (re)subscribed.
    ServiceConnected {
        received_at: DateTime<Utc>,
    },

    StreamUp {
        channel_id: ChannelId,
        received_at: DateTime<Utc>,
    },

    StreamDown {
        channel_id: ChannelId,
        received_at: DateTime<Utc>,
    },

    ViewCount {
        channel_id: ChannelId,
        viewers: u32,
        received_at: DateTime<Utc>,
    },
}

impl FeedEvent {
    pub fn service_connected() -> Self {
        FeedEvent::ServiceConnected {
            received_at: Utc::now(),
        }
    }

    pub fn stream_up(channel_id: impl Into<ChannelId>) -> Self {
        FeedEvent::StreamUp {
            channel_id: channel_id.into(),
            received_at: Utc::now(),
        }
    }

    pub fn stream_down(channel_id: impl Into<ChannelId>) -> Self {
        FeedEvent::StreamDown {
            channel_id: channel_id.into(),
            received_at: Utc::now(),
        }
    }

    pub fn view_count(channel_id: impl Into<ChannelId>, viewers: u32) -> Self {
        FeedEvent::ViewCount {
            channel_id: channel_id.into(),
            viewers,
            received_at: Utc::now(),
        }
    }

    /// Returns the channel this notification is about, if any.
    pub fn channel_id(&self) -> Option<&str> {
        match self {
            FeedEvent::ServiceConnected { .. } => None,
            FeedEvent::StreamUp { channel_id, .. }
            | FeedEvent::StreamDown { channel_id, .. }
            | FeedEvent::ViewCount { channel_id, .. } => Some(channel_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_removal() {
        assert!(!ChannelStatus::Live.is_removal());
        assert!(ChannelStatus::Down.is_removal());
        assert!(ChannelStatus::Timeout.is_removal());
        assert!(ChannelStatus::Live.is_live());
    }

    #[test]
    fn test_down_and_timeout_carry_no_viewers() {
        assert_eq!(ChannelUpdate::down("a").viewers, 0);
        assert_eq!(ChannelUpdate::timeout("a").viewers, 0);
        assert_eq!(ChannelUpdate::live("a", 12).viewers, 12);
    }

    #[test]
    fn test_feed_event_channel_id() {
        assert_eq!(FeedEvent::service_connected().channel_id(), None);
        assert_eq!(FeedEvent::view_count("abc", 3).channel_id(), Some("abc"));
        assert_eq!(FeedEvent::stream_down("abc").channel_id(), Some("abc"));
    }

    #[test]
    fn test_update_keeps_given_timestamp() {
        let received_at = Utc::now() - chrono::Duration::seconds(30);
        let update = ChannelUpdate::live("a", 5).with_timestamp(received_at);
        assert_eq!(update.timestamp, received_at);
        assert_eq!(update.viewers, 5);
    }
}

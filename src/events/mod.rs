//! Event types shared by the supervisor and the aggregation stage.
//!
//! All feed notifications MUST be converted into normalized events before
//! they reach the aggregation stage. Components never share state directly;
//! they only exchange these values over channels.

mod channel_events;

pub use channel_events::{
    ChannelId,
    ChannelStatus,
    ChannelUpdate,
    FeedEvent,
    SuperviseStart,
    SupervisorEvent,
};

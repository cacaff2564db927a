//! Connectors for the upstream notification feed.
//!
//! This module owns the transport: connecting, topic subscription,
//! heartbeats and reconnection. Everything it receives is normalized into
//! `FeedEvent`s before the supervisor sees it.

pub mod pubsub;

pub use pubsub::{
    ConnectionState,
    PubSubClient,
    PubSubConnection,
    PubSubError,
    PubSubFeed,
    DEFAULT_PUBSUB_URL,
};

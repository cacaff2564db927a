//! In-memory doubles for the feed and the sink.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::connectors::PubSubFeed;
use crate::writer::{SinkError, SnapshotSink};

/// Records every write; can be switched to fail.
#[derive(Debug, Default)]
pub(crate) struct MemorySink {
    values: Mutex<HashMap<String, String>>,
    writes: Mutex<Vec<(String, String)>>,
    failing: Mutex<bool>,
}

impl MemorySink {
    pub(crate) fn get(&self, name: &str) -> Option<String> {
        self.values.lock().unwrap().get(name).cloned()
    }

    pub(crate) fn writes(&self) -> Vec<(String, String)> {
        self.writes.lock().unwrap().clone()
    }

    pub(crate) fn clear_writes(&self) {
        self.writes.lock().unwrap().clear();
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

impl SnapshotSink for MemorySink {
    fn write_value(&self, name: &str, value: &str) -> Result<(), SinkError> {
        if *self.failing.lock().unwrap() {
            return Err(SinkError::Unavailable(format!("refusing to write {}", name)));
        }
        self.values
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        self.writes
            .lock()
            .unwrap()
            .push((name.to_string(), value.to_string()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FeedCall {
    Connect,
    Listen(String),
    SendTopics,
    Disconnect,
}

/// Feed that records calls into a shared log.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingFeed {
    calls: Arc<Mutex<Vec<FeedCall>>>,
}

impl RecordingFeed {
    pub(crate) fn calls(&self) -> Vec<FeedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: FeedCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl PubSubFeed for RecordingFeed {
    fn connect(&mut self) {
        self.record(FeedCall::Connect);
    }

    fn listen_to_video_playback(&mut self, channel_id: &str) {
        self.record(FeedCall::Listen(channel_id.to_string()));
    }

    fn send_topics(&mut self) {
        self.record(FeedCall::SendTopics);
    }

    fn disconnect(&mut self) {
        self.record(FeedCall::Disconnect);
    }
}

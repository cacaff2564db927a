//! Viewer aggregation and snapshot publication.
//!
//! Turns the `SupervisorEvent` stream into the minimal set of writes that
//! keeps every published value consistent:
//! - per-channel viewer count
//! - total viewers across live channels
//! - number of live channels
//! - number of configured channels (once, at start)
//!
//! An update that changes nothing observable writes nothing.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, trace};

use crate::config::WriterConfig;
use crate::events::{ChannelId, ChannelUpdate, SuperviseStart};

use super::sink::{SinkError, SnapshotSink};

/// Placeholder replaced by the channel id in the per-channel name.
const CHANNEL_PLACEHOLDER: &str = "{0}";

/// Output names; `None` disables an output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputNames {
    pub total_viewers: Option<String>,
    pub live_channel_count: Option<String>,
    pub live_channel_total: Option<String>,
    pub individual_channel_format: Option<String>,
}

impl OutputNames {
    /// Returns the per-channel output name, if enabled.
    pub fn channel(&self, channel_id: &str) -> Option<String> {
        self.individual_channel_format
            .as_ref()
            .map(|format| format.replace(CHANNEL_PLACEHOLDER, channel_id))
    }
}

impl From<&WriterConfig> for OutputNames {
    fn from(config: &WriterConfig) -> Self {
        fn enabled(name: &Option<String>) -> Option<String> {
            name.as_ref().filter(|n| !n.trim().is_empty()).cloned()
        }

        Self {
            total_viewers: enabled(&config.total_viewers_file),
            live_channel_count: enabled(&config.live_channel_count_file),
            live_channel_total: enabled(&config.live_channel_total_file),
            individual_channel_format: enabled(&config.individual_channel_file_format),
        }
    }
}

/// Last published viewer counts of the channels considered live.
///
/// `total` always equals the sum of `viewers`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ViewerSnapshot {
    viewers: HashMap<ChannelId, u32>,
    total: u64,
}

impl ViewerSnapshot {
    pub fn viewers(&self, channel_id: &str) -> Option<u32> {
        self.viewers.get(channel_id).copied()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn live_count(&self) -> usize {
        self.viewers.len()
    }

    fn recompute_total(&mut self) -> u64 {
        self.total = self.viewers.values().map(|v| u64::from(*v)).sum();
        self.total
    }
}

/// What an update would change, evaluated against a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateTriggers {
    /// The recorded count (0 if absent) differs from the update's count.
    pub value_changed: bool,
    /// The channel leaves the live set (Down or Timeout).
    pub should_remove: bool,
    /// A Live update for a channel not in the live set.
    pub is_new_live: bool,
}

impl UpdateTriggers {
    pub fn evaluate(snapshot: &ViewerSnapshot, update: &ChannelUpdate) -> Self {
        let recorded = snapshot.viewers(&update.channel_id);
        Self {
            value_changed: recorded.unwrap_or(0) != update.viewers,
            should_remove: update.status.is_removal(),
            is_new_live: update.status.is_live() && recorded.is_none(),
        }
    }

    /// True when applying the update would publish nothing.
    pub fn is_noop(&self) -> bool {
        !(self.value_changed || self.should_remove || self.is_new_live)
    }
}

/// Owns the viewer snapshot and publishes it through a sink.
///
/// Every read-decide-write sequence runs under the exclusive lock, so
/// concurrent updates cannot interleave their writes.
pub struct ViewerAggregator<S> {
    outputs: OutputNames,
    sink: S,
    state: RwLock<ViewerSnapshot>,
}

impl<S: SnapshotSink> ViewerAggregator<S> {
    pub fn new(outputs: OutputNames, sink: S) -> Self {
        Self {
            outputs,
            sink,
            state: RwLock::new(ViewerSnapshot::default()),
        }
    }

    /// Resets the snapshot and publishes the zero baseline.
    pub fn on_supervise(&self, start: &SuperviseStart) -> Result<(), SinkError> {
        info!(
            "Supervising {} channel(s) since {}",
            start.channel_ids.len(),
            start.timestamp.to_rfc3339()
        );

        let mut state = self.write_state();
        *state = ViewerSnapshot::default();

        for channel_id in &start.channel_ids {
            if let Some(name) = self.outputs.channel(channel_id) {
                self.sink.write_value(&name, "0")?;
            }
        }
        self.publish(&self.outputs.total_viewers, 0)?;
        self.publish(&self.outputs.live_channel_count, 0)?;
        self.publish(&self.outputs.live_channel_total, start.channel_ids.len() as u64)?;

        Ok(())
    }

    /// Applies a channel update. Returns false if it changed nothing.
    pub fn on_channel_update(&self, update: &ChannelUpdate) -> Result<bool, SinkError> {
        trace!(
            "[#{}] {} {} ({}ms after receipt)",
            update.channel_id,
            update.status,
            update.viewers,
            (Utc::now() - update.timestamp).num_milliseconds()
        );

        if UpdateTriggers::evaluate(&self.read_state(), update).is_noop() {
            debug!("[#{}] Unchanged, nothing to publish", update.channel_id);
            return Ok(false);
        }

        let mut state = self.write_state();
        // Re-evaluated: another update may have landed since the check.
        let triggers = UpdateTriggers::evaluate(&state, update);
        if triggers.is_noop() {
            return Ok(false);
        }

        let channel_id = &update.channel_id;

        if triggers.is_new_live {
            state.viewers.insert(channel_id.clone(), update.viewers);
            info!("[#{}] Channel is live ({} live)", channel_id, state.live_count());
            self.publish(&self.outputs.live_channel_count, state.live_count() as u64)?;
        }

        if triggers.should_remove {
            state.viewers.remove(channel_id);
            info!(
                "[#{}] Channel is {} ({} live)",
                channel_id,
                update.status,
                state.live_count()
            );
            self.publish(&self.outputs.live_channel_count, state.live_count() as u64)?;
        }

        if triggers.value_changed {
            // A removed channel is not re-inserted; its published value
            // drops to the update's count (0).
            if update.status.is_live() {
                state.viewers.insert(channel_id.clone(), update.viewers);
            }
            if let Some(name) = self.outputs.channel(channel_id) {
                self.sink.write_value(&name, &update.viewers.to_string())?;
            }
            let total = state.recompute_total();
            debug!("[#{}] {} viewer(s), total {}", channel_id, update.viewers, total);
            self.publish(&self.outputs.total_viewers, total)?;
        }

        Ok(true)
    }

    /// Returns the recorded viewer count of a live channel.
    pub fn viewers(&self, channel_id: &str) -> Option<u32> {
        self.read_state().viewers(channel_id)
    }

    pub fn total(&self) -> u64 {
        self.read_state().total()
    }

    pub fn live_count(&self) -> usize {
        self.read_state().live_count()
    }

    fn publish(&self, name: &Option<String>, value: u64) -> Result<(), SinkError> {
        match name {
            Some(name) => self.sink.write_value(name, &value.to_string()),
            None => Ok(()),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ViewerSnapshot> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ViewerSnapshot> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S> std::fmt::Debug for ViewerAggregator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerAggregator")
            .field("outputs", &self.outputs)
            .finish()
    }
}

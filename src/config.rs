//! Configuration loaded from a JSON file.
//!
//! ```json
//! {
//!   "Supervisor": { "ChannelIds": ["a", "b"], "TimeoutInterval": "00:03:00" },
//!   "Writer": {
//!     "OutputDirectory": "out",
//!     "TotalViewersFile": "total.txt",
//!     "LiveChannelCountFile": "live.txt",
//!     "LiveChannelTotalFile": "channels.txt",
//!     "IndividualChannelFileFormat": "channel_{0}.txt"
//!   }
//! }
//! ```

use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::events::ChannelId;

/// Environment variable holding the config file path.
pub const CONFIG_PATH_ENV: &str = "TEAM_MONITOR_CONFIG";

/// Config file used when `TEAM_MONITOR_CONFIG` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "monitor.json";

/// Default silence after which a channel is timed out.
pub const DEFAULT_TIMEOUT_INTERVAL: Duration = Duration::from_secs(3 * 60);

/// Shortest accepted timeout interval.
pub const MIN_TIMEOUT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid time span: {0:?} (expected [d.]hh:mm:ss[.fraction])")]
    InvalidTimeoutFormat(String),

    #[error("Timeout interval {0:?} is shorter than the 1s minimum")]
    InvalidTimeout(Duration),

    #[error("Writer.OutputDirectory is required")]
    MissingOutputDirectory,
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MonitorConfig {
    pub supervisor: SupervisorConfig,
    pub writer: WriterConfig,
}

/// Which channels to supervise and when they time out.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SupervisorConfig {
    #[serde(default)]
    pub channel_ids: Vec<ChannelId>,

    #[serde(
        default = "default_timeout_interval",
        deserialize_with = "deserialize_time_span"
    )]
    pub timeout_interval: Duration,
}

impl SupervisorConfig {
    pub fn new(channel_ids: Vec<ChannelId>, timeout_interval: Duration) -> Self {
        Self {
            channel_ids,
            timeout_interval,
        }
    }

    /// Period of the timeout sweep: a tenth of the timeout interval.
    pub fn sweep_period(&self) -> Duration {
        (self.timeout_interval / 10).max(Duration::from_millis(1))
    }
}

/// Where and under which names snapshot values are written.
///
/// Empty or missing names disable the corresponding output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WriterConfig {
    #[serde(default)]
    pub output_directory: PathBuf,
    pub total_viewers_file: Option<String>,
    pub live_channel_count_file: Option<String>,
    pub live_channel_total_file: Option<String>,
    /// `{0}` is replaced by the channel id.
    pub individual_channel_file_format: Option<String>,
}

impl MonitorConfig {
    /// Loads the file named by `TEAM_MONITOR_CONFIG`, or `monitor.json`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(path)
    }

    /// Loads and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parses and validates a JSON document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: MonitorConfig = serde_json::from_str(raw)?;
        config.validated()
    }

    /// Normalizes the channel list and checks the remaining fields.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        if self.supervisor.timeout_interval < MIN_TIMEOUT_INTERVAL {
            return Err(ConfigError::InvalidTimeout(self.supervisor.timeout_interval));
        }
        if self.writer.output_directory.as_os_str().is_empty() {
            return Err(ConfigError::MissingOutputDirectory);
        }

        self.supervisor.channel_ids = normalize_channel_ids(self.supervisor.channel_ids);
        if self.supervisor.channel_ids.is_empty() {
            warn!("No channel configured, only unsolicited notifications will be tracked");
        }

        Ok(self)
    }
}

/// Trims ids and drops empty and duplicate ones, keeping first-seen order.
fn normalize_channel_ids(channel_ids: Vec<ChannelId>) -> Vec<ChannelId> {
    let mut normalized: Vec<ChannelId> = Vec::with_capacity(channel_ids.len());
    for id in channel_ids {
        let id = id.trim();
        if id.is_empty() {
            warn!("Ignoring empty channel id");
        } else if normalized.iter().any(|known| known == id) {
            warn!("[#{}] Ignoring duplicate channel id", id);
        } else {
            normalized.push(id.to_string());
        }
    }
    normalized
}

fn default_timeout_interval() -> Duration {
    DEFAULT_TIMEOUT_INTERVAL
}

fn deserialize_time_span<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_time_span(&raw).map_err(serde::de::Error::custom)
}

/// Parses `[d.]hh:mm:ss[.fraction]`, e.g. `00:03:00` or `1.02:00:00.5`.
pub fn parse_time_span(raw: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidTimeoutFormat(raw.to_string());
    let trimmed = raw.trim();

    let (days, clock) = match trimmed.split_once('.') {
        Some((days, clock)) if !days.contains(':') => (parse_digits(days).ok_or_else(invalid)?, clock),
        _ => (0, trimmed),
    };

    let parts: Vec<&str> = clock.split(':').collect();
    let [hours, minutes, seconds] = parts.as_slice() else {
        return Err(invalid());
    };

    let hours = parse_digits(hours).ok_or_else(invalid)?;
    let minutes = parse_digits(minutes).filter(|m| *m < 60).ok_or_else(invalid)?;
    let (whole, fraction) = seconds.split_once('.').unwrap_or((*seconds, ""));
    let whole = parse_digits(whole).filter(|s| *s < 60).ok_or_else(invalid)?;
    let nanos = parse_fraction(fraction).ok_or_else(invalid)?;

    let total_secs = days
        .checked_mul(24)
        .and_then(|h| h.checked_add(hours))
        .and_then(|h| h.checked_mul(3600))
        .and_then(|s| s.checked_add(minutes * 60 + whole))
        .ok_or_else(invalid)?;
    Ok(Duration::new(total_secs, nanos))
}

fn parse_digits(raw: &str) -> Option<u64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

/// Fractional seconds as nanoseconds; at most nine digits.
fn parse_fraction(raw: &str) -> Option<u32> {
    if raw.is_empty() {
        return Some(0);
    }
    if raw.len() > 9 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let padded = format!("{:0<9}", raw);
    padded.parse().ok()
}

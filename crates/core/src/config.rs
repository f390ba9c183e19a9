use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    codec::DEFAULT_MAX_FRAME_LEN,
    error::ConfigError,
    events::BusConfig,
    fields::{DEFAULT_DISPLAY_EXCLUDED_KEYS, DisplayFilter},
    timeline::{Granularity, TimelineEngine},
};

/// What the decoder does with field numbers it does not know.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownFieldMode {
    #[default]
    Discard,
    /// Skipped fields are published as `UnknownFieldSeen` notices.
    Report,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Frames decoded ahead of the one being applied.
    pub decode_window: usize,
    pub max_frame_len: usize,
    /// Bytes requested per read on stream connections.
    pub read_chunk: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            decode_window: 8,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            read_chunk: 16 * 1024,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Length of one granularity step in nanoseconds.
    pub unit_nanos: u64,
    pub max_buckets: u64,
    pub default_granularity: u32,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            unit_nanos: 1,
            max_buckets: 100_000,
            default_granularity: Granularity::MIN,
        }
    }
}

impl TimelineConfig {
    pub fn engine(&self) -> TimelineEngine {
        TimelineEngine::new(self.unit_nanos, self.max_buckets)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ingest: IngestConfig,
    pub timeline: TimelineConfig,
    pub unknown_fields: UnknownFieldMode,
    pub display_excluded_keys: Vec<String>,
    /// Clear the store when the sender's drop counter resets.
    pub invalidate_on_reset: bool,
    /// Fail bus construction when a published notice type has no subscriber
    /// route declared for it.
    pub strict_routing: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ingest: IngestConfig::default(),
            timeline: TimelineConfig::default(),
            unknown_fields: UnknownFieldMode::default(),
            display_excluded_keys: DEFAULT_DISPLAY_EXCLUDED_KEYS
                .iter()
                .map(|key| key.to_string())
                .collect(),
            invalidate_on_reset: false,
            strict_routing: false,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest.decode_window == 0 {
            return Err(invalid("ingest.decode_window", "must be > 0"));
        }
        if self.ingest.max_frame_len == 0 {
            return Err(invalid("ingest.max_frame_len", "must be > 0"));
        }
        if self.ingest.read_chunk == 0 {
            return Err(invalid("ingest.read_chunk", "must be > 0"));
        }
        if self.timeline.unit_nanos == 0 {
            return Err(invalid("timeline.unit_nanos", "must be > 0"));
        }
        if self.timeline.max_buckets == 0 {
            return Err(invalid("timeline.max_buckets", "must be > 0"));
        }
        if Granularity::new(self.timeline.default_granularity).is_err() {
            return Err(invalid(
                "timeline.default_granularity",
                format!(
                    "{} is outside of {}..={}",
                    self.timeline.default_granularity,
                    Granularity::MIN,
                    Granularity::MAX
                ),
            ));
        }
        if self.display_excluded_keys.iter().any(|key| key.trim().is_empty()) {
            return Err(invalid("display_excluded_keys", "empty key"));
        }
        Ok(())
    }

    pub fn display_filter(&self) -> DisplayFilter {
        DisplayFilter::new(self.display_excluded_keys.iter().cloned())
    }

    pub fn default_granularity(&self) -> Granularity {
        Granularity::new(self.timeline.default_granularity).unwrap_or_default()
    }

    /// Bus settings for a new session.
    pub fn bus_config(&self, session_id: Uuid) -> BusConfig {
        BusConfig::new(session_id).strict(self.strict_routing)
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

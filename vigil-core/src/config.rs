//! # Config Loader — Loads and validates TOML configuration
//!
//! Reads `vigil.toml` (or a custom path) and deserializes into typed config
//! structs. Every section has sane defaults so a missing file or a partial
//! file still yields a runnable configuration.

use crate::error::{VigilError, VigilResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Top-level Vigil configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VigilConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub log_level: String,
    /// JSONL audit log of every created alert (empty = disabled).
    pub alert_log: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            alert_log: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Bounded work-queue capacity; submissions beyond this are rejected
    /// with an explicit backpressure error.
    pub queue_capacity: usize,
    pub workers: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            workers: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Per-channel send timeout so one slow transport cannot stall the rest.
    pub channel_timeout_secs: u64,
    /// Webhook endpoint used by the app's outbound adapters (empty = disabled).
    pub webhook_url: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            channel_timeout_secs: 5,
            webhook_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Per-subscriber buffered message capacity; full subscribers are dropped.
    pub subscriber_buffer: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
        }
    }
}

impl VigilConfig {
    pub fn load(path: impl AsRef<Path>) -> VigilResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: VigilConfig = toml::from_str(&content)
            .map_err(|e| VigilError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        info!(
            path = %path.display(),
            workers = config.dispatch.workers,
            queue = config.dispatch.queue_capacity,
            "Configuration loaded"
        );
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> VigilResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| VigilError::Config(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Default configuration rendered as TOML, for `--generate-config`.
    pub fn generate_default() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// Returns human-readable problems; empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.dispatch.queue_capacity == 0 {
            problems.push("dispatch.queue_capacity must be at least 1".into());
        }
        if self.dispatch.workers == 0 {
            problems.push("dispatch.workers must be at least 1".into());
        }
        if self.delivery.channel_timeout_secs == 0 {
            problems.push("delivery.channel_timeout_secs must be at least 1".into());
        }
        if self.realtime.subscriber_buffer == 0 {
            problems.push("realtime.subscriber_buffer must be at least 1".into());
        }
        problems
    }
}

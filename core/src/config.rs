//! Environment knobs (spec §6), collected in one place with the literal
//! defaults the spec names. Nothing here is a secret; trust material lives
//! in the trust store, never in config.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_port: u16,
    pub default_ttl_ms: i64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub reconnect_max_attempts: u32,
    pub notification_debounce_ms: u64,
    pub loop_suppression_window_ms: i64,
    pub reachability_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_port: 8765,
            default_ttl_ms: 24 * 60 * 60 * 1000,
            reconnect_base_ms: 2_000,
            reconnect_max_ms: 60_000,
            reconnect_max_attempts: 10,
            notification_debounce_ms: 500,
            loop_suppression_window_ms: 2_000,
            reachability_timeout_ms: 3_000,
        }
    }
}

impl Config {
    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    pub fn reachability_timeout(&self) -> Duration {
        Duration::from_millis(self.reachability_timeout_ms)
    }

    pub fn notification_debounce(&self) -> Duration {
        Duration::from_millis(self.notification_debounce_ms)
    }

    /// Load from a JSON file, falling back to defaults for any field the
    /// file omits. Missing file is not an error — defaults apply.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::plugin::PluginConfig;

pub const DEFAULT_EVENT_PERIOD_SECS: u64 = 10;
pub const DEFAULT_RPC_TOPIC: &str = "lessor.manager";

/// Manager service configuration. Every field has a default, so an empty
/// JSON object is a valid (if plugin-less) configuration.
///
/// ```json
/// {
///   "plugins": ["dummy.vm.plugin"],
///   "resource_actions": {
///     "virtual:instance": { "on_start": "wake_up", "on_end": "delete" }
///   },
///   "event_period_secs": 10
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Allow-listed plugin names; each must be installed
    pub plugins: Vec<String>,
    /// `resource_type -> { phase -> action name }`
    pub resource_actions: BTreeMap<String, BTreeMap<String, String>>,
    /// `plugin name -> options` handed to the plugin's `setup`
    pub plugin_options: BTreeMap<String, PluginConfig>,
    /// Scheduler tick period
    pub event_period_secs: u64,
    /// Topic the manager listens on
    pub manager_rpc_topic: String,
    /// Move events left `IN_PROGRESS` by a previous run to `ERROR` on start
    pub recover_in_progress_on_start: bool,
    /// Trustee identity that redeems delegated trusts
    pub service_user_id: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            plugins: Vec::new(),
            resource_actions: BTreeMap::new(),
            plugin_options: BTreeMap::new(),
            event_period_secs: DEFAULT_EVENT_PERIOD_SECS,
            manager_rpc_topic: DEFAULT_RPC_TOPIC.to_string(),
            recover_in_progress_on_start: true,
            service_user_id: "lessor".to_string(),
        }
    }
}

impl ManagerConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn event_period(&self) -> Duration {
        Duration::from_secs(self.event_period_secs.max(1))
    }
}

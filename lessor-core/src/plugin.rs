//! Resource plugin contract and plugin discovery.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::context::RequestContext;
use crate::error::PluginError;

/// Plugin-specific settings, taken from `plugin_options.<plugin name>`
pub type PluginConfig = BTreeMap<String, serde_json::Value>;

/// An option a plugin reads from its configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginOpt {
    pub name: String,
    pub required: bool,
    pub default: Option<serde_json::Value>,
}

impl PluginOpt {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, default: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            required: false,
            default: Some(default),
        }
    }
}

/// How a lifecycle action ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The action did its work
    Completed,
    /// The resource was already gone; counts as success
    AlreadyAbsent,
}

/// Performs lifecycle work for one resource type.
///
/// `wake_up` and `delete` must tolerate repetition: waking a running resource
/// is a no-op and deleting a missing one reports [`ActionOutcome::AlreadyAbsent`]
/// (returning [`PluginError::ResourceNotFound`] from `delete` is treated the same).
#[async_trait]
pub trait ResourcePlugin: Send + Sync {
    /// Name matched against the configured allow-list
    fn name(&self) -> &str;

    /// Resource type key, e.g. `virtual:instance`
    fn resource_type(&self) -> &str;

    fn title(&self) -> String;

    fn description(&self) -> Option<String> {
        None
    }

    /// Options this plugin reads during `setup`
    fn plugin_opts(&self) -> Vec<PluginOpt> {
        Vec::new()
    }

    fn setup(&mut self, _config: &PluginConfig) -> Result<(), PluginError> {
        Ok(())
    }

    async fn wake_up(
        &self,
        resource_id: &str,
        ctx: &RequestContext,
    ) -> Result<ActionOutcome, PluginError>;

    async fn delete(
        &self,
        resource_id: &str,
        ctx: &RequestContext,
    ) -> Result<ActionOutcome, PluginError>;

    /// Extra action names this plugin can run through [`ResourcePlugin::run_action`]
    fn extra_actions(&self) -> Vec<String> {
        Vec::new()
    }

    async fn run_action(
        &self,
        action: &str,
        _resource_id: &str,
        _ctx: &RequestContext,
    ) -> Result<ActionOutcome, PluginError> {
        Err(PluginError::NotSupported {
            plugin: self.name().to_string(),
            action: action.to_string(),
        })
    }

    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: self.name().to_string(),
            resource_type: self.resource_type().to_string(),
            title: self.title(),
            description: self.description(),
        }
    }
}

/// Public description of a loaded plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub resource_type: String,
    pub title: String,
    pub description: Option<String>,
}

type PluginFactory = Box<dyn Fn() -> Box<dyn ResourcePlugin> + Send + Sync>;

/// Installed plugins, each with a zero-argument constructor.
#[derive(Default)]
pub struct PluginCatalog {
    entries: Vec<(String, PluginFactory)>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the plugins shipped in this crate
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.install(crate::plugin_dummy::DUMMY_VM_PLUGIN, || {
            Box::new(crate::plugin_dummy::DummyVmPlugin::new())
        });
        catalog
    }

    pub fn install<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn ResourcePlugin> + Send + Sync + 'static,
    {
        self.entries.push((name.into(), Box::new(factory)));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(installed, _)| installed == name)
    }

    /// Construct the plugin installed under `name`
    pub fn instantiate(&self, name: &str) -> Option<Box<dyn ResourcePlugin>> {
        self.entries
            .iter()
            .find(|(installed, _)| installed == name)
            .map(|(_, factory)| factory())
    }
}

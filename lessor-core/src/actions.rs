//! Plugin registry and action table.
//!
//! Both are assembled once at startup. Every configured plugin and action
//! name is resolved here, so a bad configuration stops the service before it
//! serves anything. After that the table is read-only.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::config::ManagerConfig;
use crate::context::RequestContext;
use crate::error::{ConfigError, PluginError};
use crate::plugin::{ActionOutcome, PluginCatalog, PluginConfig, PluginInfo, ResourcePlugin};

/// When in a lease's life an action runs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LifecyclePhase {
    OnStart,
    OnEnd,
    /// Extra timing phase declared in configuration
    Named(String),
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &str {
        match self {
            LifecyclePhase::OnStart => "on_start",
            LifecyclePhase::OnEnd => "on_end",
            LifecyclePhase::Named(name) => name,
        }
    }
}

impl From<&str> for LifecyclePhase {
    fn from(s: &str) -> Self {
        match s {
            "on_start" => LifecyclePhase::OnStart,
            "on_end" => LifecyclePhase::OnEnd,
            other => LifecyclePhase::Named(other.to_string()),
        }
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A plugin capability, resolved from its configured name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginAction {
    WakeUp,
    Delete,
    Extra(String),
}

impl PluginAction {
    /// Resolve `name` against what `plugin` implements.
    pub fn resolve(name: &str, plugin: &dyn ResourcePlugin) -> Result<Self, ConfigError> {
        match name {
            "wake_up" => Ok(PluginAction::WakeUp),
            "delete" => Ok(PluginAction::Delete),
            other if plugin.extra_actions().iter().any(|a| a == other) => {
                Ok(PluginAction::Extra(other.to_string()))
            }
            other => Err(ConfigError::UnknownAction {
                plugin: plugin.name().to_string(),
                action: other.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PluginAction::WakeUp => "wake_up",
            PluginAction::Delete => "delete",
            PluginAction::Extra(name) => name,
        }
    }
}

/// A plugin action bound to its plugin instance
#[derive(Clone)]
pub struct BoundAction {
    plugin: Arc<dyn ResourcePlugin>,
    action: PluginAction,
}

impl std::fmt::Debug for BoundAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundAction")
            .field("plugin", &self.plugin.name())
            .field("action", &self.action)
            .finish()
    }
}

impl BoundAction {
    pub fn new(plugin: Arc<dyn ResourcePlugin>, action: PluginAction) -> Self {
        Self { plugin, action }
    }

    pub fn action(&self) -> &PluginAction {
        &self.action
    }

    pub fn plugin_name(&self) -> &str {
        self.plugin.name()
    }

    /// Run the action. A teardown that finds nothing to tear down succeeds
    /// with [`ActionOutcome::AlreadyAbsent`].
    pub async fn invoke(
        &self,
        resource_id: &str,
        ctx: &RequestContext,
    ) -> Result<ActionOutcome, PluginError> {
        let result = match &self.action {
            PluginAction::WakeUp => self.plugin.wake_up(resource_id, ctx).await,
            PluginAction::Delete => self.plugin.delete(resource_id, ctx).await,
            PluginAction::Extra(name) => self.plugin.run_action(name, resource_id, ctx).await,
        };

        match result {
            Err(PluginError::ResourceNotFound(_)) if self.action == PluginAction::Delete => {
                Ok(ActionOutcome::AlreadyAbsent)
            }
            other => other,
        }
        .inspect(|outcome| {
            if *outcome == ActionOutcome::AlreadyAbsent {
                tracing::warn!(
                    plugin = self.plugin.name(),
                    resource_id,
                    action = self.action.name(),
                    "Resource has already been deleted"
                );
            }
        })
    }
}

/// Loaded plugins, one per resource type
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn ResourcePlugin>>,
}

impl PluginRegistry {
    /// Instantiate every allow-listed plugin from `catalog`, fill in option
    /// defaults and run `setup`.
    pub fn load(
        catalog: &PluginCatalog,
        allow_list: &[String],
        options: &BTreeMap<String, PluginConfig>,
    ) -> Result<Self, ConfigError> {
        let missing: Vec<String> = allow_list
            .iter()
            .filter(|name| !catalog.contains(name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            tracing::error!(
                missing = ?missing,
                installed = ?catalog.names().collect::<Vec<_>>(),
                "Configured plugins are not installed"
            );
            return Err(ConfigError::MissingPlugins(missing));
        }

        let mut plugins: BTreeMap<String, Arc<dyn ResourcePlugin>> = BTreeMap::new();
        for name in allow_list {
            let Some(mut plugin) = catalog.instantiate(name) else {
                return Err(ConfigError::MissingPlugins(vec![name.clone()]));
            };

            let config = Self::plugin_config(plugin.as_ref(), options.get(name))?;
            plugin.setup(&config).map_err(|source| ConfigError::Setup {
                plugin: name.clone(),
                source,
            })?;

            let resource_type = plugin.resource_type().to_string();
            if let Some(existing) = plugins.get(&resource_type) {
                return Err(ConfigError::DuplicateResourceType {
                    resource_type,
                    first: existing.name().to_string(),
                    second: plugin.name().to_string(),
                });
            }
            tracing::info!(plugin = %name, resource_type = %resource_type, "Plugin loaded");
            plugins.insert(resource_type, Arc::from(plugin));
        }

        Ok(Self { plugins })
    }

    fn plugin_config(
        plugin: &dyn ResourcePlugin,
        provided: Option<&PluginConfig>,
    ) -> Result<PluginConfig, ConfigError> {
        let mut config = provided.cloned().unwrap_or_default();
        for opt in plugin.plugin_opts() {
            if config.contains_key(&opt.name) {
                continue;
            }
            match opt.default {
                Some(default) => {
                    config.insert(opt.name, default);
                }
                None if opt.required => {
                    return Err(ConfigError::MissingOption {
                        plugin: plugin.name().to_string(),
                        option: opt.name,
                    });
                }
                None => {}
            }
        }
        Ok(config)
    }

    pub fn get(&self, resource_type: &str) -> Option<&Arc<dyn ResourcePlugin>> {
        self.plugins.get(resource_type)
    }

    pub fn infos(&self) -> Vec<PluginInfo> {
        self.plugins.values().map(|p| p.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

/// `(resource_type, phase) -> action`, immutable after [`ActionTable::build`]
#[derive(Debug)]
pub struct ActionTable {
    actions: HashMap<(String, LifecyclePhase), BoundAction>,
    teardown: HashMap<String, BoundAction>,
}

impl ActionTable {
    /// Resolve the configured actions of every loaded plugin.
    ///
    /// `on_start` defaults to `wake_up` and `on_end` to `delete`. A section for
    /// a resource type no plugin provides is rejected.
    pub fn build(
        registry: &PluginRegistry,
        resource_actions: &BTreeMap<String, BTreeMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        if let Some(unknown) = resource_actions
            .keys()
            .find(|resource_type| registry.get(resource_type).is_none())
        {
            return Err(ConfigError::UnknownResourceType(unknown.clone()));
        }

        let mut actions = HashMap::new();
        let mut teardown = HashMap::new();
        for (resource_type, plugin) in &registry.plugins {
            let empty = BTreeMap::new();
            let section = resource_actions.get(resource_type).unwrap_or(&empty);

            for (phase, action_name) in section {
                let action = PluginAction::resolve(action_name, plugin.as_ref())?;
                actions.insert(
                    (resource_type.clone(), LifecyclePhase::from(phase.as_str())),
                    BoundAction::new(Arc::clone(plugin), action),
                );
            }

            actions
                .entry((resource_type.clone(), LifecyclePhase::OnStart))
                .or_insert_with(|| BoundAction::new(Arc::clone(plugin), PluginAction::WakeUp));
            actions
                .entry((resource_type.clone(), LifecyclePhase::OnEnd))
                .or_insert_with(|| BoundAction::new(Arc::clone(plugin), PluginAction::Delete));
            teardown.insert(
                resource_type.clone(),
                BoundAction::new(Arc::clone(plugin), PluginAction::Delete),
            );
        }

        Ok(Self { actions, teardown })
    }

    /// Build the registry and table straight from configuration
    pub fn from_config(
        catalog: &PluginCatalog,
        config: &ManagerConfig,
    ) -> Result<(PluginRegistry, Self), ConfigError> {
        let registry = PluginRegistry::load(catalog, &config.plugins, &config.plugin_options)?;
        let table = Self::build(&registry, &config.resource_actions)?;
        Ok((registry, table))
    }

    pub fn lookup(&self, resource_type: &str, phase: &LifecyclePhase) -> Option<&BoundAction> {
        self.actions.get(&(resource_type.to_string(), phase.clone()))
    }

    /// The plugin's `delete`, regardless of what `on_end` is configured to
    pub fn teardown(&self, resource_type: &str) -> Option<&BoundAction> {
        self.teardown.get(resource_type)
    }

    pub fn supports(&self, resource_type: &str) -> bool {
        self.teardown.contains_key(resource_type)
    }

    /// Named phases declared by any resource type
    pub fn named_phases(&self) -> Vec<String> {
        let mut phases: Vec<String> = self
            .actions
            .keys()
            .filter_map(|(_, phase)| match phase {
                LifecyclePhase::Named(name) => Some(name.clone()),
                _ => None,
            })
            .collect();
        phases.sort();
        phases.dedup();
        phases
    }
}

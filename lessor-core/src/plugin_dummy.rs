use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::PluginError;
use crate::plugin::{ActionOutcome, ResourcePlugin};

pub const DUMMY_VM_PLUGIN: &str = "dummy.vm.plugin";

/// Plugin for `virtual:instance` that only logs what it would do.
pub struct DummyVmPlugin;

impl DummyVmPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DummyVmPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourcePlugin for DummyVmPlugin {
    fn name(&self) -> &str {
        DUMMY_VM_PLUGIN
    }

    fn resource_type(&self) -> &str {
        "virtual:instance"
    }

    fn title(&self) -> String {
        "Dummy VM Plugin".to_string()
    }

    fn description(&self) -> Option<String> {
        Some("This plugin does nothing.".to_string())
    }

    async fn wake_up(
        &self,
        resource_id: &str,
        ctx: &RequestContext,
    ) -> Result<ActionOutcome, PluginError> {
        tracing::info!(resource_id, project = ?ctx.project_id, "VM should be woken up now");
        Ok(ActionOutcome::Completed)
    }

    async fn delete(
        &self,
        resource_id: &str,
        ctx: &RequestContext,
    ) -> Result<ActionOutcome, PluginError> {
        tracing::info!(resource_id, project = ?ctx.project_id, "VM should be deleted now");
        Ok(ActionOutcome::Completed)
    }
}

//! Shared fixtures for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::config::ManagerConfig;
use crate::context::{self, RequestContext};
use crate::error::PluginError;
use crate::identity::LocalIdentityProvider;
use crate::infrastructure::{shared, SharedStore};
use crate::infrastructure_in_memory::InMemoryLeaseStore;
use crate::manager::{CreateLeaseRequest, ManagerService, DATE_FORMAT};
use crate::plugin::{ActionOutcome, PluginCatalog, ResourcePlugin};
use crate::types::ReservationRequest;

pub const RECORDING_PLUGIN: &str = "recording.vm.plugin";
pub const VM: &str = "virtual:instance";

/// One plugin invocation as seen by the plugin
#[derive(Debug, Clone)]
pub struct Call {
    pub action: String,
    pub resource_id: String,
    pub ctx: RequestContext,
    /// What `context::current()` returned inside the plugin
    pub bound: Option<RequestContext>,
}

#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<Call>>>,
    missing: Arc<Mutex<HashSet<String>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .map(|c| (c.action, c.resource_id))
            .collect()
    }

    /// `delete` on this resource reports "not found"
    pub fn mark_missing(&self, resource_id: &str) {
        self.missing.lock().unwrap().insert(resource_id.to_string());
    }

    /// Every action on this resource fails
    pub fn mark_failing(&self, resource_id: &str) {
        self.failing.lock().unwrap().insert(resource_id.to_string());
    }

    fn record(
        &self,
        action: &str,
        resource_id: &str,
        ctx: &RequestContext,
    ) -> Result<ActionOutcome, PluginError> {
        self.calls.lock().unwrap().push(Call {
            action: action.to_string(),
            resource_id: resource_id.to_string(),
            ctx: ctx.clone(),
            bound: context::current().ok(),
        });
        if self.failing.lock().unwrap().contains(resource_id) {
            return Err(PluginError::Provider(format!("{} exploded", resource_id)));
        }
        if action == "delete" && self.missing.lock().unwrap().contains(resource_id) {
            return Err(PluginError::ResourceNotFound(resource_id.to_string()));
        }
        Ok(ActionOutcome::Completed)
    }
}

pub struct RecordingPlugin {
    recorder: Recorder,
}

#[async_trait]
impl ResourcePlugin for RecordingPlugin {
    fn name(&self) -> &str {
        RECORDING_PLUGIN
    }

    fn resource_type(&self) -> &str {
        VM
    }

    fn title(&self) -> String {
        "Recording VM Plugin".to_string()
    }

    fn extra_actions(&self) -> Vec<String> {
        vec!["snapshot".to_string()]
    }

    async fn wake_up(
        &self,
        resource_id: &str,
        ctx: &RequestContext,
    ) -> Result<ActionOutcome, PluginError> {
        self.recorder.record("wake_up", resource_id, ctx)
    }

    async fn delete(
        &self,
        resource_id: &str,
        ctx: &RequestContext,
    ) -> Result<ActionOutcome, PluginError> {
        self.recorder.record("delete", resource_id, ctx)
    }

    async fn run_action(
        &self,
        action: &str,
        resource_id: &str,
        ctx: &RequestContext,
    ) -> Result<ActionOutcome, PluginError> {
        self.recorder.record(action, resource_id, ctx)
    }
}

/// Built-in plugins plus a recording plugin for `virtual:instance`
pub fn catalog(recorder: &Recorder) -> PluginCatalog {
    let mut catalog = PluginCatalog::builtin();
    let recorder = recorder.clone();
    catalog.install(RECORDING_PLUGIN, move || {
        Box::new(RecordingPlugin {
            recorder: recorder.clone(),
        })
    });
    catalog
}

pub fn config() -> ManagerConfig {
    ManagerConfig {
        plugins: vec![RECORDING_PLUGIN.to_string()],
        ..ManagerConfig::default()
    }
}

pub struct Harness {
    pub manager: ManagerService,
    pub store: SharedStore,
    pub identity: Arc<LocalIdentityProvider>,
    pub recorder: Recorder,
}

pub fn harness() -> Harness {
    harness_with(config())
}

pub fn harness_with(config: ManagerConfig) -> Harness {
    let recorder = Recorder::default();
    let store = shared(InMemoryLeaseStore::new());
    let identity = Arc::new(LocalIdentityProvider::new());
    let manager =
        ManagerService::from_config(&config, &catalog(&recorder), store.clone(), identity.clone())
            .expect("test configuration is valid");
    Harness {
        manager,
        store,
        identity,
        recorder,
    }
}

pub fn requester() -> RequestContext {
    RequestContext {
        user_id: Some("alice".to_string()),
        user_name: Some("Alice".to_string()),
        project_id: Some("project-a".to_string()),
        project_name: Some("Project A".to_string()),
        auth_token: Some("token-alice".to_string()),
        roles: vec!["member".to_string()],
        ..RequestContext::default()
    }
}

pub fn at(raw: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(raw, DATE_FORMAT)
        .unwrap()
        .and_utc()
}

pub fn lease_request(start: &str, end: &str, resource_ids: &[&str]) -> CreateLeaseRequest {
    CreateLeaseRequest {
        name: "lease-1".to_string(),
        start_date: start.to_string(),
        end_date: end.to_string(),
        reservations: resource_ids
            .iter()
            .map(|id| ReservationRequest {
                resource_type: VM.to_string(),
                resource_id: id.to_string(),
            })
            .collect(),
    }
}

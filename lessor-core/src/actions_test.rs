#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    use crate::actions::{ActionTable, LifecyclePhase, PluginAction, PluginRegistry};
    use crate::context::RequestContext;
    use crate::error::{ConfigError, PluginError};
    use crate::plugin::{ActionOutcome, PluginCatalog, PluginConfig, PluginOpt, ResourcePlugin};
    use crate::plugin_dummy::DUMMY_VM_PLUGIN;
    use crate::test_support::{catalog, config, Recorder, RECORDING_PLUGIN, VM};

    fn actions(entries: &[(&str, &[(&str, &str)])]) -> BTreeMap<String, BTreeMap<String, String>> {
        entries
            .iter()
            .map(|(resource_type, phases)| {
                (
                    resource_type.to_string(),
                    phases
                        .iter()
                        .map(|(phase, action)| (phase.to_string(), action.to_string()))
                        .collect(),
                )
            })
            .collect()
    }

    /// Volume plugin that needs an `endpoint` option
    struct VolumePlugin {
        endpoint: Option<String>,
    }

    #[async_trait]
    impl ResourcePlugin for VolumePlugin {
        fn name(&self) -> &str {
            "volume.plugin"
        }

        fn resource_type(&self) -> &str {
            "virtual:volume"
        }

        fn title(&self) -> String {
            "Volume Plugin".to_string()
        }

        fn plugin_opts(&self) -> Vec<PluginOpt> {
            vec![
                PluginOpt::required("endpoint"),
                PluginOpt::optional("retries", serde_json::json!(3)),
            ]
        }

        fn setup(&mut self, config: &PluginConfig) -> Result<(), PluginError> {
            if config.get("retries") != Some(&serde_json::json!(3)) {
                return Err(PluginError::InvalidConfig("retries default missing".into()));
            }
            self.endpoint = config
                .get("endpoint")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            Ok(())
        }

        async fn wake_up(&self, _: &str, _: &RequestContext) -> Result<ActionOutcome, PluginError> {
            Ok(ActionOutcome::Completed)
        }

        async fn delete(&self, _: &str, _: &RequestContext) -> Result<ActionOutcome, PluginError> {
            Ok(ActionOutcome::Completed)
        }
    }

    fn volume_catalog() -> PluginCatalog {
        let mut catalog = PluginCatalog::new();
        catalog.install("volume.plugin", || Box::new(VolumePlugin { endpoint: None }));
        catalog
    }

    #[test]
    fn test_missing_plugin_refuses_to_start() {
        let recorder = Recorder::default();
        let mut cfg = config();
        cfg.plugins.push("nova.vm.plugin".to_string());

        let err = ActionTable::from_config(&catalog(&recorder), &cfg).err().unwrap();
        match err {
            ConfigError::MissingPlugins(names) => assert_eq!(names, vec!["nova.vm.plugin"]),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_two_plugins_for_one_resource_type_is_rejected() {
        let recorder = Recorder::default();
        let mut cfg = config();
        cfg.plugins.push(DUMMY_VM_PLUGIN.to_string());

        let err = ActionTable::from_config(&catalog(&recorder), &cfg).err().unwrap();
        assert!(matches!(err, ConfigError::DuplicateResourceType { .. }));
    }

    #[test]
    fn test_defaults_are_wake_up_and_delete() {
        let recorder = Recorder::default();
        let (registry, table) = ActionTable::from_config(&catalog(&recorder), &config()).unwrap();

        assert_eq!(registry.len(), 1);
        let on_start = table.lookup(VM, &LifecyclePhase::OnStart).unwrap();
        assert_eq!(on_start.action(), &PluginAction::WakeUp);
        assert_eq!(on_start.plugin_name(), RECORDING_PLUGIN);

        let on_end = table.lookup(VM, &LifecyclePhase::OnEnd).unwrap();
        assert_eq!(on_end.action(), &PluginAction::Delete);
        assert!(table.lookup("virtual:volume", &LifecyclePhase::OnStart).is_none());
    }

    #[test]
    fn test_configured_actions_and_named_phases() {
        let recorder = Recorder::default();
        let mut cfg = config();
        cfg.resource_actions = actions(&[(VM, &[("on_end", "snapshot"), ("before_end", "snapshot")])]);

        let (_, table) = ActionTable::from_config(&catalog(&recorder), &cfg).unwrap();

        assert_eq!(
            table.lookup(VM, &LifecyclePhase::OnEnd).unwrap().action(),
            &PluginAction::Extra("snapshot".to_string())
        );
        assert_eq!(
            table.lookup(VM, &LifecyclePhase::OnStart).unwrap().action(),
            &PluginAction::WakeUp
        );
        assert_eq!(table.named_phases(), vec!["before_end".to_string()]);
        // Lease deletion still tears down with the plugin's delete
        assert_eq!(table.teardown(VM).unwrap().action(), &PluginAction::Delete);
    }

    #[test]
    fn test_unknown_action_name_fails_fast() {
        let recorder = Recorder::default();
        let mut cfg = config();
        cfg.resource_actions = actions(&[(VM, &[("on_start", "resume")])]);

        let err = ActionTable::from_config(&catalog(&recorder), &cfg).err().unwrap();
        match err {
            ConfigError::UnknownAction { plugin, action } => {
                assert_eq!(plugin, RECORDING_PLUGIN);
                assert_eq!(action, "resume");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_section_for_unloaded_resource_type_fails() {
        let recorder = Recorder::default();
        let mut cfg = config();
        cfg.resource_actions = actions(&[("virtual:volume", &[("on_start", "wake_up")])]);

        let err = ActionTable::from_config(&catalog(&recorder), &cfg).err().unwrap();
        assert!(matches!(err, ConfigError::UnknownResourceType(t) if t == "virtual:volume"));
    }

    #[test]
    fn test_required_plugin_option() {
        let allow = vec!["volume.plugin".to_string()];

        let err = PluginRegistry::load(&volume_catalog(), &allow, &BTreeMap::new())
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::MissingOption { option, .. } if option == "endpoint"));

        let mut options = BTreeMap::new();
        options.insert(
            "volume.plugin".to_string(),
            PluginConfig::from([("endpoint".to_string(), serde_json::json!("http://cinder"))]),
        );
        let registry = PluginRegistry::load(&volume_catalog(), &allow, &options).unwrap();
        assert!(registry.get("virtual:volume").is_some());
        assert_eq!(registry.infos()[0].title, "Volume Plugin");
    }

    #[test]
    fn test_empty_allow_list_builds_empty_table() {
        let registry = PluginRegistry::load(&PluginCatalog::builtin(), &[], &BTreeMap::new()).unwrap();
        assert!(registry.is_empty());
        let table = ActionTable::build(&registry, &BTreeMap::new()).unwrap();
        assert!(!table.supports(VM));
    }

    #[tokio::test]
    async fn test_delete_of_missing_resource_is_success() {
        let recorder = Recorder::default();
        recorder.mark_missing("vm-gone");
        let (_, table) = ActionTable::from_config(&catalog(&recorder), &config()).unwrap();

        let outcome = table
            .teardown(VM)
            .unwrap()
            .invoke("vm-gone", &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::AlreadyAbsent);

        let outcome = table
            .teardown(VM)
            .unwrap()
            .invoke("vm-present", &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Completed);
    }

    #[tokio::test]
    async fn test_missing_resource_on_wake_up_is_still_an_error() {
        let recorder = Recorder::default();
        recorder.mark_failing("vm-broken");
        let (_, table) = ActionTable::from_config(&catalog(&recorder), &config()).unwrap();

        let result = table
            .lookup(VM, &LifecyclePhase::OnStart)
            .unwrap()
            .invoke("vm-broken", &RequestContext::default())
            .await;
        assert!(matches!(result, Err(PluginError::Provider(_))));
    }
}

use std::sync::Arc;

use dispatch::Capability;
use plugin_config::ConfigPlugin;
use plugin_core::{PluginRegistry, PluginSpec, factory::PluginFactory};
use plugin_dalle::DallePlugin;
use plugin_gpt::GptPlugin;
use serde_yaml::{Mapping, Value};
use tracing::warn;

use crate::BotConfig;

pub async fn build_registry(config: &BotConfig, api_key: Option<&str>) -> Arc<PluginRegistry> {
    let factories: [&dyn PluginFactory; 3] = [&GptPlugin, &DallePlugin, &ConfigPlugin];

    let mut specs = config.plugins.clone().unwrap_or_default();
    for factory in factories {
        factory.register_defaults(&mut specs);
    }
    for spec in &specs {
        if Capability::from_id(&spec.id).is_none() {
            warn!("Unknown plugin ID: {}", spec.id);
        }
    }

    let registry = Arc::new(PluginRegistry::new());
    for factory in factories {
        let plugin = factory.build();
        let Some(mut spec) = specs.iter().find(|s| s.id == plugin.id()).cloned() else {
            continue;
        };
        if plugin.capability() != Capability::Config
            && let Some(key) = api_key
        {
            inject_api_key(&mut spec, key);
        }
        registry.register(spec, plugin).await;
    }
    registry
}

/// Hand a CLI-supplied key to a backend unless its spec already says where to find one.
fn inject_api_key(spec: &mut PluginSpec, key: &str) {
    if !spec.config.is_mapping() {
        spec.config = Value::Mapping(Mapping::new());
    }
    let Some(map) = spec.config.as_mapping_mut() else {
        return;
    };
    if map.contains_key("api_key") || map.contains_key("api_key_env") {
        return;
    }
    map.insert("api_key".into(), key.into());
}

#[cfg(test)]
mod tests {
    use plugin_core::str_config;

    use super::*;

    fn config(yaml: &str) -> BotConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn defaults_register_all_three_capabilities() {
        let registry = build_registry(&BotConfig::default(), None).await;
        let ids: Vec<_> = registry
            .entries()
            .await
            .into_iter()
            .map(|(_, e)| e.spec.id)
            .collect();
        assert_eq!(ids, ["gpt", "dalle", "config"]);
        for c in Capability::ALL {
            assert!(registry.is_enabled(c).await);
        }
    }

    #[tokio::test]
    async fn yaml_specs_override_defaults() {
        let cfg = config(
            "plugins:\n  - id: dalle\n    enabled: false\n  - id: gpt\n    config:\n      model: gpt-4o\n  - id: weather\n",
        );
        let registry = build_registry(&cfg, None).await;
        assert!(!registry.is_enabled(Capability::Image).await);
        let gpt = registry.entry(Capability::Text).await.unwrap();
        assert_eq!(str_config(&gpt.spec, "model").as_deref(), Some("gpt-4o"));
    }

    #[tokio::test]
    async fn cli_key_is_injected_only_where_missing() {
        let cfg = config(
            "plugins:\n  - id: dalle\n    config:\n      api_key_env: IMAGE_KEY\n",
        );
        let registry = build_registry(&cfg, Some("sk-cli")).await;
        let gpt = registry.entry(Capability::Text).await.unwrap();
        assert_eq!(str_config(&gpt.spec, "api_key").as_deref(), Some("sk-cli"));
        let dalle = registry.entry(Capability::Image).await.unwrap();
        assert_eq!(str_config(&dalle.spec, "api_key"), None);
        let conf = registry.entry(Capability::Config).await.unwrap();
        assert_eq!(str_config(&conf.spec, "api_key"), None);
    }
}

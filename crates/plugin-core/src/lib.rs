pub mod factory;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

use std::{borrow::ToOwned, collections::HashMap, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use dispatch::{Capability, ConfigStore};
use mime::Mime;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Something a capability sends back to the conversation it was triggered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Image {
        caption: String,
        mime: Mime,
        data: Vec<u8>,
    },
}

/// Outbound half of the transport, bound to one conversation.
#[async_trait]
pub trait ReplySink: Send + Sync + core::fmt::Debug {
    async fn send(&self, reply: Reply) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct PluginContext {
    pub sink: Arc<dyn ReplySink>,
    pub config: ConfigStore,
    pub registry: Arc<PluginRegistry>,
    pub sender: Arc<str>,
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn id(&self) -> &'static str;
    fn help(&self) -> &'static str;
    fn capability(&self) -> Capability;
    /// Handle one dispatched argument. Backend failures should be turned into
    /// a reply here; an `Err` only means the reply itself could not be sent.
    async fn run(&self, ctx: &PluginContext, args: &str, spec: &PluginSpec) -> Result<()>;
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PluginSpec {
    pub id: String,
    #[serde(default = "enabled_true")]
    pub enabled: bool,
    #[serde(default)]
    pub config: serde_yaml::Value,
}

const fn enabled_true() -> bool {
    true
}

impl PluginSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            config: serde_yaml::Value::default(),
        }
    }
}

#[derive(Clone)]
pub struct PluginEntry {
    pub spec: PluginSpec,
    pub plugin: Arc<dyn Plugin>,
}

impl core::fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PluginEntry")
            .field("spec", &self.spec)
            .field("plugin", &self.plugin.id())
            .finish()
    }
}

#[derive(Default, Debug)]
struct RegistryInner {
    by_capability: HashMap<Capability, PluginEntry>,
    overrides: HashMap<Capability, bool>,
}

#[derive(Clone, Default, Debug)]
pub struct PluginRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, spec: PluginSpec, plugin: Arc<dyn Plugin>) -> Option<PluginEntry> {
        let capability = plugin.capability();
        let mut inner = self.inner.write().await;
        inner.overrides.remove(&capability);
        inner
            .by_capability
            .insert(capability, PluginEntry { spec, plugin })
    }

    pub async fn entry(&self, capability: Capability) -> Option<PluginEntry> {
        let inner = self.inner.read().await;
        inner.by_capability.get(&capability).cloned()
    }

    /// Registered entries in dispatch priority order.
    pub async fn entries(&self) -> Vec<(Capability, PluginEntry)> {
        let inner = self.inner.read().await;
        Capability::ALL
            .into_iter()
            .filter_map(|c| inner.by_capability.get(&c).map(|e| (c, e.clone())))
            .collect()
    }

    pub async fn set_override(&self, capability: Capability, enabled: bool) {
        let mut inner = self.inner.write().await;
        inner.overrides.insert(capability, enabled);
    }

    pub async fn clear_override(&self, capability: Capability) {
        let mut inner = self.inner.write().await;
        inner.overrides.remove(&capability);
    }

    #[must_use]
    pub async fn is_enabled(&self, capability: Capability) -> bool {
        let inner = self.inner.read().await;
        let default = inner
            .by_capability
            .get(&capability)
            .is_some_and(|entry| entry.spec.enabled);
        inner.overrides.get(&capability).copied().unwrap_or(default)
    }
}

pub fn str_config(spec: &PluginSpec, key: &str) -> Option<String> {
    spec.config
        .get(key)
        .and_then(|v| v.as_str())
        .map(ToOwned::to_owned)
}

pub fn u64_config(spec: &PluginSpec, key: &str) -> Option<u64> {
    spec.config.get(key).and_then(serde_yaml::Value::as_u64)
}

pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";

/// Backend credential plus a description of where it came from (for logs).
///
/// Checked in order: `config.api_key`, the variable named by `config.api_key_env`,
/// then `OPENAI_API_KEY`. Empty values count as unset.
pub fn resolve_api_key(
    spec: &PluginSpec,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<(String, String)> {
    let present = |v: Option<String>| v.filter(|k| !k.trim().is_empty());
    if let Some(k) = present(str_config(spec, "api_key")) {
        return Some((k, "config.api_key".to_owned()));
    }
    if let Some(env_name) = str_config(spec, "api_key_env")
        && let Some(k) = present(lookup(&env_name))
    {
        return Some((k, format!("env.{env_name}")));
    }
    present(lookup(OPENAI_API_KEY)).map(|k| (k, format!("env.{OPENAI_API_KEY}")))
}

#[must_use]
pub fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[must_use]
pub fn sanitize_line(s: &str, max: usize) -> String {
    let compact = s.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate(&compact, max)
}

/// Send a text reply to the conversation the context is bound to.
///
/// # Errors
///
/// This function will return an error if the transport fails to send.
pub async fn send_text(ctx: &PluginContext, text: impl Into<String>) -> Result<()> {
    ctx.sink.send(Reply::Text(text.into())).await
}

/// # Errors
///
/// This function will return an error if the transport fails to send.
pub async fn send_image(
    ctx: &PluginContext,
    caption: impl Into<String>,
    mime: Mime,
    data: Vec<u8>,
) -> Result<()> {
    ctx.sink
        .send(Reply::Image {
            caption: caption.into(),
            mime,
            data,
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubPlugin, context};

    #[tokio::test]
    async fn register_replaces_entry_and_clears_override() {
        let registry = PluginRegistry::new();
        registry
            .register(PluginSpec::new("gpt"), Arc::new(StubPlugin(Capability::Text)))
            .await;
        registry.set_override(Capability::Text, false).await;
        assert!(!registry.is_enabled(Capability::Text).await);

        let previous = registry
            .register(PluginSpec::new("gpt"), Arc::new(StubPlugin(Capability::Text)))
            .await;
        assert!(previous.is_some());
        assert!(registry.is_enabled(Capability::Text).await);
    }

    #[tokio::test]
    async fn unknown_capability_is_disabled() {
        let registry = PluginRegistry::new();
        assert!(!registry.is_enabled(Capability::Image).await);
        registry.set_override(Capability::Image, true).await;
        assert!(registry.is_enabled(Capability::Image).await);
        registry.clear_override(Capability::Image).await;
        assert!(!registry.is_enabled(Capability::Image).await);
    }

    #[tokio::test]
    async fn entries_follow_priority_order() {
        let registry = PluginRegistry::new();
        for c in [Capability::Config, Capability::Text, Capability::Image] {
            registry
                .register(PluginSpec::new(c.id()), Arc::new(StubPlugin(c)))
                .await;
        }
        let order: Vec<_> = registry.entries().await.into_iter().map(|(c, _)| c).collect();
        assert_eq!(order, Capability::ALL);
    }

    #[tokio::test]
    async fn send_helpers_reach_the_sink() {
        let (ctx, sink) = context();
        send_text(&ctx, "hi").await.unwrap();
        send_image(&ctx, "cap", mime::IMAGE_PNG, vec![1, 2]).await.unwrap();
        assert_eq!(
            sink.replies().await,
            vec![
                Reply::Text("hi".to_owned()),
                Reply::Image {
                    caption: "cap".to_owned(),
                    mime: mime::IMAGE_PNG,
                    data: vec![1, 2]
                }
            ]
        );
    }

    #[test]
    fn spec_deserializes_with_defaults() {
        let spec: PluginSpec = serde_yaml::from_str("id: gpt\nconfig:\n  model: gpt-4o\n  max_tokens: 200\n").unwrap();
        assert!(spec.enabled);
        assert_eq!(str_config(&spec, "model").as_deref(), Some("gpt-4o"));
        assert_eq!(u64_config(&spec, "max_tokens"), Some(200));
        assert_eq!(str_config(&spec, "missing"), None);
    }

    #[test]
    fn api_key_prefers_config_then_named_env_then_default() {
        let env = |k: &str| match k {
            "MY_KEY" => Some("from-named".to_owned()),
            OPENAI_API_KEY => Some("from-default".to_owned()),
            _ => None,
        };
        let mut spec: PluginSpec =
            serde_yaml::from_str("id: gpt\nconfig:\n  api_key: inline\n  api_key_env: MY_KEY\n").unwrap();
        assert_eq!(
            resolve_api_key(&spec, env),
            Some(("inline".to_owned(), "config.api_key".to_owned()))
        );

        spec.config = serde_yaml::from_str("api_key_env: MY_KEY").unwrap();
        assert_eq!(resolve_api_key(&spec, env).map(|(k, _)| k).as_deref(), Some("from-named"));

        spec.config = serde_yaml::Value::default();
        assert_eq!(
            resolve_api_key(&spec, env).map(|(_, src)| src).as_deref(),
            Some("env.OPENAI_API_KEY")
        );
        assert_eq!(resolve_api_key(&spec, |_| Some(String::new())), None);
    }

    #[test]
    fn sanitize_line_compacts_whitespace() {
        assert_eq!(sanitize_line("a\n  b\tc", 100), "a b c");
        assert_eq!(sanitize_line("abcdef", 3), "abc");
    }
}

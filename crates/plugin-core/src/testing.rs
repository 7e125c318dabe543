//! Test doubles shared by the capability crates.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dispatch::{Capability, ConfigStore};
use tokio::sync::Mutex;

use crate::{Plugin, PluginContext, PluginRegistry, PluginSpec, Reply, ReplySink, send_text};

/// Sink that keeps every reply in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    replies: Mutex<Vec<Reply>>,
}

impl RecordingSink {
    pub async fn replies(&self) -> Vec<Reply> {
        self.replies.lock().await.clone()
    }

    /// Text bodies only, in send order.
    pub async fn texts(&self) -> Vec<String> {
        self.replies
            .lock()
            .await
            .iter()
            .filter_map(|r| match r {
                Reply::Text(t) => Some(t.clone()),
                Reply::Image { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl ReplySink for RecordingSink {
    async fn send(&self, reply: Reply) -> Result<()> {
        self.replies.lock().await.push(reply);
        Ok(())
    }
}

/// Plugin that echoes `"<id>:<args>"` back as text.
#[derive(Debug)]
pub struct StubPlugin(pub Capability);

#[async_trait]
impl Plugin for StubPlugin {
    fn id(&self) -> &'static str {
        self.0.id()
    }
    fn help(&self) -> &'static str {
        "stub"
    }
    fn capability(&self) -> Capability {
        self.0
    }
    async fn run(&self, ctx: &PluginContext, args: &str, _spec: &PluginSpec) -> Result<()> {
        send_text(ctx, format!("{}:{args}", self.id())).await
    }
}

#[must_use]
pub fn context() -> (PluginContext, Arc<RecordingSink>) {
    context_with(ConfigStore::default(), Arc::new(PluginRegistry::new()))
}

#[must_use]
pub fn context_with(
    config: ConfigStore,
    registry: Arc<PluginRegistry>,
) -> (PluginContext, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let ctx = PluginContext {
        sink: Arc::clone(&sink) as Arc<dyn ReplySink>,
        config,
        registry,
        sender: Arc::from("@tester:example.org"),
    };
    (ctx, sink)
}

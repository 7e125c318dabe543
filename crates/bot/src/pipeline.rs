//! Single-consumer loop between the transport and the capabilities.
//!
//! Transport callbacks only enqueue. One task drains the queue, filters and
//! dispatches each message in arrival order, so every decision sees every
//! earlier config update. Config updates run inline on that task; generation
//! runs on spawned tasks and may overlap.

use std::sync::Arc;

use dispatch::{Capability, ConfigStore, InboundMessage, dispatch, filter};
use plugin_core::{PluginContext, PluginRegistry, ReplySink, truncate};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// An inbound message plus the way back to its conversation.
#[derive(Debug)]
pub struct Envelope {
    pub message: InboundMessage,
    pub sink: Arc<dyn ReplySink>,
}

#[must_use]
pub fn channel(capacity: usize) -> (mpsc::Sender<Envelope>, mpsc::Receiver<Envelope>) {
    mpsc::channel(capacity.max(1))
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: ConfigStore,
    registry: Arc<PluginRegistry>,
}

impl Pipeline {
    #[must_use]
    pub const fn new(config: ConfigStore, registry: Arc<PluginRegistry>) -> Self {
        Self { config, registry }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<Envelope>) {
        while let Some(envelope) = rx.recv().await {
            // Generation tasks are detached; their failures are logged inside.
            drop(self.handle(envelope).await);
        }
        info!("Inbound queue closed, dispatcher stopping");
    }

    /// Process one envelope. Returns the spawned task for generation
    /// capabilities, `None` when nothing was spawned (dropped, unmatched,
    /// disabled, or a config update that already completed).
    pub async fn handle(&self, envelope: Envelope) -> Option<JoinHandle<()>> {
        let Envelope { message, sink } = envelope;
        let config = self.config.get().await;

        if let Err(reason) = filter::check(&message, &config) {
            debug!(sender = %message.sender_id, reason = reason.as_str(), "Dropping ineligible message");
            return None;
        }

        let Some((capability, argument)) = dispatch(&message, &config).into_parts() else {
            debug!(sender = %message.sender_id, "No prefix matched");
            return None;
        };

        let Some(entry) = self.registry.entry(capability).await else {
            warn!(capability = %capability, "No plugin registered for capability");
            return None;
        };
        if !self.registry.is_enabled(capability).await {
            info!(plugin = %entry.spec.id, "Plugin disabled");
            return None;
        }

        info!(
            sender = %message.sender_id,
            capability = %capability,
            args = %truncate(&argument, 200),
            "Dispatching message"
        );
        let ctx = PluginContext {
            sink,
            config: self.config.clone(),
            registry: Arc::clone(&self.registry),
            sender: Arc::from(message.sender_id.as_str()),
        };
        let task = async move {
            if let Err(e) = entry.plugin.run(&ctx, &argument, &entry.spec).await {
                warn!(error = %e, plugin = %entry.spec.id, "Plugin failed");
            }
        };

        if capability == Capability::Config {
            task.await;
            None
        } else {
            Some(tokio::spawn(task))
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use async_trait::async_trait;
    use dispatch::{BROADCAST_SENDER, Configuration};
    use plugin_core::{
        Plugin, PluginSpec, Reply,
        testing::{RecordingSink, StubPlugin},
    };
    use plugin_config::ConfigTool;

    use super::*;

    async fn pipeline_with(config: Configuration) -> Pipeline {
        let registry = Arc::new(PluginRegistry::new());
        for c in [Capability::Text, Capability::Image] {
            registry
                .register(PluginSpec::new(c.id()), Arc::new(StubPlugin(c)))
                .await;
        }
        registry
            .register(PluginSpec::new("config"), Arc::new(ConfigTool))
            .await;
        Pipeline::new(ConfigStore::new(config), registry)
    }

    fn envelope(message: InboundMessage, sink: &Arc<RecordingSink>) -> Envelope {
        Envelope {
            message,
            sink: Arc::clone(sink) as Arc<dyn ReplySink>,
        }
    }

    async fn feed(pipeline: &Pipeline, sink: &Arc<RecordingSink>, message: InboundMessage) {
        if let Some(handle) = pipeline.handle(envelope(message, sink)).await {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn routes_prefixed_messages_to_plugins() {
        let pipeline = pipeline_with(Configuration::default()).await;
        let sink = Arc::new(RecordingSink::default());
        feed(&pipeline, &sink, InboundMessage::text("@a:x", "!dalle a red fox")).await;
        feed(&pipeline, &sink, InboundMessage::text("@a:x", "!GPT hello")).await;
        feed(&pipeline, &sink, InboundMessage::text("@a:x", "just chatting")).await;
        assert_eq!(
            sink.texts().await,
            vec!["dalle:a red fox".to_owned(), "gpt:hello".to_owned()]
        );
    }

    #[tokio::test]
    async fn ineligible_messages_get_no_reply() {
        let pipeline = pipeline_with(Configuration::default()).await;
        let sink = Arc::new(RecordingSink::default());
        feed(&pipeline, &sink, InboundMessage::text(BROADCAST_SENDER, "!gpt hi")).await;
        feed(&pipeline, &sink, InboundMessage::text("@a:x", "!gpt hi").quoted(true)).await;
        feed(&pipeline, &sink, InboundMessage::text("@me:x", "!gpt hi").from_self(true)).await;
        assert!(sink.replies().await.is_empty());
    }

    #[tokio::test]
    async fn own_messages_pass_when_reply_self_is_on() {
        let pipeline = pipeline_with(Configuration {
            reply_self: true,
            ..Configuration::default()
        })
        .await;
        let sink = Arc::new(RecordingSink::default());
        feed(&pipeline, &sink, InboundMessage::text("@me:x", "!gpt hi").from_self(true)).await;
        assert_eq!(sink.texts().await, vec!["gpt:hi".to_owned()]);
    }

    #[tokio::test]
    async fn config_update_is_visible_to_the_next_message() {
        let pipeline = pipeline_with(Configuration::default()).await;
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = channel(8);
        let consumer = tokio::spawn(pipeline.clone().run(rx));

        for body in ["!config set gpt_prefix !ask", "!ask after", "!gpt before"] {
            tx.send(envelope(InboundMessage::text("@a:x", body), &sink))
                .await
                .unwrap();
        }
        drop(tx);
        consumer.await.unwrap();
        // Let the detached generation task finish.
        for _ in 0..50 {
            if sink.replies().await.len() >= 2 {
                break;
            }
            tokio::task::yield_now().await;
        }

        let texts = sink.texts().await;
        assert_eq!(texts[0], "gpt_prefix set to !ask");
        assert!(texts.contains(&"gpt:after".to_owned()));
        assert!(!texts.iter().any(|t| t == "gpt:before"));
    }

    #[tokio::test]
    async fn disabled_capability_is_skipped() {
        let pipeline = pipeline_with(Configuration::default()).await;
        let sink = Arc::new(RecordingSink::default());
        feed(&pipeline, &sink, InboundMessage::text("@a:x", "!config disable dalle")).await;
        feed(&pipeline, &sink, InboundMessage::text("@a:x", "!dalle owl")).await;
        assert_eq!(sink.texts().await, vec!["disabled capability: dalle".to_owned()]);
    }

    #[tokio::test]
    async fn routing_off_sends_everything_to_text() {
        let pipeline = pipeline_with(Configuration {
            prefix_enabled: false,
            ..Configuration::default()
        })
        .await;
        let sink = Arc::new(RecordingSink::default());
        feed(&pipeline, &sink, InboundMessage::text("@a:x", "!dalle owl")).await;
        assert_eq!(sink.texts().await, vec!["gpt:!dalle owl".to_owned()]);
    }

    #[derive(Debug)]
    struct FailingPlugin;

    #[async_trait]
    impl Plugin for FailingPlugin {
        fn id(&self) -> &'static str {
            "gpt"
        }
        fn help(&self) -> &'static str {
            "fails"
        }
        fn capability(&self) -> Capability {
            Capability::Text
        }
        async fn run(&self, _ctx: &PluginContext, _args: &str, _spec: &PluginSpec) -> Result<()> {
            anyhow::bail!("backend down")
        }
    }

    #[tokio::test]
    async fn plugin_error_does_not_stop_the_loop() {
        let pipeline = pipeline_with(Configuration::default()).await;
        pipeline
            .registry
            .register(PluginSpec::new("gpt"), Arc::new(FailingPlugin))
            .await;
        let sink = Arc::new(RecordingSink::default());
        feed(&pipeline, &sink, InboundMessage::text("@a:x", "!gpt hi")).await;
        feed(&pipeline, &sink, InboundMessage::text("@a:x", "!dalle owl")).await;
        assert_eq!(
            sink.replies().await,
            vec![Reply::Text("dalle:owl".to_owned())]
        );
    }
}

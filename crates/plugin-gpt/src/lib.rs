use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use async_trait::async_trait;
use dispatch::Capability;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use plugin_core::factory::{PluginFactory, push_default_spec};
use plugin_core::{
    Plugin, PluginContext, PluginSpec, resolve_api_key, sanitize_line, send_text, str_config,
    truncate, u64_config,
};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_API_BASE: &str = "https://api.openai.com";
const DEFAULT_API_PATH: &str = "/v1/chat/completions";
const DEFAULT_MAX_TOKENS: u32 = 1024;

#[derive(Debug)]
pub struct GptPlugin;

impl PluginFactory for GptPlugin {
    fn register_defaults(&self, specs: &mut Vec<PluginSpec>) {
        push_default_spec(specs, "gpt");
    }

    fn build(&self) -> Arc<dyn Plugin> {
        Arc::new(GptTool::default())
    }
}

#[derive(Debug)]
pub struct GptTool {
    http: reqwest::Client,
    env: fn(&str) -> Option<String>,
}

impl Default for GptTool {
    fn default() -> Self {
        Self::with_env(|key| std::env::var(key).ok())
    }
}

impl GptTool {
    #[must_use]
    pub fn with_env(env: fn(&str) -> Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            env,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
struct Msg {
    role: &'static str,
    content: String,
}

#[derive(Serialize, Debug)]
struct Body {
    model: String,
    messages: Vec<Msg>,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResp {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ChatSettings {
    url: String,
    model: String,
    max_tokens: u32,
    system_prompt: Option<String>,
}

impl ChatSettings {
    fn from_spec(spec: &PluginSpec, env: impl Fn(&str) -> Option<String>) -> Self {
        let base = str_config(spec, "api_base")
            .or_else(|| env("OPENAI_API_BASE"))
            .unwrap_or_else(|| DEFAULT_API_BASE.to_owned());
        let path = str_config(spec, "api_path").unwrap_or_else(|| DEFAULT_API_PATH.to_owned());
        let model = str_config(spec, "model")
            .or_else(|| env("GPT_MODEL"))
            .unwrap_or_else(|| DEFAULT_MODEL.to_owned());
        let max_tokens = u64_config(spec, "max_tokens")
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);
        let system_prompt = str_config(spec, "system_prompt").filter(|s| !s.trim().is_empty());
        Self {
            url: format!("{}{path}", base.trim_end_matches('/')),
            model,
            max_tokens,
            system_prompt,
        }
    }

    fn body(&self, prompt: &str) -> Body {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(Msg {
                role: "system",
                content: system.clone(),
            });
        }
        messages.push(Msg {
            role: "user",
            content: prompt.to_owned(),
        });
        Body {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
        }
    }
}

fn reply_text(resp: ChatResp) -> Option<String> {
    resp.choices.into_iter().find_map(|c| {
        c.message
            .content
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty())
    })
}

async fn complete(
    http: &reqwest::Client,
    settings: &ChatSettings,
    api_key: &str,
    prompt: &str,
) -> Result<String> {
    let resp = http
        .post(&settings.url)
        .bearer_auth(api_key)
        .json(&settings.body(prompt))
        .send()
        .await
        .context("sending chat completion request")?;
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(anyhow!("API returned {status}: {}", truncate(&text, 300)));
    }
    let parsed: ChatResp = resp
        .json()
        .await
        .context("parsing chat completion response")?;
    reply_text(parsed).ok_or_else(|| anyhow!("response contained no text"))
}

#[async_trait]
impl Plugin for GptTool {
    fn id(&self) -> &'static str {
        "gpt"
    }
    fn help(&self) -> &'static str {
        "Ask the language model: <gpt prefix> <prompt>"
    }
    fn capability(&self) -> Capability {
        Capability::Text
    }

    async fn run(&self, ctx: &PluginContext, args: &str, spec: &PluginSpec) -> Result<()> {
        let prompt = args.trim();
        if prompt.is_empty() {
            let prefix = ctx.config.get().await.gpt_prefix;
            return send_text(ctx, format!("Usage: {prefix} <prompt>")).await;
        }

        let Some((api_key, key_source)) = resolve_api_key(spec, self.env) else {
            warn!(plugin = %self.id(), "GPT request blocked: no API key set");
            return send_text(ctx, "OpenAI API key missing: set OPENAI_API_KEY").await;
        };
        let settings = ChatSettings::from_spec(spec, self.env);
        info!(
            sender = %ctx.sender,
            model = %settings.model,
            url = %settings.url,
            key_source = %key_source,
            prompt = %sanitize_line(prompt, 120),
            "GPT request prepared"
        );

        let started = std::time::Instant::now();
        match complete(&self.http, &settings, &api_key, prompt).await {
            Ok(answer) => {
                info!(elapsed_ms = started.elapsed().as_millis(), chars = answer.chars().count(), "GPT response received");
                send_text(ctx, answer).await
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "GPT request failed");
                send_text(
                    ctx,
                    format!("An error occurred, please contact the administrator. ({e})"),
                )
                .await
            }
        }
    }
}

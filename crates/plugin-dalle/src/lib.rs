use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use dispatch::{Capability, ImageSize};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use plugin_core::factory::{PluginFactory, push_default_spec};
use plugin_core::{
    Plugin, PluginContext, PluginSpec, resolve_api_key, sanitize_line, send_image, send_text,
    str_config, truncate,
};

pub const DEFAULT_MODEL: &str = "dall-e-2";
const DEFAULT_API_BASE: &str = "https://api.openai.com";
const DEFAULT_API_PATH: &str = "/v1/images/generations";

#[derive(Debug)]
pub struct DallePlugin;

impl PluginFactory for DallePlugin {
    fn register_defaults(&self, specs: &mut Vec<PluginSpec>) {
        push_default_spec(specs, "dalle");
    }

    fn build(&self) -> Arc<dyn Plugin> {
        Arc::new(DalleTool::default())
    }
}

#[derive(Debug)]
pub struct DalleTool {
    http: reqwest::Client,
    env: fn(&str) -> Option<String>,
}

impl Default for DalleTool {
    fn default() -> Self {
        Self::with_env(|key| std::env::var(key).ok())
    }
}

impl DalleTool {
    #[must_use]
    pub fn with_env(env: fn(&str) -> Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            env,
        }
    }
}

#[derive(Serialize, Debug)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    size: &'static str,
    response_format: &'static str,
}

#[derive(Deserialize)]
struct ImageResponse {
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
}

fn endpoint(spec: &PluginSpec, env: impl Fn(&str) -> Option<String>) -> String {
    let base = str_config(spec, "api_base")
        .or_else(|| env("OPENAI_API_BASE"))
        .unwrap_or_else(|| DEFAULT_API_BASE.to_owned());
    let path = str_config(spec, "api_path").unwrap_or_else(|| DEFAULT_API_PATH.to_owned());
    format!("{}{path}", base.trim_end_matches('/'))
}

fn decode_first_image(resp: ImageResponse) -> Result<Vec<u8>> {
    let encoded = resp
        .data
        .into_iter()
        .find_map(|d| d.b64_json)
        .ok_or_else(|| anyhow!("response contained no image"))?;
    STANDARD
        .decode(encoded.trim())
        .context("decoding base64 image payload")
}

async fn generate(
    http: &reqwest::Client,
    url: &str,
    api_key: &str,
    request: &ImageRequest<'_>,
) -> Result<Vec<u8>> {
    let resp = http
        .post(url)
        .bearer_auth(api_key)
        .json(request)
        .send()
        .await
        .context("sending image generation request")?;
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(anyhow!("API returned {status}: {}", truncate(&text, 300)));
    }
    let parsed: ImageResponse = resp
        .json()
        .await
        .context("parsing image generation response")?;
    decode_first_image(parsed)
}

#[async_trait]
impl Plugin for DalleTool {
    fn id(&self) -> &'static str {
        "dalle"
    }
    fn help(&self) -> &'static str {
        "Generate an image: <dalle prefix> <prompt>"
    }
    fn capability(&self) -> Capability {
        Capability::Image
    }

    async fn run(&self, ctx: &PluginContext, args: &str, spec: &PluginSpec) -> Result<()> {
        let prompt = args.trim();
        let config = ctx.config.get().await;
        if prompt.is_empty() {
            return send_text(ctx, format!("Usage: {} <prompt>", config.dalle_prefix)).await;
        }

        let Some((api_key, key_source)) = resolve_api_key(spec, self.env) else {
            warn!(plugin = %self.id(), "Image request blocked: no API key set");
            return send_text(ctx, "OpenAI API key missing: set OPENAI_API_KEY").await;
        };
        let model = str_config(spec, "model").unwrap_or_else(|| DEFAULT_MODEL.to_owned());
        let size: ImageSize = config.image_size;
        let url = endpoint(spec, self.env);
        let request = ImageRequest {
            model: &model,
            prompt,
            n: 1,
            size: size.as_str(),
            response_format: "b64_json",
        };
        info!(
            sender = %ctx.sender,
            model = %model,
            size = %size,
            key_source = %key_source,
            prompt = %sanitize_line(prompt, 120),
            "Image request prepared"
        );

        match generate(&self.http, &url, &api_key, &request).await {
            Ok(bytes) => {
                info!(bytes = bytes.len(), "Image received");
                send_image(ctx, prompt, mime::IMAGE_PNG, bytes).await
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Image request failed");
                send_text(
                    ctx,
                    format!("An error occurred, please contact the administrator. ({e})"),
                )
                .await
            }
        }
    }
}

mod logging;
mod pipeline;
mod plugins;
mod session;
mod transport;

use core::time::Duration;
use std::{
    fs,
    io::IsTerminal as _,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context as _, Result, anyhow};
use clap::Parser;
use dispatch::{ConfigStore, Configuration, env::RawSettings};
use matrix_sdk::{
    Client,
    config::SyncSettings,
    room::Room,
    ruma::events::room::{
        member::{MembershipState, StrippedRoomMemberEvent},
        message::OriginalSyncRoomMessageEvent,
    },
};
use plugin_core::{PluginSpec, ReplySink};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    logging::init_tracing,
    pipeline::{DEFAULT_QUEUE_CAPACITY, Envelope, Pipeline},
    session::LoginOptions,
    transport::{RoomSink, inbound_from_event},
};

#[derive(Parser, Debug)]
#[command(
    name = "gpt-matrix-bot",
    version,
    about = "Prefix-routed GPT and image generation bot for Matrix"
)]
struct Args {
    /// Homeserver base URL, e.g. `https://matrix-client.matrix.org`.
    #[arg(long, env = "MATRIX_HOMESERVER")]
    homeserver: String,

    /// Username (localpart or full user ID)
    #[arg(long, env = "MATRIX_USERNAME")]
    username: String,

    /// Password (if omitted, will prompt if needed)
    #[arg(long, env = "MATRIX_PASSWORD")]
    password: Option<String>,

    /// Directory for persistent state (encryption keys, sync cache)
    #[arg(long, env = "MATRIX_STORE", default_value = "./bot-store")]
    store: PathBuf,

    /// JSON session file for access token/device info
    #[arg(long, env = "MATRIX_SESSION_FILE", default_value = "./session.json")]
    session_file: PathBuf,

    /// Device display name
    #[arg(long, env = "MATRIX_DEVICE_NAME", default_value = "gpt-matrix-bot")]
    device_name: String,

    /// Optional YAML file with per-plugin settings
    #[arg(long, env = "BOT_CONFIG", default_value = "./config.yaml")]
    config: PathBuf,

    /// Disable auto-joining rooms when invited
    #[arg(long)]
    no_autojoin: bool,

    /// Sync timeout in milliseconds
    #[arg(long, env = "MATRIX_SYNC_TIMEOUT_MS", default_value_t = 30000)]
    sync_timeout_ms: u64,

    /// Credential for the generation backends
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Route by prefix ("true") or send every message to GPT
    #[arg(long, env = dispatch::env::PREFIX_ENABLED)]
    prefix_enabled: Option<String>,

    #[arg(long, env = dispatch::env::GPT_PREFIX)]
    gpt_prefix: Option<String>,

    #[arg(long, env = dispatch::env::DALLE_PREFIX)]
    dalle_prefix: Option<String>,

    #[arg(long, env = dispatch::env::AI_CONFIG_PREFIX)]
    config_prefix: Option<String>,

    /// Also answer messages sent from the bot's own account ("true")
    #[arg(long, env = dispatch::env::REPLY_SELF)]
    reply_self: Option<String>,

    #[arg(long, env = dispatch::env::TTS_ENABLED)]
    tts_enabled: Option<String>,

    #[arg(long, env = dispatch::env::TRANSCRIPTION_ENABLED)]
    transcription_enabled: Option<String>,
}

impl Args {
    fn raw_settings(&self) -> RawSettings {
        RawSettings {
            prefix_enabled: self.prefix_enabled.clone(),
            gpt_prefix: self.gpt_prefix.clone(),
            dalle_prefix: self.dalle_prefix.clone(),
            config_prefix: self.config_prefix.clone(),
            reply_self: self.reply_self.clone(),
            tts_enabled: self.tts_enabled.clone(),
            transcription_enabled: self.transcription_enabled.clone(),
        }
    }

    fn login_options(&self) -> LoginOptions {
        LoginOptions {
            homeserver: self.homeserver.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            store: self.store.clone(),
            session_file: self.session_file.clone(),
            device_name: self.device_name.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub(crate) struct BotConfig {
    #[serde(default)]
    pub(crate) plugins: Option<Vec<PluginSpec>>,
    #[serde(default)]
    pub(crate) queue_capacity: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present so clap can pick up env vars.
    let _ = dotenvy::dotenv();
    init_tracing();
    let args = Args::parse();

    let bot_config = load_config(&args.config)?;
    let settings = args.raw_settings().resolve();
    print_banner(&settings);
    if args.openai_api_key.as_deref().is_none_or(str::is_empty) {
        warn!("OPENAI_API_KEY is not set; generation requests will be answered with an error");
    }

    let registry = plugins::build_registry(&bot_config, args.openai_api_key.as_deref()).await;
    for (capability, entry) in registry.entries().await {
        info!(capability = %capability, plugin = %entry.spec.id, enabled = entry.spec.enabled, help = entry.plugin.help(), "Registered plugin");
    }

    let client = session::connect(&args.login_options()).await?;

    if !args.no_autojoin {
        client.add_event_handler(
            |ev: StrippedRoomMemberEvent, room: Room, client: Client| async move {
                if ev.content.membership != MembershipState::Invite {
                    return;
                }
                let Some(own_id) = client.user_id() else {
                    return;
                };
                if ev.state_key != own_id.as_str() {
                    return;
                }
                info!(room_id = %room.room_id(), "Auto-joining invited room");
                if let Err(e) = room.join().await {
                    warn!(error = %e, "Failed to accept invite");
                }
            },
        );
    }

    let capacity = bot_config.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY);
    let (tx, rx) = pipeline::channel(capacity);
    tokio::spawn(Pipeline::new(ConfigStore::new(settings), registry).run(rx));

    client.add_event_handler(
        move |ev: OriginalSyncRoomMessageEvent, room: Room, client: Client| {
            let tx = tx.clone();
            async move {
                let Some(own_id) = client.user_id() else {
                    return;
                };
                let Some(message) = inbound_from_event(&ev, own_id) else {
                    debug!(room_id = %room.room_id(), sender = %ev.sender, "Ignoring non-chat message type");
                    return;
                };
                let envelope = Envelope {
                    message,
                    sink: Arc::new(RoomSink::new(room)) as Arc<dyn ReplySink>,
                };
                if tx.send(envelope).await.is_err() {
                    warn!("Dispatcher stopped; dropping inbound message");
                }
            }
        },
    );

    info!(
        timeout_ms = args.sync_timeout_ms,
        "Client is ready, starting sync… Press Ctrl+C to stop."
    );
    let sync = SyncSettings::new().timeout(Duration::from_millis(args.sync_timeout_ms));
    client
        .sync(sync)
        .await
        .map_err(|e| anyhow!("sync terminated: {e}"))
}

fn load_config(path: &Path) -> Result<BotConfig> {
    if !path.exists() {
        info!(path = %path.display(), "No config file, using plugin defaults");
        return Ok(BotConfig::default());
    }
    let yaml = fs::read_to_string(path)
        .with_context(|| format!("reading config file at {}", path.display()))?;
    let cfg: BotConfig = serde_yaml::from_str(&yaml).context("parsing YAML config")?;
    Ok(cfg)
}

fn banner_lines(config: &Configuration) -> (String, String) {
    if config.prefix_enabled {
        (
            "PREFIX ROUTING".to_owned(),
            format!(
                "text: {} <prompt> | image: {} <prompt> | config: {} <command>",
                config.gpt_prefix, config.dalle_prefix, config.config_prefix
            ),
        )
    } else {
        (
            "OPEN MODE".to_owned(),
            "every message is sent to GPT as a prompt".to_owned(),
        )
    }
}

fn print_banner(config: &Configuration) {
    let is_tty = std::io::stderr().is_terminal()
        || std::env::var("FORCE_COLOR").is_ok_and(|v| !v.is_empty());
    let (title, sub) = banner_lines(config);
    if is_tty {
        eprintln!(
            "\x1b[1;32m==============================\n  {title}\n  {sub}\n==============================\x1b[0m"
        );
    } else {
        eprintln!("==============================\n  {title}\n  {sub}\n==============================");
    }
    info!(
        prefix_enabled = config.prefix_enabled,
        reply_self = config.reply_self,
        tts = config.tts_enabled,
        transcription = config.transcription_enabled,
        "Dispatcher configuration loaded"
    );
}

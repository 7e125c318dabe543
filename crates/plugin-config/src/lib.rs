use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dispatch::{Capability, ConfigError, ConfigField, Configuration};
use tracing::info;

use plugin_core::factory::{PluginFactory, push_default_spec};
use plugin_core::{Plugin, PluginContext, PluginSpec, send_text};

const GET_USAGE: &str = "get <field>";
const SET_USAGE: &str = "set <field> <value>";
const TOGGLE_USAGE: &str = "enable|disable <gpt|dalle>";
const RESET_USAGE: &str = "reset <gpt|dalle>";

#[derive(Debug)]
pub struct ConfigPlugin;

impl PluginFactory for ConfigPlugin {
    fn register_defaults(&self, specs: &mut Vec<PluginSpec>) {
        push_default_spec(specs, "config");
    }

    fn build(&self) -> Arc<dyn Plugin> {
        Arc::new(ConfigTool)
    }
}

#[derive(Debug)]
pub struct ConfigTool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command<'a> {
    List,
    Help,
    Get(&'a str),
    Set { field: &'a str, value: &'a str },
    Toggle { capability: &'a str, enabled: bool },
    Reset(&'a str),
    Usage(&'static str),
}

fn split_head(s: &str) -> (&str, &str) {
    s.split_once(char::is_whitespace)
        .map_or((s, ""), |(head, rest)| (head, rest.trim()))
}

fn parse(args: &str) -> Command<'_> {
    let (head, rest) = split_head(args.trim());
    match head.to_ascii_lowercase().as_str() {
        "" | "list" => Command::List,
        "help" => Command::Help,
        "get" if rest.is_empty() => Command::Usage(GET_USAGE),
        "get" => Command::Get(rest),
        "set" => match split_head(rest) {
            (field, value) if !field.is_empty() && !value.is_empty() => {
                Command::Set { field, value }
            }
            _ => Command::Usage(SET_USAGE),
        },
        "enable" | "disable" if rest.is_empty() => Command::Usage(TOGGLE_USAGE),
        "enable" => Command::Toggle {
            capability: rest,
            enabled: true,
        },
        "disable" => Command::Toggle {
            capability: rest,
            enabled: false,
        },
        "reset" if rest.is_empty() => Command::Usage(RESET_USAGE),
        "reset" => Command::Reset(rest),
        // `<field>` alone reads it, `<field> <value>` writes it.
        _ if rest.is_empty() => Command::Get(head),
        _ => Command::Set {
            field: head,
            value: rest,
        },
    }
}

/// Other prefix fields that now hold the same string as `field`.
fn prefix_clashes(cfg: &Configuration, field: ConfigField) -> Vec<ConfigField> {
    const PREFIXES: [ConfigField; 3] = [
        ConfigField::GptPrefix,
        ConfigField::DallePrefix,
        ConfigField::ConfigPrefix,
    ];
    if !PREFIXES.contains(&field) {
        return Vec::new();
    }
    let value = cfg.value(field);
    PREFIXES
        .into_iter()
        .filter(|&other| other != field && cfg.value(other) == value)
        .collect()
}

async fn render_list(ctx: &PluginContext) -> String {
    let cfg = ctx.config.get().await;
    let mut rows = vec!["config:".to_owned()];
    for field in ConfigField::ALL {
        rows.push(format!("- {field}: {}", cfg.value(field)));
    }
    rows.push("capabilities:".to_owned());
    for capability in Capability::ALL {
        let state = if ctx.registry.is_enabled(capability).await {
            "enabled"
        } else {
            "disabled"
        };
        rows.push(format!("- {capability}: {state}"));
    }
    rows.join("\n")
}

fn render_help(prefix: &str) -> String {
    let fields = ConfigField::ALL.map(ConfigField::name).join(", ");
    [
        format!("{prefix} [list] - show current settings"),
        format!("{prefix} {GET_USAGE} - show one setting"),
        format!("{prefix} {SET_USAGE} - change a setting (or: {prefix} <field> <value>)"),
        format!("{prefix} {TOGGLE_USAGE} - switch a capability on or off"),
        format!("{prefix} {RESET_USAGE} - go back to the configured on/off state"),
        format!("fields: {fields}"),
    ]
    .join("\n")
}

/// Accepts `<field> <value>` and the two-word form `<target> <setting> <value>`
/// (e.g. `dalle size 512x512`, `tts enabled true`), which maps onto `<target>_<setting>`.
/// The two-word reading wins whenever `<target>_<setting>` names a field, even if
/// `<target>` alone is an alias too.
fn resolve_field<'a>(field: &str, value: &'a str) -> Result<(ConfigField, &'a str), ConfigError> {
    let (setting, rest) = split_head(value);
    if !rest.is_empty()
        && let Ok(joined) = format!("{field}_{setting}").parse::<ConfigField>()
    {
        return Ok((joined, rest));
    }
    field.parse().map(|f| (f, value))
}

async fn set_field(ctx: &PluginContext, field: &str, value: &str) -> String {
    let (field, value) = match resolve_field(field, value) {
        Ok(pair) => pair,
        Err(e) => return format!("config not changed: {e}"),
    };
    let outcome = ctx
        .config
        .update(|cfg| {
            cfg.apply(field, value)
                .map(|()| (cfg.value(field), prefix_clashes(cfg, field)))
        })
        .await;
    match outcome {
        Ok((stored, clashes)) => {
            info!(sender = %ctx.sender, field = %field, value = %stored, "Configuration updated");
            let mut reply = format!("{field} set to {stored}");
            for other in clashes {
                reply.push_str(&format!(
                    "\nwarning: {other} is also {stored}; the first of gpt, dalle, config wins"
                ));
            }
            reply
        }
        Err(e) => format!("config not changed: {e}"),
    }
}

async fn toggle(ctx: &PluginContext, capability: &str, enabled: bool) -> String {
    let Some(capability) = Capability::from_id(capability) else {
        return format!("unknown capability: {capability} (expected gpt or dalle)");
    };
    if capability == Capability::Config && !enabled {
        return "the config capability cannot be disabled".to_owned();
    }
    ctx.registry.set_override(capability, enabled).await;
    info!(sender = %ctx.sender, capability = %capability, enabled, "Capability override set");
    let verb = if enabled { "enabled" } else { "disabled" };
    format!("{verb} capability: {capability}")
}

async fn reset(ctx: &PluginContext, capability: &str) -> String {
    let Some(capability) = Capability::from_id(capability) else {
        return format!("unknown capability: {capability} (expected gpt or dalle)");
    };
    ctx.registry.clear_override(capability).await;
    let state = if ctx.registry.is_enabled(capability).await {
        "enabled"
    } else {
        "disabled"
    };
    info!(sender = %ctx.sender, capability = %capability, "Capability override cleared");
    format!("reset capability: {capability} ({state})")
}

#[async_trait]
impl Plugin for ConfigTool {
    fn id(&self) -> &'static str {
        "config"
    }
    fn help(&self) -> &'static str {
        "Inspect or change settings: <config prefix> list | get <field> | set <field> <value> | reset <capability>"
    }
    fn capability(&self) -> Capability {
        Capability::Config
    }

    async fn run(&self, ctx: &PluginContext, args: &str, _spec: &PluginSpec) -> Result<()> {
        let reply = match parse(args) {
            Command::List => render_list(ctx).await,
            Command::Help => render_help(&ctx.config.get().await.config_prefix),
            Command::Get(field) => match field.parse::<ConfigField>() {
                Ok(f) => format!("{f}: {}", ctx.config.get().await.value(f)),
                Err(e) => e.to_string(),
            },
            Command::Set { field, value } => set_field(ctx, field, value).await,
            Command::Toggle {
                capability,
                enabled,
            } => toggle(ctx, capability, enabled).await,
            Command::Reset(capability) => reset(ctx, capability).await,
            Command::Usage(usage) => {
                let prefix = ctx.config.get().await.config_prefix;
                format!("Usage: {prefix} {usage}")
            }
        };
        send_text(ctx, reply).await
    }
}

//! Startup settings as they arrive from the environment.

use crate::config::{
    Configuration, DEFAULT_CONFIG_PREFIX, DEFAULT_DALLE_PREFIX, DEFAULT_GPT_PREFIX,
};

pub const PREFIX_ENABLED: &str = "PREFIX_ENABLED";
pub const GPT_PREFIX: &str = "GPT_PREFIX";
pub const DALLE_PREFIX: &str = "DALLE_PREFIX";
pub const AI_CONFIG_PREFIX: &str = "AI_CONFIG_PREFIX";
pub const REPLY_SELF: &str = "REPLY_SELF";
pub const TTS_ENABLED: &str = "TTS_ENABLED";
pub const TRANSCRIPTION_ENABLED: &str = "TRANSCRIPTION_ENABLED";

/// Unparsed values; `None` means the variable was not set.
#[derive(Debug, Clone, Default)]
pub struct RawSettings {
    pub prefix_enabled: Option<String>,
    pub gpt_prefix: Option<String>,
    pub dalle_prefix: Option<String>,
    pub config_prefix: Option<String>,
    pub reply_self: Option<String>,
    pub tts_enabled: Option<String>,
    pub transcription_enabled: Option<String>,
}

impl RawSettings {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            prefix_enabled: lookup(PREFIX_ENABLED),
            gpt_prefix: lookup(GPT_PREFIX),
            dalle_prefix: lookup(DALLE_PREFIX),
            config_prefix: lookup(AI_CONFIG_PREFIX),
            reply_self: lookup(REPLY_SELF),
            tts_enabled: lookup(TTS_ENABLED),
            transcription_enabled: lookup(TRANSCRIPTION_ENABLED),
        }
    }

    #[must_use]
    pub fn resolve(&self) -> Configuration {
        let defaults = Configuration::default();
        Configuration {
            prefix_enabled: flag(self.prefix_enabled.as_deref(), defaults.prefix_enabled),
            gpt_prefix: text_or(self.gpt_prefix.as_deref(), DEFAULT_GPT_PREFIX),
            dalle_prefix: text_or(self.dalle_prefix.as_deref(), DEFAULT_DALLE_PREFIX),
            config_prefix: text_or(self.config_prefix.as_deref(), DEFAULT_CONFIG_PREFIX),
            reply_self: flag(self.reply_self.as_deref(), defaults.reply_self),
            tts_enabled: flag(self.tts_enabled.as_deref(), defaults.tts_enabled),
            transcription_enabled: flag(
                self.transcription_enabled.as_deref(),
                defaults.transcription_enabled,
            ),
            image_size: defaults.image_size,
        }
    }
}

/// Only the literal `"true"` is true; unset or empty falls back to `default`.
#[must_use]
pub fn flag(raw: Option<&str>, default: bool) -> bool {
    match raw {
        None | Some("") => default,
        Some(v) => v == "true",
    }
}

#[must_use]
pub fn text_or(raw: Option<&str>, default: &str) -> String {
    raw.filter(|v| !v.is_empty()).unwrap_or(default).to_owned()
}

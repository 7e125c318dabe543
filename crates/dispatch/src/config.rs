use core::{fmt, str::FromStr};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

pub const DEFAULT_GPT_PREFIX: &str = "!gpt";
pub const DEFAULT_DALLE_PREFIX: &str = "!dalle";
pub const DEFAULT_CONFIG_PREFIX: &str = "!config";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown config field: {0}")]
    UnknownField(String),
    #[error("invalid value for {field}: expected true or false, got {value:?}")]
    InvalidBool { field: &'static str, value: String },
    #[error("{0} must not be empty")]
    EmptyPrefix(&'static str),
    #[error("invalid image size {0:?}: expected 256x256, 512x512 or 1024x1024")]
    InvalidImageSize(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageSize {
    Small,
    #[default]
    Medium,
    Large,
}

impl ImageSize {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Small => "256x256",
            Self::Medium => "512x512",
            Self::Large => "1024x1024",
        }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageSize {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "256x256" | "256" => Ok(Self::Small),
            "512x512" | "512" => Ok(Self::Medium),
            "1024x1024" | "1024" => Ok(Self::Large),
            _ => Err(ConfigError::InvalidImageSize(s.to_owned())),
        }
    }
}

/// Runtime settings read by the filter and the dispatcher.
///
/// Prefixes are not required to be prefix-free with respect to each other:
/// if two of them collide, the dispatcher's fixed priority order decides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub prefix_enabled: bool,
    pub gpt_prefix: String,
    pub dalle_prefix: String,
    pub config_prefix: String,
    pub reply_self: bool,
    pub tts_enabled: bool,
    pub transcription_enabled: bool,
    pub image_size: ImageSize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            prefix_enabled: true,
            gpt_prefix: DEFAULT_GPT_PREFIX.to_owned(),
            dalle_prefix: DEFAULT_DALLE_PREFIX.to_owned(),
            config_prefix: DEFAULT_CONFIG_PREFIX.to_owned(),
            reply_self: false,
            tts_enabled: false,
            transcription_enabled: false,
            image_size: ImageSize::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigField {
    PrefixEnabled,
    GptPrefix,
    DallePrefix,
    ConfigPrefix,
    ReplySelf,
    TtsEnabled,
    TranscriptionEnabled,
    ImageSize,
}

impl ConfigField {
    pub const ALL: [Self; 8] = [
        Self::PrefixEnabled,
        Self::GptPrefix,
        Self::DallePrefix,
        Self::ConfigPrefix,
        Self::ReplySelf,
        Self::TtsEnabled,
        Self::TranscriptionEnabled,
        Self::ImageSize,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PrefixEnabled => "prefix_enabled",
            Self::GptPrefix => "gpt_prefix",
            Self::DallePrefix => "dalle_prefix",
            Self::ConfigPrefix => "config_prefix",
            Self::ReplySelf => "reply_self",
            Self::TtsEnabled => "tts_enabled",
            Self::TranscriptionEnabled => "transcription_enabled",
            Self::ImageSize => "image_size",
        }
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConfigField {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        let field = match key.as_str() {
            "prefix_enabled" | "prefix" => Self::PrefixEnabled,
            "gpt_prefix" => Self::GptPrefix,
            "dalle_prefix" => Self::DallePrefix,
            "config_prefix" | "ai_config_prefix" => Self::ConfigPrefix,
            "reply_self" => Self::ReplySelf,
            "tts_enabled" | "tts" => Self::TtsEnabled,
            "transcription_enabled" | "transcription" => Self::TranscriptionEnabled,
            "image_size" | "dalle_size" | "size" => Self::ImageSize,
            _ => return Err(ConfigError::UnknownField(s.trim().to_owned())),
        };
        Ok(field)
    }
}

impl Configuration {
    /// Current value of `field`, rendered the way `apply` accepts it back.
    #[must_use]
    pub fn value(&self, field: ConfigField) -> String {
        match field {
            ConfigField::PrefixEnabled => self.prefix_enabled.to_string(),
            ConfigField::GptPrefix => self.gpt_prefix.clone(),
            ConfigField::DallePrefix => self.dalle_prefix.clone(),
            ConfigField::ConfigPrefix => self.config_prefix.clone(),
            ConfigField::ReplySelf => self.reply_self.to_string(),
            ConfigField::TtsEnabled => self.tts_enabled.to_string(),
            ConfigField::TranscriptionEnabled => self.transcription_enabled.to_string(),
            ConfigField::ImageSize => self.image_size.to_string(),
        }
    }

    /// Parse `raw` for `field` and assign it. Nothing is written unless parsing succeeds.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when `raw` is not a valid value for `field`.
    pub fn apply(&mut self, field: ConfigField, raw: &str) -> Result<(), ConfigError> {
        let raw = raw.trim();
        match field {
            ConfigField::PrefixEnabled => self.prefix_enabled = parse_bool(field, raw)?,
            ConfigField::GptPrefix => self.gpt_prefix = parse_prefix(field, raw)?,
            ConfigField::DallePrefix => self.dalle_prefix = parse_prefix(field, raw)?,
            ConfigField::ConfigPrefix => self.config_prefix = parse_prefix(field, raw)?,
            ConfigField::ReplySelf => self.reply_self = parse_bool(field, raw)?,
            ConfigField::TtsEnabled => self.tts_enabled = parse_bool(field, raw)?,
            ConfigField::TranscriptionEnabled => {
                self.transcription_enabled = parse_bool(field, raw)?;
            }
            ConfigField::ImageSize => self.image_size = raw.parse()?,
        }
        Ok(())
    }
}

fn parse_bool(field: ConfigField, raw: &str) -> Result<bool, ConfigError> {
    if raw.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(ConfigError::InvalidBool {
            field: field.name(),
            value: raw.to_owned(),
        })
    }
}

fn parse_prefix(field: ConfigField, raw: &str) -> Result<String, ConfigError> {
    if raw.is_empty() {
        return Err(ConfigError::EmptyPrefix(field.name()));
    }
    Ok(raw.to_owned())
}

/// Shared handle to the process-wide [`Configuration`].
///
/// Every mutation happens under the write lock, so a reader never observes a
/// half-applied update.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    inner: Arc<RwLock<Configuration>>,
}

impl ConfigStore {
    #[must_use]
    pub fn new(config: Configuration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub async fn get(&self) -> Configuration {
        self.inner.read().await.clone()
    }

    /// Set a single field from its textual form and return the stored value.
    ///
    /// # Errors
    ///
    /// Propagates the [`ConfigError`] from [`Configuration::apply`]; the store is left untouched.
    pub async fn set(&self, field: ConfigField, raw: &str) -> Result<String, ConfigError> {
        let mut guard = self.inner.write().await;
        guard.apply(field, raw)?;
        Ok(guard.value(field))
    }

    pub async fn update<R>(&self, f: impl FnOnce(&mut Configuration) -> R) -> R {
        let mut guard = self.inner.write().await;
        f(&mut guard)
    }
}

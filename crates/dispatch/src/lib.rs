pub mod config;
pub mod env;
pub mod filter;
pub mod message;
pub mod prefix;

use core::fmt;

pub use config::{ConfigError, ConfigField, ConfigStore, Configuration, ImageSize};
pub use filter::{Ineligible, is_eligible};
pub use message::{BROADCAST_SENDER, InboundMessage};

use crate::prefix::CaseMode;

/// The three things a message can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Text,
    Image,
    Config,
}

impl Capability {
    pub const ALL: [Self; 3] = [Self::Text, Self::Image, Self::Config];

    /// Plugin id serving this capability.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::Text => "gpt",
            Self::Image => "dalle",
            Self::Config => "config",
        }
    }

    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.id().eq_ignore_ascii_case(id.trim()))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    TextGeneration(String),
    ImageGeneration(String),
    ConfigUpdate(String),
    NoMatch,
}

impl Decision {
    fn new(capability: Capability, argument: &str) -> Self {
        let argument = argument.to_owned();
        match capability {
            Capability::Text => Self::TextGeneration(argument),
            Capability::Image => Self::ImageGeneration(argument),
            Capability::Config => Self::ConfigUpdate(argument),
        }
    }

    #[must_use]
    pub const fn capability(&self) -> Option<Capability> {
        match self {
            Self::TextGeneration(_) => Some(Capability::Text),
            Self::ImageGeneration(_) => Some(Capability::Image),
            Self::ConfigUpdate(_) => Some(Capability::Config),
            Self::NoMatch => None,
        }
    }

    #[must_use]
    pub fn into_parts(self) -> Option<(Capability, String)> {
        match self {
            Self::TextGeneration(arg) => Some((Capability::Text, arg)),
            Self::ImageGeneration(arg) => Some((Capability::Image, arg)),
            Self::ConfigUpdate(arg) => Some((Capability::Config, arg)),
            Self::NoMatch => None,
        }
    }
}

/// Pick the capability for an eligible message.
///
/// With prefix routing off, the whole body is a text prompt. Otherwise the
/// prefixes are tried in a fixed order (text, image, config) and the first
/// match wins, so two identical prefixes always resolve to the earlier one.
/// Text and image prefixes ignore case; the config prefix does not.
#[must_use]
pub fn dispatch(message: &InboundMessage, config: &Configuration) -> Decision {
    let body = message.body.as_str();
    if !config.prefix_enabled {
        return Decision::TextGeneration(body.to_owned());
    }

    let routes = [
        (config.gpt_prefix.as_str(), CaseMode::Insensitive, Capability::Text),
        (config.dalle_prefix.as_str(), CaseMode::Insensitive, Capability::Image),
        (config.config_prefix.as_str(), CaseMode::Sensitive, Capability::Config),
    ];
    routes
        .into_iter()
        .find_map(|(prefix, case, capability)| {
            prefix::argument(body, prefix, case).map(|arg| Decision::new(capability, arg))
        })
        .unwrap_or(Decision::NoMatch)
}

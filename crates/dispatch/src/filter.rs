use crate::{
    config::Configuration,
    message::{BROADCAST_SENDER, InboundMessage},
};

/// Why a message was dropped before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    Broadcast,
    EmptyBody,
    Media,
    QuotedReply,
    OwnMessage,
}

impl Ineligible {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::EmptyBody => "empty-body",
            Self::Media => "media",
            Self::QuotedReply => "quoted-reply",
            Self::OwnMessage => "own-message",
        }
    }
}

/// Check every exclusion in order and report the first that applies.
///
/// # Errors
///
/// Returns the [`Ineligible`] reason when the message must not be dispatched.
pub fn check(message: &InboundMessage, config: &Configuration) -> Result<(), Ineligible> {
    if message.is_from_broadcast_channel || message.sender_id == BROADCAST_SENDER {
        return Err(Ineligible::Broadcast);
    }
    if message.body.is_empty() {
        return Err(Ineligible::EmptyBody);
    }
    if message.has_media {
        return Err(Ineligible::Media);
    }
    // Catches our own replies being quoted back at us.
    if message.has_quoted_message {
        return Err(Ineligible::QuotedReply);
    }
    if message.is_from_self && !config.reply_self {
        return Err(Ineligible::OwnMessage);
    }
    Ok(())
}

#[must_use]
pub fn is_eligible(message: &InboundMessage, config: &Configuration) -> bool {
    check(message, config).is_ok()
}

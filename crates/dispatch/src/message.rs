/// Sender id the transport uses for status/broadcast posts.
pub const BROADCAST_SENDER: &str = "status@broadcast";

/// Transport-neutral view of one inbound chat event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InboundMessage {
    pub body: String,
    pub sender_id: String,
    pub is_from_broadcast_channel: bool,
    pub is_from_self: bool,
    pub has_quoted_message: bool,
    pub has_media: bool,
}

impl InboundMessage {
    pub fn text(sender_id: impl Into<String>, body: impl Into<String>) -> Self {
        let sender_id = sender_id.into();
        Self {
            is_from_broadcast_channel: sender_id == BROADCAST_SENDER,
            body: body.into(),
            sender_id,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn from_self(mut self, yes: bool) -> Self {
        self.is_from_self = yes;
        self
    }

    #[must_use]
    pub fn quoted(mut self, yes: bool) -> Self {
        self.has_quoted_message = yes;
        self
    }

    #[must_use]
    pub fn with_media(mut self, yes: bool) -> Self {
        self.has_media = yes;
        self
    }
}

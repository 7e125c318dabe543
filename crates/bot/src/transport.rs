//! Matrix side of the bot: event conversion and the outbound sink.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use dispatch::InboundMessage;
use matrix_sdk::{
    attachment::AttachmentConfig,
    room::Room,
    ruma::{
        UserId,
        events::room::message::{
            MessageType, OriginalSyncRoomMessageEvent, Relation, RoomMessageEventContent,
        },
    },
};
use plugin_core::{Reply, ReplySink, truncate};

/// Build the transport-neutral view of a room message.
///
/// Returns `None` for message types that carry nothing the bot could read
/// (locations, verification requests, emotes).
pub fn inbound_from_event(ev: &OriginalSyncRoomMessageEvent, own_id: &UserId) -> Option<InboundMessage> {
    let (body, has_media, is_broadcast) = match &ev.content.msgtype {
        MessageType::Text(t) => (t.body.clone(), false, false),
        MessageType::Notice(n) => (n.body.clone(), false, false),
        MessageType::ServerNotice(n) => (n.body.clone(), false, true),
        MessageType::Image(i) => (i.body.clone(), true, false),
        MessageType::File(f) => (f.body.clone(), true, false),
        MessageType::Audio(a) => (a.body.clone(), true, false),
        MessageType::Video(v) => (v.body.clone(), true, false),
        MessageType::Emote(_) | MessageType::Location(_) | MessageType::VerificationRequest(_) | _ => {
            return None;
        }
    };
    Some(InboundMessage {
        body,
        sender_id: ev.sender.to_string(),
        is_from_broadcast_channel: is_broadcast,
        is_from_self: ev.sender.as_str() == own_id.as_str(),
        has_quoted_message: matches!(ev.content.relates_to, Some(Relation::Reply { .. })),
        has_media,
    })
}

#[derive(Debug, Clone)]
pub struct RoomSink {
    room: Room,
}

impl RoomSink {
    pub const fn new(room: Room) -> Self {
        Self { room }
    }
}

#[async_trait]
impl ReplySink for RoomSink {
    async fn send(&self, reply: Reply) -> Result<()> {
        match reply {
            Reply::Text(text) => {
                self.room
                    .send(RoomMessageEventContent::text_plain(text))
                    .await
                    .context("sending text reply")?;
            }
            Reply::Image {
                caption,
                mime,
                data,
            } => {
                let filename = format!("{}.{}", attachment_stem(&caption), mime.subtype());
                self.room
                    .send_attachment(&filename, &mime, data, AttachmentConfig::new())
                    .await
                    .context("sending image reply")?;
            }
        }
        Ok(())
    }
}

fn attachment_stem(caption: &str) -> String {
    let stem: String = truncate(caption.trim(), 60)
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if stem.is_empty() { "image".to_owned() } else { stem }
}

#[cfg(test)]
mod tests {
    use matrix_sdk::ruma::OwnedUserId;
    use serde_json::json;

    use super::*;

    fn event(sender: &str, content: serde_json::Value) -> OriginalSyncRoomMessageEvent {
        serde_json::from_value(json!({
            "type": "m.room.message",
            "event_id": "$event:example.org",
            "sender": sender,
            "origin_server_ts": 1_700_000_000_000_u64,
            "content": content,
        }))
        .unwrap()
    }

    fn bot() -> OwnedUserId {
        UserId::parse("@bot:example.org").unwrap()
    }

    #[test]
    fn text_message_maps_to_plain_inbound() {
        let ev = event("@alice:example.org", json!({"msgtype": "m.text", "body": "!gpt hi"}));
        let msg = inbound_from_event(&ev, &bot()).unwrap();
        assert_eq!(msg.body, "!gpt hi");
        assert_eq!(msg.sender_id, "@alice:example.org");
        assert!(!msg.is_from_self);
        assert!(!msg.has_media);
        assert!(!msg.has_quoted_message);
        assert!(!msg.is_from_broadcast_channel);
    }

    #[test]
    fn own_sender_is_flagged() {
        let ev = event("@bot:example.org", json!({"msgtype": "m.text", "body": "!gpt hi"}));
        assert!(inbound_from_event(&ev, &bot()).unwrap().is_from_self);
    }

    #[test]
    fn reply_relation_marks_quoted() {
        let ev = event(
            "@alice:example.org",
            json!({
                "msgtype": "m.text",
                "body": "> <@bot:example.org> old\n\n!gpt again",
                "m.relates_to": {"m.in_reply_to": {"event_id": "$old:example.org"}}
            }),
        );
        assert!(inbound_from_event(&ev, &bot()).unwrap().has_quoted_message);
    }

    #[test]
    fn image_marks_media() {
        let ev = event(
            "@alice:example.org",
            json!({"msgtype": "m.image", "body": "cat.png", "url": "mxc://example.org/abc"}),
        );
        let msg = inbound_from_event(&ev, &bot()).unwrap();
        assert!(msg.has_media);
        assert_eq!(msg.body, "cat.png");
    }

    #[test]
    fn emote_and_location_are_ignored() {
        let emote = event("@alice:example.org", json!({"msgtype": "m.emote", "body": "!gpt waves"}));
        assert_eq!(inbound_from_event(&emote, &bot()), None);
        let location = event(
            "@alice:example.org",
            json!({"msgtype": "m.location", "body": "home", "geo_uri": "geo:51.5,-0.1"}),
        );
        assert_eq!(inbound_from_event(&location, &bot()), None);
    }

    #[test]
    fn server_notice_counts_as_broadcast() {
        let ev = event(
            "@server:example.org",
            json!({"msgtype": "m.server_notice", "body": "maintenance", "server_notice_type": "m.server_notice.usage_limit_reached"}),
        );
        assert!(inbound_from_event(&ev, &bot()).unwrap().is_from_broadcast_channel);
    }

    #[test]
    fn attachment_names_are_filesystem_safe() {
        assert_eq!(attachment_stem("a red fox!"), "a_red_fox_");
        assert_eq!(attachment_stem("   "), "image");
    }
}

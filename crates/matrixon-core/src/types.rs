//! Core types for Matrixon
//!
//! Room events as they flow through the sync cache. Every event kind shares
//! one header (id, room, sender, timestamp); the payload is a closed set of
//! variants so read paths can match on kind instead of inspecting types at
//! run time.

use ruma::{
    events::{room::member::MembershipState, TimelineEventType},
    EventId, MilliSecondsSinceUnixEpoch, OwnedEventId, OwnedRoomId, OwnedServerName,
    OwnedUserId, RoomId, UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Payload of a room event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventContent {
    /// `m.room.message`
    Message { msgtype: String, body: String },
    /// `m.room.encrypted`
    Encrypted { algorithm: String, ciphertext: String },
    /// `m.room.create`
    Create { creator: OwnedUserId },
    /// `m.room.member`
    Member {
        state_key: OwnedUserId,
        membership: MembershipState,
    },
    /// Any other state event.
    State {
        event_type: String,
        state_key: String,
        content: JsonValue,
    },
    /// Any other timeline event.
    Other { event_type: String, content: JsonValue },
}

impl EventContent {
    pub fn event_type(&self) -> TimelineEventType {
        match self {
            Self::Message { .. } => TimelineEventType::RoomMessage,
            Self::Encrypted { .. } => TimelineEventType::RoomEncrypted,
            Self::Create { .. } => TimelineEventType::RoomCreate,
            Self::Member { .. } => TimelineEventType::RoomMember,
            Self::State { event_type, .. } | Self::Other { event_type, .. } => {
                TimelineEventType::from(event_type.as_str())
            }
        }
    }

    /// State key for state events, `None` for plain timeline events.
    pub fn state_key(&self) -> Option<&str> {
        match self {
            Self::Create { .. } => Some(""),
            Self::Member { state_key, .. } => Some(state_key.as_str()),
            Self::State { state_key, .. } => Some(state_key.as_str()),
            Self::Message { .. } | Self::Encrypted { .. } | Self::Other { .. } => None,
        }
    }
}

/// A client-visible room event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEvent {
    pub event_id: OwnedEventId,
    pub room_id: OwnedRoomId,
    pub sender: OwnedUserId,
    pub origin_server_ts: MilliSecondsSinceUnixEpoch,
    pub content: EventContent,
}

impl ClientEvent {
    /// Build an event stamped with the current time.
    pub fn new(
        event_id: OwnedEventId,
        room_id: OwnedRoomId,
        sender: OwnedUserId,
        content: EventContent,
    ) -> Self {
        Self {
            event_id,
            room_id,
            sender,
            origin_server_ts: MilliSecondsSinceUnixEpoch::now(),
            content,
        }
    }

    pub fn event_type(&self) -> TimelineEventType {
        self.content.event_type()
    }

    pub fn state_key(&self) -> Option<&str> {
        self.content.state_key()
    }

    /// Message-like events are what clients show as a room's last message.
    pub fn is_message(&self) -> bool {
        matches!(
            self.event_type(),
            TimelineEventType::RoomMessage | TimelineEventType::RoomEncrypted
        )
    }

    pub fn is_create(&self) -> bool {
        matches!(self.event_type(), TimelineEventType::RoomCreate)
    }
}

/// An event plus the stream position assigned to it at ingestion.
///
/// Immutable once built; timelines and readers share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub offset: i64,
    pub event: ClientEvent,
}

impl StreamEvent {
    pub fn new(event: ClientEvent, offset: i64) -> Self {
        Self { offset, event }
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn event_id(&self) -> &EventId {
        &self.event.event_id
    }

    pub fn room_id(&self) -> &RoomId {
        &self.event.room_id
    }

    pub fn sender(&self) -> &UserId {
        &self.event.sender
    }
}

/// One `(room, origin server, max offset)` row from the room server tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomDomainOffset {
    pub room_id: OwnedRoomId,
    pub domain: OwnedServerName,
    pub offset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruma::{event_id, room_id, user_id};
    use serde_json::json;

    fn event(content: EventContent) -> ClientEvent {
        ClientEvent::new(
            event_id!("$e1").to_owned(),
            room_id!("!r1:example.org").to_owned(),
            user_id!("@alice:example.org").to_owned(),
            content,
        )
    }

    #[test]
    fn test_event_type_mapping() {
        let msg = event(EventContent::Message {
            msgtype: "m.text".into(),
            body: "hi".into(),
        });
        assert_eq!(msg.event_type(), TimelineEventType::RoomMessage);
        assert!(msg.is_message());
        assert!(!msg.is_create());
        assert_eq!(msg.state_key(), None);

        let topic = event(EventContent::State {
            event_type: "m.room.topic".into(),
            state_key: String::new(),
            content: json!({ "topic": "rust" }),
        });
        assert_eq!(topic.event_type(), TimelineEventType::RoomTopic);
        assert_eq!(topic.state_key(), Some(""));
        assert!(!topic.is_message());
    }

    #[test]
    fn test_encrypted_counts_as_message() {
        let enc = event(EventContent::Encrypted {
            algorithm: "m.megolm.v1.aes-sha2".into(),
            ciphertext: "AwgAEn".into(),
        });
        assert!(enc.is_message());
        assert_eq!(enc.event_type(), TimelineEventType::RoomEncrypted);
    }

    #[test]
    fn test_kind_checks_follow_string_typed_payloads() {
        let enc = event(EventContent::Other {
            event_type: "m.room.encrypted".into(),
            content: json!({ "algorithm": "m.megolm.v1.aes-sha2" }),
        });
        assert!(enc.is_message());

        let msg = event(EventContent::Other {
            event_type: "m.room.message".into(),
            content: json!({ "body": "hi" }),
        });
        assert!(msg.is_message());

        let create = event(EventContent::State {
            event_type: "m.room.create".into(),
            state_key: String::new(),
            content: json!({ "creator": "@alice:example.org" }),
        });
        assert!(create.is_create());
        assert!(!create.is_message());

        let reaction = event(EventContent::Other {
            event_type: "m.reaction".into(),
            content: json!({}),
        });
        assert!(!reaction.is_message());
        assert!(!reaction.is_create());
    }

    #[test]
    fn test_member_state_key_is_target_user() {
        let member = event(EventContent::Member {
            state_key: user_id!("@bob:example.org").to_owned(),
            membership: MembershipState::Join,
        });
        assert_eq!(member.state_key(), Some("@bob:example.org"));
        assert_eq!(member.event_type(), TimelineEventType::RoomMember);
    }

    #[test]
    fn test_stream_event_header_accessors() {
        let create = event(EventContent::Create {
            creator: user_id!("@alice:example.org").to_owned(),
        });
        assert!(create.is_create());

        let sev = StreamEvent::new(create, 7);
        assert_eq!(sev.offset(), 7);
        assert_eq!(sev.event_id(), event_id!("$e1"));
        assert_eq!(sev.room_id(), room_id!("!r1:example.org"));
        assert_eq!(sev.sender(), user_id!("@alice:example.org"));
    }
}

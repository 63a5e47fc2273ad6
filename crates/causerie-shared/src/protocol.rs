use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Conversation, DeliveryRecord, MemberPermission, Message, MuteSetting};
use crate::types::{ConversationId, DeliveryState, MessageId, UserId};

/// Events emitted by the engine after a mutation commits.
///
/// Consumed by the push-notification gateway and by the real-time transport
/// that fans messages out to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A message was appended and its delivery records seeded.
    MessageCreated {
        conversation_id: ConversationId,
        message_id: MessageId,
        sequence: u64,
        author_id: UserId,
        recipient_ids: Vec<UserId>,
        mentions: Vec<UserId>,
    },

    MessageEdited {
        conversation_id: ConversationId,
        message_id: MessageId,
        sequence: u64,
    },

    /// A message became a tombstone.
    MessageDeleted {
        conversation_id: ConversationId,
        message_id: MessageId,
        sequence: u64,
    },

    /// A recipient's delivery state moved forward.
    ReceiptAdvanced {
        conversation_id: ConversationId,
        message_id: MessageId,
        recipient_id: UserId,
        state: DeliveryState,
    },

    /// Membership, roles, permissions or settings changed.
    MembershipChanged { conversation_id: ConversationId },

    /// The conversation and all of its history were purged.
    ConversationDeleted { conversation_id: ConversationId },
}

impl EngineEvent {
    pub fn conversation_id(&self) -> ConversationId {
        match self {
            Self::MessageCreated { conversation_id, .. }
            | Self::MessageEdited { conversation_id, .. }
            | Self::MessageDeleted { conversation_id, .. }
            | Self::ReceiptAdvanced { conversation_id, .. }
            | Self::MembershipChanged { conversation_id }
            | Self::ConversationDeleted { conversation_id } => *conversation_id,
        }
    }
}

/// Ephemeral presence signal. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresenceEvent {
    Typing {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
        at: DateTime<Utc>,
    },
    Online {
        conversation_id: ConversationId,
        user_id: UserId,
        online: bool,
        at: DateTime<Utc>,
    },
}

impl PresenceEvent {
    pub fn user_id(&self) -> UserId {
        match self {
            Self::Typing { user_id, .. } | Self::Online { user_id, .. } => *user_id,
        }
    }
}

/// A committed record handed to the write-behind persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JournalRecord {
    /// Full conversation state (members and settings) plus its overrides.
    Conversation {
        conversation: Conversation,
        permissions: Vec<MemberPermission>,
    },
    ConversationDeleted(ConversationId),
    Message(Message),
    Delivery(DeliveryRecord),
    Mute(MuteSetting),
}

/// Everything needed to rebuild engine state at start-up.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub conversations: Vec<Conversation>,
    pub permissions: Vec<MemberPermission>,
    /// Ordered by conversation, then ascending sequence.
    pub messages: Vec<Message>,
    pub deliveries: Vec<DeliveryRecord>,
    pub mutes: Vec<MuteSetting>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_event_json_is_tagged() {
        let event = EngineEvent::MembershipChanged {
            conversation_id: ConversationId::new(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "membership_changed");

        let restored: EngineEvent = serde_json::from_value(json).unwrap();
        assert_eq!(restored, event);
    }

    #[test]
    fn presence_event_reports_user() {
        let user = UserId::new();
        let event = PresenceEvent::Typing {
            conversation_id: ConversationId::new(),
            user_id: user,
            is_typing: true,
            at: Utc::now(),
        };
        assert_eq!(event.user_id(), user);
    }
}

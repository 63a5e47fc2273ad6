//! Domain records shared by the engine, the store and the HTTP layer.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the transport layer or persisted as-is.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::permissions::PermissionOverrides;
use crate::types::{
    ConversationId, ConversationKind, DeliveryState, MediaKind, MessageId, MutePolicy, Privacy,
    Role, UserId,
};

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A participant of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub user_id: UserId,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

/// Conversation-level settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationSettings {
    pub privacy: Privacy,
    /// When false, replies are reserved to admins.
    pub comments_enabled: bool,
    pub default_mute: MutePolicy,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            privacy: Privacy::Private,
            comments_enabled: true,
            default_mute: MutePolicy::Notify,
        }
    }
}

/// A direct chat, group or broadcast channel.
///
/// `members` is kept in join order; the first entry is the earliest-joined
/// participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub members: Vec<Member>,
    pub settings: ConversationSettings,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn member(&self, user: UserId) -> Option<&Member> {
        self.members.iter().find(|m| m.user_id == user)
    }

    pub fn is_member(&self, user: UserId) -> bool {
        self.member(user).is_some()
    }

    pub fn member_ids(&self) -> Vec<UserId> {
        self.members.iter().map(|m| m.user_id).collect()
    }

    pub fn admin_count(&self) -> usize {
        self.members.iter().filter(|m| m.role.is_admin()).count()
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Reference to a media object held by the external media storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub size: u64,
    pub url: String,
    pub thumbnail_url: Option<String>,
}

/// Message body: text, media, or both.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageContent {
    pub text: Option<String>,
    pub media: Option<MediaRef>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            media: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.media.is_none() && self.text.as_deref().map_or(true, |t| t.trim().is_empty())
    }
}

/// A message in a conversation's ledger.
///
/// A soft-deleted message keeps its id and sequence but carries empty
/// content and no mentions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sequence: u64,
    pub author_id: UserId,
    pub content: MessageContent,
    pub replied_to: Option<MessageId>,
    pub mentions: BTreeSet<UserId>,
    pub is_forwarded: bool,
    pub is_edited: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Delivery state of one message for one recipient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub message_id: MessageId,
    pub recipient_id: UserId,
    pub state: DeliveryState,
    pub sent_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub seen_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Permissions and mutes
// ---------------------------------------------------------------------------

/// Explicit per-member permission overrides in a group or channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberPermission {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub overrides: PermissionOverrides,
}

/// Per-user, per-conversation notification mute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MuteSetting {
    pub user_id: UserId,
    pub conversation_id: ConversationId,
    pub muted: bool,
    /// `None` means until explicitly unmuted.
    pub mute_expires_at: Option<DateTime<Utc>>,
}

impl MuteSetting {
    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        self.muted && self.mute_expires_at.map_or(true, |expiry| expiry > at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn empty_content_detection() {
        assert!(MessageContent::default().is_empty());
        assert!(MessageContent::text("   ").is_empty());
        assert!(!MessageContent::text("hi").is_empty());

        let media_only = MessageContent {
            text: None,
            media: Some(MediaRef {
                kind: MediaKind::Image,
                size: 10,
                url: "https://cdn.example/a.png".into(),
                thumbnail_url: None,
            }),
        };
        assert!(!media_only.is_empty());
    }

    #[test]
    fn mute_activity_respects_expiry() {
        let now = Utc::now();
        let mut setting = MuteSetting {
            user_id: UserId::new(),
            conversation_id: ConversationId::new(),
            muted: true,
            mute_expires_at: Some(now + Duration::minutes(5)),
        };
        assert!(setting.is_active(now));
        assert!(!setting.is_active(now + Duration::minutes(5)));

        setting.mute_expires_at = None;
        assert!(setting.is_active(now + Duration::days(365)));

        setting.muted = false;
        assert!(!setting.is_active(now));
    }
}

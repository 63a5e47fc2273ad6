//! Records shared by the store tests.

use std::collections::BTreeSet;

use chrono::Utc;

use causerie_shared::{
    Conversation, ConversationId, ConversationKind, ConversationSettings, Member, Message,
    MessageContent, MessageId, Role, UserId,
};

pub(crate) fn sample_group(owner: UserId, others: &[UserId]) -> Conversation {
    let now = Utc::now();
    let mut members = vec![Member {
        user_id: owner,
        role: Role::Owner,
        joined_at: now,
    }];
    members.extend(others.iter().map(|user| Member {
        user_id: *user,
        role: Role::Member,
        joined_at: now,
    }));
    Conversation {
        id: ConversationId::new(),
        kind: ConversationKind::Group,
        name: Some("team".into()),
        members,
        settings: ConversationSettings::default(),
        created_at: now,
    }
}

pub(crate) fn sample_message(conversation: &Conversation, sequence: u64, author: UserId) -> Message {
    Message {
        id: MessageId::new(),
        conversation_id: conversation.id,
        sequence,
        author_id: author,
        content: MessageContent::text(format!("message {sequence}")),
        replied_to: None,
        mentions: BTreeSet::new(),
        is_forwarded: false,
        is_edited: false,
        is_deleted: false,
        created_at: Utc::now(),
        edited_at: None,
        deleted_at: None,
    }
}

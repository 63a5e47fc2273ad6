//! Loading the whole store and applying journal records.

use causerie_shared::protocol::{JournalRecord, Snapshot};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Everything the engine needs to rebuild its in-memory state.
    pub fn load_snapshot(&self) -> Result<Snapshot> {
        let snapshot = Snapshot {
            conversations: self.list_conversations()?,
            permissions: self.list_member_permissions()?,
            messages: self.list_messages()?,
            deliveries: self.list_deliveries()?,
            mutes: self.list_mutes()?,
        };
        tracing::info!(
            conversations = snapshot.conversations.len(),
            messages = snapshot.messages.len(),
            deliveries = snapshot.deliveries.len(),
            mutes = snapshot.mutes.len(),
            "loaded snapshot"
        );
        Ok(snapshot)
    }

    /// Persist one committed engine record.
    pub fn apply(&self, record: &JournalRecord) -> Result<()> {
        match record {
            JournalRecord::Conversation {
                conversation,
                permissions,
            } => self.upsert_conversation(conversation, permissions),
            JournalRecord::ConversationDeleted(id) => self.delete_conversation(*id).map(|_| ()),
            JournalRecord::Message(message) => self.upsert_message(message),
            JournalRecord::Delivery(record) => self.upsert_delivery(record),
            JournalRecord::Mute(setting) => self.upsert_mute(setting),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{sample_group, sample_message};
    use causerie_shared::{DeliveryRecord, DeliveryState, MuteSetting, UserId};

    #[test]
    fn applied_records_come_back_in_the_snapshot() {
        let db = Database::open_in_memory().unwrap();
        let (owner, reader) = (UserId::new(), UserId::new());
        let conv = sample_group(owner, &[reader]);
        let first = sample_message(&conv, 1, owner);
        let second = sample_message(&conv, 2, reader);

        let records = vec![
            JournalRecord::Conversation {
                conversation: conv.clone(),
                permissions: Vec::new(),
            },
            JournalRecord::Message(second.clone()),
            JournalRecord::Message(first.clone()),
            JournalRecord::Delivery(DeliveryRecord {
                message_id: first.id,
                recipient_id: reader,
                state: DeliveryState::Sent,
                sent_at: first.created_at,
                delivered_at: None,
                seen_at: None,
            }),
            JournalRecord::Mute(MuteSetting {
                user_id: reader,
                conversation_id: conv.id,
                muted: true,
                mute_expires_at: None,
            }),
        ];
        for record in &records {
            db.apply(record).unwrap();
        }

        let snapshot = db.load_snapshot().unwrap();
        assert_eq!(snapshot.conversations, vec![conv.clone()]);
        assert_eq!(snapshot.messages, vec![first, second]);
        assert_eq!(snapshot.deliveries.len(), 1);
        assert_eq!(snapshot.mutes.len(), 1);

        db.apply(&JournalRecord::ConversationDeleted(conv.id)).unwrap();
        let empty = db.load_snapshot().unwrap();
        assert!(empty.conversations.is_empty());
        assert!(empty.messages.is_empty());
        assert!(empty.deliveries.is_empty());
        assert!(empty.mutes.is_empty());
    }
}

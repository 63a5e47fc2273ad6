use std::collections::BTreeSet;

use rusqlite::params;

use causerie_shared::{ConversationId, Message, MessageContent, MessageId, UserId};

use crate::codec;
use crate::database::Database;
use crate::error::{not_found, Result};

const SELECT_MESSAGE: &str = "SELECT id, conversation_id, sequence, author_id, content, replied_to,
        mentions, is_forwarded, is_edited, is_deleted, created_at, edited_at, deleted_at
     FROM messages";

impl Database {
    /// Insert a message, or overwrite the mutable columns of an existing
    /// one after an edit or delete.
    pub fn upsert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, conversation_id, sequence, author_id, content, replied_to,
                mentions, is_forwarded, is_edited, is_deleted, created_at, edited_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                mentions = excluded.mentions,
                is_edited = excluded.is_edited,
                is_deleted = excluded.is_deleted,
                edited_at = excluded.edited_at,
                deleted_at = excluded.deleted_at",
            params![
                message.id.to_string(),
                message.conversation_id.to_string(),
                message.sequence as i64,
                message.author_id.to_string(),
                serde_json::to_string(&message.content)?,
                message.replied_to.map(|id| id.to_string()),
                serde_json::to_string(&message.mentions)?,
                message.is_forwarded,
                message.is_edited,
                message.is_deleted,
                message.created_at.to_rfc3339(),
                message.edited_at.map(|t| t.to_rfc3339()),
                message.deleted_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn get_message_by_id(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("{SELECT_MESSAGE} WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found)
    }

    /// Messages of one conversation with a sequence above `after`,
    /// ascending.
    pub fn get_messages_for_conversation(
        &self,
        conversation: ConversationId,
        after: u64,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_MESSAGE} WHERE conversation_id = ?1 AND sequence > ?2
             ORDER BY sequence LIMIT ?3"
        ))?;
        let rows = stmt.query_map(
            params![conversation.to_string(), after as i64, limit],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Every message, grouped by conversation in ascending sequence.
    pub fn list_messages(&self) -> Result<Vec<Message>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("{SELECT_MESSAGE} ORDER BY conversation_id, sequence"))?;
        let rows = stmt.query_map([], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let conversation: String = row.get(1)?;
    let sequence: i64 = row.get(2)?;
    let author: String = row.get(3)?;
    let content: String = row.get(4)?;
    let replied_to: Option<String> = row.get(5)?;
    let mentions: String = row.get(6)?;
    let created_at: String = row.get(10)?;

    Ok(Message {
        id: MessageId(codec::uuid(0, &id)?),
        conversation_id: ConversationId(codec::uuid(1, &conversation)?),
        sequence: sequence as u64,
        author_id: UserId(codec::uuid(3, &author)?),
        content: codec::json::<MessageContent>(4, &content)?,
        replied_to: replied_to
            .map(|s| codec::uuid(5, &s).map(MessageId))
            .transpose()?,
        mentions: codec::json::<BTreeSet<UserId>>(6, &mentions)?,
        is_forwarded: row.get(7)?,
        is_edited: row.get(8)?,
        is_deleted: row.get(9)?,
        created_at: codec::timestamp(10, &created_at)?,
        edited_at: codec::opt_timestamp(11, row.get(11)?)?,
        deleted_at: codec::opt_timestamp(12, row.get(12)?)?,
    })
}

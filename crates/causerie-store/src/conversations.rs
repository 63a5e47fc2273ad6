use std::collections::HashMap;

use rusqlite::params;

use causerie_shared::permissions::PermissionOverrides;
use causerie_shared::{
    Conversation, ConversationId, ConversationKind, ConversationSettings, Member,
    MemberPermission, MutePolicy, Privacy, Role, UserId,
};

use crate::codec;
use crate::database::Database;
use crate::error::{not_found, Result};

const SELECT_CONVERSATION: &str =
    "SELECT id, kind, name, privacy, comments_enabled, default_mute, created_at
     FROM conversations";

impl Database {
    /// Insert or replace a conversation together with its roster and
    /// permission overrides.
    pub fn upsert_conversation(
        &self,
        conversation: &Conversation,
        permissions: &[MemberPermission],
    ) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;
        let id = conversation.id.to_string();

        tx.execute(
            "INSERT INTO conversations (id, kind, name, privacy, comments_enabled, default_mute, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                privacy = excluded.privacy,
                comments_enabled = excluded.comments_enabled,
                default_mute = excluded.default_mute",
            params![
                id,
                conversation.kind.as_str(),
                conversation.name,
                conversation.settings.privacy.as_str(),
                conversation.settings.comments_enabled,
                conversation.settings.default_mute.as_str(),
                conversation.created_at.to_rfc3339(),
            ],
        )?;

        tx.execute("DELETE FROM members WHERE conversation_id = ?1", params![id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO members (conversation_id, user_id, role, position, joined_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (position, member) in conversation.members.iter().enumerate() {
                stmt.execute(params![
                    id,
                    member.user_id.to_string(),
                    member.role.as_str(),
                    position as i64,
                    member.joined_at.to_rfc3339(),
                ])?;
            }
        }

        tx.execute(
            "DELETE FROM member_permissions WHERE conversation_id = ?1",
            params![id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO member_permissions (conversation_id, user_id, overrides)
                 VALUES (?1, ?2, ?3)",
            )?;
            for permission in permissions {
                stmt.execute(params![
                    id,
                    permission.user_id.to_string(),
                    serde_json::to_string(&permission.overrides)?,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        let mut conversation = self
            .conn()
            .query_row(
                &format!("{SELECT_CONVERSATION} WHERE id = ?1"),
                params![id.to_string()],
                row_to_conversation,
            )
            .map_err(not_found)?;
        conversation.members = self.members_of(id)?;
        Ok(conversation)
    }

    /// Every conversation with its roster, oldest first.
    pub fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("{SELECT_CONVERSATION} ORDER BY created_at"))?;
        let rows = stmt.query_map([], row_to_conversation)?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }

        let mut rosters = self.all_members()?;
        for conversation in &mut conversations {
            conversation.members = rosters.remove(&conversation.id).unwrap_or_default();
        }
        Ok(conversations)
    }

    fn members_of(&self, id: ConversationId) -> Result<Vec<Member>> {
        let mut stmt = self.conn().prepare(
            "SELECT conversation_id, user_id, role, joined_at
             FROM members WHERE conversation_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![id.to_string()], row_to_member)?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?.1);
        }
        Ok(members)
    }

    fn all_members(&self) -> Result<HashMap<ConversationId, Vec<Member>>> {
        let mut stmt = self.conn().prepare(
            "SELECT conversation_id, user_id, role, joined_at
             FROM members ORDER BY conversation_id, position",
        )?;
        let rows = stmt.query_map([], row_to_member)?;

        let mut rosters: HashMap<ConversationId, Vec<Member>> = HashMap::new();
        for row in rows {
            let (conversation, member) = row?;
            rosters.entry(conversation).or_default().push(member);
        }
        Ok(rosters)
    }

    pub fn list_member_permissions(&self) -> Result<Vec<MemberPermission>> {
        let mut stmt = self.conn().prepare(
            "SELECT conversation_id, user_id, overrides FROM member_permissions",
        )?;
        let rows = stmt.query_map([], |row| {
            let conversation: String = row.get(0)?;
            let user: String = row.get(1)?;
            let overrides: String = row.get(2)?;
            Ok(MemberPermission {
                conversation_id: ConversationId(codec::uuid(0, &conversation)?),
                user_id: UserId(codec::uuid(1, &user)?),
                overrides: codec::json::<PermissionOverrides>(2, &overrides)?,
            })
        })?;

        let mut permissions = Vec::new();
        for row in rows {
            permissions.push(row?);
        }
        Ok(permissions)
    }

    /// Delete a conversation. Members, permissions, messages, deliveries
    /// and mutes go with it.
    pub fn delete_conversation(&self, id: ConversationId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM conversations WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let name: Option<String> = row.get(2)?;
    let privacy: String = row.get(3)?;
    let comments_enabled: bool = row.get(4)?;
    let default_mute: String = row.get(5)?;
    let created_at: String = row.get(6)?;

    Ok(Conversation {
        id: ConversationId(codec::uuid(0, &id)?),
        kind: codec::variant(1, &kind, ConversationKind::parse)?,
        name,
        members: Vec::new(),
        settings: ConversationSettings {
            privacy: codec::variant(3, &privacy, Privacy::parse)?,
            comments_enabled,
            default_mute: codec::variant(5, &default_mute, MutePolicy::parse)?,
        },
        created_at: codec::timestamp(6, &created_at)?,
    })
}

fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<(ConversationId, Member)> {
    let conversation: String = row.get(0)?;
    let user: String = row.get(1)?;
    let role: String = row.get(2)?;
    let joined_at: String = row.get(3)?;

    Ok((
        ConversationId(codec::uuid(0, &conversation)?),
        Member {
            user_id: UserId(codec::uuid(1, &user)?),
            role: codec::variant(2, &role, Role::parse)?,
            joined_at: codec::timestamp(3, &joined_at)?,
        },
    ))
}

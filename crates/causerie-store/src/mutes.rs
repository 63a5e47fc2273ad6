use rusqlite::params;

use causerie_shared::{ConversationId, MuteSetting, UserId};

use crate::codec;
use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Store a mute setting. Unmuting deletes the row.
    pub fn upsert_mute(&self, setting: &MuteSetting) -> Result<()> {
        if !setting.muted {
            self.conn().execute(
                "DELETE FROM mutes WHERE user_id = ?1 AND conversation_id = ?2",
                params![
                    setting.user_id.to_string(),
                    setting.conversation_id.to_string()
                ],
            )?;
            return Ok(());
        }

        self.conn().execute(
            "INSERT INTO mutes (user_id, conversation_id, muted, mute_expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, conversation_id) DO UPDATE SET
                muted = excluded.muted,
                mute_expires_at = excluded.mute_expires_at",
            params![
                setting.user_id.to_string(),
                setting.conversation_id.to_string(),
                setting.muted,
                setting.mute_expires_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn list_mutes(&self) -> Result<Vec<MuteSetting>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, conversation_id, muted, mute_expires_at FROM mutes",
        )?;
        let rows = stmt.query_map([], |row| {
            let user: String = row.get(0)?;
            let conversation: String = row.get(1)?;
            Ok(MuteSetting {
                user_id: UserId(codec::uuid(0, &user)?),
                conversation_id: ConversationId(codec::uuid(1, &conversation)?),
                muted: row.get(2)?,
                mute_expires_at: codec::opt_timestamp(3, row.get(3)?)?,
            })
        })?;

        let mut settings = Vec::new();
        for row in rows {
            settings.push(row?);
        }
        Ok(settings)
    }

    /// Delete mutes whose expiry has passed.
    pub fn delete_expired_mutes(&self, now: chrono::DateTime<chrono::Utc>) -> Result<usize> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, conversation_id, mute_expires_at FROM mutes
             WHERE mute_expires_at IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            let user: String = row.get(0)?;
            let conversation: String = row.get(1)?;
            let expires: String = row.get(2)?;
            Ok((user, conversation, codec::timestamp(2, &expires)?))
        })?;

        let mut expired = Vec::new();
        for row in rows {
            let (user, conversation, expires) = row?;
            if expires <= now {
                expired.push((user, conversation));
            }
        }

        for (user, conversation) in &expired {
            self.conn().execute(
                "DELETE FROM mutes WHERE user_id = ?1 AND conversation_id = ?2",
                params![user, conversation],
            )?;
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::sample_group;
    use chrono::{Duration, Utc};

    #[test]
    fn mute_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let user = UserId::new();
        let conv = sample_group(user, &[]);
        db.upsert_conversation(&conv, &[]).unwrap();

        let now = Utc::now();
        let mut setting = MuteSetting {
            user_id: user,
            conversation_id: conv.id,
            muted: true,
            mute_expires_at: Some(now + Duration::minutes(60)),
        };
        db.upsert_mute(&setting).unwrap();
        assert_eq!(db.list_mutes().unwrap(), vec![setting.clone()]);

        assert_eq!(db.delete_expired_mutes(now).unwrap(), 0);
        assert_eq!(db.delete_expired_mutes(now + Duration::minutes(61)).unwrap(), 1);

        db.upsert_mute(&setting).unwrap();
        setting.muted = false;
        setting.mute_expires_at = None;
        db.upsert_mute(&setting).unwrap();
        assert!(db.list_mutes().unwrap().is_empty());
    }
}

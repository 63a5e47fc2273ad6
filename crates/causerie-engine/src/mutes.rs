//! Notification mute registry.
//!
//! Keyed by (user, conversation). Expired entries stop counting as muted
//! right away and are swept from memory by [`MuteRegistry::purge_expired`].

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use causerie_shared::protocol::JournalRecord;
use causerie_shared::{ConversationId, MuteSetting, UserId};

use crate::journal::Journal;

pub struct MuteRegistry {
    settings: RwLock<HashMap<(UserId, ConversationId), MuteSetting>>,
    journal: Journal,
}

impl MuteRegistry {
    pub fn new(journal: Journal) -> Self {
        Self {
            settings: RwLock::new(HashMap::new()),
            journal,
        }
    }

    /// Rebuild from persisted settings, skipping those no longer in effect.
    pub fn restored(journal: Journal, settings: Vec<MuteSetting>, now: DateTime<Utc>) -> Self {
        let settings: HashMap<_, _> = settings
            .into_iter()
            .filter(|s| s.is_active(now))
            .map(|s| ((s.user_id, s.conversation_id), s))
            .collect();
        info!(mutes = settings.len(), "Restored mute settings");
        Self {
            settings: RwLock::new(settings),
            journal,
        }
    }

    /// Mute or unmute. A missing or zero duration mutes until cleared;
    /// unmuting always clears the expiry.
    pub async fn set_mute(
        &self,
        user: UserId,
        conversation: ConversationId,
        muted: bool,
        duration_minutes: Option<u32>,
        now: DateTime<Utc>,
    ) -> MuteSetting {
        let mute_expires_at = match (muted, duration_minutes) {
            (true, Some(minutes)) if minutes > 0 => {
                Some(now + Duration::minutes(i64::from(minutes)))
            }
            _ => None,
        };
        let setting = MuteSetting {
            user_id: user,
            conversation_id: conversation,
            muted,
            mute_expires_at,
        };

        let mut settings = self.settings.write().await;
        if muted {
            settings.insert((user, conversation), setting.clone());
        } else {
            settings.remove(&(user, conversation));
        }
        self.journal.record(JournalRecord::Mute(setting.clone()));

        debug!(
            user = %user.short(),
            conversation = %conversation,
            muted,
            expires = ?mute_expires_at,
            "Mute updated"
        );
        setting
    }

    pub async fn is_muted(
        &self,
        user: UserId,
        conversation: ConversationId,
        at: DateTime<Utc>,
    ) -> bool {
        self.settings
            .read()
            .await
            .get(&(user, conversation))
            .is_some_and(|s| s.is_active(at))
    }

    /// The user's setting; an unmuted placeholder when none is in effect.
    pub async fn setting(
        &self,
        user: UserId,
        conversation: ConversationId,
        at: DateTime<Utc>,
    ) -> MuteSetting {
        self.settings
            .read()
            .await
            .get(&(user, conversation))
            .filter(|s| s.is_active(at))
            .cloned()
            .unwrap_or(MuteSetting {
                user_id: user,
                conversation_id: conversation,
                muted: false,
                mute_expires_at: None,
            })
    }

    /// Drop the setting of a user who left the conversation.
    pub async fn forget(&self, user: UserId, conversation: ConversationId) {
        if let Some(mut setting) = self.settings.write().await.remove(&(user, conversation)) {
            setting.muted = false;
            setting.mute_expires_at = None;
            self.journal.record(JournalRecord::Mute(setting));
        }
    }

    /// Remove expired mutes from memory.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut settings = self.settings.write().await;
        let before = settings.len();
        settings.retain(|_, s| s.is_active(now));
        let removed = before - settings.len();
        if removed > 0 {
            debug!(removed, "Purged expired mutes");
        }
        removed
    }

    /// Drop every setting of a deleted conversation.
    pub async fn purge_conversation(&self, conversation: ConversationId) -> usize {
        let mut settings = self.settings.write().await;
        let before = settings.len();
        settings.retain(|(_, conv), _| *conv != conversation);
        before - settings.len()
    }

    pub async fn len(&self) -> usize {
        self.settings.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.settings.read().await.is_empty()
    }
}

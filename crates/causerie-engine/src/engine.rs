//! The engine façade.
//!
//! Wires the conversation store, message ledger, delivery tracker, presence
//! hub and mute registry together and publishes an [`EngineEvent`] after
//! every committed mutation. Cheap to share behind an `Arc`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use causerie_shared::permissions::{Capabilities, PermissionOverrides};
use causerie_shared::protocol::{EngineEvent, Snapshot};
use causerie_shared::{
    Conversation, ConversationId, ConversationKind, ConversationSettings, EngineError,
    EngineResult, MediaRef, MemberPermission, Message, MessageContent, MessageId, MutePolicy,
    MuteSetting, Privacy, Role, UserId,
};

use crate::config::EngineConfig;
use crate::conversations::{ConversationStore, ConversationView, SettingsPatch};
use crate::delivery::{AckOutcome, DeliveryTracker, MessageReceipts, ReadMark};
use crate::journal::Journal;
use crate::ledger::{HistoryCursor, MessageDraft, MessageLedger};
use crate::mutes::MuteRegistry;
use crate::presence::{PresenceHub, PresenceSubscription};

/// One line of a user's conversation list.
#[derive(Debug, Clone, Serialize)]
pub struct InboxEntry {
    pub conversation: Conversation,
    pub last_sequence: u64,
    pub last_seen_sequence: u64,
    pub unread: u64,
    pub muted: bool,
}

pub struct Engine {
    config: EngineConfig,
    conversations: ConversationStore,
    ledger: MessageLedger,
    delivery: DeliveryTracker,
    presence: PresenceHub,
    mutes: MuteRegistry,
    events: broadcast::Sender<EngineEvent>,
}

impl Engine {
    /// An in-memory engine that persists nothing.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_journal(config, Journal::disabled())
    }

    pub fn with_journal(config: EngineConfig, journal: Journal) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            conversations: ConversationStore::new(
                config.permissions,
                config.lock_shards,
                journal.clone(),
            ),
            ledger: MessageLedger::new(journal.clone(), config.max_message_len),
            delivery: DeliveryTracker::new(journal.clone()),
            presence: PresenceHub::new(),
            mutes: MuteRegistry::new(journal),
            events,
            config,
        }
    }

    /// Rebuild an engine from a persisted snapshot.
    pub fn restore(config: EngineConfig, journal: Journal, snapshot: Snapshot) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let Snapshot {
            conversations,
            permissions,
            messages,
            deliveries,
            mutes,
        } = snapshot;

        let engine = Self {
            conversations: ConversationStore::restored(
                config.permissions,
                config.lock_shards,
                journal.clone(),
                conversations,
                permissions,
            ),
            ledger: MessageLedger::restored(journal.clone(), config.max_message_len, &messages),
            delivery: DeliveryTracker::restored(journal.clone(), &messages, deliveries),
            presence: PresenceHub::new(),
            mutes: MuteRegistry::restored(journal, mutes, Utc::now()),
            events,
            config,
        };
        info!("Engine restored from snapshot");
        engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Receive every event committed from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: EngineEvent) {
        // No receiver is not an error.
        let _ = self.events.send(event);
    }

    async fn member_view(&self, id: ConversationId, user: UserId) -> EngineResult<ConversationView> {
        let view = self.conversations.view(id).await?;
        if !view.is_member(user) {
            return Err(EngineError::NotAMember);
        }
        Ok(view)
    }

    async fn message_view(&self, message_id: MessageId) -> EngineResult<ConversationView> {
        let (conversation, _) = self
            .ledger
            .locate(message_id)
            .await
            .ok_or_else(|| EngineError::not_found("message"))?;
        self.conversations.view(conversation).await
    }

    /// Record the default mute for members who just joined.
    async fn apply_default_mute(&self, conversation: &Conversation, joined: &[UserId]) {
        if conversation.settings.default_mute != MutePolicy::Muted {
            return;
        }
        let now = Utc::now();
        for user in joined {
            self.mutes
                .set_mute(*user, conversation.id, true, None, now)
                .await;
        }
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    pub async fn resolve(&self, id: ConversationId, actor: UserId) -> EngineResult<Capabilities> {
        self.conversations.resolve(id, actor).await
    }

    /// Conversation metadata. Public conversations are visible to anyone.
    pub async fn conversation(&self, id: ConversationId, actor: UserId) -> EngineResult<Conversation> {
        let view = self.conversations.view(id).await?;
        let conversation = view.conversation();
        if !conversation.is_member(actor) && conversation.settings.privacy != Privacy::Public {
            return Err(EngineError::NotAMember);
        }
        Ok(conversation.clone())
    }

    /// Every conversation of `user` with its unread counter. Conversations
    /// with more unread messages come first, then newer ones.
    pub async fn inbox(&self, user: UserId) -> Vec<InboxEntry> {
        let now = Utc::now();
        let mut entries = Vec::new();
        for conversation in self.conversations.conversations_for(user).await {
            let id = conversation.id;
            let last_seen_sequence = self.delivery.read_mark(id, user).await;
            entries.push(InboxEntry {
                last_sequence: self.ledger.last_sequence(id).await,
                unread: self.ledger.unread_count(id, user, last_seen_sequence).await,
                muted: self.mutes.is_muted(user, id, now).await,
                last_seen_sequence,
                conversation,
            });
        }
        entries.sort_by(|a, b| {
            b.unread
                .cmp(&a.unread)
                .then(b.conversation.created_at.cmp(&a.conversation.created_at))
        });
        entries
    }

    pub async fn get_or_create_direct(&self, a: UserId, b: UserId) -> EngineResult<Conversation> {
        let (conversation, created) = self.conversations.get_or_create_direct(a, b).await?;
        if created {
            self.emit(EngineEvent::MembershipChanged {
                conversation_id: conversation.id,
            });
        }
        Ok(conversation)
    }

    pub async fn create_group(
        &self,
        creator: UserId,
        kind: ConversationKind,
        name: Option<String>,
        members: &[UserId],
        settings: ConversationSettings,
    ) -> EngineResult<Conversation> {
        let conversation = self
            .conversations
            .create_group(creator, kind, name, members, settings)
            .await?;
        let joined: Vec<UserId> = conversation
            .member_ids()
            .into_iter()
            .filter(|user| *user != creator)
            .collect();
        self.apply_default_mute(&conversation, &joined).await;
        self.emit(EngineEvent::MembershipChanged {
            conversation_id: conversation.id,
        });
        Ok(conversation)
    }

    pub async fn add_member(
        &self,
        actor: UserId,
        id: ConversationId,
        user: UserId,
    ) -> EngineResult<Conversation> {
        let (conversation, joined) = self.conversations.add_member(actor, id, user).await?;
        if joined {
            if user != actor {
                self.apply_default_mute(&conversation, &[user]).await;
            }
            self.emit(EngineEvent::MembershipChanged { conversation_id: id });
        }
        Ok(conversation)
    }

    pub async fn join_public(&self, user: UserId, id: ConversationId) -> EngineResult<Conversation> {
        let (conversation, joined) = self.conversations.join_public(user, id).await?;
        if joined {
            self.apply_default_mute(&conversation, &[user]).await;
            self.emit(EngineEvent::MembershipChanged { conversation_id: id });
        }
        Ok(conversation)
    }

    /// Remove a member (or leave). Their presence subscriptions are closed
    /// and their mute setting dropped; delivery records stay.
    pub async fn remove_member(
        &self,
        actor: UserId,
        id: ConversationId,
        target: UserId,
    ) -> EngineResult<Conversation> {
        let conversation = self.conversations.remove_member(actor, id, target).await?;
        self.presence.evict(id, target);
        self.mutes.forget(target, id).await;
        self.emit(EngineEvent::MembershipChanged { conversation_id: id });
        Ok(conversation)
    }

    pub async fn set_role(
        &self,
        actor: UserId,
        id: ConversationId,
        target: UserId,
        role: Role,
    ) -> EngineResult<Conversation> {
        let conversation = self.conversations.set_role(actor, id, target, role).await?;
        self.emit(EngineEvent::MembershipChanged { conversation_id: id });
        Ok(conversation)
    }

    /// Merge per-member overrides. Flags absent from `patch` keep their
    /// current override.
    pub async fn set_permission(
        &self,
        actor: UserId,
        id: ConversationId,
        target: UserId,
        patch: PermissionOverrides,
    ) -> EngineResult<MemberPermission> {
        let permission = self
            .conversations
            .set_permission(actor, id, target, patch)
            .await?;
        self.emit(EngineEvent::MembershipChanged { conversation_id: id });
        Ok(permission)
    }

    pub async fn update_settings(
        &self,
        actor: UserId,
        id: ConversationId,
        patch: SettingsPatch,
    ) -> EngineResult<Conversation> {
        let conversation = self.conversations.update_settings(actor, id, patch).await?;
        self.emit(EngineEvent::MembershipChanged { conversation_id: id });
        Ok(conversation)
    }

    /// Delete a conversation and purge its history, receipts, mutes and
    /// presence subscriptions.
    pub async fn delete_conversation(&self, actor: UserId, id: ConversationId) -> EngineResult<()> {
        self.conversations.delete(actor, id).await?;

        let messages = self.ledger.purge(id).await;
        let deliveries = self.delivery.purge(id).await;
        let mutes = self.mutes.purge_conversation(id).await;
        let subscriptions = self.presence.close(id);
        info!(
            conversation = %id,
            messages,
            deliveries,
            mutes,
            subscriptions,
            "Purged conversation"
        );

        self.emit(EngineEvent::ConversationDeleted { conversation_id: id });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Append a message. `MessageCreated` is emitted once the message and
    /// its delivery records are committed.
    pub async fn post(
        &self,
        id: ConversationId,
        author: UserId,
        draft: MessageDraft,
    ) -> EngineResult<Message> {
        let view = self.conversations.view(id).await?;
        let message = self
            .ledger
            .append(&view, author, draft, &self.delivery)
            .await?;
        let recipient_ids: Vec<UserId> = view
            .conversation()
            .member_ids()
            .into_iter()
            .filter(|user| *user != author)
            .collect();
        drop(view);

        self.emit(EngineEvent::MessageCreated {
            conversation_id: id,
            message_id: message.id,
            sequence: message.sequence,
            author_id: author,
            recipient_ids,
            mentions: message.mentions.iter().copied().collect(),
        });
        Ok(message)
    }

    pub async fn edit_message(
        &self,
        message_id: MessageId,
        editor: UserId,
        content: MessageContent,
    ) -> EngineResult<Message> {
        let view = self.message_view(message_id).await?;
        let message = self.ledger.edit(&view, message_id, editor, content).await?;
        drop(view);

        self.emit(EngineEvent::MessageEdited {
            conversation_id: message.conversation_id,
            message_id,
            sequence: message.sequence,
        });
        Ok(message)
    }

    pub async fn delete_message(&self, message_id: MessageId, actor: UserId) -> EngineResult<Message> {
        let view = self.message_view(message_id).await?;
        let (message, deleted) = self.ledger.soft_delete(&view, message_id, actor).await?;
        drop(view);

        if deleted {
            self.emit(EngineEvent::MessageDeleted {
                conversation_id: message.conversation_id,
                message_id,
                sequence: message.sequence,
            });
        }
        Ok(message)
    }

    /// A page of history. The limit is clamped to the configured maximum.
    pub async fn history(
        &self,
        id: ConversationId,
        reader: UserId,
        cursor: HistoryCursor,
        limit: Option<usize>,
    ) -> EngineResult<Vec<Message>> {
        let view = self.conversations.view(id).await?;
        let limit = self.config.page_size(limit);
        self.ledger.history(&view, reader, cursor, limit).await
    }

    pub async fn message(&self, message_id: MessageId, reader: UserId) -> EngineResult<Message> {
        let view = self.message_view(message_id).await?;
        self.ledger.message(&view, reader, message_id).await
    }

    pub async fn download_media(&self, message_id: MessageId, actor: UserId) -> EngineResult<MediaRef> {
        let view = self.message_view(message_id).await?;
        self.ledger.download_media(&view, actor, message_id).await
    }

    pub async fn unread_count(&self, id: ConversationId, user: UserId) -> EngineResult<u64> {
        drop(self.member_view(id, user).await?);
        let watermark = self.delivery.read_mark(id, user).await;
        Ok(self.ledger.unread_count(id, user, watermark).await)
    }

    // ------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------

    pub async fn acknowledge_delivered(
        &self,
        message_id: MessageId,
        recipient: UserId,
    ) -> EngineResult<AckOutcome> {
        let (conversation_id, outcome) = self
            .delivery
            .acknowledge_delivered(message_id, recipient)
            .await?;
        self.emit_receipt(conversation_id, message_id, recipient, outcome);
        Ok(outcome)
    }

    pub async fn acknowledge_seen(
        &self,
        message_id: MessageId,
        recipient: UserId,
    ) -> EngineResult<AckOutcome> {
        let (conversation_id, outcome) = self
            .delivery
            .acknowledge_seen(message_id, recipient)
            .await?;
        self.emit_receipt(conversation_id, message_id, recipient, outcome);
        Ok(outcome)
    }

    fn emit_receipt(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        recipient_id: UserId,
        outcome: AckOutcome,
    ) {
        if let AckOutcome::Advanced { to, .. } = outcome {
            self.emit(EngineEvent::ReceiptAdvanced {
                conversation_id,
                message_id,
                recipient_id,
                state: to,
            });
        }
    }

    /// Per-recipient records of a message. Only its author may ask.
    pub async fn receipts(&self, message_id: MessageId, actor: UserId) -> EngineResult<MessageReceipts> {
        let receipts = self.delivery.receipts(message_id).await?;
        if receipts.author_id != actor {
            return Err(EngineError::forbidden(
                "only the author can see message receipts",
            ));
        }
        Ok(receipts)
    }

    /// Read watermark of every current member.
    pub async fn read_state(&self, id: ConversationId, actor: UserId) -> EngineResult<Vec<ReadMark>> {
        let view = self.member_view(id, actor).await?;
        let members = view.conversation().member_ids();
        drop(view);
        Ok(self.delivery.conversation_read_state(id, &members).await)
    }

    // ------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------

    pub async fn subscribe_presence(
        &self,
        id: ConversationId,
        user: UserId,
    ) -> EngineResult<PresenceSubscription> {
        let view = self.member_view(id, user).await?;
        // Subscribing under the view keeps a concurrent removal from
        // missing this subscription when it evicts.
        let subscription = self
            .presence
            .subscribe(id, user, self.config.presence_queue_depth);
        drop(view);
        Ok(subscription)
    }

    pub async fn publish_typing(
        &self,
        id: ConversationId,
        user: UserId,
        is_typing: bool,
    ) -> EngineResult<usize> {
        drop(self.member_view(id, user).await?);
        Ok(self.presence.publish_typing(id, user, is_typing))
    }

    pub async fn online_users(&self, id: ConversationId, actor: UserId) -> EngineResult<Vec<UserId>> {
        drop(self.member_view(id, actor).await?);
        Ok(self.presence.online_users(id))
    }

    // ------------------------------------------------------------------
    // Mutes
    // ------------------------------------------------------------------

    pub async fn set_mute(
        &self,
        user: UserId,
        id: ConversationId,
        muted: bool,
        duration_minutes: Option<u32>,
    ) -> EngineResult<MuteSetting> {
        let view = self.member_view(id, user).await?;
        let setting = self
            .mutes
            .set_mute(user, id, muted, duration_minutes, Utc::now())
            .await;
        drop(view);
        Ok(setting)
    }

    pub async fn is_muted(&self, user: UserId, id: ConversationId, at: DateTime<Utc>) -> bool {
        self.mutes.is_muted(user, id, at).await
    }

    pub async fn mute_setting(&self, user: UserId, id: ConversationId) -> EngineResult<MuteSetting> {
        drop(self.member_view(id, user).await?);
        Ok(self.mutes.setting(user, id, Utc::now()).await)
    }

    // ------------------------------------------------------------------
    // Housekeeping
    // ------------------------------------------------------------------

    pub async fn purge_expired_mutes(&self, now: DateTime<Utc>) -> usize {
        self.mutes.purge_expired(now).await
    }

    pub fn purge_idle_locks(&self) -> usize {
        let purged = self.conversations.purge_idle_locks();
        if purged > 0 {
            debug!(purged, "Purged idle direct-creation locks");
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causerie_shared::{DeliveryState, MediaKind};

    fn engine() -> Engine {
        Engine::new(EngineConfig::default())
    }

    async fn group(engine: &Engine, owner: UserId, members: &[UserId]) -> Conversation {
        engine
            .create_group(
                owner,
                ConversationKind::Group,
                Some("crew".into()),
                members,
                ConversationSettings::default(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn post_emits_message_created() {
        let engine = engine();
        let (owner, m2) = (UserId::new(), UserId::new());
        let conv = group(&engine, owner, &[m2]).await;
        let mut events = engine.subscribe_events();

        let message = engine
            .post(conv.id, m2, MessageDraft::text("hello"))
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            EngineEvent::MessageCreated {
                message_id,
                sequence,
                recipient_ids,
                ..
            } => {
                assert_eq!(message_id, message.id);
                assert_eq!(sequence, 1);
                assert_eq!(recipient_ids, vec![owner]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn receipts_are_author_only_and_emit_events() {
        let engine = engine();
        let (owner, m2) = (UserId::new(), UserId::new());
        let conv = group(&engine, owner, &[m2]).await;
        let message = engine
            .post(conv.id, owner, MessageDraft::text("read me"))
            .await
            .unwrap();
        let mut events = engine.subscribe_events();

        assert!(engine.acknowledge_seen(message.id, m2).await.unwrap().advanced());
        assert!(!engine
            .acknowledge_delivered(message.id, m2)
            .await
            .unwrap()
            .advanced());
        match events.recv().await.unwrap() {
            EngineEvent::ReceiptAdvanced { state, .. } => assert_eq!(state, DeliveryState::Seen),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(events.try_recv().is_err());

        assert!(matches!(
            engine.receipts(message.id, m2).await,
            Err(EngineError::Forbidden(_))
        ));
        let receipts = engine.receipts(message.id, owner).await.unwrap();
        assert_eq!(receipts.records.len(), 1);
        assert_eq!(receipts.records[0].state, DeliveryState::Seen);
    }

    #[tokio::test]
    async fn unread_and_inbox_follow_watermarks() {
        let engine = engine();
        let (owner, m2) = (UserId::new(), UserId::new());
        let conv = group(&engine, owner, &[m2]).await;

        let first = engine.post(conv.id, owner, MessageDraft::text("1")).await.unwrap();
        engine.post(conv.id, owner, MessageDraft::text("2")).await.unwrap();
        assert_eq!(engine.unread_count(conv.id, m2).await.unwrap(), 2);
        assert_eq!(engine.unread_count(conv.id, owner).await.unwrap(), 0);

        engine.acknowledge_seen(first.id, m2).await.unwrap();
        let inbox = engine.inbox(m2).await;
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].last_sequence, 2);
        assert_eq!(inbox[0].last_seen_sequence, 1);
        assert_eq!(inbox[0].unread, 1);
    }

    #[tokio::test]
    async fn default_mute_applies_to_joiners() {
        let engine = engine();
        let (owner, m2, m3) = (UserId::new(), UserId::new(), UserId::new());
        let settings = ConversationSettings {
            default_mute: MutePolicy::Muted,
            ..Default::default()
        };
        let conv = engine
            .create_group(owner, ConversationKind::Channel, None, &[m2], settings)
            .await
            .unwrap();
        let now = Utc::now();

        assert!(!engine.is_muted(owner, conv.id, now).await);
        assert!(engine.is_muted(m2, conv.id, now).await);

        engine
            .set_permission(
                owner,
                conv.id,
                m2,
                PermissionOverrides {
                    can_invite: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        engine.add_member(m2, conv.id, m3).await.unwrap();
        assert!(engine.is_muted(m3, conv.id, now).await);

        engine.set_mute(m3, conv.id, false, None).await.unwrap();
        assert!(!engine.is_muted(m3, conv.id, Utc::now()).await);
    }

    #[tokio::test]
    async fn removal_closes_presence_and_mutes() {
        let engine = engine();
        let (owner, m2) = (UserId::new(), UserId::new());
        let conv = group(&engine, owner, &[m2]).await;

        let mut sub = engine.subscribe_presence(conv.id, m2).await.unwrap();
        engine.set_mute(m2, conv.id, true, None).await.unwrap();

        engine.remove_member(owner, conv.id, m2).await.unwrap();
        assert!(sub.recv().await.is_none());
        assert!(!engine.is_muted(m2, conv.id, Utc::now()).await);
        assert!(matches!(
            engine.subscribe_presence(conv.id, m2).await,
            Err(EngineError::NotAMember)
        ));
        assert!(matches!(
            engine.publish_typing(conv.id, m2, true).await,
            Err(EngineError::NotAMember)
        ));
    }

    #[tokio::test]
    async fn deleting_a_conversation_purges_everything() {
        let engine = engine();
        let (owner, m2) = (UserId::new(), UserId::new());
        let conv = group(&engine, owner, &[m2]).await;
        let message = engine.post(conv.id, m2, MessageDraft::text("bye")).await.unwrap();
        engine.set_mute(m2, conv.id, true, None).await.unwrap();

        assert!(matches!(
            engine.delete_conversation(m2, conv.id).await,
            Err(EngineError::Forbidden(_))
        ));
        engine.delete_conversation(owner, conv.id).await.unwrap();

        assert!(matches!(
            engine.message(message.id, m2).await,
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            engine.acknowledge_seen(message.id, owner).await,
            Err(EngineError::NotFound(_))
        ));
        assert!(!engine.is_muted(m2, conv.id, Utc::now()).await);
        assert!(engine.inbox(m2).await.is_empty());
    }

    #[tokio::test]
    async fn media_download_through_engine() {
        let engine = engine();
        let (owner, m2) = (UserId::new(), UserId::new());
        let conv = group(&engine, owner, &[m2]).await;
        let draft = MessageDraft {
            content: MessageContent {
                text: Some("listen".into()),
                media: Some(MediaRef {
                    kind: MediaKind::Audio,
                    size: 2048,
                    url: "https://media.example/a.ogg".into(),
                    thumbnail_url: None,
                }),
            },
            ..Default::default()
        };
        let message = engine.post(conv.id, owner, draft).await.unwrap();

        let media = engine.download_media(message.id, m2).await.unwrap();
        assert_eq!(media.kind, MediaKind::Audio);
        assert!(matches!(
            engine.download_media(message.id, UserId::new()).await,
            Err(EngineError::NotAMember)
        ));
    }

    #[tokio::test]
    async fn history_limit_is_clamped() {
        let config = EngineConfig {
            max_page_size: 3,
            ..Default::default()
        };
        let engine = Engine::new(config);
        let (owner, m2) = (UserId::new(), UserId::new());
        let conv = group(&engine, owner, &[m2]).await;
        for i in 0..5 {
            engine
                .post(conv.id, owner, MessageDraft::text(format!("{i}")))
                .await
                .unwrap();
        }

        let page = engine
            .history(conv.id, m2, HistoryCursor::After(0), Some(50))
            .await
            .unwrap();
        assert_eq!(page.len(), 3);
    }

    #[tokio::test]
    async fn private_metadata_is_members_only() {
        let engine = engine();
        let (owner, stranger) = (UserId::new(), UserId::new());
        let conv = group(&engine, owner, &[]).await;

        assert!(matches!(
            engine.conversation(conv.id, stranger).await,
            Err(EngineError::NotAMember)
        ));
        engine
            .update_settings(
                owner,
                conv.id,
                SettingsPatch {
                    privacy: Some(Privacy::Public),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(engine.conversation(conv.id, stranger).await.is_ok());
        engine.join_public(stranger, conv.id).await.unwrap();
        assert!(engine.resolve(conv.id, stranger).await.unwrap().post);
    }
}

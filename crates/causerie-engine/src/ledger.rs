//! Message ledger: an append-only, gapless, per-conversation log.
//!
//! Every conversation has its own log behind a `RwLock`; holding the write
//! half is the single-writer section in which the next sequence number is
//! assigned and the delivery records are seeded. Soft-deleted messages stay
//! in the log as tombstones, so sequences are never reused.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use causerie_shared::protocol::JournalRecord;
use causerie_shared::{
    ConversationId, ConversationKind, EngineError, EngineResult, MediaKind, MediaRef, Message,
    MessageContent, MessageId, UserId,
};

use crate::conversations::ConversationView;
use crate::delivery::DeliveryTracker;
use crate::journal::Journal;

/// A message as submitted by its author.
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
    pub content: MessageContent,
    pub replied_to: Option<MessageId>,
    pub mentions: Vec<UserId>,
    pub forwarded: bool,
}

impl MessageDraft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: MessageContent::text(text),
            ..Default::default()
        }
    }
}

/// Where a history page starts. Pages are always in ascending sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryCursor {
    /// Messages with a sequence strictly greater than the given one.
    After(u64),
    /// Messages with a sequence strictly lower than the given one.
    Before(u64),
    /// The most recent messages.
    Latest,
}

#[derive(Default)]
struct ConversationLog {
    last_sequence: u64,
    messages: Vec<Message>,
}

impl ConversationLog {
    fn position(&self, sequence: u64) -> Option<usize> {
        self.messages
            .binary_search_by_key(&sequence, |m| m.sequence)
            .ok()
    }

    fn page(&self, cursor: HistoryCursor, limit: usize) -> &[Message] {
        let (start, end) = match cursor {
            HistoryCursor::After(seq) => {
                let start = self.messages.partition_point(|m| m.sequence <= seq);
                (start, start.saturating_add(limit).min(self.messages.len()))
            }
            HistoryCursor::Before(seq) => {
                let end = self.messages.partition_point(|m| m.sequence < seq);
                (end.saturating_sub(limit), end)
            }
            HistoryCursor::Latest => {
                let end = self.messages.len();
                (end.saturating_sub(limit), end)
            }
        };
        &self.messages[start..end]
    }
}

pub struct MessageLedger {
    logs: RwLock<HashMap<ConversationId, Arc<RwLock<ConversationLog>>>>,
    index: RwLock<HashMap<MessageId, (ConversationId, u64)>>,
    journal: Journal,
    max_message_len: usize,
}

impl MessageLedger {
    pub fn new(journal: Journal, max_message_len: usize) -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
            journal,
            max_message_len,
        }
    }

    /// Rebuild from persisted messages.
    pub fn restored(journal: Journal, max_message_len: usize, messages: &[Message]) -> Self {
        let mut logs: HashMap<ConversationId, ConversationLog> = HashMap::new();
        let mut index = HashMap::with_capacity(messages.len());

        for message in messages {
            index.insert(message.id, (message.conversation_id, message.sequence));
            let log = logs.entry(message.conversation_id).or_default();
            log.last_sequence = log.last_sequence.max(message.sequence);
            log.messages.push(message.clone());
        }
        for log in logs.values_mut() {
            log.messages.sort_by_key(|m| m.sequence);
        }

        info!(
            conversations = logs.len(),
            messages = index.len(),
            "Restored message ledger"
        );

        Self {
            logs: RwLock::new(
                logs.into_iter()
                    .map(|(id, log)| (id, Arc::new(RwLock::new(log))))
                    .collect(),
            ),
            index: RwLock::new(index),
            journal,
            max_message_len,
        }
    }

    async fn log_for(&self, conversation: ConversationId) -> Arc<RwLock<ConversationLog>> {
        if let Some(log) = self.logs.read().await.get(&conversation) {
            return log.clone();
        }
        self.logs
            .write()
            .await
            .entry(conversation)
            .or_default()
            .clone()
    }

    async fn existing_log(&self, conversation: ConversationId) -> Option<Arc<RwLock<ConversationLog>>> {
        self.logs.read().await.get(&conversation).cloned()
    }

    /// Conversation and sequence of a message, if it exists.
    pub async fn locate(&self, message_id: MessageId) -> Option<(ConversationId, u64)> {
        self.index.read().await.get(&message_id).copied()
    }

    async fn sequence_in(&self, view: &ConversationView, message_id: MessageId) -> EngineResult<u64> {
        match self.locate(message_id).await {
            Some((conversation, sequence)) if conversation == view.id() => Ok(sequence),
            _ => Err(EngineError::not_found("message")),
        }
    }

    fn validate_content(&self, content: &MessageContent) -> EngineResult<()> {
        if content.is_empty() {
            return Err(EngineError::invalid("message has neither text nor media"));
        }
        if let Some(text) = &content.text {
            if text.chars().count() > self.max_message_len {
                return Err(EngineError::invalid(format!(
                    "text longer than {} characters",
                    self.max_message_len
                )));
            }
        }
        if let Some(media) = &content.media {
            if media.url.trim().is_empty() {
                return Err(EngineError::invalid("media reference without URL"));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Append a message and seed its delivery records.
    ///
    /// The recipient set is the membership seen by `view`, minus the author.
    /// Nothing is visible to readers unless both the message and its
    /// records are in place.
    pub async fn append(
        &self,
        view: &ConversationView,
        author: UserId,
        draft: MessageDraft,
        delivery: &DeliveryTracker,
    ) -> EngineResult<Message> {
        let conversation = view.conversation();
        let caps = view.capabilities(author)?;
        if !caps.post {
            return Err(EngineError::forbidden(
                "posting is not allowed in this conversation",
            ));
        }
        self.validate_content(&draft.content)?;

        let mut mentions = BTreeSet::new();
        for user in draft.mentions {
            if !view.is_member(user) {
                return Err(EngineError::invalid_reference(format!(
                    "mentioned user {user} is not a member"
                )));
            }
            mentions.insert(user);
        }
        if !mentions.is_empty() && !caps.mention {
            return Err(EngineError::forbidden("mentions are not allowed"));
        }

        if let Some(parent) = draft.replied_to {
            if self.sequence_in(view, parent).await.is_err() {
                return Err(EngineError::invalid_reference(format!(
                    "replied-to message {parent} is not in this conversation"
                )));
            }
            if conversation.kind != ConversationKind::Direct
                && !conversation.settings.comments_enabled
                && !caps.role.is_admin()
            {
                return Err(EngineError::forbidden("replies are disabled"));
            }
        }

        let log = self.log_for(conversation.id).await;
        let mut log = log.write().await;

        let sequence = log.last_sequence + 1;
        let message = Message {
            id: MessageId::new(),
            conversation_id: conversation.id,
            sequence,
            author_id: author,
            content: draft.content,
            replied_to: draft.replied_to,
            mentions,
            is_forwarded: draft.forwarded,
            is_edited: false,
            is_deleted: false,
            created_at: Utc::now(),
            edited_at: None,
            deleted_at: None,
        };

        self.journal.record(JournalRecord::Message(message.clone()));
        delivery.seed(&message, &conversation.member_ids()).await;
        self.index
            .write()
            .await
            .insert(message.id, (conversation.id, sequence));
        log.last_sequence = sequence;
        log.messages.push(message.clone());

        debug!(
            conversation = %conversation.id,
            message = %message.id,
            sequence,
            "Message appended"
        );
        Ok(message)
    }

    /// Replace the content of a live message.
    pub async fn edit(
        &self,
        view: &ConversationView,
        message_id: MessageId,
        editor: UserId,
        content: MessageContent,
    ) -> EngineResult<Message> {
        let caps = view.capabilities(editor)?;
        self.validate_content(&content)?;
        let sequence = self.sequence_in(view, message_id).await?;

        let log = self
            .existing_log(view.id())
            .await
            .ok_or_else(|| EngineError::not_found("message"))?;
        let mut log = log.write().await;
        let idx = log
            .position(sequence)
            .ok_or_else(|| EngineError::not_found("message"))?;
        let message = &mut log.messages[idx];

        if message.is_deleted {
            return Err(EngineError::not_found("message was deleted"));
        }
        if !caps.edit.permits(message.author_id == editor) {
            return Err(EngineError::forbidden("cannot edit this message"));
        }

        message.content = content;
        message.is_edited = true;
        message.edited_at = Some(Utc::now());
        let edited = message.clone();
        self.journal.record(JournalRecord::Message(edited.clone()));

        debug!(message = %message_id, by = %editor, "Message edited");
        Ok(edited)
    }

    /// Turn a message into a tombstone. Deleting a tombstone again succeeds
    /// without change; the flag is `true` when this call deleted it.
    pub async fn soft_delete(
        &self,
        view: &ConversationView,
        message_id: MessageId,
        actor: UserId,
    ) -> EngineResult<(Message, bool)> {
        let caps = view.capabilities(actor)?;
        let sequence = self.sequence_in(view, message_id).await?;

        let log = self
            .existing_log(view.id())
            .await
            .ok_or_else(|| EngineError::not_found("message"))?;
        let mut log = log.write().await;
        let idx = log
            .position(sequence)
            .ok_or_else(|| EngineError::not_found("message"))?;
        let message = &mut log.messages[idx];

        if !caps.delete.permits(message.author_id == actor) {
            return Err(EngineError::forbidden("cannot delete this message"));
        }
        if message.is_deleted {
            return Ok((message.clone(), false));
        }

        message.content = MessageContent::default();
        message.mentions.clear();
        message.is_deleted = true;
        message.deleted_at = Some(Utc::now());
        let tombstone = message.clone();
        self.journal.record(JournalRecord::Message(tombstone.clone()));

        debug!(message = %message_id, by = %actor, "Message deleted");
        Ok((tombstone, true))
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// One page of history, ascending by sequence.
    pub async fn history(
        &self,
        view: &ConversationView,
        reader: UserId,
        cursor: HistoryCursor,
        limit: usize,
    ) -> EngineResult<Vec<Message>> {
        if !view.is_member(reader) {
            return Err(EngineError::NotAMember);
        }
        let Some(log) = self.existing_log(view.id()).await else {
            return Ok(Vec::new());
        };
        let log = log.read().await;
        Ok(log.page(cursor, limit).to_vec())
    }

    pub async fn message(
        &self,
        view: &ConversationView,
        reader: UserId,
        message_id: MessageId,
    ) -> EngineResult<Message> {
        if !view.is_member(reader) {
            return Err(EngineError::NotAMember);
        }
        let sequence = self.sequence_in(view, message_id).await?;
        let log = self
            .existing_log(view.id())
            .await
            .ok_or_else(|| EngineError::not_found("message"))?;
        let log = log.read().await;
        log.position(sequence)
            .map(|idx| log.messages[idx].clone())
            .ok_or_else(|| EngineError::not_found("message"))
    }

    /// Media reference of a message, gated by the download capabilities.
    pub async fn download_media(
        &self,
        view: &ConversationView,
        actor: UserId,
        message_id: MessageId,
    ) -> EngineResult<MediaRef> {
        let caps = view.capabilities(actor)?;
        let message = self.message(view, actor, message_id).await?;
        let media = message
            .content
            .media
            .ok_or_else(|| EngineError::not_found("message has no media"))?;

        let allowed = match media.kind {
            MediaKind::Video => caps.download_video,
            MediaKind::Audio => caps.download_audio,
            MediaKind::Image | MediaKind::File => true,
        };
        if !allowed {
            return Err(EngineError::forbidden(format!(
                "downloading {} is not allowed",
                media.kind.as_str()
            )));
        }
        Ok(media)
    }

    /// Live messages from others above `watermark`.
    pub async fn unread_count(
        &self,
        conversation: ConversationId,
        user: UserId,
        watermark: u64,
    ) -> u64 {
        let Some(log) = self.existing_log(conversation).await else {
            return 0;
        };
        let log = log.read().await;
        log.page(HistoryCursor::After(watermark), usize::MAX)
            .iter()
            .filter(|m| m.author_id != user && !m.is_deleted)
            .count() as u64
    }

    /// Last assigned sequence, 0 for an empty conversation.
    pub async fn last_sequence(&self, conversation: ConversationId) -> u64 {
        match self.existing_log(conversation).await {
            Some(log) => log.read().await.last_sequence,
            None => 0,
        }
    }

    /// Drop the whole log of a purged conversation.
    pub async fn purge(&self, conversation: ConversationId) -> usize {
        let Some(log) = self.logs.write().await.remove(&conversation) else {
            return 0;
        };
        let removed = log.read().await.messages.len();
        self.index
            .write()
            .await
            .retain(|_, (conv, _)| *conv != conversation);
        debug!(conversation = %conversation, messages = removed, "Purged message log");
        removed
    }
}

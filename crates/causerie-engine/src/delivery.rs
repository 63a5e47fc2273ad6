//! Delivery tracker: per message, per recipient `Sent -> Delivered -> Seen`.
//!
//! The recipient set of a message is fixed when it is seeded, so the map of
//! cells never changes afterwards and acknowledgements only touch atomics.
//! A transition is a compare-and-set on the state ordinal; timestamps are
//! set-once cells written before the state is published.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use causerie_shared::protocol::JournalRecord;
use causerie_shared::{
    ConversationId, DeliveryRecord, DeliveryState, EngineError, EngineResult, Message, MessageId,
    UserId,
};

use crate::journal::Journal;

/// Result of an acknowledgement. Late and duplicate acknowledgements are
/// reported as `Unchanged`, never as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AckOutcome {
    Advanced {
        from: DeliveryState,
        to: DeliveryState,
    },
    Unchanged {
        current: DeliveryState,
    },
}

impl AckOutcome {
    pub fn advanced(&self) -> bool {
        matches!(self, Self::Advanced { .. })
    }
}

/// Read watermark of one member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadMark {
    pub user_id: UserId,
    pub last_seen_sequence: u64,
}

/// Delivery records of one message, as shown to its author.
#[derive(Debug, Clone, Serialize)]
pub struct MessageReceipts {
    pub message_id: MessageId,
    pub author_id: UserId,
    pub records: Vec<DeliveryRecord>,
}

// ---------------------------------------------------------------------------
// Cells
// ---------------------------------------------------------------------------

struct DeliveryCell {
    state: AtomicU8,
    sent_at: DateTime<Utc>,
    delivered_at: OnceLock<DateTime<Utc>>,
    seen_at: OnceLock<DateTime<Utc>>,
}

impl DeliveryCell {
    fn sent(at: DateTime<Utc>) -> Self {
        Self {
            state: AtomicU8::new(DeliveryState::Sent.ordinal()),
            sent_at: at,
            delivered_at: OnceLock::new(),
            seen_at: OnceLock::new(),
        }
    }

    fn from_record(record: &DeliveryRecord) -> Self {
        let cell = Self {
            state: AtomicU8::new(record.state.ordinal()),
            sent_at: record.sent_at,
            delivered_at: OnceLock::new(),
            seen_at: OnceLock::new(),
        };
        if let Some(at) = record.delivered_at {
            let _ = cell.delivered_at.set(at);
        }
        if let Some(at) = record.seen_at {
            let _ = cell.seen_at.set(at);
        }
        cell
    }

    fn state(&self) -> DeliveryState {
        DeliveryState::from_ordinal(self.state.load(Ordering::Acquire))
            .unwrap_or(DeliveryState::Sent)
    }

    fn advance(&self, target: DeliveryState, at: DateTime<Utc>) -> AckOutcome {
        // Both Delivered and Seen imply delivery; a Seen that skips
        // Delivered records both timestamps.
        let _ = self.delivered_at.set(at);
        if target == DeliveryState::Seen {
            let _ = self.seen_at.set(at);
        }

        let target_ord = target.ordinal();
        match self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            (current < target_ord).then_some(target_ord)
        }) {
            Ok(previous) => AckOutcome::Advanced {
                from: DeliveryState::from_ordinal(previous).unwrap_or(DeliveryState::Sent),
                to: target,
            },
            Err(current) => AckOutcome::Unchanged {
                current: DeliveryState::from_ordinal(current).unwrap_or(DeliveryState::Sent),
            },
        }
    }

    fn record(&self, message_id: MessageId, recipient_id: UserId) -> DeliveryRecord {
        let state = self.state();
        DeliveryRecord {
            message_id,
            recipient_id,
            state,
            sent_at: self.sent_at,
            // A Delivered ack racing the state load may have set its
            // timestamp already; only report timestamps the state covers.
            delivered_at: (state >= DeliveryState::Delivered)
                .then(|| self.delivered_at.get().copied())
                .flatten(),
            seen_at: (state == DeliveryState::Seen)
                .then(|| self.seen_at.get().copied())
                .flatten(),
        }
    }
}

struct MessageDeliveries {
    conversation_id: ConversationId,
    sequence: u64,
    author_id: UserId,
    /// Recipients in membership order.
    order: Vec<UserId>,
    cells: HashMap<UserId, DeliveryCell>,
}

#[derive(Default)]
struct ReadMarks {
    seen: Mutex<HashMap<UserId, u64>>,
}

impl ReadMarks {
    fn advance(&self, user: UserId, sequence: u64) {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let mark = seen.entry(user).or_insert(0);
        *mark = (*mark).max(sequence);
    }

    fn get(&self, user: UserId) -> u64 {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user)
            .copied()
            .unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

pub struct DeliveryTracker {
    messages: RwLock<HashMap<MessageId, Arc<MessageDeliveries>>>,
    marks: RwLock<HashMap<ConversationId, Arc<ReadMarks>>>,
    journal: Journal,
}

impl DeliveryTracker {
    pub fn new(journal: Journal) -> Self {
        Self {
            messages: RwLock::new(HashMap::new()),
            marks: RwLock::new(HashMap::new()),
            journal,
        }
    }

    /// Rebuild from persisted messages and records. Watermarks are derived
    /// from Seen records and from authorship.
    pub fn restored(journal: Journal, messages: &[Message], records: Vec<DeliveryRecord>) -> Self {
        let mut by_message: HashMap<MessageId, Vec<DeliveryRecord>> = HashMap::new();
        for record in records {
            by_message.entry(record.message_id).or_default().push(record);
        }

        let mut deliveries = HashMap::new();
        let mut marks: HashMap<ConversationId, Arc<ReadMarks>> = HashMap::new();

        for message in messages {
            let conv_marks = marks.entry(message.conversation_id).or_default().clone();
            conv_marks.advance(message.author_id, message.sequence);

            let records = by_message.remove(&message.id).unwrap_or_default();
            let mut order = Vec::with_capacity(records.len());
            let mut cells = HashMap::with_capacity(records.len());
            for record in &records {
                if record.state == DeliveryState::Seen {
                    conv_marks.advance(record.recipient_id, message.sequence);
                }
                order.push(record.recipient_id);
                cells.insert(record.recipient_id, DeliveryCell::from_record(record));
            }

            deliveries.insert(
                message.id,
                Arc::new(MessageDeliveries {
                    conversation_id: message.conversation_id,
                    sequence: message.sequence,
                    author_id: message.author_id,
                    order,
                    cells,
                }),
            );
        }

        if !by_message.is_empty() {
            warn!(
                orphans = by_message.len(),
                "Skipped delivery records of unknown messages"
            );
        }

        Self {
            messages: RwLock::new(deliveries),
            marks: RwLock::new(marks),
            journal,
        }
    }

    async fn marks_for(&self, conversation: ConversationId) -> Arc<ReadMarks> {
        if let Some(marks) = self.marks.read().await.get(&conversation) {
            return marks.clone();
        }
        self.marks
            .write()
            .await
            .entry(conversation)
            .or_default()
            .clone()
    }

    /// Create one `Sent` record per recipient except the author. Called by
    /// the ledger inside the append's single-writer section.
    pub async fn seed(&self, message: &Message, recipients: &[UserId]) {
        let order: Vec<UserId> = recipients
            .iter()
            .copied()
            .filter(|r| *r != message.author_id)
            .collect();
        let cells: HashMap<UserId, DeliveryCell> = order
            .iter()
            .map(|r| (*r, DeliveryCell::sent(message.created_at)))
            .collect();

        for recipient in &order {
            self.journal.record(JournalRecord::Delivery(DeliveryRecord {
                message_id: message.id,
                recipient_id: *recipient,
                state: DeliveryState::Sent,
                sent_at: message.created_at,
                delivered_at: None,
                seen_at: None,
            }));
        }

        let seeded = order.len();
        self.messages.write().await.insert(
            message.id,
            Arc::new(MessageDeliveries {
                conversation_id: message.conversation_id,
                sequence: message.sequence,
                author_id: message.author_id,
                order,
                cells,
            }),
        );

        // Authors have read their own message.
        self.marks_for(message.conversation_id)
            .await
            .advance(message.author_id, message.sequence);

        debug!(message = %message.id, recipients = seeded, "Seeded delivery records");
    }

    async fn deliveries(&self, message_id: MessageId) -> EngineResult<Arc<MessageDeliveries>> {
        self.messages
            .read()
            .await
            .get(&message_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("message"))
    }

    pub async fn acknowledge_delivered(
        &self,
        message_id: MessageId,
        recipient: UserId,
    ) -> EngineResult<(ConversationId, AckOutcome)> {
        self.acknowledge(message_id, recipient, DeliveryState::Delivered)
            .await
    }

    pub async fn acknowledge_seen(
        &self,
        message_id: MessageId,
        recipient: UserId,
    ) -> EngineResult<(ConversationId, AckOutcome)> {
        self.acknowledge(message_id, recipient, DeliveryState::Seen)
            .await
    }

    async fn acknowledge(
        &self,
        message_id: MessageId,
        recipient: UserId,
        target: DeliveryState,
    ) -> EngineResult<(ConversationId, AckOutcome)> {
        let deliveries = self.deliveries(message_id).await?;
        let cell = deliveries
            .cells
            .get(&recipient)
            .ok_or_else(|| EngineError::not_found("delivery record"))?;

        let outcome = cell.advance(target, Utc::now());
        if let AckOutcome::Advanced { to, .. } = outcome {
            if to == DeliveryState::Seen {
                self.marks_for(deliveries.conversation_id)
                    .await
                    .advance(recipient, deliveries.sequence);
            }
            self.journal
                .record(JournalRecord::Delivery(cell.record(message_id, recipient)));
            debug!(
                message = %message_id,
                recipient = %recipient,
                state = to.as_str(),
                "Delivery state advanced"
            );
        }

        Ok((deliveries.conversation_id, outcome))
    }

    /// Current record for one recipient.
    pub async fn record(
        &self,
        message_id: MessageId,
        recipient: UserId,
    ) -> EngineResult<DeliveryRecord> {
        let deliveries = self.deliveries(message_id).await?;
        deliveries
            .cells
            .get(&recipient)
            .map(|cell| cell.record(message_id, recipient))
            .ok_or_else(|| EngineError::not_found("delivery record"))
    }

    pub async fn receipts(&self, message_id: MessageId) -> EngineResult<MessageReceipts> {
        let deliveries = self.deliveries(message_id).await?;
        let records = deliveries
            .order
            .iter()
            .filter_map(|r| deliveries.cells.get(r).map(|cell| cell.record(message_id, *r)))
            .collect();
        Ok(MessageReceipts {
            message_id,
            author_id: deliveries.author_id,
            records,
        })
    }

    /// Highest Seen sequence per member; members without one report 0.
    /// A member's own posts count as seen, so an author's mark includes them.
    pub async fn conversation_read_state(
        &self,
        conversation: ConversationId,
        members: &[UserId],
    ) -> Vec<ReadMark> {
        let marks = self.marks.read().await.get(&conversation).cloned();
        members
            .iter()
            .map(|user| ReadMark {
                user_id: *user,
                last_seen_sequence: marks.as_ref().map_or(0, |m| m.get(*user)),
            })
            .collect()
    }

    pub async fn read_mark(&self, conversation: ConversationId, user: UserId) -> u64 {
        self.marks
            .read()
            .await
            .get(&conversation)
            .map_or(0, |m| m.get(user))
    }

    /// Drop every record and watermark of a purged conversation.
    pub async fn purge(&self, conversation: ConversationId) -> usize {
        let removed = {
            let mut messages = self.messages.write().await;
            let before = messages.len();
            messages.retain(|_, d| d.conversation_id != conversation);
            before - messages.len()
        };
        self.marks.write().await.remove(&conversation);
        debug!(conversation = %conversation, messages = removed, "Purged delivery records");
        removed
    }
}

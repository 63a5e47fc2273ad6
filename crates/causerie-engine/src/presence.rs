//! Transient typing and online fan-out.
//!
//! Every subscription owns a bounded queue. Publishing is a synchronous
//! `try_send` to every other user's queues: a full or closed queue loses the
//! event and nothing ever waits on a slow subscriber. Nothing here is
//! persisted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use causerie_shared::protocol::PresenceEvent;
use causerie_shared::{ConversationId, UserId};

struct Subscriber {
    user: UserId,
    tx: mpsc::Sender<PresenceEvent>,
}

#[derive(Default)]
struct Room {
    subscribers: HashMap<u64, Subscriber>,
}

impl Room {
    fn is_online(&self, user: UserId) -> bool {
        self.subscribers.values().any(|s| s.user == user)
    }

    /// Deliver to everyone except `origin`'s own queues. Returns how many
    /// queues accepted the event.
    fn fan_out(&self, origin: UserId, event: &PresenceEvent) -> usize {
        let mut delivered = 0;
        for (id, subscriber) in &self.subscribers {
            if subscriber.user == origin {
                continue;
            }
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => debug!(
                    subscription = id,
                    target = %subscriber.user.short(),
                    "Dropping presence event for slow subscriber"
                ),
            }
        }
        delivered
    }
}

#[derive(Default)]
struct Inner {
    rooms: RwLock<HashMap<ConversationId, Room>>,
    next_id: AtomicU64,
}

impl Inner {
    fn detach(&self, conversation: ConversationId, id: u64) {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        let Some(room) = rooms.get_mut(&conversation) else {
            return;
        };
        let Some(subscriber) = room.subscribers.remove(&id) else {
            return;
        };

        if !room.is_online(subscriber.user) {
            room.fan_out(subscriber.user, &online(conversation, subscriber.user, false));
        }
        if room.subscribers.is_empty() {
            rooms.remove(&conversation);
            debug!(conversation = %conversation, "Removed empty presence room");
        }
    }
}

fn online(conversation_id: ConversationId, user_id: UserId, online: bool) -> PresenceEvent {
    PresenceEvent::Online {
        conversation_id,
        user_id,
        online,
        at: Utc::now(),
    }
}

/// Receiving end of a presence subscription. Dropping it unsubscribes.
pub struct PresenceSubscription {
    id: u64,
    conversation: ConversationId,
    user: UserId,
    rx: mpsc::Receiver<PresenceEvent>,
    hub: Weak<Inner>,
}

impl PresenceSubscription {
    pub fn conversation(&self) -> ConversationId {
        self.conversation
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    /// Next event, or `None` once the subscription was evicted.
    pub async fn recv(&mut self) -> Option<PresenceEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PresenceEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for PresenceSubscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.detach(self.conversation, self.id);
        }
    }
}

#[derive(Clone, Default)]
pub struct PresenceHub {
    inner: Arc<Inner>,
}

impl PresenceHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `user` to a conversation. Callers check membership.
    pub fn subscribe(
        &self,
        conversation: ConversationId,
        user: UserId,
        depth: usize,
    ) -> PresenceSubscription {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut rooms = self
            .inner
            .rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let room = rooms.entry(conversation).or_default();
        if !room.is_online(user) {
            room.fan_out(user, &online(conversation, user, true));
        }
        room.subscribers.insert(id, Subscriber { user, tx });

        debug!(
            conversation = %conversation,
            user = %user.short(),
            subscribers = room.subscribers.len(),
            "Presence subscription opened"
        );

        PresenceSubscription {
            id,
            conversation,
            user,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Fire-and-forget typing notice. Returns how many queues took it.
    pub fn publish_typing(
        &self,
        conversation: ConversationId,
        user: UserId,
        is_typing: bool,
    ) -> usize {
        let rooms = self
            .inner
            .rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(room) = rooms.get(&conversation) else {
            return 0;
        };
        room.fan_out(
            user,
            &PresenceEvent::Typing {
                conversation_id: conversation,
                user_id: user,
                is_typing,
                at: Utc::now(),
            },
        )
    }

    /// Close every subscription `user` holds in the conversation.
    pub fn evict(&self, conversation: ConversationId, user: UserId) -> usize {
        let mut rooms = self
            .inner
            .rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(room) = rooms.get_mut(&conversation) else {
            return 0;
        };

        let before = room.subscribers.len();
        room.subscribers.retain(|_, s| s.user != user);
        let removed = before - room.subscribers.len();
        if removed > 0 {
            room.fan_out(user, &online(conversation, user, false));
            info!(conversation = %conversation, user = %user.short(), "Evicted presence subscriber");
        }
        if room.subscribers.is_empty() {
            rooms.remove(&conversation);
        }
        removed
    }

    /// Close every subscription of a deleted conversation.
    pub fn close(&self, conversation: ConversationId) -> usize {
        self.inner
            .rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&conversation)
            .map(|room| room.subscribers.len())
            .unwrap_or(0)
    }

    pub fn online_users(&self, conversation: ConversationId) -> Vec<UserId> {
        let rooms = self
            .inner
            .rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut users: Vec<UserId> = rooms
            .get(&conversation)
            .map(|room| room.subscribers.values().map(|s| s.user).collect())
            .unwrap_or_default();
        users.sort();
        users.dedup();
        users
    }

    pub fn room_count(&self) -> usize {
        self.inner
            .rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

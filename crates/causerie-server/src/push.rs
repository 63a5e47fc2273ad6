//! Push-notification gateway.
//!
//! Listens to engine events and turns every `MessageCreated` into one notice
//! for the recipients who have not muted the conversation. Notices go to the
//! configured webhook, or to the log when there is none. Failures are logged
//! and never retried.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use causerie_engine::Engine;
use causerie_shared::protocol::EngineEvent;
use causerie_shared::{ConversationId, MessageId, UserId};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PushNotice {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub sequence: u64,
    pub author_id: UserId,
    pub recipient_ids: Vec<UserId>,
    /// Recipients named in the message, subset of `recipient_ids`.
    pub mentioned_ids: Vec<UserId>,
}

#[derive(Clone)]
pub struct PushDispatcher {
    engine: Arc<Engine>,
    webhook_url: Option<String>,
    http_client: reqwest::Client,
}

impl PushDispatcher {
    pub fn new(engine: Arc<Engine>, webhook_url: Option<String>) -> Self {
        Self {
            engine,
            webhook_url,
            http_client: reqwest::Client::new(),
        }
    }

    /// Build the notice for an event, `None` when nobody is to be notified.
    pub async fn notice_for(&self, event: &EngineEvent) -> Option<PushNotice> {
        let EngineEvent::MessageCreated {
            conversation_id,
            message_id,
            sequence,
            author_id,
            recipient_ids,
            mentions,
        } = event
        else {
            return None;
        };

        let now = Utc::now();
        let mut targets = Vec::with_capacity(recipient_ids.len());
        for recipient in recipient_ids {
            if !self.engine.is_muted(*recipient, *conversation_id, now).await {
                targets.push(*recipient);
            }
        }
        if targets.is_empty() {
            debug!(message = %message_id, "Every recipient muted, no push");
            return None;
        }

        let mentioned_ids = mentions
            .iter()
            .copied()
            .filter(|user| targets.contains(user))
            .collect();

        Some(PushNotice {
            conversation_id: *conversation_id,
            message_id: *message_id,
            sequence: *sequence,
            author_id: *author_id,
            recipient_ids: targets,
            mentioned_ids,
        })
    }

    async fn deliver(&self, notice: PushNotice) {
        let Some(url) = &self.webhook_url else {
            info!(
                conversation = %notice.conversation_id,
                message = %notice.message_id,
                recipients = notice.recipient_ids.len(),
                "Push notice (no webhook configured)"
            );
            return;
        };

        match self.http_client.post(url).json(&notice).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(message = %notice.message_id, "Push notice delivered");
            }
            Ok(resp) => warn!(status = %resp.status(), "Push webhook rejected notice"),
            Err(e) => warn!(error = %e, "Push webhook unreachable"),
        }
    }

    /// Consume events until the engine goes away. Each notice is posted on
    /// its own task so a slow webhook never holds up the event stream.
    pub fn spawn(self, mut events: broadcast::Receiver<EngineEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Some(notice) = self.notice_for(&event).await {
                            let dispatcher = self.clone();
                            tokio::spawn(async move { dispatcher.deliver(notice).await });
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Push dispatcher lagging, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            info!("Push dispatcher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causerie_engine::{EngineConfig, MessageDraft};
    use causerie_shared::{ConversationKind, ConversationSettings};

    #[tokio::test]
    async fn muted_recipients_are_skipped() {
        let engine = Arc::new(Engine::new(EngineConfig::default()));
        let (owner, quiet, loud) = (UserId::new(), UserId::new(), UserId::new());
        let conv = engine
            .create_group(
                owner,
                ConversationKind::Group,
                None,
                &[quiet, loud],
                ConversationSettings::default(),
            )
            .await
            .unwrap();
        engine.set_mute(quiet, conv.id, true, None).await.unwrap();

        let mut events = engine.subscribe_events();
        let draft = MessageDraft {
            mentions: vec![quiet, loud],
            ..MessageDraft::text("ping")
        };
        engine.post(conv.id, owner, draft).await.unwrap();

        let dispatcher = PushDispatcher::new(engine.clone(), None);
        let event = events.recv().await.unwrap();
        let notice = dispatcher.notice_for(&event).await.unwrap();
        assert_eq!(notice.recipient_ids, vec![loud]);
        assert_eq!(notice.mentioned_ids, vec![loud]);
    }

    #[tokio::test]
    async fn other_events_produce_nothing() {
        let engine = Arc::new(Engine::new(EngineConfig::default()));
        let dispatcher = PushDispatcher::new(engine, None);
        let event = EngineEvent::MembershipChanged {
            conversation_id: ConversationId::new(),
        };
        assert!(dispatcher.notice_for(&event).await.is_none());
    }

    #[tokio::test]
    async fn dispatcher_stops_with_the_channel() {
        let engine = Arc::new(Engine::new(EngineConfig::default()));
        let (tx, rx) = broadcast::channel(4);
        let handle = PushDispatcher::new(engine, None).spawn(rx);
        drop(tx);
        handle.await.unwrap();
    }
}

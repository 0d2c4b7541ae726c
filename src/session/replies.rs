//! Reply routing: hands inbound messages to the conversation waiting on
//! that (author, channel) pair.
//!
//! Each open conversation also holds the ids of the messages it still
//! depends on (its questions and the replies routed to it), so a channel
//! cleanup running for someone else leaves them in place.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::channels::{ConversationKey, IncomingMessage, MessageId};
use crate::error::SessionError;
use crate::session::state::SessionPhase;

struct Slot {
    tx: mpsc::UnboundedSender<IncomingMessage>,
    held: HashSet<MessageId>,
}

type Waiters = HashMap<ConversationKey, Slot>;

/// Registry of active conversations.
#[derive(Clone, Default)]
pub struct ReplyRouter {
    waiters: Arc<Mutex<Waiters>>,
}

impl ReplyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` for a conversation. `None` if one is already active there.
    pub fn register(&self, key: ConversationKey) -> Option<ReplyWaiter> {
        let mut waiters = self.lock();
        if waiters.contains_key(&key) {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        waiters.insert(
            key.clone(),
            Slot {
                tx,
                held: HashSet::new(),
            },
        );
        Some(ReplyWaiter {
            key,
            rx,
            router: self.clone(),
        })
    }

    /// Route `msg` to its conversation. Gives the message back when no
    /// conversation is waiting on its (author, channel).
    pub fn deliver(&self, msg: IncomingMessage) -> Result<(), IncomingMessage> {
        let mut waiters = self.lock();
        match waiters.get_mut(&msg.conversation_key()) {
            Some(slot) => {
                let id = msg.id.clone();
                slot.tx.send(msg).map_err(|e| e.0)?;
                slot.held.insert(id);
                Ok(())
            }
            None => Err(msg),
        }
    }

    /// Messages in `channel_id` that open conversations still depend on.
    pub fn held_messages(&self, channel_id: &str) -> HashSet<MessageId> {
        self.lock()
            .iter()
            .filter(|(key, _)| key.channel_id == channel_id)
            .flat_map(|(_, slot)| slot.held.iter().cloned())
            .collect()
    }

    pub fn is_active(&self, key: &ConversationKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Receiving end for one conversation. Deregisters itself on drop.
pub struct ReplyWaiter {
    key: ConversationKey,
    rx: mpsc::UnboundedReceiver<IncomingMessage>,
    router: ReplyRouter,
}

impl ReplyWaiter {
    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    /// Keep `message_id` out of channel cleanup while this conversation is
    /// open.
    pub fn hold(&self, message_id: &str) {
        if let Some(slot) = self.router.lock().get_mut(&self.key) {
            slot.held.insert(message_id.to_string());
        }
    }

    /// Drop replies that arrived before the next prompt was posted.
    pub fn discard_pending(&mut self) -> usize {
        let mut dropped = 0;
        while let Ok(stale) = self.rx.try_recv() {
            debug!(conversation = %self.key, message = %stale.id, "Discarding stale reply");
            dropped += 1;
        }
        dropped
    }

    /// Wait for the next reply, giving up after `timeout` if one is set.
    pub async fn next(
        &mut self,
        timeout: Option<Duration>,
        phase: SessionPhase,
    ) -> Result<IncomingMessage, SessionError> {
        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.rx.recv())
                .await
                .map_err(|_| SessionError::TimedOut {
                    phase: phase.to_string(),
                    after: limit,
                })?,
            None => self.rx.recv().await,
        };
        received.ok_or_else(|| SessionError::ReplyStreamClosed {
            phase: phase.to_string(),
        })
    }
}

impl Drop for ReplyWaiter {
    fn drop(&mut self) {
        self.router.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(author: &str, channel: &str, content: &str) -> IncomingMessage {
        IncomingMessage::new(format!("{author}-{content}"), channel, author, content)
    }

    #[tokio::test]
    async fn delivers_only_to_matching_author_and_channel() {
        let router = ReplyRouter::new();
        let mut waiter = router.register(msg("u1", "c1", "").conversation_key()).unwrap();

        assert!(router.deliver(msg("u2", "c1", "other user")).is_err());
        assert!(router.deliver(msg("u1", "c2", "other channel")).is_err());
        assert!(router.deliver(msg("u1", "c1", "ARWEN")).is_ok());

        let reply = waiter.next(None, SessionPhase::initial()).await.unwrap();
        assert_eq!(reply.content, "ARWEN");
    }

    #[test]
    fn second_registration_is_refused() {
        let router = ReplyRouter::new();
        let key = msg("u1", "c1", "").conversation_key();
        let _first = router.register(key.clone()).unwrap();
        assert!(router.register(key).is_none());
    }

    #[test]
    fn drop_deregisters() {
        let router = ReplyRouter::new();
        let key = msg("u1", "c1", "").conversation_key();
        let waiter = router.register(key.clone()).unwrap();
        assert!(router.is_active(&key));
        drop(waiter);
        assert!(!router.is_active(&key));
        assert_eq!(router.active_count(), 0);
        assert!(router.deliver(msg("u1", "c1", "late")).is_err());
    }

    #[tokio::test]
    async fn held_messages_cover_routed_replies_until_drop() {
        let router = ReplyRouter::new();
        let waiter = router.register(msg("u1", "c1", "").conversation_key()).unwrap();
        let _other = router.register(msg("u2", "c2", "").conversation_key()).unwrap();

        waiter.hold("question-1");
        router.deliver(msg("u1", "c1", "answer")).unwrap();
        router.deliver(msg("u2", "c2", "elsewhere")).unwrap();

        let held = router.held_messages("c1");
        assert_eq!(held.len(), 2);
        assert!(held.contains("question-1"));
        assert!(held.contains("u1-answer"));
        assert!(!held.contains("u2-elsewhere"));

        drop(waiter);
        assert!(router.held_messages("c1").is_empty());
    }

    #[tokio::test]
    async fn timeout_reports_phase() {
        let router = ReplyRouter::new();
        let mut waiter = router.register(msg("u1", "c1", "").conversation_key()).unwrap();
        let err = waiter
            .next(Some(Duration::from_millis(10)), SessionPhase::AwaitingAttachment(1))
            .await
            .unwrap_err();
        match err {
            SessionError::TimedOut { phase, after } => {
                assert_eq!(phase, "awaiting_attachment(1)");
                assert_eq!(after, Duration::from_millis(10));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn discard_pending_clears_queue() {
        let router = ReplyRouter::new();
        let mut waiter = router.register(msg("u1", "c1", "").conversation_key()).unwrap();
        router.deliver(msg("u1", "c1", "early-1")).unwrap();
        router.deliver(msg("u1", "c1", "early-2")).unwrap();

        assert_eq!(waiter.discard_pending(), 2);

        router.deliver(msg("u1", "c1", "answer")).unwrap();
        let reply = waiter.next(None, SessionPhase::initial()).await.unwrap();
        assert_eq!(reply.content, "answer");
    }
}

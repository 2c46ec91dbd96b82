use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use confab_types::events::{Envelope, GatewayEvent, Outbound};
use confab_types::models::PresenceVisibility;

/// Capacity of each per-conversation broadcast channel.
const CONVERSATION_CHANNEL_CAPACITY: usize = 1024;

/// The connection registry and fan-out hub. Constructed once at service
/// start and injected wherever events need publishing; all delivery is
/// at-most-once and best-effort.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// user_id -> (session_id -> sender). A user may hold several live
    /// sessions; presence flips on the first and last of them.
    sessions: RwLock<HashMap<Uuid, HashMap<Uuid, mpsc::UnboundedSender<Envelope>>>>,

    /// Per-conversation broadcast channels, created lazily on first join.
    conversations: RwLock<HashMap<Uuid, broadcast::Sender<Envelope>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                sessions: RwLock::new(HashMap::new()),
                conversations: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a live session with its inbound sender. Returns
    /// (session_id, first) — `first` is true when this is the user's only
    /// session, i.e. the moment they come online.
    pub async fn register_session(
        &self,
        user_id: Uuid,
        tx: mpsc::UnboundedSender<Envelope>,
    ) -> (Uuid, bool) {
        let session_id = Uuid::new_v4();
        let mut sessions = self.inner.sessions.write().await;
        let user_sessions = sessions.entry(user_id).or_default();
        let first = user_sessions.is_empty();
        user_sessions.insert(session_id, tx);
        (session_id, first)
    }

    /// Drop a session. Returns true when it was the user's last one.
    pub async fn unregister_session(&self, user_id: Uuid, session_id: Uuid) -> bool {
        let mut sessions = self.inner.sessions.write().await;
        let Some(user_sessions) = sessions.get_mut(&user_id) else {
            return false;
        };
        user_sessions.remove(&session_id);
        if user_sessions.is_empty() {
            sessions.remove(&user_id);
            true
        } else {
            false
        }
    }

    pub async fn online_user_ids(&self) -> Vec<Uuid> {
        self.inner.sessions.read().await.keys().copied().collect()
    }

    /// Subscribe to a conversation's channel. Authorization against current
    /// membership is the caller's responsibility (checked at join time).
    pub async fn subscribe_conversation(
        &self,
        conversation_id: Uuid,
    ) -> broadcast::Receiver<Envelope> {
        let mut conversations = self.inner.conversations.write().await;
        conversations
            .entry(conversation_id)
            .or_insert_with(|| broadcast::channel(CONVERSATION_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub async fn publish(&self, outbound: Outbound) {
        match outbound {
            Outbound::ToUser { user_id, envelope } => {
                self.send_to_user(user_id, envelope).await;
            }
            Outbound::ToConversation {
                conversation_id,
                envelope,
            } => {
                self.send_to_conversation(conversation_id, envelope).await;
            }
        }
    }

    /// Publish an engine outbox. Fire-and-forget: the mutation already
    /// committed, so delivery failures only delay visibility.
    pub async fn publish_all(&self, items: Vec<Outbound>) {
        for outbound in items {
            self.publish(outbound).await;
        }
    }

    pub async fn send_to_user(&self, user_id: Uuid, envelope: Envelope) {
        let sessions = self.inner.sessions.read().await;
        if let Some(user_sessions) = sessions.get(&user_id) {
            for tx in user_sessions.values() {
                let _ = tx.send(envelope.clone());
            }
        }
    }

    async fn send_to_conversation(&self, conversation_id: Uuid, envelope: Envelope) {
        let conversations = self.inner.conversations.read().await;
        if let Some(channel) = conversations.get(&conversation_id) {
            // no receivers is fine; nobody has the room open
            let _ = channel.send(envelope);
        }
    }

    /// Presence publication, filtered by the subject's privacy setting:
    /// `everyone` reaches every connected session, `nobody` only the
    /// subject's own sessions.
    pub async fn publish_presence(
        &self,
        user_id: Uuid,
        visibility: PresenceVisibility,
        event: GatewayEvent,
    ) {
        let envelope = Envelope::new(event);
        match visibility {
            PresenceVisibility::Everyone => {
                let sessions = self.inner.sessions.read().await;
                for user_sessions in sessions.values() {
                    for tx in user_sessions.values() {
                        let _ = tx.send(envelope.clone());
                    }
                }
            }
            PresenceVisibility::Nobody => {
                self.send_to_user(user_id, envelope).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping(user_id: Uuid) -> GatewayEvent {
        GatewayEvent::PresenceUpdate {
            user_id,
            online: true,
            last_seen_at: None,
        }
    }

    #[tokio::test]
    async fn multiple_sessions_per_user() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (s1, first) = dispatcher.register_session(user, tx1).await;
        assert!(first);
        let (s2, first) = dispatcher.register_session(user, tx2).await;
        assert!(!first);

        dispatcher
            .send_to_user(user, Envelope::new(ping(user)))
            .await;
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());

        assert!(!dispatcher.unregister_session(user, s1).await);
        assert!(dispatcher.unregister_session(user, s2).await);
        assert!(dispatcher.online_user_ids().await.is_empty());
    }

    #[tokio::test]
    async fn conversation_channel_reaches_subscribers() {
        let dispatcher = Dispatcher::new();
        let conversation = Uuid::new_v4();

        let mut rx = dispatcher.subscribe_conversation(conversation).await;
        dispatcher
            .publish(Outbound::ToConversation {
                conversation_id: conversation,
                envelope: Envelope::new(ping(Uuid::new_v4())),
            })
            .await;
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn presence_nobody_stays_private() {
        let dispatcher = Dispatcher::new();
        let subject = Uuid::new_v4();
        let other = Uuid::new_v4();

        let (subject_tx, mut subject_rx) = mpsc::unbounded_channel();
        let (other_tx, mut other_rx) = mpsc::unbounded_channel();
        dispatcher.register_session(subject, subject_tx).await;
        dispatcher.register_session(other, other_tx).await;

        dispatcher
            .publish_presence(subject, PresenceVisibility::Nobody, ping(subject))
            .await;
        assert!(subject_rx.recv().await.is_some());
        assert!(other_rx.try_recv().is_err());

        dispatcher
            .publish_presence(subject, PresenceVisibility::Everyone, ping(subject))
            .await;
        assert!(other_rx.recv().await.is_some());
    }
}

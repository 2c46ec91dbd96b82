use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use confab_db::Database;
use confab_types::api::Claims;
use confab_types::events::{Envelope, GatewayCommand, GatewayEvent, Outbound};
use confab_types::models::PresenceVisibility;
use confab_types::time::{now_ts, parse_ts};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a client gets to send Identify before we hang up.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// A session subscribed to both its user channel and a conversation
/// channel receives the same envelope twice; the ring remembers the last
/// ids written to the socket so it goes out exactly once.
const DEDUP_WINDOW: usize = 128;

struct DedupRing {
    seen: HashSet<Uuid>,
    order: VecDeque<Uuid>,
}

impl DedupRing {
    fn new() -> Self {
        Self {
            seen: HashSet::with_capacity(DEDUP_WINDOW),
            order: VecDeque::with_capacity(DEDUP_WINDOW),
        }
    }

    /// True when the id has not been seen within the window.
    fn insert(&mut self, id: Uuid) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > DEDUP_WINDOW
            && let Some(evicted) = self.order.pop_front()
        {
            self.seen.remove(&evicted);
        }
        true
    }
}

/// Handle a single WebSocket connection: Identify handshake, Ready,
/// presence snapshot, then the event loop.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    let (user_id, username) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(identity) => identity,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", username, user_id);

    let ready = Envelope::new(GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    });
    if send_envelope(&mut sender, &ready).await.is_err() {
        return;
    }

    let (session_tx, session_rx) = mpsc::unbounded_channel();
    let (session_id, first) = dispatcher.register_session(user_id, session_tx.clone()).await;

    // Tell this client who is already online before announcing ourselves.
    // The snapshot honors each user's privacy setting just like live updates.
    for online_id in snapshot_visible(&db, dispatcher.online_user_ids().await, user_id) {
        let envelope = Envelope::new(GatewayEvent::PresenceUpdate {
            user_id: online_id,
            online: true,
            last_seen_at: None,
        });
        if send_envelope(&mut sender, &envelope).await.is_err() {
            dispatcher.unregister_session(user_id, session_id).await;
            return;
        }
    }

    let visibility = presence_visibility(&db, user_id);
    if first {
        dispatcher
            .publish_presence(
                user_id,
                visibility,
                GatewayEvent::PresenceUpdate {
                    user_id,
                    online: true,
                    last_seen_at: None,
                },
            )
            .await;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();

    let mut send_task = tokio::spawn(run_send_loop(sender, session_rx, pong_flag_send));

    // Read commands from the client on this task
    let mut forwarders: HashMap<Uuid, JoinHandle<()>> = HashMap::new();
    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => {
                let command = match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(command) => command,
                    Err(e) => {
                        warn!("Unparseable gateway command from {}: {}", username, e);
                        continue;
                    }
                };
                handle_command(
                    command,
                    user_id,
                    &username,
                    &dispatcher,
                    &db,
                    &session_tx,
                    &mut forwarders,
                )
                .await;
            }
            Message::Pong(_) => {
                pong_received.store(true, Ordering::Release);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Teardown: forwarders first so nothing keeps the session alive
    for (_, handle) in forwarders.drain() {
        handle.abort();
    }
    send_task.abort();
    let _ = (&mut send_task).await;

    let was_last = dispatcher.unregister_session(user_id, session_id).await;
    if was_last {
        let last_seen = now_ts();
        if let Err(e) = db.set_last_seen(&user_id.to_string(), &last_seen) {
            warn!("Failed to persist last_seen for {}: {}", user_id, e);
        }
        dispatcher
            .publish_presence(
                user_id,
                visibility,
                GatewayEvent::PresenceUpdate {
                    user_id,
                    online: false,
                    last_seen_at: Some(parse_ts(&last_seen)),
                },
            )
            .await;
    }

    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn handle_command(
    command: GatewayCommand,
    user_id: Uuid,
    username: &str,
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    session_tx: &mpsc::UnboundedSender<Envelope>,
    forwarders: &mut HashMap<Uuid, JoinHandle<()>>,
) {
    match command {
        GatewayCommand::Identify { .. } => {
            // already identified; ignore
        }
        GatewayCommand::JoinConversation { conversation_id } => {
            if forwarders.contains_key(&conversation_id) {
                return;
            }
            // authorize against current membership, never a cached view
            if !is_active_member(db, conversation_id, user_id) {
                warn!(
                    "{} denied join to conversation {}",
                    username, conversation_id
                );
                return;
            }
            let mut rx = dispatcher.subscribe_conversation(conversation_id).await;
            let tx = session_tx.clone();
            let handle = tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(envelope) => {
                            if tx.send(envelope).is_err() {
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Conversation forwarder lagged by {} events", n);
                        }
                        Err(_) => break,
                    }
                }
            });
            forwarders.insert(conversation_id, handle);
        }
        GatewayCommand::LeaveConversation { conversation_id } => {
            if let Some(handle) = forwarders.remove(&conversation_id) {
                handle.abort();
            }
        }
        GatewayCommand::Typing { conversation_id } => {
            if !forwarders.contains_key(&conversation_id) {
                return;
            }
            dispatcher
                .publish(Outbound::ToConversation {
                    conversation_id,
                    envelope: Envelope::new(GatewayEvent::Typing {
                        conversation_id,
                        user_id,
                        username: username.to_string(),
                    }),
                })
                .await;
        }
    }
}

/// Forward session events to the socket with dedup, interleaved with the
/// heartbeat.
async fn run_send_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut session_rx: mpsc::UnboundedReceiver<Envelope>,
    pong_received: Arc<AtomicBool>,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;
    let mut dedup = DedupRing::new();

    loop {
        tokio::select! {
            result = session_rx.recv() => {
                let envelope = match result {
                    Some(envelope) => envelope,
                    None => break,
                };
                if !dedup.insert(envelope.event_id) {
                    continue;
                }
                if send_envelope(&mut sender, &envelope).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if pong_received.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                if sender.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn send_envelope(
    sender: &mut SplitSink<WebSocket, Message>,
    envelope: &Envelope,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(envelope) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize gateway envelope: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    let deadline = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(message)) = receiver.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            let Ok(GatewayCommand::Identify { token }) =
                serde_json::from_str::<GatewayCommand>(&text)
            else {
                return None;
            };
            let token_data = decode::<Claims>(
                &token,
                &DecodingKey::from_secret(jwt_secret.as_bytes()),
                &Validation::default(),
            )
            .ok()?;
            return Some((token_data.claims.sub, token_data.claims.username));
        }
        None
    })
    .await;
    deadline.ok().flatten()
}

fn is_active_member(db: &Arc<Database>, conversation_id: Uuid, user_id: Uuid) -> bool {
    match db.get_membership(&conversation_id.to_string(), &user_id.to_string()) {
        Ok(Some(membership)) => membership.deleted_at.is_none(),
        Ok(None) => false,
        Err(e) => {
            warn!("Membership lookup failed during join: {}", e);
            false
        }
    }
}

/// The subset of online users whose presence `viewer` may see: never the
/// viewer themselves, never anyone whose visibility is `nobody`.
fn snapshot_visible(db: &Arc<Database>, online: Vec<Uuid>, viewer: Uuid) -> Vec<Uuid> {
    online
        .into_iter()
        .filter(|&id| id != viewer && presence_visibility(db, id) == PresenceVisibility::Everyone)
        .collect()
}

fn presence_visibility(db: &Arc<Database>, user_id: Uuid) -> PresenceVisibility {
    match db.get_user_by_id(&user_id.to_string()) {
        Ok(Some(user)) => PresenceVisibility::from_str(&user.presence_visibility),
        _ => PresenceVisibility::Everyone,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_ring_drops_repeats_within_window() {
        let mut ring = DedupRing::new();
        let id = Uuid::new_v4();
        assert!(ring.insert(id));
        assert!(!ring.insert(id));
    }

    #[test]
    fn presence_snapshot_excludes_private_users_and_self() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let viewer = Uuid::new_v4();
        let public = Uuid::new_v4();
        let private = Uuid::new_v4();
        for (id, name) in [(viewer, "viewer"), (public, "public"), (private, "private")] {
            db.create_user(&id.to_string(), name, "hash", &now_ts())
                .unwrap();
        }
        db.set_presence_visibility(&private.to_string(), "nobody")
            .unwrap();

        let visible = snapshot_visible(&db, vec![viewer, public, private], viewer);
        assert_eq!(visible, vec![public]);
    }

    #[test]
    fn dedup_ring_evicts_oldest() {
        let mut ring = DedupRing::new();
        let first = Uuid::new_v4();
        assert!(ring.insert(first));
        for _ in 0..DEDUP_WINDOW {
            assert!(ring.insert(Uuid::new_v4()));
        }
        // the first id has been evicted and would be delivered again
        assert!(ring.insert(first));
    }
}

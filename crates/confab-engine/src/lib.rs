pub mod lifecycle;
pub mod messages;
pub mod narrator;
pub mod permissions;
pub mod unread;
pub mod visibility;

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use confab_db::Database;
use confab_db::models::{ConversationRow, MembershipRow, MessageRow};
use confab_types::api::{ConversationView, MemberView, MessageView};
use confab_types::error::{Error, Result};
use confab_types::events::{Envelope, GatewayEvent, Outbound};
use confab_types::models::{ConversationKind, MessageKind, Role};
use confab_types::time::parse_ts;

/// The conversation membership, visibility and consistency engine.
///
/// Every operation runs as one unit of work against the store and returns
/// its result together with an [`Outbox`] of fan-out events. Events are
/// built only after the mutation has committed; publishing them is the
/// caller's job and is fire-and-forget.
#[derive(Clone)]
pub struct Engine {
    db: Arc<Database>,
}

impl Engine {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    // -- shared lookups --

    pub(crate) fn require_conversation(&self, id: Uuid) -> Result<ConversationRow> {
        self.db
            .get_conversation(&id.to_string())?
            .ok_or_else(|| Error::not_found("conversation not found"))
    }

    /// Conversation that still accepts mutations.
    pub(crate) fn require_live_conversation(&self, id: Uuid) -> Result<ConversationRow> {
        let conversation = self.require_conversation(id)?;
        if conversation.disbanded_at.is_some() {
            return Err(Error::forbidden("conversation is disbanded"));
        }
        Ok(conversation)
    }

    /// Membership row in any state (hidden included).
    pub(crate) fn require_membership(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<MembershipRow> {
        self.db
            .get_membership(&conversation_id.to_string(), &user_id.to_string())?
            .ok_or_else(|| Error::forbidden("not a member of this conversation"))
    }

    pub(crate) fn require_active_membership(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<MembershipRow> {
        let membership = self.require_membership(conversation_id, user_id)?;
        if membership.deleted_at.is_some() {
            return Err(Error::forbidden("not a member of this conversation"));
        }
        Ok(membership)
    }

    /// Active member ids as Uuids, for fan-out addressing.
    pub(crate) fn active_member_ids(&self, conversation_id: &str) -> Result<Vec<Uuid>> {
        Ok(self
            .db
            .list_active_member_ids(conversation_id)?
            .iter()
            .map(|id| parse_id(id))
            .collect())
    }

    // -- view assembly --

    pub(crate) fn conversation_view(&self, row: &ConversationRow) -> Result<ConversationView> {
        let members = self
            .db
            .list_memberships(&row.id)?
            .iter()
            .filter(|m| m.deleted_at.is_none())
            .map(member_view)
            .collect();
        Ok(conversation_view_with(row, members))
    }
}

pub(crate) fn conversation_view_with(
    row: &ConversationRow,
    members: Vec<MemberView>,
) -> ConversationView {
    ConversationView {
        id: parse_id(&row.id),
        kind: ConversationKind::from_str(&row.kind),
        name: row.name.clone(),
        avatar_url: row.avatar_url.clone(),
        send_policy: row.send_policy.clone(),
        add_member_policy: row.add_member_policy.clone(),
        require_approval: row.require_approval,
        disbanded_at: row.disbanded_at.as_deref().map(parse_ts),
        created_at: parse_ts(&row.created_at),
        updated_at: parse_ts(&row.updated_at),
        members,
    }
}

pub(crate) fn member_view(row: &MembershipRow) -> MemberView {
    MemberView {
        user_id: parse_id(&row.user_id),
        username: row.username.clone(),
        role: Role::from_str(&row.role),
        joined_at: parse_ts(&row.joined_at),
    }
}

pub(crate) fn message_view(row: &MessageRow) -> MessageView {
    MessageView {
        id: parse_id(&row.id),
        conversation_id: parse_id(&row.conversation_id),
        sender_id: parse_id(&row.sender_id),
        kind: MessageKind::from_str(&row.kind),
        content: row.content.clone(),
        reply_to_id: row.reply_to_id.as_deref().map(parse_id),
        is_forwarded: row.is_forwarded,
        edited_at: row.edited_at.as_deref().map(parse_ts),
        created_at: parse_ts(&row.created_at),
    }
}

pub(crate) fn parse_id(s: &str) -> Uuid {
    s.parse().unwrap_or_else(|e| {
        warn!("Corrupt id '{}': {}", s, e);
        Uuid::default()
    })
}

/// Events accumulated by one engine operation, published after commit.
#[derive(Debug, Default)]
pub struct Outbox {
    items: Vec<Outbound>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_user(&mut self, user_id: Uuid, event: GatewayEvent) {
        self.items.push(Outbound::ToUser {
            user_id,
            envelope: Envelope::new(event),
        });
    }

    /// Publish one logical event to the conversation channel and to every
    /// listed member's user channel. All copies share one envelope id so
    /// the transport can deduplicate.
    pub fn fan_out(&mut self, conversation_id: Uuid, member_ids: &[Uuid], event: GatewayEvent) {
        let envelope = Envelope::new(event);
        self.items.push(Outbound::ToConversation {
            conversation_id,
            envelope: envelope.clone(),
        });
        for &user_id in member_ids {
            self.items.push(Outbound::ToUser {
                user_id,
                envelope: envelope.clone(),
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_items(self) -> Vec<Outbound> {
        self.items
    }

    #[cfg(test)]
    pub(crate) fn items(&self) -> &[Outbound] {
        &self.items
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use confab_types::api::SendMessageRequest;
    use confab_types::models::MessageKind;
    use confab_types::time::now_ts;

    pub fn engine() -> Engine {
        Engine::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    pub fn user(engine: &Engine, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        engine
            .db()
            .create_user(&id.to_string(), name, "hash", &now_ts())
            .unwrap();
        id
    }

    pub fn befriend(engine: &Engine, a: Uuid, b: Uuid) {
        let id = Uuid::new_v4().to_string();
        engine
            .db()
            .insert_friend_request(&id, &a.to_string(), &b.to_string(), &now_ts())
            .unwrap();
        engine.db().accept_friendship(&id).unwrap();
    }

    pub fn group_with(engine: &Engine, owner: Uuid, members: &[Uuid]) -> Uuid {
        let (summary, _) = engine.create_group(owner, "room", members, None).unwrap();
        summary.conversation.id
    }

    pub fn text(content: &str) -> SendMessageRequest {
        SendMessageRequest {
            kind: MessageKind::Text,
            content: content.into(),
            reply_to_id: None,
            is_forwarded: false,
        }
    }

    /// Timestamps carry microsecond precision; a short sleep keeps
    /// ordering assertions unambiguous.
    pub fn tick() {
        std::thread::sleep(std::time::Duration::from_millis(2));
    }
}

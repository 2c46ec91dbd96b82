//! Message operations: send (with the single-chat revival rule), edit,
//! window-gated delete and recall, and offset-paginated listing under the
//! visibility predicate.

use uuid::Uuid;

use confab_db::models::MessageRow;
use confab_types::api::{MessagePage, MessageView, SendMessageRequest};
use confab_types::error::{Error, Result};
use confab_types::events::GatewayEvent;
use confab_types::models::{ConversationKind, MessageKind, Role, SYSTEM_SENDER};
use confab_types::time::{now_ts, parse_ts};

use crate::narrator::SystemAction;
use crate::{Engine, Outbox, message_view, permissions};

/// Senders may soft-delete their own message within a day of sending.
pub const MESSAGE_DELETE_WINDOW_SECS: i64 = 24 * 60 * 60;
/// Recall (delete + narrated notice) has a much tighter window.
pub const MESSAGE_RECALL_WINDOW_SECS: i64 = 2 * 60;

const MAX_PAGE_SIZE: u32 = 200;

impl Engine {
    /// Persist a message and fan it out. In single conversations any new
    /// message clears the soft-delete of every hidden membership, so the
    /// chat reappears for both parties — without moving their hidden
    /// floors. Groups never auto-restore.
    pub fn send_message(
        &self,
        actor: Uuid,
        conversation_id: Uuid,
        req: &SendMessageRequest,
    ) -> Result<(MessageView, Outbox)> {
        let conversation = self.require_conversation(conversation_id)?;
        if conversation.disbanded_at.is_some() {
            return Err(Error::forbidden("conversation is disbanded"));
        }
        let kind = ConversationKind::from_str(&conversation.kind);

        // in a single chat a hidden membership still counts: sending is
        // exactly what revives it
        let membership = match kind {
            ConversationKind::Single => self.require_membership(conversation_id, actor)?,
            ConversationKind::Group => self.require_active_membership(conversation_id, actor)?,
        };

        if kind == ConversationKind::Group
            && !permissions::can_send(
                &conversation.send_policy,
                Role::from_str(&membership.role),
                false,
            )
        {
            return Err(Error::forbidden(
                "sending is restricted in this conversation",
            ));
        }

        if req.content.is_empty() {
            return Err(Error::validation("message content must not be empty"));
        }
        if req.kind == MessageKind::System {
            return Err(Error::validation("system messages cannot be sent directly"));
        }
        if let Some(reply_to) = req.reply_to_id {
            let target = self.db.get_message(&reply_to.to_string())?;
            if !target.is_some_and(|m| {
                m.conversation_id == conversation.id && m.deleted_at.is_none()
            }) {
                return Err(Error::not_found("reply target not found"));
            }
        }

        let id = Uuid::new_v4().to_string();
        let now = now_ts();
        self.db.insert_message(
            &id,
            &conversation.id,
            &actor.to_string(),
            req.kind.as_str(),
            &req.content,
            req.reply_to_id.map(|u| u.to_string()).as_deref(),
            req.is_forwarded,
            &now,
        )?;

        if kind == ConversationKind::Single {
            self.db.restore_memberships_on_activity(&conversation.id)?;
        }
        self.db.touch_conversation(&conversation.id, &now)?;

        let row = self
            .db
            .get_message(&id)?
            .ok_or_else(|| anyhow::anyhow!("message vanished after insert"))?;
        let view = message_view(&row);
        let active = self.active_member_ids(&conversation.id)?;

        let mut outbox = Outbox::new();
        outbox.fan_out(
            conversation_id,
            &active,
            GatewayEvent::MessageCreate { message: view.clone() },
        );
        Ok((view, outbox))
    }

    pub fn edit_message(
        &self,
        actor: Uuid,
        conversation_id: Uuid,
        message_id: Uuid,
        content: &str,
    ) -> Result<(MessageView, Outbox)> {
        let conversation = self.require_live_conversation(conversation_id)?;
        self.require_active_membership(conversation_id, actor)?;
        let message = self.require_own_message(&conversation.id, actor, message_id)?;
        if content.is_empty() {
            return Err(Error::validation("message content must not be empty"));
        }

        self.db
            .update_message_content(&message.id, content, &now_ts())?;
        let row = self
            .db
            .get_message(&message.id)?
            .ok_or_else(|| anyhow::anyhow!("message vanished after update"))?;
        let view = message_view(&row);
        let active = self.active_member_ids(&conversation.id)?;

        let mut outbox = Outbox::new();
        outbox.fan_out(
            conversation_id,
            &active,
            GatewayEvent::MessageUpdate { message: view.clone() },
        );
        Ok((view, outbox))
    }

    /// Soft delete, gated by the delete window measured from creation.
    pub fn delete_message(
        &self,
        actor: Uuid,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> Result<Outbox> {
        let conversation = self.require_live_conversation(conversation_id)?;
        self.require_active_membership(conversation_id, actor)?;
        let message = self.require_own_message(&conversation.id, actor, message_id)?;
        check_window(&message, MESSAGE_DELETE_WINDOW_SECS, "delete")?;

        self.db.soft_delete_message(&message.id, &now_ts())?;
        let active = self.active_member_ids(&conversation.id)?;

        let mut outbox = Outbox::new();
        outbox.fan_out(
            conversation_id,
            &active,
            GatewayEvent::MessageDelete {
                conversation_id,
                message_id,
            },
        );
        Ok(outbox)
    }

    /// Delete plus a narrated notice in the timeline.
    pub fn recall_message(
        &self,
        actor: Uuid,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> Result<Outbox> {
        let conversation = self.require_live_conversation(conversation_id)?;
        self.require_active_membership(conversation_id, actor)?;
        let message = self.require_own_message(&conversation.id, actor, message_id)?;
        check_window(&message, MESSAGE_RECALL_WINDOW_SECS, "recall")?;

        self.db.soft_delete_message(&message.id, &now_ts())?;
        let narration = self.narrate(&conversation.id, SystemAction::MessageRecalled, actor, &[])?;
        let active = self.active_member_ids(&conversation.id)?;

        let mut outbox = Outbox::new();
        outbox.fan_out(
            conversation_id,
            &active,
            GatewayEvent::MessageDelete {
                conversation_id,
                message_id,
            },
        );
        outbox.fan_out(
            conversation_id,
            &active,
            GatewayEvent::MessageCreate { message: narration },
        );
        Ok(outbox)
    }

    /// One page of the member's visible timeline, newest first.
    pub fn list_messages(
        &self,
        actor: Uuid,
        conversation_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> Result<MessagePage> {
        self.require_conversation(conversation_id)?;
        let membership = self.require_active_membership(conversation_id, actor)?;

        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1) * page_size;

        let total = self.db.count_visible(
            &membership.conversation_id,
            membership.hidden_until.as_deref(),
            membership.deleted_at.as_deref(),
        )?;
        let rows = self.db.list_visible(
            &membership.conversation_id,
            membership.hidden_until.as_deref(),
            membership.deleted_at.as_deref(),
            page_size,
            offset,
        )?;
        let returned = rows.len() as u64;

        Ok(MessagePage {
            messages: rows.iter().map(message_view).collect(),
            page,
            page_size,
            total,
            has_more: offset as u64 + returned < total,
        })
    }

    /// The message, if it lives in this conversation, is not deleted, is
    /// not narrated, and was sent by `actor`.
    fn require_own_message(
        &self,
        conversation_id: &str,
        actor: Uuid,
        message_id: Uuid,
    ) -> Result<MessageRow> {
        let message = self
            .db
            .get_message(&message_id.to_string())?
            .filter(|m| m.conversation_id == conversation_id && m.deleted_at.is_none())
            .ok_or_else(|| Error::not_found("message not found"))?;
        if message.sender_id == SYSTEM_SENDER.to_string() {
            return Err(Error::forbidden("system messages cannot be modified"));
        }
        if message.sender_id != actor.to_string() {
            return Err(Error::forbidden("only the sender can modify a message"));
        }
        Ok(message)
    }
}

fn check_window(message: &MessageRow, window_secs: i64, what: &str) -> Result<()> {
    let age = chrono::Utc::now() - parse_ts(&message.created_at);
    if age.num_seconds() > window_secs {
        return Err(Error::validation(format!(
            "the {what} window for this message has elapsed"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use crate::Engine;
    use confab_types::time::format_ts;

    fn unread(engine: &Engine, user: Uuid, conversation: Uuid) -> u64 {
        engine
            .get_conversation_summary(user, conversation)
            .unwrap()
            .unread_count
    }

    /// Insert a message with an explicit creation time, for window tests.
    fn send_at(
        engine: &Engine,
        conversation: Uuid,
        sender: Uuid,
        content: &str,
        created_at: &str,
    ) -> Uuid {
        let id = Uuid::new_v4();
        engine
            .db()
            .insert_message(
                &id.to_string(),
                &conversation.to_string(),
                &sender.to_string(),
                "text",
                content,
                None,
                false,
                created_at,
            )
            .unwrap();
        id
    }

    #[test]
    fn single_chat_revival_scenario() {
        let engine = engine();
        let a = user(&engine, "alice");
        let b = user(&engine, "bob");
        befriend(&engine, a, b);
        let (summary, _) = engine.create_single(a, b).unwrap();
        let cid = summary.conversation.id;

        engine.send_message(a, cid, &text("old news")).unwrap();
        tick();
        engine.hide_conversation(b, cid).unwrap();
        tick();

        engine.send_message(a, cid, &text("hi")).unwrap();

        // B is restored, but their floor still hides everything pre-hide
        let membership = engine
            .db()
            .get_membership(&cid.to_string(), &b.to_string())
            .unwrap()
            .unwrap();
        assert!(membership.deleted_at.is_none());
        assert!(membership.hidden_until.is_some());

        let page = engine.list_messages(b, cid, 1, 50).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.messages[0].content, "hi");
        assert_eq!(unread(&engine, b, cid), 1);

        let (marker, _) = engine.mark_read(b, cid, None).unwrap();
        assert!(marker.is_some());
        assert_eq!(unread(&engine, b, cid), 0);
    }

    #[test]
    fn group_never_auto_restores() {
        let engine = engine();
        let o = user(&engine, "owner");
        let m1 = user(&engine, "m1");
        let cid = group_with(&engine, o, &[m1]);

        engine.remove_member(o, cid, m1).unwrap();
        engine.send_message(o, cid, &text("still here?")).unwrap();

        let membership = engine
            .db()
            .get_membership(&cid.to_string(), &m1.to_string())
            .unwrap()
            .unwrap();
        assert!(membership.deleted_at.is_some());
        assert!(matches!(
            engine.list_messages(m1, cid, 1, 50),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn unread_excludes_own_and_deleted_messages() {
        let engine = engine();
        let a = user(&engine, "alice");
        let b = user(&engine, "bob");
        befriend(&engine, a, b);
        let cid = engine.create_single(a, b).unwrap().0.conversation.id;

        engine.send_message(a, cid, &text("one")).unwrap();
        tick();
        let (mine, _) = engine.send_message(b, cid, &text("mine")).unwrap();
        tick();
        let (two, _) = engine.send_message(a, cid, &text("two")).unwrap();

        // B's own message does not count
        assert_eq!(unread(&engine, b, cid), 2);

        engine.delete_message(a, cid, two.id).unwrap();
        assert_eq!(unread(&engine, b, cid), 1);
        let _ = mine;
    }

    #[test]
    fn unread_falls_back_when_marker_is_deleted() {
        let engine = engine();
        let a = user(&engine, "alice");
        let b = user(&engine, "bob");
        befriend(&engine, a, b);
        let cid = engine.create_single(a, b).unwrap().0.conversation.id;

        let (m1, _) = engine.send_message(a, cid, &text("m1")).unwrap();
        tick();
        let (m2, _) = engine.send_message(a, cid, &text("m2")).unwrap();
        tick();
        engine.send_message(a, cid, &text("m3")).unwrap();

        engine.mark_read(b, cid, Some(m2.id)).unwrap();
        assert_eq!(unread(&engine, b, cid), 1);

        // marker gone from the visible timeline -> conservative full count
        engine.delete_message(a, cid, m2.id).unwrap();
        assert_eq!(unread(&engine, b, cid), 2);
        let _ = m1;
    }

    #[test]
    fn mark_read_never_regresses() {
        let engine = engine();
        let a = user(&engine, "alice");
        let b = user(&engine, "bob");
        befriend(&engine, a, b);
        let cid = engine.create_single(a, b).unwrap().0.conversation.id;

        let (m1, _) = engine.send_message(a, cid, &text("m1")).unwrap();
        tick();
        engine.send_message(a, cid, &text("m2")).unwrap();

        let (marker, _) = engine.mark_read(b, cid, None).unwrap();
        let latest = marker.unwrap();
        assert_eq!(unread(&engine, b, cid), 0);

        // pointing the marker backwards is a no-op
        let (marker, outbox) = engine.mark_read(b, cid, Some(m1.id)).unwrap();
        assert_eq!(marker, Some(latest));
        assert!(outbox.is_empty());
        assert_eq!(unread(&engine, b, cid), 0);
    }

    #[test]
    fn read_receipt_status_is_monotonic() {
        let engine = engine();
        let a = user(&engine, "alice");
        let b = user(&engine, "bob");
        befriend(&engine, a, b);
        let cid = engine.create_single(a, b).unwrap().0.conversation.id;

        let (m1, _) = engine.send_message(a, cid, &text("m1")).unwrap();
        engine.mark_read(b, cid, None).unwrap();
        engine.mark_read(b, cid, Some(m1.id)).unwrap();

        let status = engine
            .db()
            .get_delivery_status(&m1.id.to_string(), &b.to_string())
            .unwrap()
            .unwrap();
        assert_eq!(status.0, "read");
    }

    #[test]
    fn delete_window_elapses() {
        let engine = engine();
        let a = user(&engine, "alice");
        let b = user(&engine, "bob");
        befriend(&engine, a, b);
        let cid = engine.create_single(a, b).unwrap().0.conversation.id;

        let stale = format_ts(chrono::Utc::now() - chrono::Duration::hours(25));
        let old = send_at(&engine, cid, a, "ancient", &stale);
        assert!(matches!(
            engine.delete_message(a, cid, old),
            Err(Error::Validation(_))
        ));

        let (fresh, _) = engine.send_message(a, cid, &text("fresh")).unwrap();
        engine.delete_message(a, cid, fresh.id).unwrap();
    }

    #[test]
    fn recall_window_is_tight_and_narrates() {
        let engine = engine();
        let a = user(&engine, "alice");
        let b = user(&engine, "bob");
        befriend(&engine, a, b);
        let cid = engine.create_single(a, b).unwrap().0.conversation.id;

        let stale = format_ts(chrono::Utc::now() - chrono::Duration::minutes(3));
        let old = send_at(&engine, cid, a, "too old", &stale);
        assert!(matches!(
            engine.recall_message(a, cid, old),
            Err(Error::Validation(_))
        ));

        let (fresh, _) = engine.send_message(a, cid, &text("oops")).unwrap();
        tick();
        engine.recall_message(a, cid, fresh.id).unwrap();

        let page = engine.list_messages(a, cid, 1, 50).unwrap();
        assert!(page.messages.iter().all(|m| m.id != fresh.id));
        let narration = page
            .messages
            .iter()
            .find(|m| m.kind == MessageKind::System)
            .expect("recall narration present");
        assert!(narration.content.contains("message_recalled"));
    }

    #[test]
    fn only_the_sender_edits_or_deletes() {
        let engine = engine();
        let a = user(&engine, "alice");
        let b = user(&engine, "bob");
        befriend(&engine, a, b);
        let cid = engine.create_single(a, b).unwrap().0.conversation.id;

        let (m, _) = engine.send_message(a, cid, &text("original")).unwrap();
        assert!(matches!(
            engine.edit_message(b, cid, m.id, "hijacked"),
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            engine.delete_message(b, cid, m.id),
            Err(Error::Forbidden(_))
        ));

        let (edited, _) = engine.edit_message(a, cid, m.id, "fixed").unwrap();
        assert_eq!(edited.content, "fixed");
        assert!(edited.edited_at.is_some());
    }

    #[test]
    fn send_policy_admins_only() {
        let engine = engine();
        let o = user(&engine, "owner");
        let m1 = user(&engine, "m1");
        let cid = group_with(&engine, o, &[m1]);

        let patch = confab_types::api::UpdateConversationRequest {
            send_policy: Some("admins_only".into()),
            ..Default::default()
        };
        engine.update_conversation(o, cid, &patch).unwrap();

        assert!(matches!(
            engine.send_message(m1, cid, &text("nope")),
            Err(Error::Forbidden(_))
        ));
        engine.send_message(o, cid, &text("fine")).unwrap();
    }

    #[test]
    fn reply_target_must_share_the_conversation() {
        let engine = engine();
        let a = user(&engine, "alice");
        let b = user(&engine, "bob");
        befriend(&engine, a, b);
        let cid = engine.create_single(a, b).unwrap().0.conversation.id;
        let other = group_with(&engine, a, &[b]);
        let (foreign, _) = engine.send_message(a, other, &text("elsewhere")).unwrap();

        let req = SendMessageRequest {
            reply_to_id: Some(foreign.id),
            ..text("reply")
        };
        assert!(matches!(
            engine.send_message(a, cid, &req),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn pagination_has_more() {
        let engine = engine();
        let a = user(&engine, "alice");
        let b = user(&engine, "bob");
        befriend(&engine, a, b);
        let cid = engine.create_single(a, b).unwrap().0.conversation.id;

        for i in 0..5 {
            engine.send_message(a, cid, &text(&format!("m{i}"))).unwrap();
            tick();
        }

        let first = engine.list_messages(a, cid, 1, 2).unwrap();
        assert_eq!(first.messages.len(), 2);
        assert_eq!(first.total, 5);
        assert!(first.has_more);
        // newest first
        assert_eq!(first.messages[0].content, "m4");

        let last = engine.list_messages(a, cid, 3, 2).unwrap();
        assert_eq!(last.messages.len(), 1);
        assert!(!last.has_more);
        assert_eq!(last.messages[0].content, "m0");
    }
}

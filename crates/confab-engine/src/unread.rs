//! Unread derivation and read-marker advancement.
//!
//! The unread count for member M is the number of visible messages authored
//! by others, strictly after M's last-read marker in (created_at, id) order.
//! A marker that no longer resolves to a message in M's visible timeline
//! (deleted, below the hidden floor, or M's own message) degrades to the
//! conservative full count.

use uuid::Uuid;

use confab_db::models::MembershipRow;
use confab_types::error::{Error, Result};
use confab_types::events::GatewayEvent;
use confab_types::time::now_ts;

use crate::{Engine, Outbox, parse_id, visibility};

impl Engine {
    pub(crate) fn unread_count(&self, membership: &MembershipRow) -> Result<u64> {
        let marker = self.resolve_marker(membership)?;
        let count = self.db.count_unread(
            &membership.conversation_id,
            &membership.user_id,
            membership.hidden_until.as_deref(),
            membership.deleted_at.as_deref(),
            marker.as_ref().map(|(c, i)| (c.as_str(), i.as_str())),
        )?;
        Ok(count)
    }

    /// The (created_at, id) position of the member's last-read message, if
    /// that message is still part of their visible timeline.
    fn resolve_marker(&self, membership: &MembershipRow) -> Result<Option<(String, String)>> {
        let Some(marker_id) = &membership.last_read_message_id else {
            return Ok(None);
        };
        match self.db.get_message(marker_id)? {
            Some(m)
                if m.conversation_id == membership.conversation_id
                    && m.sender_id != membership.user_id
                    && visibility::message_visible(&m, membership) =>
            {
                Ok(Some((m.created_at, m.id)))
            }
            _ => Ok(None),
        }
    }

    /// Advance the last-read marker. With no target the marker jumps to the
    /// most recent visible message by someone else; with a target it only
    /// ever moves forward. Upserts a `read` delivery status for the marker.
    pub fn mark_read(
        &self,
        actor: Uuid,
        conversation_id: Uuid,
        message_id: Option<Uuid>,
    ) -> Result<(Option<Uuid>, Outbox)> {
        self.require_conversation(conversation_id)?;
        let membership = self.require_active_membership(conversation_id, actor)?;
        let cid = conversation_id.to_string();

        let target = match message_id {
            Some(mid) => {
                let row = self
                    .db
                    .get_message(&mid.to_string())?
                    .filter(|m| m.conversation_id == cid)
                    .ok_or_else(|| Error::not_found("message not found"))?;
                // never regress the marker
                if let Some((marker_created, marker_id)) = self.resolve_marker(&membership)?
                    && (row.created_at.as_str(), row.id.as_str())
                        < (marker_created.as_str(), marker_id.as_str())
                {
                    return Ok((membership.last_read_message_id.as_deref().map(parse_id), Outbox::new()));
                }
                Some(row)
            }
            None => self.db.latest_visible(
                &cid,
                membership.hidden_until.as_deref(),
                membership.deleted_at.as_deref(),
                Some(&membership.user_id),
            )?,
        };

        let Some(target) = target else {
            // nothing to read yet
            return Ok((None, Outbox::new()));
        };

        self.db.set_last_read(&cid, &membership.user_id, &target.id)?;
        self.db.upsert_delivery_read(
            &Uuid::new_v4().to_string(),
            &target.id,
            &membership.user_id,
            &now_ts(),
        )?;

        let marker = parse_id(&target.id);
        let mut outbox = Outbox::new();
        outbox.fan_out(
            conversation_id,
            &[],
            GatewayEvent::ReadReceipt {
                conversation_id,
                user_id: actor,
                message_id: marker,
            },
        );
        Ok((Some(marker), outbox))
    }
}

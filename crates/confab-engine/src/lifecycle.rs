//! Conversation and membership lifecycle: create/reuse, add/remove/restore,
//! role changes, ownership transfer, disband, plus per-member conversation
//! state (hide, pin, mute) and list/get with derived unread counts.

use chrono::Duration;
use uuid::Uuid;

use confab_db::models::{ConversationRow, MembershipRow};
use confab_types::api::{ConversationSummary, ConversationView, UpdateConversationRequest};
use confab_types::error::{Error, Result};
use confab_types::events::GatewayEvent;
use confab_types::models::{ConversationKind, Role};
use confab_types::time::{FAR_FUTURE, format_ts, now_ts};

use crate::narrator::SystemAction;
use crate::{Engine, Outbox, message_view, parse_id, permissions};

/// A member may pin at most this many conversations.
pub const PINNED_LIMIT: u64 = 5;

fn single_key(a: Uuid, b: Uuid) -> String {
    let (a, b) = (a.to_string(), b.to_string());
    if a <= b { format!("{a}:{b}") } else { format!("{b}:{a}") }
}

impl Engine {
    // -- creation --

    /// Idempotent 1:1 creation. Requires an accepted friendship. Reuse of
    /// an existing pair conversation restores only the caller's visibility;
    /// the peer stays hidden until new activity. On a fresh create the peer
    /// starts hidden behind a floor at the creation instant.
    pub fn create_single(
        &self,
        caller: Uuid,
        peer: Uuid,
    ) -> Result<(ConversationSummary, Outbox)> {
        if caller == peer {
            return Err(Error::validation("cannot start a conversation with yourself"));
        }
        if self.db.get_user_by_id(&peer.to_string())?.is_none() {
            return Err(Error::not_found("user not found"));
        }
        if !self
            .db
            .friendship_accepted(&caller.to_string(), &peer.to_string())?
        {
            return Err(Error::forbidden("users are not friends"));
        }

        let key = single_key(caller, peer);
        let (conversation, created) = self.db.find_or_create_single(
            &Uuid::new_v4().to_string(),
            &key,
            &caller.to_string(),
            &Uuid::new_v4().to_string(),
            &peer.to_string(),
            &Uuid::new_v4().to_string(),
            &now_ts(),
        )?;
        if !created {
            self.db
                .unhide_membership(&conversation.id, &caller.to_string())?;
        }

        let membership = self.require_membership(parse_id(&conversation.id), caller)?;
        let summary = self.summarize(&conversation, &membership)?;

        let mut outbox = Outbox::new();
        outbox.to_user(
            caller,
            GatewayEvent::ConversationCreate {
                conversation: summary.conversation.clone(),
            },
        );
        Ok((summary, outbox))
    }

    pub fn create_group(
        &self,
        owner: Uuid,
        name: &str,
        member_ids: &[Uuid],
        avatar_url: Option<&str>,
    ) -> Result<(ConversationSummary, Outbox)> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("group name must not be empty"));
        }

        let mut members: Vec<Uuid> = Vec::new();
        for &id in member_ids {
            if id != owner && !members.contains(&id) {
                members.push(id);
            }
        }
        for id in &members {
            if self.db.get_user_by_id(&id.to_string())?.is_none() {
                return Err(Error::not_found(format!("user {id} not found")));
            }
        }

        let conversation_id = Uuid::new_v4();
        let cid = conversation_id.to_string();
        let now = now_ts();
        self.db.insert_conversation(
            &cid,
            ConversationKind::Group.as_str(),
            Some(name),
            avatar_url,
            None,
            &now,
        )?;
        self.db.insert_membership(
            &Uuid::new_v4().to_string(),
            &cid,
            &owner.to_string(),
            Role::Owner.as_str(),
            &now,
            None,
            None,
        )?;
        for id in &members {
            self.db.insert_membership(
                &Uuid::new_v4().to_string(),
                &cid,
                &id.to_string(),
                Role::Member.as_str(),
                &now,
                None,
                None,
            )?;
        }

        let narration = self.narrate(&cid, SystemAction::GroupCreated, owner, &members)?;

        let conversation = self
            .db
            .get_conversation(&cid)?
            .ok_or_else(|| anyhow::anyhow!("conversation vanished after insert"))?;
        let membership = self.require_membership(conversation_id, owner)?;
        let summary = self.summarize(&conversation, &membership)?;

        let mut recipients = members.clone();
        recipients.push(owner);
        let mut outbox = Outbox::new();
        outbox.fan_out(
            conversation_id,
            &recipients,
            GatewayEvent::ConversationCreate {
                conversation: summary.conversation.clone(),
            },
        );
        outbox.fan_out(
            conversation_id,
            &recipients,
            GatewayEvent::MessageCreate { message: narration },
        );
        Ok((summary, outbox))
    }

    // -- membership mutations --

    /// Add (or restore) members to a group. Active members are skipped,
    /// previously-removed members are readmitted with both visibility
    /// fields cleared. Narrates only the users actually added.
    pub fn add_members(
        &self,
        actor: Uuid,
        conversation_id: Uuid,
        user_ids: &[Uuid],
    ) -> Result<(Vec<Uuid>, Outbox)> {
        let conversation = self.require_live_group(conversation_id)?;
        let membership = self.require_active_membership(conversation_id, actor)?;
        if !permissions::can_add_member(
            &conversation.add_member_policy,
            Role::from_str(&membership.role),
        ) {
            return Err(Error::forbidden(
                "adding members is restricted in this conversation",
            ));
        }

        // validate the whole batch before the first mutation; one unknown id
        // must not leave the ids before it readmitted
        let mut candidates: Vec<Uuid> = Vec::new();
        for &id in user_ids {
            if candidates.contains(&id) {
                continue;
            }
            if self.db.get_user_by_id(&id.to_string())?.is_none() {
                return Err(Error::not_found(format!("user {id} not found")));
            }
            candidates.push(id);
        }

        let now = now_ts();
        let mut added: Vec<Uuid> = Vec::new();
        for &id in &candidates {
            match self.db.get_membership(&conversation.id, &id.to_string())? {
                Some(existing) if existing.deleted_at.is_none() => continue,
                Some(_) => {
                    self.db.readmit_membership(
                        &conversation.id,
                        &id.to_string(),
                        Role::Member.as_str(),
                    )?;
                }
                None => {
                    self.db.insert_membership(
                        &Uuid::new_v4().to_string(),
                        &conversation.id,
                        &id.to_string(),
                        Role::Member.as_str(),
                        &now,
                        None,
                        None,
                    )?;
                }
            }
            added.push(id);
        }

        if added.is_empty() {
            return Ok((added, Outbox::new()));
        }

        let narration = self.narrate(&conversation.id, SystemAction::MembersInvited, actor, &added)?;
        let view = self.conversation_view(&self.require_conversation(conversation_id)?)?;
        let active = self.active_member_ids(&conversation.id)?;

        let mut outbox = Outbox::new();
        outbox.fan_out(
            conversation_id,
            &active,
            GatewayEvent::MemberAdd {
                conversation_id,
                user_ids: added.clone(),
            },
        );
        outbox.fan_out(
            conversation_id,
            &active,
            GatewayEvent::MessageCreate { message: narration },
        );
        // the newcomers also need the conversation itself
        for &id in &added {
            outbox.to_user(
                id,
                GatewayEvent::ConversationCreate {
                    conversation: view.clone(),
                },
            );
        }
        Ok((added, outbox))
    }

    pub fn remove_member(
        &self,
        actor: Uuid,
        conversation_id: Uuid,
        target: Uuid,
    ) -> Result<Outbox> {
        let conversation = self.require_live_group(conversation_id)?;
        let actor_membership = self.require_active_membership(conversation_id, actor)?;
        if target == actor {
            return Err(Error::validation("cannot remove yourself; leave instead"));
        }
        let target_membership = self
            .db
            .get_membership(&conversation.id, &target.to_string())?
            .filter(|m| m.deleted_at.is_none())
            .ok_or_else(|| Error::not_found("member not found"))?;

        let actor_role = Role::from_str(&actor_membership.role);
        let target_role = Role::from_str(&target_membership.role);
        if !matches!(actor_role, Role::Admin | Role::Owner) {
            return Err(Error::forbidden("only admins can remove members"));
        }
        if target_role == Role::Owner {
            return Err(Error::forbidden("the owner cannot be removed"));
        }
        if actor_role == Role::Admin && target_role == Role::Admin {
            return Err(Error::forbidden("an admin cannot remove another admin"));
        }

        self.db
            .hide_membership(&conversation.id, &target.to_string(), &now_ts())?;
        let narration = self.narrate(&conversation.id, SystemAction::MemberRemoved, actor, &[target])?;
        let active = self.active_member_ids(&conversation.id)?;

        let mut outbox = Outbox::new();
        outbox.fan_out(
            conversation_id,
            &active,
            GatewayEvent::MemberRemove {
                conversation_id,
                user_id: target,
            },
        );
        // tell the removed user's own sessions to drop the conversation
        outbox.to_user(
            target,
            GatewayEvent::MemberRemove {
                conversation_id,
                user_id: target,
            },
        );
        outbox.fan_out(
            conversation_id,
            &active,
            GatewayEvent::MessageCreate { message: narration },
        );
        Ok(outbox)
    }

    /// Self-service exit. Owners must transfer or disband first. The
    /// narrated "left" message is not delivered to the leaver.
    pub fn leave(&self, actor: Uuid, conversation_id: Uuid) -> Result<Outbox> {
        let conversation = self.require_live_group(conversation_id)?;
        let membership = self.require_active_membership(conversation_id, actor)?;
        if Role::from_str(&membership.role) == Role::Owner {
            return Err(Error::forbidden(
                "the owner must transfer ownership or disband first",
            ));
        }

        self.db
            .hide_membership(&conversation.id, &actor.to_string(), &now_ts())?;
        let narration = self.narrate(&conversation.id, SystemAction::MemberLeft, actor, &[])?;
        let active = self.active_member_ids(&conversation.id)?;

        let mut outbox = Outbox::new();
        outbox.fan_out(
            conversation_id,
            &active,
            GatewayEvent::MemberRemove {
                conversation_id,
                user_id: actor,
            },
        );
        outbox.fan_out(
            conversation_id,
            &active,
            GatewayEvent::MessageCreate { message: narration },
        );
        Ok(outbox)
    }

    /// Only the owner changes roles, never their own, and never to/from
    /// owner — that path is `transfer_ownership`.
    pub fn update_role(
        &self,
        actor: Uuid,
        conversation_id: Uuid,
        target: Uuid,
        role: Role,
    ) -> Result<Outbox> {
        let conversation = self.require_live_group(conversation_id)?;
        let actor_membership = self.require_active_membership(conversation_id, actor)?;
        if Role::from_str(&actor_membership.role) != Role::Owner {
            return Err(Error::forbidden("only the owner can change roles"));
        }
        if target == actor {
            return Err(Error::validation("cannot change your own role"));
        }
        if role == Role::Owner {
            return Err(Error::validation(
                "the owner role is assigned via ownership transfer",
            ));
        }
        self.db
            .get_membership(&conversation.id, &target.to_string())?
            .filter(|m| m.deleted_at.is_none())
            .ok_or_else(|| Error::not_found("member not found"))?;

        self.db
            .update_role(&conversation.id, &target.to_string(), role.as_str())?;
        let narration = self.narrate(&conversation.id, SystemAction::RoleChanged, actor, &[target])?;
        let active = self.active_member_ids(&conversation.id)?;

        let mut outbox = Outbox::new();
        outbox.fan_out(
            conversation_id,
            &active,
            GatewayEvent::RoleUpdate {
                conversation_id,
                user_id: target,
                role,
            },
        );
        outbox.fan_out(
            conversation_id,
            &active,
            GatewayEvent::MessageCreate { message: narration },
        );
        Ok(outbox)
    }

    /// Atomic: old owner demoted to admin, target promoted, one
    /// transaction. Exactly one owner exists at every observable point.
    pub fn transfer_ownership(
        &self,
        actor: Uuid,
        conversation_id: Uuid,
        target: Uuid,
    ) -> Result<Outbox> {
        let conversation = self.require_live_group(conversation_id)?;
        let actor_membership = self.require_active_membership(conversation_id, actor)?;
        if Role::from_str(&actor_membership.role) != Role::Owner {
            return Err(Error::forbidden("only the owner can transfer ownership"));
        }
        if target == actor {
            return Err(Error::validation("cannot transfer ownership to yourself"));
        }
        self.db
            .get_membership(&conversation.id, &target.to_string())?
            .filter(|m| m.deleted_at.is_none())
            .ok_or_else(|| Error::not_found("member not found"))?;

        self.db
            .transfer_owner(&conversation.id, &actor.to_string(), &target.to_string())?;
        let narration =
            self.narrate(&conversation.id, SystemAction::OwnershipTransferred, actor, &[target])?;
        let active = self.active_member_ids(&conversation.id)?;

        let mut outbox = Outbox::new();
        outbox.fan_out(
            conversation_id,
            &active,
            GatewayEvent::OwnershipTransfer {
                conversation_id,
                old_owner_id: actor,
                new_owner_id: target,
            },
        );
        outbox.fan_out(
            conversation_id,
            &active,
            GatewayEvent::MessageCreate { message: narration },
        );
        Ok(outbox)
    }

    /// Terminal. History stays in the store for audit, but every active
    /// membership is hidden behind a distant-future floor and no further
    /// mutation is accepted.
    pub fn disband(&self, actor: Uuid, conversation_id: Uuid) -> Result<Outbox> {
        let conversation = self.require_live_group(conversation_id)?;
        let membership = self.require_active_membership(conversation_id, actor)?;
        if Role::from_str(&membership.role) != Role::Owner {
            return Err(Error::forbidden("only the owner can disband the group"));
        }

        let recipients = self.active_member_ids(&conversation.id)?;
        // audit row first; it lands below everyone's new floor
        self.narrate(&conversation.id, SystemAction::GroupDisbanded, actor, &[])?;
        self.db
            .disband_conversation(&conversation.id, &now_ts(), FAR_FUTURE)?;

        let mut outbox = Outbox::new();
        outbox.fan_out(
            conversation_id,
            &recipients,
            GatewayEvent::ConversationDisband { conversation_id },
        );
        Ok(outbox)
    }

    /// Group profile and policy changes. Profile edits need admin, policy
    /// and approval-flag edits need the owner.
    pub fn update_conversation(
        &self,
        actor: Uuid,
        conversation_id: Uuid,
        patch: &UpdateConversationRequest,
    ) -> Result<(ConversationView, Outbox)> {
        let conversation = self.require_live_group(conversation_id)?;
        let membership = self.require_active_membership(conversation_id, actor)?;
        let role = Role::from_str(&membership.role);

        let changes_policy = patch.send_policy.is_some()
            || patch.add_member_policy.is_some()
            || patch.require_approval.is_some();
        if changes_policy && role != Role::Owner {
            return Err(Error::forbidden("only the owner can change policies"));
        }
        if !matches!(role, Role::Admin | Role::Owner) {
            return Err(Error::forbidden("only admins can update the group"));
        }

        let name = patch.name.clone().or(conversation.name.clone());
        let avatar_url = patch.avatar_url.clone().or(conversation.avatar_url.clone());
        let send_policy = patch
            .send_policy
            .clone()
            .unwrap_or(conversation.send_policy.clone());
        let add_member_policy = patch
            .add_member_policy
            .clone()
            .unwrap_or(conversation.add_member_policy.clone());
        let require_approval = patch
            .require_approval
            .unwrap_or(conversation.require_approval);

        self.db.update_conversation_settings(
            &conversation.id,
            name.as_deref(),
            avatar_url.as_deref(),
            &send_policy,
            &add_member_policy,
            require_approval,
            &now_ts(),
        )?;

        let view = self.conversation_view(&self.require_conversation(conversation_id)?)?;
        let active = self.active_member_ids(&conversation.id)?;
        let mut outbox = Outbox::new();
        outbox.fan_out(
            conversation_id,
            &active,
            GatewayEvent::ConversationUpdate {
                conversation: view.clone(),
            },
        );
        Ok((view, outbox))
    }

    // -- per-member conversation state --

    /// Visibility Ledger `hide`: the conversation disappears from the
    /// caller's list and everything at or before this instant stays
    /// invisible to them even if the conversation later reappears.
    pub fn hide_conversation(&self, actor: Uuid, conversation_id: Uuid) -> Result<()> {
        let conversation = self.require_conversation(conversation_id)?;
        self.require_membership(conversation_id, actor)?;
        self.db
            .hide_membership(&conversation.id, &actor.to_string(), &now_ts())?;
        Ok(())
    }

    /// Toggling twice returns the membership to its original state.
    pub fn toggle_pin(&self, actor: Uuid, conversation_id: Uuid) -> Result<bool> {
        self.require_conversation(conversation_id)?;
        let membership = self.require_active_membership(conversation_id, actor)?;
        if membership.pinned {
            self.db
                .set_pinned(&membership.conversation_id, &membership.user_id, false, None)?;
            Ok(false)
        } else {
            let pinned = self.db.try_pin(
                &membership.conversation_id,
                &membership.user_id,
                &now_ts(),
                PINNED_LIMIT,
            )?;
            if !pinned {
                return Err(Error::validation(format!(
                    "pinned conversation limit reached ({PINNED_LIMIT})"
                )));
            }
            Ok(true)
        }
    }

    /// No duration means indefinite, encoded with the far-future sentinel.
    pub fn mute(
        &self,
        actor: Uuid,
        conversation_id: Uuid,
        duration_secs: Option<i64>,
    ) -> Result<()> {
        self.require_conversation(conversation_id)?;
        let membership = self.require_active_membership(conversation_id, actor)?;
        let until = match duration_secs {
            Some(secs) if secs <= 0 => {
                return Err(Error::validation("mute duration must be positive"));
            }
            Some(secs) => format_ts(chrono::Utc::now() + Duration::seconds(secs)),
            None => FAR_FUTURE.to_string(),
        };
        self.db
            .set_muted_until(&membership.conversation_id, &membership.user_id, Some(&until))?;
        Ok(())
    }

    pub fn unmute(&self, actor: Uuid, conversation_id: Uuid) -> Result<()> {
        self.require_conversation(conversation_id)?;
        let membership = self.require_active_membership(conversation_id, actor)?;
        self.db
            .set_muted_until(&membership.conversation_id, &membership.user_id, None)?;
        Ok(())
    }

    // -- reads --

    pub fn list_conversations(&self, user: Uuid) -> Result<Vec<ConversationSummary>> {
        let rows = self.db.list_user_conversations(&user.to_string())?;
        let mut summaries = Vec::with_capacity(rows.len());
        for (conversation, membership) in &rows {
            summaries.push(self.summarize(conversation, membership)?);
        }
        Ok(summaries)
    }

    pub fn get_conversation_summary(
        &self,
        user: Uuid,
        conversation_id: Uuid,
    ) -> Result<ConversationSummary> {
        let conversation = self.require_conversation(conversation_id)?;
        let membership = self.require_active_membership(conversation_id, user)?;
        self.summarize(&conversation, &membership)
    }

    pub(crate) fn summarize(
        &self,
        conversation: &ConversationRow,
        membership: &MembershipRow,
    ) -> Result<ConversationSummary> {
        let view = self.conversation_view(conversation)?;
        let unread_count = self.unread_count(membership)?;
        let last_message = self.db.latest_visible(
            &conversation.id,
            membership.hidden_until.as_deref(),
            membership.deleted_at.as_deref(),
            None,
        )?;
        Ok(ConversationSummary {
            conversation: view,
            role: Role::from_str(&membership.role),
            pinned: membership.pinned,
            pinned_at: membership.pinned_at.as_deref().map(confab_types::time::parse_ts),
            muted_until: membership.muted_until.as_deref().map(confab_types::time::parse_ts),
            last_read_message_id: membership.last_read_message_id.as_deref().map(parse_id),
            unread_count,
            last_message: last_message.as_ref().map(message_view),
        })
    }

    fn require_live_group(&self, conversation_id: Uuid) -> Result<ConversationRow> {
        let conversation = self.require_live_conversation(conversation_id)?;
        if ConversationKind::from_str(&conversation.kind) != ConversationKind::Group {
            return Err(Error::validation("not a group conversation"));
        }
        Ok(conversation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    fn owner_count(engine: &Engine, conversation: Uuid) -> usize {
        engine
            .db()
            .list_memberships(&conversation.to_string())
            .unwrap()
            .iter()
            .filter(|m| m.role == "owner")
            .count()
    }

    #[test]
    fn create_single_requires_friendship() {
        let engine = engine();
        let a = user(&engine, "alice");
        let b = user(&engine, "bob");
        assert!(matches!(
            engine.create_single(a, b),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn create_single_with_self_rejected() {
        let engine = engine();
        let a = user(&engine, "alice");
        assert!(matches!(
            engine.create_single(a, a),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn create_single_peer_starts_hidden() {
        let engine = engine();
        let a = user(&engine, "alice");
        let b = user(&engine, "bob");
        befriend(&engine, a, b);

        let (summary, _) = engine.create_single(a, b).unwrap();
        let cid = summary.conversation.id.to_string();

        let caller = engine.db().get_membership(&cid, &a.to_string()).unwrap().unwrap();
        assert!(caller.deleted_at.is_none());
        assert!(caller.hidden_until.is_none());

        let peer = engine.db().get_membership(&cid, &b.to_string()).unwrap().unwrap();
        assert!(peer.deleted_at.is_some());
        assert!(peer.hidden_until.is_some());
    }

    #[test]
    fn create_single_reuse_restores_caller_only() {
        let engine = engine();
        let a = user(&engine, "alice");
        let b = user(&engine, "bob");
        befriend(&engine, a, b);

        let (first, _) = engine.create_single(a, b).unwrap();
        engine.hide_conversation(a, first.conversation.id).unwrap();

        let (again, _) = engine.create_single(a, b).unwrap();
        assert_eq!(again.conversation.id, first.conversation.id);

        let cid = first.conversation.id.to_string();
        let caller = engine.db().get_membership(&cid, &a.to_string()).unwrap().unwrap();
        assert!(caller.deleted_at.is_none());
        // the floor from the hide survives the reuse
        assert!(caller.hidden_until.is_some());

        let peer = engine.db().get_membership(&cid, &b.to_string()).unwrap().unwrap();
        assert!(peer.deleted_at.is_some());
    }

    #[test]
    fn create_single_concurrent_first_calls_converge() {
        let engine = engine();
        let a = user(&engine, "alice");
        let b = user(&engine, "bob");
        befriend(&engine, a, b);

        // both sides open the chat at once; the loser of the insert race
        // must reuse the winner's row, not error on the pair-key constraint
        let other = engine.clone();
        let handle =
            std::thread::spawn(move || other.create_single(b, a).unwrap().0.conversation.id);
        let mine = engine.create_single(a, b).unwrap().0.conversation.id;
        let theirs = handle.join().unwrap();
        assert_eq!(mine, theirs);

        assert_eq!(
            engine
                .db()
                .list_memberships(&mine.to_string())
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn exactly_one_owner_through_transfer() {
        let engine = engine();
        let o = user(&engine, "owner");
        let m1 = user(&engine, "m1");
        let m2 = user(&engine, "m2");
        let cid = group_with(&engine, o, &[m1, m2]);
        assert_eq!(owner_count(&engine, cid), 1);

        engine.transfer_ownership(o, cid, m1).unwrap();
        assert_eq!(owner_count(&engine, cid), 1);

        let old = engine
            .db()
            .get_membership(&cid.to_string(), &o.to_string())
            .unwrap()
            .unwrap();
        assert_eq!(old.role, "admin");
        let new = engine
            .db()
            .get_membership(&cid.to_string(), &m1.to_string())
            .unwrap()
            .unwrap();
        assert_eq!(new.role, "owner");

        // the demoted owner may no longer disband
        assert!(matches!(engine.disband(o, cid), Err(Error::Forbidden(_))));
    }

    #[test]
    fn transfer_rules() {
        let engine = engine();
        let o = user(&engine, "owner");
        let m1 = user(&engine, "m1");
        let cid = group_with(&engine, o, &[m1]);

        assert!(matches!(
            engine.transfer_ownership(o, cid, o),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            engine.transfer_ownership(m1, cid, o),
            Err(Error::Forbidden(_))
        ));
        let stranger = user(&engine, "stranger");
        assert!(matches!(
            engine.transfer_ownership(o, cid, stranger),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn owner_cannot_leave() {
        let engine = engine();
        let o = user(&engine, "owner");
        let m1 = user(&engine, "m1");
        let cid = group_with(&engine, o, &[m1]);
        assert!(matches!(engine.leave(o, cid), Err(Error::Forbidden(_))));
    }

    #[test]
    fn leave_hides_and_narrates_to_the_rest() {
        let engine = engine();
        let o = user(&engine, "owner");
        let m1 = user(&engine, "m1");
        let cid = group_with(&engine, o, &[m1]);

        let outbox = engine.leave(m1, cid).unwrap();
        let gone = engine
            .db()
            .get_membership(&cid.to_string(), &m1.to_string())
            .unwrap()
            .unwrap();
        assert!(gone.deleted_at.is_some());
        assert!(gone.hidden_until.is_some());

        // nothing in the outbox is addressed to the leaver
        for item in outbox.items() {
            if let confab_types::events::Outbound::ToUser { user_id, .. } = item {
                assert_ne!(*user_id, m1);
            }
        }
    }

    #[test]
    fn remove_member_role_rules() {
        let engine = engine();
        let o = user(&engine, "owner");
        let a1 = user(&engine, "a1");
        let a2 = user(&engine, "a2");
        let m1 = user(&engine, "m1");
        let cid = group_with(&engine, o, &[a1, a2, m1]);
        engine.update_role(o, cid, a1, Role::Admin).unwrap();
        engine.update_role(o, cid, a2, Role::Admin).unwrap();

        // plain member may not remove anyone
        assert!(matches!(
            engine.remove_member(m1, cid, a1),
            Err(Error::Forbidden(_))
        ));
        // admin may not remove another admin
        assert!(matches!(
            engine.remove_member(a1, cid, a2),
            Err(Error::Forbidden(_))
        ));
        // nobody removes the owner
        assert!(matches!(
            engine.remove_member(a1, cid, o),
            Err(Error::Forbidden(_))
        ));
        // self-removal goes through leave
        assert!(matches!(
            engine.remove_member(a1, cid, a1),
            Err(Error::Validation(_))
        ));

        engine.remove_member(a1, cid, m1).unwrap();
        let removed = engine
            .db()
            .get_membership(&cid.to_string(), &m1.to_string())
            .unwrap()
            .unwrap();
        assert!(removed.deleted_at.is_some());
    }

    #[test]
    fn add_members_restores_removed_and_clears_floor() {
        let engine = engine();
        let o = user(&engine, "owner");
        let m1 = user(&engine, "m1");
        let cid = group_with(&engine, o, &[m1]);
        engine.remove_member(o, cid, m1).unwrap();

        let (added, _) = engine.add_members(o, cid, &[m1]).unwrap();
        assert_eq!(added, vec![m1]);
        let readmitted = engine
            .db()
            .get_membership(&cid.to_string(), &m1.to_string())
            .unwrap()
            .unwrap();
        assert!(readmitted.deleted_at.is_none());
        assert!(readmitted.hidden_until.is_none());

        // already-active members are skipped, not duplicated
        let (added, outbox) = engine.add_members(o, cid, &[m1]).unwrap();
        assert!(added.is_empty());
        assert!(outbox.is_empty());
    }

    #[test]
    fn add_members_with_unknown_id_leaves_no_partial_state() {
        let engine = engine();
        let o = user(&engine, "owner");
        let m1 = user(&engine, "m1");
        let cid = group_with(&engine, o, &[m1]);
        engine.remove_member(o, cid, m1).unwrap();

        let ghost = Uuid::new_v4();
        assert!(matches!(
            engine.add_members(o, cid, &[m1, ghost]),
            Err(Error::NotFound(_))
        ));

        // the valid id listed before the unknown one was not readmitted
        let m = engine
            .db()
            .get_membership(&cid.to_string(), &m1.to_string())
            .unwrap()
            .unwrap();
        assert!(m.deleted_at.is_some());

        // no narration was written for the failed call either
        let page = engine.list_messages(o, cid, 1, 50).unwrap();
        assert!(
            !page
                .messages
                .iter()
                .any(|msg| msg.content.contains("members_invited"))
        );
    }

    #[test]
    fn add_member_policy_owner_only() {
        let engine = engine();
        let o = user(&engine, "owner");
        let m1 = user(&engine, "m1");
        let m2 = user(&engine, "m2");
        let cid = group_with(&engine, o, &[m1]);

        let patch = UpdateConversationRequest {
            add_member_policy: Some("owner_only".into()),
            ..Default::default()
        };
        engine.update_conversation(o, cid, &patch).unwrap();

        assert!(matches!(
            engine.add_members(m1, cid, &[m2]),
            Err(Error::Forbidden(_))
        ));
        engine.add_members(o, cid, &[m2]).unwrap();
    }

    #[test]
    fn role_update_rules() {
        let engine = engine();
        let o = user(&engine, "owner");
        let m1 = user(&engine, "m1");
        let m2 = user(&engine, "m2");
        let cid = group_with(&engine, o, &[m1, m2]);

        assert!(matches!(
            engine.update_role(m1, cid, m2, Role::Admin),
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            engine.update_role(o, cid, o, Role::Admin),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            engine.update_role(o, cid, m1, Role::Owner),
            Err(Error::Validation(_))
        ));
        engine.update_role(o, cid, m1, Role::Admin).unwrap();
    }

    #[test]
    fn disband_is_terminal_and_floors_everyone() {
        let engine = engine();
        let o = user(&engine, "owner");
        let m1 = user(&engine, "m1");
        let cid = group_with(&engine, o, &[m1]);

        engine.disband(o, cid).unwrap();

        for m in engine.db().list_memberships(&cid.to_string()).unwrap() {
            assert!(m.deleted_at.is_some());
            assert_eq!(m.hidden_until.as_deref(), Some(FAR_FUTURE));
        }
        assert!(matches!(
            engine.add_members(o, cid, &[user(&engine, "x")]),
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            engine.send_message(o, cid, &text("too late")),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn policy_changes_are_owner_only() {
        let engine = engine();
        let o = user(&engine, "owner");
        let a1 = user(&engine, "a1");
        let cid = group_with(&engine, o, &[a1]);
        engine.update_role(o, cid, a1, Role::Admin).unwrap();

        let policy_patch = UpdateConversationRequest {
            send_policy: Some("admins_only".into()),
            ..Default::default()
        };
        assert!(matches!(
            engine.update_conversation(a1, cid, &policy_patch),
            Err(Error::Forbidden(_))
        ));

        let name_patch = UpdateConversationRequest {
            name: Some("renamed".into()),
            ..Default::default()
        };
        let (view, _) = engine.update_conversation(a1, cid, &name_patch).unwrap();
        assert_eq!(view.name.as_deref(), Some("renamed"));
    }

    #[test]
    fn pin_toggle_is_idempotent_and_capped() {
        let engine = engine();
        let o = user(&engine, "owner");
        let mut groups = Vec::new();
        for i in 0..6 {
            let m = user(&engine, &format!("m{i}"));
            let (summary, _) = engine
                .create_group(o, &format!("room{i}"), &[m], None)
                .unwrap();
            groups.push(summary.conversation.id);
        }

        for cid in &groups[..5] {
            assert!(engine.toggle_pin(o, *cid).unwrap());
        }
        assert!(matches!(
            engine.toggle_pin(o, groups[5]),
            Err(Error::Validation(_))
        ));

        // toggling twice returns the membership to its original state
        assert!(!engine.toggle_pin(o, groups[0]).unwrap());
        let m = engine
            .db()
            .get_membership(&groups[0].to_string(), &o.to_string())
            .unwrap()
            .unwrap();
        assert!(!m.pinned);
        assert!(m.pinned_at.is_none());
        // and frees a slot
        assert!(engine.toggle_pin(o, groups[5]).unwrap());
    }

    #[test]
    fn pin_cap_holds_under_concurrent_pins() {
        let engine = engine();
        let o = user(&engine, "owner");
        let mut groups = Vec::new();
        for i in 0..8 {
            let m = user(&engine, &format!("m{i}"));
            let (summary, _) = engine
                .create_group(o, &format!("room{i}"), &[m], None)
                .unwrap();
            groups.push(summary.conversation.id);
        }

        let handles: Vec<_> = groups
            .iter()
            .map(|&cid| {
                let engine = engine.clone();
                std::thread::spawn(move || engine.toggle_pin(o, cid).is_ok())
            })
            .collect();
        let succeeded = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&pinned| pinned)
            .count() as u64;
        assert_eq!(succeeded, PINNED_LIMIT);
    }

    #[test]
    fn mute_without_duration_is_indefinite() {
        let engine = engine();
        let o = user(&engine, "owner");
        let m1 = user(&engine, "m1");
        let cid = group_with(&engine, o, &[m1]);

        engine.mute(m1, cid, None).unwrap();
        let m = engine
            .db()
            .get_membership(&cid.to_string(), &m1.to_string())
            .unwrap()
            .unwrap();
        assert_eq!(m.muted_until.as_deref(), Some(FAR_FUTURE));

        engine.mute(m1, cid, Some(600)).unwrap();
        let m = engine
            .db()
            .get_membership(&cid.to_string(), &m1.to_string())
            .unwrap()
            .unwrap();
        assert!(m.muted_until.as_deref() < Some(FAR_FUTURE));

        engine.unmute(m1, cid).unwrap();
        let m = engine
            .db()
            .get_membership(&cid.to_string(), &m1.to_string())
            .unwrap()
            .unwrap();
        assert!(m.muted_until.is_none());
    }

    #[test]
    fn list_conversations_skips_hidden() {
        let engine = engine();
        let o = user(&engine, "owner");
        let m1 = user(&engine, "m1");
        let c1 = group_with(&engine, o, &[m1]);
        let _c2 = group_with(&engine, o, &[m1]);

        assert_eq!(engine.list_conversations(o).unwrap().len(), 2);
        engine.hide_conversation(o, c1).unwrap();
        assert_eq!(engine.list_conversations(o).unwrap().len(), 1);
        // the other member still sees both
        assert_eq!(engine.list_conversations(m1).unwrap().len(), 2);
    }
}

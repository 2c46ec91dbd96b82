//! Synthesizes audit/system messages for lifecycle events. Narrated
//! messages go through the normal message store under the reserved system
//! sender and are delivered through the same fan-out as user messages.

use uuid::Uuid;

use confab_types::api::MessageView;
use confab_types::error::Result;
use confab_types::models::{MessageKind, SYSTEM_SENDER};
use confab_types::time::now_ts;

use crate::{Engine, message_view};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemAction {
    GroupCreated,
    MembersInvited,
    MemberRemoved,
    MemberLeft,
    RoleChanged,
    OwnershipTransferred,
    GroupDisbanded,
    MessageRecalled,
}

impl SystemAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GroupCreated => "group_created",
            Self::MembersInvited => "members_invited",
            Self::MemberRemoved => "member_removed",
            Self::MemberLeft => "member_left",
            Self::RoleChanged => "role_changed",
            Self::OwnershipTransferred => "ownership_transferred",
            Self::GroupDisbanded => "group_disbanded",
            Self::MessageRecalled => "message_recalled",
        }
    }
}

/// Structured narration payload, stored as the message content.
pub fn narration_content(action: SystemAction, actor: Uuid, targets: &[Uuid]) -> String {
    serde_json::json!({
        "action": action.as_str(),
        "actor_id": actor,
        "target_ids": targets,
    })
    .to_string()
}

impl Engine {
    /// Persist one narrated system message and return its view. The caller
    /// decides who it fans out to.
    pub(crate) fn narrate(
        &self,
        conversation_id: &str,
        action: SystemAction,
        actor: Uuid,
        targets: &[Uuid],
    ) -> Result<MessageView> {
        let id = Uuid::new_v4().to_string();
        let created_at = now_ts();
        let content = narration_content(action, actor, targets);
        self.db.insert_message(
            &id,
            conversation_id,
            &SYSTEM_SENDER.to_string(),
            MessageKind::System.as_str(),
            &content,
            None,
            false,
            &created_at,
        )?;
        let row = self
            .db
            .get_message(&id)?
            .ok_or_else(|| anyhow::anyhow!("narrated message vanished"))?;
        Ok(message_view(&row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narration_payload_shape() {
        let actor = Uuid::new_v4();
        let target = Uuid::new_v4();
        let content = narration_content(SystemAction::MembersInvited, actor, &[target]);
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["action"], "members_invited");
        assert_eq!(value["actor_id"], actor.to_string());
        assert_eq!(value["target_ids"][0], target.to_string());
    }
}

use crate::models::{ConversationRow, MembershipRow};
use crate::queries::conversations::map_conversation;
use crate::{Database, OptionalExt};
use anyhow::{Result, anyhow};
use rusqlite::Row;

fn map_membership(row: &Row) -> rusqlite::Result<MembershipRow> {
    Ok(MembershipRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        user_id: row.get(2)?,
        role: row.get(3)?,
        joined_at: row.get(4)?,
        last_read_message_id: row.get(5)?,
        muted_until: row.get(6)?,
        deleted_at: row.get(7)?,
        hidden_until: row.get(8)?,
        pinned: row.get(9)?,
        pinned_at: row.get(10)?,
        username: row.get(11)?,
    })
}

const MEMBERSHIP_COLS: &str = "m.id, m.conversation_id, m.user_id, m.role, m.joined_at, \
     m.last_read_message_id, m.muted_until, m.deleted_at, m.hidden_until, m.pinned, \
     m.pinned_at, u.username";

impl Database {
    #[allow(clippy::too_many_arguments)]
    pub fn insert_membership(
        &self,
        id: &str,
        conversation_id: &str,
        user_id: &str,
        role: &str,
        joined_at: &str,
        deleted_at: Option<&str>,
        hidden_until: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO memberships (id, conversation_id, user_id, role, joined_at, deleted_at, hidden_until)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![id, conversation_id, user_id, role, joined_at, deleted_at, hidden_until],
            )?;
            Ok(())
        })
    }

    pub fn get_membership(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<MembershipRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MEMBERSHIP_COLS} FROM memberships m
                 JOIN users u ON u.id = m.user_id
                 WHERE m.conversation_id = ?1 AND m.user_id = ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let row = stmt
                .query_row([conversation_id, user_id], map_membership)
                .optional()?;
            Ok(row)
        })
    }

    /// Every membership row of a conversation, hidden ones included.
    pub fn list_memberships(&self, conversation_id: &str) -> Result<Vec<MembershipRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MEMBERSHIP_COLS} FROM memberships m
                 JOIN users u ON u.id = m.user_id
                 WHERE m.conversation_id = ?1
                 ORDER BY m.joined_at, m.id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([conversation_id], map_membership)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Ids of members whose membership is not soft-deleted.
    pub fn list_active_member_ids(&self, conversation_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM memberships
                 WHERE conversation_id = ?1 AND deleted_at IS NULL",
            )?;
            let rows = stmt
                .query_map([conversation_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_role(&self, conversation_id: &str, user_id: &str, role: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE memberships SET role = ?3 WHERE conversation_id = ?1 AND user_id = ?2",
                (conversation_id, user_id, role),
            )?;
            Ok(())
        })
    }

    /// Visibility Ledger `hide`: soft-remove and floor in one step.
    pub fn hide_membership(
        &self,
        conversation_id: &str,
        user_id: &str,
        at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE memberships SET deleted_at = ?3, hidden_until = ?3
                 WHERE conversation_id = ?1 AND user_id = ?2",
                (conversation_id, user_id, at),
            )?;
            Ok(())
        })
    }

    /// Clears the soft-delete for one member, leaving their hidden_until
    /// floor in place (create-single reuse restores only the caller).
    pub fn unhide_membership(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE memberships SET deleted_at = NULL
                 WHERE conversation_id = ?1 AND user_id = ?2",
                (conversation_id, user_id),
            )?;
            Ok(())
        })
    }

    /// Single-chat revival: clears deleted_at for every hidden membership,
    /// preserving each member's hidden_until floor.
    pub fn restore_memberships_on_activity(&self, conversation_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE memberships SET deleted_at = NULL
                 WHERE conversation_id = ?1 AND deleted_at IS NOT NULL",
                [conversation_id],
            )?;
            Ok(())
        })
    }

    /// Explicit re-admission: clears both the soft-delete and the floor,
    /// and resets the role.
    pub fn readmit_membership(
        &self,
        conversation_id: &str,
        user_id: &str,
        role: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE memberships SET deleted_at = NULL, hidden_until = NULL, role = ?3
                 WHERE conversation_id = ?1 AND user_id = ?2",
                (conversation_id, user_id, role),
            )?;
            Ok(())
        })
    }

    pub fn set_last_read(
        &self,
        conversation_id: &str,
        user_id: &str,
        message_id: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE memberships SET last_read_message_id = ?3
                 WHERE conversation_id = ?1 AND user_id = ?2",
                (conversation_id, user_id, message_id),
            )?;
            Ok(())
        })
    }

    pub fn set_pinned(
        &self,
        conversation_id: &str,
        user_id: &str,
        pinned: bool,
        pinned_at: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE memberships SET pinned = ?3, pinned_at = ?4
                 WHERE conversation_id = ?1 AND user_id = ?2",
                rusqlite::params![conversation_id, user_id, pinned, pinned_at],
            )?;
            Ok(())
        })
    }

    /// Pin only while the member is under `limit` pinned conversations.
    /// The count guard lives inside the UPDATE so check and write happen
    /// under one lock; returns false when the cap blocked the pin.
    pub fn try_pin(
        &self,
        conversation_id: &str,
        user_id: &str,
        pinned_at: &str,
        limit: u64,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE memberships SET pinned = 1, pinned_at = ?3
                 WHERE conversation_id = ?1 AND user_id = ?2
                   AND (SELECT COUNT(*) FROM memberships
                        WHERE user_id = ?2 AND pinned = 1 AND deleted_at IS NULL) < ?4",
                rusqlite::params![conversation_id, user_id, pinned_at, limit],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn set_muted_until(
        &self,
        conversation_id: &str,
        user_id: &str,
        muted_until: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE memberships SET muted_until = ?3
                 WHERE conversation_id = ?1 AND user_id = ?2",
                rusqlite::params![conversation_id, user_id, muted_until],
            )?;
            Ok(())
        })
    }

    /// Atomic ownership transfer: old owner demoted to admin, new owner
    /// promoted, in one transaction. Fails without partial effect if either
    /// row does not match the expected current role.
    pub fn transfer_owner(
        &self,
        conversation_id: &str,
        old_owner_id: &str,
        new_owner_id: &str,
    ) -> Result<()> {
        self.with_txn(|conn| {
            let demoted = conn.execute(
                "UPDATE memberships SET role = 'admin'
                 WHERE conversation_id = ?1 AND user_id = ?2 AND role = 'owner'",
                (conversation_id, old_owner_id),
            )?;
            let promoted = conn.execute(
                "UPDATE memberships SET role = 'owner'
                 WHERE conversation_id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
                (conversation_id, new_owner_id),
            )?;
            if demoted != 1 || promoted != 1 {
                return Err(anyhow!(
                    "ownership transfer touched {} + {} rows, expected 1 + 1",
                    demoted,
                    promoted
                ));
            }
            Ok(())
        })
    }

    /// Disband: terminal-mark the conversation and hide every active
    /// membership behind a distant-future floor, atomically.
    pub fn disband_conversation(
        &self,
        conversation_id: &str,
        at: &str,
        hidden_until: &str,
    ) -> Result<()> {
        self.with_txn(|conn| {
            conn.execute(
                "UPDATE conversations SET disbanded_at = ?2, updated_at = ?2 WHERE id = ?1",
                (conversation_id, at),
            )?;
            conn.execute(
                "UPDATE memberships SET deleted_at = ?2, hidden_until = ?3
                 WHERE conversation_id = ?1 AND deleted_at IS NULL",
                (conversation_id, at, hidden_until),
            )?;
            Ok(())
        })
    }

    /// The caller's visible conversation list, pinned entries first.
    pub fn list_user_conversations(
        &self,
        user_id: &str,
    ) -> Result<Vec<(ConversationRow, MembershipRow)>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {}, {MEMBERSHIP_COLS} FROM conversations c
                 JOIN memberships m ON m.conversation_id = c.id
                 JOIN users u ON u.id = m.user_id
                 WHERE m.user_id = ?1 AND m.deleted_at IS NULL
                 ORDER BY m.pinned DESC, m.pinned_at DESC, c.updated_at DESC",
                conversation_cols_prefixed()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], |row| {
                    let conversation = map_conversation(row)?;
                    let membership = MembershipRow {
                        id: row.get(11)?,
                        conversation_id: row.get(12)?,
                        user_id: row.get(13)?,
                        role: row.get(14)?,
                        joined_at: row.get(15)?,
                        last_read_message_id: row.get(16)?,
                        muted_until: row.get(17)?,
                        deleted_at: row.get(18)?,
                        hidden_until: row.get(19)?,
                        pinned: row.get(20)?,
                        pinned_at: row.get(21)?,
                        username: row.get(22)?,
                    };
                    Ok((conversation, membership))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn conversation_cols_prefixed() -> String {
    crate::queries::conversations::CONVERSATION_COLS
        .split(", ")
        .map(|c| format!("c.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

use crate::models::ConversationRow;
use crate::{Database, OptionalExt};
use anyhow::Result;
use rusqlite::Row;

pub(crate) fn map_conversation(row: &Row) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        name: row.get(2)?,
        avatar_url: row.get(3)?,
        send_policy: row.get(4)?,
        add_member_policy: row.get(5)?,
        require_approval: row.get(6)?,
        single_key: row.get(7)?,
        disbanded_at: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

pub(crate) const CONVERSATION_COLS: &str = "id, kind, name, avatar_url, send_policy, \
     add_member_policy, require_approval, single_key, disbanded_at, created_at, updated_at";

impl Database {
    #[allow(clippy::too_many_arguments)]
    pub fn insert_conversation(
        &self,
        id: &str,
        kind: &str,
        name: Option<&str>,
        avatar_url: Option<&str>,
        single_key: Option<&str>,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, kind, name, avatar_url, single_key, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                rusqlite::params![id, kind, name, avatar_url, single_key, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {CONVERSATION_COLS} FROM conversations WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let row = stmt.query_row([id], map_conversation).optional()?;
            Ok(row)
        })
    }

    /// Idempotent single-conversation creation: look up by the canonical
    /// pair key and, if absent, insert the conversation plus both
    /// memberships in one transaction. Holding the lookup and the insert
    /// under one lock means two racing first-time calls cannot both miss
    /// and trip the single_key UNIQUE constraint. Returns the row and
    /// whether this call created it.
    #[allow(clippy::too_many_arguments)]
    pub fn find_or_create_single(
        &self,
        id: &str,
        single_key: &str,
        caller_id: &str,
        caller_membership_id: &str,
        peer_id: &str,
        peer_membership_id: &str,
        now: &str,
    ) -> Result<(ConversationRow, bool)> {
        self.with_txn(|conn| {
            let sql =
                format!("SELECT {CONVERSATION_COLS} FROM conversations WHERE single_key = ?1");
            let existing = conn
                .prepare(&sql)?
                .query_row([single_key], map_conversation)
                .optional()?;
            if let Some(row) = existing {
                return Ok((row, false));
            }

            conn.execute(
                "INSERT INTO conversations (id, kind, single_key, created_at, updated_at)
                 VALUES (?1, 'single', ?2, ?3, ?3)",
                (id, single_key, now),
            )?;
            conn.execute(
                "INSERT INTO memberships (id, conversation_id, user_id, role, joined_at)
                 VALUES (?1, ?2, ?3, 'member', ?4)",
                (caller_membership_id, id, caller_id, now),
            )?;
            // the peer only sees the conversation once something is said
            conn.execute(
                "INSERT INTO memberships (id, conversation_id, user_id, role, joined_at, deleted_at, hidden_until)
                 VALUES (?1, ?2, ?3, 'member', ?4, ?5, ?5)",
                (peer_membership_id, id, peer_id, now, now),
            )?;

            let row = conn
                .prepare(&sql)?
                .query_row([single_key], map_conversation)
                .optional()?
                .ok_or_else(|| anyhow::anyhow!("single conversation vanished after insert"))?;
            Ok((row, true))
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update_conversation_settings(
        &self,
        id: &str,
        name: Option<&str>,
        avatar_url: Option<&str>,
        send_policy: &str,
        add_member_policy: &str,
        require_approval: bool,
        updated_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET name = ?2, avatar_url = ?3, send_policy = ?4,
                     add_member_policy = ?5, require_approval = ?6, updated_at = ?7
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    name,
                    avatar_url,
                    send_policy,
                    add_member_policy,
                    require_approval,
                    updated_at
                ],
            )?;
            Ok(())
        })
    }

    pub fn touch_conversation(&self, id: &str, updated_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                (id, updated_at),
            )?;
            Ok(())
        })
    }
}

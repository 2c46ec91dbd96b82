use crate::models::MessageRow;
use crate::{Database, OptionalExt};
use anyhow::Result;
use rusqlite::Row;

fn map_message(row: &Row) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        kind: row.get(3)?,
        content: row.get(4)?,
        reply_to_id: row.get(5)?,
        is_forwarded: row.get(6)?,
        edited_at: row.get(7)?,
        deleted_at: row.get(8)?,
        created_at: row.get(9)?,
    })
}

const MESSAGE_COLS: &str = "id, conversation_id, sender_id, kind, content, reply_to_id, \
     is_forwarded, edited_at, deleted_at, created_at";

/// The visibility predicate from the ledger, as SQL. ?2 is the member's
/// hidden_until floor, ?3 the member's own deleted_at ceiling; both NULL
/// when unset. Soft-deleted messages are never visible.
const VISIBLE: &str = "deleted_at IS NULL
     AND (?2 IS NULL OR created_at > ?2)
     AND (?3 IS NULL OR created_at <= ?3)";

impl Database {
    #[allow(clippy::too_many_arguments)]
    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        kind: &str,
        content: &str,
        reply_to_id: Option<&str>,
        is_forwarded: bool,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, kind, content, reply_to_id, is_forwarded, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![id, conversation_id, sender_id, kind, content, reply_to_id, is_forwarded, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let row = stmt.query_row([id], map_message).optional()?;
            Ok(row)
        })
    }

    pub fn update_message_content(&self, id: &str, content: &str, edited_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET content = ?2, edited_at = ?3 WHERE id = ?1",
                (id, content, edited_at),
            )?;
            Ok(())
        })
    }

    pub fn soft_delete_message(&self, id: &str, deleted_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET deleted_at = ?2 WHERE id = ?1",
                (id, deleted_at),
            )?;
            Ok(())
        })
    }

    /// Total visible messages for one member's floors.
    pub fn count_visible(
        &self,
        conversation_id: &str,
        hidden_until: Option<&str>,
        removed_at: Option<&str>,
    ) -> Result<u64> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1 AND {VISIBLE}"
            );
            let count: u64 = conn.query_row(
                &sql,
                rusqlite::params![conversation_id, hidden_until, removed_at],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Visible messages authored by someone other than `user_id`, optionally
    /// restricted to entries strictly after a (created_at, id) marker.
    /// Ties in created_at break by id, matching the listing order.
    pub fn count_unread(
        &self,
        conversation_id: &str,
        user_id: &str,
        hidden_until: Option<&str>,
        removed_at: Option<&str>,
        after: Option<(&str, &str)>,
    ) -> Result<u64> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT COUNT(*) FROM messages
                 WHERE conversation_id = ?1 AND {VISIBLE} AND sender_id != ?4
                   AND (?5 IS NULL OR created_at > ?5
                        OR (created_at = ?5 AND id > ?6))"
            );
            let (after_created, after_id) = match after {
                Some((c, i)) => (Some(c), Some(i)),
                None => (None, None),
            };
            let count: u64 = conn.query_row(
                &sql,
                rusqlite::params![
                    conversation_id,
                    hidden_until,
                    removed_at,
                    user_id,
                    after_created,
                    after_id
                ],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// One page of visible messages, newest first.
    pub fn list_visible(
        &self,
        conversation_id: &str,
        hidden_until: Option<&str>,
        removed_at: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLS} FROM messages
                 WHERE conversation_id = ?1 AND {VISIBLE}
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?4 OFFSET ?5"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![conversation_id, hidden_until, removed_at, limit, offset],
                    map_message,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Most recent visible message, optionally excluding one sender
    /// (the blanket mark-read target: newest message by someone else).
    pub fn latest_visible(
        &self,
        conversation_id: &str,
        hidden_until: Option<&str>,
        removed_at: Option<&str>,
        exclude_sender: Option<&str>,
    ) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLS} FROM messages
                 WHERE conversation_id = ?1 AND {VISIBLE}
                   AND (?4 IS NULL OR sender_id != ?4)
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let row = stmt
                .query_row(
                    rusqlite::params![conversation_id, hidden_until, removed_at, exclude_sender],
                    map_message,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Lazy, monotonic read receipt: inserts on first read, and never
    /// regresses an existing `read` status.
    pub fn upsert_delivery_read(
        &self,
        id: &str,
        message_id: &str,
        user_id: &str,
        updated_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO delivery_statuses (id, message_id, user_id, status, updated_at)
                 VALUES (?1, ?2, ?3, 'read', ?4)
                 ON CONFLICT(message_id, user_id) DO UPDATE
                     SET status = 'read', updated_at = excluded.updated_at
                     WHERE delivery_statuses.status != 'read'",
                (id, message_id, user_id, updated_at),
            )?;
            Ok(())
        })
    }

    pub fn get_delivery_status(
        &self,
        message_id: &str,
        user_id: &str,
    ) -> Result<Option<(String, String)>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT status, updated_at FROM delivery_statuses
                     WHERE message_id = ?1 AND user_id = ?2",
                    (message_id, user_id),
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            Ok(row)
        })
    }
}

use crate::models::FriendshipRow;
use crate::{Database, OptionalExt};
use anyhow::Result;
use rusqlite::Row;

fn map_friendship(row: &Row) -> rusqlite::Result<FriendshipRow> {
    Ok(FriendshipRow {
        id: row.get(0)?,
        requester_id: row.get(1)?,
        addressee_id: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
    })
}

const FRIENDSHIP_COLS: &str = "id, requester_id, addressee_id, status, created_at";

impl Database {
    pub fn insert_friend_request(
        &self,
        id: &str,
        requester_id: &str,
        addressee_id: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO friendships (id, requester_id, addressee_id, status, created_at)
                 VALUES (?1, ?2, ?3, 'pending', ?4)",
                (id, requester_id, addressee_id, created_at),
            )?;
            Ok(())
        })
    }

    /// The relationship between two users in either direction, if any.
    pub fn friendship_between(&self, a: &str, b: &str) -> Result<Option<FriendshipRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {FRIENDSHIP_COLS} FROM friendships
                 WHERE (requester_id = ?1 AND addressee_id = ?2)
                    OR (requester_id = ?2 AND addressee_id = ?1)"
            );
            let mut stmt = conn.prepare(&sql)?;
            let row = stmt.query_row([a, b], map_friendship).optional()?;
            Ok(row)
        })
    }

    pub fn get_friendship(&self, id: &str) -> Result<Option<FriendshipRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {FRIENDSHIP_COLS} FROM friendships WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let row = stmt.query_row([id], map_friendship).optional()?;
            Ok(row)
        })
    }

    pub fn accept_friendship(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE friendships SET status = 'accepted' WHERE id = ?1",
                [id],
            )?;
            Ok(())
        })
    }

    pub fn friendship_accepted(&self, a: &str, b: &str) -> Result<bool> {
        Ok(self
            .friendship_between(a, b)?
            .map(|f| f.status == "accepted")
            .unwrap_or(false))
    }

    /// All relationships involving `user_id`, with the other party's username.
    pub fn list_friendships(&self, user_id: &str) -> Result<Vec<(FriendshipRow, String)>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {}, u.username FROM friendships f
                 JOIN users u ON u.id = CASE
                     WHEN f.requester_id = ?1 THEN f.addressee_id
                     ELSE f.requester_id END
                 WHERE f.requester_id = ?1 OR f.addressee_id = ?1
                 ORDER BY f.created_at",
                "f.id, f.requester_id, f.addressee_id, f.status, f.created_at"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok((map_friendship(row)?, row.get::<_, String>(5)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

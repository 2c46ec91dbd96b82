use crate::models::UserRow;
use crate::{Database, OptionalExt};
use anyhow::Result;
use rusqlite::{Connection, Row};

fn map_user(row: &Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        presence_visibility: row.get(3)?,
        last_seen_at: row.get(4)?,
        created_at: row.get(5)?,
    })
}

const USER_COLS: &str = "id, username, password, presence_visibility, last_seen_at, created_at";

impl Database {
    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id, username, password_hash, created_at),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username = ?1", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", id))
    }

    pub fn set_presence_visibility(&self, id: &str, visibility: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET presence_visibility = ?2 WHERE id = ?1",
                (id, visibility),
            )?;
            Ok(())
        })
    }

    pub fn set_last_seen(&self, id: &str, last_seen_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET last_seen_at = ?2 WHERE id = ?1",
                (id, last_seen_at),
            )?;
            Ok(())
        })
    }
}

fn query_user(conn: &Connection, filter: &str, param: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLS} FROM users WHERE {filter}");
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([param], map_user).optional()?;
    Ok(row)
}

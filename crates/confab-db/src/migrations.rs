use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id                   TEXT PRIMARY KEY,
            username             TEXT NOT NULL UNIQUE,
            password             TEXT NOT NULL,
            presence_visibility  TEXT NOT NULL DEFAULT 'everyone',
            last_seen_at         TEXT,
            created_at           TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS friendships (
            id            TEXT PRIMARY KEY,
            requester_id  TEXT NOT NULL REFERENCES users(id),
            addressee_id  TEXT NOT NULL REFERENCES users(id),
            status        TEXT NOT NULL DEFAULT 'pending',
            created_at    TEXT NOT NULL,
            UNIQUE(requester_id, addressee_id)
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id                 TEXT PRIMARY KEY,
            kind               TEXT NOT NULL,
            name               TEXT,
            avatar_url         TEXT,
            send_policy        TEXT NOT NULL DEFAULT 'all_members',
            add_member_policy  TEXT NOT NULL DEFAULT 'all_members',
            require_approval   INTEGER NOT NULL DEFAULT 0,
            -- canonical 'min_uid:max_uid' pair key; enforces one single
            -- conversation per user pair at the store
            single_key         TEXT UNIQUE,
            disbanded_at       TEXT,
            created_at         TEXT NOT NULL,
            updated_at         TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS memberships (
            id                    TEXT PRIMARY KEY,
            conversation_id       TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            user_id               TEXT NOT NULL REFERENCES users(id),
            role                  TEXT NOT NULL DEFAULT 'member',
            joined_at             TEXT NOT NULL,
            last_read_message_id  TEXT,
            muted_until           TEXT,
            deleted_at            TEXT,
            hidden_until          TEXT,
            pinned                INTEGER NOT NULL DEFAULT 0,
            pinned_at             TEXT,
            UNIQUE(conversation_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_memberships_user
            ON memberships(user_id, deleted_at);

        CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            conversation_id  TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            sender_id        TEXT NOT NULL,
            kind             TEXT NOT NULL DEFAULT 'text',
            content          TEXT NOT NULL,
            reply_to_id      TEXT,
            is_forwarded     INTEGER NOT NULL DEFAULT 0,
            edited_at        TEXT,
            deleted_at       TEXT,
            created_at       TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE TABLE IF NOT EXISTS delivery_statuses (
            id          TEXT PRIMARY KEY,
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            status      TEXT NOT NULL DEFAULT 'sent',
            updated_at  TEXT NOT NULL,
            UNIQUE(message_id, user_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}

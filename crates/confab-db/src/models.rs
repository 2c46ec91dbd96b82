//! Database row types mapping directly to SQLite rows. Distinct from the
//! confab-types API models to keep the DB layer independent; ids and
//! timestamps stay TEXT here.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub presence_visibility: String,
    pub last_seen_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct FriendshipRow {
    pub id: String,
    pub requester_id: String,
    pub addressee_id: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: String,
    pub kind: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub send_policy: String,
    pub add_member_policy: String,
    pub require_approval: bool,
    pub single_key: Option<String>,
    pub disbanded_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct MembershipRow {
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub role: String,
    pub joined_at: String,
    pub last_read_message_id: Option<String>,
    pub muted_until: Option<String>,
    pub deleted_at: Option<String>,
    pub hidden_until: Option<String>,
    pub pinned: bool,
    pub pinned_at: Option<String>,
    /// Joined from users for view assembly.
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub kind: String,
    pub content: String,
    pub reply_to_id: Option<String>,
    pub is_forwarded: bool,
    pub edited_at: Option<String>,
    pub deleted_at: Option<String>,
    pub created_at: String,
}

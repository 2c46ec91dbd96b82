use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ConversationKind, MessageKind, PresenceVisibility, Role};

// -- JWT Claims --

/// JWT claims shared across confab-api (REST middleware) and confab-gateway
/// (WebSocket Identify). Canonical definition lives here in confab-types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PresenceSettingRequest {
    pub visibility: PresenceVisibility,
}

// -- Friends --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FriendRequestCreate {
    pub addressee_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct FriendView {
    pub request_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub accepted: bool,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateSingleRequest {
    pub peer_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupRequest {
    pub name: String,
    pub member_ids: Vec<Uuid>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Policies travel as raw strings; unrecognized values are stored verbatim
/// and fall back to the per-operation default at evaluation time.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateConversationRequest {
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub send_policy: Option<String>,
    pub add_member_policy: Option<String>,
    pub require_approval: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddMembersRequest {
    pub user_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateRoleRequest {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferOwnershipRequest {
    pub new_owner_id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub message_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MuteRequest {
    /// Absent means "indefinite".
    pub duration_secs: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberView {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationView {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub send_policy: String,
    pub add_member_policy: String,
    pub require_approval: bool,
    pub disbanded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub members: Vec<MemberView>,
}

/// A conversation as one member sees it: the shared view plus that
/// member's own membership state and derived unread count.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: ConversationView,
    pub role: Role,
    pub pinned: bool,
    pub pinned_at: Option<DateTime<Utc>>,
    pub muted_until: Option<DateTime<Utc>>,
    pub last_read_message_id: Option<Uuid>,
    pub unread_count: u64,
    pub last_message: Option<MessageView>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default = "default_kind")]
    pub kind: MessageKind,
    pub content: String,
    #[serde(default)]
    pub reply_to_id: Option<Uuid>,
    #[serde(default)]
    pub is_forwarded: bool,
}

fn default_kind() -> MessageKind {
    MessageKind::Text
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditMessageRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub kind: MessageKind,
    pub content: String,
    pub reply_to_id: Option<Uuid>,
    pub is_forwarded: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    50
}

#[derive(Debug, Serialize)]
pub struct MessagePage {
    pub messages: Vec<MessageView>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub has_more: bool,
}

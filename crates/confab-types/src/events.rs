use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{ConversationView, MessageView};
use crate::models::Role;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A conversation the recipient belongs to was created
    ConversationCreate { conversation: ConversationView },

    /// Name/avatar/policy change
    ConversationUpdate { conversation: ConversationView },

    /// The group was disbanded; no further mutations are possible
    ConversationDisband { conversation_id: Uuid },

    /// Users were added to (or restored into) a group
    MemberAdd {
        conversation_id: Uuid,
        user_ids: Vec<Uuid>,
    },

    /// A member was removed by an admin/owner, or left on their own
    MemberRemove {
        conversation_id: Uuid,
        user_id: Uuid,
    },

    RoleUpdate {
        conversation_id: Uuid,
        user_id: Uuid,
        role: Role,
    },

    OwnershipTransfer {
        conversation_id: Uuid,
        old_owner_id: Uuid,
        new_owner_id: Uuid,
    },

    /// A new message was posted (user or narrated system message)
    MessageCreate { message: MessageView },

    MessageUpdate { message: MessageView },

    MessageDelete {
        conversation_id: Uuid,
        message_id: Uuid,
    },

    /// A member advanced their read marker
    ReadReceipt {
        conversation_id: Uuid,
        user_id: Uuid,
        message_id: Uuid,
    },

    /// A user started typing
    Typing {
        conversation_id: Uuid,
        user_id: Uuid,
        username: String,
    },

    /// A user came online or went offline
    PresenceUpdate {
        user_id: Uuid,
        online: bool,
        last_seen_at: Option<DateTime<Utc>>,
    },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Subscribe to a conversation's channel. Authorized against current
    /// active membership at join time.
    JoinConversation { conversation_id: Uuid },

    /// Unsubscribe from a conversation's channel
    LeaveConversation { conversation_id: Uuid },

    /// Indicate typing in a conversation
    Typing { conversation_id: Uuid },
}

/// One event instance as it travels through fan-out. The id is shared by
/// every copy of the same logical event so a session subscribed to both a
/// conversation channel and its own user channel can deduplicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event_id: Uuid,
    #[serde(flatten)]
    pub event: GatewayEvent,
}

impl Envelope {
    pub fn new(event: GatewayEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event,
        }
    }
}

/// An addressed envelope produced by an engine mutation after commit and
/// consumed by the dispatcher. Presence is published by the gateway itself.
#[derive(Debug, Clone)]
pub enum Outbound {
    ToUser { user_id: Uuid, envelope: Envelope },
    ToConversation {
        conversation_id: Uuid,
        envelope: Envelope,
    },
}

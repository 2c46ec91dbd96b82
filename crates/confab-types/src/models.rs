use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sender id used for narrated system messages.
pub const SYSTEM_SENDER: Uuid = Uuid::nil();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Single,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Group => "group",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "single" => Self::Single,
            _ => Self::Group,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Admin,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Admin => "admin",
            Self::Owner => "owner",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "owner" => Self::Owner,
            "admin" => Self::Admin,
            _ => Self::Member,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Voice,
    File,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Voice => "voice",
            Self::File => "file",
            Self::System => "system",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "image" => Self::Image,
            "video" => Self::Video,
            "voice" => Self::Voice,
            "file" => Self::File,
            "system" => Self::System,
            _ => Self::Text,
        }
    }
}

/// Who gets to see a user's online/offline transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceVisibility {
    Everyone,
    Nobody,
}

impl PresenceVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Everyone => "everyone",
            Self::Nobody => "nobody",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "nobody" => Self::Nobody,
            _ => Self::Everyone,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Sent,
    Delivered,
    Read,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "read" => Self::Read,
            "delivered" => Self::Delivered,
            _ => Self::Sent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_state_is_ordered() {
        assert!(DeliveryState::Sent < DeliveryState::Delivered);
        assert!(DeliveryState::Delivered < DeliveryState::Read);
    }

    #[test]
    fn role_parse_defaults_to_member() {
        assert_eq!(Role::from_str("owner"), Role::Owner);
        assert_eq!(Role::from_str("something-else"), Role::Member);
    }
}

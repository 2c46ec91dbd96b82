use thiserror::Error;

/// Error taxonomy shared by the engine and the HTTP layer.
///
/// Every engine operation either fully commits or fails with one of these
/// before any side effect; fan-out failures are never surfaced here.
#[derive(Debug, Error)]
pub enum Error {
    /// Conversation, message or member absent.
    #[error("{0}")]
    NotFound(String),

    /// Authenticated but role/membership insufficient.
    #[error("{0}")]
    Forbidden(String),

    /// Malformed or self-referential input, expired time windows,
    /// exceeded limits.
    #[error("{0}")]
    Validation(String),

    /// Duplicate state (e.g. relationship already exists).
    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Stable tag used in HTTP bodies and logs.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Validation(_) => "validation",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

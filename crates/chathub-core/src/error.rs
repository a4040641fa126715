//! Error types for chathub.
//!
//! Every failure that can end a turn carries the partial text streamed so
//! far, so a cut-off answer is never silently lost.

use thiserror::Error;

/// Terminal failure of a single turn.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TurnError {
    /// The service refused the turn, soft-blocked it, or returned a
    /// non-success result code.
    #[error("chat hub rejected the turn: {message}")]
    Protocol { message: String, partial: String },

    /// Network-level failure: connect error, read error, dropped socket.
    #[error("websocket transport error: {detail}")]
    Transport { detail: String, partial: String },

    /// The peer closed the socket before the turn reached a terminal status.
    #[error("websocket closed with a {code} because of {reason}")]
    Closed {
        code: u16,
        reason: String,
        partial: String,
    },

    /// The caller cancelled the turn.
    #[error("turn cancelled")]
    Cancelled { partial: String },
}

impl TurnError {
    /// Best-known partial text at the moment the turn failed.
    pub fn partial_text(&self) -> &str {
        match self {
            Self::Protocol { partial, .. }
            | Self::Transport { partial, .. }
            | Self::Closed { partial, .. }
            | Self::Cancelled { partial } => partial,
        }
    }

    /// True for the network-level variants (error or abnormal close).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Closed { .. })
    }

    /// True when the service itself signalled failure.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}

/// Failure while acquiring a conversation identity.
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("unexpected HTTP error creating conversation {status}: {status_text}")]
    Http { status: u16, status_text: String },

    #[error("conversation creation rejected ({value}): {message}")]
    Rejected { value: String, message: String },

    #[error("conversation response is missing `{0}`")]
    MissingField(&'static str),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Failure while building an outbound query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("hex string length must be even, got {0}")]
    OddHexLength(usize),
}

/// Errors surfaced by [`crate::conversation::Conversation`].
#[derive(Error, Debug)]
pub enum ConversationError {
    #[error("user token is required")]
    MissingUserToken,

    #[error(
        "conversationId, clientId, conversationSignature and encryptedConversationSignature must be used together"
    )]
    IncompleteIdentity,

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error(transparent)]
    Turn(#[from] TurnError),

    #[error(transparent)]
    Query(#[from] QueryError),
}

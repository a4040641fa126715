// ── Shared types ────────────────────────────────────────────────────────────
//
// Values passed between the bootstrap, the query builder, the stream session
// and the conversation.

use serde::{Deserialize, Serialize};

use crate::protocol::{ResultFrame, Throttling, TurnStatus};

/// Identity of one server-side conversation.
///
/// Produced once by bootstrap and immutable afterwards. All four fields are
/// needed to send any turn after the first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationIdentity {
    pub conversation_id: String,
    pub client_id: String,
    #[serde(default)]
    pub conversation_signature: String,
    #[serde(default)]
    pub encrypted_conversation_signature: String,
}

impl ConversationIdentity {
    pub fn is_complete(&self) -> bool {
        !self.conversation_id.is_empty()
            && !self.client_id.is_empty()
            && !self.conversation_signature.is_empty()
            && !self.encrypted_conversation_signature.is_empty()
    }
}

/// Caller-visible progress of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnProgress {
    pub status: TurnStatus,
    pub text: String,
}

impl TurnProgress {
    pub fn new(status: TurnStatus, text: impl Into<String>) -> Self {
        Self {
            status,
            text: text.into(),
        }
    }
}

/// Successful outcome of a turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnResult {
    pub text: String,
    /// The terminal frame, verbatim.
    pub raw: ResultFrame,
}

impl TurnResult {
    pub fn throttling(&self) -> Option<&Throttling> {
        self.raw.item.as_ref()?.throttling.as_ref()
    }
}

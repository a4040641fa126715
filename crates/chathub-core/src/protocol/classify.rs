//! Frame classification.
//!
//! Maps one server frame plus the current turn status to an updated status
//! and a display-text fragment. Pure: no I/O, no state.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::frames::{ResultFrame, ServerFrame, UpdateFrame, frame_type};

/// Text used when a terminal frame has no usable response message.
pub const MALFORMED_TERMINAL_TEXT: &str = "malformed terminal message";

/// Text used when an error frame has no error string.
pub const MALFORMED_ERROR_TEXT: &str = "malformed error frame";

/// Progress of one turn.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TurnStatus {
    #[default]
    Pending,
    Sending,
    /// Request acknowledged, no content yet.
    Delivered,
    /// The service is running internal searches.
    Searching,
    /// The final answer is streaming.
    Writing,
    Finished,
    Failed,
}

impl TurnStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

/// Outcome of classifying one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: TurnStatus,
    /// `None` means the frame carries no status-relevant content.
    pub text: Option<String>,
    /// Stop processing the rest of the current batch.
    pub stop_batch: bool,
}

impl Classification {
    fn unchanged(status: TurnStatus) -> Self {
        Self {
            status,
            text: None,
            stop_batch: false,
        }
    }

    fn to(status: TurnStatus, text: impl Into<String>) -> Self {
        Self {
            status,
            text: Some(text.into()),
            stop_batch: false,
        }
    }

    /// True when the frame changed status or text.
    pub fn is_relevant(&self) -> bool {
        self.text.is_some()
    }
}

/// Classify one frame against the current status.
pub fn classify(frame: &ServerFrame, current: TurnStatus) -> Classification {
    match frame {
        ServerFrame::Update(update) => classify_update(update, current),
        ServerFrame::Result(result) => classify_result(result),
        ServerFrame::Ping => Classification {
            stop_batch: true,
            ..Classification::unchanged(current)
        },
        ServerFrame::Error(err) => Classification::to(
            TurnStatus::Failed,
            err.error.as_deref().unwrap_or(MALFORMED_ERROR_TEXT),
        ),
        ServerFrame::Malformed { frame_type: kind, .. } => match *kind {
            frame_type::RESULT => Classification::to(TurnStatus::Failed, MALFORMED_TERMINAL_TEXT),
            frame_type::ERROR => Classification::to(TurnStatus::Failed, MALFORMED_ERROR_TEXT),
            _ => Classification::unchanged(current),
        },
        ServerFrame::Invocation(_) | ServerFrame::Unknown(_) => Classification::unchanged(current),
    }
}

fn classify_update(update: &UpdateFrame, current: TurnStatus) -> Classification {
    let Some(arg) = update.arguments.first() else {
        return Classification::unchanged(current);
    };

    let Some(messages) = arg.messages.as_ref() else {
        if arg.request_id.is_some() {
            return Classification::to(TurnStatus::Delivered, "");
        }
        return Classification::unchanged(current);
    };

    let first = messages.first();
    if let Some(msg) = first.filter(|m| m.is_bot_internal()) {
        return Classification::to(TurnStatus::Searching, msg.text());
    }
    if arg.cursor.is_some() {
        return Classification::to(TurnStatus::Writing, "");
    }
    Classification::to(
        TurnStatus::Writing,
        first.map(|m| m.text()).unwrap_or_default(),
    )
}

fn classify_result(result: &ResultFrame) -> Classification {
    let Some(item) = result.item.as_ref() else {
        return Classification::to(TurnStatus::Failed, MALFORMED_TERMINAL_TEXT);
    };
    let outcome = item.result.clone().unwrap_or_default();

    if !outcome.is_success() {
        let text = outcome
            .message
            .or(outcome.error)
            .or(outcome.value)
            .unwrap_or_default();
        return Classification::to(TurnStatus::Failed, text);
    }

    match item.last_response() {
        Some(msg) => match msg.hidden_text().filter(|_| msg.is_apology()) {
            Some(hidden) => Classification::to(TurnStatus::Failed, hidden),
            None => Classification::to(TurnStatus::Finished, msg.text()),
        },
        None => Classification::to(TurnStatus::Failed, MALFORMED_TERMINAL_TEXT),
    }
}

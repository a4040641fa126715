//! Server frame types for the chat hub protocol.
//!
//! Inbound frames are discriminated by an integer `type` field. The payload
//! structs are deliberately lenient: every field is optional or defaulted and
//! anything unrecognised lands in a flattened `extra` map, so a frame can be
//! re-serialized without losing data.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::trace;

/// Result code carried by a successful terminal frame.
pub const RESULT_SUCCESS: &str = "Success";

/// Content origin the service uses for apology / refusal messages.
pub const APOLOGY_ORIGIN: &str = "Apology";

/// Wire discriminants.
pub mod frame_type {
    pub const UPDATE: u64 = 1;
    pub const RESULT: u64 = 2;
    pub const INVOCATION: u64 = 3;
    pub const QUERY: u64 = 4;
    pub const PING: u64 = 6;
    pub const ERROR: u64 = 7;
}

/// One message inside an update or a terminal result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Only present when the response was blocked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Set on bot-internal messages (search queries, loader messages, cards).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    /// A bot-internal message is any message tagged with a `messageType`.
    pub fn is_bot_internal(&self) -> bool {
        self.message_type.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn is_apology(&self) -> bool {
        self.content_origin.as_deref() == Some(APOLOGY_ORIGIN)
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    /// Hidden text, if present and non-empty.
    pub fn hidden_text(&self) -> Option<&str> {
        self.hidden_text.as_deref().filter(|t| !t.is_empty())
    }
}

/// Emitted right before the service starts writing the final answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cursor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub j: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Throttling {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_num_user_messages_in_conversation: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_user_messages_in_conversation: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateArgument {
    /// Absent on a bare request acknowledgement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throttling: Option<Throttling>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Type 1: incremental update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateFrame {
    pub arguments: Vec<UpdateArgument>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_version: Option<String>,
}

impl RequestResult {
    pub fn is_success(&self) -> bool {
        self.value.as_deref() == Some(RESULT_SUCCESS)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResultItem {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RequestResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throttling: Option<Throttling>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResultItem {
    /// The last message that is not bot-internal, i.e. the real answer.
    pub fn last_response(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| !m.is_bot_internal())
    }
}

/// Type 2: terminal result envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResultFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<ResultItem>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Type 3: turn invocation echo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationFrame {
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Type 7: fatal error envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_reconnect: Option<bool>,
}

/// A single inbound protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Update(UpdateFrame),
    Result(Box<ResultFrame>),
    Invocation(InvocationFrame),
    Ping,
    Error(ErrorFrame),
    /// A known discriminant whose body did not fit its shape.
    Malformed { frame_type: u64, raw: Value },
    /// Missing or unrecognised discriminant.
    Unknown(Value),
}

impl ServerFrame {
    pub fn from_value(value: Value) -> Self {
        match value.get("type").and_then(Value::as_u64) {
            Some(frame_type::UPDATE) => typed(value, frame_type::UPDATE, Self::Update),
            Some(frame_type::RESULT) => {
                typed(value, frame_type::RESULT, |f| Self::Result(Box::new(f)))
            }
            Some(frame_type::INVOCATION) => {
                typed(value, frame_type::INVOCATION, Self::Invocation)
            }
            Some(frame_type::PING) => Self::Ping,
            Some(frame_type::ERROR) => typed(value, frame_type::ERROR, Self::Error),
            _ => Self::Unknown(value),
        }
    }

    /// Numeric discriminant, if the frame carried a recognised one.
    pub fn frame_type(&self) -> Option<u64> {
        match self {
            Self::Update(_) => Some(frame_type::UPDATE),
            Self::Result(_) => Some(frame_type::RESULT),
            Self::Invocation(_) => Some(frame_type::INVOCATION),
            Self::Ping => Some(frame_type::PING),
            Self::Error(_) => Some(frame_type::ERROR),
            Self::Malformed { frame_type, .. } => Some(*frame_type),
            Self::Unknown(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn typed<T, F>(value: Value, frame_type: u64, wrap: F) -> ServerFrame
where
    T: DeserializeOwned,
    F: FnOnce(T) -> ServerFrame,
{
    match T::deserialize(&value) {
        Ok(body) => wrap(body),
        Err(err) => {
            trace!(frame_type, %err, "frame body does not match its discriminant");
            ServerFrame::Malformed {
                frame_type,
                raw: value,
            }
        }
    }
}

fn with_type<T: Serialize>(body: &T, frame_type: u64) -> Value {
    let mut value = serde_json::to_value(body).unwrap_or_else(|_| Value::Object(Map::new()));
    if let Value::Object(map) = &mut value {
        map.insert("type".into(), Value::from(frame_type));
    }
    value
}

impl Serialize for ServerFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Update(f) => with_type(f, frame_type::UPDATE).serialize(serializer),
            Self::Result(f) => with_type(f.as_ref(), frame_type::RESULT).serialize(serializer),
            Self::Invocation(f) => with_type(f, frame_type::INVOCATION).serialize(serializer),
            Self::Ping => serde_json::json!({ "type": frame_type::PING }).serialize(serializer),
            Self::Error(f) => with_type(f, frame_type::ERROR).serialize(serializer),
            Self::Malformed { raw, .. } | Self::Unknown(raw) => raw.serialize(serializer),
        }
    }
}

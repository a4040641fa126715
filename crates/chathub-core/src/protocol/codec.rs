//! Record-separator framing.
//!
//! Every frame on the wire, in either direction, is a JSON document followed
//! by a single `0x1E` character. One websocket message may carry several
//! frames back to back.

use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use super::frames::ServerFrame;

/// Frame terminator.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Sub-protocol negotiation, sent first on every connection.
pub const HANDSHAKE_FRAME: &str = "{\"protocol\":\"json\",\"version\":1}\u{1e}";

/// Keep-alive ping.
pub const PING_FRAME: &str = "{\"type\":6}\u{1e}";

/// Serialize a value as one terminated frame.
pub fn encode_frame<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let mut out = serde_json::to_string(value)?;
    out.push(RECORD_SEPARATOR);
    Ok(out)
}

/// Split one transport payload into frames, in arrival order.
///
/// Blank segments, unparsable segments and documents without keys (`null`,
/// booleans, numbers, `""`, `{}`, `[]`) are dropped. The service interleaves
/// heartbeat acknowledgements with real frames, so none of these are errors.
pub fn decode_payload(payload: &str) -> Vec<ServerFrame> {
    payload
        .split(RECORD_SEPARATOR)
        .filter(|segment| !segment.trim().is_empty())
        .filter_map(|segment| match serde_json::from_str::<Value>(segment) {
            Ok(value) => Some(value),
            Err(err) => {
                trace!(%err, len = segment.len(), "dropping unparsable frame");
                None
            }
        })
        .filter(has_keys)
        .map(ServerFrame::from_value)
        .collect()
}

/// Scalars never carry a frame; only non-empty containers (and strings,
/// which index like arrays) survive.
fn has_keys(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

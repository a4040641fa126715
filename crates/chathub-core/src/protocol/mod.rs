//! Chat hub wire protocol: framing, frame types and classification.

pub mod classify;
pub mod codec;
pub mod frames;

pub use classify::{Classification, TurnStatus, classify};
pub use codec::{HANDSHAKE_FRAME, PING_FRAME, RECORD_SEPARATOR, decode_payload, encode_frame};
pub use frames::{
    ChatMessage, Cursor, ErrorFrame, InvocationFrame, RequestResult, ResultFrame, ResultItem,
    ServerFrame, Throttling, UpdateArgument, UpdateFrame,
};

// ── Chathub Core Library ─────────────────────────────────────────────────────
//
// Everything a chathub client needs: conversation bootstrap over HTTP, the
// record-separated JSON protocol spoken on the websocket, turn classification
// and the streaming session that drives one prompt to completion.

pub mod bootstrap;
pub mod config;
pub mod conversation;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod query;
pub mod session;
pub mod types;

// Re-export the client surface at crate root for convenience
pub use config::Config;
pub use conversation::{ChatClient, Conversation, Exchange, MessageOptions};
pub use error::{BootstrapError, ConversationError, QueryError, TurnError};
pub use protocol::{ServerFrame, TurnStatus};
pub use session::{SessionConfig, SessionState, StreamSession, TurnObserver};
pub use types::{ConversationIdentity, TurnProgress, TurnResult};

//! The realtime speech-to-speech session: wire types plus the websocket
//! session that owns them.

pub mod events;
pub mod session;

pub use events::{
    ClientEvent, ConversationContent, ConversationItem, ResponseCreateOptions, ServerEvent,
    SessionConfig, ToolCall, ToolParameter, ToolSpec, TurnDetection, TurnDetectionType,
};
pub use session::{ModelSession, SessionFlags};

//! Conversation sessions
//!
//! One active conversation at a time; turns run strictly sequentially
//! through the turn state machine. Memory is profile-wide and shared across
//! conversations: a conversation references the store, it never owns it.

pub mod manager;

pub use manager::{SessionManager, Transcript, Turn, TurnState};

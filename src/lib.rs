//! Engram - Conversational assistant with persistent cross-session memory
//!
//! Engram remembers what matters across conversations. Each user turn is
//! classified for memorable information, which lands in one of two
//! profile-wide partitions:
//!
//! - **Permanent Memory**: durable facts and preferences
//! - **Time-Based Memory**: reminders and events with an explicit expiry
//!
//! Stored memory is periodically deduplicated and merged, and the relevant
//! subset is injected into the generation context on every turn.
//!
//! ## Architecture
//!
//! ```text
//! user input ──► Extraction Classifier ──► Memory Store (write)
//!      │                                       ▲    │
//!      │              Compression Engine ──────┘    │ (read)
//!      │                 (out-of-band)              ▼
//!      └──────────────────────────────► Context Assembler
//!                                            │
//!                                            ▼
//!                                    generation request ──► reply
//! ```
//!
//! Natural-language judgment (extraction, merge proposals, replies) is
//! delegated to an external text-generation collaborator behind the
//! [`llm::TextGenerator`] trait; every response is schema-validated before
//! use. Storage invariants, expiry sweeps, and budget truncation are
//! deterministic engine logic and testable without the collaborator.
//!
//! ## Modules
//!
//! - [`memory`]: entries, dual-partition store, extraction, compression,
//!   context assembly
//! - [`session`]: conversation transcripts and the turn state machine
//! - [`storage`]: JSON snapshot persistence under the profile directory
//! - [`llm`]: the text-generation collaborator boundary
//! - [`config`]: configuration management

pub mod config;
pub mod error;
pub mod llm;
pub mod memory;
pub mod session;
pub mod storage;

pub use config::EngramConfig;
pub use error::{Error, Result};

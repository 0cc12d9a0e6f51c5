//! Memory engine: dual-partition persistent memory
//!
//! Permanent entries hold durable facts and preferences; TimeBased entries
//! carry an explicit expiry and are swept once it passes. Extraction and
//! compression delegate their language judgment to the text-generation
//! collaborator; storage invariants, expiry, and budget truncation stay
//! deterministic engine logic.

pub mod compressor;
pub mod context;
pub mod entry;
pub mod extractor;
pub mod store;

pub use compressor::Compressor;
pub use context::ContextAssembler;
pub use entry::{CandidateMemory, Category, ExpiresIn, MemoryEntry, MemoryEntryBuilder, MemoryKind};
pub use extractor::Extractor;
pub use store::{MemoryPersistence, MemorySnapshot, MemoryStore};

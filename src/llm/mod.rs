//! External text-generation collaborator boundary
//!
//! The memory engine never talks to a model API directly; everything goes
//! through the [`TextGenerator`] trait so tests can substitute deterministic
//! fakes. Responses are untrusted free-form text and are schema-validated by
//! the caller before use.

pub mod client;

pub use client::{
    generate_with_timeout, GeminiClient, GenerationRequest, ResponseFormat, TextGenerator,
};

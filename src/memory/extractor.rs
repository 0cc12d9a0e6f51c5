//! Extraction classifier
//!
//! Decides whether a user utterance contains memorable information and, if
//! so, whether each piece is permanent (stable fact or preference) or
//! time-bound (reminder or event with an expiry). The natural-language
//! judgment is delegated to the text-generation collaborator through a
//! schema-constrained prompt; this module's own job is building that prompt
//! deterministically, parsing the untrusted reply, and discarding any
//! candidate that fails validation.
//!
//! A collaborator failure or timeout yields an empty candidate list and the
//! turn proceeds without memory capture.

use super::entry::{CandidateMemory, Category, ExpiresIn, MemoryKind};
use super::store::MemorySnapshot;
use crate::llm::{generate_with_timeout, GenerationRequest, ResponseFormat, TextGenerator};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Raw candidate as the collaborator reports it, before validation
#[derive(Debug, Deserialize)]
struct RawCandidate {
    #[serde(default)]
    content: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    expires_in: Option<ExpiresIn>,
    #[serde(default)]
    importance: Option<u8>,
    #[serde(default)]
    relevance: Option<u8>,
}

/// Extraction classifier backed by the text-generation collaborator
pub struct Extractor<'a> {
    generator: &'a dyn TextGenerator,
    timeout_secs: u64,
}

impl<'a> Extractor<'a> {
    /// Create a classifier over the given collaborator
    pub fn new(generator: &'a dyn TextGenerator, timeout_secs: u64) -> Self {
        Self {
            generator,
            timeout_secs,
        }
    }

    /// Classify an utterance into zero or more validated candidates.
    ///
    /// An empty list is the common case, not an error. Malformed candidates
    /// are dropped individually; a malformed or failed reply drops the whole
    /// turn's capture with a warning.
    pub async fn classify(
        &self,
        utterance: &str,
        existing: &MemorySnapshot,
        now: DateTime<Utc>,
    ) -> Vec<CandidateMemory> {
        let request = GenerationRequest::new(
            build_extraction_prompt(existing),
            utterance,
            ResponseFormat::Json,
        );

        let reply = match generate_with_timeout(self.generator, request, self.timeout_secs).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Extraction skipped for this turn: {}", e);
                return Vec::new();
            }
        };

        parse_candidates(&reply, now)
    }
}

/// Parse and validate the collaborator's candidate list.
///
/// Accepts either a bare JSON array or an object with a `candidates` field.
/// Each item is validated independently; failures are logged and dropped.
pub fn parse_candidates(reply: &str, now: DateTime<Utc>) -> Vec<CandidateMemory> {
    let Some(json) = extract_json(reply) else {
        tracing::warn!("Extraction reply contained no JSON; nothing captured");
        return Vec::new();
    };

    #[derive(Deserialize)]
    struct Wrapper {
        candidates: Vec<serde_json::Value>,
    }

    let items: Vec<serde_json::Value> = match serde_json::from_str::<Vec<serde_json::Value>>(json) {
        Ok(items) => items,
        Err(_) => match serde_json::from_str::<Wrapper>(json) {
            Ok(w) => w.candidates,
            Err(e) => {
                tracing::warn!("Extraction reply did not match schema: {}", e);
                return Vec::new();
            }
        },
    };

    let mut candidates = Vec::new();
    for item in items {
        let raw: RawCandidate = match serde_json::from_value(item) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!("Dropped malformed candidate: {}", e);
                continue;
            }
        };
        if let Some(candidate) = validate_candidate(raw, now) {
            candidates.push(candidate);
        }
    }
    candidates
}

/// Validate a raw candidate, or drop it.
///
/// Drop rules: empty content; time-based kind with no resolvable expiry;
/// unknown kind strings. Unknown categories map to `Other`.
fn validate_candidate(raw: RawCandidate, now: DateTime<Utc>) -> Option<CandidateMemory> {
    let content = raw.content.trim().to_string();
    if content.is_empty() {
        tracing::debug!("Dropped candidate with empty content");
        return None;
    }

    let kind = match raw.kind.trim().to_ascii_lowercase().as_str() {
        "permanent" => MemoryKind::Permanent,
        "time_based" | "time-based" => MemoryKind::TimeBased,
        other => {
            tracing::debug!("Dropped candidate with unknown kind '{}'", other);
            return None;
        }
    };

    let expires_at = match kind {
        MemoryKind::Permanent => None,
        MemoryKind::TimeBased => match raw.expires_in {
            Some(duration) if !duration.is_zero() => Some(duration.resolve(now)),
            _ => {
                // No resolvable expiry phrase: discard rather than store
                // a time-based entry with a null expiry
                tracing::debug!("Dropped time-based candidate without expiry: {}", content);
                return None;
            }
        },
    };

    Some(CandidateMemory {
        content,
        category: Category::parse(&raw.category),
        kind,
        expires_at,
        importance: raw.importance.unwrap_or(3).clamp(1, 5),
        relevance: raw.relevance.unwrap_or(3).clamp(1, 5),
    })
}

/// Locate the outermost JSON value in a possibly chatty reply
fn extract_json(reply: &str) -> Option<&str> {
    let start = reply.find(['[', '{'])?;
    let close = match reply.as_bytes()[start] {
        b'[' => ']',
        _ => '}',
    };
    let end = reply.rfind(close)?;
    if end < start {
        return None;
    }
    Some(&reply[start..=end])
}

/// Build the deterministic extraction prompt, listing existing memory the
/// same way the reply-generation prompt does so the collaborator can extend
/// rather than repeat it.
pub fn build_extraction_prompt(existing: &MemorySnapshot) -> String {
    let mut prompt = String::from(
        "You are a data extraction expert. Analyze the user's message and identify \
         information worth saving to memory. There are two types of memory:\n\n\
         **Permanent Memory:** information that is always relevant and doesn't expire: \
         user preferences, important facts about the user, frequently used information.\n\n\
         **Time-Based Memory:** information relevant only for a specific period: \
         reminders, scheduled events, time-sensitive information.\n",
    );

    render_existing(&mut prompt, existing);

    prompt.push_str(
        "\nSave only information directly relevant to the user. Avoid generic facts. \
         If nothing should be saved, reply with an empty JSON array: []\n\n\
         Otherwise reply with a JSON array of candidates, one object per piece of \
         information, in exactly this schema:\n\
         [\n\
           {\n\
             \"content\": \"the information, compressed into a short factual form\",\n\
             \"category\": \"preference | fact | reminder | event | other\",\n\
             \"kind\": \"permanent | time_based\",\n\
             \"importance\": 1-5,\n\
             \"relevance\": 1-5,\n\
             \"expires_in\": {\"minutes\": 0, \"hours\": 0, \"days\": 0, \"weeks\": 0}\n\
           }\n\
         ]\n\
         Include \"expires_in\" only for time_based candidates, resolved from any \
         relative phrase in the message (\"tomorrow\" becomes {\"days\": 1}).\n",
    );

    prompt
}

/// Append the existing-memory listing to the extraction prompt
fn render_existing(prompt: &mut String, existing: &MemorySnapshot) {
    prompt.push_str("\n**Existing Memory:**\n");
    if !existing.permanent.is_empty() {
        prompt.push_str("\n**Permanent Memory:**\n");
        for entry in &existing.permanent {
            prompt.push_str(&format!("- {}\n", entry.content));
        }
    }
    if !existing.time_based.is_empty() {
        prompt.push_str("\n**Time-Based Memory:**\n");
        for entry in &existing.time_based {
            let expiry = entry
                .expires_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            prompt.push_str(&format!("- {} (Expires: {})\n", entry.content, expiry));
        }
    }
}

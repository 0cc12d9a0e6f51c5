//! Memory entry data types
//!
//! A `MemoryEntry` is the atomic unit of retained knowledge. Entries live in
//! one of two partitions: Permanent (durable facts and preferences) or
//! TimeBased (reminders and events with an explicit expiry). The builder is
//! the only way to construct an entry, so the kind/expiry invariant holds for
//! every entry that exists: Permanent never carries `expires_at`, TimeBased
//! always does.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which partition owns an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Durable, non-expiring facts and preferences
    Permanent,
    /// Entries with an explicit expiry
    TimeBased,
}

/// Category tag for an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// A user preference
    Preference,
    /// A factual statement about the user
    Fact,
    /// A reminder
    Reminder,
    /// A scheduled event
    Event,
    /// Anything else worth keeping
    Other,
}

impl Category {
    /// Map a collaborator-supplied tag to a category; unknown tags become `Other`
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "preference" => Category::Preference,
            "fact" => Category::Fact,
            "reminder" => Category::Reminder,
            "event" => Category::Event,
            _ => Category::Other,
        }
    }
}

/// The atomic unit of retained knowledge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique identifier, assigned at creation, immutable, never reused
    pub id: Uuid,
    /// Normalized text describing the fact or reminder
    pub content: String,
    /// Category tag
    pub category: Category,
    /// Owning partition
    pub kind: MemoryKind,
    /// Importance score (1-5), from the extraction schema
    pub importance: u8,
    /// Relevance score (1-5), from the extraction schema
    pub relevance: u8,
    /// Insertion timestamp
    pub created_at: DateTime<Utc>,
    /// Expiry timestamp; `Some` iff `kind == TimeBased`
    pub expires_at: Option<DateTime<Utc>>,
    /// Conversation turn that produced this entry (traceability)
    pub source_turn: Option<u64>,
}

impl MemoryEntry {
    /// Whether the entry has expired at `now`. Permanent entries never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => expiry <= now,
            None => false,
        }
    }
}

/// Relative expiry duration, as the extraction collaborator reports it.
///
/// The collaborator resolves phrases like "tomorrow" into a structured
/// duration (`{"days": 1}`) rather than an absolute date, so the engine can
/// anchor the expiry to its own clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiresIn {
    #[serde(default)]
    pub minutes: i64,
    #[serde(default)]
    pub hours: i64,
    #[serde(default)]
    pub days: i64,
    #[serde(default)]
    pub weeks: i64,
}

impl ExpiresIn {
    /// True when every field is zero (no resolvable expiry)
    pub fn is_zero(&self) -> bool {
        self.minutes == 0 && self.hours == 0 && self.days == 0 && self.weeks == 0
    }

    /// Resolve to an absolute timestamp anchored at `now`
    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::minutes(self.minutes)
            + Duration::hours(self.hours)
            + Duration::days(self.days)
            + Duration::weeks(self.weeks)
    }
}

/// A validated extraction result, not yet inserted into the store
#[derive(Debug, Clone)]
pub struct CandidateMemory {
    pub content: String,
    pub category: Category,
    pub kind: MemoryKind,
    /// Absolute expiry, resolved from the collaborator's relative duration
    pub expires_at: Option<DateTime<Utc>>,
    pub importance: u8,
    pub relevance: u8,
}

impl CandidateMemory {
    /// Promote the candidate to a store entry with a fresh id
    pub fn into_entry(self, now: DateTime<Utc>, source_turn: Option<u64>) -> Result<MemoryEntry> {
        let mut builder = MemoryEntryBuilder::new(self.kind)
            .content(self.content)
            .category(self.category)
            .importance(self.importance)
            .relevance(self.relevance)
            .created_at(now);
        if let Some(expiry) = self.expires_at {
            builder = builder.expires_at(expiry);
        }
        if let Some(turn) = source_turn {
            builder = builder.source_turn(turn);
        }
        builder.build()
    }
}

/// Builder for constructing `MemoryEntry` instances
pub struct MemoryEntryBuilder {
    kind: MemoryKind,
    content: Option<String>,
    category: Category,
    importance: u8,
    relevance: u8,
    created_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    source_turn: Option<u64>,
}

impl MemoryEntryBuilder {
    /// Create a new builder with the required kind
    pub fn new(kind: MemoryKind) -> Self {
        Self {
            kind,
            content: None,
            category: Category::Other,
            importance: 3,
            relevance: 3,
            created_at: None,
            expires_at: None,
            source_turn: None,
        }
    }

    /// Set the entry content
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Set the category tag
    pub fn category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    /// Set the importance score (clamped to 1-5)
    pub fn importance(mut self, importance: u8) -> Self {
        self.importance = importance.clamp(1, 5);
        self
    }

    /// Set the relevance score (clamped to 1-5)
    pub fn relevance(mut self, relevance: u8) -> Self {
        self.relevance = relevance.clamp(1, 5);
        self
    }

    /// Set the creation timestamp (defaults to now)
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Set the expiry timestamp (TimeBased only)
    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Record the conversation turn this entry came from
    pub fn source_turn(mut self, turn: u64) -> Self {
        self.source_turn = Some(turn);
        self
    }

    /// Build the entry, enforcing the kind/expiry invariant
    pub fn build(self) -> Result<MemoryEntry> {
        let content = self
            .content
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Validation("entry content is required".to_string()))?;

        match (self.kind, self.expires_at) {
            (MemoryKind::Permanent, Some(_)) => {
                return Err(Error::Validation(
                    "permanent entry must not carry an expiry".to_string(),
                ))
            }
            (MemoryKind::TimeBased, None) => {
                return Err(Error::Validation(
                    "time-based entry requires an expiry".to_string(),
                ))
            }
            _ => {}
        }

        Ok(MemoryEntry {
            id: Uuid::new_v4(),
            content,
            category: self.category,
            kind: self.kind,
            importance: self.importance,
            relevance: self.relevance,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            expires_at: self.expires_at,
            source_turn: self.source_turn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_entry_has_no_expiry() {
        let entry = MemoryEntryBuilder::new(MemoryKind::Permanent)
            .content("prefers dark mode")
            .category(Category::Preference)
            .build()
            .unwrap();

        assert_eq!(entry.kind, MemoryKind::Permanent);
        assert!(entry.expires_at.is_none());
        assert!(!entry.is_expired(Utc::now()));
    }

    #[test]
    fn test_time_based_entry_requires_expiry() {
        let result = MemoryEntryBuilder::new(MemoryKind::TimeBased)
            .content("call mom")
            .build();
        assert!(matches!(result, Err(Error::Validation(_))));

        let entry = MemoryEntryBuilder::new(MemoryKind::TimeBased)
            .content("call mom")
            .expires_at(Utc::now() + Duration::days(1))
            .build()
            .unwrap();
        assert!(entry.expires_at.is_some());
    }

    #[test]
    fn test_permanent_rejects_expiry() {
        let result = MemoryEntryBuilder::new(MemoryKind::Permanent)
            .content("likes coffee")
            .expires_at(Utc::now())
            .build();
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_empty_content_rejected() {
        let result = MemoryEntryBuilder::new(MemoryKind::Permanent)
            .content("   ")
            .build();
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_scores_clamped() {
        let entry = MemoryEntryBuilder::new(MemoryKind::Permanent)
            .content("x")
            .importance(9)
            .relevance(0)
            .build()
            .unwrap();
        assert_eq!(entry.importance, 5);
        assert_eq!(entry.relevance, 1);
    }

    #[test]
    fn test_is_expired_boundary() {
        let now = Utc::now();
        let entry = MemoryEntryBuilder::new(MemoryKind::TimeBased)
            .content("dentist")
            .expires_at(now)
            .build()
            .unwrap();

        // expires_at <= now counts as expired
        assert!(entry.is_expired(now));
        assert!(!entry.is_expired(now - Duration::seconds(1)));
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(Category::parse("Preference"), Category::Preference);
        assert_eq!(Category::parse("reminder"), Category::Reminder);
        assert_eq!(Category::parse("shopping list"), Category::Other);
    }

    #[test]
    fn test_expires_in_resolution() {
        let now = Utc::now();
        let duration = ExpiresIn {
            days: 2,
            hours: 3,
            ..Default::default()
        };
        assert_eq!(duration.resolve(now), now + Duration::days(2) + Duration::hours(3));
        assert!(!duration.is_zero());
        assert!(ExpiresIn::default().is_zero());
    }

    #[test]
    fn test_candidate_into_entry_carries_source_turn() {
        let now = Utc::now();
        let candidate = CandidateMemory {
            content: "works as an engineer".to_string(),
            category: Category::Fact,
            kind: MemoryKind::Permanent,
            expires_at: None,
            importance: 4,
            relevance: 4,
        };

        let entry = candidate.into_entry(now, Some(7)).unwrap();
        assert_eq!(entry.source_turn, Some(7));
        assert_eq!(entry.created_at, now);
    }
}

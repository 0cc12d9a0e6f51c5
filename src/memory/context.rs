//! Context assembler
//!
//! Selects the subset of stored memory to inject ahead of generation,
//! bounded by a character budget over entry content. Near-term time-based
//! entries come first (they are likely relevant right now); the remaining
//! budget is filled with permanent entries ranked by a deterministic local
//! token-overlap score against the current utterance. No collaborator call
//! is involved, so selection is reproducible for a fixed store snapshot,
//! utterance, and budget.
//!
//! Tie-break for equally scored permanent entries: stored relevance
//! descending, then importance descending, then `created_at` ascending,
//! then id.

use super::entry::{MemoryEntry, MemoryKind};
use super::store::MemoryStore;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

/// Context assembler over the shared memory store
pub struct ContextAssembler {
    /// Horizon for "relevant now" time-based entries
    near_term_horizon: Duration,
}

impl ContextAssembler {
    /// Create an assembler with the given near-term horizon
    pub fn new(near_term_horizon_hours: i64) -> Self {
        Self {
            near_term_horizon: Duration::hours(near_term_horizon_hours),
        }
    }

    /// Select the memory entries to inject, never exceeding `budget`
    /// characters of entry content.
    pub async fn select_context(
        &self,
        store: &MemoryStore,
        utterance: &str,
        now: DateTime<Utc>,
        budget: usize,
    ) -> Vec<MemoryEntry> {
        let time_based = store.get_all(MemoryKind::TimeBased).await;
        let permanent = store.get_all(MemoryKind::Permanent).await;
        self.select_from(&time_based, &permanent, utterance, now, budget)
    }

    /// Pure selection over partition snapshots
    pub fn select_from(
        &self,
        time_based: &[MemoryEntry],
        permanent: &[MemoryEntry],
        utterance: &str,
        now: DateTime<Utc>,
        budget: usize,
    ) -> Vec<MemoryEntry> {
        let horizon = now + self.near_term_horizon;

        // Non-expired time-based entries inside the horizon, soonest first
        let mut near_term: Vec<&MemoryEntry> = time_based
            .iter()
            .filter(|e| !e.is_expired(now))
            .filter(|e| e.expires_at.is_some_and(|t| t <= horizon))
            .collect();
        near_term.sort_by(|a, b| {
            a.expires_at
                .cmp(&b.expires_at)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });

        // Permanent entries ranked by utterance relevance
        let query_tokens = tokenize(utterance);
        let mut ranked: Vec<(f64, &MemoryEntry)> = permanent
            .iter()
            .map(|e| (relevance_score(e, &query_tokens), e))
            .collect();
        ranked.sort_by(|(sa, a), (sb, b)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.relevance.cmp(&a.relevance))
                .then_with(|| b.importance.cmp(&a.importance))
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut selected = Vec::new();
        let mut used = 0usize;
        for entry in near_term
            .into_iter()
            .chain(ranked.into_iter().map(|(_, e)| e))
        {
            let cost = entry.content.chars().count();
            if used + cost > budget {
                // Lowest-ranked are truncated first by construction
                continue;
            }
            used += cost;
            selected.push(entry.clone());
        }
        selected
    }

    /// Render a selection as the memory block for the reply system prompt
    pub fn render(&self, selection: &[MemoryEntry]) -> String {
        let mut block = String::new();
        let permanent: Vec<&MemoryEntry> = selection
            .iter()
            .filter(|e| e.kind == MemoryKind::Permanent)
            .collect();
        let time_based: Vec<&MemoryEntry> = selection
            .iter()
            .filter(|e| e.kind == MemoryKind::TimeBased)
            .collect();

        if !permanent.is_empty() {
            block.push_str("\n**Permanent Memory:**\n");
            for entry in permanent {
                block.push_str(&format!("- {}\n", entry.content));
            }
        }
        if !time_based.is_empty() {
            block.push_str("\n**Time-Based Memory:**\n");
            for entry in time_based {
                let expiry = entry
                    .expires_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();
                block.push_str(&format!("- {} (Expires: {})\n", entry.content, expiry));
            }
        }
        block
    }
}

/// Case-folded alphanumeric tokens of a text
fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Fraction of the entry's tokens that appear in the query
fn relevance_score(entry: &MemoryEntry, query_tokens: &HashSet<String>) -> f64 {
    let entry_tokens = tokenize(&entry.content);
    if entry_tokens.is_empty() {
        return 0.0;
    }
    let overlap = entry_tokens
        .iter()
        .filter(|t| query_tokens.contains(*t))
        .count();
    overlap as f64 / entry_tokens.len() as f64
}

//! Compression engine
//!
//! Reduces redundancy within a partition without losing information. The
//! similarity judgment is delegated to the text-generation collaborator: it
//! receives the full entry list and proposes merge groups. Everything else
//! is deterministic engine logic: the proposal is validated against the real
//! id set, merged entries are synthesized locally, and the result is applied
//! atomically through `replace_partition`.
//!
//! A proposal is treated as untrusted: hallucinated ids are ignored, blank
//! merged content voids its cluster, and a result that would turn a
//! non-empty partition empty is rejected outright.

use super::entry::{MemoryEntry, MemoryEntryBuilder, MemoryKind};
use super::store::MemoryStore;
use crate::error::{Error, Result};
use crate::llm::{generate_with_timeout, GenerationRequest, ResponseFormat, TextGenerator};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// One merge group proposed by the collaborator
#[derive(Debug, Deserialize)]
pub struct ClusterProposal {
    /// Ids of the entries to merge
    #[serde(default)]
    pub ids: Vec<String>,
    /// Content subsuming all members
    #[serde(default)]
    pub merged_content: String,
}

/// Compression engine over the shared memory store
pub struct Compressor<'a> {
    generator: &'a dyn TextGenerator,
    timeout_secs: u64,
}

impl<'a> Compressor<'a> {
    /// Create a compressor over the given collaborator
    pub fn new(generator: &'a dyn TextGenerator, timeout_secs: u64) -> Self {
        Self {
            generator,
            timeout_secs,
        }
    }

    /// Run one compression pass over a partition.
    ///
    /// Returns the number of entries merged away (0 when nothing changed).
    /// On collaborator failure the pass is skipped; on a degenerate result
    /// the previous partition state is kept and
    /// [`Error::CompressionRejected`] is returned.
    pub async fn compress(&self, store: &MemoryStore, kind: MemoryKind) -> Result<usize> {
        let entries = store.get_all(kind).await;
        if entries.len() < 2 {
            return Ok(0);
        }

        let request = GenerationRequest::new(
            CLUSTER_PROMPT,
            render_entry_list(&entries),
            ResponseFormat::Json,
        );
        let reply = generate_with_timeout(self.generator, request, self.timeout_secs).await?;

        let proposals = parse_proposals(&reply)?;
        if proposals.is_empty() {
            tracing::debug!("Compression proposed no merges for {:?}", kind);
            return Ok(0);
        }

        let rewritten = apply_proposals(&entries, &proposals)?;
        let merged_away = entries.len() - rewritten.len();
        if merged_away == 0 {
            return Ok(0);
        }

        store.replace_partition(kind, rewritten).await?;
        tracing::info!("Compressed {:?} partition: {} entries merged away", kind, merged_away);
        Ok(merged_away)
    }
}

const CLUSTER_PROMPT: &str = "You are a data deduplication and merging expert. \
You are given a numbered list of memory entries, each with an id and content. \
Identify groups of entries whose content is duplicate, semantically similar, \
or subsumable into one statement. For each group of two or more, write a single \
merged content that preserves all information from its members.\n\n\
Reply with a JSON array of merge groups:\n\
[{\"ids\": [\"<id>\", \"<id>\"], \"merged_content\": \"...\"}]\n\
Leave entries that have no duplicates out of the reply. If nothing should be \
merged, reply with an empty array: []";

/// Render the partition as the id/content list the cluster prompt expects
fn render_entry_list(entries: &[MemoryEntry]) -> String {
    let mut out = String::new();
    for (i, entry) in entries.iter().enumerate() {
        out.push_str(&format!("{}. id={} content={}\n", i + 1, entry.id, entry.content));
    }
    out
}

/// Parse the collaborator's merge-group reply
fn parse_proposals(reply: &str) -> Result<Vec<ClusterProposal>> {
    let start = reply
        .find('[')
        .ok_or_else(|| Error::Collaborator("cluster reply contained no JSON array".to_string()))?;
    let end = reply
        .rfind(']')
        .filter(|e| *e >= start)
        .ok_or_else(|| Error::Collaborator("cluster reply contained no JSON array".to_string()))?;

    serde_json::from_str(&reply[start..=end])
        .map_err(|e| Error::Collaborator(format!("cluster reply did not match schema: {}", e)))
}

/// Apply validated merge groups to the partition.
///
/// Unclustered entries pass through unchanged in their original order; each
/// merged entry takes the position of its earliest member. The merged entry
/// keeps the earliest `created_at`, the latest `expires_at`, the highest
/// importance, and the earliest member's category.
pub fn apply_proposals(
    entries: &[MemoryEntry],
    proposals: &[ClusterProposal],
) -> Result<Vec<MemoryEntry>> {
    let by_id: HashMap<Uuid, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.id, i))
        .collect();

    // position in the original order -> merged replacement
    let mut replacements: HashMap<usize, MemoryEntry> = HashMap::new();
    let mut consumed: HashSet<usize> = HashSet::new();

    for proposal in proposals {
        // Hallucinated, malformed, and already-consumed ids are ignored
        let mut members: Vec<usize> = proposal
            .ids
            .iter()
            .filter_map(|raw| raw.parse::<Uuid>().ok())
            .filter_map(|id| by_id.get(&id).copied())
            .filter(|pos| !consumed.contains(pos))
            .collect();
        members.sort_unstable();
        members.dedup();

        if members.len() < 2 {
            tracing::debug!("Ignored cluster with fewer than 2 valid members");
            continue;
        }

        let content = proposal.merged_content.trim();
        if content.is_empty() {
            tracing::debug!("Ignored cluster with blank merged content");
            continue;
        }

        let merged = merge_cluster(entries, &members, content)?;
        let anchor = members[0];
        consumed.extend(members.iter().copied());
        replacements.insert(anchor, merged);
    }

    let mut rewritten = Vec::with_capacity(entries.len());
    for (pos, entry) in entries.iter().enumerate() {
        if let Some(merged) = replacements.remove(&pos) {
            rewritten.push(merged);
        } else if !consumed.contains(&pos) {
            rewritten.push(entry.clone());
        }
    }

    if rewritten.is_empty() && !entries.is_empty() {
        return Err(Error::CompressionRejected(
            "result would empty a non-empty partition".to_string(),
        ));
    }

    Ok(rewritten)
}

/// Synthesize one merged entry from a validated cluster
fn merge_cluster(
    entries: &[MemoryEntry],
    members: &[usize],
    content: &str,
) -> Result<MemoryEntry> {
    let members: Vec<&MemoryEntry> = members.iter().map(|&i| &entries[i]).collect();

    let earliest = members
        .iter()
        .min_by_key(|e| e.created_at)
        .ok_or_else(|| Error::CompressionRejected("empty cluster".to_string()))?;
    let importance = members.iter().map(|e| e.importance).max().unwrap_or(3);
    let relevance = members.iter().map(|e| e.relevance).max().unwrap_or(3);

    let mut builder = MemoryEntryBuilder::new(earliest.kind)
        .content(content)
        .category(earliest.category)
        .importance(importance)
        .relevance(relevance)
        .created_at(earliest.created_at);

    if earliest.kind == MemoryKind::TimeBased {
        // Most permissive retention: the latest expiry among members wins
        let latest_expiry = members
            .iter()
            .filter_map(|e| e.expires_at)
            .max()
            .ok_or_else(|| {
                Error::CompressionRejected("time-based cluster without expiry".to_string())
            })?;
        builder = builder.expires_at(latest_expiry);
    }
    if let Some(turn) = earliest.source_turn {
        builder = builder.source_turn(turn);
    }

    builder.build()
}

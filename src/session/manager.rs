//! Session management
//!
//! The `SessionManager` orchestrates the per-turn flow: extract candidate
//! memories from the user input, assemble the memory context, request the
//! reply from the collaborator, and persist the transcript. Extraction,
//! assembly, and compression errors degrade to no-ops; only persistence I/O
//! failures escalate, since losing the reply is worse than losing a memory
//! update.

use crate::config::EngramConfig;
use crate::error::{Error, Result};
use crate::llm::{generate_with_timeout, GenerationRequest, ResponseFormat, TextGenerator};
use crate::memory::{Compressor, ContextAssembler, Extractor, MemoryKind, MemoryStore};
use crate::storage::ProfileStorage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One (user, assistant) exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
    pub at: DateTime<Utc>,
}

/// A named, ordered conversation transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub name: String,
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Transcript {
    /// Create an empty transcript
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            turns: Vec::new(),
            created_at: now,
            last_activity: now,
        }
    }

    /// Append a completed exchange and touch the activity timestamp
    pub fn push_turn(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        let now = Utc::now();
        self.turns.push(Turn {
            user: user.into(),
            assistant: assistant.into(),
            at: now,
        });
        self.last_activity = now;
    }
}

/// Turn state machine for an open conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// No conversation open
    Idle,
    /// Waiting for the next user input
    AwaitingInput,
    /// Classifying the input for memorable information
    Extracting,
    /// Selecting memory to inject into the generation context
    AssemblingContext,
    /// Waiting on the collaborator's reply
    AwaitingReply,
    /// Writing the transcript and memory updates
    Persisting,
    /// Conversation ended
    Closed,
}

struct ActiveConversation {
    transcript: Transcript,
    /// Temporary conversations leave no transcript on disk
    temporary: bool,
    state: TurnState,
}

/// Orchestrates conversations over the shared profile memory
pub struct SessionManager {
    config: EngramConfig,
    store: Arc<MemoryStore>,
    generator: Arc<dyn TextGenerator>,
    storage: Arc<ProfileStorage>,
    assembler: ContextAssembler,
    active: Option<ActiveConversation>,
    completed_turns: u64,
}

impl SessionManager {
    /// Open a session: load persisted memory, attach write-through
    /// persistence, and sweep entries that expired since the last session.
    pub async fn open(
        config: EngramConfig,
        generator: Arc<dyn TextGenerator>,
        storage: Arc<ProfileStorage>,
    ) -> Result<Self> {
        let snapshot = storage.load_memory().await;
        let store = Arc::new(
            MemoryStore::from_snapshot(snapshot)?.with_persistence(storage.clone()),
        );

        let swept = store.sweep_expired(Utc::now()).await?;
        if swept > 0 {
            tracing::info!("Swept {} expired entries at session start", swept);
        }

        let assembler = ContextAssembler::new(config.memory.near_term_horizon_hours);
        Ok(Self {
            config,
            store,
            generator,
            storage,
            assembler,
            active: None,
            completed_turns: 0,
        })
    }

    /// The shared memory store
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Current turn state
    pub fn state(&self) -> TurnState {
        self.active
            .as_ref()
            .map(|a| a.state)
            .unwrap_or(TurnState::Idle)
    }

    /// Start a new named conversation
    pub fn new_conversation(&mut self, name: impl Into<String>) {
        let name = name.into();
        tracing::info!("Starting conversation '{}'", name);
        self.active = Some(ActiveConversation {
            transcript: Transcript::new(name),
            temporary: false,
            state: TurnState::AwaitingInput,
        });
    }

    /// Start a temporary conversation; its transcript is never persisted
    pub fn temporary_conversation(&mut self) {
        tracing::info!("Starting temporary conversation");
        self.active = Some(ActiveConversation {
            transcript: Transcript::new("temporary"),
            temporary: true,
            state: TurnState::AwaitingInput,
        });
    }

    /// Resume a saved conversation by name
    pub async fn resume_conversation(&mut self, name: &str) -> Result<()> {
        let transcript = self
            .storage
            .load_transcript(name)
            .await
            .ok_or_else(|| Error::Session(format!("conversation '{}' not found", name)))?;

        tracing::info!(
            "Resumed conversation '{}' with {} turns",
            name,
            transcript.turns.len()
        );
        self.active = Some(ActiveConversation {
            transcript,
            temporary: false,
            state: TurnState::AwaitingInput,
        });
        Ok(())
    }

    /// Close the active conversation
    pub fn close_conversation(&mut self) {
        if let Some(active) = &mut self.active {
            active.state = TurnState::Closed;
        }
        self.active = None;
    }

    /// Delete a saved conversation by name
    pub async fn delete_conversation(&mut self, name: &str) -> Result<bool> {
        if let Some(active) = &self.active {
            if active.transcript.name == name {
                self.close_conversation();
            }
        }
        self.storage.delete_transcript(name).await
    }

    /// List saved conversations, most recently active first
    pub async fn list_conversations(&self) -> Result<Vec<Transcript>> {
        self.storage.list_transcripts().await
    }

    /// Process one user turn and return the assistant reply.
    ///
    /// Turns are strictly sequential: the manager is exclusively borrowed
    /// for the whole turn, so no other turn can observe intermediate state.
    pub async fn send_message(&mut self, input: &str) -> Result<String> {
        if self.active.is_none() {
            return Err(Error::Session("no conversation open".to_string()));
        }
        let now = Utc::now();
        let timeout = self.config.model.timeout_secs;

        // Extracting
        self.set_state(TurnState::Extracting);
        let snapshot = self.store.snapshot().await;
        let source_turn = self.transcript_len() as u64;
        let extractor = Extractor::new(self.generator.as_ref(), timeout);
        let candidates = extractor.classify(input, &snapshot, now).await;
        for candidate in candidates {
            self.insert_candidate(candidate, now, source_turn).await;
        }

        // AssemblingContext
        self.set_state(TurnState::AssemblingContext);
        let selection = self
            .assembler
            .select_context(&self.store, input, now, self.config.memory.context_budget)
            .await;
        let memory_block = self.assembler.render(&selection);

        // AwaitingReply
        self.set_state(TurnState::AwaitingReply);
        let request = GenerationRequest::new(
            build_reply_prompt(now, &memory_block),
            input,
            ResponseFormat::Text,
        )
        .with_history(self.history());
        let reply = generate_with_timeout(self.generator.as_ref(), request, timeout).await?;

        // Persisting
        self.set_state(TurnState::Persisting);
        let temporary = self
            .active
            .as_ref()
            .map(|a| a.temporary)
            .unwrap_or(true);
        if let Some(active) = &mut self.active {
            active.transcript.push_turn(input, reply.clone());
        }
        if !temporary {
            if let Some(active) = &self.active {
                // Persistence failures are the one thing that escalates
                self.storage.save_transcript(&active.transcript).await?;
            }
        }

        self.set_state(TurnState::AwaitingInput);
        self.completed_turns += 1;
        self.maybe_compress().await;

        Ok(reply)
    }

    /// Insert one validated candidate; validation failures are dropped, a
    /// duplicate id is retried once with a fresh id.
    async fn insert_candidate(
        &self,
        candidate: crate::memory::CandidateMemory,
        now: DateTime<Utc>,
        source_turn: u64,
    ) {
        for _attempt in 0..2 {
            let entry = match candidate.clone().into_entry(now, Some(source_turn)) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Dropped invalid candidate: {}", e);
                    return;
                }
            };
            match self.store.insert(entry).await {
                Ok(()) => return,
                Err(Error::Conflict(id)) => {
                    tracing::warn!("Id collision on {}; retrying with a fresh id", id);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Could not store candidate: {}", e);
                    return;
                }
            }
        }
    }

    /// Run the scheduled compression pass when the turn counter says so
    async fn maybe_compress(&mut self) {
        let every = self.config.memory.compress_every_turns;
        if every == 0 || self.completed_turns % every != 0 {
            return;
        }

        tracing::info!("Running scheduled compression after {} turns", self.completed_turns);
        let compressor = Compressor::new(self.generator.as_ref(), self.config.model.timeout_secs);
        for kind in [MemoryKind::Permanent, MemoryKind::TimeBased] {
            match compressor.compress(&self.store, kind).await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Compression merged away {} {:?} entries", n, kind),
                Err(e) => tracing::warn!("Compression skipped for {:?}: {}", kind, e),
            }
        }
    }

    fn set_state(&mut self, state: TurnState) {
        if let Some(active) = &mut self.active {
            tracing::debug!("Turn state {:?} -> {:?}", active.state, state);
            active.state = state;
        }
    }

    fn transcript_len(&self) -> usize {
        self.active
            .as_ref()
            .map(|a| a.transcript.turns.len())
            .unwrap_or(0)
    }

    fn history(&self) -> Vec<(String, String)> {
        self.active
            .as_ref()
            .map(|a| {
                a.transcript
                    .turns
                    .iter()
                    .map(|t| (t.user.clone(), t.assistant.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// System prompt for reply generation, with the memory block injected
fn build_reply_prompt(now: DateTime<Utc>, memory_block: &str) -> String {
    let mut prompt = format!(
        "You are Engram, a knowledgeable personal assistant. Answer the user's \
         query in the best possible way, step by step where that helps. The \
         current date and time is {}.\n\n\
         Below is what you remember about the user. Permanent Memory holds \
         preferences and facts that don't expire; Time-Based Memory holds \
         reminders and events relevant only until they expire.\n\n\
         **Existing Memory:**\n",
        now.to_rfc3339()
    );
    prompt.push_str(memory_block);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Mutex;

    /// Scripted collaborator: extraction calls (JSON format) pop from
    /// `extractions`, reply calls return `reply`.
    struct ScriptedGenerator {
        extractions: Mutex<Vec<String>>,
        reply: String,
        reply_count: Mutex<usize>,
    }

    impl ScriptedGenerator {
        fn new(extractions: Vec<&str>, reply: &str) -> Self {
            Self {
                extractions: Mutex::new(
                    extractions.into_iter().rev().map(str::to_string).collect(),
                ),
                reply: reply.to_string(),
                reply_count: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, request: GenerationRequest) -> Result<String> {
            if request.format == ResponseFormat::Json {
                return Ok(self
                    .extractions
                    .lock()
                    .unwrap()
                    .pop()
                    .unwrap_or_else(|| "[]".to_string()));
            }
            *self.reply_count.lock().unwrap() += 1;
            Ok(self.reply.clone())
        }
    }

    async fn manager_with(
        generator: Arc<dyn TextGenerator>,
    ) -> (tempfile::TempDir, SessionManager) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(ProfileStorage::open(dir.path()).await.unwrap());
        let mut config = EngramConfig::default();
        config.memory.compress_every_turns = 0;
        let manager = SessionManager::open(config, generator, storage)
            .await
            .unwrap();
        (dir, manager)
    }

    #[tokio::test]
    async fn test_turn_captures_memory_and_replies() {
        let generator = Arc::new(ScriptedGenerator::new(
            vec![r#"[{"content": "vegetarian", "category": "preference", "kind": "permanent"}]"#],
            "Noted! I'll suggest vegetarian recipes.",
        ));
        let (_dir, mut manager) = manager_with(generator).await;

        manager.new_conversation("dinner");
        let reply = manager.send_message("I'm vegetarian, by the way").await.unwrap();

        assert!(reply.contains("vegetarian"));
        let facts = manager.store().get_all(MemoryKind::Permanent).await;
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].content, "vegetarian");
        assert_eq!(facts[0].source_turn, Some(0));
        assert_eq!(manager.state(), TurnState::AwaitingInput);
    }

    #[tokio::test]
    async fn test_no_open_conversation_is_session_error() {
        let generator = Arc::new(ScriptedGenerator::new(vec![], "hi"));
        let (_dir, mut manager) = manager_with(generator).await;

        let result = manager.send_message("hello?").await;
        assert!(matches!(result, Err(Error::Session(_))));
    }

    #[tokio::test]
    async fn test_transcript_persisted_and_resumable() {
        let generator = Arc::new(ScriptedGenerator::new(vec![], "sure thing"));
        let (_dir, mut manager) = manager_with(generator).await;

        manager.new_conversation("plans");
        manager.send_message("hello").await.unwrap();
        manager.close_conversation();
        assert_eq!(manager.state(), TurnState::Idle);

        manager.resume_conversation("plans").await.unwrap();
        let listed = manager.list_conversations().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].turns.len(), 1);
        assert_eq!(listed[0].turns[0].assistant, "sure thing");
    }

    #[tokio::test]
    async fn test_temporary_conversation_not_persisted() {
        let generator = Arc::new(ScriptedGenerator::new(
            vec![r#"[{"content": "has a cat", "category": "fact", "kind": "permanent"}]"#],
            "cats are great",
        ));
        let (_dir, mut manager) = manager_with(generator).await;

        manager.temporary_conversation();
        manager.send_message("my cat knocked over a plant").await.unwrap();

        // No transcript on disk, but memory extraction still ran
        assert!(manager.list_conversations().await.unwrap().is_empty());
        assert_eq!(manager.store().get_all(MemoryKind::Permanent).await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_conversation() {
        let generator = Arc::new(ScriptedGenerator::new(vec![], "ok"));
        let (_dir, mut manager) = manager_with(generator).await;

        manager.new_conversation("todelete");
        manager.send_message("hi").await.unwrap();

        assert!(manager.delete_conversation("todelete").await.unwrap());
        assert!(manager.list_conversations().await.unwrap().is_empty());
        assert_eq!(manager.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_expired_entries_swept_at_session_start() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(ProfileStorage::open(dir.path()).await.unwrap());

        // Seed a snapshot with one expired and one live reminder
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .insert(
                crate::memory::MemoryEntryBuilder::new(MemoryKind::TimeBased)
                    .content("stale")
                    .expires_at(now - Duration::days(1))
                    .build()
                    .unwrap(),
            )
            .await
            .unwrap();
        store
            .insert(
                crate::memory::MemoryEntryBuilder::new(MemoryKind::TimeBased)
                    .content("fresh")
                    .expires_at(now + Duration::days(1))
                    .build()
                    .unwrap(),
            )
            .await
            .unwrap();
        storage.save_memory(&store.snapshot().await).await.unwrap();

        let generator = Arc::new(ScriptedGenerator::new(vec![], "ok"));
        let manager = SessionManager::open(EngramConfig::default(), generator, storage)
            .await
            .unwrap();

        let remaining = manager.store().get_all(MemoryKind::TimeBased).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].content, "fresh");
    }

    #[tokio::test]
    async fn test_reply_survives_extraction_failure() {
        /// Fails JSON (extraction) calls, answers text calls
        struct HalfBroken;

        #[async_trait]
        impl TextGenerator for HalfBroken {
            async fn generate(&self, request: GenerationRequest) -> Result<String> {
                match request.format {
                    ResponseFormat::Json => Err(Error::Collaborator("down".to_string())),
                    ResponseFormat::Text => Ok("still here".to_string()),
                }
            }
        }

        let (_dir, mut manager) = manager_with(Arc::new(HalfBroken)).await;
        manager.new_conversation("resilient");

        let reply = manager.send_message("remember that I ski").await.unwrap();
        assert_eq!(reply, "still here");
        assert!(manager.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_scheduled_compression_runs_every_n_turns() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        /// Counts cluster-prompt calls, merges nothing
        struct CountingGenerator {
            cluster_calls: AtomicUsize,
        }

        #[async_trait]
        impl TextGenerator for CountingGenerator {
            async fn generate(&self, request: GenerationRequest) -> Result<String> {
                if request.format == ResponseFormat::Json {
                    if request.system.contains("deduplication") {
                        self.cluster_calls.fetch_add(1, Ordering::SeqCst);
                        return Ok("[]".to_string());
                    }
                    // Extraction: two permanent facts so the partition has
                    // enough entries for compression to consider
                    return Ok(format!(
                        r#"[{{"content": "fact {}", "kind": "permanent"}}]"#,
                        self.cluster_calls.load(Ordering::SeqCst)
                    ));
                }
                Ok("ok".to_string())
            }
        }

        let generator = Arc::new(CountingGenerator {
            cluster_calls: AtomicUsize::new(0),
        });

        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(ProfileStorage::open(dir.path()).await.unwrap());
        let mut config = EngramConfig::default();
        config.memory.compress_every_turns = 2;
        let mut manager = SessionManager::open(config, generator.clone(), storage)
            .await
            .unwrap();

        manager.new_conversation("chatty");
        manager.send_message("one").await.unwrap();
        assert_eq!(generator.cluster_calls.load(Ordering::SeqCst), 0);
        manager.send_message("two").await.unwrap();
        // Second turn trips the every-2-turns trigger (permanent partition
        // has 2 entries by then; time-based has none and is skipped)
        assert_eq!(generator.cluster_calls.load(Ordering::SeqCst), 1);
    }
}

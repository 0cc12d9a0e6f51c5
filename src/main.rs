//! Engram - Conversational assistant with persistent cross-session memory
//!
//! CLI entry point: the chat loop plus conversation and memory maintenance
//! commands. The memory engine itself lives in the library.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use engram::{
    config::EngramConfig,
    llm::GeminiClient,
    memory::{Compressor, MemoryKind, MemoryStore},
    session::SessionManager,
    storage::ProfileStorage,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "engram")]
#[command(version)]
#[command(about = "Conversational assistant with persistent cross-session memory")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "ENGRAM_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start or resume a conversation
    Chat {
        /// Conversation name (omit for a temporary conversation)
        name: Option<String>,

        /// Resume an existing conversation instead of starting fresh
        #[arg(long)]
        resume: bool,
    },

    /// List saved conversations
    List,

    /// Delete a saved conversation
    Delete {
        /// Conversation name
        name: String,
    },

    /// Run a compression pass over stored memory
    Compress,

    /// Show stored memory
    Memory,

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("engram={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = if let Some(config_path) = &cli.config {
        EngramConfig::from_file(config_path)?
    } else {
        EngramConfig::default()
    };

    match cli.command {
        Commands::Chat { name, resume } => run_chat(config, name, resume).await?,
        Commands::List => list_conversations(config).await?,
        Commands::Delete { name } => delete_conversation(config, &name).await?,
        Commands::Compress => run_compression(config).await?,
        Commands::Memory => show_memory(config).await?,
        Commands::Config { default } => {
            let shown = if default { EngramConfig::default() } else { config };
            println!("{}", toml::to_string_pretty(&shown)?);
        }
    }

    Ok(())
}

fn build_generator(config: &EngramConfig) -> Result<Arc<GeminiClient>> {
    let api_key = std::env::var(&config.model.api_key_env).with_context(|| {
        format!(
            "API key environment variable {} is not set",
            config.model.api_key_env
        )
    })?;
    Ok(Arc::new(
        GeminiClient::new(api_key, config.model.model_name.clone())
            .with_max_output_tokens(config.model.max_output_tokens),
    ))
}

async fn open_storage(config: &EngramConfig) -> Result<Arc<ProfileStorage>> {
    let data_dir = config.storage.resolve_data_dir();
    Ok(Arc::new(ProfileStorage::open(data_dir).await?))
}

async fn run_chat(config: EngramConfig, name: Option<String>, resume: bool) -> Result<()> {
    let generator = build_generator(&config)?;
    let storage = open_storage(&config).await?;
    let mut manager = SessionManager::open(config, generator, storage).await?;

    match (&name, resume) {
        (Some(name), true) => manager.resume_conversation(name).await?,
        (Some(name), false) => manager.new_conversation(name.clone()),
        (None, _) => manager.temporary_conversation(),
    }

    if name.is_none() {
        println!("Temporary conversation: the transcript will not be saved.");
    }
    println!("Type 'exit' or 'quit' to end the conversation.\n");

    let stdin = std::io::stdin();
    loop {
        print!("You: ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input.to_lowercase().as_str(), "exit" | "quit") {
            break;
        }

        match manager.send_message(input).await {
            Ok(reply) => println!("\nEngram: {}\n", reply),
            Err(e) => eprintln!("\nError: {}\n", e),
        }
    }

    manager.close_conversation();
    Ok(())
}

async fn list_conversations(config: EngramConfig) -> Result<()> {
    let storage = open_storage(&config).await?;
    let transcripts = storage.list_transcripts().await?;

    if transcripts.is_empty() {
        println!("No saved conversations.");
        return Ok(());
    }
    for transcript in transcripts {
        println!(
            "{}  ({} turns, last active {})",
            transcript.name,
            transcript.turns.len(),
            transcript.last_activity.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

async fn delete_conversation(config: EngramConfig, name: &str) -> Result<()> {
    let storage = open_storage(&config).await?;
    if storage.delete_transcript(name).await? {
        println!("Deleted conversation '{}'.", name);
    } else {
        bail!("conversation '{}' not found", name);
    }
    Ok(())
}

async fn run_compression(config: EngramConfig) -> Result<()> {
    let generator = build_generator(&config)?;
    let storage = open_storage(&config).await?;

    let snapshot = storage.load_memory().await;
    let store = MemoryStore::from_snapshot(snapshot)?.with_persistence(storage.clone());

    let compressor = Compressor::new(generator.as_ref(), config.model.timeout_secs);
    for kind in [MemoryKind::Permanent, MemoryKind::TimeBased] {
        let merged = compressor.compress(&store, kind).await?;
        println!("{:?}: {} entries merged away", kind, merged);
    }
    Ok(())
}

async fn show_memory(config: EngramConfig) -> Result<()> {
    let storage = open_storage(&config).await?;
    let snapshot = storage.load_memory().await;

    println!("Permanent Memory ({} entries):", snapshot.permanent.len());
    for entry in &snapshot.permanent {
        println!(
            "  [{:?}] {} (importance {}, relevance {})",
            entry.category, entry.content, entry.importance, entry.relevance
        );
    }
    println!("\nTime-Based Memory ({} entries):", snapshot.time_based.len());
    for entry in &snapshot.time_based {
        let expiry = entry
            .expires_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "  [{:?}] {} (expires {})",
            entry.category, entry.content, expiry
        );
    }
    Ok(())
}

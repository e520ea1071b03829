use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "lectern",
    about = "Filtered semantic retrieval over your documents"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Base URL of the Ollama-compatible embedding endpoint
    #[arg(long, global = true, default_value = "http://localhost:11434")]
    pub ollama_url: String,

    /// Embedding model name
    #[arg(long, global = true, default_value = "nomic-embed-text")]
    pub model: String,

    /// Embedding dimension of the model
    #[arg(long, global = true, default_value_t = 768)]
    pub dimension: usize,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Index one or more document files
    Ingest(IngestArgs),
    /// Retrieve relevant chunks for a question
    Query(QueryArgs),
    /// Show index status and ingested documents
    Status(StatusArgs),
    /// Delete all indexed vectors and metadata
    Reset(ResetArgs),
}

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// Files to ingest (txt, md, json)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Department the documents belong to
    #[arg(long, default_value_t = 0)]
    pub department: i64,

    /// Track the documents belong to
    #[arg(long, default_value_t = 0)]
    pub track: i64,

    /// Optional module association
    #[arg(long)]
    pub module: Option<i64>,

    /// Optional activity association
    #[arg(long)]
    pub activity: Option<i64>,

    /// Owning profile id
    #[arg(long, default_value_t = 0)]
    pub profile: i64,

    /// Owning user id
    #[arg(long, default_value_t = 0)]
    pub user: i64,
}

#[derive(Debug, Parser)]
pub struct QueryArgs {
    /// The question to retrieve context for
    pub query: String,

    /// Number of chunks to return
    #[arg(long, default_value_t = 5)]
    pub top_k: usize,

    /// Minimum similarity score to consider a chunk
    #[arg(long, default_value_t = 0.3)]
    pub threshold: f32,

    /// Disable diversity re-ranking
    #[arg(long)]
    pub no_mmr: bool,

    /// Relevance/diversity trade-off for re-ranking (0 = diverse, 1 = relevant)
    #[arg(long, default_value_t = 0.5)]
    pub lambda: f32,

    /// Restrict to one department
    #[arg(long)]
    pub department: Option<i64>,

    /// Restrict to one track
    #[arg(long)]
    pub track: Option<i64>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct ResetArgs {
    /// Confirm the deletion
    #[arg(long)]
    pub yes: bool,
}

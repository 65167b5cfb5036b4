use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::{
    chunking::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    embedding::DEFAULT_BATCH_SIZE,
    search::{DEFAULT_THRESHOLD, DEFAULT_TOP_K},
};

#[derive(Debug, Parser)]
#[command(
    name = "docsift",
    about = "Chunk, embed and semantically search your document folders"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the embedding model ID, local model path, or hash:<D>
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Chunk the documents under a directory into the staging file
    Ingest(IngestArgs),
    /// Embed every staged chunk and save the search index
    Embed(EmbedArgs),
    /// Reset the staging file, ingest a directory and embed it
    Rebuild(RebuildArgs),
    /// Search the index
    Search(SearchArgs),
    /// Interactive search loop
    Shell(ShellArgs),
    /// Show data directory, model and index statistics
    Status(StatusArgs),
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Parser)]
pub struct ChunkingArgs {
    /// Words per chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Words shared between consecutive chunks
    #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
    pub overlap: usize,
}

// -- Ingest --

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// Directory containing the documents
    pub path: PathBuf,

    #[command(flatten)]
    pub chunking: ChunkingArgs,

    /// Empty the staging file before appending
    #[arg(long)]
    pub reset: bool,
}

// -- Embed --

#[derive(Debug, Parser)]
pub struct EmbedArgs {
    /// Texts per embedding call
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
}

// -- Rebuild --

#[derive(Debug, Parser)]
pub struct RebuildArgs {
    /// Directory containing the documents
    pub path: PathBuf,

    #[command(flatten)]
    pub chunking: ChunkingArgs,

    /// Texts per embedding call
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query; may contain filters such as `ks9` or `folder:aero`
    pub query: String,

    /// Number of candidates to rank before filtering
    #[arg(short = 'n', long, default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,

    /// Minimum cosine similarity
    #[arg(long, default_value_t = DEFAULT_THRESHOLD, allow_negative_numbers = true)]
    pub threshold: f32,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Show a short preview instead of the full chunk text
    #[arg(long)]
    pub preview: bool,

    /// Stream a summary of the results from the local chat model
    #[arg(long)]
    pub summarize: bool,
}

// -- Shell --

#[derive(Debug, Parser)]
pub struct ShellArgs {
    /// Stream a summary after every search
    #[arg(long)]
    pub summarize: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docsift",
            &mut std::io::stdout(),
        );
    }
}

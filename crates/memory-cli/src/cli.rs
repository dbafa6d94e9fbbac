use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "memory-cli", version, about = "Example driver for the memory-core subsystem")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a memory.toml config file. Defaults to built-in values.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Workspace directory holding the sqlite database, snapshots, etc.
    #[arg(short, long, global = true, default_value = ".")]
    pub workspace: String,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Store a memory entry under a key.
    Store {
        key: String,
        content: String,
        #[arg(long, default_value = "daily")]
        category: String,
        #[arg(long)]
        session: Option<String>,
    },
    /// Run a retrieval query and print ranked candidates.
    Search {
        query: String,
        #[arg(long, default_value = "6")]
        limit: usize,
        #[arg(long)]
        session: Option<String>,
        #[arg(long, default_value = "human")]
        format: String,
    },
    /// Run the hygiene pass (archive/purge/trim) immediately.
    Hygiene,
    /// Drain the durable vector outbox.
    DrainOutbox,
    /// Print component readiness.
    Readiness {
        #[arg(long, default_value = "human")]
        format: String,
    },
}

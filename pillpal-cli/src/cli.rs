use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "pillpal", version, about = "Prescription intake and medicine lookup")]
pub struct Cli {
    /// TOML config file (defaults to ./pillpal.toml when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Chunk, embed and index a reference corpus.
    Index {
        corpus: PathBuf,
        /// Upsert into the existing collection instead of replacing it.
        #[arg(long)]
        append: bool,
    },
    /// Look up a medicine by name.
    Lookup { name: String },
    /// Read a prescription photo and look up the medicine on it.
    Process {
        image: PathBuf,
        /// Image mime type; guessed from the extension when omitted.
        #[arg(long)]
        mime: Option<String>,
    },
    /// Send a reminder notification.
    Notify {
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        body: Option<String>,
    },
    /// Show the vector index status.
    Status,
    /// Show recent lookups.
    History {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

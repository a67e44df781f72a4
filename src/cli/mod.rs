//! CLI command definitions and parsing
use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "marketrag",
    version,
    about = "Retrieval pipeline for marketing assets",
    long_about = "marketrag chunks extracted asset text, embeds it locally, stores the vectors in \
                  SQLite with a rebuildable similarity index, and retrieves re-ranked context for \
                  a query scoped to a project or asset."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/marketrag/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration profile to apply
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Chunk, embed and store a text file as an asset
    Ingest {
        /// File containing the extracted asset text
        file: PathBuf,

        /// Project the asset belongs to
        #[arg(long)]
        project: Uuid,

        /// Asset ID (a new one is generated when omitted)
        #[arg(long)]
        asset: Option<Uuid>,

        /// MIME type recorded in chunk metadata
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Retrieve chunks relevant to a query
    Search {
        /// Search query text
        query: String,

        /// Restrict to one project
        #[arg(long)]
        project: Option<Uuid>,

        /// Restrict to one asset
        #[arg(long)]
        asset: Option<Uuid>,

        /// Maximum number of results (defaults to retrieval.top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Return raw similarity order
        #[arg(long)]
        no_rerank: bool,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Count stored chunks
    Count {
        /// Count only one project's chunks
        #[arg(long)]
        project: Option<Uuid>,
    },

    /// Delete the chunks of an asset or a project
    #[command(group(ArgGroup::new("target").required(true).args(["asset", "project"])))]
    Delete {
        #[arg(long)]
        asset: Option<Uuid>,

        #[arg(long)]
        project: Option<Uuid>,
    },

    /// Remove every stored chunk
    Clear {
        /// Confirm removal
        #[arg(long)]
        yes: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

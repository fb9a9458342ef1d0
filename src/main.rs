//! # index-chat CLI (`ichat`)
//!
//! Loads a persisted document collection, binds a hosted chat model, and
//! starts an interactive chat over the collection.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ichat` / `ichat chat` | Interactive chat over the collection |
//! | `ichat init` | Create the collection on disk |
//! | `ichat add <path>... [--text T]` | Add files, directories, or inline text |
//! | `ichat search "<query>"` | Show what retrieval returns for a query |
//! | `ichat info` | Print collection location and counts |
//!
//! ## Examples
//!
//! ```bash
//! ichat add --text "The sky is blue."
//! GROQ_API_KEY=... ichat
//! echo "What color is the sky?" | GROQ_API_KEY=... ichat chat --mode context
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use index_chat::{config, ingest, logging, repl, search};

/// Interactive retrieval-augmented chat over a local document collection.
#[derive(Parser)]
#[command(name = "ichat", version, about)]
struct Cli {
    /// Path to a TOML configuration file.
    ///
    /// When omitted, `./ichat.toml` is used if present, otherwise built-in
    /// defaults (collection `factoids` under `./index`, Groq `llama3-8b-8192`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding collections (overrides `[index].dir`).
    #[arg(long, global = true)]
    index_dir: Option<PathBuf>,

    /// Collection name (overrides `[index].collection`).
    #[arg(long, global = true)]
    collection: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the collection (default).
    ///
    /// Reads one message per line from stdin. Type `exit` or send EOF to
    /// leave. The API key is read from the environment variable named by
    /// `[llm].api_key_env` (default `GROQ_API_KEY`).
    Chat {
        /// Model identifier (overrides `[llm].model`).
        #[arg(long)]
        model: Option<String>,

        /// Chat mode: `simple`, `context`, or `condense_plus_context`.
        #[arg(long)]
        mode: Option<String>,
    },

    /// Create the collection. Idempotent.
    Init,

    /// Add documents to the collection, creating it if needed.
    ///
    /// Directories are walked for `*.md` and `*.txt` files.
    Add {
        /// Files or directories to add.
        paths: Vec<PathBuf>,

        /// Inline text to add as its own document. Repeatable.
        #[arg(long = "text")]
        texts: Vec<String>,
    },

    /// Print retrieval results for a query.
    Search {
        query: String,

        /// Maximum number of chunks to print (defaults to `[retrieval].top_k`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print collection location and document/chunk counts.
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut cfg = config::load_or_default(cli.config.as_deref())?;
    if let Some(dir) = cli.index_dir {
        cfg.index.dir = dir;
    }
    if let Some(collection) = cli.collection {
        cfg.index.collection = collection;
    }

    let command = cli.command.unwrap_or(Commands::Chat {
        model: None,
        mode: None,
    });

    if let Commands::Chat { model, mode } = &command {
        if let Some(model) = model {
            cfg.llm.model = model.clone();
        }
        if let Some(mode) = mode {
            cfg.chat.mode = mode.clone();
        }
    }
    config::validate(&cfg)?;

    match command {
        Commands::Chat { .. } => repl::run_chat(&cfg).await?,
        Commands::Init => ingest::run_init(&cfg).await?,
        Commands::Add { paths, texts } => ingest::run_add(&cfg, &paths, &texts).await?,
        Commands::Search { query, limit } => search::run_search(&cfg, &query, limit).await?,
        Commands::Info => ingest::run_info(&cfg).await?,
    }

    Ok(())
}

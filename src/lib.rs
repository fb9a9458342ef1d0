//! # index-chat
//!
//! Interactive retrieval-augmented chat over a persisted local document index.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐
//! │ Index Loader │   │  LLM Client  │
//! │ SQLite FTS5  │   │ chat/compl.  │
//! └──────┬───────┘   └──────┬───────┘
//!        └────────┬─────────┘
//!                 ▼
//!          ┌─────────────┐      ┌────────┐
//!          │ Chat Engine │◀────▶│  REPL  │ stdin / stdout
//!          └─────────────┘      └────────┘
//! ```
//!
//! The pipeline is strictly sequential: the index is loaded, the client is
//! bound, and only then is the chat engine assembled.
//!
//! ## Quick Start
//!
//! ```bash
//! ichat add --text "The sky is blue."      # seeds ./index/factoids
//! export GROQ_API_KEY=...
//! ichat                                     # chat (default command)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Shared data types: `SourceItem`, `Chunk`, `RetrievedChunk`, `ChatMessage` |
//! | [`index`] | Persisted collection: load, create, add, retrieve |
//! | [`search`] | FTS5 keyword retrieval and score normalization |
//! | [`chunk`] | Paragraph-boundary chunker |
//! | [`connector_fs`] | Files and directories → source items |
//! | [`ingest`] | `init` / `add` / `info` commands |
//! | [`llm`] | Hosted chat-completion client |
//! | [`chat`] | Chat engine and modes |
//! | [`repl`] | Interactive loop and `chat` command |
//! | [`logging`] | `tracing` subscriber setup |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod connector_fs;
pub mod db;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod repl;
pub mod search;

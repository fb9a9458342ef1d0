//! Chat engine: retrieval over an [`IndexHandle`] plus a conversational
//! [`LlmClient`].
//!
//! # Modes
//!
//! | Mode | Retrieval query | Model calls per turn |
//! |------|-----------------|----------------------|
//! | `simple` | none | 1 |
//! | `context` | the user's message | 1 |
//! | `condense_plus_context` | a standalone rewrite of the message | 2 (1 on the first turn) |
//!
//! Retrieved chunks are placed in the system prompt; history follows, then
//! the new user message.

use anyhow::bail;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ChatConfig;
use crate::index::{IndexError, IndexHandle};
use crate::llm::LlmClient;
use crate::models::{ChatMessage, RetrievedChunk};

#[derive(Debug, Error)]
pub enum ChatError {
    /// The message was rejected before any retrieval or generation.
    #[error("{0}")]
    InvalidInput(String),

    #[error("chat engine requires an index")]
    MissingIndex,

    #[error("chat engine requires an llm client")]
    MissingLlm,

    #[error("retrieval failed: {0}")]
    Retrieval(#[from] IndexError),

    #[error("generation failed: {0:#}")]
    Generation(anyhow::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMode {
    Simple,
    Context,
    CondensePlusContext,
}

impl ChatMode {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "simple" => Ok(Self::Simple),
            "context" => Ok(Self::Context),
            "condense_plus_context" => Ok(Self::CondensePlusContext),
            other => bail!(
                "Unknown chat mode: '{}'. Use simple, context, or condense_plus_context.",
                other
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub mode: ChatMode,
    pub system_prompt: String,
    pub top_k: usize,
    pub candidate_k: i64,
    pub max_input_chars: usize,
    pub history_limit: usize,
}

impl Default for ChatOptions {
    fn default() -> Self {
        let chat = ChatConfig::default();
        Self {
            mode: ChatMode::CondensePlusContext,
            system_prompt: chat.system_prompt,
            top_k: 4,
            candidate_k: 40,
            max_input_chars: chat.max_input_chars,
            history_limit: chat.history_limit,
        }
    }
}

impl ChatOptions {
    pub fn from_config(config: &crate::config::Config) -> anyhow::Result<Self> {
        Ok(Self {
            mode: ChatMode::parse(&config.chat.mode)?,
            system_prompt: config.chat.system_prompt.clone(),
            top_k: config.retrieval.top_k,
            candidate_k: config.retrieval.candidate_k,
            max_input_chars: config.chat.max_input_chars,
            history_limit: config.chat.history_limit,
        })
    }
}

/// One answered turn.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub response: String,
    pub sources: Vec<RetrievedChunk>,
}

impl std::fmt::Display for ChatResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.response)
    }
}

/// Assembles a [`ChatEngine`], refusing to build until both the index and
/// the client are supplied.
#[derive(Default)]
pub struct ChatEngineBuilder {
    index: Option<IndexHandle>,
    llm: Option<Box<dyn LlmClient>>,
    options: ChatOptions,
}

impl ChatEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(mut self, index: IndexHandle) -> Self {
        self.index = Some(index);
        self
    }

    pub fn llm(mut self, llm: Box<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<ChatEngine, ChatError> {
        let index = self.index.ok_or(ChatError::MissingIndex)?;
        let llm = self.llm.ok_or(ChatError::MissingLlm)?;
        Ok(ChatEngine {
            index,
            llm,
            options: self.options,
            history: Vec::new(),
        })
    }
}

impl IndexHandle {
    /// Bind this index and `llm` into a chat engine.
    pub fn as_chat_engine(self, llm: Box<dyn LlmClient>, options: ChatOptions) -> ChatEngine {
        ChatEngine {
            index: self,
            llm,
            options,
            history: Vec::new(),
        }
    }
}

pub struct ChatEngine {
    index: IndexHandle,
    llm: Box<dyn LlmClient>,
    options: ChatOptions,
    history: Vec<ChatMessage>,
}

impl ChatEngine {
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    pub fn collection(&self) -> &str {
        self.index.collection()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Answer one user message, updating history on success.
    pub async fn chat(&mut self, message: &str) -> Result<ChatResponse, ChatError> {
        validate_input(message, self.options.max_input_chars)?;
        let message = message.trim();

        let sources = match self.options.mode {
            ChatMode::Simple => Vec::new(),
            ChatMode::Context => self.retrieve(message).await?,
            ChatMode::CondensePlusContext => {
                let standalone = self.condense(message).await?;
                self.retrieve(&standalone).await?
            }
        };

        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::system(build_system_prompt(
            &self.options.system_prompt,
            &sources,
            self.options.mode != ChatMode::Simple,
        )));
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::user(message));

        let response = self
            .llm
            .chat(&messages)
            .await
            .map_err(ChatError::Generation)?;

        self.history.push(ChatMessage::user(message));
        self.history.push(ChatMessage::assistant(response.clone()));
        trim_history(&mut self.history, self.options.history_limit);

        Ok(ChatResponse { response, sources })
    }

    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>, ChatError> {
        Ok(self
            .index
            .retrieve(query, self.options.top_k, self.options.candidate_k)
            .await?)
    }

    /// Rewrite a follow-up into a standalone question using history.
    async fn condense(&self, message: &str) -> Result<String, ChatError> {
        if self.history.is_empty() {
            return Ok(message.to_string());
        }

        let prompt = build_condense_prompt(&self.history, message);
        let rewritten = self
            .llm
            .chat(&[ChatMessage::user(prompt)])
            .await
            .map_err(ChatError::Generation)?;

        let rewritten = rewritten.trim();
        if rewritten.is_empty() {
            return Ok(message.to_string());
        }
        debug!(question = %rewritten, "condensed question");
        Ok(rewritten.to_string())
    }
}

/// Reject empty, oversized, or control-character input.
pub fn validate_input(message: &str, max_chars: usize) -> Result<(), ChatError> {
    let result = if message.trim().is_empty() {
        Err(ChatError::InvalidInput("Message must not be empty.".to_string()))
    } else if message.chars().count() > max_chars {
        Err(ChatError::InvalidInput(format!(
            "Message is too long: {} characters (limit {}).",
            message.chars().count(),
            max_chars
        )))
    } else if message
        .chars()
        .any(|c| c.is_control() && c != '\t' && c != '\n')
    {
        Err(ChatError::InvalidInput(
            "Message contains control characters.".to_string(),
        ))
    } else {
        Ok(())
    };

    if let Err(ref e) = result {
        warn!(error = %e, "rejected chat input");
    }
    result
}

fn build_system_prompt(base: &str, sources: &[RetrievedChunk], retrieval: bool) -> String {
    if !retrieval {
        return base.to_string();
    }

    let mut prompt = String::from(base);
    prompt.push_str("\n\nContext information is below.\n--------------------\n");
    if sources.is_empty() {
        prompt.push_str("(no matching documents)\n");
    }
    for (i, chunk) in sources.iter().enumerate() {
        if i > 0 {
            prompt.push('\n');
        }
        if let Some(ref title) = chunk.title {
            prompt.push_str(&format!("[{}] {}\n", i + 1, title));
        } else {
            prompt.push_str(&format!("[{}]\n", i + 1));
        }
        prompt.push_str(chunk.text.trim());
        prompt.push('\n');
    }
    prompt.push_str("--------------------");
    prompt
}

fn build_condense_prompt(history: &[ChatMessage], message: &str) -> String {
    let mut transcript = String::new();
    for m in history {
        let speaker = match m.role {
            crate::models::Role::User => "User",
            crate::models::Role::Assistant => "Assistant",
            crate::models::Role::System => continue,
        };
        transcript.push_str(&format!("{}: {}\n", speaker, m.content));
    }

    format!(
        "Given the conversation below and a follow-up message, rewrite the follow-up \
         as a standalone question that keeps all relevant context. Reply with the \
         question only.\n\nConversation:\n{}\nFollow-up message: {}\n\nStandalone question:",
        transcript, message
    )
}

/// Drop the oldest messages beyond `limit`, keeping user/assistant pairs intact.
fn trim_history(history: &mut Vec<ChatMessage>, limit: usize) {
    if history.len() <= limit {
        return;
    }
    let mut excess = history.len() - limit;
    if excess % 2 == 1 {
        excess += 1;
    }
    history.drain(..excess.min(history.len()));
}

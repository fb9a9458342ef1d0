//! Read-generate-print loop over a [`ChatEngine`].
//!
//! The loop reads one line at a time from any [`BufRead`] and writes replies
//! to any [`Write`], so tests drive it with in-memory buffers and the binary
//! drives it with stdin/stdout.
//!
//! ```text
//!  Idle ──▶ Awaiting Input ──line──▶ Generating ──▶ Printing ─┐
//!              ▲   │                                          │
//!              │   └─ exit / quit / EOF ──▶ Terminated         │
//!              └──────────────────────────────────────────────┘
//! ```

use anyhow::bail;
use std::io::{BufRead, Write};
use tracing::debug;

use crate::chat::{ChatEngine, ChatError, ChatOptions};
use crate::config::Config;
use crate::index::IndexHandle;
use crate::llm;

/// What to do when a message fails input validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidInputPolicy {
    /// Stop the loop and hand the error to the caller.
    Exit,
    /// Print the error and keep reading.
    Continue,
}

impl InvalidInputPolicy {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "exit" => Ok(Self::Exit),
            "continue" => Ok(Self::Continue),
            other => bail!(
                "Unknown chat.on_invalid_input: '{}'. Use exit or continue.",
                other
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplOptions {
    /// Print the banner, `Human: ` prompts and `Assistant: ` labels.
    pub interactive: bool,
    pub on_invalid_input: InvalidInputPolicy,
}

impl Default for ReplOptions {
    fn default() -> Self {
        Self {
            interactive: true,
            on_invalid_input: InvalidInputPolicy::Exit,
        }
    }
}

/// How the loop ended when it ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplExit {
    /// The user typed `exit` or `quit`.
    Command,
    EndOfInput,
}

/// Run the loop until an exit command, end of input, or an error.
///
/// History is cleared on entry. Under [`InvalidInputPolicy::Exit`] the
/// first [`ChatError::InvalidInput`] ends the loop and is returned; every
/// other error is returned as soon as it occurs.
pub async fn run_repl<R, W>(
    engine: &mut ChatEngine,
    mut input: R,
    output: &mut W,
    options: &ReplOptions,
) -> Result<ReplExit, ChatError>
where
    R: BufRead,
    W: Write,
{
    engine.reset();

    if options.interactive {
        writeln!(output, "===== Entering Chat REPL =====")?;
        writeln!(output, "Type \"exit\" to exit.")?;
        writeln!(output)?;
    }

    let mut line = String::new();
    loop {
        if options.interactive {
            write!(output, "Human: ")?;
            output.flush()?;
        }

        // Lines are read whole; `max_input_chars` is only checked afterwards.
        line.clear();
        if input.read_line(&mut line)? == 0 {
            debug!("end of input");
            if options.interactive {
                writeln!(output)?;
            }
            return Ok(ReplExit::EndOfInput);
        }

        let message = line.trim_end_matches(['\n', '\r']);
        let command = message.trim();
        if command.is_empty() {
            continue;
        }
        if command.eq_ignore_ascii_case("exit") || command.eq_ignore_ascii_case("quit") {
            return Ok(ReplExit::Command);
        }

        match engine.chat(message).await {
            Ok(reply) => {
                if options.interactive {
                    writeln!(output, "Assistant: {}", reply.response.trim())?;
                    writeln!(output)?;
                } else {
                    writeln!(output, "{}", reply.response.trim())?;
                }
                output.flush()?;
            }
            Err(ChatError::InvalidInput(msg))
                if options.on_invalid_input == InvalidInputPolicy::Continue =>
            {
                writeln!(output, "{}", msg)?;
                output.flush()?;
            }
            Err(e) => return Err(e),
        }
    }
}

/// CLI entry point for `ichat chat`: load the index, build the client,
/// and run the loop on stdin/stdout.
///
/// Load and client-construction failures propagate. A validation error that
/// ends the loop is printed to stdout and treated as a normal exit.
pub async fn run_chat(config: &Config) -> anyhow::Result<()> {
    let index = IndexHandle::load_from_disk(&config.index.dir, &config.index.collection).await?;
    let llm = llm::create_client(&config.llm)?;
    let mut engine = index.as_chat_engine(llm, ChatOptions::from_config(config)?);

    let options = ReplOptions {
        interactive: atty::is(atty::Stream::Stdin),
        on_invalid_input: InvalidInputPolicy::parse(&config.chat.on_invalid_input)?,
    };

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();

    match run_repl(&mut engine, stdin.lock(), &mut stdout, &options).await {
        Ok(exit) => {
            debug!(?exit, "chat session ended");
            Ok(())
        }
        Err(ChatError::InvalidInput(msg)) => {
            writeln!(stdout, "{}", msg)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

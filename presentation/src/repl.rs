//! The interactive question/answer loop and its slash commands.

use std::future::Future;
use std::io::{self, BufRead, IsTerminal, Write};

use application::chat_engine::ChatEngine;
use application::rag_service::RagService;
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Input};
use domain::ports::ModelCatalog;
use futures::StreamExt;
use infrastructure::ollama_client::OllamaClient;
use shared::confirmation::ask_confirmation;
use shared::types::{RagError, Result};
use tracing::error;

use crate::output;

pub const HELP: &str = "\
Ask a question about the course material, or use a command:
  /help      show this help
  /models    list models installed on the model service
  /clear     forget the conversation so far
  /rebuild   re-index the document folder from scratch
  /exit      leave (also /quit, Ctrl-D)
Press Ctrl-C while an answer is streaming to stop it.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaCommand {
    Help,
    Models,
    Clear,
    Rebuild,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInput {
    Empty,
    Question(String),
    Command(MetaCommand),
    Unknown(String),
}

pub fn parse_input(line: &str) -> UserInput {
    let line = line.trim();
    if line.is_empty() {
        return UserInput::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return UserInput::Question(line.to_string());
    };
    match command.trim().to_ascii_lowercase().as_str() {
        "help" | "h" | "?" => UserInput::Command(MetaCommand::Help),
        "models" => UserInput::Command(MetaCommand::Models),
        "clear" => UserInput::Command(MetaCommand::Clear),
        "rebuild" => UserInput::Command(MetaCommand::Rebuild),
        "exit" | "quit" | "q" => UserInput::Command(MetaCommand::Exit),
        _ => UserInput::Unknown(line.to_string()),
    }
}

/// Read one line. `None` on end of input or an interrupted prompt.
async fn read_line() -> Option<String> {
    tokio::task::spawn_blocking(|| {
        if io::stdin().is_terminal() {
            Input::<String>::with_theme(&ColorfulTheme::default())
                .with_prompt("You")
                .allow_empty(true)
                .interact_text()
                .ok()
        } else {
            let mut line = String::new();
            match io::stdin().lock().read_line(&mut line) {
                Ok(0) | Err(_) => None,
                Ok(_) => Some(line),
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Stream one answer to stdout. Ctrl-C stops the turn and leaves the
/// conversation as it was.
pub async fn stream_answer(engine: &mut ChatEngine, question: &str) -> Result<()> {
    stream_answer_until(engine, question, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

/// Like [`stream_answer`], but the turn stops with `Cancelled` as soon as
/// `cancel` resolves, including while retrieval or the model start-up is
/// still pending.
pub async fn stream_answer_until<F>(engine: &mut ChatEngine, question: &str, cancel: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(cancel);
    let mut turn = tokio::select! {
        turn = engine.ask(question) => turn?,
        _ = &mut cancel => {
            println!();
            return Err(RagError::Cancelled);
        }
    };
    let mut stdout = io::stdout();
    loop {
        tokio::select! {
            fragment = turn.next() => match fragment {
                Some(Ok(text)) => {
                    print!("{text}");
                    stdout.flush()?;
                }
                Some(Err(e)) => {
                    println!();
                    return Err(e);
                }
                None => break,
            },
            _ = &mut cancel => {
                println!();
                return Err(RagError::Cancelled);
            }
        }
    }
    println!();
    output::print_sources(turn.sources());
    Ok(())
}

pub struct Repl {
    engine: ChatEngine,
    rag: RagService,
    client: OllamaClient,
}

impl Repl {
    pub fn new(engine: ChatEngine, rag: RagService, client: OllamaClient) -> Self {
        Self { engine, rag, client }
    }

    pub async fn run(&mut self) -> Result<()> {
        println!(
            "{} model {}, {} chunks indexed. Type /help for commands.",
            "Ready:".green().bold(),
            self.engine.model_name().cyan(),
            self.engine.index().len()
        );
        while let Some(line) = read_line().await {
            match parse_input(&line) {
                UserInput::Empty => continue,
                UserInput::Question(question) => {
                    println!("{}", "Assistant:".blue().bold());
                    match stream_answer(&mut self.engine, &question).await {
                        Ok(()) => {}
                        Err(RagError::Cancelled) => println!("{}", "(answer stopped; not added to the conversation)".yellow()),
                        Err(e) => {
                            error!(error = %e, "turn failed");
                            output::print_rag_error(&e);
                        }
                    }
                }
                UserInput::Command(MetaCommand::Exit) => break,
                UserInput::Command(command) => {
                    if let Err(e) = self.handle_command(command).await {
                        output::print_rag_error(&e);
                    }
                }
                UserInput::Unknown(input) => {
                    println!("{} {input}. Type /help for the list.", "Unknown command:".yellow());
                }
            }
        }
        println!("Bye.");
        Ok(())
    }

    async fn handle_command(&mut self, command: MetaCommand) -> Result<()> {
        match command {
            MetaCommand::Help => println!("{HELP}"),
            MetaCommand::Models => {
                let models = self.client.list_models().await?;
                let embedding_model = self.rag.settings().embedding_model.as_str();
                output::print_models(&models, &[self.engine.model_name(), embedding_model]);
            }
            MetaCommand::Clear => {
                self.engine.clear_memory();
                println!("{}", "Conversation cleared.".green());
            }
            MetaCommand::Rebuild => {
                if !ask_confirmation("Re-embed every document now?", true)? {
                    return Ok(());
                }
                println!("{}", "Rebuilding index...".cyan());
                let index = self.rag.rebuild().await?;
                output::print_index_summary(&index);
                self.engine.replace_index(index);
            }
            MetaCommand::Exit => {}
        }
        Ok(())
    }
}

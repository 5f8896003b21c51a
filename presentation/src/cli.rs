use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use application::chat_engine::ChatEngine;
use application::rag_service::RagService;
use clap::Parser;
use colored::Colorize;
use domain::ports::ModelCatalog;
use infrastructure::config::{resolve_embedding_model, resolve_llm_model, Config, LLM_PRESETS};
use infrastructure::embedder::Embedder;
use infrastructure::ollama_client::OllamaClient;
use infrastructure::pdf_converter::PdfConverter;
use shared::telemetry::init_logging;
use tracing::info;

use crate::output;
use crate::repl::{self, Repl};

#[derive(Parser, Debug)]
#[command(name = "rag_chat")]
#[command(about = "Chat with your course PDFs through a local Ollama model")]
pub struct Cli {
    /// Generation model name or preset (small, medium, large, alternative, mistral)
    #[arg(long)]
    pub model: Option<String>,

    /// Embedding model name or preset (nomic, mxbai, all-minilm)
    #[arg(long)]
    pub embedding_model: Option<String>,

    /// Rebuild the index from the markdown folder before starting
    #[arg(long)]
    pub rebuild: bool,

    /// Build or load the index, then exit
    #[arg(long)]
    pub index_only: bool,

    /// Convert the PDFs in the PDF folder to markdown, then exit
    #[arg(long)]
    pub convert: bool,

    /// List installed models, then exit
    #[arg(long)]
    pub list_models: bool,

    /// Folder of markdown documents
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Folder holding the index snapshot
    #[arg(long)]
    pub index_dir: Option<PathBuf>,

    /// Number of chunks retrieved per question
    #[arg(long)]
    pub top_k: Option<usize>,

    /// Log filter, e.g. info or rag=debug
    #[arg(long)]
    pub log_level: Option<String>,

    /// Ask one question and exit instead of starting the chat loop
    #[arg(trailing_var_arg = true)]
    pub question: Vec<String>,
}

impl Cli {
    /// Command-line values win over the environment.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(model) = &self.model {
            config.llm_model = resolve_llm_model(model);
        }
        if let Some(model) = &self.embedding_model {
            config.embedding_model = resolve_embedding_model(model);
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(dir) = &self.index_dir {
            config.index_dir = dir.clone();
        }
        if let Some(k) = self.top_k {
            config.top_k = k;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
    }

    pub fn one_shot_question(&self) -> Option<String> {
        let question = self.question.join(" ");
        let question = question.trim();
        (!question.is_empty()).then(|| question.to_string())
    }
}

pub struct CliApp {
    config: Config,
}

impl CliApp {
    pub fn new(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = Config::from_env().context("reading configuration")?;
        cli.apply_to(&mut config);
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn run(&mut self, cli: Cli) -> anyhow::Result<()> {
        init_logging(&self.config.log_level);

        if cli.convert {
            return self.handle_convert().await;
        }

        let client = OllamaClient::new(&self.config)?;
        if cli.list_models {
            let models = client.list_models().await?;
            output::print_models(&models, &[self.config.llm_model.as_str(), self.config.embedding_model.as_str()]);
            return Ok(());
        }

        client.ensure_model(&self.config.embedding_model).await?;
        if !cli.index_only {
            if let Err(e) = client.ensure_model(&self.config.llm_model).await {
                print_presets();
                return Err(e.into());
            }
        }

        let embedder = Embedder::new(Arc::new(client.clone()))
            .with_batching(self.config.embed_batch_size, self.config.embed_concurrency);
        let rag = RagService::new(&self.config, embedder.clone());
        if cli.rebuild || !rag.storage().exists() {
            println!("{}", "Building index, this embeds every chunk once...".cyan());
        }
        let index = rag.load_or_build(cli.rebuild).await?;
        output::print_index_summary(&index);
        if cli.index_only {
            return Ok(());
        }

        let mut engine = ChatEngine::from_config(&self.config, index, embedder, Arc::new(client.clone()));
        if let Some(question) = cli.one_shot_question() {
            info!(model = %self.config.llm_model, "answering one question");
            repl::stream_answer(&mut engine, &question).await?;
            return Ok(());
        }

        Repl::new(engine, rag, client).run().await?;
        Ok(())
    }

    async fn handle_convert(&self) -> anyhow::Result<()> {
        let converter = PdfConverter::new(&self.config.pdf_dir, &self.config.data_dir);
        println!(
            "{} {} -> {}",
            "Converting PDFs:".cyan().bold(),
            self.config.pdf_dir.display(),
            self.config.data_dir.display()
        );
        let report = tokio::task::spawn_blocking(move || converter.convert_all())
            .await
            .context("PDF conversion task panicked")??;
        output::print_conversion_report(&report);
        if !report.converted.is_empty() {
            println!("Run with --rebuild to index the new documents.");
        }
        Ok(())
    }
}

fn print_presets() {
    println!("{}", "Model presets:".green().bold());
    for preset in LLM_PRESETS {
        println!("  {:<12} {:<18} {}", preset.key, preset.model, preset.description.dimmed());
    }
}

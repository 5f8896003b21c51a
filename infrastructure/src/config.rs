use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use domain::models::{ContextOverflow, DistanceMetric};
use dotenvy::dotenv;
use reqwest::Url;
use shared::types::{RagError, Result};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant answering questions about the course material. \
Use the provided excerpts from the lecture documents to give precise, helpful answers. \
If you are not sure about an answer, say so honestly.";

/// A named generative model the user can pick with `--model <key>`.
pub struct ModelPreset {
    pub key: &'static str,
    pub model: &'static str,
    pub description: &'static str,
}

pub struct EmbeddingPreset {
    pub key: &'static str,
    pub model: &'static str,
    pub dimensions: usize,
    pub description: &'static str,
}

pub const LLM_PRESETS: &[ModelPreset] = &[
    ModelPreset { key: "small", model: "gemma2:2b", description: "smallest, fast but less accurate (~1.5GB)" },
    ModelPreset { key: "medium", model: "gemma2:9b", description: "balanced quality and speed (~5.5GB)" },
    ModelPreset { key: "large", model: "gemma3:27b", description: "best quality (~16GB)" },
    ModelPreset { key: "alternative", model: "llama3.2:latest", description: "Meta Llama 3.2" },
    ModelPreset { key: "mistral", model: "mistral:latest", description: "Mistral 7B" },
];

pub const EMBEDDING_PRESETS: &[EmbeddingPreset] = &[
    EmbeddingPreset {
        key: "nomic",
        model: "nomic-embed-text",
        dimensions: 768,
        description: "default, tuned for semantic search (~274MB)",
    },
    EmbeddingPreset {
        key: "mxbai",
        model: "mxbai-embed-large",
        dimensions: 1024,
        description: "larger and more accurate (~670MB)",
    },
    EmbeddingPreset {
        key: "all-minilm",
        model: "all-minilm",
        dimensions: 384,
        description: "compact and fast (~46MB)",
    },
];

/// Resolve a preset key to its model name; anything else is taken verbatim.
pub fn resolve_llm_model(name: &str) -> String {
    LLM_PRESETS
        .iter()
        .find(|p| p.key.eq_ignore_ascii_case(name))
        .map(|p| p.model.to_string())
        .unwrap_or_else(|| name.to_string())
}

pub fn resolve_embedding_model(name: &str) -> String {
    EMBEDDING_PRESETS
        .iter()
        .find(|p| p.key.eq_ignore_ascii_case(name))
        .map(|p| p.model.to_string())
        .unwrap_or_else(|| name.to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub ollama_base_url: String,
    pub llm_model: String,
    pub embedding_model: String,
    /// Markdown document store.
    pub data_dir: PathBuf,
    /// Snapshot directory.
    pub index_dir: PathBuf,
    /// Source PDFs for `--convert`.
    pub pdf_dir: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub memory_turns: usize,
    /// Characters of retrieved context allowed into one prompt.
    pub context_budget: usize,
    pub context_overflow: ContextOverflow,
    pub distance: DistanceMetric,
    pub temperature: f32,
    pub request_timeout: Duration,
    pub embed_batch_size: usize,
    pub embed_concurrency: usize,
    pub system_prompt: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ollama_base_url: "http://localhost:11434".to_string(),
            llm_model: "gemma3:27b".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            data_dir: PathBuf::from("./llm_ready"),
            index_dir: PathBuf::from("./storage"),
            pdf_dir: PathBuf::from("./data"),
            chunk_size: 1500,
            chunk_overlap: 150,
            top_k: 3,
            memory_turns: 6,
            context_budget: 6000,
            context_overflow: ContextOverflow::DropLeastSimilar,
            distance: DistanceMetric::Cosine,
            temperature: 0.7,
            request_timeout: Duration::from_secs(120),
            embed_batch_size: 32,
            embed_concurrency: 4,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            log_level: "warn".to_string(),
        }
    }
}

fn parse_var<T: FromStr>(key: &str, raw: String) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| RagError::Config(format!("{key}='{raw}': {e}")))
}

impl Config {
    /// Read `.env` (if present) and the process environment, then validate.
    pub fn load() -> Result<Self> {
        let config = Self::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`Config::load`] but leaves validation to the caller, for when
    /// command-line overrides still have to be applied.
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, falling back to defaults.
    /// Does not validate, so callers can apply overrides first.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("OLLAMA_BASE_URL") {
            config.ollama_base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("RAG_LLM_MODEL") {
            config.llm_model = resolve_llm_model(v.trim());
        }
        if let Some(v) = lookup("RAG_EMBEDDING_MODEL") {
            config.embedding_model = resolve_embedding_model(v.trim());
        }
        if let Some(v) = lookup("RAG_DATA_DIR") {
            config.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("RAG_INDEX_DIR") {
            config.index_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("RAG_PDF_DIR") {
            config.pdf_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("RAG_CHUNK_SIZE") {
            config.chunk_size = parse_var("RAG_CHUNK_SIZE", v)?;
        }
        if let Some(v) = lookup("RAG_CHUNK_OVERLAP") {
            config.chunk_overlap = parse_var("RAG_CHUNK_OVERLAP", v)?;
        }
        if let Some(v) = lookup("RAG_TOP_K") {
            config.top_k = parse_var("RAG_TOP_K", v)?;
        }
        if let Some(v) = lookup("RAG_MEMORY_TURNS") {
            config.memory_turns = parse_var("RAG_MEMORY_TURNS", v)?;
        }
        if let Some(v) = lookup("RAG_CONTEXT_BUDGET") {
            config.context_budget = parse_var("RAG_CONTEXT_BUDGET", v)?;
        }
        if let Some(v) = lookup("RAG_CONTEXT_OVERFLOW") {
            config.context_overflow = parse_var("RAG_CONTEXT_OVERFLOW", v)?;
        }
        if let Some(v) = lookup("RAG_DISTANCE") {
            config.distance = parse_var("RAG_DISTANCE", v)?;
        }
        if let Some(v) = lookup("RAG_TEMPERATURE") {
            config.temperature = parse_var("RAG_TEMPERATURE", v)?;
        }
        if let Some(v) = lookup("RAG_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(parse_var("RAG_REQUEST_TIMEOUT_SECS", v)?);
        }
        if let Some(v) = lookup("RAG_EMBED_BATCH_SIZE") {
            config.embed_batch_size = parse_var("RAG_EMBED_BATCH_SIZE", v)?;
        }
        if let Some(v) = lookup("RAG_EMBED_CONCURRENCY") {
            config.embed_concurrency = parse_var("RAG_EMBED_CONCURRENCY", v)?;
        }
        if let Some(v) = lookup("RAG_SYSTEM_PROMPT") {
            config.system_prompt = v;
        }
        if let Some(v) = lookup("RAG_LOG") {
            config.log_level = v.trim().to_string();
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| -> Result<()> { Err(RagError::Config(msg)) };

        if self.llm_model.trim().is_empty() {
            return fail("llm model name must not be empty".into());
        }
        if self.embedding_model.trim().is_empty() {
            return fail("embedding model name must not be empty".into());
        }
        if self.chunk_size == 0 {
            return fail("chunk_size must be greater than zero".into());
        }
        if self.chunk_overlap >= self.chunk_size {
            return fail(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            ));
        }
        if self.top_k == 0 {
            return fail("top_k must be at least 1".into());
        }
        if self.memory_turns == 0 {
            return fail("memory_turns must be at least 1".into());
        }
        if self.context_budget == 0 {
            return fail("context_budget must be greater than zero".into());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return fail(format!("temperature {} is outside 0.0..=2.0", self.temperature));
        }
        if self.request_timeout.is_zero() {
            return fail("request timeout must be greater than zero".into());
        }
        if self.embed_batch_size == 0 || self.embed_concurrency == 0 {
            return fail("embedding batch size and concurrency must be at least 1".into());
        }
        if let Err(e) = Url::parse(&self.ollama_base_url) {
            return fail(format!("invalid OLLAMA_BASE_URL '{}': {e}", self.ollama_base_url));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config, Config::default());
        config.validate().unwrap();
    }

    #[test]
    fn reads_typed_values_and_presets() {
        let config = Config::from_lookup(lookup(&[
            ("RAG_LLM_MODEL", "small"),
            ("RAG_EMBEDDING_MODEL", "mxbai"),
            ("RAG_TOP_K", "5"),
            ("RAG_DISTANCE", "l2"),
            ("RAG_CONTEXT_OVERFLOW", "trim"),
            ("RAG_REQUEST_TIMEOUT_SECS", "30"),
            ("OLLAMA_BASE_URL", "http://gpu-box:11434/"),
        ]))
        .unwrap();
        assert_eq!(config.llm_model, "gemma2:2b");
        assert_eq!(config.embedding_model, "mxbai-embed-large");
        assert_eq!(config.top_k, 5);
        assert_eq!(config.distance, DistanceMetric::L2);
        assert_eq!(config.context_overflow, ContextOverflow::TrimLeastSimilar);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.ollama_base_url, "http://gpu-box:11434");
    }

    #[test]
    fn unparsable_values_name_the_variable() {
        let err = Config::from_lookup(lookup(&[("RAG_TOP_K", "many")])).unwrap_err();
        assert!(err.to_string().contains("RAG_TOP_K"));
    }

    #[test]
    fn validation_rejects_inconsistent_settings() {
        let overlap = Config { chunk_size: 100, chunk_overlap: 100, ..Config::default() };
        assert!(matches!(overlap.validate(), Err(RagError::Config(_))));

        let top_k = Config { top_k: 0, ..Config::default() };
        assert!(top_k.validate().is_err());

        let memory = Config { memory_turns: 0, ..Config::default() };
        assert!(memory.validate().is_err());

        let url = Config { ollama_base_url: "not a url".into(), ..Config::default() };
        assert!(url.validate().is_err());

        let temperature = Config { temperature: 3.5, ..Config::default() };
        assert!(temperature.validate().is_err());
    }

    #[test]
    fn unknown_names_pass_through_unresolved() {
        assert_eq!(resolve_llm_model("qwen2.5:7b"), "qwen2.5:7b");
        assert_eq!(resolve_llm_model("LARGE"), "gemma3:27b");
        assert_eq!(resolve_embedding_model("nomic"), "nomic-embed-text");
    }
}

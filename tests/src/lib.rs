//! Deterministic stand-ins for the model service, shared by the
//! integration tests.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use domain::ports::{EmbeddingService, FragmentStream, GenerationService};
use domain::session::ChatMessage;
use futures::future;
use futures::stream::{self, StreamExt};
use infrastructure::config::Config;
use infrastructure::embedder::Embedder;
use shared::types::{RagError, Result};

pub const LETTERS_MODEL: &str = "letters";

/// 27-dimensional vector: counts of `a`..`z` plus a constant so no vector
/// is ever zero.
pub fn letter_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; 27];
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() {
            vector[(c as u8 - b'a') as usize] += 1.0;
        }
    }
    vector[26] = 1.0;
    vector
}

pub struct LetterEmbedder;

#[async_trait]
impl EmbeddingService for LetterEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(letter_vector(text))
    }

    fn model_name(&self) -> &str {
        LETTERS_MODEL
    }
}

/// Embeds `successes` texts, then reports the service as gone.
pub struct FailingEmbedder {
    remaining: AtomicUsize,
}

impl FailingEmbedder {
    pub fn after(successes: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(successes),
        }
    }
}

#[async_trait]
impl EmbeddingService for FailingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let left = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match left {
            Ok(_) => Ok(letter_vector(text)),
            Err(_) => Err(RagError::ServiceUnavailable {
                endpoint: "http://localhost:11434/api/embed".into(),
                message: "connection refused".into(),
            }),
        }
    }

    fn model_name(&self) -> &str {
        LETTERS_MODEL
    }
}

/// What the scripted generator does for one turn.
pub enum Reply {
    Answer(Vec<&'static str>),
    /// Emit the fragments, then fail.
    FailAfter(Vec<&'static str>, &'static str),
    /// Emit the fragments, then never finish.
    Stall(Vec<&'static str>),
    /// Never answer the request at all, like a model that is still loading.
    Hang,
}

impl Reply {
    pub fn text(text: &'static str) -> Self {
        Reply::Answer(vec![text])
    }
}

/// Plays back queued replies and records every prompt it is sent.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Reply>>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedGenerator {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn last_prompt(&self) -> Vec<ChatMessage> {
        self.prompts().pop().unwrap_or_default()
    }
}

fn fragments(parts: Vec<&'static str>) -> impl futures::Stream<Item = Result<String>> + Send {
    stream::iter(parts.into_iter().map(|p| Ok(p.to_string())))
}

#[async_trait]
impl GenerationService for ScriptedGenerator {
    async fn generate(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(messages);
        }
        let reply = self
            .replies
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .unwrap_or_else(|| Reply::text("ok"));
        let stream: FragmentStream = match reply {
            Reply::Answer(parts) => Box::pin(fragments(parts)),
            Reply::FailAfter(parts, message) => Box::pin(
                fragments(parts).chain(stream::once(async move { Err(RagError::GenerationFailed(message.to_string())) })),
            ),
            Reply::Stall(parts) => Box::pin(fragments(parts).chain(stream::pending())),
            Reply::Hang => return future::pending().await,
        };
        Ok(stream)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Configuration rooted in a scratch directory: documents in `docs/`, the
/// snapshot in `index/`.
pub fn test_config(root: &Path) -> Config {
    Config {
        data_dir: root.join("docs"),
        index_dir: root.join("index"),
        pdf_dir: root.join("pdf"),
        embedding_model: LETTERS_MODEL.to_string(),
        llm_model: "scripted".to_string(),
        chunk_size: 200,
        chunk_overlap: 20,
        top_k: 3,
        memory_turns: 4,
        embed_batch_size: 2,
        embed_concurrency: 2,
        ..Config::default()
    }
}

pub fn write_docs(dir: &Path, docs: &[(&str, &str)]) {
    fs::create_dir_all(dir).unwrap();
    for (name, text) in docs {
        fs::write(dir.join(name), text).unwrap();
    }
}

pub fn letters_embedder() -> Embedder {
    Embedder::new(Arc::new(LetterEmbedder)).with_batching(2, 2)
}

pub const COURSE_DOCS: &[(&str, &str)] = &[
    ("week1.md", "# Stacks\n\nA stack keeps items in last in, first out order. Push adds, pop removes."),
    ("week2.md", "# Queues\n\nA queue serves items first in, first out. Enqueue at the back, dequeue at the front."),
    ("week3.md", "# Hashing\n\nA hash map buckets keys by hash value for constant time lookup on average."),
];

//! HTTP client for a local Ollama daemon: embeddings, streamed chat, and the
//! model listing used as a health probe.

use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use domain::models::ModelInfo;
use domain::ports::{EmbeddingService, FragmentStream, GenerationService, ModelCatalog};
use domain::session::ChatMessage;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use shared::types::{RagError, Result};
use tracing::{debug, warn};

use crate::config::Config;

const MAX_RETRIES: u32 = 1;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Deserialize)]
struct ChatChunkMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChatChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Tags,
    Embed,
    Chat,
}

impl Endpoint {
    fn path(self) -> &'static str {
        match self {
            Endpoint::Tags => "/api/tags",
            Endpoint::Embed => "/api/embed",
            Endpoint::Chat => "/api/chat",
        }
    }

    fn operation(self) -> &'static str {
        match self {
            Endpoint::Tags => "listing models",
            Endpoint::Embed => "embedding",
            Endpoint::Chat => "generation",
        }
    }
}

/// One line of the streamed chat body.
#[derive(Debug, PartialEq)]
pub enum ChatLine {
    Fragment(String),
    Done(String),
}

/// Splits a byte stream into newline-delimited JSON records.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    /// Feed bytes, returning every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Whatever is left once the body ends without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        (!line.is_empty()).then_some(line)
    }
}

pub fn parse_chat_line(line: &str) -> Result<ChatLine> {
    let chunk: ChatChunk = serde_json::from_str(line)
        .map_err(|e| RagError::GenerationFailed(format!("malformed response line: {e}")))?;
    if let Some(error) = chunk.error {
        return Err(RagError::GenerationFailed(error));
    }
    let text = chunk.message.map(|m| m.content).unwrap_or_default();
    if chunk.done {
        if chunk.done_reason.as_deref() == Some("length") {
            warn!("answer hit the model's output limit and may be cut short");
        }
        Ok(ChatLine::Done(text))
    } else {
        Ok(ChatLine::Fragment(text))
    }
}

/// `nomic-embed-text` is installed as `nomic-embed-text:latest`.
pub fn model_matches(wanted: &str, installed: &str) -> bool {
    installed == wanted || (!wanted.contains(':') && installed == format!("{wanted}:latest"))
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Arc<Client>,
    base_url: String,
    model: String,
    embedding_model: String,
    temperature: f32,
    timeout: Duration,
    retry_backoff: Duration,
}

impl OllamaClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| RagError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client: Arc::new(client),
            base_url: config.ollama_base_url.trim_end_matches('/').to_string(),
            model: config.llm_model.clone(),
            embedding_model: config.embedding_model.clone(),
            temperature: config.temperature,
            timeout: config.request_timeout,
            retry_backoff: Duration::from_millis(500),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }

    /// Fail fast unless `model` is installed.
    pub async fn ensure_model(&self, model: &str) -> Result<()> {
        let installed = self.list_models().await?;
        if installed.iter().any(|m| model_matches(model, &m.name)) {
            return Ok(());
        }
        Err(RagError::ModelNotFound {
            model: model.to_string(),
            available: installed.into_iter().map(|m| m.name).collect(),
        })
    }

    pub async fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.url(Endpoint::Embed);
        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: texts,
        };
        let response = self
            .send_with_retry(Endpoint::Embed, &self.embedding_model, None, || {
                self.client.post(&url).json(&request).timeout(self.timeout)
            })
            .await?;
        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| self.transport_error(Endpoint::Embed, e))?;
        if body.embeddings.len() != texts.len() {
            return Err(RagError::ServiceUnavailable {
                endpoint: url,
                message: format!(
                    "returned {} embeddings for {} inputs",
                    body.embeddings.len(),
                    texts.len()
                ),
            });
        }
        Ok(body.embeddings)
    }

    pub async fn chat_stream(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream> {
        let url = self.url(Endpoint::Chat);
        let request = ChatRequest {
            model: &self.model,
            messages: &messages,
            stream: true,
            options: ChatOptions {
                temperature: self.temperature,
            },
        };
        let idle = self.timeout;
        let response = self
            .send_with_retry(Endpoint::Chat, &self.model, Some(idle), || {
                self.client.post(&url).json(&request)
            })
            .await?;

        let mut body = response.bytes_stream();
        let stream = try_stream! {
            let mut decoder = NdjsonDecoder::default();
            let mut finished = false;
            while !finished {
                let next = tokio::time::timeout(idle, body.next())
                    .await
                    .map_err(|_| RagError::Timeout {
                        operation: "waiting for the next answer fragment".to_string(),
                        seconds: idle.as_secs(),
                    })?;
                let Some(bytes) = next else { break };
                let bytes = bytes
                    .map_err(|e| RagError::GenerationFailed(format!("answer stream interrupted: {e}")))?;
                for line in decoder.push(&bytes) {
                    match parse_chat_line(&line)? {
                        ChatLine::Fragment(text) => {
                            if !text.is_empty() {
                                yield text;
                            }
                        }
                        ChatLine::Done(text) => {
                            if !text.is_empty() {
                                yield text;
                            }
                            finished = true;
                            break;
                        }
                    }
                }
            }
            if !finished {
                if let Some(line) = decoder.finish() {
                    if let ChatLine::Done(text) = parse_chat_line(&line)? {
                        if !text.is_empty() {
                            yield text;
                        }
                        finished = true;
                    }
                }
            }
            if !finished {
                Err(RagError::GenerationFailed(
                    "answer stream ended before the model finished".to_string(),
                ))?;
            }
        };
        Ok(Box::pin(stream))
    }

    /// `head_timeout` bounds each attempt separately until the response
    /// head arrives, so a timed-out first attempt still gets its retry.
    async fn send_with_retry<F>(
        &self,
        endpoint: Endpoint,
        model: &str,
        head_timeout: Option<Duration>,
        build: F,
    ) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let sent = match head_timeout {
                Some(limit) => tokio::time::timeout(limit, self.send_once(endpoint, model, build()))
                    .await
                    .unwrap_or_else(|_| {
                        Err(RagError::Timeout {
                            operation: "waiting for the model to start answering".to_string(),
                            seconds: limit.as_secs(),
                        })
                    }),
                None => self.send_once(endpoint, model, build()).await,
            };
            match sent {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!(operation = endpoint.operation(), error = %e, attempt, "retrying model service request");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, endpoint: Endpoint, model: &str, request: RequestBuilder) -> Result<Response> {
        debug!(url = %self.url(endpoint), "sending model service request");
        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(endpoint, e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(self.status_error(endpoint, model, status, &body))
    }

    fn transport_error(&self, endpoint: Endpoint, e: reqwest::Error) -> RagError {
        if e.is_timeout() {
            RagError::Timeout {
                operation: endpoint.operation().to_string(),
                seconds: self.timeout.as_secs(),
            }
        } else {
            RagError::ServiceUnavailable {
                endpoint: self.url(endpoint),
                message: e.to_string(),
            }
        }
    }

    fn status_error(&self, endpoint: Endpoint, model: &str, status: StatusCode, body: &str) -> RagError {
        let message = serde_json::from_str::<ErrorBody>(body)
            .map(|b| b.error)
            .unwrap_or_else(|_| body.trim().to_string());

        if status == StatusCode::NOT_FOUND && message.contains("not found") && endpoint != Endpoint::Tags {
            return RagError::ModelNotFound {
                model: model.to_string(),
                available: Vec::new(),
            };
        }
        if status.is_server_error() || endpoint != Endpoint::Chat {
            return RagError::ServiceUnavailable {
                endpoint: self.url(endpoint),
                message: format!("{status}: {message}"),
            };
        }
        RagError::GenerationFailed(format!("{status}: {message}"))
    }
}

#[async_trait]
impl EmbeddingService for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.generate_embeddings(&[text]).await?;
        vectors.pop().ok_or_else(|| RagError::ServiceUnavailable {
            endpoint: self.url(Endpoint::Embed),
            message: "no embedding returned".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.generate_embeddings(texts).await
    }

    fn model_name(&self) -> &str {
        &self.embedding_model
    }
}

#[async_trait]
impl GenerationService for OllamaClient {
    async fn generate(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream> {
        self.chat_stream(messages).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ModelCatalog for OllamaClient {
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self.url(Endpoint::Tags);
        let response = self
            .send_with_retry(Endpoint::Tags, "", None, || self.client.get(&url).timeout(self.timeout))
            .await?;
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| self.transport_error(Endpoint::Tags, e))?;
        Ok(tags.models)
    }
}

//! Boundaries to the external model service.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use shared::types::Result;

use crate::models::ModelInfo;
use crate::session::ChatMessage;

/// A lazy, finite, non-restartable sequence of answer fragments.
/// Dropping it abandons the underlying request.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Turns text into fixed-length vectors.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, returning vectors in input order.
    ///
    /// The default calls [`embed`](EmbeddingService::embed) once per text;
    /// services with native batching should override it.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Name of the model producing the vectors, recorded in index snapshots.
    fn model_name(&self) -> &str;
}

/// Produces an answer for a conversation, fragment by fragment.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream>;

    fn model_name(&self) -> &str;
}

/// Lists what the model service has installed.
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;
}

use std::sync::Arc;

use domain::models::{Chunk, Embedding};
use domain::ports::EmbeddingService;
use futures::stream::{self, StreamExt};
use shared::telemetry::Telemetry;
use shared::types::{RagError, Result};
use tracing::{debug, info};

const DEFAULT_BATCH_SIZE: usize = 32;
const DEFAULT_CONCURRENCY: usize = 4;

/// Batches chunk texts through an [`EmbeddingService`], keeping input order.
#[derive(Clone)]
pub struct Embedder {
    service: Arc<dyn EmbeddingService>,
    batch_size: usize,
    concurrency: usize,
}

impl Embedder {
    pub fn new(service: Arc<dyn EmbeddingService>) -> Self {
        Self {
            service,
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_batching(mut self, batch_size: usize, concurrency: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn model_name(&self) -> &str {
        self.service.model_name()
    }

    /// Embed a single query string.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self.service.embed(text).await?;
        if vector.is_empty() {
            return Err(RagError::ServiceUnavailable {
                endpoint: self.model_name().to_string(),
                message: "returned an empty embedding".to_string(),
            });
        }
        Ok(vector)
    }

    /// Embed every chunk. Vectors come back in chunk order and share one
    /// dimensionality, or the whole call fails.
    pub async fn generate_embeddings(&self, chunks: Vec<Chunk>) -> Result<Vec<Embedding>> {
        let total = chunks.len();
        let telemetry = Telemetry::new();
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(total);
        {
            let service = self.service.as_ref();
            let mut batches = stream::iter(chunks.chunks(self.batch_size).map(|batch| async move {
                let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
                let vectors = service.embed_batch(&texts).await?;
                if vectors.len() != batch.len() {
                    return Err(RagError::ServiceUnavailable {
                        endpoint: service.model_name().to_string(),
                        message: format!("returned {} embeddings for {} inputs", vectors.len(), batch.len()),
                    });
                }
                Ok(vectors)
            }))
            .buffered(self.concurrency);

            while let Some(batch) = batches.next().await {
                vectors.extend(batch?);
                debug!(done = vectors.len(), total, "embedded batch");
            }
        }

        let dimensions = vectors.first().map(Vec::len).unwrap_or(0);
        if total > 0 && dimensions == 0 {
            return Err(RagError::ServiceUnavailable {
                endpoint: self.model_name().to_string(),
                message: "returned an empty embedding".to_string(),
            });
        }
        if let Some(odd) = vectors.iter().find(|v| v.len() != dimensions) {
            return Err(RagError::DimensionMismatch {
                expected: dimensions,
                actual: odd.len(),
            });
        }

        info!(
            chunks = total,
            dimensions,
            model = self.model_name(),
            secs = telemetry.elapsed_secs(),
            "embedded chunks"
        );
        Ok(chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| Embedding { chunk, vector })
            .collect())
    }
}

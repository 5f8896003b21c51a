use domain::models::SearchHit;
use infrastructure::embedder::Embedder;
use infrastructure::vector_index::VectorIndex;
use shared::types::{RagError, Result};
use tracing::debug;

/// Embeds a question and looks up its nearest chunks.
#[derive(Clone)]
pub struct Retriever {
    embedder: Embedder,
    top_k: usize,
}

impl Retriever {
    pub fn new(embedder: Embedder, top_k: usize) -> Self {
        Self { embedder, top_k }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Nearest chunks first. An empty index yields no hits rather than an error.
    pub async fn retrieve(&self, index: &VectorIndex, question: &str) -> Result<Vec<SearchHit>> {
        if self.top_k == 0 {
            return Err(RagError::InvalidQuery("top-k must be at least 1".to_string()));
        }
        if index.is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed_query(question).await?;
        let hits = index.query(&vector, self.top_k)?;
        debug!(
            hits = hits.len(),
            best = hits.first().map(|h| h.score).unwrap_or_default(),
            "retrieved context"
        );
        Ok(hits)
    }
}

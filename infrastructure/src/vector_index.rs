//! In-memory vector index over embedded chunks, plus the manifest that
//! describes how it was built.

use chrono::{DateTime, Utc};
use domain::models::{Chunk, DistanceMetric, Embedding, SearchHit};
use serde::{Deserialize, Serialize};
use shared::types::{RagError, Result};
use tracing::{info, warn};

use crate::embedder::Embedder;
use crate::embedding_storage::EmbeddingStorage;
use crate::search::SearchEngine;

/// The parts of the configuration an index depends on. A snapshot built with
/// different settings cannot be reused.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSettings {
    pub embedding_model: String,
    pub metric: DistanceMetric,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub embedding_model: String,
    pub dimensions: usize,
    pub metric: DistanceMetric,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Digest of the document store contents at build time.
    pub corpus_fingerprint: String,
    pub document_count: usize,
    pub chunk_count: usize,
    pub built_at: DateTime<Utc>,
}

impl IndexManifest {
    /// `Err(IndexStale)` when the snapshot was built with other settings.
    pub fn check_compatible(&self, settings: &IndexSettings) -> Result<()> {
        let stale = |reason: String| -> Result<()> { Err(RagError::IndexStale { reason }) };
        if self.embedding_model != settings.embedding_model {
            return stale(format!(
                "built with embedding model '{}', configured '{}'",
                self.embedding_model, settings.embedding_model
            ));
        }
        if self.metric != settings.metric {
            return stale(format!("built with {} distance, configured {}", self.metric, settings.metric));
        }
        if (self.chunk_size, self.chunk_overlap) != (settings.chunk_size, settings.chunk_overlap) {
            return stale(format!(
                "built with chunks of {}/{} chars, configured {}/{}",
                self.chunk_size, self.chunk_overlap, settings.chunk_size, settings.chunk_overlap
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    manifest: IndexManifest,
    entries: Vec<Embedding>,
}

impl VectorIndex {
    /// Assemble an index from already-embedded chunks.
    pub fn from_embeddings(
        settings: &IndexSettings,
        corpus_fingerprint: String,
        document_count: usize,
        entries: Vec<Embedding>,
    ) -> Result<Self> {
        let dimensions = entries.first().map(|e| e.vector.len()).unwrap_or(0);
        let manifest = IndexManifest {
            embedding_model: settings.embedding_model.clone(),
            dimensions,
            metric: settings.metric,
            chunk_size: settings.chunk_size,
            chunk_overlap: settings.chunk_overlap,
            corpus_fingerprint,
            document_count,
            chunk_count: entries.len(),
            built_at: Utc::now(),
        };
        Self::from_parts(manifest, entries)
    }

    /// Validate a manifest against its entries.
    pub fn from_parts(manifest: IndexManifest, entries: Vec<Embedding>) -> Result<Self> {
        if let Some(odd) = entries.iter().find(|e| e.vector.len() != manifest.dimensions) {
            return Err(RagError::DimensionMismatch {
                expected: manifest.dimensions,
                actual: odd.vector.len(),
            });
        }
        if manifest.chunk_count != entries.len() {
            return Err(RagError::Storage(format!(
                "manifest lists {} chunks but {} are present",
                manifest.chunk_count,
                entries.len()
            )));
        }
        Ok(Self { manifest, entries })
    }

    /// Embed `chunks` and build a new index. Nothing is written; on failure
    /// no partial index exists.
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: &Embedder,
        settings: &IndexSettings,
        corpus_fingerprint: String,
        document_count: usize,
    ) -> Result<Self> {
        if embedder.model_name() != settings.embedding_model {
            warn!(
                embedder = embedder.model_name(),
                configured = %settings.embedding_model,
                "embedder reports a different model name than configured"
            );
        }
        let entries = embedder.generate_embeddings(chunks).await?;
        Self::from_embeddings(settings, corpus_fingerprint, document_count, entries)
    }

    /// Write this index as the current snapshot, replacing any previous one
    /// only once the new one is complete.
    pub fn persist(&self, storage: &EmbeddingStorage) -> Result<()> {
        storage.write_snapshot(&self.manifest, &self.entries)?;
        info!(
            chunks = self.entries.len(),
            path = %storage.snapshot_path().display(),
            "index snapshot written"
        );
        Ok(())
    }

    /// Load the current snapshot and check it fits `settings`.
    pub fn load(storage: &EmbeddingStorage, settings: &IndexSettings) -> Result<Self> {
        let (manifest, entries) = storage.read_snapshot()?;
        manifest.check_compatible(settings)?;
        Self::from_parts(manifest, entries).map_err(|e| RagError::IndexCorrupt {
            path: storage.snapshot_path(),
            reason: e.to_string(),
        })
    }

    /// The `k` nearest chunks to `vector`, nearest first. Ties keep the
    /// order chunks were inserted in.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Err(RagError::InvalidQuery("k must be at least 1".to_string()));
        }
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if vector.len() != self.manifest.dimensions {
            return Err(RagError::DimensionMismatch {
                expected: self.manifest.dimensions,
                actual: vector.len(),
            });
        }
        let metric = self.manifest.metric;
        Ok(SearchEngine::nearest(metric, vector, &self.entries, k)
            .into_iter()
            .map(|(pos, distance)| SearchHit {
                chunk: self.entries[pos].chunk.clone(),
                distance,
                score: metric.similarity(distance),
            })
            .collect())
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn entries(&self) -> &[Embedding] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.manifest.dimensions
    }
}

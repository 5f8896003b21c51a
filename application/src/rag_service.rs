//! Index lifecycle: scan the document store, chunk, embed, persist, and load
//! the snapshot back.

use domain::models::Chunk;
use infrastructure::{
    chunker::Chunker,
    config::Config,
    embedder::Embedder,
    embedding_storage::EmbeddingStorage,
    file_scanner::{FileScanResult, FileScanner},
    vector_index::{IndexSettings, VectorIndex},
};
use shared::telemetry::Telemetry;
use shared::types::{RagError, Result};
use tracing::{error, info, warn};

pub struct RagService {
    scanner: FileScanner,
    chunker: Chunker,
    storage: EmbeddingStorage,
    embedder: Embedder,
    settings: IndexSettings,
}

impl RagService {
    pub fn new(config: &Config, embedder: Embedder) -> Self {
        Self {
            scanner: FileScanner::new(&config.data_dir),
            chunker: Chunker::new(config.chunk_size, config.chunk_overlap),
            storage: EmbeddingStorage::new(&config.index_dir),
            embedder,
            settings: IndexSettings {
                embedding_model: config.embedding_model.clone(),
                metric: config.distance,
                chunk_size: config.chunk_size,
                chunk_overlap: config.chunk_overlap,
            },
        }
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub fn storage(&self) -> &EmbeddingStorage {
        &self.storage
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    /// Build a fresh index from the document store and persist it. The
    /// previous snapshot stays in place unless the whole build succeeds.
    pub async fn build(&self) -> Result<VectorIndex> {
        let telemetry = Telemetry::new();
        let scans = self.scanner.scan_documents()?;
        let chunks = self.chunk_documents(&scans);
        if chunks.is_empty() {
            return Err(RagError::EmptyDocumentStore(self.scanner.root().to_path_buf()));
        }
        info!(documents = scans.len(), chunks = chunks.len(), "chunked document store");

        let fingerprint = FileScanner::fingerprint(&scans);
        let index = VectorIndex::build(chunks, &self.embedder, &self.settings, fingerprint, scans.len())
            .await
            .inspect_err(|e| error!(error = %e, "index build failed; previous snapshot kept"))?;
        index.persist(&self.storage)?;

        info!(
            documents = scans.len(),
            chunks = index.len(),
            dimensions = index.dimensions(),
            secs = telemetry.elapsed_secs(),
            "index built"
        );
        Ok(index)
    }

    /// Re-derive the index from the current document store. The only path
    /// that picks up new or changed documents.
    pub async fn rebuild(&self) -> Result<VectorIndex> {
        info!(dir = %self.scanner.root().display(), "rebuilding index from scratch");
        self.build().await
    }

    /// Restore the persisted snapshot without touching the embedding service.
    pub fn load(&self) -> Result<VectorIndex> {
        let index = VectorIndex::load(&self.storage, &self.settings)?;
        self.warn_if_documents_changed(&index);
        info!(chunks = index.len(), built_at = %index.manifest().built_at, "index loaded");
        Ok(index)
    }

    /// Load the snapshot, building a new one when it is missing, unusable,
    /// or when `force_rebuild` is set.
    pub async fn load_or_build(&self, force_rebuild: bool) -> Result<VectorIndex> {
        if force_rebuild {
            return self.rebuild().await;
        }
        match self.load() {
            Ok(index) => Ok(index),
            Err(e @ (RagError::IndexNotFound(_) | RagError::IndexCorrupt { .. } | RagError::IndexStale { .. })) => {
                warn!(reason = %e, "building a new index");
                self.build().await
            }
            Err(e) => Err(e),
        }
    }

    fn chunk_documents(&self, scans: &[FileScanResult]) -> Vec<Chunk> {
        scans
            .iter()
            .flat_map(|scan| self.chunker.chunks(&scan.document))
            .collect()
    }

    fn warn_if_documents_changed(&self, index: &VectorIndex) {
        match self.scanner.scan_documents() {
            Ok(scans) if FileScanner::fingerprint(&scans) != index.manifest().corpus_fingerprint => {
                warn!("documents changed since the index was built; run /rebuild to pick them up");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "could not compare documents against the index"),
        }
    }
}

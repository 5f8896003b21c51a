use std::fs;
use std::sync::Arc;

use application::rag_service::RagService;
use domain::models::{Chunk, DistanceMetric, Embedding};
use infrastructure::embedder::Embedder;
use infrastructure::vector_index::{IndexSettings, VectorIndex};
use proptest::prelude::*;
use shared::types::RagError;
use tempfile::TempDir;
use tests::{letter_vector, letters_embedder, test_config, write_docs, FailingEmbedder, COURSE_DOCS};

#[tokio::test]
async fn loaded_snapshot_answers_like_the_built_index() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    write_docs(&config.data_dir, COURSE_DOCS);
    let rag = RagService::new(&config, letters_embedder());

    let built = rag.build().await.unwrap();
    assert_eq!(built.manifest().document_count, 3);
    let loaded = rag.load().unwrap();

    for question in ["what is a queue?", "hash lookup", "push and pop"] {
        let v = letter_vector(question);
        assert_eq!(built.query(&v, 3).unwrap(), loaded.query(&v, 3).unwrap());
    }
    assert_eq!(built.manifest(), loaded.manifest());
}

#[tokio::test]
async fn failed_rebuild_leaves_the_snapshot_untouched() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    write_docs(&config.data_dir, COURSE_DOCS);
    let rag = RagService::new(&config, letters_embedder());
    rag.build().await.unwrap();
    let snapshot = rag.storage().snapshot_path();
    let before = fs::read(&snapshot).unwrap();

    write_docs(&config.data_dir, &[("week4.md", "# Trees\n\nA binary search tree keeps keys ordered.")]);
    let flaky = RagService::new(&config, Embedder::new(Arc::new(FailingEmbedder::after(2))).with_batching(2, 1));
    let err = flaky.rebuild().await.unwrap_err();

    assert!(matches!(err, RagError::ServiceUnavailable { .. }));
    assert_eq!(fs::read(&snapshot).unwrap(), before);
    assert!(!snapshot.with_extension("db.tmp").exists());
    assert_eq!(rag.load().unwrap().len(), 3);
}

#[tokio::test]
async fn empty_document_store_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    fs::create_dir_all(&config.data_dir).unwrap();
    write_docs(&config.data_dir, &[("blank.md", "   \n\n  ")]);
    let rag = RagService::new(&config, letters_embedder());

    assert!(matches!(rag.build().await, Err(RagError::EmptyDocumentStore(_))));
    assert!(!rag.storage().exists());

    let missing = test_config(&tmp.path().join("nowhere"));
    let rag = RagService::new(&missing, letters_embedder());
    assert!(matches!(rag.build().await, Err(RagError::EmptyDocumentStore(_))));
}

#[tokio::test]
async fn missing_snapshot_is_built_on_demand() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    write_docs(&config.data_dir, COURSE_DOCS);
    let rag = RagService::new(&config, letters_embedder());

    assert!(matches!(rag.load(), Err(RagError::IndexNotFound(_))));
    let index = rag.load_or_build(false).await.unwrap();
    assert_eq!(index.len(), 3);
    assert!(rag.storage().exists());
}

#[tokio::test]
async fn changing_the_embedding_model_forces_a_rebuild() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    write_docs(&config.data_dir, COURSE_DOCS);
    RagService::new(&config, letters_embedder()).build().await.unwrap();

    let mut other = config.clone();
    other.embedding_model = "mxbai-embed-large".into();
    let rag = RagService::new(&other, letters_embedder());
    assert!(matches!(rag.load(), Err(RagError::IndexStale { .. })));

    let rebuilt = rag.load_or_build(false).await.unwrap();
    assert_eq!(rebuilt.manifest().embedding_model, "mxbai-embed-large");
    assert!(rag.load().is_ok());
}

#[tokio::test]
async fn corrupt_snapshot_is_reported_then_replaced() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    write_docs(&config.data_dir, COURSE_DOCS);
    let rag = RagService::new(&config, letters_embedder());
    fs::create_dir_all(&config.index_dir).unwrap();
    fs::write(rag.storage().snapshot_path(), vec![7u8; 2048]).unwrap();

    assert!(matches!(rag.load(), Err(RagError::IndexCorrupt { .. })));
    assert_eq!(rag.load_or_build(false).await.unwrap().len(), 3);
}

#[tokio::test]
async fn three_chunks_asked_for_five_returns_three_nearest_first() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    write_docs(&config.data_dir, COURSE_DOCS);
    let index = RagService::new(&config, letters_embedder()).build().await.unwrap();
    assert_eq!(index.len(), 3);

    let hits = index.query(&letter_vector("queue first in first out"), 5).unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].chunk.document_id, "week2.md");
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
}

fn settings() -> IndexSettings {
    IndexSettings {
        embedding_model: "letters".into(),
        metric: DistanceMetric::L2,
        chunk_size: 10,
        chunk_overlap: 0,
    }
}

fn embedding(i: usize, vector: Vec<f32>) -> Embedding {
    Embedding {
        chunk: Chunk {
            id: Chunk::make_id("p.md", i),
            document_id: "p.md".into(),
            index: i,
            start: 0,
            end: 0,
            text: String::new(),
        },
        vector,
    }
}

proptest! {
    #[test]
    fn query_results_are_sorted_and_bounded(
        vectors in prop::collection::vec(prop::collection::vec(-10.0f32..10.0, 3), 0..40),
        query in prop::collection::vec(-10.0f32..10.0, 3),
        k in 1usize..12,
    ) {
        let n = vectors.len();
        let entries = vectors.into_iter().enumerate().map(|(i, v)| embedding(i, v)).collect();
        let index = VectorIndex::from_embeddings(&settings(), "fp".into(), 1, entries).unwrap();
        let hits = index.query(&query, k).unwrap();
        prop_assert_eq!(hits.len(), k.min(n));
        for pair in hits.windows(2) {
            prop_assert!(pair[0].distance < pair[1].distance
                || (pair[0].distance == pair[1].distance && pair[0].chunk.index < pair[1].chunk.index));
        }
    }
}

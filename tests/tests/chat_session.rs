use std::sync::Arc;
use std::time::Duration;

use application::chat_engine::ChatEngine;
use application::prompt::NO_CONTEXT_NOTE;
use application::rag_service::RagService;
use domain::models::DistanceMetric;
use domain::session::{ChatState, Role};
use futures::StreamExt;
use infrastructure::vector_index::{IndexSettings, VectorIndex};
use presentation::repl::stream_answer_until;
use shared::types::RagError;
use tempfile::TempDir;
use tests::{letters_embedder, test_config, write_docs, Reply, ScriptedGenerator, COURSE_DOCS};

async fn session(replies: Vec<Reply>) -> (TempDir, ChatEngine, Arc<ScriptedGenerator>) {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    write_docs(&config.data_dir, COURSE_DOCS);
    let index = RagService::new(&config, letters_embedder()).build().await.unwrap();
    let generator = ScriptedGenerator::new(replies);
    let engine = ChatEngine::from_config(&config, index, letters_embedder(), generator.clone());
    (tmp, engine, generator)
}

fn transcript(prompt: &[domain::session::ChatMessage]) -> String {
    prompt.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n")
}

#[tokio::test]
async fn follow_up_prompt_carries_the_previous_turn() {
    let (_tmp, mut engine, generator) = session(vec![
        Reply::Answer(vec!["A queue is ", "first in, first out."]),
        Reply::text("Printer jobs waiting their turn."),
    ])
    .await;

    let first = engine.ask_collect("What is a queue?").await.unwrap();
    assert_eq!(first, "A queue is first in, first out.");
    engine.ask_collect("Give an example").await.unwrap();

    let prompt = generator.last_prompt();
    let text = transcript(&prompt);
    assert!(text.contains("What is a queue?"));
    assert!(text.contains("A queue is first in, first out."));
    assert_eq!(prompt.last().unwrap().content, "Give an example");
    assert_eq!(prompt[1].role, Role::User);
    assert_eq!(prompt[2].role, Role::Assistant);
    assert_eq!(engine.memory().len(), 2);
}

#[tokio::test]
async fn cleared_memory_is_gone_from_the_next_prompt() {
    let (_tmp, mut engine, generator) = session(vec![Reply::text("Stacks are LIFO."), Reply::text("Sure.")]).await;
    engine.ask_collect("What is a stack?").await.unwrap();
    engine.clear_memory();
    engine.ask_collect("Give an example").await.unwrap();

    let prompt = generator.last_prompt();
    assert_eq!(prompt.len(), 2);
    assert_eq!(prompt[0].role, Role::System);
    assert!(!transcript(&prompt).contains("Stacks are LIFO."));
}

#[tokio::test]
async fn generation_failure_keeps_memory_as_it_was() {
    let (_tmp, mut engine, _generator) = session(vec![
        Reply::text("Hashing spreads keys."),
        Reply::FailAfter(vec!["Partial ans"], "model ran out of memory"),
    ])
    .await;
    engine.ask_collect("What is hashing?").await.unwrap();
    let before = engine.memory().len();

    let err = engine.ask_collect("And collisions?").await.unwrap_err();
    assert!(matches!(err, RagError::GenerationFailed(_)));
    assert_eq!(engine.memory().len(), before);
    assert_eq!(engine.state(), ChatState::Idle);
    assert!(engine.memory().iter().all(|t| !t.answer.contains("Partial")));
}

#[tokio::test]
async fn cancelled_turn_is_not_remembered() {
    let (_tmp, mut engine, _generator) = session(vec![Reply::Stall(vec!["Thinking"])]).await;
    {
        let mut turn = engine.ask("Explain queues slowly").await.unwrap();
        assert_eq!(turn.next().await.unwrap().unwrap(), "Thinking");
        assert!(tokio::time::timeout(Duration::from_millis(50), turn.next()).await.is_err());
    }
    assert!(engine.memory().is_empty());
    assert_eq!(engine.state(), ChatState::Idle);

    assert_eq!(engine.ask_collect("Try again").await.unwrap(), "ok");
    assert_eq!(engine.memory().len(), 1);
}

#[tokio::test]
async fn cancel_while_waiting_for_the_model_leaves_the_session_usable() {
    let (_tmp, mut engine, generator) = session(vec![Reply::Hang]).await;
    let err = stream_answer_until(&mut engine, "Explain queues", tokio::time::sleep(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Cancelled));
    assert_eq!(generator.prompts().len(), 1);
    assert!(engine.memory().is_empty());
    assert_eq!(engine.state(), ChatState::Idle);

    assert_eq!(engine.ask_collect("Try again").await.unwrap(), "ok");
    assert_eq!(engine.memory().len(), 1);
}

#[tokio::test]
async fn cancel_during_streaming_stops_the_turn() {
    let (_tmp, mut engine, _generator) = session(vec![Reply::Stall(vec!["Thinking"])]).await;
    let err = stream_answer_until(&mut engine, "Explain stacks", tokio::time::sleep(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Cancelled));
    assert!(engine.memory().is_empty());
    assert_eq!(engine.state(), ChatState::Idle);
}

#[tokio::test]
async fn uncancelled_turn_streams_to_completion() {
    let (_tmp, mut engine, _generator) = session(vec![Reply::text("LIFO.")]).await;
    stream_answer_until(&mut engine, "What is a stack?", futures::future::pending())
        .await
        .unwrap();
    assert_eq!(engine.memory().len(), 1);
    assert_eq!(engine.memory().iter().next().unwrap().answer, "LIFO.");
}

#[tokio::test]
async fn answers_cite_the_retrieved_documents() {
    let (_tmp, mut engine, generator) = session(vec![Reply::text("FIFO.")]).await;
    let mut turn = engine.ask("what is a queue?").await.unwrap();
    assert_eq!(turn.sources()[0].chunk.document_id, "week2.md");
    while turn.next().await.is_some() {}
    drop(turn);

    let system = &generator.last_prompt()[0];
    assert!(system.content.contains("(source: week2.md)"));
    assert!(!system.content.contains(NO_CONTEXT_NOTE));
}

#[tokio::test]
async fn empty_index_answers_without_context_and_says_so() {
    let settings = IndexSettings {
        embedding_model: tests::LETTERS_MODEL.into(),
        metric: DistanceMetric::Cosine,
        chunk_size: 200,
        chunk_overlap: 20,
    };
    let index = VectorIndex::from_embeddings(&settings, String::new(), 0, Vec::new()).unwrap();
    let generator = ScriptedGenerator::new(vec![Reply::text("From general knowledge: ...")]);
    let config = test_config(std::path::Path::new("."));
    let mut engine = ChatEngine::from_config(&config, index, letters_embedder(), generator.clone());

    let mut turn = engine.ask("What is a trie?").await.unwrap();
    assert!(turn.sources().is_empty());
    while turn.next().await.is_some() {}
    drop(turn);

    assert!(generator.last_prompt()[0].content.contains(NO_CONTEXT_NOTE));
    assert_eq!(engine.memory().len(), 1);
}

#[tokio::test]
async fn memory_holds_at_most_the_configured_turns() {
    let (_tmp, mut engine, _generator) = session(Vec::new()).await;
    for i in 0..7 {
        engine.ask_collect(&format!("question {i}")).await.unwrap();
    }
    assert_eq!(engine.memory().len(), 4);
    assert_eq!(engine.memory().iter().next().unwrap().question, "question 3");
}

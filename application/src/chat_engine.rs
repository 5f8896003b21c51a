//! One chat session: retrieval, prompt assembly, streamed generation and the
//! conversation memory that ties turns together.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use domain::models::SearchHit;
use domain::ports::{FragmentStream, GenerationService};
use domain::session::{ChatState, ConversationMemory};
use futures::{Stream, StreamExt};
use infrastructure::config::Config;
use infrastructure::embedder::Embedder;
use infrastructure::vector_index::VectorIndex;
use shared::types::{RagError, Result};
use tracing::{debug, info, warn};

use crate::prompt::PromptBuilder;
use crate::retriever::Retriever;

pub struct ChatEngine {
    index: VectorIndex,
    retriever: Retriever,
    generator: Arc<dyn GenerationService>,
    prompt: PromptBuilder,
    memory: ConversationMemory,
    state: ChatState,
}

impl ChatEngine {
    pub fn new(
        index: VectorIndex,
        retriever: Retriever,
        generator: Arc<dyn GenerationService>,
        prompt: PromptBuilder,
        memory_turns: usize,
    ) -> Self {
        Self {
            index,
            retriever,
            generator,
            prompt,
            memory: ConversationMemory::new(memory_turns),
            state: ChatState::Idle,
        }
    }

    pub fn from_config(
        config: &Config,
        index: VectorIndex,
        embedder: Embedder,
        generator: Arc<dyn GenerationService>,
    ) -> Self {
        let prompt = PromptBuilder::new(
            config.system_prompt.clone(),
            config.context_budget,
            config.context_overflow,
            config.memory_turns,
        );
        Self::new(
            index,
            Retriever::new(embedder, config.top_k),
            generator,
            prompt,
            config.memory_turns,
        )
    }

    pub fn state(&self) -> ChatState {
        self.state
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn model_name(&self) -> &str {
        self.generator.model_name()
    }

    pub fn clear_memory(&mut self) {
        self.memory.clear();
        info!("conversation memory cleared");
    }

    /// Swap in a freshly built index. Conversation memory is kept.
    pub fn replace_index(&mut self, index: VectorIndex) {
        self.index = index;
    }

    /// Start a turn. The returned stream yields answer fragments; the turn is
    /// remembered only if the stream runs to completion with a non-empty
    /// answer. Dropping the stream early cancels the turn.
    pub async fn ask(&mut self, question: &str) -> Result<TurnStream<'_>> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidQuery("question is empty".to_string()));
        }

        let mut turn = TurnStream {
            fragments: None,
            question: question.to_string(),
            answer: String::new(),
            sources: Vec::new(),
            memory: &mut self.memory,
            state: &mut self.state,
            finished: false,
        };

        *turn.state = ChatState::Retrieving;
        turn.sources = self
            .retriever
            .retrieve(&self.index, &turn.question)
            .await
            .inspect_err(|e| warn!(error = %e, "retrieval failed"))?;
        if turn.sources.is_empty() {
            debug!("no context retrieved");
        }

        let messages = self.prompt.build(&turn.sources, turn.memory, &turn.question);
        *turn.state = ChatState::Generating;
        turn.fragments = Some(
            self.generator
                .generate(messages)
                .await
                .inspect_err(|e| warn!(error = %e, "generation request failed"))?,
        );
        Ok(turn)
    }

    /// Run a whole turn and return the answer.
    pub async fn ask_collect(&mut self, question: &str) -> Result<String> {
        let mut turn = self.ask(question).await?;
        let mut answer = String::new();
        while let Some(fragment) = turn.next().await {
            answer.push_str(&fragment?);
        }
        Ok(answer)
    }
}

/// Answer fragments for one turn, borrowing the session until it ends.
pub struct TurnStream<'a> {
    fragments: Option<FragmentStream>,
    question: String,
    answer: String,
    sources: Vec<SearchHit>,
    memory: &'a mut ConversationMemory,
    state: &'a mut ChatState,
    finished: bool,
}

impl TurnStream<'_> {
    /// Chunks the answer was grounded on, nearest first.
    pub fn sources(&self) -> &[SearchHit] {
        &self.sources
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    /// Text received so far.
    pub fn answer(&self) -> &str {
        &self.answer
    }

    fn fail(&mut self, error: RagError) -> Poll<Option<Result<String>>> {
        self.finished = true;
        self.fragments = None;
        *self.state = ChatState::Failed;
        warn!(error = %error, "turn failed; memory unchanged");
        Poll::Ready(Some(Err(error)))
    }
}

impl Stream for TurnStream<'_> {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        let Some(fragments) = this.fragments.as_mut() else {
            return Poll::Ready(None);
        };
        match fragments.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(fragment))) => {
                this.answer.push_str(&fragment);
                Poll::Ready(Some(Ok(fragment)))
            }
            Poll::Ready(Some(Err(e))) => this.fail(e),
            Poll::Ready(None) => {
                if this.answer.trim().is_empty() {
                    return this.fail(RagError::GenerationFailed("the model returned an empty answer".to_string()));
                }
                this.finished = true;
                this.fragments = None;
                let answer = std::mem::take(&mut this.answer);
                if let Some(evicted) = this.memory.push(this.question.clone(), answer) {
                    debug!(sequence = evicted.sequence, "evicted oldest turn");
                }
                *this.state = ChatState::Idle;
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for TurnStream<'_> {
    fn drop(&mut self) {
        if !self.finished && self.fragments.is_some() {
            info!("turn cancelled; memory unchanged");
        }
        *self.state = ChatState::Idle;
    }
}

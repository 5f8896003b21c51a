//! Turns retrieved chunks, past turns and the new question into chat messages.

use std::borrow::Cow;

use domain::models::{ContextOverflow, SearchHit};
use domain::session::{ChatMessage, ConversationMemory};
use shared::utils::truncate_chars;

pub const NO_CONTEXT_NOTE: &str = "No passage from the course material matched this question. \
Say so briefly, then answer from general knowledge if you can.";

/// A retrieved chunk as it will appear in the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextPassage<'a> {
    pub source: &'a str,
    pub text: Cow<'a, str>,
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system_prompt: String,
    context_budget: usize,
    overflow: ContextOverflow,
    history_turns: usize,
}

impl PromptBuilder {
    pub fn new(system_prompt: impl Into<String>, context_budget: usize, overflow: ContextOverflow, history_turns: usize) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            context_budget,
            overflow,
            history_turns,
        }
    }

    /// Chunks that fit the context budget, nearest first. Once a chunk does
    /// not fit, it and every less similar chunk after it are dropped; under
    /// [`ContextOverflow::TrimLeastSimilar`] that first chunk is cut to the
    /// remaining room instead.
    pub fn select_context<'a>(&self, hits: &'a [SearchHit]) -> Vec<ContextPassage<'a>> {
        let mut remaining = self.context_budget;
        let mut passages = Vec::new();
        for hit in hits {
            let text = hit.chunk.text.as_str();
            let chars = text.chars().count();
            if chars <= remaining {
                remaining -= chars;
                passages.push(ContextPassage {
                    source: &hit.chunk.document_id,
                    text: Cow::Borrowed(text),
                });
                continue;
            }
            if self.overflow == ContextOverflow::TrimLeastSimilar && remaining > 0 {
                passages.push(ContextPassage {
                    source: &hit.chunk.document_id,
                    text: Cow::Borrowed(truncate_chars(text, remaining)),
                });
            }
            break;
        }
        passages
    }

    pub fn system_message(&self, passages: &[ContextPassage<'_>]) -> ChatMessage {
        let mut content = self.system_prompt.clone();
        if passages.is_empty() {
            content.push_str("\n\n");
            content.push_str(NO_CONTEXT_NOTE);
            return ChatMessage::system(content);
        }
        content.push_str("\n\nCourse material:\n");
        for (n, passage) in passages.iter().enumerate() {
            content.push_str(&format!("\n[{}] (source: {})\n{}\n", n + 1, passage.source, passage.text.trim()));
        }
        ChatMessage::system(content)
    }

    /// System instructions with context, then past turns oldest first, then
    /// the question.
    pub fn build(&self, hits: &[SearchHit], memory: &ConversationMemory, question: &str) -> Vec<ChatMessage> {
        let passages = self.select_context(hits);
        let mut messages = Vec::with_capacity(2 + 2 * memory.len());
        messages.push(self.system_message(&passages));
        for turn in memory.recent(self.history_turns) {
            messages.push(ChatMessage::user(&turn.question));
            messages.push(ChatMessage::assistant(&turn.answer));
        }
        messages.push(ChatMessage::user(question));
        messages
    }
}

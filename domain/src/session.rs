use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// A completed question/answer exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Monotonic per memory, survives eviction of earlier turns.
    pub sequence: u64,
    pub question: String,
    pub answer: String,
    pub asked_at: DateTime<Utc>,
}

/// Bounded FIFO of past turns owned by one chat session.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    turns: VecDeque<Turn>,
    capacity: usize,
    next_sequence: u64,
}

impl ConversationMemory {
    /// `capacity` is clamped to at least one turn.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
            next_sequence: 0,
        }
    }

    /// Append a turn, returning the evicted oldest turn when over capacity.
    pub fn push(&mut self, question: impl Into<String>, answer: impl Into<String>) -> Option<Turn> {
        let turn = Turn {
            sequence: self.next_sequence,
            question: question.into(),
            answer: answer.into(),
            asked_at: Utc::now(),
        };
        self.next_sequence += 1;
        self.turns.push_back(turn);
        if self.turns.len() > self.capacity {
            self.turns.pop_front()
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// The most recent `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &Turn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Where the chat engine is within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatState {
    #[default]
    Idle,
    Retrieving,
    Generating,
    /// Held only while an error is being surfaced; the engine is back to
    /// `Idle` once the caller has seen it.
    Failed,
}

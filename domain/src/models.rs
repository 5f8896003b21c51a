use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One markdown file from the document store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Path relative to the document store root, e.g. `lecture-03.md`.
    pub id: String,
    pub text: String,
    /// Image targets referenced from the markdown, in order of appearance.
    pub images: Vec<String>,
}

/// A bounded span of a [`Document`], the unit of embedding and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// `{document_id}#{index}`
    pub id: String,
    pub document_id: String,
    /// Position of this chunk within its document.
    pub index: usize,
    /// Byte offset of the first character in the document text.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
    pub text: String,
}

impl Chunk {
    pub fn make_id(document_id: &str, index: usize) -> String {
        format!("{document_id}#{index}")
    }
}

/// A chunk together with the vector the embedding model produced for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Embedding {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A retrieved chunk. Lower `distance` is nearer; `score` is the
/// matching similarity (higher is more relevant).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub distance: f32,
    pub score: f32,
}

/// How vectors are compared. Fixed per index and recorded in its snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    L2,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::L2 => "l2",
        }
    }

    /// Map a distance back to a similarity where higher means closer.
    pub fn similarity(&self, distance: f32) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - distance,
            DistanceMetric::L2 => 1.0 / (1.0 + distance),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "l2" | "euclidean" => Ok(DistanceMetric::L2),
            other => Err(format!("unknown distance metric '{other}' (expected cosine or l2)")),
        }
    }
}

/// What happens to retrieved context that does not fit the prompt budget.
/// Chunks are always considered nearest-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextOverflow {
    /// Drop every chunk that does not fit whole.
    #[default]
    DropLeastSimilar,
    /// Cut the first chunk that does not fit down to the remaining budget,
    /// then drop the rest.
    TrimLeastSimilar,
}

impl FromStr for ContextOverflow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(ContextOverflow::DropLeastSimilar),
            "trim" => Ok(ContextOverflow::TrimLeastSimilar),
            other => Err(format!("unknown context overflow policy '{other}' (expected drop or trim)")),
        }
    }
}

/// A model installed on the model service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

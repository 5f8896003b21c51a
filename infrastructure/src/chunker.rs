//! Splits documents into overlapping, character-bounded chunks.

use domain::models::{Chunk, Document};

/// Separators tried, in order, when looking for a natural place to end a chunk.
const SENTENCE_BREAKS: [&str; 4] = ["\n", ". ", "! ", "? "];

/// Fixed-window chunker measured in characters.
///
/// Each chunk holds at most `chunk_size` characters. Within the last third of a
/// window the chunker prefers to end on a paragraph break, then a line or
/// sentence end, then whitespace. The next chunk starts `chunk_overlap`
/// characters before the previous one ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    /// `chunk_size` is clamped to at least 1 and `chunk_overlap` to below it.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Lazily chunk one document. Blank documents yield nothing.
    pub fn chunks<'a>(&self, document: &'a Document) -> Chunks<'a> {
        Chunks {
            document,
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            position: 0,
            index: 0,
            done: document.text.trim().is_empty(),
        }
    }
}

pub struct Chunks<'a> {
    document: &'a Document,
    chunk_size: usize,
    chunk_overlap: usize,
    position: usize,
    index: usize,
    done: bool,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }

        let text = self.document.text.as_str();
        let start = self.position;
        let hard_end = byte_after_chars(text, start, self.chunk_size);
        let end = if hard_end == text.len() {
            hard_end
        } else {
            soft_end(text, start, hard_end, self.chunk_size)
        };

        let chunk = Chunk {
            id: Chunk::make_id(&self.document.id, self.index),
            document_id: self.document.id.clone(),
            index: self.index,
            start,
            end,
            text: text[start..end].to_string(),
        };
        self.index += 1;

        if end >= text.len() {
            self.done = true;
        } else {
            self.position = overlap_start(text, start, end, self.chunk_overlap);
        }
        Some(chunk)
    }
}

/// Byte offset reached after advancing `chars` characters from `start`.
fn byte_after_chars(text: &str, start: usize, chars: usize) -> usize {
    match text[start..].char_indices().nth(chars) {
        Some((offset, _)) => start + offset,
        None => text.len(),
    }
}

fn soft_end(text: &str, start: usize, hard_end: usize, chunk_size: usize) -> usize {
    let tail_from = byte_after_chars(text, start, chunk_size - chunk_size / 3);
    if tail_from >= hard_end {
        return hard_end;
    }
    let tail = &text[tail_from..hard_end];

    if let Some(pos) = tail.rfind("\n\n") {
        return tail_from + pos + 2;
    }
    let sentence = SENTENCE_BREAKS
        .iter()
        .filter_map(|sep| tail.rfind(sep).map(|pos| pos + sep.len()))
        .max();
    if let Some(end) = sentence {
        return tail_from + end;
    }
    if let Some((pos, ch)) = tail.char_indices().rev().find(|(_, c)| c.is_whitespace()) {
        return tail_from + pos + ch.len_utf8();
    }
    hard_end
}

/// Start of the next chunk: `overlap` characters back from `end`, as long as
/// that still moves past `start`.
fn overlap_start(text: &str, start: usize, end: usize, overlap: usize) -> usize {
    if overlap == 0 {
        return end;
    }
    match text[start..end].char_indices().rev().nth(overlap - 1) {
        Some((offset, _)) if offset > 0 => start + offset,
        _ => end,
    }
}

//! Word-boundary chunking with fixed overlap.

use crate::error::ConfigError;
use crate::models::{Chunk, ChunkingConfig, SourceDocument};

/// Splits document text into overlapping word-aligned chunks.
///
/// Chunking is deterministic for a given input and configuration: the same
/// corpus always produces the same chunk set, ordering, and ids, which keeps
/// index rebuilds reproducible.
#[derive(Debug, Clone)]
pub struct TextChunker {
    /// Chunk size in whitespace-delimited words.
    chunk_size: usize,
    /// Overlap between consecutive chunks, in words.
    overlap: usize,
}

/// A chunk's position within the source text: word index of its first word
/// plus byte offsets of its span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub first_word: usize,
    pub word_count: usize,
    pub start_byte: usize,
    pub end_byte: usize,
}

impl TextChunker {
    pub fn new(config: &ChunkingConfig) -> Result<Self, ConfigError> {
        let chunk_size = config.chunk_size_words as usize;
        let overlap = config.overlap_words as usize;

        if chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "chunk_size_words must be greater than zero".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(ConfigError::ValidationError(format!(
                "overlap_words ({}) must be smaller than chunk_size_words ({})",
                overlap, chunk_size
            )));
        }

        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    /// Chunk a document into overlapping word-aligned segments.
    ///
    /// Empty text yields an empty vec. Text shorter than the chunk size
    /// yields exactly one chunk whose text equals the input.
    pub fn chunk(&self, document: &SourceDocument) -> Vec<Chunk> {
        let text = &document.text;
        let words = word_spans(text);

        if words.is_empty() {
            return Vec::new();
        }

        if words.len() <= self.chunk_size {
            return vec![Chunk::from_document(
                document,
                text.clone(),
                0,
                words.len() as u32,
                0,
                text.len() as u64,
            )];
        }

        self.spans(&words)
            .enumerate()
            .map(|(idx, span)| {
                Chunk::from_document(
                    document,
                    text[span.start_byte..span.end_byte].to_string(),
                    idx as u32,
                    span.word_count as u32,
                    span.start_byte as u64,
                    span.end_byte as u64,
                )
            })
            .collect()
    }

    /// Lazy, restartable sequence of chunk spans over the given word spans.
    /// Each call produces an independent iterator over the same positions.
    pub fn spans<'a>(&'a self, words: &'a [(usize, usize)]) -> SpanIter<'a> {
        SpanIter {
            words,
            chunk_size: self.chunk_size,
            step: self.chunk_size - self.overlap,
            next_word: 0,
            done: words.is_empty(),
        }
    }
}

/// Iterator over chunk positions. Holds no mutable shared state beyond its
/// own cursor, so it can be recreated and re-run deterministically.
pub struct SpanIter<'a> {
    words: &'a [(usize, usize)],
    chunk_size: usize,
    step: usize,
    next_word: usize,
    done: bool,
}

impl Iterator for SpanIter<'_> {
    type Item = ChunkSpan;

    fn next(&mut self) -> Option<ChunkSpan> {
        if self.done {
            return None;
        }

        let start = self.next_word;
        let end = (start + self.chunk_size).min(self.words.len());

        let span = ChunkSpan {
            first_word: start,
            word_count: end - start,
            start_byte: self.words[start].0,
            end_byte: self.words[end - 1].1,
        };

        if end >= self.words.len() {
            self.done = true;
        } else {
            self.next_word = start + self.step;
            if self.next_word >= self.words.len() {
                self.done = true;
            }
        }

        Some(span)
    }
}

/// Byte spans of whitespace-delimited words. Boundaries always land on word
/// edges, so no chunk can start or end mid-word.
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut word_start: Option<usize> = None;

    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(start) = word_start.take() {
                spans.push((start, i));
            }
        } else if word_start.is_none() {
            word_start = Some(i);
        }
    }
    if let Some(start) = word_start {
        spans.push((start, text.len()));
    }

    spans
}

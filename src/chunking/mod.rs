//! Token-aware text chunking
//!
//! Splits normalized document text into overlapping chunks that stay within a
//! token budget. Sentence boundaries are preferred; a sentence that does not
//! fit on its own is split at word boundaries. Every chunk's text is the exact
//! slice `source[start_char..end_char]` of the input.

mod tokenizer;

pub use tokenizer::TokenCounter;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::PathBuf;
use thiserror::Error;

/// Default target tokens per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 500;
/// Default tokens shared between consecutive chunks
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;
/// Approximate characters per token
pub const CHARS_PER_TOKEN: usize = 4;

#[derive(Error, Debug)]
pub enum ChunkingError {
    #[error("Invalid chunking configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid sentence pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// A chunk of a source document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub text: String,
    /// Position of this chunk within the document (0-based)
    pub chunk_index: usize,
    /// Byte offset of the chunk start in the normalized source text
    pub start_char: usize,
    /// Byte offset one past the chunk end
    pub end_char: usize,
    pub token_count: usize,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target tokens per chunk
    pub chunk_size: usize,
    /// Tokens carried over from the previous chunk
    pub chunk_overlap: usize,
    /// Optional `tokenizer.json` for exact BPE token counts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer_file: Option<PathBuf>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            tokenizer_file: None,
        }
    }
}

/// Sentence/word boundary chunker with token overlap
#[derive(Debug)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    counter: TokenCounter,
    sentence_end: Regex,
}

impl Chunker {
    /// Create a chunker from configuration, loading the tokenizer if one is set
    pub fn new(config: &ChunkingConfig) -> Result<Self, ChunkingError> {
        let counter = TokenCounter::from_config(config.tokenizer_file.as_deref());
        Self::with_counter(config.chunk_size, config.chunk_overlap, counter)
    }

    /// Create a chunker with an explicit token counter
    pub fn with_counter(
        chunk_size: usize,
        chunk_overlap: usize,
        counter: TokenCounter,
    ) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::InvalidConfig(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(ChunkingError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }

        Ok(Self {
            chunk_size,
            chunk_overlap,
            counter,
            sentence_end: Regex::new(r"[.!?]+(?:\s+|$)")?,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn token_counter(&self) -> &TokenCounter {
        &self.counter
    }

    /// Split text into chunks.
    ///
    /// Empty or whitespace-only input yields no chunks.
    pub fn chunk_text(&self, text: &str) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut current: Option<Range<usize>> = None;

        for unit in self.units(text) {
            let Some(buffer) = current.take() else {
                current = Some(unit);
                continue;
            };

            let candidate = buffer.start..unit.end;
            if self.counter.count(&text[candidate.clone()]) <= self.chunk_size {
                current = Some(candidate);
                continue;
            }

            let next_start = self
                .overlap_start(text, &buffer, unit.end)
                .unwrap_or(unit.start);
            self.push_chunk(text, buffer, &mut chunks);
            current = Some(next_start..unit.end);
        }

        if let Some(buffer) = current {
            self.push_chunk(text, buffer, &mut chunks);
        }

        chunks
    }

    /// Sentence spans of `text`, terminators included, surrounding
    /// whitespace excluded.
    pub fn split_sentences(&self, text: &str) -> Vec<Range<usize>> {
        let mut spans = Vec::new();
        let mut start = 0;

        for m in self.sentence_end.find_iter(text) {
            let end = m.start() + m.as_str().trim_end().len();
            push_trimmed(text, start..end, &mut spans);
            start = m.end();
        }
        push_trimmed(text, start..text.len(), &mut spans);

        spans
    }

    /// Sentences, with over-budget sentences replaced by word segments
    fn units(&self, text: &str) -> Vec<Range<usize>> {
        let max_chars = self.chunk_size * CHARS_PER_TOKEN;
        let mut units = Vec::new();

        for sentence in self.split_sentences(text) {
            if self.counter.count(&text[sentence.clone()]) > self.chunk_size {
                units.extend(
                    split_words(&text[sentence.clone()], max_chars)
                        .into_iter()
                        .map(|w| sentence.start + w.start..sentence.start + w.end),
                );
            } else {
                units.push(sentence);
            }
        }

        units
    }

    /// Start of the overlap carried from `buffer` into the next chunk.
    ///
    /// The tail of the last `chunk_overlap` tokens, snapped to a word
    /// boundary. When that tail is the whole buffer or would push the next
    /// chunk over budget, only the buffer's last word is carried, so
    /// consecutive chunks always share at least one word.
    fn overlap_start(&self, text: &str, buffer: &Range<usize>, next_end: usize) -> Option<usize> {
        if self.chunk_overlap == 0 {
            return None;
        }
        let slice = &text[buffer.clone()];
        let last_word = buffer.start + word_start(slice, slice.len());

        let tail = word_start(slice, self.counter.tail_start(slice, self.chunk_overlap));
        let start = buffer.start + slice.len() - slice[tail..].trim_start().len();

        let fits = start > buffer.start
            && self.counter.count(&text[start..next_end]) <= self.chunk_size;
        Some(if fits { start } else { last_word })
    }

    fn push_chunk(&self, text: &str, span: Range<usize>, chunks: &mut Vec<TextChunk>) {
        let chunk_text = &text[span.clone()];
        chunks.push(TextChunk {
            text: chunk_text.to_string(),
            chunk_index: chunks.len(),
            start_char: span.start,
            end_char: span.end,
            token_count: self.counter.count(chunk_text),
        });
    }
}

/// Chunk `text` with an explicit budget and token counter
pub fn chunk_text(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    counter: TokenCounter,
) -> Result<Vec<TextChunk>, ChunkingError> {
    Ok(Chunker::with_counter(chunk_size, chunk_overlap, counter)?.chunk_text(text))
}

/// Split `text` at word boundaries into segments of at most `max_chars`
/// characters. A single word longer than `max_chars` becomes its own segment.
pub fn split_words(text: &str, max_chars: usize) -> Vec<Range<usize>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= max_chars {
        let lead = text.len() - text.trim_start().len();
        return vec![lead..lead + trimmed.len()];
    }

    let mut segments = Vec::new();
    let mut current: Option<Range<usize>> = None;

    for word in word_spans(text) {
        current = match current {
            None => Some(word),
            Some(segment) => {
                let candidate = segment.start..word.end;
                if text[candidate.clone()].chars().count() <= max_chars {
                    Some(candidate)
                } else {
                    segments.push(segment);
                    Some(word)
                }
            }
        };
    }

    if let Some(segment) = current {
        segments.push(segment);
    }

    segments
}

fn word_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;

    for (idx, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                spans.push(s..idx);
                start = None;
            }
            (false, None) => start = Some(idx),
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push(s..text.len());
    }

    spans
}

fn push_trimmed(text: &str, span: Range<usize>, spans: &mut Vec<Range<usize>>) {
    let slice = &text[span.clone()];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return;
    }
    let lead = slice.len() - slice.trim_start().len();
    spans.push(span.start + lead..span.start + lead + trimmed.len());
}

/// Move `idx` back to the start of the word it falls in
fn word_start(text: &str, mut idx: usize) -> usize {
    while let Some(prev) = text[..idx].chars().next_back() {
        if prev.is_whitespace() {
            break;
        }
        idx -= prev.len_utf8();
    }
    idx
}

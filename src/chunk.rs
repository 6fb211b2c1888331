//! Fixed-window text chunker.
//!
//! Splits each [`Document`] page into overlapping character windows. Chunk `i`
//! starts at character offset `i * (window - overlap)` and holds at most
//! `window` characters. The final chunk may be shorter and is always kept.
//! Offsets count Unicode scalar values, so a code point is never split.
//!
//! Each chunk carries a SHA-256 hash of its text, which the embedding cache
//! uses as its key.

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Document};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk window must be > 0")]
    ZeroWindow,
    #[error("chunk overlap ({overlap}) must be smaller than the window ({window})")]
    OverlapTooLarge { window: usize, overlap: usize },
}

/// SHA-256 hex digest of `text`.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    window: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(window: usize, overlap: usize) -> Result<Self, ChunkError> {
        if window == 0 {
            return Err(ChunkError::ZeroWindow);
        }
        if overlap >= window {
            return Err(ChunkError::OverlapTooLarge { window, overlap });
        }
        Ok(Self { window, overlap })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self, ChunkError> {
        Self::new(config.window_chars, config.overlap_chars)
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Lazily chunk a single document. The iterator is `Clone`, so a
    /// consumer can restart from any point.
    pub fn chunks<'a>(&self, doc: &'a Document) -> Chunks<'a> {
        Chunks {
            doc,
            window: self.window,
            step: self.window - self.overlap,
            next_char: 0,
            next_byte: 0,
            index: 0,
            done: false,
        }
    }

    /// Chunk every document in order.
    pub fn chunk_documents<'a>(
        &self,
        docs: &'a [Document],
    ) -> impl Iterator<Item = Chunk> + Clone + 'a {
        let chunker = *self;
        docs.iter().flat_map(move |doc| chunker.chunks(doc))
    }
}

/// Iterator over the chunks of one document. See [`Chunker::chunks`].
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    doc: &'a Document,
    window: usize,
    step: usize,
    next_char: usize,
    next_byte: usize,
    index: usize,
    done: bool,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }

        let remaining = &self.doc.text[self.next_byte..];
        if remaining.is_empty() {
            self.done = true;
            return None;
        }

        let end = byte_offset_of_char(remaining, self.window);
        let text = &remaining[..end];

        let chunk = Chunk {
            source: self.doc.source.clone(),
            page: self.doc.page,
            chunk_index: self.index,
            start: self.next_char,
            text: text.to_string(),
            hash: content_hash(text),
        };

        if end == remaining.len() {
            // This window reached the end of the text.
            self.done = true;
        } else {
            self.next_byte += byte_offset_of_char(remaining, self.step);
            self.next_char += self.step;
            self.index += 1;
        }

        Some(chunk)
    }
}

/// Byte offset of the `n`th char of `s`, or `s.len()` when `s` is shorter.
fn byte_offset_of_char(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

/// Rebuild the source text from consecutive chunks of one document by
/// dropping each chunk's leading `overlap` characters (except the first).
pub fn reassemble(chunks: &[Chunk], overlap: usize) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            out.push_str(&chunk.text);
        } else {
            out.extend(chunk.text.chars().skip(overlap));
        }
    }
    out
}

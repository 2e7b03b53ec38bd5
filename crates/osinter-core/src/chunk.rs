//! Paragraph-boundary chunker for article bodies.
//!
//! Long article content is split into [`ContentChunk`]s before it reaches
//! the backend's ingest pipeline, which expands every chunk into semantic
//! tokens. Each chunk carries a SHA-256 hash of its text so re-ingestion can
//! tell unchanged chunks apart.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` to `max_chars` using a 4 chars/token ratio.
//! 2. Split text on `\n\n` paragraph boundaries.
//! 3. Accumulate paragraphs until the next one would exceed `max_chars`,
//!    then flush the buffer as a chunk.
//! 4. A single paragraph longer than `max_chars` is hard-split at the
//!    nearest newline or space.
//!
//! Empty or whitespace-only text yields no chunks.
//!
//! # Example
//!
//! ```rust
//! use osinter_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("Hello world.\n\nSecond paragraph.", 512);
//! assert_eq!(chunks.len(), 1);
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Approximate characters-per-token ratio of the expansion model.
const CHARS_PER_TOKEN: usize = 4;

/// Token budget of the semantic expansion model per input.
pub const DEFAULT_MAX_TOKENS: usize = 512;

/// One slice of article content as stored under `embeddings.content_chunks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentChunk {
    pub text: String,
    pub hash: String,
}

/// Split text into chunks on paragraph boundaries, respecting `max_tokens`.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<ContentChunk> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let mut chunks = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if buf.is_empty() {
            trimmed.len()
        } else {
            buf.len() + 2 + trimmed.len()
        };
        if would_be > max_chars && !buf.is_empty() {
            chunks.push(make_chunk(&buf));
            buf.clear();
        }

        if trimmed.len() > max_chars {
            hard_split(trimmed, max_chars, &mut chunks);
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(trimmed);
        }
    }

    if !buf.is_empty() {
        chunks.push(make_chunk(&buf));
    }
    chunks
}

fn hard_split(paragraph: &str, max_chars: usize, chunks: &mut Vec<ContentChunk>) {
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        let limit = snap_to_char_boundary(remaining, remaining.len().min(max_chars));
        let split_at = if limit < remaining.len() {
            remaining[..limit]
                .rfind('\n')
                .or_else(|| remaining[..limit].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(limit)
        } else {
            limit
        };
        // A single char wider than the budget still has to make progress.
        let split_at = if split_at == 0 {
            remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len())
        } else {
            split_at
        };

        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            chunks.push(make_chunk(piece));
        }
        remaining = &remaining[split_at..];
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn make_chunk(text: &str) -> ContentChunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    ContentChunk {
        text: text.to_string(),
        hash: format!("{:x}", hasher.finalize()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_text_is_one_chunk() {
        let chunks = chunk_text("Hello, world!", 512);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].hash.len(), 64);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(chunk_text("", 512).is_empty());
        assert!(chunk_text("  \n\n \n\n", 512).is_empty());
    }

    #[test]
    fn paragraphs_are_packed_until_the_budget() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text(text, 512);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("Third paragraph."));

        let chunks = chunk_text(text, 5);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].text, "Second paragraph.");
    }

    #[test]
    fn oversized_paragraph_is_split_on_spaces() {
        let text = "word ".repeat(100);
        let chunks = chunk_text(&text, 5);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.len() <= 20);
            assert!(!c.text.starts_with(' '));
        }
    }

    #[test]
    fn multibyte_text_never_panics() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let chunks = chunk_text(text, 1);
        assert!(!chunks.is_empty());
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert!(joined.contains("Hello"));
    }

    #[test]
    fn hashes_are_deterministic() {
        let a = chunk_text("Alpha\n\nBeta", 1);
        let b = chunk_text("Alpha\n\nBeta", 1);
        assert_eq!(a, b);
        assert_ne!(a[0].hash, a[1].hash);
    }
}

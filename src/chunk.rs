//! Paragraph-boundary text chunker.
//!
//! Used when `chunking.mode = "paragraph"`. Splits a document on blank lines
//! (`\n\n`) and packs paragraphs into chunks of at most `max_tokens`
//! (approximated as four chars per token). Oversized paragraphs are hard-split
//! at the last newline or space before the limit.
//!
//! Chunk ids are `"<source_path>#<index>"` with contiguous indices from 0, so
//! rebuilding the same text produces the same ids.

use crate::models::Chunk;

const CHARS_PER_TOKEN: usize = 4;

/// Split `text` into paragraph chunks. Returns nothing for blank input.
pub fn chunk_text(source_path: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut pieces: Vec<String> = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            hard_split(trimmed, max_chars, &mut pieces);
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| Chunk::new(format!("{}#{}", source_path, i), source_path, piece))
        .collect()
}

fn hard_split(paragraph: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        let mut split_at = remaining.len().min(max_chars);
        while !remaining.is_char_boundary(split_at) {
            split_at -= 1;
        }
        let actual_split = if split_at < remaining.len() {
            remaining[..split_at]
                .rfind('\n')
                .or_else(|| remaining[..split_at].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(split_at)
        } else {
            split_at
        };
        let piece = remaining[..actual_split].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = &remaining[actual_split..];
    }
}

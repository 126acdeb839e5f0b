//! Sentence-aware text chunker with overlap.
//!
//! Page text is broken into segments (sentences within paragraphs;
//! over-long sentences are split on word, then character, boundaries) and
//! segments are packed greedily into chunks of at most `chunk_size` tokens.
//! When a chunk is full, its trailing segments, up to `chunk_overlap` of the
//! chunk size, are carried over to start the next one, so a passage that
//! straddles a boundary is retrievable from either side.
//!
//! Token counts are approximated as four characters per token, counting
//! Unicode scalar values rather than UTF-8 bytes. Chunks never
//! span pages, so each keeps the file name and page label it came from.

use ragline_core::{Chunk, RecordMetadata};

use crate::extract::{DocumentKind, Page};

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Chunk every page of a document, attaching source metadata.
///
/// Metadata per chunk: `file_name`, `page_label` (the 1-based page number),
/// and in `extra`: `file_type`, `page_number`, `has_tables`, `chunk_index`
/// (position within the page).
pub fn split_pages(
    file_name: &str,
    kind: DocumentKind,
    pages: &[Page],
    chunk_size: usize,
    chunk_overlap: f64,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for page in pages {
        let has_tables = page.has_tables();
        for (index, text) in split_text(&page.text, chunk_size, chunk_overlap)
            .into_iter()
            .enumerate()
        {
            let metadata = RecordMetadata::for_page(file_name, page.number.to_string())
                .with_extra("file_type", kind.as_str())
                .with_extra("page_number", page.number)
                .with_extra("has_tables", has_tables)
                .with_extra("chunk_index", index);
            chunks.push(Chunk::new(text, metadata));
        }
    }
    chunks
}

/// Split `text` into overlapping chunks of at most `chunk_size` tokens.
///
/// Whitespace is normalized. Empty or whitespace-only text yields no chunks.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: f64) -> Vec<String> {
    let max_chars = chunk_size.saturating_mul(CHARS_PER_TOKEN).max(1);
    let overlap_chars = (max_chars as f64 * chunk_overlap.clamp(0.0, 1.0)) as usize;
    let segments = segments(text, max_chars);

    let mut chunks = Vec::new();
    let mut window: Vec<&str> = Vec::new();
    let mut window_len = 0;
    // Segments in the window that no emitted chunk contains yet.
    let mut fresh = 0;

    for segment in &segments {
        if joined_len(window_len, segment) > max_chars && fresh > 0 {
            chunks.push(window.join(" "));

            let mut carried: Vec<&str> = Vec::new();
            let mut carried_len = 0;
            for prev in window.iter().rev() {
                let next = joined_len(carried_len, prev);
                if next > overlap_chars {
                    break;
                }
                carried.push(prev);
                carried_len = next;
            }
            carried.reverse();

            window = carried;
            window_len = carried_len;
            fresh = 0;
            if joined_len(window_len, segment) > max_chars {
                window.clear();
                window_len = 0;
            }
        }

        window_len = joined_len(window_len, segment);
        window.push(segment);
        fresh += 1;
    }

    if fresh > 0 {
        chunks.push(window.join(" "));
    }
    chunks
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Length in chars of `next` appended to a run of `current` chars.
fn joined_len(current: usize, next: &str) -> usize {
    if current == 0 {
        char_len(next)
    } else {
        current + 1 + char_len(next)
    }
}

/// Sentences in paragraph order, each at most `max_chars` chars.
fn segments(text: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    for para in text.split("\n\n") {
        let para = para.split_whitespace().collect::<Vec<_>>().join(" ");
        if para.is_empty() {
            continue;
        }
        for sentence in split_sentences(&para) {
            if char_len(sentence) <= max_chars {
                out.push(sentence.to_string());
            } else {
                hard_split(sentence, max_chars, &mut out);
            }
        }
    }
    out
}

/// Split after `.`, `!` or `?` followed by a space. Expects normalized
/// whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?') && bytes.get(i + 1) == Some(&b' ') {
            out.push(text[start..=i].trim());
            start = i + 2;
        }
    }
    if start < text.len() {
        out.push(text[start..].trim());
    }
    out.retain(|s| !s.is_empty());
    out
}

/// Pack words into pieces of at most `max_chars`; words longer than that
/// are cut on char boundaries.
fn hard_split(sentence: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut buf = String::new();
    let mut buf_len = 0;
    for word in sentence.split(' ') {
        let word_len = char_len(word);
        if word_len > max_chars {
            if !buf.is_empty() {
                out.push(std::mem::take(&mut buf));
                buf_len = 0;
            }
            let mut rest = word;
            while !rest.is_empty() {
                let cut = rest
                    .char_indices()
                    .nth(max_chars)
                    .map_or(rest.len(), |(i, _)| i);
                out.push(rest[..cut].to_string());
                rest = &rest[cut..];
            }
            continue;
        }

        if joined_len(buf_len, word) > max_chars && !buf.is_empty() {
            out.push(std::mem::take(&mut buf));
            buf_len = 0;
        }
        buf_len = joined_len(buf_len, word);
        if !buf.is_empty() {
            buf.push(' ');
        }
        buf.push_str(word);
    }
    if !buf.is_empty() {
        out.push(buf);
    }
}

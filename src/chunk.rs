//! Overlapping sliding-window text chunker.
//!
//! Splits extracted document text into fixed-size character windows
//! where consecutive chunks overlap by a configured amount, preserving
//! context across chunk boundaries. Deterministic for identical input
//! and configuration, which idempotent reprocessing relies on.
//!
//! Split points snap to `char` boundaries, so multi-byte UTF-8 input is
//! never cut mid-codepoint. Each chunk records its character span in
//! the source text and the overlap with its predecessor.

use uuid::Uuid;

use crate::models::Chunk;

/// Split `text` into overlapping chunks of at most `target_chars`
/// characters, consecutive chunks sharing `overlap_chars` characters.
///
/// Covers the entire input with no gaps. Input shorter than the target
/// yields exactly one chunk; empty input yields an empty sequence (the
/// caller decides what that means for the document).
///
/// `overlap_chars` must be strictly less than `target_chars`; config
/// validation enforces this before the pipeline runs.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    target_chars: usize,
    overlap_chars: usize,
) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }

    // Byte offset of every char, plus a sentinel for the end.
    let mut byte_offsets: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
    byte_offsets.push(text.len());
    let total_chars = byte_offsets.len() - 1;

    let step = target_chars.saturating_sub(overlap_chars).max(1);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index: i64 = 0;

    loop {
        let end = (start + target_chars).min(total_chars);
        let overlap = if index == 0 { 0 } else { overlap_chars };

        chunks.push(Chunk {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            chunk_index: index,
            text: text[byte_offsets[start]..byte_offsets[end]].to_string(),
            start_char: start as i64,
            end_char: end as i64,
            overlap_chars: overlap as i64,
        });

        if end == total_chars {
            break;
        }
        start += step;
        index += 1;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rebuild the original text from chunk texts, skipping each
    /// chunk's declared overlap with its predecessor.
    fn reconstruct(chunks: &[Chunk]) -> String {
        let mut out = String::new();
        for chunk in chunks {
            let skip = chunk.overlap_chars as usize;
            out.extend(chunk.text.chars().skip(skip));
        }
        out
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(chunk_text("doc1", "", 100, 20).is_empty());
    }

    #[test]
    fn test_short_input_single_chunk() {
        let chunks = chunk_text("doc1", "Quarterly revenue grew 12%.", 100, 20);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Quarterly revenue grew 12%.");
        assert_eq!(chunks[0].start_char, 0);
        assert_eq!(chunks[0].end_char, 27);
        assert_eq!(chunks[0].overlap_chars, 0);
    }

    #[test]
    fn test_coverage_no_gaps() {
        let text: String = (0..40)
            .map(|i| format!("Sentence number {} in a long report. ", i))
            .collect();
        let chunks = chunk_text("doc1", &text, 120, 30);
        assert!(chunks.len() > 1);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let text = "a".repeat(500);
        let chunks = chunk_text("doc1", &text, 100, 25);
        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            assert_eq!(prev.end_char - next.start_char, 25);
            assert_eq!(next.overlap_chars, 25);
        }
    }

    #[test]
    fn test_spans_are_character_based() {
        // Multi-byte input: spans count chars, not bytes, and no chunk
        // boundary lands inside a codepoint.
        let text = "ünïcödé çöntent ".repeat(30);
        let chunks = chunk_text("doc1", &text, 50, 10);
        assert!(chunks.len() > 1);
        assert_eq!(reconstruct(&chunks), text);
        for chunk in &chunks {
            assert_eq!(
                chunk.text.chars().count() as i64,
                chunk.end_char - chunk.start_char
            );
        }
    }

    #[test]
    fn test_deterministic_spans() {
        let text: String = (0..25).map(|i| format!("Item {} of the plan. ", i)).collect();
        let a = chunk_text("doc1", &text, 80, 16);
        let b = chunk_text("doc1", &text, 80, 16);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.text, y.text);
            assert_eq!(x.start_char, y.start_char);
            assert_eq!(x.end_char, y.end_char);
        }
    }

    #[test]
    fn test_indices_contiguous_from_zero() {
        let text = "b".repeat(1000);
        let chunks = chunk_text("doc1", &text, 90, 15);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as i64);
        }
    }

    #[test]
    fn test_no_trailing_degenerate_chunk() {
        // Exact multiple of the step: final window ends exactly at the
        // text end without an extra empty chunk.
        let text = "c".repeat(300);
        let chunks = chunk_text("doc1", &text, 100, 0);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.last().unwrap().end_char, 300);
    }
}

//! Overlapping-window text chunker.
//!
//! Extracted text is split into character windows of size `chunk_size` with
//! `overlap` characters shared between consecutive windows, so window starts
//! advance by a stride of `chunk_size - overlap`. The final window may be
//! shorter than `chunk_size`; a trailing fragment that would start at or past
//! the end of the text is not emitted.
//!
//! Chunk IDs are UUIDv5 over `artifact_id:start`, which makes re-chunking
//! the same artifact reproduce identical IDs. Each chunk also carries the
//! SHA-256 hex of its text for deduplication across ingestions.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Namespace for deterministic chunk IDs.
const CHUNK_NAMESPACE: Uuid = Uuid::NAMESPACE_OID;

/// Split `text` into overlapping character windows.
///
/// `overlap` must be strictly smaller than `chunk_size`; config validation
/// enforces this before the chunker ever runs. Empty text yields no chunks.
pub fn chunk_text(
    artifact_id: &str,
    project_id: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Vec<Chunk> {
    debug_assert!(overlap < chunk_size);

    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let stride = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        let window: String = chars[start..end].iter().collect();
        chunks.push(Chunk {
            id: chunk_id(artifact_id, start),
            artifact_id: artifact_id.to_string(),
            project_id: project_id.to_string(),
            start,
            end,
            hash: content_hash(&window),
            text: window,
        });
        if end == chars.len() {
            break;
        }
        start += stride;
    }

    chunks
}

/// Deterministic chunk ID: UUIDv5 of `artifact_id:start`.
pub fn chunk_id(artifact_id: &str, start: usize) -> String {
    Uuid::new_v5(
        &CHUNK_NAMESPACE,
        format!("{}:{}", artifact_id, start).as_bytes(),
    )
    .to_string()
}

/// SHA-256 hex digest of chunk text.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_thousand_chars_make_seven_windows() {
        let text = "x".repeat(3000);
        let chunks = chunk_text("a1", "p1", &text, 500, 50);

        assert_eq!(chunks.len(), 7);
        let starts: Vec<usize> = chunks.iter().map(|c| c.start).collect();
        assert_eq!(starts, vec![0, 450, 900, 1350, 1800, 2250, 2700]);
        for c in &chunks[..6] {
            assert_eq!(c.end - c.start, 500);
        }
        assert_eq!(chunks[6].end, 3000);
        assert_eq!(chunks[6].end - chunks[6].start, 300);
    }

    #[test]
    fn short_text_yields_single_chunk() {
        let chunks = chunk_text("a1", "p1", "hello", 500, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[0].end, 5);
        assert_eq!(chunks[0].text, "hello");
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("a1", "p1", "", 500, 50).is_empty());
    }

    #[test]
    fn consecutive_windows_share_overlap() {
        let text: String = ('a'..='z').cycle().take(100).collect();
        let chunks = chunk_text("a1", "p1", &text, 40, 10);
        let first_tail: String = chunks[0].text.chars().skip(30).collect();
        let second_head: String = chunks[1].text.chars().take(10).collect();
        assert_eq!(first_tail, second_head);
    }

    #[test]
    fn ids_are_stable_across_reruns() {
        let text = "alpha beta gamma delta".repeat(40);
        let a = chunk_text("a1", "p1", &text, 100, 20);
        let b = chunk_text("a1", "p1", &text, 100, 20);
        assert_eq!(
            a.iter().map(|c| &c.id).collect::<Vec<_>>(),
            b.iter().map(|c| &c.id).collect::<Vec<_>>()
        );
        // Different artifacts never collide.
        let other = chunk_text("a2", "p1", &text, 100, 20);
        assert_ne!(a[0].id, other[0].id);
    }

    #[test]
    fn multibyte_text_counts_characters_not_bytes() {
        let text = "é".repeat(120);
        let chunks = chunk_text("a1", "p1", &text, 100, 10);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text.chars().count(), 100);
        assert_eq!(chunks[1].start, 90);
    }

    #[test]
    fn hash_matches_text() {
        let chunks = chunk_text("a1", "p1", "same text", 500, 50);
        assert_eq!(chunks[0].hash, content_hash("same text"));
    }
}

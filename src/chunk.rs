//! Passage splitter.
//!
//! Splits a [`SourceDocument`] into [`Passage`]s of at most `max_tokens`
//! (approximated as four characters per token). Paragraphs (`\n\n`) are kept
//! together when they fit; an oversized paragraph is cut at word boundaries.
//!
//! Each passage carries a SHA-256 hash of its source and text, which the
//! store uses to skip passages it already holds.

use sha2::{Digest, Sha256};

use crate::models::{Passage, SourceDocument};

const CHARS_PER_TOKEN: usize = 4;

/// Split a document into passages with contiguous indices starting at 0.
/// Documents with no visible text produce no passages.
pub fn split_document(doc: &SourceDocument, max_tokens: usize) -> Vec<Passage> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut pieces: Vec<String> = Vec::new();
    let mut buffer = String::new();

    for paragraph in doc.text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        let projected = if buffer.is_empty() {
            paragraph.chars().count()
        } else {
            buffer.chars().count() + 2 + paragraph.chars().count()
        };
        if projected > max_chars && !buffer.is_empty() {
            pieces.push(std::mem::take(&mut buffer));
        }

        if paragraph.chars().count() > max_chars {
            pieces.extend(split_words(paragraph, max_chars));
            continue;
        }

        if !buffer.is_empty() {
            buffer.push_str("\n\n");
        }
        buffer.push_str(paragraph);
    }
    if !buffer.is_empty() {
        pieces.push(buffer);
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, text)| Passage {
            hash: passage_hash(&doc.source, &text),
            source: doc.source.clone(),
            chunk_index: index as i64,
            text,
            metadata_json: doc.metadata_json.clone(),
        })
        .collect()
}

/// Greedy word packing; a single word longer than the limit becomes its
/// own piece.
fn split_words(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > max_chars && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

pub fn passage_hash(source: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> SourceDocument {
        SourceDocument {
            source: "notes/a.md".to_string(),
            text: text.to_string(),
            metadata_json: "{}".to_string(),
        }
    }

    #[test]
    fn test_small_text_single_passage() {
        let passages = split_document(&doc("Hello, world!"), 250);
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].chunk_index, 0);
        assert_eq!(passages[0].text, "Hello, world!");
        assert_eq!(passages[0].source, "notes/a.md");
    }

    #[test]
    fn test_blank_text_has_no_passages() {
        assert!(split_document(&doc(""), 250).is_empty());
        assert!(split_document(&doc("\n\n  \n\n"), 250).is_empty());
    }

    #[test]
    fn test_paragraphs_grouped_until_limit() {
        // max_tokens=8 => max_chars=32
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThird.";
        let passages = split_document(&doc(text), 8);
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[1].text, "This is paragraph two.\n\nThird.");
        for (i, p) in passages.iter().enumerate() {
            assert_eq!(p.chunk_index, i as i64);
        }
    }

    #[test]
    fn test_long_paragraph_split_on_words() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let passages = split_document(&doc(text), 3);
        assert!(passages.len() > 1);
        assert!(passages.iter().all(|p| p.text.chars().count() <= 12));
        let rebuilt: Vec<&str> = passages.iter().flat_map(|p| p.text.split(' ')).collect();
        assert_eq!(rebuilt.join(" "), text);
    }

    #[test]
    fn test_multibyte_text_does_not_panic() {
        let text = "ééééééééééééééééééééééééééé ü ü ü";
        assert!(!split_document(&doc(text), 2).is_empty());
    }

    #[test]
    fn test_hash_depends_on_source() {
        assert_ne!(passage_hash("a.md", "same"), passage_hash("b.md", "same"));
        assert_eq!(passage_hash("a.md", "same"), passage_hash("a.md", "same"));
    }
}

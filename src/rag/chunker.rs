//! Content chunking for retrieval.
//!
//! Splits content into target-size chunks preferring paragraph boundaries
//! (blank-line separated). Adjacent chunks share an overlap built from the
//! tail paragraphs of the previous chunk, bounded by the overlap budget.

use crate::models::ChunkRecord;

/// Target chunk size in characters.
pub const CHUNK_SIZE: usize = 512;

/// Overlap budget between adjacent chunks, in characters.
pub const CHUNK_OVERLAP: usize = 50;

/// Paragraph-preferring chunker.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            overlap: CHUNK_OVERLAP,
        }
    }
}

/// Chunk content with the default 512/50 configuration.
pub fn chunk_text(content: &str, document_id: &str) -> Vec<ChunkRecord> {
    Chunker::default().chunk(content, document_id)
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            overlap,
        }
    }

    /// Split content into chunks with stable ids derived from the document
    /// id and chunk position.
    pub fn chunk(&self, content: &str, document_id: &str) -> Vec<ChunkRecord> {
        let paragraphs = self.split_paragraphs(content);
        if paragraphs.is_empty() {
            return Vec::new();
        }

        let mut chunks: Vec<Vec<String>> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_len = 0usize;

        for paragraph in paragraphs {
            let added = paragraph.len() + if current.is_empty() { 0 } else { 2 };
            if !current.is_empty() && current_len + added > self.chunk_size {
                let overlap = self.overlap_tail(&current);
                chunks.push(std::mem::take(&mut current));
                current_len = overlap.iter().map(|p| p.len() + 2).sum::<usize>();
                current = overlap;
            }
            current_len += paragraph.len() + if current.is_empty() { 0 } else { 2 };
            current.push(paragraph);
        }
        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
            .into_iter()
            .enumerate()
            .map(|(position, paragraphs)| ChunkRecord {
                chunk_id: format!("{document_id}_chunk_{position}"),
                document_id: document_id.to_string(),
                position,
                text: paragraphs.join("\n\n"),
            })
            .collect()
    }

    /// Paragraphs, with oversized ones split at word boundaries.
    fn split_paragraphs(&self, content: &str) -> Vec<String> {
        let mut out = Vec::new();
        for block in content.split("\n\n") {
            let trimmed = block.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.len() <= self.chunk_size {
                out.push(trimmed.to_string());
                continue;
            }

            // A single paragraph over the target splits on words
            let mut piece = String::new();
            for word in trimmed.split_whitespace() {
                if !piece.is_empty() && piece.len() + word.len() + 1 > self.chunk_size {
                    out.push(std::mem::take(&mut piece));
                }
                if !piece.is_empty() {
                    piece.push(' ');
                }
                piece.push_str(word);
            }
            if !piece.is_empty() {
                out.push(piece);
            }
        }
        out
    }

    /// Tail paragraphs of the previous chunk whose cumulative length stays
    /// within the overlap budget.
    fn overlap_tail(&self, previous: &[String]) -> Vec<String> {
        let mut tail: Vec<String> = Vec::new();
        let mut total = 0usize;
        for paragraph in previous.iter().rev() {
            if total + paragraph.len() > self.overlap {
                break;
            }
            total += paragraph.len();
            tail.push(paragraph.clone());
        }
        tail.reverse();
        tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn empty_content_yields_no_chunks() {
        assert!(chunk_text("", "d1").is_empty());
        assert!(chunk_text("\n\n  \n\n", "d1").is_empty());
    }

    #[test]
    fn small_content_is_one_chunk() {
        let chunks = chunk_text("a short paragraph", "d1");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_id, "d1_chunk_0");
        assert_eq!(chunks[0].position, 0);
    }

    #[test]
    fn chunk_ids_are_stable() {
        let content = "para one\n\npara two";
        let first = chunk_text(content, "doc-9");
        let second = chunk_text(content, "doc-9");
        let ids1: Vec<_> = first.iter().map(|c| c.chunk_id.clone()).collect();
        let ids2: Vec<_> = second.iter().map(|c| c.chunk_id.clone()).collect();
        assert_eq!(ids1, ids2);
    }

    #[test]
    fn chunks_prefer_paragraph_boundaries() {
        let chunker = Chunker::new(40, 10);
        let content = "first paragraph here\n\nsecond paragraph here\n\nthird paragraph here";
        let chunks = chunker.chunk(content, "d1");
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            // No chunk starts or ends mid-word
            assert_eq!(chunk.text.trim(), chunk.text);
        }
    }

    #[test]
    fn overlap_repeats_previous_tail() {
        let chunker = Chunker::new(30, 12);
        let content = "alpha beta\n\ngamma delta\n\nepsilon zeta";
        let chunks = chunker.chunk(content, "d1");
        assert!(chunks.len() >= 2);
        // Second chunk begins with the tail paragraph of the first
        let first_tail = chunks[0].text.split("\n\n").last().unwrap();
        assert!(
            chunks[1].text.starts_with(first_tail),
            "expected overlap: {:?} -> {:?}",
            chunks[0].text,
            chunks[1].text
        );
    }

    #[test]
    fn round_trip_reproduces_content() {
        let chunker = Chunker::new(50, 15);
        let content =
            "one two three\n\nfour five six\n\nseven eight nine\n\nten eleven twelve\n\nthirteen";
        let chunks = chunker.chunk(content, "d1");

        // Reconstruct by dropping each chunk's overlap prefix (the longest
        // paragraph-prefix that suffixes the previous chunk)
        let mut rebuilt = String::new();
        let mut previous: Option<String> = None;
        for chunk in &chunks {
            let mut paragraphs: Vec<&str> = chunk.text.split("\n\n").collect();
            if let Some(prev) = &previous {
                while let Some(first) = paragraphs.first() {
                    if prev.ends_with(*first) {
                        paragraphs.remove(0);
                    } else {
                        break;
                    }
                }
            }
            for p in &paragraphs {
                if !rebuilt.is_empty() {
                    rebuilt.push(' ');
                }
                rebuilt.push_str(p);
            }
            previous = Some(chunk.text.clone());
        }

        assert_eq!(normalize(&rebuilt), normalize(content));
    }

    #[test]
    fn oversized_paragraph_splits_on_words() {
        let chunker = Chunker::new(20, 5);
        let content = "word ".repeat(20);
        let chunks = chunker.chunk(&content, "d1");
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.len() <= 25);
        }
    }
}

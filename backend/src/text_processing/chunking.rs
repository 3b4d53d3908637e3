// backend/src/text_processing/chunking.rs

use tracing::{debug, instrument, warn};

// ~1000 tokens at roughly 4 chars per token.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 4000;
pub const DEFAULT_OVERLAP_CHARS: usize = 200;

#[derive(Debug, Clone, Copy)]
pub struct ChunkConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHUNK_CHARS,
            overlap_chars: DEFAULT_OVERLAP_CHARS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub content: String,
}

/// Splits text into chunks of at most `max_chars`, preferring paragraph
/// boundaries and falling back to sentence boundaries for oversized
/// paragraphs. Consecutive chunks share a slight overlap so retrieval does
/// not lose context at chunk seams.
#[instrument(skip(text), fields(text_len = text.len()))]
pub fn chunk_text(text: &str, config: ChunkConfig) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return vec![];
    }

    let mut parts: Vec<&str> = Vec::new();
    for paragraph in text.split("\n\n") {
        let trimmed = paragraph.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.chars().count() <= config.max_chars {
            parts.push(trimmed);
        } else {
            warn!(
                paragraph_len = trimmed.len(),
                max = config.max_chars,
                "Paragraph exceeds max chunk size, splitting into sentences"
            );
            parts.extend(split_sentences(trimmed));
        }
    }

    let mut chunks: Vec<TextChunk> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for part in parts {
        let part_len = part.chars().count();

        // A single sentence longer than the budget is truncated; sub-sentence
        // splitting buys nothing for retrieval.
        let part = if part_len > config.max_chars {
            warn!(sentence_len = part_len, "Sentence exceeds max chunk size, truncating");
            let end = part
                .char_indices()
                .nth(config.max_chars)
                .map_or(part.len(), |(i, _)| i);
            &part[..end]
        } else {
            part
        };
        let part_len = part.chars().count().min(config.max_chars);

        if current_len + part_len > config.max_chars && !current.is_empty() {
            let overlap_tail = overlap_part(&current, config.overlap_chars);
            chunks.push(TextChunk {
                content: current.join("\n\n"),
            });
            current = match overlap_tail {
                Some(tail) => vec![tail],
                None => Vec::new(),
            };
            current_len = current.iter().map(|p| p.chars().count()).sum();
        }

        current.push(part);
        current_len += part_len;
    }

    if !current.is_empty() {
        chunks.push(TextChunk {
            content: current.join("\n\n"),
        });
    }

    if chunks.is_empty() && !text.trim().is_empty() {
        warn!("Chunking produced nothing for non-empty input, using whole text");
        chunks.push(TextChunk {
            content: text.trim().to_string(),
        });
    }

    debug!(total_chunks = chunks.len(), "Finished chunking");
    chunks
}

fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = paragraph.as_bytes();
    for (i, _) in paragraph.match_indices(". ") {
        // i points at the period; keep it with the sentence
        let end = i + 1;
        if end > start {
            let candidate = paragraph[start..end].trim();
            if !candidate.is_empty() {
                sentences.push(candidate);
            }
        }
        start = end + 1;
    }
    if start < bytes.len() {
        let tail = paragraph[start..].trim();
        if !tail.is_empty() {
            sentences.push(tail);
        }
    }
    sentences
}

/// The final part of the flushed chunk, reused as the head of the next one
/// when it fits the overlap budget.
fn overlap_part<'a>(parts: &[&'a str], overlap_chars: usize) -> Option<&'a str> {
    if overlap_chars == 0 {
        return None;
    }
    parts
        .last()
        .filter(|last| last.chars().count() <= overlap_chars)
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ChunkConfig {
        ChunkConfig {
            max_chars: 60,
            overlap_chars: 25,
        }
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("One short paragraph.", ChunkConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "One short paragraph.");
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("   \n\n  ", ChunkConfig::default()).is_empty());
    }

    #[test]
    fn paragraphs_pack_up_to_the_budget() {
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird paragraph here.";
        let chunks = chunk_text(text, small_config());
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= 60 + 25, "{}", chunk.content);
        }
        assert!(chunks[0].content.contains("First paragraph"));
    }

    #[test]
    fn oversized_paragraph_falls_back_to_sentences() {
        let text = "Alpha sentence one. Beta sentence two. Gamma sentence three. Delta sentence four.";
        let chunks = chunk_text(text, small_config());
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().any(|c| c.content.contains("Alpha sentence one.")));
        assert!(chunks.iter().any(|c| c.content.contains("Delta sentence four.")));
    }

    #[test]
    fn consecutive_chunks_share_overlap() {
        let config = ChunkConfig {
            max_chars: 50,
            overlap_chars: 30,
        };
        let text = "Part one is here.\n\nPart two is here.\n\nPart three is here.\n\nPart four is here.";
        let chunks = chunk_text(text, config);
        assert!(chunks.len() >= 2);
        // The head of each later chunk repeats the tail part of its predecessor.
        for pair in chunks.windows(2) {
            let prev_tail = pair[0].content.split("\n\n").last().unwrap();
            assert!(
                pair[1].content.starts_with(prev_tail),
                "expected {:?} to start with {:?}",
                pair[1].content,
                prev_tail
            );
        }
    }

    #[test]
    fn giant_sentence_is_truncated() {
        let text = "x".repeat(500);
        let chunks = chunk_text(&text, small_config());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content.chars().count(), 60);
    }
}

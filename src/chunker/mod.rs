//! Splits raw document text into bounded, overlapping chunks.
//!
//! Chunks are assembled from whole sentence segments (UAX #29 sentence
//! boundaries, which also break at newlines, so paragraph breaks are honored)
//! and sized against a token budget counted with the `cl100k_base` encoding.
//! Consecutive chunks share a trailing-segment overlap so context at chunk
//! boundaries is not lost.
//!
//! The chunker is deterministic and has no side effects: identical input
//! always yields the identical ordered chunk sequence, and the concatenation
//! of the chunks (minus overlap) reproduces the input text exactly.

use thiserror::Error;
use tiktoken_rs::CoreBPE;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkingConfig;

/// Chunker construction errors.
///
/// `chunk` itself is total: malformed or empty input yields an empty sequence,
/// never an error.
#[derive(Debug, Error)]
pub enum ChunkingError {
    #[error("invalid chunking config: {0}")]
    InvalidConfig(String),

    #[error("tokenizer initialization failed: {0}")]
    Tokenizer(String),
}

/// A piece of source text together with its token count. `fresh` marks
/// segments first seen in the current chunk, as opposed to overlap carried
/// from the previous one.
struct Segment {
    text: String,
    tokens: usize,
    fresh: bool,
}

/// Token-budgeted text splitter.
pub struct Chunker {
    bpe: CoreBPE,
    max_tokens: usize,
    overlap_tokens: usize,
}

impl Chunker {
    /// Builds a chunker for the given budget.
    ///
    /// Fails when the budget is degenerate (`max_tokens == 0`, or an overlap
    /// that would swallow the whole chunk) or when the `cl100k_base` ranks
    /// cannot be loaded.
    pub fn new(config: &ChunkingConfig) -> Result<Self, ChunkingError> {
        if config.max_tokens == 0 {
            return Err(ChunkingError::InvalidConfig(
                "max_tokens must be greater than zero".into(),
            ));
        }
        if config.overlap_tokens >= config.max_tokens {
            return Err(ChunkingError::InvalidConfig(format!(
                "overlap_tokens ({}) must be smaller than max_tokens ({})",
                config.overlap_tokens, config.max_tokens
            )));
        }
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|err| ChunkingError::Tokenizer(err.to_string()))?;
        Ok(Self {
            bpe,
            max_tokens: config.max_tokens,
            overlap_tokens: config.overlap_tokens,
        })
    }

    /// Splits `text` into ordered, overlapping chunks.
    ///
    /// Empty or whitespace-only input returns an empty vector.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut chunks: Vec<String> = Vec::new();
        let mut current: Vec<Segment> = Vec::new();
        let mut current_tokens = 0usize;

        for segment in self.segments(text) {
            if current_tokens + segment.tokens > self.max_tokens {
                if current.iter().any(|s| s.fresh) {
                    chunks.push(render(&current));
                    let (tail, tail_tokens) = self.overlap_tail(current);
                    current = tail;
                    current_tokens = tail_tokens;
                }
                // Shrink the carried overlap from the front until the next
                // segment fits; an oversized segment may still stand alone.
                while !current.is_empty() && current_tokens + segment.tokens > self.max_tokens {
                    let removed = current.remove(0);
                    current_tokens -= removed.tokens;
                }
            }
            current_tokens += segment.tokens;
            current.push(segment);
        }

        if current.iter().any(|s| s.fresh) {
            chunks.push(render(&current));
        }
        chunks
    }

    /// Number of `cl100k_base` tokens in `text`.
    pub fn token_count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Sentence segments of `text`, with sentences over the token budget
    /// broken down further so every segment fits in a chunk by itself.
    fn segments(&self, text: &str) -> Vec<Segment> {
        let mut segments = Vec::new();
        for sentence in text.split_sentence_bounds() {
            let tokens = self.token_count(sentence);
            if tokens <= self.max_tokens {
                segments.push(Segment {
                    text: sentence.to_string(),
                    tokens,
                    fresh: true,
                });
            } else {
                self.split_oversized(sentence, &mut segments);
            }
        }
        segments
    }

    /// Splits a sentence that exceeds the budget on word boundaries, packing
    /// words into runs that fit. A single word over the budget (URLs, encoded
    /// blobs) is cut on character boundaries as a last resort.
    fn split_oversized(&self, sentence: &str, out: &mut Vec<Segment>) {
        let mut run = String::new();
        let mut run_tokens = 0usize;
        for word in sentence.split_word_bounds() {
            let tokens = self.token_count(word);
            if tokens > self.max_tokens {
                if !run.is_empty() {
                    out.push(Segment {
                        text: std::mem::take(&mut run),
                        tokens: run_tokens,
                        fresh: true,
                    });
                    run_tokens = 0;
                }
                self.split_by_chars(word, out);
                continue;
            }
            if run_tokens + tokens > self.max_tokens && !run.is_empty() {
                out.push(Segment {
                    text: std::mem::take(&mut run),
                    tokens: run_tokens,
                    fresh: true,
                });
                run_tokens = 0;
            }
            run.push_str(word);
            run_tokens += tokens;
        }
        if !run.is_empty() {
            out.push(Segment {
                text: run,
                tokens: run_tokens,
                fresh: true,
            });
        }
    }

    /// Cuts `word` into windows of at most `max_tokens` characters. One token
    /// never encodes to zero characters, so each window stays within a small
    /// constant factor of the budget.
    fn split_by_chars(&self, word: &str, out: &mut Vec<Segment>) {
        let chars: Vec<char> = word.chars().collect();
        for window in chars.chunks(self.max_tokens) {
            let piece: String = window.iter().collect();
            let tokens = self.token_count(&piece);
            out.push(Segment {
                text: piece,
                tokens,
                fresh: true,
            });
        }
    }

    /// The longest suffix of `segments` whose token total fits the overlap
    /// budget, remarked as carried-over context.
    fn overlap_tail(&self, segments: Vec<Segment>) -> (Vec<Segment>, usize) {
        if self.overlap_tokens == 0 {
            return (Vec::new(), 0);
        }
        let mut total = 0usize;
        let mut start = segments.len();
        for (idx, segment) in segments.iter().enumerate().rev() {
            if total + segment.tokens > self.overlap_tokens {
                break;
            }
            total += segment.tokens;
            start = idx;
        }
        let tail: Vec<Segment> = segments
            .into_iter()
            .skip(start)
            .map(|mut s| {
                s.fresh = false;
                s
            })
            .collect();
        (tail, total)
    }
}

fn render(segments: &[Segment]) -> String {
    let mut text = String::new();
    for segment in segments {
        text.push_str(&segment.text);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_chunker(max_tokens: usize, overlap_tokens: usize) -> Chunker {
        Chunker::new(
            &ChunkingConfig::default()
                .with_max_tokens(max_tokens)
                .with_overlap_tokens(overlap_tokens),
        )
        .unwrap()
    }

    #[test]
    fn empty_and_whitespace_input_yield_no_chunks() {
        let chunker = make_chunker(100, 20);
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("   \n\t  ").is_empty());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunker = make_chunker(100, 20);
        let chunks = chunker.chunk("A short sentence.");
        assert_eq!(chunks, vec!["A short sentence.".to_string()]);
    }

    #[test]
    fn chunking_is_deterministic() {
        let chunker = make_chunker(30, 8);
        let text = "One sentence here. Another sentence follows. A third one closes. \
                    And a fourth for good measure. Plus a fifth to force splitting.";
        assert_eq!(chunker.chunk(text), chunker.chunk(text));
    }

    #[test]
    fn long_text_splits_and_respects_budget() {
        let chunker = make_chunker(25, 5);
        let text = "The quick brown fox jumps over the lazy dog. \
                    Pack my box with five dozen liquor jugs. \
                    How vexingly quick daft zebras jump. \
                    Sphinx of black quartz, judge my vow. \
                    The five boxing wizards jump quickly."
            .to_string();
        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 1, "expected multiple chunks");
        for chunk in &chunks {
            assert!(
                chunker.token_count(chunk) <= 25,
                "chunk over budget: {chunk:?}"
            );
        }
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let chunker = make_chunker(25, 10);
        let text = "First point made plainly. Second point made plainly. \
                    Third point made plainly. Fourth point made plainly. \
                    Fifth point made plainly. Sixth point made plainly.";
        let chunks = chunker.chunk(text);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let tail_sentence = pair[0]
                .split_sentence_bounds()
                .last()
                .expect("chunk has at least one sentence");
            assert!(
                pair[1].starts_with(tail_sentence),
                "chunk {:?} should start with overlap {:?}",
                pair[1],
                tail_sentence
            );
        }
    }

    #[test]
    fn concatenation_minus_overlap_reconstructs_input() {
        let chunker = make_chunker(20, 6);
        let text = "Alpha beta gamma delta. Epsilon zeta eta theta. \
                    Iota kappa lambda mu. Nu xi omicron pi. \
                    Rho sigma tau upsilon. Phi chi psi omega.";
        let chunks = chunker.chunk(text);
        let mut rebuilt = String::new();
        for chunk in &chunks {
            // Strip the prefix already contributed by the previous chunk.
            let mut fresh_start = 0;
            for prefix_len in (0..=chunk.len()).rev() {
                if chunk.is_char_boundary(prefix_len) && rebuilt.ends_with(&chunk[..prefix_len]) {
                    fresh_start = prefix_len;
                    break;
                }
            }
            rebuilt.push_str(&chunk[fresh_start..]);
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn oversized_single_word_is_still_chunked() {
        let chunker = make_chunker(10, 0);
        let blob = "x".repeat(400);
        let chunks = chunker.chunk(&blob);
        assert!(!chunks.is_empty());
        assert_eq!(chunks.concat().len(), 400);
    }

    #[test]
    fn rejects_overlap_not_smaller_than_max() {
        let config = ChunkingConfig::default()
            .with_max_tokens(50)
            .with_overlap_tokens(50);
        assert!(matches!(
            Chunker::new(&config),
            Err(ChunkingError::InvalidConfig(_))
        ));
    }
}

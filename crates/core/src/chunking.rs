use crate::error::ChunkingError;
use crate::models::Chunk;
use tracing::warn;

/// Sentence-accumulation chunking bounds. `chunk_overlap > 0` enables the
/// single-sentence sliding overlap between consecutive chunks.
#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_tokens_per_chunk: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_chunk: 512,
            chunk_overlap: 50,
        }
    }
}

/// Pluggable token counter. The chunker estimates `len / 4` whenever an
/// implementation fails, so a flaky tokenizer degrades instead of aborting.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> Result<usize, ChunkingError>;
}

/// Characters-per-token estimate, also the fallback path for every other
/// counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> Result<usize, ChunkingError> {
        Ok(text.len() / 4)
    }
}

fn count_tokens(counter: &dyn TokenCounter, text: &str) -> usize {
    match counter.count(text) {
        Ok(tokens) => tokens,
        Err(error) => {
            warn!(%error, "token counting failed, estimating");
            text.len() / 4
        }
    }
}

/// Split document text into ordered, token-bounded chunks.
///
/// Sentences accumulate into the current chunk until the next one would push
/// it past `max_tokens_per_chunk`; the chunk is then closed and, when overlap
/// is enabled and the closed chunk held more than one sentence, its last
/// sentence seeds the next chunk. Empty or whitespace-only input yields no
/// chunks. Indices start at 0 and are contiguous.
pub fn chunk_text(text: &str, config: &ChunkingConfig, counter: &dyn TokenCounter) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let flattened = text.replace('\n', " ");
    let sentences = flattened
        .split(". ")
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty());

    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;

    for sentence in sentences {
        let sentence_tokens = count_tokens(counter, sentence);

        if current_tokens + sentence_tokens > config.max_tokens_per_chunk {
            if !current.is_empty() {
                push_chunk(&mut chunks, &current, counter);
            }

            if config.chunk_overlap > 0 && current.len() > 1 {
                let seed = current
                    .last()
                    .cloned()
                    .unwrap_or_default();
                current_tokens = count_tokens(counter, &seed);
                current = vec![seed];
            } else {
                current.clear();
                current_tokens = 0;
            }
        }

        current.push(sentence.to_string());
        current_tokens += sentence_tokens;
    }

    if !current.is_empty() {
        push_chunk(&mut chunks, &current, counter);
    }

    chunks
}

fn push_chunk(chunks: &mut Vec<Chunk>, sentences: &[String], counter: &dyn TokenCounter) {
    let chunk_text = format!("{}.", sentences.join(". "));
    let token_count = count_tokens(counter, &chunk_text);
    let chunk_index = chunks.len();
    chunks.push(Chunk {
        chunk_text,
        chunk_index,
        token_count,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingTokenCounter;

    impl TokenCounter for FailingTokenCounter {
        fn count(&self, _text: &str) -> Result<usize, ChunkingError> {
            Err(ChunkingError::TokenCount("tokenizer unavailable".to_string()))
        }
    }

    fn tight_config() -> ChunkingConfig {
        ChunkingConfig {
            max_tokens_per_chunk: 10,
            chunk_overlap: 50,
        }
    }

    #[test]
    fn empty_input_yields_zero_chunks() {
        let counter = HeuristicTokenCounter;
        assert!(chunk_text("", &ChunkingConfig::default(), &counter).is_empty());
        assert!(chunk_text("   \n\t  ", &ChunkingConfig::default(), &counter).is_empty());
    }

    #[test]
    fn short_input_yields_one_chunk() {
        let counter = HeuristicTokenCounter;
        let chunks = chunk_text("Just one sentence", &ChunkingConfig::default(), &counter);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].chunk_text, "Just one sentence.");
    }

    #[test]
    fn indices_are_contiguous_from_zero() {
        let counter = HeuristicTokenCounter;
        let text = "First sentence of the mail. Second sentence with more words. \
                    Third sentence keeps going on. Fourth sentence closes it out. \
                    Fifth one for good measure";
        let chunks = chunk_text(text, &tight_config(), &counter);

        assert!(chunks.len() > 1);
        for (expected, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, expected);
        }
    }

    #[test]
    fn all_sentences_survive_in_order() {
        let counter = HeuristicTokenCounter;
        let text = "Alpha alpha alpha. Bravo bravo bravo. Charlie charlie charlie. \
                    Delta delta delta. Echo echo echo";
        let chunks = chunk_text(text, &tight_config(), &counter);

        let joined = chunks
            .iter()
            .map(|chunk| chunk.chunk_text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let mut last_position = 0;
        for sentence in ["Alpha", "Bravo", "Charlie", "Delta", "Echo"] {
            let position = joined[last_position..]
                .find(sentence)
                .map(|offset| last_position + offset);
            assert!(position.is_some(), "sentence {sentence} missing or out of order");
            last_position = position.unwrap();
        }
    }

    #[test]
    fn overlap_seeds_next_chunk_with_last_sentence() {
        let counter = HeuristicTokenCounter;
        let text = "One one one one one. Two two two two two. Three three three three";
        let chunks = chunk_text(text, &tight_config(), &counter);

        assert!(chunks.len() >= 2);
        // The sentence that closed chunk 0 reappears at the head of chunk 1.
        let closing = chunks[0]
            .chunk_text
            .trim_end_matches('.')
            .rsplit(". ")
            .next()
            .unwrap()
            .to_string();
        assert!(chunks[1].chunk_text.starts_with(&closing));
    }

    #[test]
    fn zero_overlap_does_not_duplicate_sentences() {
        let counter = HeuristicTokenCounter;
        let config = ChunkingConfig {
            max_tokens_per_chunk: 10,
            chunk_overlap: 0,
        };
        let text = "One one one one one. Two two two two two. Three three three three";
        let chunks = chunk_text(text, &config, &counter);

        let joined = chunks
            .iter()
            .map(|chunk| chunk.chunk_text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(joined.matches("Two two two two two").count(), 1);
    }

    #[test]
    fn failing_counter_falls_back_to_length_estimate() {
        let chunks = chunk_text(
            "A sentence that still gets chunked",
            &ChunkingConfig::default(),
            &FailingTokenCounter,
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].token_count,
            chunks[0].chunk_text.len() / 4
        );
    }

    #[test]
    fn newlines_are_flattened_before_sentence_split() {
        let counter = HeuristicTokenCounter;
        let chunks = chunk_text(
            "Line one. Line\ntwo continues here",
            &ChunkingConfig::default(),
            &counter,
        );
        assert_eq!(chunks.len(), 1);
        assert!(!chunks[0].chunk_text.contains('\n'));
    }
}

use crate::error::SearchError;
use std::sync::OnceLock;
use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::warn;

/// Upper bound on the characters handed to the BPE encoder in one call.
/// Merging is quadratic in the length of a single word, so long unbroken runs
/// are split; a split never lowers the count.
const SEGMENT_CHARS: usize = 1_024;

static CL100K: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn encoder() -> Option<&'static CoreBPE> {
    CL100K
        .get_or_init(|| match cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(error) => {
                warn!(%error, "cl100k_base unavailable, falling back to estimated token counts");
                None
            }
        })
        .as_ref()
}

/// Conservative estimate used when the tokenizer cannot be loaded: the larger
/// of a word-based count and a character-based count that charges every
/// non-ASCII character a full token.
pub fn estimate_token_count(text: &str) -> usize {
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    let word_estimate = (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize;

    let ascii_chars = text.chars().filter(char::is_ascii).count();
    let other_chars = text.chars().count() - ascii_chars;
    let char_estimate = ascii_chars.div_ceil(4) + other_chars;

    word_estimate.max(char_estimate)
}

/// Pieces of at most [`SEGMENT_CHARS`] characters, cut before whitespace where
/// possible so a cut usually falls on a token boundary.
fn segments(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let cut = match rest.char_indices().nth(SEGMENT_CHARS) {
            None => rest.len(),
            Some((hard, _)) => rest[..hard]
                .rfind(char::is_whitespace)
                .filter(|&index| index > 0)
                .unwrap_or(hard),
        };
        let (head, tail) = rest.split_at(cut);
        rest = tail;
        Some(head)
    })
}

/// cl100k token count of `text`, stopping early once it exceeds `limit`.
pub fn count_tokens_up_to(text: &str, limit: usize) -> usize {
    let mut total = 0;
    for segment in segments(text) {
        total += match encoder() {
            Some(bpe) => bpe.encode_with_special_tokens(segment).len(),
            None => estimate_token_count(segment),
        };
        if total > limit {
            break;
        }
    }
    total
}

pub fn count_tokens(text: &str) -> usize {
    count_tokens_up_to(text, usize::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    pub max_tokens: usize,
}

impl TokenBudget {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }

    /// Returns the token count of `prompt`, or `TokenBudgetExceeded` when it
    /// does not fit. Counting stops as soon as the budget is overrun.
    pub fn check(&self, prompt: &str) -> Result<usize, SearchError> {
        let tokens = count_tokens_up_to(prompt, self.max_tokens);
        if tokens > self.max_tokens {
            return Err(SearchError::TokenBudgetExceeded {
                tokens,
                max_tokens: self.max_tokens,
            });
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_never_drops_below_character_count() {
        assert_eq!(estimate_token_count(""), 0);
        assert_eq!(estimate_token_count("This is a test."), 5);
        assert_eq!(estimate_token_count("hello world"), 3);
        assert_eq!(estimate_token_count(&"x".repeat(200_000)), 50_000);
        assert_eq!(estimate_token_count(&"数".repeat(1_000)), 1_000);
    }

    #[test]
    fn cl100k_counts_plain_english() {
        assert_eq!(count_tokens("hello world"), 2);
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn segments_cover_text_and_respect_length() {
        let text = format!("{} {}", "a".repeat(1_500), "b".repeat(3_000));
        let pieces: Vec<&str> = segments(&text).collect();

        assert_eq!(pieces.concat(), text);
        assert!(pieces.iter().all(|piece| piece.chars().count() <= SEGMENT_CHARS));
        assert_eq!(pieces[1], "a".repeat(476));
    }

    #[test]
    fn prompt_within_budget_passes() {
        let budget = TokenBudget::new(10);
        let tokens = budget.check("one two three").unwrap();
        assert!(tokens > 0 && tokens <= 10);
    }

    #[test]
    fn prompt_over_budget_is_refused() {
        let budget = TokenBudget::new(10);
        let prompt = "word ".repeat(30);

        match budget.check(&prompt) {
            Err(SearchError::TokenBudgetExceeded { tokens, max_tokens }) => {
                assert!(tokens > 10);
                assert_eq!(max_tokens, 10);
            }
            other => panic!("expected budget error, got {other:?}"),
        }
    }

    #[test]
    fn unspaced_prompt_is_refused() {
        let budget = TokenBudget::new(6_000);
        let result = budget.check(&"x".repeat(200_000));
        assert!(matches!(
            result,
            Err(SearchError::TokenBudgetExceeded { max_tokens: 6_000, .. })
        ));
    }

    #[test]
    fn cjk_prompt_is_refused() {
        let budget = TokenBudget::new(6_000);
        let result = budget.check(&"数据库索引".repeat(17_000));
        assert!(matches!(
            result,
            Err(SearchError::TokenBudgetExceeded { .. })
        ));
    }
}

//! Token count estimation.
//!
//! Chunk sizing only needs a stable approximation, not a model-exact count:
//! a token is taken to be [`CHARS_PER_TOKEN`] characters, rounded up.

use crate::defaults::CHARS_PER_TOKEN;

/// Estimate the token count of `text` (character length / 4, rounded up).
#[inline]
pub fn estimate_tokens(text: &str) -> usize {
    estimate_tokens_for_chars(text.chars().count())
}

/// Estimate tokens for a known character count.
#[inline]
pub fn estimate_tokens_for_chars(chars: usize) -> usize {
    chars.div_ceil(CHARS_PER_TOKEN)
}

/// Character budget corresponding to a token budget.
#[inline]
pub fn chars_for_tokens(tokens: usize) -> usize {
    tokens * CHARS_PER_TOKEN
}

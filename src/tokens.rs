//! Word-count token heuristic.
//!
//! Approximates tokenizer costs as `ceil(words / 0.75)` — roughly 4 tokens
//! per 3 words of English text. This is the single cost proxy used by the
//! chunker, the context packer, and anything else that budgets tokens, so
//! all budgets stay mutually consistent without an external tokenizer.

/// Estimate the token count of `text`.
///
/// Words are non-empty whitespace-delimited runs. Deterministic and
/// monotonic in word count.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    (words as f64 / 0.75).ceil() as usize
}

/// Truncate `text` to fit within `max_tokens`.
///
/// Keeps the first `floor(max_tokens * 0.75)` words. Words are re-joined
/// with single spaces; original inter-word spacing is not preserved.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let max_words = (max_tokens as f64 * 0.75).floor() as usize;
    if words.len() <= max_words {
        return text.to_string();
    }
    words[..max_words].join(" ")
}

//! Approximate token counting.
//!
//! This is NOT a tokenizer. Counts are a length-based estimate and
//! will differ from what the model actually sees.

/// Characters assumed per token.
const CHARS_PER_TOKEN: usize = 4;

/// Estimates the token count of `text` as `max(1, ceil(len / 4))`
/// where `len` counts characters. Callers skip accounting entirely
/// for empty input.
pub fn estimate(text: &str) -> usize {
    let len = text.chars().count();
    len.div_ceil(CHARS_PER_TOKEN).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_never_returns_zero_for_short_text() {
        assert_eq!(estimate("a"), 1);
        assert_eq!(estimate("abc"), 1);
        assert_eq!(estimate("abcd"), 1);
    }

    #[test]
    fn it_rounds_up() {
        assert_eq!(estimate("abcde"), 2);
        assert_eq!(estimate("abcdefgh"), 2);
        assert_eq!(estimate("abcdefghi"), 3);
    }

    #[test]
    fn it_matches_ceil_of_quarter_length() {
        for len in 4..200 {
            let text = "x".repeat(len);
            assert_eq!(estimate(&text), len.div_ceil(4), "len {}", len);
        }
    }

    #[test]
    fn it_counts_characters_not_bytes() {
        // Four characters, twelve bytes
        assert_eq!(estimate("日本語だ"), 1);
    }
}

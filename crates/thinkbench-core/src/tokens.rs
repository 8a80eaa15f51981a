use regex::Regex;
use std::sync::OnceLock;

fn word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b\w+\b").expect("word pattern"))
}

fn punctuation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^\w\s]").expect("punctuation pattern"))
}

/// Word-based token estimate for backends that report no usage.
///
/// `words * 1.3 + punctuation * 0.8`, truncated; at least 1 for non-empty text.
pub fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    let words = word_pattern().find_iter(text).count() as f64;
    let punctuation = punctuation_pattern().find_iter(text).count() as f64;
    ((words * 1.3 + punctuation * 0.8) as u64).max(1)
}

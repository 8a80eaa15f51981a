//! Answer extraction from free-form model output.
//!
//! Regions are located by an ordered list of matchers: a `\boxed{...}`
//! region first, a bracketed list literal second. The first matcher that
//! finds any region decides the outcome; later matchers are not consulted
//! even when every region of the earlier one fails to parse.
//!
//! The bracket fallback can pick up incidental lists from the model's
//! reasoning (for example a restated input list) and then count as
//! instruction-compliant. That precision/recall trade-off is kept on purpose.

use crate::types::{Answer, Number, Relation};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerShape {
    Scalar,
    Sequence,
    Set,
    Relation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// No instruction-compliant region anywhere in the text.
    NoRegion,
    /// A region was found but its content did not convert cleanly.
    ParseFailed { region: String },
    Parsed(Answer),
}

impl Extraction {
    pub fn instruction_followed(&self) -> bool {
        !matches!(self, Extraction::NoRegion)
    }

    pub fn answer(&self) -> Option<&Answer> {
        match self {
            Extraction::Parsed(answer) => Some(answer),
            _ => None,
        }
    }

    pub fn into_answer(self) -> Option<Answer> {
        match self {
            Extraction::Parsed(answer) => Some(answer),
            _ => None,
        }
    }
}

/// Returns candidate regions, most preferred first.
pub type Matcher = fn(&str) -> Vec<String>;

const LIST_MATCHERS: &[(&str, Matcher)] =
    &[("boxed", boxed_regions), ("bracket_list", bracket_regions)];
const RELATION_MATCHERS: &[(&str, Matcher)] = &[("boxed", boxed_regions)];

pub fn matchers_for(shape: AnswerShape) -> &'static [(&'static str, Matcher)] {
    match shape {
        AnswerShape::Relation => RELATION_MATCHERS,
        AnswerShape::Scalar | AnswerShape::Sequence | AnswerShape::Set => LIST_MATCHERS,
    }
}

pub fn extract(text: &str, shape: AnswerShape) -> Extraction {
    for (name, matcher) in matchers_for(shape) {
        let regions = matcher(text);
        let Some(newest) = regions.first() else {
            continue;
        };
        for region in &regions {
            if let Some(answer) = parse_region(region, shape) {
                return Extraction::Parsed(answer);
            }
        }
        tracing::debug!(matcher = *name, region = %newest, "answer region did not parse");
        return Extraction::ParseFailed {
            region: newest.clone(),
        };
    }
    Extraction::NoRegion
}

/// Contents of every brace-balanced `\boxed{...}`, last occurrence first.
pub fn boxed_regions(text: &str) -> Vec<String> {
    const MARKER: &str = "\\boxed";
    let mut regions = Vec::new();
    let mut cursor = 0;
    while let Some(offset) = text[cursor..].find(MARKER) {
        let after_marker = cursor + offset + MARKER.len();
        cursor = after_marker;
        let rest = &text[after_marker..];
        let trimmed = rest.trim_start();
        if !trimmed.starts_with('{') {
            continue;
        }
        let open = after_marker + (rest.len() - trimmed.len());
        if let Some(close) = matching_brace(text, open) {
            regions.push(text[open + 1..close].to_string());
            cursor = close + 1;
        }
    }
    regions.reverse();
    regions
}

fn matching_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, ch) in text[open..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// Contents of every `[...]` list literal, last occurrence first. LaTeX
/// display-math delimiters `\[ ... \]` are not list literals.
pub fn bracket_regions(text: &str) -> Vec<String> {
    let mut regions: Vec<String> = bracket_pattern()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            if text[..whole.start()].ends_with('\\') {
                return None;
            }
            Some(caps.get(1)?.as_str().to_string())
        })
        .collect();
    regions.reverse();
    regions
}

pub fn parse_region(region: &str, shape: AnswerShape) -> Option<Answer> {
    let normalized = normalize_latex(region);
    match shape {
        AnswerShape::Relation => parse_relation(&normalized).map(Answer::Relation),
        AnswerShape::Scalar => parse_scalar(&normalized).map(Answer::Scalar),
        AnswerShape::Sequence => {
            let numbers = parse_numbers(&normalized)?;
            Some(Answer::Sequence(numbers))
        }
        AnswerShape::Set => {
            let mut numbers = parse_numbers(&normalized)?;
            numbers.sort_by(|a, b| a.as_f64().total_cmp(&b.as_f64()));
            numbers.dedup_by(|a, b| a.as_f64() == b.as_f64());
            Some(Answer::Set(numbers))
        }
    }
}

fn parse_scalar(region: &str) -> Option<Number> {
    let value = match region.rfind('=') {
        Some(idx) => &region[idx + 1..],
        None => region,
    };
    if let Some(stripped) = strip_decoration(value.trim()) {
        if thousands_pattern().is_match(stripped) {
            return parse_number(&stripped.replace(',', ""));
        }
    }
    let numbers = parse_numbers(value)?;
    match numbers.as_slice() {
        [single] => Some(*single),
        _ => None,
    }
}

/// Connective words that may sit between list items.
const FILLER_WORDS: &[&str] = &["and", "or", "\\quad", "\\qquad", "\\text"];

/// Every token must convert; a single failure rejects the whole region.
/// Only bracket punctuation and `FILLER_WORDS` may be skipped.
fn parse_numbers(region: &str) -> Option<Vec<Number>> {
    let mut numbers = Vec::new();
    for piece in region.split(|c: char| c.is_whitespace() || c == ',' || c == ';') {
        if !piece.chars().any(|c| c.is_ascii_digit()) {
            if is_filler(piece) {
                continue;
            }
            return None;
        }
        numbers.push(parse_number(strip_decoration(piece)?)?);
    }
    if numbers.is_empty() {
        None
    } else {
        Some(numbers)
    }
}

fn is_filler(piece: &str) -> bool {
    piece
        .chars()
        .all(|c| matches!(c, '[' | ']' | '(' | ')' | '{' | '}' | ':' | '&' | '|'))
        || FILLER_WORDS.contains(&piece.to_ascii_lowercase().as_str())
}

/// Dash-like glyphs that read as a sign but are not ASCII `-`.
fn is_sign_like(c: char) -> bool {
    matches!(
        c,
        '\u{2010}'..='\u{2015}' | '\u{2212}' | '\u{FE63}' | '\u{FF0B}' | '\u{FF0D}' | '\u{00B1}'
    )
}

/// Trims punctuation around a numeric token. Letters or a stray sign glyph
/// in the trimmed part reject the token instead of being dropped.
fn strip_decoration(token: &str) -> Option<&str> {
    let start = token.find(|c: char| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'))?;
    let end = token.rfind(|c: char| c.is_ascii_digit())? + 1;
    if start >= end {
        return None;
    }
    let mut trimmed = token[..start].chars().chain(token[end..].chars());
    if trimmed.any(|c| c.is_alphanumeric() || is_sign_like(c)) {
        return None;
    }
    Some(&token[start..end])
}

pub fn parse_number(token: &str) -> Option<Number> {
    if let Some((numerator, denominator)) = token.split_once('/') {
        let numerator = parse_plain(numerator)?.as_f64();
        let denominator = parse_plain(denominator)?.as_f64();
        if denominator == 0.0 {
            return None;
        }
        return Some(Number::Float(numerator / denominator));
    }
    parse_plain(token)
}

fn parse_plain(token: &str) -> Option<Number> {
    let token = token.trim();
    if let Ok(value) = token.parse::<i128>() {
        return Some(Number::Int(value));
    }
    match token.parse::<f64>() {
        Ok(value) if value.is_finite() => Some(Number::Float(value)),
        _ => None,
    }
}

fn parse_relation(region: &str) -> Option<Relation> {
    let lowered = region.to_lowercase();
    let has_any = |terms: &[&str]| terms.iter().any(|term| lowered.contains(term));
    if has_any(&["greater", ">", "more", "larger", "bigger"]) {
        Some(Relation::GreaterThan)
    } else if has_any(&["less", "<", "smaller", "lower", "fewer"]) {
        Some(Relation::LessThan)
    } else if has_any(&["equal", "=", "same"]) {
        Some(Relation::EqualTo)
    } else {
        None
    }
}

fn normalize_latex(region: &str) -> String {
    let text = region
        .replace("\\n", " ")
        .replace("\\minus", "-")
        .replace(['\u{2212}', '\u{2013}', '\u{FE63}', '\u{FF0D}'], "-");
    let text = text_command_pattern().replace_all(&text, "$1");
    let text = fraction_pattern().replace_all(&text, "$1/$2");
    let mut text = text.into_owned();
    for decoration in ["\\left", "\\right", "\\{", "\\}", "\\,", "\\;", "\\!", "$"] {
        text = text.replace(decoration, " ");
    }
    text
}

fn bracket_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[([^\[\]]*)\]").expect("bracket pattern"))
}

fn thousands_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[+-]?\d{1,3}(?:,\d{3})+(?:\.\d+)?$").expect("thousands pattern")
    })
}

fn text_command_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\\(?:text|textbf|mathrm|mathbf|operatorname)\s*\{([^{}]*)\}")
            .expect("text command pattern")
    })
}

fn fraction_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\\[dt]?frac\s*\{([^{}]*)\}\s*\{([^{}]*)\}").expect("fraction pattern")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i128]) -> Vec<Number> {
        values.iter().map(|v| Number::Int(*v)).collect()
    }

    #[test]
    fn boxed_regions_are_brace_balanced_and_last_first() {
        let text = r"first \boxed{1} then \boxed{\text{2}} done";
        assert_eq!(boxed_regions(text), vec![r"\text{2}", "1"]);
    }

    #[test]
    fn unterminated_boxed_is_ignored() {
        assert!(boxed_regions(r"\boxed{12").is_empty());
    }

    #[test]
    fn scalar_from_boxed() {
        let extraction = extract(r"so the sum is \boxed{42}.", AnswerShape::Scalar);
        assert_eq!(extraction, Extraction::Parsed(Answer::Scalar(Number::Int(42))));
    }

    #[test]
    fn scalar_accepts_thousands_separators_and_assignments() {
        assert_eq!(
            extract(r"\boxed{-1,234,567}", AnswerShape::Scalar).into_answer(),
            Some(Answer::Scalar(Number::Int(-1_234_567)))
        );
        assert_eq!(
            extract(r"\boxed{x = 5}", AnswerShape::Scalar).into_answer(),
            Some(Answer::Scalar(Number::Int(5)))
        );
    }

    #[test]
    fn fractions_become_floats() {
        assert_eq!(
            extract(r"\boxed{\frac{7}{2}}", AnswerShape::Scalar).into_answer(),
            Some(Answer::Scalar(Number::Float(3.5)))
        );
    }

    #[test]
    fn sequence_from_boxed_list() {
        assert_eq!(
            extract(r"\boxed{[-3, 1, 2]}", AnswerShape::Sequence).into_answer(),
            Some(Answer::Sequence(ints(&[-3, 1, 2])))
        );
    }

    #[test]
    fn bracket_fallback_when_no_boxed_region() {
        let text = "Sorted: [1, 2, 3]";
        assert_eq!(
            extract(text, AnswerShape::Sequence).into_answer(),
            Some(Answer::Sequence(ints(&[1, 2, 3])))
        );
    }

    #[test]
    fn display_math_is_not_a_list_literal() {
        assert!(bracket_regions(r"\[ x^2 \]").is_empty());
    }

    #[test]
    fn token_failure_rejects_whole_region() {
        let extraction = extract(r"\boxed{1, 2, 3x4}", AnswerShape::Sequence);
        assert_eq!(
            extraction,
            Extraction::ParseFailed {
                region: "1, 2, 3x4".to_string()
            }
        );
        assert!(extraction.instruction_followed());
    }

    #[test]
    fn boxed_failure_does_not_fall_back_to_brackets() {
        let text = r"[1, 2, 3] and finally \boxed{unknown}";
        assert!(matches!(
            extract(text, AnswerShape::Sequence),
            Extraction::ParseFailed { .. }
        ));
    }

    #[test]
    fn earlier_boxed_region_is_used_when_last_fails() {
        let text = r"\boxed{7} ... \boxed{seven}";
        assert_eq!(
            extract(text, AnswerShape::Scalar).into_answer(),
            Some(Answer::Scalar(Number::Int(7)))
        );
    }

    #[test]
    fn no_region_is_distinct_from_parse_failure() {
        let extraction = extract("I think the answer is 7", AnswerShape::Scalar);
        assert_eq!(extraction, Extraction::NoRegion);
        assert!(!extraction.instruction_followed());
    }

    #[test]
    fn set_is_sorted_and_deduplicated() {
        assert_eq!(
            extract(r"\boxed{2 and 1, 2}", AnswerShape::Set).into_answer(),
            Some(Answer::Set(ints(&[1, 2])))
        );
    }

    #[test]
    fn spelled_out_number_rejects_the_region() {
        assert_eq!(
            extract(r"\boxed{1, 2, three}", AnswerShape::Set),
            Extraction::ParseFailed {
                region: "1, 2, three".to_string()
            }
        );
        assert!(matches!(
            extract(r"\boxed{5 or six}", AnswerShape::Scalar),
            Extraction::ParseFailed { .. }
        ));
        assert!(matches!(
            extract(r"\boxed{3 apples}", AnswerShape::Scalar),
            Extraction::ParseFailed { .. }
        ));
    }

    #[test]
    fn connectives_and_brackets_are_skipped() {
        assert_eq!(
            extract(r"\boxed{( 1 , 3 ) or [ 5 ]}", AnswerShape::Sequence).into_answer(),
            Some(Answer::Sequence(ints(&[1, 3, 5])))
        );
        assert_eq!(
            extract(r"\boxed{4 \quad 2}", AnswerShape::Set).into_answer(),
            Some(Answer::Set(ints(&[2, 4])))
        );
    }

    #[test]
    fn unicode_minus_keeps_its_sign() {
        assert_eq!(
            extract("\\boxed{\u{2212}5}", AnswerShape::Scalar).into_answer(),
            Some(Answer::Scalar(Number::Int(-5)))
        );
        assert_eq!(
            extract("\\boxed{[3, \u{2212}1]}", AnswerShape::Sequence).into_answer(),
            Some(Answer::Sequence(ints(&[3, -1])))
        );
        assert_eq!(
            extract(r"\boxed{\minus2}", AnswerShape::Scalar).into_answer(),
            Some(Answer::Scalar(Number::Int(-2)))
        );
    }

    #[test]
    fn unrecognized_sign_glyph_fails_instead_of_dropping() {
        assert!(matches!(
            extract("\\boxed{\u{2014}5}", AnswerShape::Scalar),
            Extraction::ParseFailed { .. }
        ));
        assert!(matches!(
            extract(r"\boxed{\pm5}", AnswerShape::Scalar),
            Extraction::ParseFailed { .. }
        ));
    }

    #[test]
    fn relation_keywords() {
        assert_eq!(
            extract(r"\boxed{\text{Greater Than}}", AnswerShape::Relation).into_answer(),
            Some(Answer::Relation(Relation::GreaterThan))
        );
        assert_eq!(
            extract(r"\boxed{<}", AnswerShape::Relation).into_answer(),
            Some(Answer::Relation(Relation::LessThan))
        );
        assert!(matches!(
            extract(r"\boxed{maybe}", AnswerShape::Relation),
            Extraction::ParseFailed { .. }
        ));
        assert_eq!(
            extract("[greater than]", AnswerShape::Relation),
            Extraction::NoRegion
        );
    }
}

use crate::backend::Completion;
use crate::error::GenerationError;
use crate::extract::{extract, AnswerShape};
use crate::types::{Answer, Judgment, Number, Relation};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

pub const FLOAT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValueRange {
    pub min: i64,
    pub max: i64,
}

impl ValueRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// Number of distinct integers in the inclusive range.
    pub fn width(&self) -> u128 {
        if self.max < self.min {
            return 0;
        }
        (self.max as i128 - self.min as i128 + 1) as u128
    }
}

impl Default for ValueRange {
    fn default() -> Self {
        Self {
            min: -100,
            max: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationParams {
    pub count: usize,
    pub range: ValueRange,
    pub list_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Inputs {
    List(Vec<i64>),
    Pair { a: i64, b: i64 },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Tolerance {
    Absolute(f64),
    /// Both sides rounded to this many decimals before comparing.
    Decimals(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expected {
    Integer { value: i128 },
    Real { value: f64, tolerance: Tolerance },
    Sequence { values: Vec<i64> },
    /// Order-independent; holds every value tied for the answer.
    Set { values: Vec<i64> },
    Relation { value: Relation },
}

impl Expected {
    pub fn shape(&self) -> AnswerShape {
        match self {
            Expected::Integer { .. } | Expected::Real { .. } => AnswerShape::Scalar,
            Expected::Sequence { .. } => AnswerShape::Sequence,
            Expected::Set { .. } => AnswerShape::Set,
            Expected::Relation { .. } => AnswerShape::Relation,
        }
    }

    pub fn matches(&self, answer: &Answer) -> bool {
        match (self, answer) {
            (Expected::Integer { value }, Answer::Scalar(number)) => {
                number.as_int() == Some(*value)
            }
            (Expected::Real { value, tolerance }, Answer::Scalar(number)) => {
                within(number.as_f64(), *value, *tolerance)
            }
            (Expected::Sequence { values }, Answer::Sequence(numbers)) => {
                same_integers(values, numbers)
            }
            (Expected::Set { values }, Answer::Set(numbers)) => {
                let mut expected = values.clone();
                expected.sort_unstable();
                expected.dedup();
                let mut actual = Vec::with_capacity(numbers.len());
                for number in numbers {
                    match number.as_int().and_then(|v| i64::try_from(v).ok()) {
                        Some(v) => actual.push(v),
                        None => return false,
                    }
                }
                actual.sort_unstable();
                actual.dedup();
                expected == actual
            }
            (Expected::Relation { value }, Answer::Relation(relation)) => value == relation,
            _ => false,
        }
    }

    /// The canonical `\boxed{}` rendering of this answer.
    pub fn boxed(&self) -> String {
        let inner = match self {
            Expected::Integer { value } => value.to_string(),
            Expected::Real { value, .. } => value.to_string(),
            Expected::Sequence { values } | Expected::Set { values } => join(values),
            Expected::Relation { value } => value.as_str().to_string(),
        };
        format!("\\boxed{{{inner}}}")
    }
}

fn within(actual: f64, expected: f64, tolerance: Tolerance) -> bool {
    match tolerance {
        Tolerance::Absolute(epsilon) => (actual - expected).abs() < epsilon,
        // exact halves go to even, so 1/8 at two decimals is 0.12
        Tolerance::Decimals(decimals) => {
            let scale = 10f64.powi(decimals as i32);
            (actual * scale).round_ties_even() == (expected * scale).round_ties_even()
        }
    }
}

fn same_integers(expected: &[i64], actual: &[Number]) -> bool {
    expected.len() == actual.len()
        && expected
            .iter()
            .zip(actual)
            .all(|(e, a)| a.as_int() == Some(*e as i128))
}

pub(crate) fn join(values: &[i64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Bracketed, comma-separated list literal, the way prompts show inputs.
pub(crate) fn list_literal(values: &[i64]) -> String {
    format!("[{}]", join(values))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProblemInstance {
    pub inputs: Inputs,
    pub expected: Expected,
}

impl ProblemInstance {
    pub fn list(values: Vec<i64>, expected: Expected) -> Self {
        Self {
            inputs: Inputs::List(values),
            expected,
        }
    }

    pub fn pair(a: i64, b: i64, expected: Expected) -> Self {
        Self {
            inputs: Inputs::Pair { a, b },
            expected,
        }
    }

    pub fn values(&self) -> Vec<i64> {
        match &self.inputs {
            Inputs::List(values) => values.clone(),
            Inputs::Pair { a, b } => vec![*a, *b],
        }
    }
}

pub trait Task: Send + Sync {
    fn name(&self) -> &'static str;

    fn shape(&self) -> AnswerShape;

    /// Whether the task is parameterized by list size.
    fn sized(&self) -> bool;

    /// Rejects configurations the generator cannot satisfy.
    fn validate(&self, params: &GenerationParams) -> Result<(), GenerationError> {
        validate_common(self.name(), self.sized(), params)
    }

    fn generate(
        &self,
        rng: &mut StdRng,
        params: &GenerationParams,
    ) -> Result<Vec<ProblemInstance>, GenerationError>;

    fn render(&self, instance: &ProblemInstance) -> String;

    fn judge(&self, instance: &ProblemInstance, completion: &Completion) -> Judgment {
        judge_completion(self.shape(), instance, completion)
    }
}

pub fn validate_common(
    task: &str,
    sized: bool,
    params: &GenerationParams,
) -> Result<(), GenerationError> {
    if params.count == 0 {
        return Err(GenerationError::ZeroCount);
    }
    if params.range.min >= params.range.max {
        return Err(GenerationError::InvalidRange {
            min: params.range.min,
            max: params.range.max,
        });
    }
    if sized {
        match params.list_size {
            None => {
                return Err(GenerationError::MissingListSize {
                    task: task.to_string(),
                })
            }
            Some(0) => {
                return Err(GenerationError::ListSizeTooSmall {
                    task: task.to_string(),
                    min: 1,
                    actual: 0,
                })
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Extra check for generators that draw distinct values.
pub fn validate_distinct(
    task: &str,
    params: &GenerationParams,
    list_size: usize,
) -> Result<(), GenerationError> {
    let available = params.range.width();
    if (list_size as u128) > available {
        return Err(GenerationError::RangeTooNarrow {
            task: task.to_string(),
            list_size,
            min: params.range.min,
            max: params.range.max,
            available,
        });
    }
    Ok(())
}

pub fn judge_completion(
    shape: AnswerShape,
    instance: &ProblemInstance,
    completion: &Completion,
) -> Judgment {
    let extraction = extract(&completion.text, shape);
    let instruction_followed = extraction.instruction_followed();
    let parse_failed = instruction_followed && extraction.answer().is_none();
    let answer = extraction.into_answer();
    let correct = answer
        .as_ref()
        .map(|answer| instance.expected.matches(answer))
        .unwrap_or(false);

    Judgment {
        answer,
        correct,
        instruction_followed,
        parse_failed,
        tokens: completion.tokens,
        chars: completion.text.chars().count() as u64,
        words: completion.text.split_whitespace().count() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(text: &str) -> Completion {
        Completion {
            text: text.to_string(),
            tokens: 3,
        }
    }

    #[test]
    fn integer_accepts_integral_float() {
        let expected = Expected::Integer { value: 15 };
        assert!(expected.matches(&Answer::Scalar(Number::Float(15.0))));
        assert!(!expected.matches(&Answer::Scalar(Number::Float(15.5))));
    }

    #[test]
    fn decimal_tolerance_rounds_both_sides() {
        let expected = Expected::Real {
            value: 10.0 / 3.0,
            tolerance: Tolerance::Decimals(2),
        };
        assert!(expected.matches(&Answer::Scalar(Number::Float(3.33))));
        assert!(!expected.matches(&Answer::Scalar(Number::Float(3.3))));
    }

    #[test]
    fn sequence_requires_exact_order() {
        let expected = Expected::Sequence {
            values: vec![1, 2, 3],
        };
        let ordered = Answer::Sequence(vec![Number::Int(1), Number::Int(2), Number::Int(3)]);
        let shuffled = Answer::Sequence(vec![Number::Int(2), Number::Int(1), Number::Int(3)]);
        assert!(expected.matches(&ordered));
        assert!(!expected.matches(&shuffled));
    }

    #[test]
    fn shape_mismatch_is_incorrect() {
        let expected = Expected::Integer { value: 1 };
        assert!(!expected.matches(&Answer::Sequence(vec![Number::Int(1)])));
    }

    #[test]
    fn judge_counts_chars_and_words() {
        let instance = ProblemInstance::list(vec![1, 2], Expected::Integer { value: 3 });
        let judgment = judge_completion(
            AnswerShape::Scalar,
            &instance,
            &completion("sum is \\boxed{3}"),
        );
        assert!(judgment.correct);
        assert!(judgment.instruction_followed);
        assert!(!judgment.parse_failed);
        assert_eq!(judgment.tokens, 3);
        assert_eq!(judgment.chars, 16);
        assert_eq!(judgment.words, 3);
    }

    #[test]
    fn judge_marks_parse_failure_as_followed_but_wrong() {
        let instance = ProblemInstance::list(vec![1, 2], Expected::Integer { value: 3 });
        let judgment = judge_completion(
            AnswerShape::Scalar,
            &instance,
            &completion("\\boxed{three}"),
        );
        assert!(!judgment.correct);
        assert!(judgment.instruction_followed);
        assert!(judgment.parse_failed);
        assert!(judgment.answer.is_none());
    }

    #[test]
    fn decimal_tolerance_rounds_exact_halves_to_even() {
        let eighth = Expected::Real {
            value: 0.125,
            tolerance: Tolerance::Decimals(2),
        };
        assert!(eighth.matches(&Answer::Scalar(Number::Float(0.12))));
        assert!(!eighth.matches(&Answer::Scalar(Number::Float(0.13))));
        assert!(within(-0.375, -0.38, Tolerance::Decimals(2)));
        assert!(within(2.0 / 3.0, 0.67, Tolerance::Decimals(2)));
    }

    #[test]
    fn range_width_is_inclusive() {
        assert_eq!(ValueRange::new(-2, 2).width(), 5);
        assert_eq!(ValueRange::new(3, 1).width(), 0);
    }
}

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Number {
    Int(i128),
    Float(f64),
}

impl Number {
    pub fn as_f64(&self) -> f64 {
        match self {
            Number::Int(value) => *value as f64,
            Number::Float(value) => *value,
        }
    }

    /// Integral view of the number; floats qualify only when they carry no
    /// fractional part and fit the integer range.
    pub fn as_int(&self) -> Option<i128> {
        match self {
            Number::Int(value) => Some(*value),
            Number::Float(value) => {
                if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e36 {
                    Some(*value as i128)
                } else {
                    None
                }
            }
        }
    }
}

impl Display for Number {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Number::Int(value) => write!(f, "{value}"),
            Number::Float(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    GreaterThan,
    LessThan,
    EqualTo,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::GreaterThan => "greater than",
            Relation::LessThan => "less than",
            Relation::EqualTo => "equal to",
        }
    }
}

/// A value recovered from model output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "shape", content = "value", rename_all = "snake_case")]
pub enum Answer {
    Scalar(Number),
    Sequence(Vec<Number>),
    Set(Vec<Number>),
    Relation(Relation),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Judgment {
    pub answer: Option<Answer>,
    pub correct: bool,
    pub instruction_followed: bool,
    pub parse_failed: bool,
    pub tokens: u64,
    pub chars: u64,
    pub words: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FoldSummary {
    pub task: String,
    pub list_size: Option<usize>,
    pub fold: usize,
    pub seed: u64,
    pub samples: usize,
    pub parse_failures: usize,
    pub accuracy: f64,
    pub instruction_followed: f64,
    pub tokens: f64,
    pub chars: f64,
    pub words: f64,
}

impl FoldSummary {
    /// Share of samples whose answer region was found but did not parse.
    pub fn parse_failure_rate(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.parse_failures as f64 / self.samples as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Stat {
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskMetric {
    pub task: String,
    pub list_size: Option<usize>,
    pub folds: usize,
    pub accuracy: Stat,
    pub instruction_followed: Stat,
    pub parse_failed: Stat,
    pub tokens: Stat,
    pub chars: Stat,
    pub words: Stat,
}

impl TaskMetric {
    /// Report key, `sorting_8` for sized tasks and the bare task name otherwise.
    pub fn label(&self) -> String {
        config_label(&self.task, self.list_size)
    }
}

pub fn config_label(task: &str, list_size: Option<usize>) -> String {
    match list_size {
        Some(size) => format!("{task}_{size}"),
        None => task.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EfficiencyRecord {
    pub rank: usize,
    pub label: String,
    pub task: String,
    pub list_size: Option<usize>,
    pub accuracy: f64,
    pub tokens: f64,
    pub normalized_tokens: f64,
    pub token_efficiency: f64,
    pub efficiency_score: f64,
    #[serde(with = "unbounded")]
    pub overthinking_ratio: f64,
}

/// JSON has no infinity literal; non-finite ratios travel as strings.
pub mod unbounded {
    use super::*;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("nan")
        } else if value.is_sign_positive() {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(f64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => match text.as_str() {
                "inf" | "Infinity" => Ok(f64::INFINITY),
                "-inf" | "-Infinity" => Ok(f64::NEG_INFINITY),
                "nan" | "NaN" => Ok(f64::NAN),
                other => Err(serde::de::Error::custom(format!(
                    "invalid ratio literal: {other}"
                ))),
            },
        }
    }
}

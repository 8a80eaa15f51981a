//! Statistic tasks: inputs are drawn with replacement, so duplicates are
//! expected and the mode generator plants them on purpose.

use super::{required_list_size, sample_with_replacement};
use crate::error::GenerationError;
use crate::extract::AnswerShape;
use crate::task::{
    list_literal, validate_common, Expected, GenerationParams, ProblemInstance, Task, Tolerance,
    FLOAT_TOLERANCE,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

/// Exact integer median when it exists, otherwise a real with tolerance.
pub fn median_of(values: &[i64]) -> Expected {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let len = sorted.len();
    if len == 0 {
        return Expected::Integer { value: 0 };
    }
    if len % 2 == 1 {
        return Expected::Integer {
            value: sorted[len / 2] as i128,
        };
    }
    let sum = sorted[len / 2 - 1] as i128 + sorted[len / 2] as i128;
    if sum % 2 == 0 {
        Expected::Integer { value: sum / 2 }
    } else {
        Expected::Real {
            value: sum as f64 / 2.0,
            tolerance: Tolerance::Absolute(FLOAT_TOLERANCE),
        }
    }
}

/// Every value tied for the highest frequency, ascending.
pub fn modes_of(values: &[i64]) -> Vec<i64> {
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for value in values {
        *counts.entry(*value).or_default() += 1;
    }
    let highest = counts.values().copied().max().unwrap_or(0);
    counts
        .into_iter()
        .filter(|(_, count)| *count == highest)
        .map(|(value, _)| value)
        .collect()
}

fn generate_sampled<F>(
    task: &str,
    rng: &mut StdRng,
    params: &GenerationParams,
    expected: F,
) -> Result<Vec<ProblemInstance>, GenerationError>
where
    F: Fn(&[i64]) -> Expected,
{
    let list_size = required_list_size(task, params)?;
    Ok((0..params.count)
        .map(|_| {
            let values = sample_with_replacement(rng, &params.range, list_size);
            let answer = expected(&values);
            ProblemInstance::list(values, answer)
        })
        .collect())
}

pub struct MeanTask;

impl Task for MeanTask {
    fn name(&self) -> &'static str {
        "mean"
    }

    fn shape(&self) -> AnswerShape {
        AnswerShape::Scalar
    }

    fn sized(&self) -> bool {
        true
    }

    fn generate(
        &self,
        rng: &mut StdRng,
        params: &GenerationParams,
    ) -> Result<Vec<ProblemInstance>, GenerationError> {
        self.validate(params)?;
        generate_sampled(self.name(), rng, params, |values| {
            let sum: i128 = values.iter().map(|v| *v as i128).sum();
            Expected::Real {
                value: sum as f64 / values.len() as f64,
                tolerance: Tolerance::Absolute(FLOAT_TOLERANCE),
            }
        })
    }

    fn render(&self, instance: &ProblemInstance) -> String {
        format!(
            "Calculate the mean (average) of the following list of numbers:\n{}\n\n\
             The mean is the sum of all numbers divided by the count of numbers. \
             Calculate the exact mean value. Your final answer must be in the format \
             \\boxed{{mean value}} at the end.",
            list_literal(&instance.values())
        )
    }
}

pub struct MedianTask;

impl Task for MedianTask {
    fn name(&self) -> &'static str {
        "median"
    }

    fn shape(&self) -> AnswerShape {
        AnswerShape::Scalar
    }

    fn sized(&self) -> bool {
        true
    }

    fn generate(
        &self,
        rng: &mut StdRng,
        params: &GenerationParams,
    ) -> Result<Vec<ProblemInstance>, GenerationError> {
        self.validate(params)?;
        generate_sampled(self.name(), rng, params, median_of)
    }

    fn render(&self, instance: &ProblemInstance) -> String {
        format!(
            "Find the median value of the following list of numbers:\n{}\n\n\
             The median is the middle value when the list is sorted. If there is an even number of elements, \
             the median is the average of the two middle values. Your final answer must be in the format \
             \\boxed{{median value}} at the end.",
            list_literal(&instance.values())
        )
    }
}

pub struct ModeTask;

impl Task for ModeTask {
    fn name(&self) -> &'static str {
        "mode"
    }

    fn shape(&self) -> AnswerShape {
        AnswerShape::Set
    }

    fn sized(&self) -> bool {
        true
    }

    fn validate(&self, params: &GenerationParams) -> Result<(), GenerationError> {
        validate_common(self.name(), true, params)?;
        let list_size = required_list_size(self.name(), params)?;
        if list_size < 2 {
            return Err(GenerationError::ListSizeTooSmall {
                task: self.name().to_string(),
                min: 2,
                actual: list_size,
            });
        }
        Ok(())
    }

    fn generate(
        &self,
        rng: &mut StdRng,
        params: &GenerationParams,
    ) -> Result<Vec<ProblemInstance>, GenerationError> {
        self.validate(params)?;
        let list_size = required_list_size(self.name(), params)?;
        let range = params.range;
        Ok((0..params.count)
            .map(|_| {
                let repeats = rng.gen_range(2..=list_size.min(4));
                let mut values = sample_with_replacement(rng, &range, list_size - repeats);
                let planted = rng.gen_range(range.min..=range.max);
                values.extend(std::iter::repeat(planted).take(repeats));
                values.shuffle(rng);
                let modes = modes_of(&values);
                ProblemInstance::list(values, Expected::Set { values: modes })
            })
            .collect())
    }

    fn render(&self, instance: &ProblemInstance) -> String {
        format!(
            "Find the mode(s) of the following list of numbers:\n{}\n\n\
             The mode is the value that appears most frequently. If multiple values appear with the same \
             highest frequency, return all of them. Your final answer must be in the format \
             \\boxed{{mode(s)}} at the end. If there are multiple modes, list them separated by commas.",
            list_literal(&instance.values())
        )
    }
}

use super::sample_distinct;
use crate::error::GenerationError;
use crate::extract::AnswerShape;
use crate::task::{
    list_literal, validate_common, validate_distinct, Expected, GenerationParams, Inputs,
    ProblemInstance, Task, Tolerance, FLOAT_TOLERANCE,
};
use crate::types::Relation;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

fn pair_of(instance: &ProblemInstance) -> (i64, i64) {
    match instance.inputs {
        Inputs::Pair { a, b } => (a, b),
        Inputs::List(ref values) => (
            values.first().copied().unwrap_or_default(),
            values.get(1).copied().unwrap_or_default(),
        ),
    }
}

pub struct ComparisonTask;

impl ComparisonTask {
    fn relation(a: i64, b: i64) -> Relation {
        match a.cmp(&b) {
            std::cmp::Ordering::Greater => Relation::GreaterThan,
            std::cmp::Ordering::Less => Relation::LessThan,
            std::cmp::Ordering::Equal => Relation::EqualTo,
        }
    }
}

impl Task for ComparisonTask {
    fn name(&self) -> &'static str {
        "comparison"
    }

    fn shape(&self) -> AnswerShape {
        AnswerShape::Relation
    }

    fn sized(&self) -> bool {
        false
    }

    fn generate(
        &self,
        rng: &mut StdRng,
        params: &GenerationParams,
    ) -> Result<Vec<ProblemInstance>, GenerationError> {
        self.validate(params)?;
        let (min, max) = (params.range.min, params.range.max);
        let per_relation = params.count / 3;
        let remainder = params.count % 3;
        let greater = per_relation + usize::from(remainder > 0);
        let less = per_relation + usize::from(remainder > 1);

        let mut pairs = Vec::with_capacity(params.count);
        for _ in 0..greater {
            let a = rng.gen_range(min + 1..=max);
            let b = rng.gen_range(min..a);
            pairs.push((a, b));
        }
        for _ in 0..less {
            let a = rng.gen_range(min..max);
            let b = rng.gen_range(a + 1..=max);
            pairs.push((a, b));
        }
        for _ in 0..per_relation {
            let a = rng.gen_range(min..=max);
            pairs.push((a, a));
        }
        pairs.shuffle(rng);

        Ok(pairs
            .into_iter()
            .map(|(a, b)| {
                ProblemInstance::pair(
                    a,
                    b,
                    Expected::Relation {
                        value: Self::relation(a, b),
                    },
                )
            })
            .collect())
    }

    fn render(&self, instance: &ProblemInstance) -> String {
        let (a, b) = pair_of(instance);
        format!(
            "Compare the following two numbers and determine their relationship:\n\n\
             Number 1: {a}\n\
             Number 2: {b}\n\n\
             Is Number 1 greater than, less than, or equal to Number 2? \
             Your final answer must be in the format \\boxed{{relation}} at the end, \
             where 'relation' is one of: 'greater than', 'less than', or 'equal to'."
        )
    }
}

/// Expected answer is `b - a`: the prompt asks to subtract `a` from `b`.
pub struct SubtractionTask;

impl Task for SubtractionTask {
    fn name(&self) -> &'static str {
        "subtraction"
    }

    fn shape(&self) -> AnswerShape {
        AnswerShape::Scalar
    }

    fn sized(&self) -> bool {
        false
    }

    fn generate(
        &self,
        rng: &mut StdRng,
        params: &GenerationParams,
    ) -> Result<Vec<ProblemInstance>, GenerationError> {
        self.validate(params)?;
        let range = params.range;
        Ok((0..params.count)
            .map(|_| {
                let a = rng.gen_range(range.min..=range.max);
                let b = rng.gen_range(range.min..=range.max);
                ProblemInstance::pair(
                    a,
                    b,
                    Expected::Integer {
                        value: b as i128 - a as i128,
                    },
                )
            })
            .collect())
    }

    fn render(&self, instance: &ProblemInstance) -> String {
        let (a, b) = pair_of(instance);
        format!(
            "Can you subtract {a} from {b} and provide your final answer \
             in \\boxed{{answer}} format at the end of your response."
        )
    }
}

pub struct DivisionTask;

impl Task for DivisionTask {
    fn name(&self) -> &'static str {
        "division"
    }

    fn shape(&self) -> AnswerShape {
        AnswerShape::Scalar
    }

    fn sized(&self) -> bool {
        false
    }

    fn generate(
        &self,
        rng: &mut StdRng,
        params: &GenerationParams,
    ) -> Result<Vec<ProblemInstance>, GenerationError> {
        self.validate(params)?;
        let range = params.range;
        Ok((0..params.count)
            .map(|_| {
                let numerator = rng.gen_range(range.min..=range.max);
                // min < max guarantees a nonzero value exists
                let mut denominator = rng.gen_range(range.min..=range.max);
                while denominator == 0 {
                    denominator = rng.gen_range(range.min..=range.max);
                }
                ProblemInstance::pair(
                    numerator,
                    denominator,
                    Expected::Real {
                        value: numerator as f64 / denominator as f64,
                        tolerance: Tolerance::Decimals(2),
                    },
                )
            })
            .collect())
    }

    fn render(&self, instance: &ProblemInstance) -> String {
        let (a, b) = pair_of(instance);
        format!(
            "Divide {a} by {b}.\n\n\
             Provide the answer as a floating point number. \
             Your final answer must be in the format \\boxed{{answer}} at the end."
        )
    }
}

pub struct AbsoluteDifferenceTask;

impl Task for AbsoluteDifferenceTask {
    fn name(&self) -> &'static str {
        "absolute_difference"
    }

    fn shape(&self) -> AnswerShape {
        AnswerShape::Scalar
    }

    fn sized(&self) -> bool {
        false
    }

    fn validate(&self, params: &GenerationParams) -> Result<(), GenerationError> {
        validate_common(self.name(), false, params)?;
        validate_distinct(self.name(), params, 2)
    }

    fn generate(
        &self,
        rng: &mut StdRng,
        params: &GenerationParams,
    ) -> Result<Vec<ProblemInstance>, GenerationError> {
        self.validate(params)?;
        Ok((0..params.count)
            .map(|_| {
                let drawn = sample_distinct(rng, &params.range, 2);
                let (a, b) = (drawn[0], drawn[1]);
                ProblemInstance::pair(
                    a,
                    b,
                    Expected::Real {
                        value: (b as f64 - a as f64).abs(),
                        tolerance: Tolerance::Absolute(FLOAT_TOLERANCE),
                    },
                )
            })
            .collect())
    }

    fn render(&self, instance: &ProblemInstance) -> String {
        let (a, b) = pair_of(instance);
        format!(
            "Find the absolute difference between the following list of numbers: \n{}\n\n\
             Provide the result. Your final answer must be in the format \\boxed{{answer}} at the end.",
            list_literal(&[a, b])
        )
    }
}

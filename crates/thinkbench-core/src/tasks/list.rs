use super::{required_list_size, sample_distinct};
use crate::error::GenerationError;
use crate::extract::AnswerShape;
use crate::task::{
    list_literal, validate_common, validate_distinct, Expected, GenerationParams,
    ProblemInstance, Task,
};
use rand::rngs::StdRng;

/// Common validation for list tasks that draw distinct values.
fn validate_distinct_list(task: &str, params: &GenerationParams) -> Result<usize, GenerationError> {
    validate_common(task, true, params)?;
    let list_size = required_list_size(task, params)?;
    validate_distinct(task, params, list_size)?;
    Ok(list_size)
}

fn generate_lists<F>(
    task: &str,
    rng: &mut StdRng,
    params: &GenerationParams,
    expected: F,
) -> Result<Vec<ProblemInstance>, GenerationError>
where
    F: Fn(&[i64]) -> Result<Expected, GenerationError>,
{
    let list_size = validate_distinct_list(task, params)?;
    (0..params.count)
        .map(|_| {
            let values = sample_distinct(rng, &params.range, list_size);
            let answer = expected(&values)?;
            Ok(ProblemInstance::list(values, answer))
        })
        .collect()
}

fn instance_list(instance: &ProblemInstance) -> String {
    list_literal(&instance.values())
}

pub struct SortingTask;

impl Task for SortingTask {
    fn name(&self) -> &'static str {
        "sorting"
    }

    fn shape(&self) -> AnswerShape {
        AnswerShape::Sequence
    }

    fn sized(&self) -> bool {
        true
    }

    fn validate(&self, params: &GenerationParams) -> Result<(), GenerationError> {
        validate_distinct_list(self.name(), params).map(|_| ())
    }

    fn generate(
        &self,
        rng: &mut StdRng,
        params: &GenerationParams,
    ) -> Result<Vec<ProblemInstance>, GenerationError> {
        generate_lists(self.name(), rng, params, |values| {
            let mut sorted = values.to_vec();
            sorted.sort_unstable();
            Ok(Expected::Sequence { values: sorted })
        })
    }

    fn render(&self, instance: &ProblemInstance) -> String {
        format!(
            "Sort the following list of numbers in ascending order:\n{}\n\n\
             Provide the sorted list. Your final answer must be in the format \
             \\boxed{{sorted list}} at the end.",
            instance_list(instance)
        )
    }
}

pub struct SumTask;

impl Task for SumTask {
    fn name(&self) -> &'static str {
        "sum"
    }

    fn shape(&self) -> AnswerShape {
        AnswerShape::Scalar
    }

    fn sized(&self) -> bool {
        true
    }

    fn validate(&self, params: &GenerationParams) -> Result<(), GenerationError> {
        validate_distinct_list(self.name(), params).map(|_| ())
    }

    fn generate(
        &self,
        rng: &mut StdRng,
        params: &GenerationParams,
    ) -> Result<Vec<ProblemInstance>, GenerationError> {
        generate_lists(self.name(), rng, params, |values| {
            Ok(Expected::Integer {
                value: values.iter().map(|v| *v as i128).sum(),
            })
        })
    }

    fn render(&self, instance: &ProblemInstance) -> String {
        format!(
            "Add the following list of numbers:\n{}\n\n\
             Provide the sum. Your final answer must be in the format \
             \\boxed{{answer}} at the end.",
            instance_list(instance)
        )
    }
}

pub struct MultiplicationTask;

impl MultiplicationTask {
    fn product(values: &[i64]) -> Option<i128> {
        values
            .iter()
            .try_fold(1i128, |acc, value| acc.checked_mul(*value as i128))
    }
}

impl Task for MultiplicationTask {
    fn name(&self) -> &'static str {
        "multiplication"
    }

    fn shape(&self) -> AnswerShape {
        AnswerShape::Scalar
    }

    fn sized(&self) -> bool {
        true
    }

    fn validate(&self, params: &GenerationParams) -> Result<(), GenerationError> {
        let list_size = validate_distinct_list(self.name(), params)?;
        let largest = (params.range.min as i128)
            .abs()
            .max((params.range.max as i128).abs());
        let exponent = u32::try_from(list_size).unwrap_or(u32::MAX);
        if largest.checked_pow(exponent).is_none() {
            return Err(GenerationError::Overflow {
                task: self.name().to_string(),
                list_size,
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
        let task = self.name();
        generate_lists(task, rng, params, |values| {
            Self::product(values)
                .map(|value| Expected::Integer { value })
                .ok_or_else(|| GenerationError::Overflow {
                    task: task.to_string(),
                    list_size: values.len(),
                })
        })
    }

    fn render(&self, instance: &ProblemInstance) -> String {
        format!(
            "Multiply the following list of numbers:\n{}\n\n\
             Provide the product. Your final answer must be in the format \
             \\boxed{{answer}} at the end.",
            instance_list(instance)
        )
    }
}

pub struct FindMaximumTask;

impl Task for FindMaximumTask {
    fn name(&self) -> &'static str {
        "find_maximum"
    }

    fn shape(&self) -> AnswerShape {
        AnswerShape::Scalar
    }

    fn sized(&self) -> bool {
        true
    }

    fn validate(&self, params: &GenerationParams) -> Result<(), GenerationError> {
        validate_distinct_list(self.name(), params).map(|_| ())
    }

    fn generate(
        &self,
        rng: &mut StdRng,
        params: &GenerationParams,
    ) -> Result<Vec<ProblemInstance>, GenerationError> {
        generate_lists(self.name(), rng, params, |values| {
            Ok(Expected::Integer {
                value: values.iter().copied().max().unwrap_or_default() as i128,
            })
        })
    }

    fn render(&self, instance: &ProblemInstance) -> String {
        format!(
            "Find the maximum number from the given list of numbers. List = {}.\n\n\
             Your final answer must be in the format \\boxed{{maximum}} at the end of your response.",
            instance_list(instance)
        )
    }
}

pub struct FindMinimumTask;

impl Task for FindMinimumTask {
    fn name(&self) -> &'static str {
        "find_minimum"
    }

    fn shape(&self) -> AnswerShape {
        AnswerShape::Scalar
    }

    fn sized(&self) -> bool {
        true
    }

    fn validate(&self, params: &GenerationParams) -> Result<(), GenerationError> {
        validate_distinct_list(self.name(), params).map(|_| ())
    }

    fn generate(
        &self,
        rng: &mut StdRng,
        params: &GenerationParams,
    ) -> Result<Vec<ProblemInstance>, GenerationError> {
        generate_lists(self.name(), rng, params, |values| {
            Ok(Expected::Integer {
                value: values.iter().copied().min().unwrap_or_default() as i128,
            })
        })
    }

    fn render(&self, instance: &ProblemInstance) -> String {
        format!(
            "Find the minimum number from the given list of numbers. List = {}.\n\n\
             Your final answer must be in the format \\boxed{{minimum}} at the end of your response.",
            instance_list(instance)
        )
    }
}

pub struct OddCountTask;

impl Task for OddCountTask {
    fn name(&self) -> &'static str {
        "odd_count"
    }

    fn shape(&self) -> AnswerShape {
        AnswerShape::Scalar
    }

    fn sized(&self) -> bool {
        true
    }

    fn validate(&self, params: &GenerationParams) -> Result<(), GenerationError> {
        validate_distinct_list(self.name(), params).map(|_| ())
    }

    fn generate(
        &self,
        rng: &mut StdRng,
        params: &GenerationParams,
    ) -> Result<Vec<ProblemInstance>, GenerationError> {
        generate_lists(self.name(), rng, params, |values| {
            Ok(Expected::Integer {
                value: values.iter().filter(|v| *v % 2 != 0).count() as i128,
            })
        })
    }

    fn render(&self, instance: &ProblemInstance) -> String {
        format!(
            "Count the odd numbers from the following list of numbers:\n{}\n\n\
             Provide the final count of odd numbers. Your final answer must be in the format \
             \\boxed{{answer}} at the end.",
            instance_list(instance)
        )
    }
}

pub struct EvenCountTask;

impl Task for EvenCountTask {
    fn name(&self) -> &'static str {
        "even_count"
    }

    fn shape(&self) -> AnswerShape {
        AnswerShape::Scalar
    }

    fn sized(&self) -> bool {
        true
    }

    fn validate(&self, params: &GenerationParams) -> Result<(), GenerationError> {
        validate_distinct_list(self.name(), params).map(|_| ())
    }

    fn generate(
        &self,
        rng: &mut StdRng,
        params: &GenerationParams,
    ) -> Result<Vec<ProblemInstance>, GenerationError> {
        generate_lists(self.name(), rng, params, |values| {
            Ok(Expected::Integer {
                value: values.iter().filter(|v| *v % 2 == 0).count() as i128,
            })
        })
    }

    fn render(&self, instance: &ProblemInstance) -> String {
        format!(
            "Count the even numbers from the following list of numbers:\n{}\n\n\
             Provide the final count of even numbers. Your final answer must be in the format \
             \\boxed{{answer}} at the end.",
            instance_list(instance)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Completion;
    use crate::task::ValueRange;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn params(count: usize, min: i64, max: i64, list_size: usize) -> GenerationParams {
        GenerationParams {
            count,
            range: ValueRange::new(min, max),
            list_size: Some(list_size),
        }
    }

    fn reply(text: &str) -> Completion {
        Completion {
            text: text.to_string(),
            tokens: 10,
        }
    }

    #[test]
    fn sorting_instances_use_distinct_values() {
        let mut rng = StdRng::seed_from_u64(3);
        let instances = SortingTask
            .generate(&mut rng, &params(20, -100, 100, 8))
            .expect("generate");
        assert_eq!(instances.len(), 20);
        for instance in &instances {
            let values = instance.values();
            assert_eq!(values.len(), 8);
            let unique: HashSet<i64> = values.iter().copied().collect();
            assert_eq!(unique.len(), 8);
        }
    }

    #[test]
    fn sorting_judges_boxed_sorted_list() {
        let instance = ProblemInstance::list(
            vec![3, -1, 2],
            Expected::Sequence {
                values: vec![-1, 2, 3],
            },
        );
        let judgment = SortingTask.judge(&instance, &reply("Sorted: \\boxed{[-1, 2, 3]}"));
        assert!(judgment.correct);
        let wrong = SortingTask.judge(&instance, &reply("\\boxed{[3, 2, -1]}"));
        assert!(!wrong.correct);
        assert!(wrong.instruction_followed);
    }

    #[test]
    fn narrow_range_is_rejected_before_generation() {
        let err = SumTask
            .validate(&params(5, 1, 3, 8))
            .expect_err("range too narrow");
        assert!(matches!(
            err,
            GenerationError::RangeTooNarrow { available: 3, .. }
        ));
    }

    #[test]
    fn missing_list_size_is_rejected() {
        let params = GenerationParams {
            count: 1,
            range: ValueRange::default(),
            list_size: None,
        };
        assert!(matches!(
            FindMaximumTask.validate(&params),
            Err(GenerationError::MissingListSize { .. })
        ));
    }

    #[test]
    fn multiplication_rejects_overflowing_products() {
        let err = MultiplicationTask
            .validate(&params(1, -1_000_000, 1_000_000, 16))
            .expect_err("overflow");
        assert!(matches!(err, GenerationError::Overflow { list_size: 16, .. }));
        assert!(MultiplicationTask
            .validate(&params(1, -100, 100, 16))
            .is_ok());
    }

    #[test]
    fn multiplication_expected_is_product() {
        let mut rng = StdRng::seed_from_u64(5);
        let instances = MultiplicationTask
            .generate(&mut rng, &params(4, -10, 10, 3))
            .expect("generate");
        for instance in instances {
            let product: i128 = instance.values().iter().map(|v| *v as i128).product();
            assert_eq!(instance.expected, Expected::Integer { value: product });
        }
    }

    #[test]
    fn odd_and_even_counts_handle_negatives() {
        let mut rng = StdRng::seed_from_u64(9);
        let odd = OddCountTask
            .generate(&mut rng, &params(10, -50, 50, 6))
            .expect("generate");
        for instance in odd {
            let count = instance.values().iter().filter(|v| v.rem_euclid(2) == 1).count();
            assert_eq!(instance.expected, Expected::Integer { value: count as i128 });
        }
    }

    #[test]
    fn prompts_embed_list_literal() {
        let instance = ProblemInstance::list(vec![4, -2], Expected::Integer { value: 4 });
        let prompt = FindMaximumTask.render(&instance);
        assert!(prompt.contains("List = [4, -2]."));
        assert!(prompt.contains("\\boxed{maximum}"));
    }

    #[test]
    fn same_seed_same_instances() {
        let a = SumTask
            .generate(&mut StdRng::seed_from_u64(42), &params(5, -100, 100, 8))
            .expect("generate");
        let b = SumTask
            .generate(&mut StdRng::seed_from_u64(42), &params(5, -100, 100, 8))
            .expect("generate");
        assert_eq!(a, b);
    }
}

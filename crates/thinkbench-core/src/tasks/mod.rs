//! Built-in task variants.

pub mod list;
pub mod pair;
pub mod stats;

pub use list::{
    EvenCountTask, FindMaximumTask, FindMinimumTask, MultiplicationTask, OddCountTask,
    SortingTask, SumTask,
};
pub use pair::{AbsoluteDifferenceTask, ComparisonTask, DivisionTask, SubtractionTask};
pub use stats::{median_of, modes_of, MeanTask, MedianTask, ModeTask};

use crate::error::GenerationError;
use crate::task::{GenerationParams, Task, ValueRange};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;

pub fn builtin() -> Vec<Arc<dyn Task>> {
    vec![
        Arc::new(SortingTask),
        Arc::new(ComparisonTask),
        Arc::new(SumTask),
        Arc::new(SubtractionTask),
        Arc::new(MultiplicationTask),
        Arc::new(DivisionTask),
        Arc::new(FindMaximumTask),
        Arc::new(FindMinimumTask),
        Arc::new(OddCountTask),
        Arc::new(EvenCountTask),
        Arc::new(MeanTask),
        Arc::new(MedianTask),
        Arc::new(ModeTask),
        Arc::new(AbsoluteDifferenceTask),
    ]
}

pub(crate) fn required_list_size(
    task: &str,
    params: &GenerationParams,
) -> Result<usize, GenerationError> {
    params
        .list_size
        .ok_or_else(|| GenerationError::MissingListSize {
            task: task.to_string(),
        })
}

/// `amount` distinct values from the inclusive range, in random order.
/// Callers validate that the range is wide enough.
pub(crate) fn sample_distinct(rng: &mut StdRng, range: &ValueRange, amount: usize) -> Vec<i64> {
    let width = range.width();
    if width <= 4 * amount as u128 {
        return index::sample(rng, width as usize, amount)
            .into_iter()
            .map(|offset| range.min + offset as i64)
            .collect();
    }

    let mut seen = HashSet::with_capacity(amount);
    let mut values = Vec::with_capacity(amount);
    while values.len() < amount {
        let value = rng.gen_range(range.min..=range.max);
        if seen.insert(value) {
            values.push(value);
        }
    }
    values
}

pub(crate) fn sample_with_replacement(
    rng: &mut StdRng,
    range: &ValueRange,
    amount: usize,
) -> Vec<i64> {
    (0..amount)
        .map(|_| rng.gen_range(range.min..=range.max))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn builtin_names_are_unique() {
        let tasks = builtin();
        let names: HashSet<&str> = tasks.iter().map(|task| task.name()).collect();
        assert_eq!(names.len(), 14);
    }

    #[test]
    fn distinct_sampling_covers_dense_ranges() {
        let mut rng = StdRng::seed_from_u64(7);
        let range = ValueRange::new(1, 5);
        let mut values = sample_distinct(&mut rng, &range, 5);
        values.sort_unstable();
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn distinct_sampling_on_sparse_ranges_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(11);
        let range = ValueRange::new(-1000, 1000);
        let values = sample_distinct(&mut rng, &range, 20);
        let unique: HashSet<i64> = values.iter().copied().collect();
        assert_eq!(unique.len(), 20);
        assert!(values.iter().all(|v| (-1000..=1000).contains(v)));
    }
}

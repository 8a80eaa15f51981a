use crate::error::EngineError;
use crate::types::{config_label, FoldSummary, Stat, TaskMetric};

impl Stat {
    /// Mean and population standard deviation of fold means.
    pub fn from_values(values: &[f64]) -> Stat {
        if values.is_empty() {
            return Stat::default();
        }
        let count = values.len() as f64;
        let mean = values.iter().sum::<f64>() / count;
        // identical values must give exactly zero, not rounding residue
        if values.len() == 1 || values.iter().all(|v| *v == values[0]) {
            return Stat { mean, std: 0.0 };
        }
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
        Stat {
            mean,
            std: variance.sqrt(),
        }
    }
}

/// Combines repeated folds of one configuration into a `TaskMetric`.
///
/// All summaries are expected to share task and list size; the first one
/// names the result.
pub fn aggregate(folds: &[FoldSummary]) -> Result<TaskMetric, EngineError> {
    let first = folds.first().ok_or_else(|| EngineError::EmptyAggregate {
        configuration: "<none>".to_string(),
    })?;
    let stat = |field: fn(&FoldSummary) -> f64| {
        let values: Vec<f64> = folds.iter().map(field).collect();
        Stat::from_values(&values)
    };

    tracing::debug!(
        config = %config_label(&first.task, first.list_size),
        folds = folds.len(),
        "aggregating folds"
    );
    Ok(TaskMetric {
        task: first.task.clone(),
        list_size: first.list_size,
        folds: folds.len(),
        accuracy: stat(|f| f.accuracy),
        instruction_followed: stat(|f| f.instruction_followed),
        parse_failed: stat(FoldSummary::parse_failure_rate),
        tokens: stat(|f| f.tokens),
        chars: stat(|f| f.chars),
        words: stat(|f| f.words),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(index: usize, accuracy: f64, tokens: f64) -> FoldSummary {
        FoldSummary {
            task: "sum".to_string(),
            list_size: Some(8),
            fold: index,
            seed: index as u64,
            samples: 10,
            parse_failures: 0,
            accuracy,
            instruction_followed: 1.0,
            tokens,
            chars: 40.0,
            words: 8.0,
        }
    }

    #[test]
    fn single_fold_has_zero_std() {
        let metric = aggregate(&[fold(0, 0.7, 120.0)]).expect("aggregate");
        assert_eq!(metric.accuracy, Stat { mean: 0.7, std: 0.0 });
        assert_eq!(metric.folds, 1);
        assert_eq!(metric.label(), "sum_8");
    }

    #[test]
    fn identical_folds_have_exactly_zero_std() {
        let folds: Vec<_> = (0..3).map(|i| fold(i, 0.1, 33.3)).collect();
        let metric = aggregate(&folds).expect("aggregate");
        assert_eq!(metric.accuracy.std, 0.0);
        assert_eq!(metric.tokens.std, 0.0);
    }

    #[test]
    fn std_is_population_std_of_fold_means() {
        let metric = aggregate(&[fold(0, 0.5, 100.0), fold(1, 1.0, 200.0)]).expect("aggregate");
        assert!((metric.accuracy.mean - 0.75).abs() < 1e-12);
        assert!((metric.accuracy.std - 0.25).abs() < 1e-12);
        assert!((metric.tokens.std - 50.0).abs() < 1e-9);
        assert_eq!(metric.instruction_followed.std, 0.0);
    }

    #[test]
    fn parse_failures_become_a_per_fold_rate() {
        let mut clean = fold(0, 0.5, 100.0);
        clean.parse_failures = 0;
        let mut noisy = fold(1, 0.5, 100.0);
        noisy.parse_failures = 4;
        let metric = aggregate(&[clean, noisy]).expect("aggregate");
        assert!((metric.parse_failed.mean - 0.2).abs() < 1e-12);
        assert!((metric.parse_failed.std - 0.2).abs() < 1e-12);
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(
            aggregate(&[]),
            Err(EngineError::EmptyAggregate { .. })
        ));
    }
}

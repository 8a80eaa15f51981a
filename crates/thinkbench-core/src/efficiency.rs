use crate::types::{EfficiencyRecord, TaskMetric};

/// Scores one ranking group. Token normalization uses the group's own
/// min/max, so records are only comparable within the group.
///
/// Ranks are left at 0; the report assigns them.
pub fn score_group(metrics: &[TaskMetric]) -> Vec<EfficiencyRecord> {
    let tokens: Vec<f64> = metrics.iter().map(|m| m.tokens.mean).collect();
    let min_tokens = tokens.iter().copied().fold(f64::INFINITY, f64::min);
    let max_tokens = tokens.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let spread = max_tokens - min_tokens;

    metrics
        .iter()
        .map(|metric| {
            let accuracy = metric.accuracy.mean;
            let used = metric.tokens.mean;
            let normalized_tokens = if spread > 0.0 {
                (used - min_tokens) / spread
            } else {
                0.0
            };
            let token_efficiency = 1.0 - normalized_tokens;
            EfficiencyRecord {
                rank: 0,
                label: metric.label(),
                task: metric.task.clone(),
                list_size: metric.list_size,
                accuracy,
                tokens: used,
                normalized_tokens,
                token_efficiency,
                efficiency_score: harmonic_mean(accuracy, token_efficiency),
                overthinking_ratio: overthinking_ratio(used, min_tokens, accuracy),
            }
        })
        .collect()
}

pub fn harmonic_mean(accuracy: f64, token_efficiency: f64) -> f64 {
    let sum = accuracy + token_efficiency;
    if sum == 0.0 {
        0.0
    } else {
        2.0 * accuracy * token_efficiency / sum
    }
}

/// Extra tokens over the group baseline per unit of accuracy; unbounded at
/// zero accuracy.
pub fn overthinking_ratio(tokens: f64, baseline: f64, accuracy: f64) -> f64 {
    if accuracy == 0.0 {
        f64::INFINITY
    } else {
        (tokens - baseline) / accuracy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Stat;

    fn metric(task: &str, accuracy: f64, tokens: f64) -> TaskMetric {
        let stat = |mean| Stat { mean, std: 0.0 };
        TaskMetric {
            task: task.to_string(),
            list_size: None,
            folds: 1,
            accuracy: stat(accuracy),
            instruction_followed: stat(1.0),
            parse_failed: stat(0.0),
            tokens: stat(tokens),
            chars: stat(0.0),
            words: stat(0.0),
        }
    }

    #[test]
    fn extremes_of_token_usage() {
        let records = score_group(&[metric("a", 1.0, 100.0), metric("b", 1.0, 200.0)]);
        assert_eq!(records[0].normalized_tokens, 0.0);
        assert_eq!(records[1].normalized_tokens, 1.0);
        assert_eq!(records[0].token_efficiency, 1.0);
        assert_eq!(records[1].token_efficiency, 0.0);
        assert_eq!(records[0].efficiency_score, 1.0);
        assert_eq!(records[1].efficiency_score, 0.0);
        assert_eq!(records[0].overthinking_ratio, 0.0);
        assert_eq!(records[1].overthinking_ratio, 100.0);
    }

    #[test]
    fn zero_accuracy_is_unbounded_overthinking() {
        let records = score_group(&[metric("a", 0.0, 50.0), metric("b", 0.5, 80.0)]);
        assert!(records[0].overthinking_ratio.is_infinite());
        assert!(records[0].overthinking_ratio > 0.0);
        assert!(records[1].overthinking_ratio.is_finite());
        assert!((records[1].overthinking_ratio - 60.0).abs() < 1e-9);
    }

    #[test]
    fn equal_tokens_normalize_to_zero() {
        let records = score_group(&[metric("a", 0.5, 70.0), metric("b", 0.25, 70.0)]);
        assert!(records.iter().all(|r| r.normalized_tokens == 0.0));
        assert!((records[0].efficiency_score - 2.0 * 0.5 / 1.5).abs() < 1e-12);
    }

    #[test]
    fn single_member_group_has_full_token_efficiency() {
        let records = score_group(&[metric("solo", 0.8, 300.0)]);
        assert_eq!(records[0].token_efficiency, 1.0);
        assert_eq!(records[0].overthinking_ratio, 0.0);
    }

    #[test]
    fn score_is_zero_when_both_terms_vanish() {
        assert_eq!(harmonic_mean(0.0, 0.0), 0.0);
        let records = score_group(&[metric("a", 0.0, 10.0), metric("b", 0.0, 20.0)]);
        assert_eq!(records[1].efficiency_score, 0.0);
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let records = score_group(&[
            metric("a", 0.3, 12.0),
            metric("b", 0.9, 480.0),
            metric("c", 0.6, 95.0),
        ]);
        for record in records {
            assert!((0.0..=1.0).contains(&record.efficiency_score));
        }
    }
}

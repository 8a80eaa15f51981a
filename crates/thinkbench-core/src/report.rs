//! Terminal, serializable state of a run plus its text renderings.

use crate::efficiency::score_group;
use crate::plan::RunConfig;
use crate::types::{unbounded, EfficiencyRecord, Stat, TaskMetric};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const REPORT_SCHEMA_VERSION: &str = "0.1";

/// One task configuration: cross-fold statistics joined with its efficiency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportEntry {
    pub label: String,
    pub task: String,
    pub list_size: Option<usize>,
    pub folds: usize,
    pub accuracy: Stat,
    pub instruction_followed: Stat,
    pub parse_failed: Stat,
    pub tokens: Stat,
    pub chars: Stat,
    pub words: Stat,
    pub normalized_tokens: f64,
    pub token_efficiency: f64,
    pub efficiency_score: f64,
    #[serde(with = "unbounded")]
    pub overthinking_ratio: f64,
}

impl ReportEntry {
    fn new(metric: TaskMetric, record: &EfficiencyRecord) -> Self {
        Self {
            label: metric.label(),
            task: metric.task,
            list_size: metric.list_size,
            folds: metric.folds,
            accuracy: metric.accuracy,
            instruction_followed: metric.instruction_followed,
            parse_failed: metric.parse_failed,
            tokens: metric.tokens,
            chars: metric.chars,
            words: metric.words,
            normalized_tokens: record.normalized_tokens,
            token_efficiency: record.token_efficiency,
            efficiency_score: record.efficiency_score,
            overthinking_ratio: record.overthinking_ratio,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Methodology {
    pub ranking_group: String,
    pub normalized_tokens: String,
    pub token_efficiency: String,
    pub efficiency_score: String,
    pub overthinking_ratio: String,
    pub parse_failed: String,
    pub std: String,
}

impl Default for Methodology {
    fn default() -> Self {
        Self {
            ranking_group: "all entries of this report".to_string(),
            normalized_tokens: "(tokens - min) / (max - min) over the group; 0 when max == min"
                .to_string(),
            token_efficiency: "1 - normalized_tokens".to_string(),
            efficiency_score:
                "2 * accuracy * token_efficiency / (accuracy + token_efficiency); 0 when the sum is 0"
                    .to_string(),
            overthinking_ratio: "(tokens - group minimum tokens) / accuracy; inf when accuracy is 0"
                .to_string(),
            parse_failed:
                "share of samples with an answer region that did not parse; counted as wrong"
                    .to_string(),
            std: "population standard deviation of fold means; 0 for a single fold".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub schema_version: String,
    pub model: String,
    pub generated_at: String,
    /// Set when the run was interrupted; only completed configurations appear.
    pub partial: bool,
    pub config: RunConfig,
    pub entries: Vec<ReportEntry>,
    pub rankings: Vec<EfficiencyRecord>,
    pub methodology: Methodology,
}

impl Report {
    /// Scores `metrics` as one ranking group and ranks the result.
    pub fn assemble(
        model: impl Into<String>,
        generated_at: impl Into<String>,
        config: RunConfig,
        metrics: Vec<TaskMetric>,
        partial: bool,
    ) -> Self {
        let records = score_group(&metrics);
        let entries = metrics
            .into_iter()
            .zip(&records)
            .map(|(metric, record)| ReportEntry::new(metric, record))
            .collect();

        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            model: model.into(),
            generated_at: generated_at.into(),
            partial,
            config,
            entries,
            rankings: rank(records),
            methodology: Methodology::default(),
        }
    }

    pub fn entry(&self, label: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|entry| entry.label == label)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Plain-text grid, one row per entry in run order.
    pub fn render_table(&self) -> String {
        let headers = [
            "task",
            "accuracy",
            "instruction_followed",
            "parse_failed",
            "tokens",
            "chars",
            "words",
            "efficiency",
            "overthinking",
        ];
        let rows: Vec<Vec<String>> = self
            .entries
            .iter()
            .map(|entry| {
                vec![
                    entry.label.clone(),
                    format_stat(&entry.accuracy, 4),
                    format_stat(&entry.instruction_followed, 4),
                    format_stat(&entry.parse_failed, 4),
                    format_stat(&entry.tokens, 1),
                    format_stat(&entry.chars, 1),
                    format_stat(&entry.words, 1),
                    format!("{:.4}", entry.efficiency_score),
                    format_ratio(entry.overthinking_ratio),
                ]
            })
            .collect();

        let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let separator = widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .collect::<Vec<_>>()
            .join("+");
        let separator = format!("+{separator}+\n");
        let line = |cells: Vec<String>| {
            let padded: Vec<String> = cells
                .iter()
                .zip(&widths)
                .map(|(cell, width)| format!(" {cell:<width$} "))
                .collect();
            format!("|{}|\n", padded.join("|"))
        };

        let mut out = String::new();
        out.push_str(&format!("model: {}\n", self.model));
        if self.partial {
            out.push_str("partial: run was interrupted\n");
        }
        out.push_str(&separator);
        out.push_str(&line(headers.iter().map(|h| h.to_string()).collect()));
        out.push_str(&separator);
        for row in rows {
            out.push_str(&line(row));
        }
        out.push_str(&separator);
        out
    }

    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str(&format!("# Evaluation Report: {}\n\n", self.model));
        md.push_str(&format!("**Generated**: {}\n\n", self.generated_at));
        md.push_str(&format!(
            "**Datapoints**: {} x {} folds, range [{}, {}], seed {}\n\n",
            self.config.datapoints,
            self.config.folds,
            self.config.range.min,
            self.config.range.max,
            self.config.seed
        ));
        if self.partial {
            md.push_str("> Partial report: the run was interrupted.\n\n");
        }

        md.push_str("## Results\n\n");
        md.push_str(
            "| Task | Accuracy | Instruction followed | Parse failed | Tokens | Chars | Words |\n",
        );
        md.push_str(
            "|------|----------|----------------------|--------------|--------|-------|-------|\n",
        );
        for entry in &self.entries {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} | {} |\n",
                entry.label,
                format_stat(&entry.accuracy, 4),
                format_stat(&entry.instruction_followed, 4),
                format_stat(&entry.parse_failed, 4),
                format_stat(&entry.tokens, 1),
                format_stat(&entry.chars, 1),
                format_stat(&entry.words, 1),
            ));
        }

        md.push_str("\n## Efficiency Ranking\n\n");
        md.push_str("| Rank | Task | Accuracy | Tokens | Token efficiency | Efficiency score | Overthinking ratio |\n");
        md.push_str("|------|------|----------|--------|------------------|------------------|--------------------|\n");
        for record in &self.rankings {
            md.push_str(&format!(
                "| {} | {} | {:.4} | {:.1} | {:.4} | {:.4} | {} |\n",
                record.rank,
                record.label,
                record.accuracy,
                record.tokens,
                record.token_efficiency,
                record.efficiency_score,
                format_ratio(record.overthinking_ratio),
            ));
        }

        md.push_str("\n## Methodology\n\n");
        let m = &self.methodology;
        md.push_str(&format!("- Ranking group: {}\n", m.ranking_group));
        md.push_str(&format!("- Normalized tokens: {}\n", m.normalized_tokens));
        md.push_str(&format!("- Token efficiency: {}\n", m.token_efficiency));
        md.push_str(&format!("- Efficiency score: {}\n", m.efficiency_score));
        md.push_str(&format!("- Overthinking ratio: {}\n", m.overthinking_ratio));
        md.push_str(&format!("- Parse failed: {}\n", m.parse_failed));
        md.push_str(&format!("- Std: {}\n", m.std));
        md
    }
}

/// Descending efficiency, then descending accuracy, then ascending tokens.
/// The sort is stable, so full ties keep run order.
fn rank(mut records: Vec<EfficiencyRecord>) -> Vec<EfficiencyRecord> {
    records.sort_by(|a, b| {
        descending(a.efficiency_score, b.efficiency_score)
            .then_with(|| descending(a.accuracy, b.accuracy))
            .then_with(|| a.tokens.partial_cmp(&b.tokens).unwrap_or(Ordering::Equal))
    });
    for (index, record) in records.iter_mut().enumerate() {
        record.rank = index + 1;
    }
    records
}

fn descending(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

fn format_stat(stat: &Stat, precision: usize) -> String {
    format!("{:.precision$} ± {:.precision$}", stat.mean, stat.std)
}

fn format_ratio(ratio: f64) -> String {
    if ratio.is_infinite() {
        "inf".to_string()
    } else {
        format!("{ratio:.2}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SamplingConfig;
    use crate::task::ValueRange;

    fn config() -> RunConfig {
        RunConfig {
            tasks: vec!["sum".to_string(), "sorting".to_string()],
            datapoints: 10,
            folds: 2,
            range: ValueRange::default(),
            list_sizes: vec![8],
            seed: 7,
            store_details: false,
            sampling: SamplingConfig::default(),
        }
    }

    fn metric(task: &str, accuracy: f64, tokens: f64) -> TaskMetric {
        let stat = |mean| Stat { mean, std: 0.0 };
        TaskMetric {
            task: task.to_string(),
            list_size: Some(8),
            folds: 2,
            accuracy: stat(accuracy),
            instruction_followed: stat(1.0),
            parse_failed: stat(0.0),
            tokens: stat(tokens),
            chars: stat(tokens * 4.0),
            words: stat(tokens / 2.0),
        }
    }

    fn sample() -> Report {
        Report::assemble(
            "test-model",
            "2026-01-01T00:00:00Z",
            config(),
            vec![
                metric("sum", 0.0, 40.0),
                metric("sorting", 1.0, 100.0),
                metric("mean", 1.0, 100.0),
                metric("median", 0.5, 60.0),
            ],
            false,
        )
    }

    #[test]
    fn ranking_orders_by_score_then_accuracy_then_tokens() {
        let report = sample();
        let labels: Vec<&str> = report.rankings.iter().map(|r| r.label.as_str()).collect();
        // sum has token efficiency 1 but accuracy 0, so it scores 0 and ranks last
        assert_eq!(labels, vec!["median_8", "sorting_8", "mean_8", "sum_8"]);
        let ranks: Vec<usize> = report.rankings.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
    }

    #[test]
    fn entries_keep_run_order() {
        let report = sample();
        assert_eq!(report.entries[0].label, "sum_8");
        assert!(report.entry("sum_8").expect("entry").overthinking_ratio.is_infinite());
    }

    #[test]
    fn json_round_trip_keeps_rankings_and_infinity() {
        let report = sample();
        let json = report.to_json().expect("json");
        assert!(json.contains("\"overthinking_ratio\": \"inf\""));
        let back = Report::from_json(&json).expect("parse");
        let order = |r: &Report| {
            r.rankings
                .iter()
                .map(|rec| (rec.rank, rec.label.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(order(&back), order(&report));
        assert_eq!(back.entries.len(), report.entries.len());
        assert!(back.entries[0].overthinking_ratio.is_infinite());
        for (a, b) in back.rankings.iter().zip(&report.rankings) {
            assert!((a.efficiency_score - b.efficiency_score).abs() < 1e-12);
        }
    }

    #[test]
    fn table_lists_every_entry() {
        let table = sample().render_table();
        assert!(table.starts_with("model: test-model\n"));
        assert!(table.contains("| sorting_8 "));
        assert!(table.contains("1.0000 ± 0.0000"));
        assert!(table.contains(" inf "));
    }

    #[test]
    fn markdown_flags_partial_runs() {
        let mut report = sample();
        assert!(!report.to_markdown().contains("Partial report"));
        report.partial = true;
        let md = report.to_markdown();
        assert!(md.contains("Partial report"));
        assert!(md.contains("## Efficiency Ranking"));
        assert!(md.contains("| 1 | median_8 |"));
    }
}

mod backends;
mod config;
mod interrupt;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use config::{RunArgs, Settings};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use thinkbench_core::{
    write_atomic, AnswerShape, CancelToken, DirSink, EngineError, EvaluationPlan, FoldOutcome,
    FoldSink, Report, TaskRegistry,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "thinkbench")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, value_enum, default_value = "json", global = true)]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate a model and write the report to the output directory.
    Run(RunArgs),
    /// List registered tasks.
    Tasks,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

impl OutputFormat {
    fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Text => "text",
        }
    }
}

#[derive(Serialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum RunStatus {
    Complete,
    Interrupted,
}

#[derive(Serialize)]
struct RunSummary {
    schema_version: String,
    tool: ToolInfo,
    invocation: Invocation,
    inputs: Vec<InputInfo>,
    status: RunStatus,
    exit_code: i32,
    started_at: String,
    finished_at: String,
    duration_ms: u64,
    output_dir: String,
    report: String,
    configurations: usize,
    folds_planned: usize,
    folds_completed: usize,
}

#[derive(Serialize)]
struct ToolInfo {
    name: String,
    version: String,
    git_sha: String,
}

#[derive(Serialize)]
struct Invocation {
    command: String,
    model: String,
    backend: String,
    tasks: Vec<String>,
    format: String,
    seed: u64,
    jobs: usize,
}

#[derive(Serialize)]
struct InputInfo {
    path: String,
    sha256: String,
}

#[derive(Serialize)]
struct TaskInfo {
    name: &'static str,
    shape: AnswerShape,
    sized: bool,
}

fn main() {
    let cli = Cli::parse();
    init_tracing();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("tool error: {err:#}");
            2
        }
    };
    std::process::exit(exit_code);
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("thinkbench=info,thinkbench_core=info,warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<i32> {
    match &cli.command {
        Command::Tasks => list_tasks(cli.format),
        Command::Run(args) => run_evaluation(args, cli.format),
    }
}

fn list_tasks(format: OutputFormat) -> Result<i32> {
    let registry = TaskRegistry::builtin();
    let mut tasks = Vec::with_capacity(registry.len());
    for name in registry.names() {
        let task = registry.get(name)?;
        tasks.push(TaskInfo {
            name: task.name(),
            shape: task.shape(),
            sized: task.sized(),
        });
    }
    match format {
        OutputFormat::Json => {
            let payload = serde_json::to_string_pretty(&tasks).context("serialize task list")?;
            println!("{payload}");
        }
        OutputFormat::Text => {
            for task in tasks {
                let sizing = if task.sized { "sized" } else { "fixed" };
                println!("{:<20} {:<8} {}", task.name, shape_label(task.shape), sizing);
            }
        }
    }
    Ok(0)
}

fn shape_label(shape: AnswerShape) -> &'static str {
    match shape {
        AnswerShape::Scalar => "scalar",
        AnswerShape::Sequence => "sequence",
        AnswerShape::Set => "set",
        AnswerShape::Relation => "relation",
    }
}

/// Counts completed folds for `--max-folds` and forwards them to disk.
struct BudgetSink {
    inner: DirSink,
    completed: AtomicUsize,
    limit: Option<usize>,
    cancel: CancelToken,
}

impl FoldSink for BudgetSink {
    fn fold_completed(&self, label: &str, outcome: &FoldOutcome) -> Result<(), EngineError> {
        self.inner.fold_completed(label, outcome)?;
        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if self.limit.is_some_and(|limit| done >= limit) && !self.cancel.is_cancelled() {
            tracing::info!(completed = done, "fold budget reached");
            self.cancel.cancel();
        }
        Ok(())
    }
}

fn run_evaluation(args: &RunArgs, format: OutputFormat) -> Result<i32> {
    let started_at = Utc::now();
    let timer = Instant::now();

    let registry = TaskRegistry::builtin();
    let settings = Settings::resolve(args, &registry)?;
    let plan = EvaluationPlan::new(settings.run.clone(), &registry)?;
    let inputs = build_inputs(&[settings.config_path.clone(), settings.responses.clone()])?;

    fs::create_dir_all(&settings.output_dir)
        .with_context(|| format!("create {}", settings.output_dir.display()))?;
    let backends = backends::build_backends(&settings)?;
    let cancel = CancelToken::new();
    interrupt::install(cancel.clone())?;
    let sink = BudgetSink {
        inner: DirSink::create(&settings.output_dir)
            .with_context(|| format!("create {}", settings.output_dir.display()))?,
        completed: AtomicUsize::new(0),
        limit: settings.max_folds,
        cancel: cancel.clone(),
    };

    tracing::info!(
        model = %settings.model,
        backend = settings.backend.as_str(),
        seed = settings.run.seed,
        output_dir = %settings.output_dir.display(),
        "evaluation configured"
    );
    let outcome = plan.run(&backends, &cancel, &sink)?;

    let finished_at = Utc::now();
    let report = Report::assemble(
        settings.model.clone(),
        finished_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        plan.config().clone(),
        outcome.metrics,
        outcome.interrupted,
    );
    let report_path = write_outputs(&settings.output_dir, &report)?;

    let (status, exit_code) = if outcome.interrupted {
        (RunStatus::Interrupted, 1)
    } else {
        (RunStatus::Complete, 0)
    };
    let summary = RunSummary {
        schema_version: "0.1".to_string(),
        tool: ToolInfo {
            name: "thinkbench".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            git_sha: std::env::var("THINKBENCH_GIT_SHA").unwrap_or_else(|_| "UNKNOWN".to_string()),
        },
        invocation: Invocation {
            command: "run".to_string(),
            model: settings.model.clone(),
            backend: settings.backend.as_str().to_string(),
            tasks: settings.run.tasks.clone(),
            format: format.as_str().to_string(),
            seed: settings.run.seed,
            jobs: settings.jobs,
        },
        inputs,
        status,
        exit_code,
        started_at: started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        finished_at: finished_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        duration_ms: timer.elapsed().as_millis() as u64,
        output_dir: settings.output_dir.to_string_lossy().to_string(),
        report: report_path.to_string_lossy().to_string(),
        configurations: plan.configurations().len(),
        folds_planned: plan.fold_count(),
        folds_completed: outcome.folds.len(),
    };

    match format {
        OutputFormat::Json => {
            let payload = serde_json::to_string_pretty(&summary).context("serialize run summary")?;
            println!("{payload}");
        }
        OutputFormat::Text => {
            print!("{}", report.render_table());
            println!(
                "status={} exit_code={} output_dir={}",
                status_label(status),
                exit_code,
                summary.output_dir
            );
        }
    }
    Ok(exit_code)
}

/// Writes report.json, results_table.txt and report.md; returns the JSON path.
fn write_outputs(dir: &Path, report: &Report) -> Result<PathBuf> {
    let json = report.to_json().context("serialize report")?;
    let report_path = dir.join("report.json");
    let files = [
        (report_path.clone(), json),
        (dir.join("results_table.txt"), report.render_table()),
        (dir.join("report.md"), report.to_markdown()),
    ];
    for (path, contents) in files {
        write_atomic(&path, contents.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
    }
    Ok(report_path)
}

fn build_inputs(paths: &[Option<PathBuf>]) -> Result<Vec<InputInfo>> {
    paths
        .iter()
        .flatten()
        .map(|path| {
            Ok(InputInfo {
                path: path.to_string_lossy().to_string(),
                sha256: compute_sha256(path)?,
            })
        })
        .collect()
}

fn compute_sha256(path: &Path) -> Result<String> {
    let data = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Complete => "complete",
        RunStatus::Interrupted => "interrupted",
    }
}

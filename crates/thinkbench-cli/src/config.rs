//! Run settings: command-line flags layered over an optional YAML file,
//! layered over the built-in defaults.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, ValueEnum};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thinkbench_core::seed::entropy_seed;
use thinkbench_core::{RunConfig, SamplingConfig, TaskRegistry, ValueRange};

pub const DEFAULT_DATAPOINTS: usize = 1000;
pub const DEFAULT_FOLDS: usize = 1;
pub const DEFAULT_LIST_SIZE: usize = 8;
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000/v1";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// OpenAI-compatible chat completions endpoint.
    Openai,
    /// Recorded completions from a JSONL file.
    Replay,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Openai => "openai",
            BackendKind::Replay => "replay",
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// YAML file with run settings; flags override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub model: Option<String>,

    /// Task names; defaults to every registered task.
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub tasks: Option<Vec<String>>,

    #[arg(long)]
    pub datapoints: Option<usize>,

    #[arg(long)]
    pub folds: Option<usize>,

    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], allow_negative_numbers = true)]
    pub range: Option<Vec<i64>>,

    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub list_sizes: Option<Vec<usize>>,

    /// Keep per-instance prompts, responses and judgments under details/.
    #[arg(long)]
    pub store_details: bool,

    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Parallel folds, each with its own backend instance.
    #[arg(long)]
    pub jobs: Option<usize>,

    /// Stop after this many completed folds and write a partial report.
    #[arg(long)]
    pub max_folds: Option<usize>,

    #[arg(long)]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub top_p: Option<f32>,

    #[arg(long)]
    pub max_tokens: Option<u32>,

    #[arg(long)]
    pub device: Option<String>,

    #[arg(long)]
    pub tensor_parallel_size: Option<usize>,

    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Base URL of the OpenAI-compatible API, up to and including `/v1`.
    #[arg(long)]
    pub endpoint: Option<String>,

    /// JSONL file of recorded completions for the replay backend.
    #[arg(long)]
    pub responses: Option<PathBuf>,

    #[arg(long)]
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub model: Option<String>,
    pub tasks: Option<Vec<String>>,
    pub datapoints: Option<usize>,
    pub folds: Option<usize>,
    pub range: Option<RangeConfig>,
    pub list_sizes: Option<Vec<usize>>,
    pub store_details: Option<bool>,
    pub output_dir: Option<PathBuf>,
    pub seed: Option<u64>,
    pub jobs: Option<usize>,
    pub max_folds: Option<usize>,
    pub backend: Option<BackendKind>,
    pub endpoint: Option<String>,
    pub responses: Option<PathBuf>,
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub sampling: SamplingFile,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeConfig {
    pub min: i64,
    pub max: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamplingFile {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub device: Option<String>,
    pub tensor_parallel_size: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parse config {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub model: String,
    pub backend: BackendKind,
    pub endpoint: String,
    pub responses: Option<PathBuf>,
    pub api_key: Option<String>,
    pub output_dir: PathBuf,
    pub jobs: usize,
    pub max_folds: Option<usize>,
    pub request_timeout: Duration,
    pub config_path: Option<PathBuf>,
    pub run: RunConfig,
}

impl Settings {
    pub fn resolve(args: &RunArgs, registry: &TaskRegistry) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(args, file, registry, api_key_from_env())
    }

    pub fn merge(
        args: &RunArgs,
        file: FileConfig,
        registry: &TaskRegistry,
        api_key: Option<String>,
    ) -> Result<Self> {
        let responses = args.responses.clone().or(file.responses);
        let backend = match args.backend.or(file.backend) {
            Some(kind) => kind,
            None if responses.is_some() => BackendKind::Replay,
            None => BackendKind::Openai,
        };
        if backend == BackendKind::Replay && responses.is_none() {
            bail!("the replay backend needs --responses");
        }

        let model = match args.model.clone().or(file.model) {
            Some(model) => model,
            None if backend == BackendKind::Replay => "replay".to_string(),
            None => bail!("--model is required for the openai backend"),
        };

        let range = match (&args.range, file.range) {
            (Some(values), _) => match values.as_slice() {
                [min, max] => ValueRange::new(*min, *max),
                _ => bail!("--range takes exactly two values"),
            },
            (None, Some(range)) => ValueRange::new(range.min, range.max),
            (None, None) => ValueRange::default(),
        };

        let tasks = args
            .tasks
            .clone()
            .or(file.tasks)
            .unwrap_or_else(|| registry.names().iter().map(|n| n.to_string()).collect());

        let defaults = SamplingConfig::default();
        let sampling = SamplingConfig {
            temperature: args
                .temperature
                .or(file.sampling.temperature)
                .unwrap_or(defaults.temperature),
            top_p: args.top_p.or(file.sampling.top_p).unwrap_or(defaults.top_p),
            max_tokens: args
                .max_tokens
                .or(file.sampling.max_tokens)
                .unwrap_or(defaults.max_tokens),
            device: args.device.clone().or(file.sampling.device),
            tensor_parallel_size: args
                .tensor_parallel_size
                .or(file.sampling.tensor_parallel_size)
                .unwrap_or(defaults.tensor_parallel_size),
        };

        let jobs = args.jobs.or(file.jobs).unwrap_or(1);
        if jobs == 0 {
            bail!("--jobs must be >= 1");
        }
        let max_folds = args.max_folds.or(file.max_folds);
        if max_folds == Some(0) {
            bail!("--max-folds must be >= 1");
        }

        let output_dir = args
            .output_dir
            .clone()
            .or(file.output_dir)
            .unwrap_or_else(|| default_output_dir(&model));

        Ok(Self {
            backend,
            endpoint: args
                .endpoint
                .clone()
                .or(file.endpoint)
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            responses,
            api_key,
            output_dir,
            jobs,
            max_folds,
            request_timeout: Duration::from_secs(
                args.request_timeout_secs
                    .or(file.request_timeout_secs)
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            config_path: args.config.clone(),
            run: RunConfig {
                tasks,
                datapoints: args
                    .datapoints
                    .or(file.datapoints)
                    .unwrap_or(DEFAULT_DATAPOINTS),
                folds: args.folds.or(file.folds).unwrap_or(DEFAULT_FOLDS),
                range,
                list_sizes: args
                    .list_sizes
                    .clone()
                    .or(file.list_sizes)
                    .unwrap_or_else(|| vec![DEFAULT_LIST_SIZE]),
                seed: args.seed.or(file.seed).unwrap_or_else(entropy_seed),
                store_details: args.store_details || file.store_details.unwrap_or(false),
                sampling,
            },
            model,
        })
    }
}

fn api_key_from_env() -> Option<String> {
    ["THINKBENCH_API_KEY", "OPENAI_API_KEY"]
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|value| !value.is_empty()))
}

/// `<model>_eval_<timestamp>`, keeping only the last path segment of the model.
fn default_output_dir(model: &str) -> PathBuf {
    let short = model.rsplit('/').next().unwrap_or(model);
    PathBuf::from(format!(
        "{short}_eval_{}",
        Utc::now().format("%Y%m%d_%H%M%S")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TaskRegistry {
        TaskRegistry::builtin()
    }

    fn replay_args() -> RunArgs {
        RunArgs {
            responses: Some(PathBuf::from("responses.jsonl")),
            ..RunArgs::default()
        }
    }

    #[test]
    fn defaults_apply_without_flags_or_file() {
        let settings =
            Settings::merge(&replay_args(), FileConfig::default(), &registry(), None).expect("merge");
        assert_eq!(settings.backend, BackendKind::Replay);
        assert_eq!(settings.run.datapoints, 1000);
        assert_eq!(settings.run.folds, 1);
        assert_eq!(settings.run.range, ValueRange::new(-100, 100));
        assert_eq!(settings.run.list_sizes, vec![8]);
        assert_eq!(settings.run.tasks.len(), 14);
        assert_eq!(settings.run.sampling, SamplingConfig::default());
        assert_eq!(settings.jobs, 1);
    }

    #[test]
    fn flags_override_file_values() {
        let file: FileConfig = serde_yaml::from_str(
            "model: org/base-7b\ndatapoints: 50\nfolds: 3\nrange: {min: 0, max: 9}\nsampling:\n  temperature: 0.2\n",
        )
        .expect("yaml");
        let mut args = replay_args();
        args.folds = Some(5);
        args.temperature = Some(0.0);
        let settings = Settings::merge(&args, file, &registry(), None).expect("merge");
        assert_eq!(settings.model, "org/base-7b");
        assert_eq!(settings.run.datapoints, 50);
        assert_eq!(settings.run.folds, 5);
        assert_eq!(settings.run.range, ValueRange::new(0, 9));
        assert_eq!(settings.run.sampling.temperature, 0.0);
        assert!(settings
            .output_dir
            .to_string_lossy()
            .starts_with("base-7b_eval_"));
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        assert!(serde_yaml::from_str::<FileConfig>("modle: x\n").is_err());
    }

    #[test]
    fn openai_backend_needs_a_model() {
        let err = Settings::merge(&RunArgs::default(), FileConfig::default(), &registry(), None)
            .expect_err("model required");
        assert!(err.to_string().contains("--model"));
    }

    #[test]
    fn replay_backend_needs_responses() {
        let args = RunArgs {
            backend: Some(BackendKind::Replay),
            ..RunArgs::default()
        };
        assert!(Settings::merge(&args, FileConfig::default(), &registry(), None).is_err());
    }
}

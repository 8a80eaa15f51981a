use crate::aggregate::aggregate;
use crate::backend::{InferenceBackend, SamplingConfig};
use crate::cancel::CancelToken;
use crate::error::{EngineError, GenerationError};
use crate::fold::{FoldOutcome, FoldRunner, FoldSpec, FoldStatus};
use crate::registry::TaskRegistry;
use crate::seed::fold_seed;
use crate::task::{GenerationParams, Task, ValueRange};
use crate::types::{config_label, FoldSummary, TaskMetric};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Everything that determines a run's results; recorded in the report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    pub tasks: Vec<String>,
    pub datapoints: usize,
    pub folds: usize,
    pub range: ValueRange,
    pub list_sizes: Vec<usize>,
    pub seed: u64,
    pub store_details: bool,
    pub sampling: SamplingConfig,
}

/// Receives every completed fold as soon as it finishes.
pub trait FoldSink: Send + Sync {
    fn fold_completed(&self, label: &str, outcome: &FoldOutcome) -> Result<(), EngineError>;
}

pub struct NullSink;

impl FoldSink for NullSink {
    fn fold_completed(&self, _label: &str, _outcome: &FoldOutcome) -> Result<(), EngineError> {
        Ok(())
    }
}

/// One task at one list size.
#[derive(Clone)]
pub struct Configuration {
    pub label: String,
    pub task: Arc<dyn Task>,
    pub params: GenerationParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    /// Configurations with at least one completed fold, in plan order.
    pub metrics: Vec<TaskMetric>,
    pub folds: Vec<FoldSummary>,
    pub interrupted: bool,
}

pub struct EvaluationPlan {
    config: RunConfig,
    configurations: Vec<Configuration>,
}

impl EvaluationPlan {
    /// Resolves task names and validates every configuration. Nothing here
    /// touches a backend, so invalid runs fail before any inference.
    pub fn new(config: RunConfig, registry: &TaskRegistry) -> Result<Self, EngineError> {
        let mut configurations = Vec::new();
        for name in &config.tasks {
            let task = registry.get(name)?;
            let sizes: Vec<Option<usize>> = if task.sized() {
                config.list_sizes.iter().copied().map(Some).collect()
            } else {
                vec![None]
            };
            if sizes.is_empty() {
                return Err(EngineError::Generation {
                    configuration: name.clone(),
                    source: GenerationError::MissingListSize { task: name.clone() },
                });
            }

            for list_size in sizes {
                let label = config_label(task.name(), list_size);
                let params = GenerationParams {
                    count: config.datapoints,
                    range: config.range,
                    list_size,
                };
                let invalid = |source| EngineError::Generation {
                    configuration: label.clone(),
                    source,
                };
                if config.folds == 0 {
                    return Err(invalid(GenerationError::ZeroFolds));
                }
                task.validate(&params).map_err(invalid)?;
                configurations.push(Configuration {
                    label,
                    task: Arc::clone(&task),
                    params,
                });
            }
        }
        Ok(Self {
            config,
            configurations,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn configurations(&self) -> &[Configuration] {
        &self.configurations
    }

    pub fn fold_count(&self) -> usize {
        self.configurations.len() * self.config.folds
    }

    /// Runs every fold. One backend runs folds sequentially; several run
    /// them on a pool with one worker per backend.
    pub fn run(
        &self,
        backends: &[Box<dyn InferenceBackend>],
        cancel: &CancelToken,
        sink: &dyn FoldSink,
    ) -> Result<PlanOutcome, EngineError> {
        if backends.is_empty() {
            return Err(EngineError::NoBackend);
        }
        let jobs: Vec<(usize, usize)> = (0..self.configurations.len())
            .flat_map(|config| (0..self.config.folds).map(move |fold| (config, fold)))
            .collect();
        tracing::info!(
            configurations = self.configurations.len(),
            folds = jobs.len(),
            workers = backends.len(),
            "starting evaluation"
        );

        let mut results = Vec::with_capacity(jobs.len());
        if backends.len() == 1 {
            for (index, (config, fold)) in jobs.iter().copied().enumerate() {
                let status = self.run_fold(backends[0].as_ref(), cancel, sink, config, fold)?;
                let stop = matches!(status, FoldStatus::Cancelled);
                results.push((index, config, status));
                if stop {
                    break;
                }
            }
        } else {
            let halt = CancelToken::new();
            let pool = ThreadPoolBuilder::new()
                .num_threads(backends.len())
                .build()?;
            let mut collected: Vec<(usize, usize, Result<FoldStatus, EngineError>)> =
                pool.install(|| {
                    jobs.par_iter()
                        .enumerate()
                        .map(|(index, &(config, fold))| {
                            if halt.is_cancelled() {
                                return (index, config, Ok(FoldStatus::Cancelled));
                            }
                            let worker = rayon::current_thread_index().unwrap_or(0);
                            let backend = backends[worker % backends.len()].as_ref();
                            let status = self.run_fold(backend, cancel, sink, config, fold);
                            if status.is_err() {
                                halt.cancel();
                            }
                            (index, config, status)
                        })
                        .collect()
                });
            collected.sort_by_key(|(index, ..)| *index);
            for (index, config, status) in collected {
                results.push((index, config, status?));
            }
        }

        let interrupted = results.len() < jobs.len()
            || results
                .iter()
                .any(|(_, _, status)| matches!(status, FoldStatus::Cancelled));
        let mut per_config: Vec<Vec<FoldSummary>> = vec![Vec::new(); self.configurations.len()];
        for (_, config, status) in results {
            if let FoldStatus::Completed(outcome) = status {
                per_config[config].push(outcome.summary);
            }
        }

        let mut metrics = Vec::new();
        let mut folds = Vec::new();
        for summaries in per_config.into_iter().filter(|s| !s.is_empty()) {
            metrics.push(aggregate(&summaries)?);
            folds.extend(summaries);
        }
        if interrupted {
            tracing::warn!(
                completed = folds.len(),
                planned = jobs.len(),
                "evaluation interrupted"
            );
        }
        Ok(PlanOutcome {
            metrics,
            folds,
            interrupted,
        })
    }

    fn run_fold(
        &self,
        backend: &dyn InferenceBackend,
        cancel: &CancelToken,
        sink: &dyn FoldSink,
        config: usize,
        fold: usize,
    ) -> Result<FoldStatus, EngineError> {
        let configuration = &self.configurations[config];
        let spec = FoldSpec {
            params: configuration.params,
            fold,
            seed: fold_seed(
                self.config.seed,
                configuration.task.name(),
                configuration.params.list_size,
                fold,
            ),
            store_details: self.config.store_details,
        };
        let runner = FoldRunner::new(backend, &self.config.sampling, cancel.clone());
        let status = runner.run(configuration.task.as_ref(), &spec)?;
        if let FoldStatus::Completed(outcome) = &status {
            sink.fold_completed(&configuration.label, outcome)?;
        }
        Ok(status)
    }
}

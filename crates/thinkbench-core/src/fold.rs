//! One fold: generate, render, submit as a single batch, judge, average.

use crate::backend::{Completion, InferenceBackend, SamplingConfig};
use crate::cancel::CancelToken;
use crate::error::{BackendError, EngineError};
use crate::task::{Expected, GenerationParams, Inputs, Task};
use crate::types::{config_label, FoldSummary, Judgment};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Per-instance record kept when detail storage is on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceDetail {
    pub index: usize,
    pub inputs: Inputs,
    pub expected: Expected,
    pub prompt: String,
    pub response: String,
    pub judgment: Judgment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FoldOutcome {
    pub summary: FoldSummary,
    pub details: Option<Vec<InstanceDetail>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FoldStatus {
    Completed(FoldOutcome),
    /// Interrupted mid-fold; nothing from the fold is kept.
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub struct FoldSpec {
    pub params: GenerationParams,
    pub fold: usize,
    pub seed: u64,
    pub store_details: bool,
}

pub struct FoldRunner<'a> {
    backend: &'a dyn InferenceBackend,
    sampling: &'a SamplingConfig,
    cancel: CancelToken,
}

impl<'a> FoldRunner<'a> {
    pub fn new(
        backend: &'a dyn InferenceBackend,
        sampling: &'a SamplingConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            backend,
            sampling,
            cancel,
        }
    }

    pub fn run(&self, task: &dyn Task, spec: &FoldSpec) -> Result<FoldStatus, EngineError> {
        let label = config_label(task.name(), spec.params.list_size);
        if self.cancel.is_cancelled() {
            return Ok(FoldStatus::Cancelled);
        }

        let mut rng = StdRng::seed_from_u64(spec.seed);
        let instances =
            task.generate(&mut rng, &spec.params)
                .map_err(|source| EngineError::Generation {
                    configuration: label.clone(),
                    source,
                })?;
        let prompts: Vec<String> = instances.iter().map(|i| task.render(i)).collect();

        let completions = match self.complete(&prompts, &label, spec.fold)? {
            Some(completions) => completions,
            None => {
                tracing::info!(config = %label, fold = spec.fold, "fold interrupted; discarded");
                return Ok(FoldStatus::Cancelled);
            }
        };

        let judgments: Vec<Judgment> = instances
            .iter()
            .zip(&completions)
            .map(|(instance, completion)| task.judge(instance, completion))
            .collect();
        let summary = summarize(task.name(), spec, &judgments);
        tracing::info!(
            config = %label,
            fold = spec.fold,
            accuracy = summary.accuracy,
            instruction_followed = summary.instruction_followed,
            tokens = summary.tokens,
            "fold complete"
        );

        let details = spec.store_details.then(|| {
            instances
                .into_iter()
                .zip(prompts)
                .zip(completions)
                .zip(judgments)
                .enumerate()
                .map(|(index, (((instance, prompt), completion), judgment))| InstanceDetail {
                    index,
                    inputs: instance.inputs,
                    expected: instance.expected,
                    prompt,
                    response: completion.text,
                    judgment,
                })
                .collect()
        });

        Ok(FoldStatus::Completed(FoldOutcome { summary, details }))
    }

    /// Full batch first; on a transient failure, one retry in half-size chunks.
    /// `None` means the run was cancelled after a batch returned.
    fn complete(
        &self,
        prompts: &[String],
        label: &str,
        fold: usize,
    ) -> Result<Option<Vec<Completion>>, EngineError> {
        let first = match self.submit(prompts) {
            Ok(completions) => {
                return Ok((!self.cancel.is_cancelled()).then_some(completions));
            }
            Err(err) if err.is_transient() => err,
            Err(source) => {
                return Err(EngineError::Backend {
                    configuration: label.to_string(),
                    fold,
                    retried_after: None,
                    source,
                })
            }
        };

        let chunk = (prompts.len() / 2).max(1);
        tracing::warn!(
            config = %label,
            fold,
            chunk,
            error = %first,
            "transient backend failure; retrying with smaller batches"
        );
        let mut completions = Vec::with_capacity(prompts.len());
        for part in prompts.chunks(chunk) {
            let done = self
                .submit(part)
                .map_err(|source| EngineError::Backend {
                    configuration: label.to_string(),
                    fold,
                    retried_after: Some(first.to_string()),
                    source,
                })?;
            completions.extend(done);
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
        }
        Ok(Some(completions))
    }

    fn submit(&self, prompts: &[String]) -> Result<Vec<Completion>, BackendError> {
        let completions = self.backend.generate(prompts, self.sampling)?;
        if completions.len() != prompts.len() {
            return Err(BackendError::LengthMismatch {
                expected: prompts.len(),
                actual: completions.len(),
            });
        }
        Ok(completions)
    }
}

fn summarize(task: &str, spec: &FoldSpec, judgments: &[Judgment]) -> FoldSummary {
    let samples = judgments.len();
    let mean = |value: fn(&Judgment) -> f64| {
        if samples == 0 {
            0.0
        } else {
            judgments.iter().map(value).sum::<f64>() / samples as f64
        }
    };

    FoldSummary {
        task: task.to_string(),
        list_size: spec.params.list_size,
        fold: spec.fold,
        seed: spec.seed,
        samples,
        parse_failures: judgments.iter().filter(|j| j.parse_failed).count(),
        accuracy: mean(|j| f64::from(u8::from(j.correct))),
        instruction_followed: mean(|j| f64::from(u8::from(j.instruction_followed))),
        tokens: mean(|j| j.tokens as f64),
        chars: mean(|j| j.chars as f64),
        words: mean(|j| j.words as f64),
    }
}

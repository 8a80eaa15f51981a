use crate::error::BackendError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Sampling and placement settings handed through to the backend untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default = "default_parallelism")]
    pub tensor_parallel_size: usize,
}

fn default_parallelism() -> usize {
    1
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 512,
            device: None,
            tensor_parallel_size: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub tokens: u64,
}

pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &str;

    /// One completion per prompt, same length and order as `prompts`.
    fn generate(
        &self,
        prompts: &[String],
        config: &SamplingConfig,
    ) -> Result<Vec<Completion>, BackendError>;
}

type Responder = dyn Fn(&str) -> Result<Completion, BackendError> + Send + Sync;

/// In-process backend driven by a closure; counts the batches it serves.
pub struct ScriptedBackend {
    name: String,
    responder: Box<Responder>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new<F>(name: impl Into<String>, responder: F) -> Self
    where
        F: Fn(&str) -> Result<Completion, BackendError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
        }
    }

    /// Answers every prompt with the same text.
    pub fn constant(text: impl Into<String>, tokens: u64) -> Self {
        let text = text.into();
        Self::new("constant", move |_| {
            Ok(Completion {
                text: text.clone(),
                tokens,
            })
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate(
        &self,
        prompts: &[String],
        _config: &SamplingConfig,
    ) -> Result<Vec<Completion>, BackendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(backend = %self.name, call, prompts = prompts.len(), "scripted batch");
        prompts
            .iter()
            .map(|prompt| (self.responder)(prompt))
            .collect()
    }
}

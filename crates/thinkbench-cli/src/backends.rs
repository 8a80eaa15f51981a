use crate::config::{BackendKind, Settings};
use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thinkbench_core::{estimate_tokens, BackendError, Completion, InferenceBackend, SamplingConfig};

/// One backend per worker; replay workers share the loaded records.
pub fn build_backends(settings: &Settings) -> Result<Vec<Box<dyn InferenceBackend>>> {
    let mut backends: Vec<Box<dyn InferenceBackend>> = Vec::with_capacity(settings.jobs);
    match settings.backend {
        BackendKind::Replay => {
            let path = settings
                .responses
                .as_deref()
                .context("the replay backend needs --responses")?;
            let records = Arc::new(ReplayRecords::load(path)?);
            for _ in 0..settings.jobs {
                backends.push(Box::new(ReplayBackend::new(Arc::clone(&records))));
            }
        }
        BackendKind::Openai => {
            for _ in 0..settings.jobs {
                backends.push(Box::new(OpenAiBackend::new(
                    &settings.endpoint,
                    &settings.model,
                    settings.api_key.clone(),
                    settings.request_timeout,
                )?));
            }
        }
    }
    Ok(backends)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReplayLine {
    #[serde(default)]
    prompt: Option<String>,
    text: String,
    #[serde(default)]
    tokens: Option<u64>,
}

#[derive(Debug, Default)]
pub struct ReplayRecords {
    by_prompt: HashMap<String, Completion>,
    sequence: Vec<Completion>,
}

impl ReplayRecords {
    /// Lines carrying a `prompt` answer that prompt exactly; the rest are
    /// served in file order, cycling.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read responses {}", path.display()))?;
        let mut records = Self::default();
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let parsed: ReplayLine = serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid record", path.display(), index + 1))?;
            let completion = Completion {
                tokens: parsed.tokens.unwrap_or_else(|| estimate_tokens(&parsed.text)),
                text: parsed.text,
            };
            match parsed.prompt {
                Some(prompt) => {
                    records.by_prompt.insert(prompt, completion);
                }
                None => records.sequence.push(completion),
            }
        }
        if records.by_prompt.is_empty() && records.sequence.is_empty() {
            bail!("{}: no recorded completions", path.display());
        }
        Ok(records)
    }
}

pub struct ReplayBackend {
    records: Arc<ReplayRecords>,
    cursor: AtomicUsize,
}

impl ReplayBackend {
    pub fn new(records: Arc<ReplayRecords>) -> Self {
        Self {
            records,
            cursor: AtomicUsize::new(0),
        }
    }

    fn next(&self, prompt: &str) -> Result<Completion, BackendError> {
        if let Some(completion) = self.records.by_prompt.get(prompt) {
            return Ok(completion.clone());
        }
        let sequence = &self.records.sequence;
        if sequence.is_empty() {
            return Err(BackendError::fatal("no recorded completion for prompt"));
        }
        let index = self.cursor.fetch_add(1, Ordering::SeqCst) % sequence.len();
        Ok(sequence[index].clone())
    }
}

impl InferenceBackend for ReplayBackend {
    fn name(&self) -> &str {
        "replay"
    }

    fn generate(
        &self,
        prompts: &[String],
        _config: &SamplingConfig,
    ) -> Result<Vec<Completion>, BackendError> {
        prompts.iter().map(|prompt| self.next(prompt)).collect()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    completion_tokens: Option<u64>,
}

/// OpenAI-compatible `/chat/completions`, one request per prompt.
pub struct OpenAiBackend {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiBackend {
    pub fn new(
        endpoint: &str,
        model: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            url: format!("{}/chat/completions", endpoint.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
        })
    }

    fn complete(&self, prompt: &str, config: &SamplingConfig) -> Result<Completion, BackendError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
        };
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            let message = format!("{} returned {status}: {}", self.url, truncate(&detail, 200));
            return Err(if is_retryable(status) {
                BackendError::transient(message)
            } else {
                BackendError::fatal(message)
            });
        }

        let parsed: ChatResponse = response.json().map_err(|err| BackendError::Fatal {
            message: "malformed chat completion".to_string(),
            source: Some(Box::new(err)),
        })?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        let tokens = parsed
            .usage
            .and_then(|usage| usage.completion_tokens)
            .unwrap_or_else(|| estimate_tokens(&text));
        Ok(Completion { text, tokens })
    }
}

impl InferenceBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    fn generate(
        &self,
        prompts: &[String],
        config: &SamplingConfig,
    ) -> Result<Vec<Completion>, BackendError> {
        tracing::debug!(url = %self.url, prompts = prompts.len(), "submitting batch");
        prompts
            .iter()
            .map(|prompt| self.complete(prompt, config))
            .collect()
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn transport_error(err: reqwest::Error) -> BackendError {
    let message = err.to_string();
    if err.is_timeout() || err.is_connect() {
        BackendError::Transient {
            message,
            source: Some(Box::new(err)),
        }
    } else {
        BackendError::Fatal {
            message,
            source: Some(Box::new(err)),
        }
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

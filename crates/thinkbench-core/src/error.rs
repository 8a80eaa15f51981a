use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Invalid evaluation configuration, detected before any inference call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("sample count must be >= 1")]
    ZeroCount,

    #[error("fold count must be >= 1")]
    ZeroFolds,

    #[error("value range must satisfy min < max (got {min}..{max})")]
    InvalidRange { min: i64, max: i64 },

    #[error("task {task} requires a list size")]
    MissingListSize { task: String },

    #[error("task {task} requires list size >= {min} (got {actual})")]
    ListSizeTooSmall {
        task: String,
        min: usize,
        actual: usize,
    },

    #[error("task {task} draws {list_size} distinct values but range {min}..{max} holds only {available}")]
    RangeTooNarrow {
        task: String,
        list_size: usize,
        min: i64,
        max: i64,
        available: u128,
    },

    #[error("task {task}: expected answer overflows for list size {list_size}")]
    Overflow { task: String, list_size: usize },
}

#[derive(Debug, Error)]
pub enum BackendError {
    /// Out of memory, interrupted request, rate limiting: worth one retry.
    #[error("transient backend failure: {message}")]
    Transient {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("backend failure: {message}")]
    Fatal {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("backend returned {actual} completions for {expected} prompts")]
    LengthMismatch { expected: usize, actual: usize },
}

impl BackendError {
    pub fn transient(message: impl Into<String>) -> Self {
        BackendError::Transient {
            message: message.into(),
            source: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        BackendError::Fatal {
            message: message.into(),
            source: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient { .. })
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown task: {name} (available: {available})")]
    UnknownTask { name: String, available: String },

    #[error("{configuration}: {source}")]
    Generation {
        configuration: String,
        #[source]
        source: GenerationError,
    },

    #[error("{configuration} fold {fold}: {source}")]
    Backend {
        configuration: String,
        fold: usize,
        /// Message of the transient failure that triggered the retry, if any.
        retried_after: Option<String>,
        #[source]
        source: BackendError,
    },

    #[error("checkpoint {configuration} fold {fold}: {source}")]
    Checkpoint {
        configuration: String,
        fold: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("no folds to aggregate for {configuration}")]
    EmptyAggregate { configuration: String },

    #[error("no inference backend configured")]
    NoBackend,

    #[error("build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

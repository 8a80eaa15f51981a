pub mod aggregate;
pub mod backend;
pub mod cancel;
pub mod checkpoint;
pub mod efficiency;
pub mod error;
pub mod extract;
pub mod fold;
pub mod plan;
pub mod registry;
pub mod report;
pub mod seed;
pub mod task;
pub mod tasks;
pub mod tokens;
pub mod types;

pub use aggregate::aggregate;
pub use backend::{Completion, InferenceBackend, SamplingConfig, ScriptedBackend};
pub use cancel::CancelToken;
pub use checkpoint::{load_folds, write_atomic, DirSink};
pub use efficiency::score_group;
pub use error::{BackendError, EngineError, GenerationError};
pub use extract::{extract, AnswerShape, Extraction};
pub use fold::{FoldOutcome, FoldRunner, FoldSpec, FoldStatus, InstanceDetail};
pub use plan::{Configuration, EvaluationPlan, FoldSink, NullSink, PlanOutcome, RunConfig};
pub use registry::TaskRegistry;
pub use report::{Report, ReportEntry, REPORT_SCHEMA_VERSION};
pub use task::{Expected, GenerationParams, Inputs, ProblemInstance, Task, Tolerance, ValueRange};
pub use tokens::estimate_tokens;
pub use types::{
    config_label, Answer, EfficiencyRecord, FoldSummary, Judgment, Number, Relation, Stat,
    TaskMetric,
};

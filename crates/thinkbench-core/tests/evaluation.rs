use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;
use thinkbench_core::seed::fold_seed;
use thinkbench_core::{
    BackendError, CancelToken, Completion, DirSink, EvaluationPlan, InferenceBackend, NullSink,
    Report, RunConfig, SamplingConfig, ScriptedBackend, TaskRegistry, ValueRange,
};

fn run_config(tasks: &[&str], seed: u64) -> RunConfig {
    RunConfig {
        tasks: tasks.iter().map(|t| t.to_string()).collect(),
        datapoints: 12,
        folds: 2,
        range: ValueRange::new(-100, 100),
        list_sizes: vec![4, 8],
        seed,
        store_details: false,
        sampling: SamplingConfig::default(),
    }
}

/// Answers every prompt the plan will issue with its boxed expected answer.
fn oracle(plan: &EvaluationPlan) -> Box<dyn InferenceBackend> {
    let mut answers = HashMap::new();
    for configuration in plan.configurations() {
        for fold in 0..plan.config().folds {
            let seed = fold_seed(
                plan.config().seed,
                configuration.task.name(),
                configuration.params.list_size,
                fold,
            );
            let mut rng = StdRng::seed_from_u64(seed);
            let instances = configuration
                .task
                .generate(&mut rng, &configuration.params)
                .expect("generate");
            for instance in instances {
                answers.insert(configuration.task.render(&instance), instance.expected.boxed());
            }
        }
    }
    let answers = Arc::new(answers);
    Box::new(ScriptedBackend::new("oracle", move |prompt| {
        let text = answers
            .get(prompt)
            .cloned()
            .ok_or_else(|| BackendError::fatal("prompt not planned"))?;
        Ok(Completion {
            tokens: text.len() as u64,
            text,
        })
    }))
}

#[test]
fn oracle_backend_scores_perfectly_everywhere() {
    let registry = TaskRegistry::builtin();
    let names: Vec<&str> = registry.names().to_vec();
    let plan = EvaluationPlan::new(run_config(&names, 42), &registry).expect("plan");
    let backend = oracle(&plan);
    let outcome = plan
        .run(&[backend], &CancelToken::new(), &NullSink)
        .expect("run");

    assert!(!outcome.interrupted);
    // 10 sized tasks at two list sizes, 4 pair tasks once
    assert_eq!(outcome.metrics.len(), 24);
    for metric in &outcome.metrics {
        assert_eq!(metric.accuracy.mean, 1.0, "{}", metric.label());
        assert_eq!(metric.accuracy.std, 0.0, "{}", metric.label());
        assert_eq!(metric.instruction_followed.mean, 1.0);
    }

    let report = Report::assemble(
        "oracle",
        "2026-10-16T00:00:00Z",
        plan.config().clone(),
        outcome.metrics,
        outcome.interrupted,
    );
    assert_eq!(report.rankings.len(), 24);
    assert!(report
        .rankings
        .iter()
        .all(|record| record.overthinking_ratio.is_finite()));
    let top = &report.rankings[0];
    assert_eq!(top.normalized_tokens, 0.0);
    assert_eq!(top.efficiency_score, 1.0);
}

#[test]
fn seeded_runs_are_reproducible() {
    let registry = TaskRegistry::builtin();
    let verbose = || -> Box<dyn InferenceBackend> {
        Box::new(ScriptedBackend::new("echo", |prompt| {
            Ok(Completion {
                text: format!("Restating: {prompt}"),
                tokens: prompt.len() as u64,
            })
        }))
    };
    let plan = EvaluationPlan::new(run_config(&["sorting", "mode", "division"], 9), &registry)
        .expect("plan");
    let first = plan
        .run(&[verbose()], &CancelToken::new(), &NullSink)
        .expect("first");
    let second = plan
        .run(&[verbose(), verbose()], &CancelToken::new(), &NullSink)
        .expect("second");
    assert_eq!(first, second);

    let other = EvaluationPlan::new(run_config(&["sorting", "mode", "division"], 10), &registry)
        .expect("plan");
    let third = other
        .run(&[verbose()], &CancelToken::new(), &NullSink)
        .expect("third");
    assert_ne!(first.folds, third.folds);
}

#[test]
fn completed_folds_are_checkpointed() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let registry = TaskRegistry::builtin();
    let mut config = run_config(&["sum"], 1);
    config.store_details = true;
    let plan = EvaluationPlan::new(config, &registry).expect("plan");
    let sink = DirSink::create(dir.path()).expect("sink");
    let backend: Box<dyn InferenceBackend> = Box::new(ScriptedBackend::constant("\\boxed{0}", 3));
    let outcome = plan
        .run(&[backend], &CancelToken::new(), &sink)
        .expect("run");

    let on_disk = thinkbench_core::load_folds(dir.path()).expect("load");
    assert_eq!(on_disk.len(), 4);
    assert_eq!(on_disk.len(), outcome.folds.len());
    assert!(sink.details_path("sum_4", 1).exists());
    assert!(sink.details_path("sum_8", 0).exists());
}

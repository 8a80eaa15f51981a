//! Runs the fixture cases under `cases/` against the `thinkbench` binary and
//! checks the run summary and report each one produces.

use anyhow::{bail, Context, Result};
use clap::Parser;
use jsonschema::JSONSchema;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Placeholder in `run.cmd` replaced by the per-run output directory.
const OUT_PLACEHOLDER: &str = "{out}";
const TIMEOUT_EXIT_CODE: i32 = 124;
const NUMBER_TOLERANCE: f64 = 1e-9;

#[derive(Parser)]
struct Args {
    #[arg(long)]
    list: bool,
    #[arg(long)]
    only: Vec<String>,
    #[arg(long)]
    tag: Vec<String>,
    /// Path to the thinkbench binary; replaces a leading `thinkbench` in commands.
    #[arg(long)]
    thinkbench: Option<PathBuf>,
    #[arg(long, default_value_t = 1)]
    jobs: usize,
}

#[derive(Debug, Deserialize)]
struct CaseSpec {
    id: String,
    title: String,
    tags: Option<Vec<String>>,
    timeout_ms: Option<u64>,
    run: RunSpec,
}

#[derive(Debug, Deserialize)]
struct RunSpec {
    cmd: Vec<String>,
    cwd: Option<String>,
    env: Option<HashMap<String, String>>,
    timeout_ms: Option<u64>,
    repeat: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ExpectSpec {
    exit_code: Option<JsonValue>,
    status: Option<JsonValue>,
    stderr: Option<JsonValue>,
    report: Option<ReportExpect>,
    repeat: Option<u32>,
    compare: Option<CompareExpect>,
}

#[derive(Debug, Deserialize)]
struct ReportExpect {
    partial: Option<bool>,
    entry_count: Option<JsonValue>,
    ranking: Option<Vec<String>>,
    entries: Option<Vec<EntryExpect>>,
}

#[derive(Debug, Deserialize)]
struct EntryExpect {
    label: String,
    folds: Option<JsonValue>,
    accuracy: Option<JsonValue>,
    instruction_followed: Option<JsonValue>,
    parse_failed: Option<JsonValue>,
    tokens: Option<JsonValue>,
    efficiency_score: Option<JsonValue>,
    overthinking_ratio: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct CompareExpect {
    kind: String,
    ignore_fields: Option<Vec<String>>,
}

struct Case {
    dir: PathBuf,
    spec: CaseSpec,
}

enum CaseResult {
    Pass,
    Fail,
}

struct RunOutcome {
    exit_code: i32,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    summary: Option<JsonValue>,
    report: Option<JsonValue>,
}

impl RunOutcome {
    fn status(&self) -> &str {
        self.summary
            .as_ref()
            .and_then(|json| json.get("status"))
            .and_then(|value| value.as_str())
            .unwrap_or("none")
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.jobs == 0 {
        bail!("--jobs must be >= 1");
    }

    let root = std::env::current_dir().context("current dir")?;
    let cases_dir = root.join("cases");
    let case_schema = load_schema(&root, "case.schema.json")?;
    let expect_schema = load_schema(&root, "expect.schema.json")?;
    let mut cases = load_cases(&cases_dir, &case_schema)?;
    cases.sort_by(|a, b| a.spec.id.cmp(&b.spec.id));

    let filtered = filter_cases(&cases, &args);
    if args.list {
        for case in &filtered {
            println!("{} {}", case.spec.id, case.spec.title);
        }
        return Ok(());
    }

    let out_root = cases_dir.join(".out");
    let pool = ThreadPoolBuilder::new()
        .num_threads(args.jobs)
        .build()
        .context("build thread pool")?;
    let mut records = pool.install(|| {
        filtered
            .par_iter()
            .enumerate()
            .map(|(idx, case)| {
                let mut logs = Vec::new();
                let result = run_case(&out_root, case, &args, &expect_schema, &mut logs);
                (idx, case.spec.id.clone(), logs, result)
            })
            .collect::<Vec<_>>()
    });
    records.sort_by_key(|(idx, ..)| *idx);

    let mut any_fail = false;
    let mut any_error = false;
    for (_idx, id, logs, result) in records {
        for line in logs {
            println!("{line}");
        }
        match result {
            Ok(CaseResult::Pass) => {}
            Ok(CaseResult::Fail) => any_fail = true,
            Err(err) => {
                any_error = true;
                eprintln!("ERROR {id}: {err:#}");
            }
        }
    }

    if any_error {
        std::process::exit(2);
    }
    if any_fail {
        std::process::exit(1);
    }
    Ok(())
}

fn load_schema(root: &Path, name: &str) -> Result<JSONSchema> {
    let schema_path = root.join("schemas").join(name);
    let schema_text = fs::read_to_string(&schema_path)
        .with_context(|| format!("read {}", schema_path.display()))?;
    let schema_json: JsonValue =
        serde_json::from_str(&schema_text).with_context(|| format!("parse {name}"))?;
    let schema_json = Box::leak(Box::new(schema_json));
    JSONSchema::compile(schema_json).with_context(|| format!("compile {name}"))
}

/// Parses a YAML file after checking it against `schema`.
fn load_validated<T: serde::de::DeserializeOwned>(path: &Path, schema: &JSONSchema) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let raw_json: JsonValue = serde_yaml::from_str(&text)
        .with_context(|| format!("parse {} as json", path.display()))?;
    if let Err(errors) = schema.validate(&raw_json) {
        let details: Vec<String> = errors.map(|err| err.to_string()).collect();
        bail!(
            "schema validation failed: {}\n{}",
            path.display(),
            details.join("\n")
        );
    }
    serde_yaml::from_str(&text).with_context(|| format!("parse {}", path.display()))
}

fn load_cases(cases_dir: &Path, schema: &JSONSchema) -> Result<Vec<Case>> {
    let mut cases = Vec::new();
    if !cases_dir.exists() {
        return Ok(cases);
    }
    for entry in fs::read_dir(cases_dir).context("read cases dir")? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let dir = entry.path();
        let case_yaml = dir.join("case.yaml");
        if !case_yaml.exists() {
            continue;
        }
        let spec: CaseSpec = load_validated(&case_yaml, schema)?;
        cases.push(Case { dir, spec });
    }
    Ok(cases)
}

fn filter_cases<'a>(cases: &'a [Case], args: &Args) -> Vec<&'a Case> {
    let only: HashSet<&str> = args.only.iter().map(String::as_str).collect();
    cases
        .iter()
        .filter(|case| only.is_empty() || only.contains(case.spec.id.as_str()))
        .filter(|case| {
            args.tag.is_empty()
                || case
                    .spec
                    .tags
                    .as_ref()
                    .is_some_and(|tags| tags.iter().any(|tag| args.tag.contains(tag)))
        })
        .collect()
}

fn run_case(
    out_root: &Path,
    case: &Case,
    args: &Args,
    expect_schema: &JSONSchema,
    logs: &mut Vec<String>,
) -> Result<CaseResult> {
    let expect: ExpectSpec = load_validated(&case.dir.join("expect.yaml"), expect_schema)?;
    let repeat = expect.repeat.or(case.spec.run.repeat).unwrap_or(1);
    let ignore = expect
        .compare
        .as_ref()
        .and_then(|compare| compare.ignore_fields.clone())
        .unwrap_or_default();

    let case_out = out_root.join(&case.spec.id);
    let mut outcomes = Vec::new();
    for idx in 1..=repeat {
        let run_dir = case_out.join(format!("run-{idx}"));
        if run_dir.exists() {
            fs::remove_dir_all(&run_dir)
                .with_context(|| format!("clear {}", run_dir.display()))?;
        }
        fs::create_dir_all(&run_dir).with_context(|| format!("create {}", run_dir.display()))?;
        let outcome = execute_run(case, args, &run_dir.join("output"))?;
        fs::write(run_dir.join("stdout.txt"), &outcome.stdout)?;
        fs::write(run_dir.join("stderr.txt"), &outcome.stderr)?;
        fs::write(run_dir.join("exit_code.txt"), outcome.exit_code.to_string())?;
        if let Some(report) = &outcome.report {
            let normalized = normalize_report(report.clone(), &ignore);
            fs::write(
                run_dir.join("normalized.json"),
                serde_json::to_vec_pretty(&normalized)?,
            )?;
        }
        logs.push(format!(
            "DONE {} run={} exit={} status={}",
            case.spec.id,
            idx,
            outcome.exit_code,
            outcome.status()
        ));
        outcomes.push(outcome);
    }

    let mut errors = Vec::new();
    for (idx, outcome) in outcomes.iter().enumerate() {
        errors.extend(evaluate_run(&expect, outcome, idx + 1));
    }
    errors.extend(evaluate_compare(&expect, &outcomes, &ignore, &case.spec.id));

    let report_path = case_out.join("report.txt");
    if errors.is_empty() {
        fs::write(&report_path, "PASS\n")?;
        logs.push(format!("PASS {}", case.spec.id));
        Ok(CaseResult::Pass)
    } else {
        fs::write(&report_path, format!("FAIL\n{}\n", errors.join("\n")))?;
        logs.push(format!(
            "FAIL {} report={}",
            case.spec.id,
            report_path.display()
        ));
        Ok(CaseResult::Fail)
    }
}

fn evaluate_run(expect: &ExpectSpec, outcome: &RunOutcome, run: usize) -> Vec<String> {
    let mut errors = Vec::new();
    if let Some(exit_expect) = &expect.exit_code {
        if !match_int(outcome.exit_code as i64, exit_expect) {
            errors.push(format!(
                "run {run}: exit_code mismatch (actual {})",
                outcome.exit_code
            ));
        }
    }
    if let Some(stderr_expect) = &expect.stderr {
        let stderr = String::from_utf8_lossy(&outcome.stderr);
        if !match_string(&stderr, stderr_expect) {
            errors.push(format!("run {run}: stderr mismatch"));
        }
    }
    if let Some(status_expect) = &expect.status {
        match outcome.summary.as_ref() {
            Some(_) if match_string(outcome.status(), status_expect) => {}
            Some(_) => errors.push(format!(
                "run {run}: status mismatch (actual {})",
                outcome.status()
            )),
            None => errors.push(format!("run {run}: run summary missing")),
        }
    }
    if let Some(report_expect) = &expect.report {
        match &outcome.report {
            Some(report) => errors.extend(
                evaluate_report(report_expect, report)
                    .into_iter()
                    .map(|err| format!("run {run}: {err}")),
            ),
            None => errors.push(format!("run {run}: report.json missing")),
        }
    }
    errors
}

fn evaluate_report(expect: &ReportExpect, report: &JsonValue) -> Vec<String> {
    let mut errors = Vec::new();
    if let Some(partial) = expect.partial {
        let actual = report.get("partial").and_then(|v| v.as_bool());
        if actual != Some(partial) {
            errors.push(format!("partial mismatch (actual {actual:?})"));
        }
    }
    let entries = report
        .get("entries")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    if let Some(count) = &expect.entry_count {
        if !match_int(entries.len() as i64, count) {
            errors.push(format!("entry_count mismatch (actual {})", entries.len()));
        }
    }
    if let Some(ranking) = &expect.ranking {
        let actual: Vec<&str> = report
            .get("rankings")
            .and_then(|v| v.as_array())
            .map(|records| {
                records
                    .iter()
                    .filter_map(|record| record.get("label").and_then(|v| v.as_str()))
                    .collect()
            })
            .unwrap_or_default();
        if actual != *ranking {
            errors.push(format!("ranking mismatch (actual {actual:?})"));
        }
    }
    for entry_expect in expect.entries.iter().flatten() {
        let found = entries.iter().find(|entry| {
            entry.get("label").and_then(|v| v.as_str()) == Some(entry_expect.label.as_str())
        });
        match found {
            Some(entry) => errors.extend(evaluate_entry(entry_expect, entry)),
            None => errors.push(format!("entry {} missing", entry_expect.label)),
        }
    }
    errors
}

fn evaluate_entry(expect: &EntryExpect, entry: &JsonValue) -> Vec<String> {
    let mut errors = Vec::new();
    let label = &expect.label;
    if let Some(folds) = &expect.folds {
        let actual = entry.get("folds").and_then(|v| v.as_i64()).unwrap_or(-1);
        if !match_int(actual, folds) {
            errors.push(format!("{label}: folds mismatch (actual {actual})"));
        }
    }
    let stats = [
        ("accuracy", &expect.accuracy),
        ("instruction_followed", &expect.instruction_followed),
        ("parse_failed", &expect.parse_failed),
        ("tokens", &expect.tokens),
    ];
    for (field, constraint) in stats {
        let Some(constraint) = constraint else {
            continue;
        };
        let actual = entry
            .get(field)
            .and_then(|stat| stat.get("mean"))
            .and_then(|v| v.as_f64());
        if !actual.is_some_and(|value| match_number(value, constraint)) {
            errors.push(format!("{label}: {field} mismatch (actual {actual:?})"));
        }
    }
    if let Some(constraint) = &expect.efficiency_score {
        let actual = entry.get("efficiency_score").and_then(|v| v.as_f64());
        if !actual.is_some_and(|value| match_number(value, constraint)) {
            errors.push(format!(
                "{label}: efficiency_score mismatch (actual {actual:?})"
            ));
        }
    }
    if let Some(constraint) = &expect.overthinking_ratio {
        let actual = entry.get("overthinking_ratio");
        let matched = match (actual, constraint) {
            (Some(JsonValue::String(text)), JsonValue::String(expected)) => text == expected,
            (Some(value), _) => value
                .as_f64()
                .is_some_and(|value| match_number(value, constraint)),
            (None, _) => false,
        };
        if !matched {
            errors.push(format!(
                "{label}: overthinking_ratio mismatch (actual {actual:?})"
            ));
        }
    }
    errors
}

fn evaluate_compare(
    expect: &ExpectSpec,
    outcomes: &[RunOutcome],
    ignore: &[String],
    case_id: &str,
) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(compare) = &expect.compare else {
        return errors;
    };
    if compare.kind != "normalized_json_equal" {
        errors.push(format!("compare: unsupported kind {}", compare.kind));
        return errors;
    }
    if outcomes.len() < 2 {
        errors.push("compare: repeat must be >= 2".to_string());
        return errors;
    }
    let mut normalized = Vec::new();
    for (idx, outcome) in outcomes.iter().enumerate() {
        match &outcome.report {
            Some(report) => normalized.push(normalize_report(report.clone(), ignore)),
            None => errors.push(format!("compare: run {} report.json missing", idx + 1)),
        }
    }
    if errors.is_empty() {
        let first = &normalized[0];
        if let Some(idx) = normalized.iter().skip(1).position(|value| value != first) {
            errors.push(format!(
                "compare: normalized_json_equal mismatch (run 1 vs run {}) (see cases/.out/{}/run-*/normalized.json)",
                idx + 2,
                case_id
            ));
        }
    }
    errors
}

fn match_int(actual: i64, expect: &JsonValue) -> bool {
    match expect {
        JsonValue::Number(num) => num.as_i64() == Some(actual),
        JsonValue::Object(map) => {
            if let Some(eq) = map.get("eq").and_then(|v| v.as_i64()) {
                if actual != eq {
                    return false;
                }
            }
            if let Some(min) = map.get("min").and_then(|v| v.as_i64()) {
                if actual < min {
                    return false;
                }
            }
            if let Some(max) = map.get("max").and_then(|v| v.as_i64()) {
                if actual > max {
                    return false;
                }
            }
            if let Some(list) = map.get("in").and_then(|v| v.as_array()) {
                let values: Vec<i64> = list.iter().filter_map(|v| v.as_i64()).collect();
                if !values.contains(&actual) {
                    return false;
                }
            }
            true
        }
        _ => false,
    }
}

fn match_number(actual: f64, expect: &JsonValue) -> bool {
    match expect {
        JsonValue::Number(num) => num
            .as_f64()
            .is_some_and(|eq| (actual - eq).abs() <= NUMBER_TOLERANCE),
        JsonValue::Object(map) => {
            let tolerance = map
                .get("tolerance")
                .and_then(|v| v.as_f64())
                .unwrap_or(NUMBER_TOLERANCE);
            if let Some(eq) = map.get("eq").and_then(|v| v.as_f64()) {
                if (actual - eq).abs() > tolerance {
                    return false;
                }
            }
            if let Some(min) = map.get("min").and_then(|v| v.as_f64()) {
                if actual < min {
                    return false;
                }
            }
            if let Some(max) = map.get("max").and_then(|v| v.as_f64()) {
                if actual > max {
                    return false;
                }
            }
            true
        }
        _ => false,
    }
}

fn match_string(actual: &str, expect: &JsonValue) -> bool {
    match expect {
        JsonValue::String(value) => actual == value,
        JsonValue::Object(map) => {
            if let Some(eq) = map.get("eq").and_then(|v| v.as_str()) {
                if actual != eq {
                    return false;
                }
            }
            if let Some(contains) = map.get("contains").and_then(|v| v.as_str()) {
                if !actual.contains(contains) {
                    return false;
                }
            }
            if let Some(regex) = map.get("regex").and_then(|v| v.as_str()) {
                let Ok(pattern) = Regex::new(regex) else {
                    eprintln!("invalid regex in expect constraint: {regex}");
                    return false;
                };
                if !pattern.is_match(actual) {
                    return false;
                }
            }
            if let Some(list) = map.get("in").and_then(|v| v.as_array()) {
                let values: Vec<&str> = list.iter().filter_map(|v| v.as_str()).collect();
                if !values.contains(&actual) {
                    return false;
                }
            }
            true
        }
        _ => false,
    }
}

/// Drops fields that legitimately differ between otherwise identical runs.
fn normalize_report(mut value: JsonValue, extra_ignore: &[String]) -> JsonValue {
    let mut ignore = vec!["generated_at".to_string()];
    ignore.extend(extra_ignore.iter().cloned());
    for path in ignore {
        let parts: Vec<&str> = path.split('.').collect();
        remove_path(&mut value, &parts);
    }
    value
}

fn remove_path(value: &mut JsonValue, parts: &[&str]) {
    match value {
        JsonValue::Object(map) => {
            if let Some((first, rest)) = parts.split_first() {
                if rest.is_empty() {
                    map.remove(*first);
                } else if let Some(next) = map.get_mut(*first) {
                    remove_path(next, rest);
                }
            }
        }
        JsonValue::Array(items) => {
            for child in items {
                remove_path(child, parts);
            }
        }
        _ => {}
    }
}

fn execute_run(case: &Case, args: &Args, out_dir: &Path) -> Result<RunOutcome> {
    let run = &case.spec.run;
    let out_text = out_dir.to_string_lossy();
    let mut cmd: Vec<String> = run
        .cmd
        .iter()
        .map(|part| part.replace(OUT_PLACEHOLDER, &out_text))
        .collect();
    if let Some(binary) = &args.thinkbench {
        if cmd.first().is_some_and(|s| s == "thinkbench") {
            let binary = if binary.is_absolute() {
                binary.clone()
            } else {
                std::env::current_dir().context("current dir")?.join(binary)
            };
            cmd[0] = binary.to_string_lossy().to_string();
        }
    }
    let cwd = match &run.cwd {
        Some(cwd) if Path::new(cwd).is_absolute() => PathBuf::from(cwd),
        Some(cwd) => case.dir.join(cwd),
        None => case.dir.clone(),
    };
    let timeout = run
        .timeout_ms
        .or(case.spec.timeout_ms)
        .map(Duration::from_millis);

    let mut command = Command::new(&cmd[0]);
    command.args(&cmd[1..]).current_dir(&cwd);
    for (key, value) in run.env.iter().flatten() {
        command.env(key, value);
    }
    command.stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .with_context(|| format!("spawn command: {} (cwd={})", cmd.join(" "), cwd.display()))?;
    let exit_code = match timeout {
        Some(timeout) => match child.wait_timeout(timeout)? {
            Some(status) => status.code().unwrap_or(1),
            None => {
                child.kill().ok();
                let _ = child.wait();
                TIMEOUT_EXIT_CODE
            }
        },
        None => child.wait()?.code().unwrap_or(1),
    };

    let mut stdout = Vec::new();
    if let Some(mut out) = child.stdout.take() {
        out.read_to_end(&mut stdout)?;
    }
    let mut stderr = Vec::new();
    if let Some(mut err) = child.stderr.take() {
        err.read_to_end(&mut stderr)?;
    }

    let summary = serde_json::from_slice::<JsonValue>(&stdout).ok();
    let report_path = out_dir.join("report.json");
    let report = fs::read(&report_path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<JsonValue>(&bytes).ok());

    Ok(RunOutcome {
        exit_code,
        stdout,
        stderr,
        summary,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn number_constraints_use_tolerance() {
        assert!(match_number(1.0 / 3.0, &json!({"eq": 0.3333, "tolerance": 0.001})));
        assert!(!match_number(0.5, &json!({"min": 0.6})));
        assert!(match_number(0.0, &json!(0)));
    }

    #[test]
    fn normalization_drops_timestamps_and_extra_fields() {
        let report = json!({
            "generated_at": "2026-01-01T00:00:00Z",
            "config": {"seed": 1},
            "entries": [{"label": "sum_8", "tokens": {"mean": 3.0}}]
        });
        let normalized = normalize_report(report, &["entries.tokens".to_string()]);
        assert_eq!(
            normalized,
            json!({"config": {"seed": 1}, "entries": [{"label": "sum_8"}]})
        );
    }

    #[test]
    fn report_expectations_check_ranking_and_entries() {
        let report = json!({
            "partial": true,
            "entries": [
                {"label": "sum_8", "folds": 2, "accuracy": {"mean": 0.0, "std": 0.0},
                 "overthinking_ratio": "inf"}
            ],
            "rankings": [{"label": "sum_8"}]
        });
        let expect: ReportExpect = serde_json::from_value(json!({
            "partial": true,
            "entry_count": 1,
            "ranking": ["sum_8"],
            "entries": [{"label": "sum_8", "folds": 2, "accuracy": 0, "overthinking_ratio": "inf"}]
        }))
        .expect("expect");
        assert!(evaluate_report(&expect, &report).is_empty());

        let wrong: ReportExpect =
            serde_json::from_value(json!({"entries": [{"label": "mean"}]})).expect("expect");
        assert_eq!(evaluate_report(&wrong, &report), vec!["entry mean missing"]);
    }
}

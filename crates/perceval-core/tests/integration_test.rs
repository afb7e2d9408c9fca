//! End-to-end pipeline tests with a deterministic stub judge.

use async_trait::async_trait;
use perceval_core::config::{load_config_from_str, ConfigOverrides, EvalConfig};
use perceval_core::events::Event;
use perceval_core::judge::{Judge, JudgeRequest, JudgeTask};
use perceval_core::persistence::load_results;
use perceval_core::worker::Phase;
use perceval_core::{EvalPipeline, PercevalError, RunOutcome};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

/// Perception is true when the response says "PERCEIVE"; equivalence is true
/// when the response contains the reference. Responses containing "FAIL"
/// make the judge error out.
#[derive(Default)]
struct StubJudge {
    calls: AtomicUsize,
}

#[async_trait]
impl Judge for StubJudge {
    async fn judge(&self, request: &JudgeRequest) -> perceval_core::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if request.candidate.contains("FAIL") {
            return Err(PercevalError::judge("stub judge unavailable"));
        }
        Ok(match request.task {
            JudgeTask::Perception => request.candidate.contains("PERCEIVE"),
            JudgeTask::Equivalence => request.candidate.contains(&request.reference),
        })
    }

    fn model(&self) -> &str {
        "stub"
    }
}

fn write_json(path: &Path, value: &serde_json::Value) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

fn config(dir: &Path, out: &str, concurrency: usize, grading: &str) -> EvalConfig {
    let yaml = format!(
        r#"
name: test
model: m1
dataset:
  name: aime
  metadata: "{root}/meta.json"
  samples: "{root}/samples/{{model}}/{{variant}}_16.json"
  grading: {grading}
config:
  concurrency: {concurrency}
output:
  directory: "{root}/{out}"
"#,
        root = dir.display()
    );
    load_config_from_str(&yaml, ConfigOverrides::default()).unwrap()
}

fn math_fixture(dir: &Path) {
    write_json(
        &dir.join("meta.json"),
        &json!([
            {
                "problem_id": "p1",
                "modified_question": "What is 1+2?",
                "modified_answer": "3",
                "modified_solution": ["Add 1 and 2."]
            },
            {
                "problem_id": "p2",
                "modified_question": "Pick seven.",
                "modified_answer": "7",
                "modified_solution": ["Seven."]
            },
            {
                "problem_id": "p3",
                "modified_question": "Reasoning first.",
                "modified_answer": "5",
                "modified_solution": "Five."
            },
            {
                "problem_id": "only-meta",
                "modified_question": "?",
                "modified_answer": "0",
                "modified_solution": []
            }
        ]),
    );
    write_json(
        &dir.join("samples/m1/modified_16.json"),
        &json!({
            "p1": {
                "raw": [
                    "PERCEIVE. so \\boxed{3}",
                    "thinking \\boxed{4}",
                    "PERCEIVE \\boxed{\\frac{6}{2}}",
                    "nothing boxed"
                ],
                "reasoning": ["", "", "", ""],
                "answer": ["", "", "", ""]
            },
            "p2": {
                "raw": ["\\boxed{9}"],
                "reasoning": [""],
                "answer": ["7"]
            },
            "p3": {
                "raw": ["\\boxed{6}"],
                "reasoning": ["so \\boxed{5}"],
                "answer": [""]
            },
            "only-samples": {"raw": ["x"]}
        }),
    );
}

fn events_of(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(flavor = "multi_thread")]
async fn symbolic_run_grades_perceives_and_persists() {
    let dir = tempdir().unwrap();
    math_fixture(dir.path());
    let cfg = config(dir.path(), "eval", 4, "symbolic");

    let pipeline = EvalPipeline::new(cfg, Arc::new(StubJudge::default()));
    let mut rx = pipeline.subscribe();
    let outcome = pipeline.run().await.unwrap();
    let RunOutcome::Completed(report) = outcome else {
        panic!("expected a completed run");
    };

    assert_eq!(
        report.artifact,
        dir.path().join("eval").join("aime").join("m1_modified.json")
    );
    let ids: Vec<&str> = report.results.keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["p1", "p2", "p3"]);

    let p1 = &report.results["p1"];
    assert_eq!(p1.passk.correct, vec![true, false, true, false]);
    assert_eq!(p1.perception, vec![true, false, true, false]);
    assert_eq!(p1.passk.gt_answer, "3");
    assert_eq!(p1.passk.answers[0], "3");
    assert_eq!(p1.passk.answers[3], "");
    assert!((p1.passk.score(1).unwrap() - 0.5).abs() < 1e-9);
    assert!((p1.passk.score(2).unwrap() - (1.0 - 1.0 / 6.0)).abs() < 1e-9);
    assert_eq!(p1.passk.score(4), Some(1.0));
    assert_eq!(p1.passk.score(8), None);
    assert_eq!(p1.passk.score(16), None);

    // Separated answer wins over the boxed one.
    assert_eq!(report.results["p2"].passk.correct, vec![true]);
    // Reasoning segment is preferred over raw for extraction.
    assert_eq!(report.results["p3"].passk.correct, vec![true]);

    assert!(report.omitted.is_empty());
    assert_eq!(report.scores.problems, 3);
    assert_eq!(report.scores.samples, 6);

    let reloaded = load_results(&report.artifact).unwrap();
    assert_eq!(reloaded, report.results);
    assert!(dir
        .path()
        .join("eval/aime/m1_modified.meta.json")
        .exists());

    let events = events_of(&mut rx);
    assert!(matches!(events.first(), Some(Event::RunStarted { problems: 3, samples: 6, .. })));
    assert!(matches!(events.last(), Some(Event::RunCompleted { .. })));
    let completed_jobs = events
        .iter()
        .filter(|e| matches!(e, Event::JobCompleted { .. }))
        .count();
    assert_eq!(completed_jobs, 6);
}

#[tokio::test(flavor = "multi_thread")]
async fn existing_artifact_skips_the_run() {
    let dir = tempdir().unwrap();
    math_fixture(dir.path());

    let judge = Arc::new(StubJudge::default());
    let first = EvalPipeline::new(config(dir.path(), "eval", 2, "symbolic"), judge.clone())
        .run()
        .await
        .unwrap();
    let RunOutcome::Completed(report) = first else {
        panic!("first run should complete");
    };
    let before = std::fs::read_to_string(&report.artifact).unwrap();
    let calls = judge.calls.load(Ordering::SeqCst);

    let second = EvalPipeline::new(config(dir.path(), "eval", 2, "symbolic"), judge.clone())
        .run()
        .await
        .unwrap();
    match second {
        RunOutcome::Skipped { artifact, run } => {
            assert_eq!(artifact, report.artifact);
            assert_eq!(run.to_string(), "aime/m1/modified");
        }
        RunOutcome::Completed(_) => panic!("second run should be skipped"),
    }
    assert_eq!(judge.calls.load(Ordering::SeqCst), calls, "no judge calls on skip");
    assert_eq!(std::fs::read_to_string(&report.artifact).unwrap(), before);
}

#[tokio::test(flavor = "multi_thread")]
async fn skip_check_happens_before_inputs_are_read() {
    let dir = tempdir().unwrap();
    // No metadata or samples at all, only the artifact.
    write_json(&dir.path().join("eval/aime/m1_modified.json"), &json!({}));

    let outcome = EvalPipeline::new(
        config(dir.path(), "eval", 1, "symbolic"),
        Arc::new(StubJudge::default()),
    )
    .run()
    .await
    .unwrap();
    assert!(matches!(outcome, RunOutcome::Skipped { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn results_do_not_depend_on_pool_size() {
    let dir = tempdir().unwrap();
    math_fixture(dir.path());

    let mut artifacts = Vec::new();
    for (out, concurrency) in [("one", 1), ("many", 7)] {
        let outcome = EvalPipeline::new(
            config(dir.path(), out, concurrency, "symbolic"),
            Arc::new(StubJudge::default()),
        )
        .run()
        .await
        .unwrap();
        let RunOutcome::Completed(report) = outcome else {
            panic!("run should complete");
        };
        artifacts.push(std::fs::read_to_string(report.artifact).unwrap());
    }
    assert_eq!(artifacts[0], artifacts[1]);
}

/// Answers like [`StubJudge`] after sleeping for the `delay=<ms>` marker in
/// the response, so earlier-submitted problems can finish last.
struct DelayedJudge;

#[async_trait]
impl Judge for DelayedJudge {
    async fn judge(&self, request: &JudgeRequest) -> perceval_core::Result<bool> {
        let delay_ms: u64 = request
            .candidate
            .split_once("delay=")
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .and_then(|ms| ms.parse().ok())
            .unwrap_or(0);
        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        Ok(match request.task {
            JudgeTask::Perception => request.candidate.contains("PERCEIVE"),
            JudgeTask::Equivalence => request.candidate.contains(&request.reference),
        })
    }

    fn model(&self) -> &str {
        "delayed"
    }
}

fn delayed_fixture(dir: &Path) {
    let problem = |id: &str, answer: &str| {
        json!({
            "problem_id": id,
            "modified_question": format!("Question {id}"),
            "modified_answer": answer,
            "modified_solution": ["Step."]
        })
    };
    write_json(
        &dir.join("meta.json"),
        &json!([problem("p1", "11"), problem("p2", "22"), problem("p3", "33")]),
    );
    write_json(
        &dir.join("samples/m1/modified_16.json"),
        &json!({
            "p1": {"raw": ["delay=150 PERCEIVE 11", "delay=150 12"]},
            "p2": {"raw": ["delay=75 22"]},
            "p3": {"raw": ["delay=0 PERCEIVE 30", "delay=0 PERCEIVE 33", "delay=0 33"]}
        }),
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn out_of_order_completion_rejoins_by_problem_id() {
    let dir = tempdir().unwrap();
    delayed_fixture(dir.path());

    let mut artifacts = Vec::new();
    for (out, concurrency) in [("one", 1), ("many", 7)] {
        let pipeline = EvalPipeline::new(
            config(dir.path(), out, concurrency, "judged"),
            Arc::new(DelayedJudge),
        );
        let mut rx = pipeline.subscribe();
        let RunOutcome::Completed(report) = pipeline.run().await.unwrap() else {
            panic!("run should complete");
        };

        let completed: Vec<String> = events_of(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                Event::JobCompleted {
                    phase: Phase::Perception,
                    problem_id,
                    ..
                } => Some(problem_id),
                _ => None,
            })
            .collect();
        if concurrency == 1 {
            assert_eq!(completed, ["p1", "p2", "p3"]);
        } else {
            assert_eq!(completed, ["p3", "p2", "p1"]);
        }

        let results = &report.results;
        assert_eq!(results["p1"].passk.correct, vec![true, false]);
        assert_eq!(results["p1"].perception, vec![true, false]);
        assert_eq!(results["p1"].passk.gt_answer, "11");
        assert_eq!(results["p2"].passk.correct, vec![true]);
        assert_eq!(results["p2"].perception, vec![false]);
        assert_eq!(results["p3"].passk.correct, vec![false, true, true]);
        assert_eq!(results["p3"].perception, vec![true, true, false]);
        assert_eq!(results["p3"].passk.answers[0], "delay=0 PERCEIVE 30");

        artifacts.push(std::fs::read_to_string(report.artifact).unwrap());
    }
    assert_eq!(artifacts[0], artifacts[1]);
}

#[tokio::test(flavor = "multi_thread")]
async fn judge_failure_omits_only_that_problem() {
    let dir = tempdir().unwrap();
    math_fixture(dir.path());
    write_json(
        &dir.path().join("samples/m1/modified_16.json"),
        &json!({
            "p1": {"raw": ["PERCEIVE \\boxed{3}", "FAIL \\boxed{3}", "\\boxed{3}"]},
            "p2": {"raw": ["PERCEIVE \\boxed{7}"]}
        }),
    );

    let pipeline = EvalPipeline::new(
        config(dir.path(), "eval", 3, "symbolic"),
        Arc::new(StubJudge::default()),
    );
    let mut rx = pipeline.subscribe();
    let RunOutcome::Completed(report) = pipeline.run().await.unwrap() else {
        panic!("run should complete");
    };

    assert_eq!(report.omitted, vec!["p1".to_string()]);
    assert!(!report.results.contains_key("p1"));
    assert_eq!(report.results["p2"].perception, vec![true]);
    assert_eq!(report.scores.problems, 1);

    let omitted: Vec<(String, Vec<usize>)> = events_of(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            Event::ProblemOmitted {
                problem_id,
                failed_samples,
                ..
            } => Some((problem_id, failed_samples)),
            _ => None,
        })
        .collect();
    assert_eq!(omitted, vec![("p1".to_string(), vec![1])]);

    let persisted = load_results(&report.artifact).unwrap();
    assert_eq!(persisted.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn misaligned_samples_abort_without_writing() {
    let dir = tempdir().unwrap();
    math_fixture(dir.path());
    write_json(
        &dir.path().join("samples/m1/modified_16.json"),
        &json!({
            "p1": {"raw": ["a", "b"], "answer": ["3"]}
        }),
    );
    let cfg = config(dir.path(), "eval", 2, "symbolic");
    let artifact = dir.path().join("eval/aime/m1_modified.json");

    let err = EvalPipeline::new(cfg, Arc::new(StubJudge::default()))
        .run()
        .await
        .unwrap_err();
    assert!(err.is_integrity(), "{err}");
    assert!(err.to_string().contains("p1"));
    assert!(!artifact.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn judged_grading_sends_full_responses() {
    let dir = tempdir().unwrap();
    write_json(
        &dir.path().join("meta.json"),
        &json!({
            "q1": {
                "modified_question": "Which square?",
                "modified_answer": "e4",
                "modified_solution": ["Look at the board."]
            }
        }),
    );
    write_json(
        &dir.path().join("samples/m1/modified_16.json"),
        &json!({
            "q1": {"raw": [
                "<think>maybe e4</think>It is d5.",
                "<think>hmm</think>PERCEIVE e4"
            ]}
        }),
    );
    let cfg = config(dir.path(), "eval", 2, "judged");

    let RunOutcome::Completed(report) = EvalPipeline::new(cfg, Arc::new(StubJudge::default()))
        .run()
        .await
        .unwrap()
    else {
        panic!("run should complete");
    };
    let q1 = &report.results["q1"];
    assert_eq!(q1.passk.correct, vec![false, true]);
    assert_eq!(q1.passk.gt_answer, "e4");
    assert_eq!(q1.passk.answers[0], "<think>maybe e4</think>It is d5.");
    assert_eq!(q1.perception, vec![false, true]);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_samples_file_is_reported() {
    let dir = tempdir().unwrap();
    math_fixture(dir.path());
    std::fs::remove_dir_all(dir.path().join("samples")).unwrap();

    let err = EvalPipeline::new(
        config(dir.path(), "eval", 2, "symbolic"),
        Arc::new(StubJudge::default()),
    )
    .run()
    .await
    .unwrap_err();
    assert!(matches!(err, PercevalError::MissingInput(_)), "{err}");
}

#[tokio::test(flavor = "multi_thread")]
async fn samples_file_with_other_count_is_found() {
    let dir = tempdir().unwrap();
    math_fixture(dir.path());
    std::fs::rename(
        dir.path().join("samples/m1/modified_16.json"),
        dir.path().join("samples/m1/modified_8.json"),
    )
    .unwrap();

    let outcome = EvalPipeline::new(
        config(dir.path(), "eval", 2, "symbolic"),
        Arc::new(StubJudge::default()),
    )
    .run()
    .await
    .unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(_)));
}

//! Worker pool over a shared MPMC queue.
//!
//! Workers pop jobs from an async_channel, evaluate every sample of one
//! problem, and send a result tagged with the problem id back. Results arrive
//! in completion order; the caller joins them by id.

use crate::grader::Grader;
use crate::perception::PerceptionJudge;
use crate::types::ProblemId;
use async_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    PassAtK,
    Perception,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::PassAtK => f.write_str("pass@k"),
            Phase::Perception => f.write_str("perception"),
        }
    }
}

// ============================================================================
// JOBS
// ============================================================================

#[derive(Debug, Clone)]
pub enum Job {
    /// Grade every candidate answer of a problem against its ground truth.
    Grade {
        problem_id: ProblemId,
        candidates: Vec<String>,
        ground_truth: String,
    },
    /// Judge every raw response of a problem against its reference steps.
    Perceive {
        problem_id: ProblemId,
        question: String,
        steps: Vec<String>,
        responses: Vec<String>,
    },
}

impl Job {
    pub fn problem_id(&self) -> &str {
        match self {
            Job::Grade { problem_id, .. } | Job::Perceive { problem_id, .. } => problem_id,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Job::Grade { .. } => Phase::PassAtK,
            Job::Perceive { .. } => Phase::Perception,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutput {
    Graded {
        correct: Vec<bool>,
        gt_answer: String,
        answers: Vec<String>,
    },
    Perceived(Vec<bool>),
}

/// Some samples of a job could not be evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub failed_samples: Vec<usize>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct JobResult {
    pub problem_id: ProblemId,
    pub phase: Phase,
    pub outcome: Result<JobOutput, JobFailure>,
}

/// What the workers evaluate with. Shared read-only across workers.
#[derive(Clone)]
pub struct JobContext {
    pub grader: Arc<dyn Grader>,
    pub perception: Arc<PerceptionJudge>,
}

// ============================================================================
// WORKER POOL
// ============================================================================

pub struct WorkerPool {
    work_tx: Sender<Job>,
    result_rx: mpsc::UnboundedReceiver<JobResult>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(concurrency: usize, ctx: JobContext) -> Self {
        let (work_tx, work_rx) = async_channel::unbounded();
        let (result_tx, result_rx) = mpsc::unbounded_channel();

        let workers = (0..concurrency.max(1))
            .map(|id| {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move { worker_loop(id as u64, work_rx, result_tx, ctx).await })
            })
            .collect();

        Self {
            work_tx,
            result_rx,
            workers,
        }
    }

    /// Push all jobs to the queue.
    pub async fn push_batch(&self, jobs: Vec<Job>) {
        for job in jobs {
            // Unbounded channel - send never fails unless closed
            let _ = self.work_tx.send(job).await;
        }
    }

    /// Receive the next result (or None if every worker is gone).
    pub async fn recv(&mut self) -> Option<JobResult> {
        self.result_rx.recv().await
    }

    /// Close the work queue and wait for workers to finish.
    pub async fn shutdown(self) {
        self.work_tx.close();
        for handle in self.workers {
            let _ = handle.await;
        }
    }
}

// ============================================================================
// WORKER
// ============================================================================

async fn worker_loop(
    id: u64,
    work_rx: Receiver<Job>,
    result_tx: mpsc::UnboundedSender<JobResult>,
    ctx: JobContext,
) {
    debug!(worker_id = id, "Worker started");

    while let Ok(job) = work_rx.recv().await {
        debug!(worker_id = id, problem_id = %job.problem_id(), phase = %job.phase(), "Processing job");
        let result = run_job(job, &ctx).await;
        if result_tx.send(result).is_err() {
            warn!(worker_id = id, "Result channel closed");
            break;
        }
    }

    debug!(worker_id = id, "Worker stopped");
}

/// Evaluate every sample of a job in order. Samples keep being evaluated after
/// a failure so the failure report lists every affected index.
pub async fn run_job(job: Job, ctx: &JobContext) -> JobResult {
    let phase = job.phase();
    match job {
        Job::Grade {
            problem_id,
            candidates,
            ground_truth,
        } => {
            let mut correct = Vec::with_capacity(candidates.len());
            let mut answers = Vec::with_capacity(candidates.len());
            let mut gt_answer = None;
            let mut failures = Failures::default();

            for (idx, candidate) in candidates.iter().enumerate() {
                match ctx.grader.grade(candidate, &ground_truth).await {
                    Ok(grade) => {
                        gt_answer.get_or_insert(grade.ground_truth);
                        correct.push(grade.correct);
                        answers.push(grade.candidate);
                    }
                    Err(e) => failures.record(idx, e.to_string()),
                }
            }

            let outcome = failures.into_outcome(|| JobOutput::Graded {
                correct,
                gt_answer: gt_answer.unwrap_or(ground_truth),
                answers,
            });
            JobResult {
                problem_id,
                phase,
                outcome,
            }
        }
        Job::Perceive {
            problem_id,
            question,
            steps,
            responses,
        } => {
            let verdicts = ctx.perception.perceive_all(&question, &steps, &responses).await;
            let mut perceived = Vec::with_capacity(verdicts.len());
            let mut failures = Failures::default();
            for (idx, verdict) in verdicts.into_iter().enumerate() {
                match verdict {
                    Ok(v) => perceived.push(v),
                    Err(e) => failures.record(idx, e.to_string()),
                }
            }

            let outcome = failures.into_outcome(|| JobOutput::Perceived(perceived));
            JobResult {
                problem_id,
                phase,
                outcome,
            }
        }
    }
}

#[derive(Default)]
struct Failures {
    indices: Vec<usize>,
    first_message: Option<String>,
}

impl Failures {
    fn record(&mut self, idx: usize, message: String) {
        self.indices.push(idx);
        self.first_message.get_or_insert(message);
    }

    fn into_outcome(self, output: impl FnOnce() -> JobOutput) -> Result<JobOutput, JobFailure> {
        match self.first_message {
            None => Ok(output()),
            Some(message) => Err(JobFailure {
                failed_samples: self.indices,
                message,
            }),
        }
    }
}

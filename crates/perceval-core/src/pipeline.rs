//! Evaluation pipeline: the entry point for scoring one (dataset, model,
//! variant) run.

use crate::config::EvalConfig;
use crate::datasets::{metadata_source, sample_source, MetadataSource, SampleSource};
use crate::error::{PercevalError, Result};
use crate::events::{self, Event};
use crate::extract::resolve_answer;
use crate::grader::get_grader;
use crate::judge::{Judge, OpenAiJudge};
use crate::metrics::{aggregate_scores, AggregateScores};
use crate::passk::pass_at_ks;
use crate::perception::PerceptionJudge;
use crate::persistence::{
    compute_config_fingerprint, iso_timestamp_now, ArtifactStore, ResultStore, RunMetadata,
};
use crate::types::{
    DatasetResult, GradingMode, PassAtK, ProblemId, ProblemMeta, ProblemResult, RunKey,
    SampleSet,
};
use crate::worker::{Job, JobContext, JobOutput, JobResult, Phase, WorkerPool};
use anyhow::anyhow;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run: RunKey,
    pub artifact: PathBuf,
    pub results: DatasetResult,
    pub scores: AggregateScores,
    pub omitted: Vec<ProblemId>,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The artifact already existed; nothing was evaluated or written.
    Skipped { run: RunKey, artifact: PathBuf },
    Completed(RunReport),
}

pub struct EvalPipeline {
    config: EvalConfig,
    judge: Arc<dyn Judge>,
    store: Arc<dyn ArtifactStore>,
    metadata: Box<dyn MetadataSource>,
    samples: Box<dyn SampleSource>,
    event_tx: broadcast::Sender<Event>,
}

impl EvalPipeline {
    /// Pipeline reading local inputs and writing under the configured output
    /// directory, judged by `judge`.
    pub fn new(config: EvalConfig, judge: Arc<dyn Judge>) -> Self {
        let (event_tx, _) = events::channel();
        Self {
            store: Arc::new(ResultStore::new(config.output_dir())),
            metadata: metadata_source(&config),
            samples: sample_source(&config),
            config,
            judge,
            event_tx,
        }
    }

    /// Same as [`EvalPipeline::new`] with the HTTP judge from the config.
    pub fn from_config(config: EvalConfig) -> Result<Self> {
        let judge = Arc::new(OpenAiJudge::from_config(&config.judge)?);
        Ok(Self::new(config, judge))
    }

    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_sources(
        mut self,
        metadata: Box<dyn MetadataSource>,
        samples: Box<dyn SampleSource>,
    ) -> Self {
        self.metadata = metadata;
        self.samples = samples;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Run the evaluation.
    pub async fn run(self) -> Result<RunOutcome> {
        let run = self.config.run_key();

        // Phase 1: idempotence check
        if let Some(artifact) = self.store.existing(&run) {
            info!(run = %run, artifact = %artifact.display(), "Artifact exists, skipping run");
            self.emit(Event::RunSkipped {
                run: run.clone(),
                artifact: artifact.clone(),
            });
            return Ok(RunOutcome::Skipped { run, artifact });
        }
        let start_time = iso_timestamp_now();

        // Phase 2: load inputs and build jobs
        let metadata = self.metadata.load()?;
        let mut samples = self.samples.load()?;
        let (grade_jobs, perceive_jobs, sample_count) = self.build_jobs(&metadata, &mut samples)?;

        info!(run = %run, problems = grade_jobs.len(), samples = sample_count, "Run started");
        self.emit(Event::RunStarted {
            run: run.clone(),
            problems: grade_jobs.len(),
            samples: sample_count,
        });

        // Phase 3: grading then perception on one pool
        let ctx = JobContext {
            grader: get_grader(self.config.dataset.grading, self.judge.clone()),
            perception: Arc::new(PerceptionJudge::new(
                self.judge.clone(),
                self.config.config.max_paragraphs,
            )),
        };
        let mut pool = WorkerPool::start(self.config.config.concurrency, ctx);
        let graded = self.run_phase(&mut pool, Phase::PassAtK, grade_jobs).await;
        let perceived = self.run_phase(&mut pool, Phase::Perception, perceive_jobs).await;
        pool.shutdown().await;
        let (graded, perceived) = (graded?, perceived?);

        // Phase 4: join by problem id
        let (results, omitted) = self.join(graded, perceived)?;
        let scores = aggregate_scores(&results)?;

        // Phase 5: persist
        let artifact = self.store.write(&run, &results)?;
        let metadata = RunMetadata {
            run: run.clone(),
            config_fingerprint: compute_config_fingerprint(&self.config)?,
            judge_model: Some(self.judge.model().to_string()),
            start_time: Some(start_time),
            completed_time: Some(iso_timestamp_now()),
            problems: results.len(),
            omitted: omitted.clone(),
        };
        self.store.write_metadata(&metadata)?;

        info!(
            run = %run,
            artifact = %artifact.display(),
            problems = results.len(),
            omitted = omitted.len(),
            "Run completed"
        );
        self.emit(Event::RunCompleted {
            run: run.clone(),
            artifact: artifact.clone(),
            scores: scores.clone(),
        });

        Ok(RunOutcome::Completed(RunReport {
            run,
            artifact,
            results,
            scores,
            omitted,
        }))
    }

    /// One grading job and one perception job per problem present in both
    /// inputs. Problems missing from either side are skipped.
    fn build_jobs(
        &self,
        metadata: &BTreeMap<ProblemId, ProblemMeta>,
        samples: &mut BTreeMap<ProblemId, SampleSet>,
    ) -> Result<(Vec<Job>, Vec<Job>, usize)> {
        let mut grade_jobs = Vec::new();
        let mut perceive_jobs = Vec::new();
        let mut sample_count = 0;
        let mut skipped = 0usize;

        for (problem_id, meta) in metadata {
            let Some(set) = samples.remove(problem_id) else {
                skipped += 1;
                continue;
            };
            set.validate(problem_id)?;
            sample_count += set.len();

            let candidates = match self.config.dataset.grading {
                GradingMode::Symbolic => (0..set.len())
                    .map(|i| resolve_answer(set.final_answer(i), set.reasoning_text(i)))
                    .collect(),
                GradingMode::Judged => set.raw.clone(),
            };

            grade_jobs.push(Job::Grade {
                problem_id: problem_id.clone(),
                candidates,
                ground_truth: meta.answer.clone(),
            });
            perceive_jobs.push(Job::Perceive {
                problem_id: problem_id.clone(),
                question: meta.question.clone(),
                steps: meta.reasoning_steps.clone(),
                responses: set.raw,
            });
        }

        skipped += samples.len();
        if skipped > 0 {
            debug!(skipped, "Problems without both metadata and samples skipped");
        }
        Ok((grade_jobs, perceive_jobs, sample_count))
    }

    /// Push every job, then collect exactly one result per job.
    async fn run_phase(
        &self,
        pool: &mut WorkerPool,
        phase: Phase,
        jobs: Vec<Job>,
    ) -> Result<BTreeMap<ProblemId, JobResult>> {
        let total = jobs.len();
        info!(%phase, jobs = total, "Phase started");
        self.emit(Event::PhaseStarted { phase, jobs: total });
        pool.push_batch(jobs).await;

        let mut collected = BTreeMap::new();
        let mut failed = 0;
        while collected.len() < total {
            let result = pool.recv().await.ok_or_else(|| {
                PercevalError::Internal(anyhow!("workers exited before {phase} finished"))
            })?;

            let ok = result.outcome.is_ok();
            if let Err(failure) = &result.outcome {
                failed += 1;
                warn!(
                    %phase,
                    problem_id = %result.problem_id,
                    failed_samples = ?failure.failed_samples,
                    error = %failure.message,
                    "Judge failed, problem omitted"
                );
                self.emit(Event::ProblemOmitted {
                    phase,
                    problem_id: result.problem_id.clone(),
                    failed_samples: failure.failed_samples.clone(),
                    reason: failure.message.clone(),
                });
            }
            self.emit(Event::JobCompleted {
                phase,
                problem_id: result.problem_id.clone(),
                ok,
            });
            collected.insert(result.problem_id.clone(), result);
        }

        info!(%phase, succeeded = total - failed, failed, "Phase completed");
        self.emit(Event::PhaseCompleted {
            phase,
            succeeded: total - failed,
            failed,
        });
        Ok(collected)
    }

    /// Pair grading and perception results by problem id. Problems whose
    /// grading or perception failed are omitted and returned separately.
    fn join(
        &self,
        graded: BTreeMap<ProblemId, JobResult>,
        mut perceived: BTreeMap<ProblemId, JobResult>,
    ) -> Result<(DatasetResult, Vec<ProblemId>)> {
        let mut results = DatasetResult::new();
        let mut omitted = Vec::new();

        for (problem_id, grade) in graded {
            let perception = perceived.remove(&problem_id).map(|r| r.outcome);
            match (grade.outcome, perception) {
                (
                    Ok(JobOutput::Graded {
                        correct,
                        gt_answer,
                        answers,
                    }),
                    Some(Ok(JobOutput::Perceived(perception))),
                ) => {
                    let scores = pass_at_ks(&correct, &self.config.config.pass_k);
                    let result = ProblemResult {
                        perception,
                        passk: PassAtK {
                            correct,
                            gt_answer,
                            answers,
                            scores,
                        },
                    };
                    result.check_aligned(&problem_id)?;
                    results.insert(problem_id, result);
                }
                (Ok(JobOutput::Graded { .. }), Some(Ok(JobOutput::Graded { .. })))
                | (Ok(JobOutput::Perceived(_)), _) => {
                    return Err(PercevalError::Internal(anyhow!(
                        "job results for problem {problem_id} are of the wrong kind"
                    )));
                }
                _ => omitted.push(problem_id),
            }
        }

        Ok((results, omitted))
    }

    fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }
}

//! Events emitted while a run executes.
//!
//! Subscribe through [`crate::pipeline::EvalPipeline::subscribe`] to render
//! progress or log results. Sends never block; slow subscribers lag.

use crate::metrics::AggregateScores;
use crate::types::{ProblemId, RunKey};
use crate::worker::Phase;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// The artifact for this run key already exists; nothing was evaluated.
    RunSkipped { run: RunKey, artifact: PathBuf },

    RunStarted {
        run: RunKey,
        problems: usize,
        samples: usize,
    },

    PhaseStarted { phase: Phase, jobs: usize },

    JobCompleted {
        phase: Phase,
        problem_id: ProblemId,
        ok: bool,
    },

    PhaseCompleted {
        phase: Phase,
        succeeded: usize,
        failed: usize,
    },

    /// A problem was left out of the artifact because some of its samples
    /// could not be judged.
    ProblemOmitted {
        phase: Phase,
        problem_id: ProblemId,
        failed_samples: Vec<usize>,
        reason: String,
    },

    RunCompleted {
        run: RunKey,
        artifact: PathBuf,
        scores: AggregateScores,
    },
}

pub fn channel() -> (broadcast::Sender<Event>, broadcast::Receiver<Event>) {
    broadcast::channel(1024)
}

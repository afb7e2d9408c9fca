//! Indicatif-based progress display for the CLI.
//!
//! One bar per evaluation phase, fed by the pipeline's event stream.

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use perceval_core::events::Event;
use perceval_core::worker::Phase;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::broadcast;

struct PhaseState {
    bar: ProgressBar,
    ok: u64,
    failed: u64,
}

impl PhaseState {
    fn update_message(&self, start_time: Option<Instant>) {
        let elapsed = start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0);
        let elapsed_str = if elapsed >= 60 {
            format!("{}m{}s", elapsed / 60, elapsed % 60)
        } else {
            format!("{}s", elapsed)
        };

        let msg = format!(
            "{} {} {} {} {}",
            style("✓").green(),
            style(self.ok).green().bold(),
            style("⚠").yellow(),
            style(self.failed).yellow(),
            style(elapsed_str).dim(),
        );
        self.bar.set_message(msg);
    }
}

/// Progress display using indicatif for rich terminal output.
pub struct ProgressDisplay {
    multi: MultiProgress,
    phases: Mutex<HashMap<Phase, PhaseState>>,
    start_time: Mutex<Option<Instant>>,
}

impl Default for ProgressDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressDisplay {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            phases: Mutex::new(HashMap::new()),
            start_time: Mutex::new(None),
        }
    }

    /// Process events until the channel closes.
    pub async fn run(self, mut rx: broadcast::Receiver<Event>) {
        loop {
            match rx.recv().await {
                Ok(event) => self.handle_event(event),
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    }

    fn handle_event(&self, event: Event) {
        match event {
            Event::RunStarted {
                run,
                problems,
                samples,
            } => {
                *self.start_time.lock() = Some(Instant::now());
                println!(
                    "{} Evaluating {} ({problems} problems, {samples} samples)",
                    style("→").cyan().bold(),
                    style(run).bold(),
                );
            }

            Event::PhaseStarted { phase, jobs } => {
                let bar_style = ProgressStyle::with_template(
                    "{spinner:.green} {prefix:<10} [{bar:30.cyan/blue}] {pos}/{len} {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░  ");

                let bar = self.multi.add(ProgressBar::new(jobs as u64));
                bar.set_style(bar_style);
                bar.set_prefix(phase.to_string());
                bar.enable_steady_tick(std::time::Duration::from_millis(100));

                let state = PhaseState {
                    bar,
                    ok: 0,
                    failed: 0,
                };
                state.update_message(*self.start_time.lock());
                self.phases.lock().insert(phase, state);
            }

            Event::JobCompleted { phase, ok, .. } => {
                if let Some(state) = self.phases.lock().get_mut(&phase) {
                    if ok {
                        state.ok += 1;
                    } else {
                        state.failed += 1;
                    }
                    state.bar.inc(1);
                    state.update_message(*self.start_time.lock());
                }
            }

            Event::ProblemOmitted {
                phase,
                problem_id,
                failed_samples,
                reason,
            } => {
                let line = format!(
                    "{} {problem_id} omitted: {} sample(s) failed in {phase} ({reason})",
                    style("⚠").yellow().bold(),
                    failed_samples.len(),
                );
                match self.phases.lock().get(&phase) {
                    Some(state) => state.bar.println(line),
                    None => eprintln!("{line}"),
                }
            }

            Event::PhaseCompleted { phase, .. } => {
                if let Some(state) = self.phases.lock().get(&phase) {
                    state.update_message(*self.start_time.lock());
                    state.bar.finish();
                }
            }

            Event::RunCompleted { .. } => {
                for state in self.phases.lock().values() {
                    state.bar.finish_and_clear();
                }
            }

            Event::RunSkipped { .. } => {}
        }
    }
}

//! Perception scoring: did a response pick up on the reference reasoning?

use crate::error::Result;
use crate::extract::truncate_paragraphs;
use crate::judge::{Judge, JudgeRequest};
use std::sync::Arc;

/// Render reasoning steps as a numbered list for the judge prompt.
pub fn render_steps(steps: &[String]) -> String {
    steps
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {}", i + 1, step.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct PerceptionJudge {
    judge: Arc<dyn Judge>,
    max_paragraphs: usize,
}

impl PerceptionJudge {
    pub fn new(judge: Arc<dyn Judge>, max_paragraphs: usize) -> Self {
        Self {
            judge,
            max_paragraphs,
        }
    }

    /// Judge a single response against the reference steps.
    pub async fn perceive(&self, question: &str, steps: &[String], response: &str) -> Result<bool> {
        let request = JudgeRequest::perception(
            question,
            render_steps(steps),
            truncate_paragraphs(response, self.max_paragraphs),
        );
        self.judge.judge(&request).await
    }

    /// Judge every response of a problem in order. Each entry carries its own
    /// outcome so callers can decide how to treat partial failures.
    pub async fn perceive_all(
        &self,
        question: &str,
        steps: &[String],
        responses: &[String],
    ) -> Vec<Result<bool>> {
        let mut verdicts = Vec::with_capacity(responses.len());
        for response in responses {
            verdicts.push(self.perceive(question, steps, response).await);
        }
        verdicts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::JudgeTask;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every request and answers `true` when the candidate mentions
    /// "factor".
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<JudgeRequest>>,
    }

    #[async_trait]
    impl Judge for Recorder {
        async fn judge(&self, request: &JudgeRequest) -> Result<bool> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(request.candidate.contains("factor"))
        }

        fn model(&self) -> &str {
            "recorder"
        }
    }

    #[test]
    fn steps_are_numbered() {
        let steps = vec!["factor".to_string(), " solve ".to_string()];
        assert_eq!(render_steps(&steps), "1. factor\n2. solve");
    }

    #[tokio::test]
    async fn responses_are_truncated_and_judged_in_order() {
        let recorder = Arc::new(Recorder::default());
        let judge = PerceptionJudge::new(recorder.clone(), 2);
        let responses = vec![
            "we factor\n\nthen\n\nfactor again".to_string(),
            "guess\n\nguess\n\nfactor".to_string(),
        ];
        let verdicts = judge
            .perceive_all("Q", &["factor it".to_string()], &responses)
            .await;
        let verdicts: Vec<bool> = verdicts.into_iter().map(|v| v.unwrap()).collect();
        assert_eq!(verdicts, vec![true, false]);

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].task, JudgeTask::Perception);
        assert_eq!(seen[1].candidate, "guess\n\nguess");
        assert_eq!(seen[0].reference, "1. factor it");
    }
}

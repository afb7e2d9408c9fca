//! Semantic judge: a black-box yes/no verdict from a chat-completion model.
//!
//! Both free-form answer grading and perception scoring go through the
//! [`Judge`] trait so the rest of the engine can be exercised with a
//! deterministic stub.

use crate::config::JudgeConfig;
use crate::error::{PercevalError, Result};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use serde_json::Value;
use std::env;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeTask {
    /// Does the response state the ground-truth answer?
    Equivalence,
    /// Does the response contain a step similar to the reference reasoning?
    Perception,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JudgeRequest {
    pub task: JudgeTask,
    pub context: String,
    pub reference: String,
    pub candidate: String,
}

impl JudgeRequest {
    pub fn equivalence(reference: impl Into<String>, candidate: impl Into<String>) -> Self {
        Self {
            task: JudgeTask::Equivalence,
            context: String::new(),
            reference: reference.into(),
            candidate: candidate.into(),
        }
    }

    pub fn perception(
        question: impl Into<String>,
        reference: impl Into<String>,
        candidate: impl Into<String>,
    ) -> Self {
        Self {
            task: JudgeTask::Perception,
            context: question.into(),
            reference: reference.into(),
            candidate: candidate.into(),
        }
    }

    pub fn prompt(&self) -> String {
        match self.task {
            JudgeTask::Equivalence => format!(
                "Given the model output and the ground truth below, decide whether the model output is correct.\n\
                 Return true if it is correct, otherwise return false.\n\
                 Do not provide any explanation.\n\n\
                 Model output:\n{}\n\n\
                 Ground truth:\n{}\n",
                self.candidate, self.reference
            ),
            JudgeTask::Perception => format!(
                "Decide whether part of the model output is similar to the ground truth solution.\n\
                 The ground truth solution is given as a list of reasoning steps.\n\
                 The model output does not need to match exactly: answer true if some portion of it \
                 contains a reasoning step similar in substance to any of the ground truth steps, \
                 even if its final answer differs.\n\n\
                 The question is:\n{}\n\n\
                 The ground truth solution is:\n{}\n\n\
                 The model output is:\n{}\n\n\
                 Answer in true or false.",
                self.context, self.reference, self.candidate
            ),
        }
    }
}

/// Interpret a judge reply. Only an explicit `true` counts.
pub fn parse_verdict(content: &str) -> bool {
    let normalized = content.trim().to_lowercase();
    normalized.trim_end_matches('.') == "true"
}

#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, request: &JudgeRequest) -> Result<bool>;
    fn model(&self) -> &str;
}

/// Judge backed by an OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct OpenAiJudge {
    model: String,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl OpenAiJudge {
    pub fn new(
        model: String,
        base_url: Option<String>,
        api_key: Option<String>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = base_url
            .or_else(|| env::var("JUDGE_BASE_URL").ok())
            .or_else(|| env::var("OPENAI_BASE_URL").ok())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let api_key = api_key
            .or_else(|| env::var("JUDGE_API_KEY").ok())
            .or_else(|| env::var("OPENAI_API_KEY").ok());
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PercevalError::judge(format!("failed to build http client: {e}")))?;
        Ok(Self {
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            retry,
            client,
        })
    }

    pub fn from_config(cfg: &JudgeConfig) -> Result<Self> {
        let timeout = Duration::try_from_secs_f64(cfg.timeout_seconds).map_err(|e| {
            PercevalError::judge(format!("invalid timeout {}: {e}", cfg.timeout_seconds))
        })?;
        Self::new(
            cfg.model.clone(),
            cfg.base_url.clone(),
            cfg.api_key.clone(),
            RetryPolicy::new(cfg.max_retries, cfg.backoff_ms),
            timeout,
        )
    }

    async fn complete_once(&self, api_key: &str, body: &Value) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| PercevalError::judge(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PercevalError::judge(format!("judge returned HTTP {status}")));
        }
        let json: Value = resp
            .json()
            .await
            .map_err(|e| PercevalError::judge(format!("invalid judge response: {e}")))?;
        json.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PercevalError::judge("judge response has no message content"))
    }
}

#[async_trait]
impl Judge for OpenAiJudge {
    async fn judge(&self, request: &JudgeRequest) -> Result<bool> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| PercevalError::judge("missing JUDGE_API_KEY / OPENAI_API_KEY"))?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": request.prompt()}
            ],
            "temperature": 0.0
        });

        let mut attempt = 1;
        loop {
            match self.complete_once(api_key, &body).await {
                Ok(content) => {
                    debug!(model = %self.model, verdict = %content.trim(), "judge replied");
                    return Ok(parse_verdict(&content));
                }
                Err(e) if attempt < self.retry.max_attempts() => {
                    warn!(attempt, error = %e, "judge call failed, retrying");
                    tokio::time::sleep(self.retry.backoff_duration(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

//! Artifact storage, run metadata and config fingerprinting.

use crate::config::EvalConfig;
use crate::error::Result;
use crate::types::{DatasetResult, ProblemId, RunKey};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Informational sidecar written next to each artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMetadata {
    pub run: RunKey,
    pub config_fingerprint: String,
    #[serde(default)]
    pub judge_model: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub completed_time: Option<String>,
    pub problems: usize,
    #[serde(default)]
    pub omitted: Vec<ProblemId>,
}

/// Where dataset artifacts live. One artifact per run key.
pub trait ArtifactStore: Send + Sync {
    /// Path of the artifact for `key` if it has already been written.
    fn existing(&self, key: &RunKey) -> Option<PathBuf>;
    fn write(&self, key: &RunKey, results: &DatasetResult) -> Result<PathBuf>;
    fn read(&self, key: &RunKey) -> Result<DatasetResult>;
    fn write_metadata(&self, metadata: &RunMetadata) -> Result<PathBuf>;
}

/// Filesystem store: `<root>/<dataset>/<model>_<variant>.json`.
#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_path(&self, key: &RunKey) -> PathBuf {
        self.root
            .join(&key.dataset)
            .join(format!("{}_{}.json", key.model, key.variant))
    }

    pub fn metadata_path(&self, key: &RunKey) -> PathBuf {
        self.root
            .join(&key.dataset)
            .join(format!("{}_{}.meta.json", key.model, key.variant))
    }
}

impl ArtifactStore for ResultStore {
    fn existing(&self, key: &RunKey) -> Option<PathBuf> {
        let path = self.artifact_path(key);
        path.exists().then_some(path)
    }

    fn write(&self, key: &RunKey, results: &DatasetResult) -> Result<PathBuf> {
        let path = self.artifact_path(key);
        write_json_atomic(&path, results)?;
        Ok(path)
    }

    fn read(&self, key: &RunKey) -> Result<DatasetResult> {
        load_results(self.artifact_path(key))
    }

    fn write_metadata(&self, metadata: &RunMetadata) -> Result<PathBuf> {
        let path = self.metadata_path(&metadata.run);
        write_json_atomic(&path, metadata)?;
        Ok(path)
    }
}

/// Serialize `value` as pretty JSON next to `path`, then rename into place so
/// readers never see a partially written file.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    let json = serde_json::to_string_pretty(value)?;
    tmp.write_all(json.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Read any dataset artifact back.
pub fn load_results(path: impl AsRef<Path>) -> Result<DatasetResult> {
    let data = fs::read_to_string(path.as_ref())?;
    Ok(serde_json::from_str(&data)?)
}

pub fn iso_timestamp_now() -> String {
    Utc::now().to_rfc3339()
}

/// Stable hash of everything that influences results. Credentials are not
/// serialized and so never reach the fingerprint.
pub fn compute_config_fingerprint(config: &EvalConfig) -> Result<String> {
    let value = serde_json::to_value(config)?;
    let canonical = canonical_json_string(&value);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

fn canonical_json_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => Value::String(s.clone()).to_string(),
        Value::Array(arr) => {
            let inner: Vec<String> = arr.iter().map(canonical_json_string).collect();
            format!("[{}]", inner.join(","))
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let parts: Vec<String> = entries
                .iter()
                .map(|(k, v)| {
                    format!(
                        "{}:{}",
                        Value::String((*k).clone()),
                        canonical_json_string(v)
                    )
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
    }
}

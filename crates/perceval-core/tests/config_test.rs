//! Tests for the config module.

use perceval_core::config::{
    interpolate_env_vars, load_config, load_config_from_str, load_config_with_overrides,
    ConfigOverrides,
};
use perceval_core::types::{GradingMode, Variant};
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

const MINIMAL: &str = r#"
name: trap-eval
model: m1
dataset:
  name: aime
  metadata: data/aime/metadata.json
"#;

#[test]
fn test_env_interpolation_basic() {
    std::env::set_var("EVAL_TEST_VAR_123", "hello");
    let result = interpolate_env_vars("value: ${EVAL_TEST_VAR_123}");
    assert_eq!(result, "value: hello");
    std::env::remove_var("EVAL_TEST_VAR_123");
}

#[test]
fn test_env_interpolation_with_default() {
    std::env::remove_var("EVAL_NONEXISTENT_VAR_XYZ");
    let result = interpolate_env_vars("value: ${EVAL_NONEXISTENT_VAR_XYZ:-default_value}");
    assert_eq!(result, "value: default_value");
}

#[test]
fn test_env_interpolation_missing_no_default() {
    std::env::remove_var("EVAL_NONEXISTENT_VAR_ABC");
    let result = interpolate_env_vars("value: ${EVAL_NONEXISTENT_VAR_ABC}");
    assert_eq!(result, "value: ");
}

#[test]
fn load_config_applies_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{MINIMAL}").unwrap();

    let cfg = load_config(file.path()).unwrap();
    assert_eq!(cfg.variant, Variant::Modified);
    assert_eq!(cfg.dataset.grading, GradingMode::Symbolic);
    assert_eq!(cfg.config.concurrency, 10);
    assert_eq!(cfg.config.pass_k, vec![1, 2, 4, 8, 16]);
    assert_eq!(cfg.config.max_paragraphs, 15);
    assert_eq!(cfg.judge.model, "gpt-4o-mini");
    assert_eq!(cfg.judge.max_retries, 2);
    assert_eq!(cfg.output.directory, "./eval");
    assert_eq!(
        cfg.samples_path(),
        PathBuf::from("data/aime/m1/modified_16.json")
    );
    assert_eq!(cfg.run_key().to_string(), "aime/m1/modified");
}

#[test]
fn overrides_take_precedence() {
    let overrides = ConfigOverrides {
        dataset: Some("math500".into()),
        model: Some("m2".into()),
        variant: Some(Variant::Original),
        concurrency: Some(3),
        output_dir: Some("/tmp/out".into()),
    };
    let cfg = load_config_from_str(MINIMAL, overrides).unwrap();
    assert_eq!(cfg.dataset.name, "math500");
    assert_eq!(cfg.dataset.metadata, "data/aime/metadata.json");
    assert_eq!(cfg.model, "m2");
    assert_eq!(cfg.variant, Variant::Original);
    assert_eq!(cfg.config.concurrency, 3);
    assert_eq!(cfg.output.directory, "/tmp/out");
    assert_eq!(
        cfg.samples_path(),
        PathBuf::from("data/math500/m2/original_16.json")
    );
}

#[test]
fn judged_grading_and_custom_fields_parse() {
    let yaml = r#"
name: puzzles
model: m1
variant: original
dataset:
  name: puzzle
  metadata: meta.jsonl
  samples: "runs/{model}-{variant}.json"
  grading: judged
  input_map:
    question: "{variant}_prompt"
config:
  pass_k: [1, 4]
judge:
  model: judge-x
  max_retries: 0
"#;
    let cfg = load_config_from_str(yaml, ConfigOverrides::default()).unwrap();
    assert_eq!(cfg.dataset.grading, GradingMode::Judged);
    assert_eq!(cfg.dataset.input_map.question_field(cfg.variant), "original_prompt");
    assert_eq!(cfg.dataset.input_map.answer_field(cfg.variant), "original_answer");
    assert_eq!(cfg.config.pass_k, vec![1, 4]);
    assert_eq!(cfg.judge.max_retries, 0);
    assert_eq!(cfg.samples_path(), PathBuf::from("runs/m1-original.json"));
}

#[test]
fn invalid_values_are_rejected() {
    for (snippet, expected) in [
        ("config:\n  concurrency: 0\n", "concurrency"),
        ("config:\n  pass_k: []\n", "pass_k"),
        ("config:\n  pass_k: [0, 1]\n", "pass_k"),
        ("config:\n  max_paragraphs: 0\n", "max_paragraphs"),
        ("judge:\n  timeout_seconds: -1\n", "timeout_seconds"),
        ("judge:\n  timeout_seconds: 0\n", "timeout_seconds"),
        ("judge:\n  timeout_seconds: .inf\n", "timeout_seconds"),
    ] {
        let yaml = format!("{MINIMAL}{snippet}");
        let err = load_config_from_str(&yaml, ConfigOverrides::default()).unwrap_err();
        assert!(format!("{err}").contains(expected), "{snippet}: {err}");
    }
}

#[test]
fn empty_model_is_rejected() {
    let overrides = ConfigOverrides {
        model: Some("  ".into()),
        ..Default::default()
    };
    let err = load_config_from_str(MINIMAL, overrides).unwrap_err();
    assert!(format!("{err}").contains("model"));
}

#[test]
fn missing_file_is_io_error() {
    let err = load_config_with_overrides("/nonexistent/perceval.yaml", ConfigOverrides::default())
        .unwrap_err();
    assert!(format!("{err}").contains("failed to read config"));
}

#[test]
fn yaml_values_can_reference_env() {
    std::env::set_var("EVAL_TEST_MODEL_NAME", "from-env");
    let yaml = MINIMAL.replace("model: m1", "model: ${EVAL_TEST_MODEL_NAME}");
    let cfg = load_config_from_str(&yaml, ConfigOverrides::default()).unwrap();
    std::env::remove_var("EVAL_TEST_MODEL_NAME");
    assert_eq!(cfg.model, "from-env");
}

//! Configuration layering: file < environment < command-line flags.

use std::collections::HashMap;
use std::io::Write;

use clap::Parser;
use failure_analyst::cli::Args;
use failure_analyst::config::AppConfig;
use failure_analyst::providers::Provider;

fn config_file(body: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().expect("tempfile");
    f.write_all(body.as_bytes()).expect("write");
    f
}

#[test]
fn test_file_then_env_then_flags() {
    let f = config_file(
        r#"
        [generation]
        backend = "ollama"
        model = "llama3"
        temperature = 0.3

        [chat]
        cooldown_secs = 9
        "#,
    );
    let mut cfg = AppConfig::from_file(f.path()).unwrap();
    assert_eq!(cfg.generation.model.as_deref(), Some("llama3"));

    let env: HashMap<&str, &str> = [("FA_MODEL", "mistral"), ("FA_TEMPERATURE", "0.9")].into();
    cfg.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
    assert_eq!(cfg.generation.model.as_deref(), Some("mistral"));

    let args = Args::parse_from(["fa", "fast-report", "data.json", "--model", "phi3"]);
    args.apply_overrides(&mut cfg);

    let mc = cfg.generation.model_config();
    assert_eq!(mc.backend, Provider::Ollama);
    assert_eq!(mc.model, "phi3");
    assert!((mc.temperature - 0.9).abs() < 1e-6);
    assert_eq!(cfg.chat.cooldown_secs, 9);
}

#[test]
fn test_load_explicit_path() {
    let f = config_file("[knowledge]\nweb_search = false\nmanual_depth = 5\n");
    let cfg = AppConfig::load(Some(f.path())).unwrap();
    assert!(!cfg.knowledge.web_search);
    assert_eq!(cfg.knowledge.manual_depth, 5);
}

#[test]
fn test_load_missing_path_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    assert!(AppConfig::load(Some(&missing)).is_err());
}

#[test]
fn test_out_of_range_temperature_is_clamped() {
    let f = config_file("[generation]\ntemperature = 7.5\n");
    let cfg = AppConfig::from_file(f.path()).unwrap();
    assert_eq!(cfg.generation.model_config().temperature, 2.0);
}

#[test]
fn test_unknown_backend_in_file_rejected() {
    let f = config_file("[generation]\nbackend = \"bedrock\"\n");
    assert!(AppConfig::from_file(f.path()).is_err());
}

#[test]
fn test_no_llm_flag_disables_generation() {
    let mut cfg = AppConfig::default();
    Args::parse_from(["fa", "unknown", "d.json", "--no-llm"]).apply_overrides(&mut cfg);
    assert!(!cfg.generation.enabled);
}

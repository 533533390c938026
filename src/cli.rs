use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::cache::ReportKind;
use crate::config::AppConfig;
use crate::prompts::SectionKind;
use crate::providers::Provider;

#[derive(Parser, Debug)]
#[command(name = "failure-analyst")]
#[command(version)]
#[command(about = "Failure analysis and question answering over equipment failure datasets")]
pub struct Args {
    /// Config file (defaults to ./failure-analyst.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Generation backend
    #[arg(long, value_enum, global = true)]
    pub backend: Option<Provider>,

    /// Model name (e.g. qwen2.5-coder:1.5b, gpt-4o-mini)
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Sampling temperature, clamped to 0.0-2.0
    #[arg(long, global = true)]
    pub temperature: Option<f32>,

    /// Disable text generation entirely
    #[arg(long, global = true)]
    pub no_llm: bool,

    /// Print machine-readable JSON instead of formatted text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload a dataset, run the background failure analysis and print a report
    Analyze {
        /// Dataset as JSON (`{"columns":[..],"rows":[[..]]}` or an array of records)
        data: PathBuf,

        /// Machine the data was recorded on
        #[arg(long)]
        machine: Option<String>,

        /// Failure-mode definition, NAME=TEXT (repeatable)
        #[arg(long = "define", value_parser = parse_definition)]
        definitions: Vec<(String, String)>,

        /// Report slot to print
        #[arg(long, default_value = "combined")]
        kind: ReportKind,

        /// Normalize the report down to one section
        #[arg(long)]
        section: Option<SectionKind>,
    },

    /// Ask one question about a dataset
    Ask {
        data: PathBuf,
        question: String,
    },

    /// Interactive question loop over a dataset (one question per line)
    Chat { data: PathBuf },

    /// Print the instant failure-mode breakdown
    FastReport { data: PathBuf },

    /// Print correlation and sensor-shift findings
    Correlations { data: PathBuf },

    /// List failure modes that still need a definition
    Unknown {
        data: PathBuf,

        #[arg(long = "define", value_parser = parse_definition)]
        definitions: Vec<(String, String)>,
    },
}

/// Parse `NAME=TEXT`.
pub fn parse_definition(s: &str) -> Result<(String, String), String> {
    let (name, text) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=TEXT, got '{s}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty failure-mode name in '{s}'"));
    }
    Ok((name.to_string(), text.trim().to_string()))
}

impl Args {
    /// Flags win over the file and the environment.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(backend) = self.backend {
            if config.generation.backend != backend && self.model.is_none() {
                config.generation.model = None;
            }
            config.generation.backend = backend;
        }
        if let Some(model) = &self.model {
            config.generation.model = Some(model.clone());
        }
        if let Some(t) = self.temperature {
            config.generation.temperature = t;
        }
        if self.no_llm {
            config.generation.enabled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_definition() {
        assert_eq!(
            parse_definition("HDF=Heat Dissipation Failure").unwrap(),
            ("HDF".to_string(), "Heat Dissipation Failure".to_string())
        );
        assert_eq!(parse_definition("TWF = a=b").unwrap().1, "a=b");
        assert!(parse_definition("HDF").is_err());
        assert!(parse_definition("=x").is_err());
    }

    #[test]
    fn test_args_parse_analyze() {
        let args = Args::parse_from([
            "fa",
            "analyze",
            "data.json",
            "--define",
            "HDF=Heat",
            "--define",
            "TWF=Tool",
            "--section",
            "why",
        ]);
        match args.command {
            Command::Analyze { data, definitions, kind, section, machine } => {
                assert_eq!(data, PathBuf::from("data.json"));
                assert_eq!(definitions.len(), 2);
                assert_eq!(kind, ReportKind::Combined);
                assert_eq!(section, Some(SectionKind::RootCause));
                assert!(machine.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from(["fa", "ask", "d.json", "why?", "--backend", "anthropic", "--no-llm"]);
        assert_eq!(args.backend, Some(Provider::Anthropic));
        assert!(args.no_llm);
    }

    #[test]
    fn test_overrides_reset_model_on_backend_switch() {
        let mut cfg = AppConfig::default();
        cfg.generation.model = Some("llama3".into());
        let args = Args::parse_from(["fa", "fast-report", "d.json", "--backend", "openai", "--temperature", "0.7"]);
        args.apply_overrides(&mut cfg);
        let mc = cfg.generation.model_config();
        assert_eq!(mc.backend, Provider::Openai);
        assert_eq!(mc.model, "gpt-4o-mini");
        assert!((mc.temperature - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_overrides_explicit_model_kept() {
        let mut cfg = AppConfig::default();
        let args = Args::parse_from(["fa", "chat", "d.json", "--backend", "openai", "--model", "gpt-4o"]);
        args.apply_overrides(&mut cfg);
        assert_eq!(cfg.generation.model_config().model, "gpt-4o");
        assert!(cfg.generation.enabled);
    }
}

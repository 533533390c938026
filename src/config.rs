//! Runtime configuration.
//!
//! Layering: built-in defaults < TOML file < environment < CLI flags (applied
//! by `main`). [`ModelConfig`] is the only part that changes after startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AnalystError, Result};
use crate::providers::Provider;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "failure-analyst.toml";

/// Backend selection read by every generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub backend: Provider,
    pub model: String,
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: Provider::Ollama,
            model: Provider::Ollama.default_model().to_string(),
            temperature: 0.1,
        }
    }
}

impl ModelConfig {
    pub const MIN_TEMPERATURE: f32 = 0.0;
    pub const MAX_TEMPERATURE: f32 = 2.0;

    pub fn set_temperature(&mut self, t: f32) -> f32 {
        self.temperature = if t.is_nan() {
            self.temperature
        } else {
            t.clamp(Self::MIN_TEMPERATURE, Self::MAX_TEMPERATURE)
        };
        self.temperature
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub enabled: bool,
    pub backend: Provider,
    pub model: Option<String>,
    pub temperature: f32,
    pub ollama_url: String,
    pub openai_url: String,
    pub anthropic_url: String,
    pub max_tokens: u32,
    pub connect_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: Provider::Ollama,
            model: None,
            temperature: 0.1,
            ollama_url: "http://localhost:11434".to_string(),
            openai_url: "https://api.openai.com/v1/chat/completions".to_string(),
            anthropic_url: "https://api.anthropic.com/v1/messages".to_string(),
            max_tokens: 2048,
            connect_timeout_secs: 5,
        }
    }
}

impl GenerationConfig {
    pub fn model_config(&self) -> ModelConfig {
        let mut mc = ModelConfig {
            backend: self.backend,
            model: self
                .model
                .clone()
                .unwrap_or_else(|| self.backend.default_model().to_string()),
            temperature: 0.1,
        };
        mc.set_temperature(self.temperature);
        mc
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Directory of `.txt` / `.md` repair manuals indexed at startup.
    pub manual_dir: Option<PathBuf>,
    /// Number of manual excerpts attached to the combined analysis prompt.
    pub manual_depth: usize,
    pub web_search: bool,
    pub web_search_url: String,
    /// Character budget for a web-search definition.
    pub web_snippet_chars: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            manual_dir: None,
            manual_depth: 3,
            web_search: true,
            web_search_url: "https://api.duckduckgo.com/".to_string(),
            web_snippet_chars: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub cooldown_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self { cooldown_secs: 5 }
    }
}

impl ChatConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SandboxConfig {
    /// Program and arguments of the external execution sandbox. When empty,
    /// generated code is never executed.
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub generation: GenerationConfig,
    pub knowledge: KnowledgeConfig,
    pub chat: ChatConfig,
    pub sandbox: SandboxConfig,
}

impl AppConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| AnalystError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Load `path` if given, else [`DEFAULT_CONFIG_FILE`] when it exists, else
    /// defaults; then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        cfg.apply_env(|k| std::env::var(k).ok())?;
        Ok(cfg)
    }

    /// Apply `FA_*` / `OLLAMA_URL` overrides using `lookup` as the environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(b) = lookup("FA_BACKEND") {
            self.generation.backend = b.parse().map_err(AnalystError::Config)?;
        }
        if let Some(m) = lookup("FA_MODEL") {
            self.generation.model = Some(m);
        }
        if let Some(t) = lookup("FA_TEMPERATURE") {
            self.generation.temperature = t
                .parse()
                .map_err(|_| AnalystError::Config(format!("FA_TEMPERATURE is not a number: {t}")))?;
        }
        if let Some(url) = lookup("OLLAMA_URL") {
            self.generation.ollama_url = url;
        }
        if let Some(c) = lookup("FA_CHAT_COOLDOWN_SECS") {
            self.chat.cooldown_secs = c
                .parse()
                .map_err(|_| AnalystError::Config(format!("FA_CHAT_COOLDOWN_SECS is not an integer: {c}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert!(cfg.generation.enabled);
        assert_eq!(cfg.generation.backend, Provider::Ollama);
        assert_eq!(cfg.chat.cooldown_secs, 5);
        assert_eq!(cfg.knowledge.web_snippet_chars, 200);
        assert!(cfg.sandbox.command.is_empty());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = AppConfig::from_toml_str(
            r#"
            [generation]
            backend = "openai"
            temperature = 0.4

            [chat]
            cooldown_secs = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.generation.backend, Provider::Openai);
        assert_eq!(cfg.generation.model_config().model, "gpt-4o-mini");
        assert!((cfg.generation.model_config().temperature - 0.4).abs() < 1e-6);
        assert_eq!(cfg.chat.cooldown_secs, 2);
        assert_eq!(cfg.knowledge.manual_depth, 3);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = AppConfig::from_toml_str("[generation\n").unwrap_err();
        assert!(matches!(err, AnalystError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[sandbox]\ncommand = [\"python3\", \"sandbox.py\"]").unwrap();
        let cfg = AppConfig::from_file(f.path()).unwrap();
        assert_eq!(cfg.sandbox.command, vec!["python3", "sandbox.py"]);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut cfg = AppConfig::from_toml_str("[generation]\nmodel = \"llama3\"").unwrap();
        let env: HashMap<&str, &str> = [("FA_MODEL", "mistral"), ("FA_BACKEND", "anthropic")].into();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.generation.model.as_deref(), Some("mistral"));
        assert_eq!(cfg.generation.backend, Provider::Anthropic);
    }

    #[test]
    fn test_env_bad_temperature_rejected() {
        let mut cfg = AppConfig::default();
        let err = cfg
            .apply_env(|k| (k == "FA_TEMPERATURE").then(|| "hot".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("FA_TEMPERATURE"));
    }

    #[test]
    fn test_temperature_is_clamped() {
        let mut mc = ModelConfig::default();
        assert_eq!(mc.set_temperature(5.0), 2.0);
        assert_eq!(mc.set_temperature(-1.0), 0.0);
        assert_eq!(mc.set_temperature(f32::NAN), 0.0);
    }
}

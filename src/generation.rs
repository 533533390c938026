//! Text-generation seam.
//!
//! The engine is an opaque completion function: full prompt in, completion
//! text out, or a transport error. [`PromptRunner`] is the only place that
//! picks a system prompt, and it does so purely from a [`SystemType`].

use std::env;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::config::{GenerationConfig, ModelConfig};
use crate::error::{AnalystError, Result};
use crate::prompts::{compose, SystemType};
use crate::providers::*;

/// Returned instead of calling the backend when generation is switched off.
pub const LLM_DISABLED: &str = "LLM disabled.";

/// Synchronous-from-the-caller completion function.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// HttpGenerator: Ollama / OpenAI / Anthropic over reqwest
// ---------------------------------------------------------------------------

/// Calls whichever backend the shared [`ModelConfig`] names at call time.
pub struct HttpGenerator {
    client: Client,
    model: Arc<RwLock<ModelConfig>>,
    config: GenerationConfig,
    openai_key: Option<String>,
    anthropic_key: Option<String>,
}

impl HttpGenerator {
    pub fn new(config: GenerationConfig, model: Arc<RwLock<ModelConfig>>) -> Self {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .unwrap_or_default();
        Self {
            client,
            model,
            config,
            openai_key: env::var("OPENAI_API_KEY").ok(),
            anthropic_key: env::var("ANTHROPIC_API_KEY").ok(),
        }
    }

    fn snapshot(&self) -> ModelConfig {
        match self.model.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    async fn generate_ollama(&self, model: &ModelConfig, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.config.ollama_url.trim_end_matches('/'));
        let request = OllamaGenerateRequest {
            model: model.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            options: OllamaOptions { temperature: model.temperature },
        };
        let response = self.client.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AnalystError::GenerationTransport(format!(
                "Ollama returned HTTP {status}: {error_text}"
            )));
        }
        let body: OllamaGenerateResponse = response.json().await?;
        if let Some(err) = body.error {
            return Err(AnalystError::GenerationTransport(format!("Ollama error: {err}")));
        }
        Ok(body.response.trim().to_string())
    }

    async fn generate_openai(&self, model: &ModelConfig, prompt: &str) -> Result<String> {
        let key = self.openai_key.as_deref().ok_or_else(|| {
            AnalystError::GenerationTransport(
                "OPENAI_API_KEY not set. Export it or pass via environment.".into(),
            )
        })?;
        let request = OpenAIChatRequest {
            model: model.model.clone(),
            messages: vec![OpenAIChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: false,
            temperature: model.temperature,
        };
        let response = self
            .client
            .post(&self.config.openai_url)
            .header("Authorization", format!("Bearer {key}"))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AnalystError::GenerationTransport(format!("OpenAI API error: {error_text}")));
        }
        let body: OpenAIChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| AnalystError::GenerationTransport("OpenAI returned no choices".into()))
    }

    async fn generate_anthropic(&self, model: &ModelConfig, prompt: &str) -> Result<String> {
        let key = self.anthropic_key.as_deref().ok_or_else(|| {
            AnalystError::GenerationTransport(
                "ANTHROPIC_API_KEY not set. Export it or pass via environment.".into(),
            )
        })?;
        let request = AnthropicRequest {
            model: model.model.clone(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: self.config.max_tokens,
            temperature: model.temperature,
        };
        let response = self
            .client
            .post(&self.config.anthropic_url)
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AnalystError::GenerationTransport(format!(
                "Anthropic API error: {error_text}"
            )));
        }
        let body: AnthropicResponse = response.json().await?;
        Ok(body.text().trim().to_string())
    }
}

#[async_trait]
impl TextGenerator for HttpGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let model = self.snapshot();
        debug!(backend = %model.backend, model = %model.model, chars = prompt.len(), "generation call");
        match model.backend {
            Provider::Ollama => self.generate_ollama(&model, prompt).await,
            Provider::Openai => self.generate_openai(&model, prompt).await,
            Provider::Anthropic => self.generate_anthropic(&model, prompt).await,
        }
    }
}

// ---------------------------------------------------------------------------
// PromptRunner: system prompt selection
// ---------------------------------------------------------------------------

/// Wraps a generator with system-prompt selection and the global kill switch.
#[derive(Clone)]
pub struct PromptRunner {
    generator: Arc<dyn TextGenerator>,
    enabled: bool,
}

impl PromptRunner {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator, enabled: true }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// One generation call with the system prompt for `system`.
    pub async fn run(&self, prompt: &str, system: SystemType) -> Result<String> {
        if !self.enabled {
            return Ok(LLM_DISABLED.to_string());
        }
        let full = compose(system.system_prompt(), prompt);
        self.generator.generate(&full).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextGenerator for Recorder {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.seen.lock().unwrap().push(prompt.to_string());
            Ok("ok".into())
        }
    }

    #[tokio::test]
    async fn test_runner_prefixes_system_prompt() {
        let rec = Arc::new(Recorder { seen: Mutex::new(vec![]) });
        let runner = PromptRunner::new(rec.clone());
        let out = runner.run("count rows", SystemType::Code).await.unwrap();
        assert_eq!(out, "ok");
        let seen = rec.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with(SystemType::Code.system_prompt()));
        assert!(seen[0].ends_with("User Request:\ncount rows"));
    }

    #[tokio::test]
    async fn test_disabled_runner_skips_generator() {
        let rec = Arc::new(Recorder { seen: Mutex::new(vec![]) });
        let runner = PromptRunner::new(rec.clone()).with_enabled(false);
        let out = runner.run("x", SystemType::Failure).await.unwrap();
        assert_eq!(out, LLM_DISABLED);
        assert!(rec.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_ollama_is_transport_error() {
        let config = GenerationConfig {
            ollama_url: "http://127.0.0.1:9".to_string(),
            connect_timeout_secs: 1,
            ..GenerationConfig::default()
        };
        let generator = HttpGenerator::new(config, Arc::new(RwLock::new(ModelConfig::default())));
        let err = generator.generate("hi").await.unwrap_err();
        assert!(matches!(err, AnalystError::GenerationTransport(_)));
    }

    #[tokio::test]
    async fn test_openai_without_key_is_transport_error() {
        let model = ModelConfig {
            backend: Provider::Openai,
            model: "gpt-4o-mini".into(),
            temperature: 0.1,
        };
        let mut generator = HttpGenerator::new(GenerationConfig::default(), Arc::new(RwLock::new(model)));
        generator.openai_key = None;
        let err = generator.generate("hi").await.unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }
}

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Ollama,
    Openai,
    Anthropic,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Ollama => write!(f, "ollama"),
            Provider::Openai => write!(f, "openai"),
            Provider::Anthropic => write!(f, "anthropic"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Provider::Ollama),
            "openai" => Ok(Provider::Openai),
            "anthropic" => Ok(Provider::Anthropic),
            other => Err(format!("Unknown backend: {other}")),
        }
    }
}

impl Provider {
    /// Model used when the configuration does not name one.
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Ollama => "qwen2.5-coder:1.5b",
            Provider::Openai => "gpt-4o-mini",
            Provider::Anthropic => "claude-sonnet-4-20250514",
        }
    }
}

// -- Ollama /api/generate types ---------------------------------------------

#[derive(Debug, Serialize)]
pub struct OllamaOptions {
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
pub struct OllamaGenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub options: OllamaOptions,
}

#[derive(Debug, Deserialize)]
pub struct OllamaGenerateResponse {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub error: Option<String>,
}

// -- OpenAI chat completion types -------------------------------------------

#[derive(Debug, Serialize)]
pub struct OpenAIChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct OpenAIChatRequest {
    pub model: String,
    pub messages: Vec<OpenAIChatMessage>,
    pub stream: bool,
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIMessage {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIChoice {
    pub message: OpenAIMessage,
    #[allow(dead_code)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIChatResponse {
    pub choices: Vec<OpenAIChoice>,
}

// -- Anthropic messages types -----------------------------------------------

#[derive(Debug, Serialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    pub content: Vec<AnthropicContentBlock>,
}

impl AnthropicResponse {
    /// Concatenated text of every `text` block.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_display() {
        assert_eq!(Provider::Ollama.to_string(), "ollama");
        assert_eq!(Provider::Openai.to_string(), "openai");
        assert_eq!(Provider::Anthropic.to_string(), "anthropic");
    }

    #[test]
    fn test_provider_from_str_is_case_insensitive() {
        assert_eq!("OpenAI".parse::<Provider>().unwrap(), Provider::Openai);
        assert_eq!(" ollama ".parse::<Provider>().unwrap(), Provider::Ollama);
        assert!("gemini".parse::<Provider>().is_err());
    }

    #[test]
    fn test_provider_default_is_ollama() {
        assert_eq!(Provider::default(), Provider::Ollama);
        assert_eq!(Provider::default().default_model(), "qwen2.5-coder:1.5b");
    }

    #[test]
    fn test_provider_serde_lowercase() {
        let json = serde_json::to_string(&Provider::Anthropic).expect("serialize");
        assert_eq!(json, "\"anthropic\"");
        let back: Provider = serde_json::from_str("\"openai\"").expect("deser");
        assert_eq!(back, Provider::Openai);
    }

    #[test]
    fn test_ollama_request_serializes() {
        let req = OllamaGenerateRequest {
            model: "qwen2.5-coder:1.5b".to_string(),
            prompt: "hello".to_string(),
            stream: false,
            options: OllamaOptions { temperature: 0.1 },
        };
        let parsed: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&req).expect("serialize")).expect("parse");
        assert_eq!(parsed["stream"], false);
        assert_eq!(parsed["model"], "qwen2.5-coder:1.5b");
        assert!((parsed["options"]["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_ollama_response_deserializes() {
        let json = r#"{"model":"m","response":"- bullet","done":true}"#;
        let resp: OllamaGenerateResponse = serde_json::from_str(json).expect("deser failed");
        assert_eq!(resp.response, "- bullet");
        assert!(resp.error.is_none());
    }

    #[test]
    fn test_ollama_error_deserializes() {
        let json = r#"{"error":"model not found"}"#;
        let resp: OllamaGenerateResponse = serde_json::from_str(json).expect("deser failed");
        assert_eq!(resp.error.as_deref(), Some("model not found"));
        assert!(resp.response.is_empty());
    }

    #[test]
    fn test_openai_response_deserializes() {
        let json = r#"{"id":"chatcmpl-abc","choices":[{"index":0,"message":{"role":"assistant","content":"Hi"},"finish_reason":"stop"}]}"#;
        let resp: OpenAIChatResponse = serde_json::from_str(json).expect("deser failed");
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("Hi"));
    }

    #[test]
    fn test_openai_response_no_choices() {
        let json = r#"{"id":"chatcmpl-x","choices":[]}"#;
        let resp: OpenAIChatResponse = serde_json::from_str(json).expect("deser");
        assert!(resp.choices.is_empty());
    }

    #[test]
    fn test_anthropic_response_joins_text_blocks() {
        let json = r#"{"id":"msg_1","content":[{"type":"text","text":"A"},{"type":"tool_use","id":"x"},{"type":"text","text":"B"}]}"#;
        let resp: AnthropicResponse = serde_json::from_str(json).expect("deser");
        assert_eq!(resp.text(), "AB");
    }

    #[test]
    fn test_anthropic_request_serializes() {
        let req = AnthropicRequest {
            model: "claude".into(),
            messages: vec![AnthropicMessage { role: "user".into(), content: "q".into() }],
            max_tokens: 1024,
            temperature: 0.1,
        };
        let json = serde_json::to_string(&req).expect("serialize");
        assert!(json.contains("\"max_tokens\":1024"));
        assert!(json.contains("\"role\":\"user\""));
    }
}

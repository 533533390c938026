//! Request-handling facade over the agent, the analysis cache and settings.
//!
//! Every public operation here corresponds to one user action: upload a
//! dataset, ask a question, read a report, change a setting.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::agent::{Agent, Turn};
use crate::cache::{AnalysisHandle, AnalysisJob, ReportKind, ReportRead, ReportStatus};
use crate::config::{AppConfig, ModelConfig};
use crate::dataset::Dataset;
use crate::error::{AnalystError, Result};
use crate::executor::{DisabledBridge, ExecutionBridge, SubprocessBridge};
use crate::generation::{HttpGenerator, PromptRunner, TextGenerator};
use crate::knowledge::{
    DuckDuckGoSearch, EmptyManualIndex, KeywordManualIndex, KnowledgeResolver, ManualIndex, NoWebSearch,
    WebSearch,
};
use crate::normalizer::normalize;
use crate::prompts::SectionKind;
use crate::providers::Provider;
use crate::rate_limit::Cooldown;
use crate::state::AppState;
use crate::stats::{correlation_narrative, failure_stats, fast_failure_report};

/// Question used for the one-shot reliability overview.
pub const AUTO_ANALYSIS_QUESTION: &str = "Perform a comprehensive reliability analysis...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    WaitingForDefinitions,
    AnalysisStarted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadSummary {
    pub message: String,
    pub rows: usize,
    pub columns: usize,
    pub failure_count: u64,
    pub unknown_acronyms: Vec<String>,
    pub status: UploadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<AnalysisHandle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatReply {
    Answer(String),
    Error(String),
}

/// Pluggable collaborators. [`Backends::from_config`] builds the real ones.
pub struct Backends {
    pub generator: Arc<dyn TextGenerator>,
    pub bridge: Arc<dyn ExecutionBridge>,
    pub manuals: Arc<dyn ManualIndex>,
    pub web: Arc<dyn WebSearch>,
}

impl Backends {
    pub fn from_config(config: &AppConfig, state: &AppState) -> Result<Self> {
        let generator: Arc<dyn TextGenerator> =
            Arc::new(HttpGenerator::new(config.generation.clone(), state.model_handle()));

        let bridge: Arc<dyn ExecutionBridge> = if config.sandbox.command.is_empty() {
            Arc::new(DisabledBridge)
        } else {
            Arc::new(SubprocessBridge::new(&config.sandbox.command)?)
        };

        let manuals: Arc<dyn ManualIndex> = match &config.knowledge.manual_dir {
            Some(dir) => Arc::new(KeywordManualIndex::from_dir(dir)?),
            None => Arc::new(EmptyManualIndex),
        };

        let web: Arc<dyn WebSearch> = if config.knowledge.web_search {
            Arc::new(DuckDuckGoSearch::new(config.knowledge.web_search_url.clone()))
        } else {
            Arc::new(NoWebSearch)
        };

        Ok(Self {
            generator,
            bridge,
            manuals,
            web,
        })
    }
}

pub struct AnalystService {
    state: Arc<AppState>,
    agent: Agent,
    job: Arc<AnalysisJob>,
    cooldown: Cooldown,
}

impl AnalystService {
    /// Build the service with HTTP generation and the configured sandbox,
    /// manuals and web search.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let state = Arc::new(AppState::new(config.generation.model_config()));
        let backends = Backends::from_config(config, &state)?;
        Ok(Self::assemble(config, state, backends))
    }

    pub fn assemble(config: &AppConfig, state: Arc<AppState>, backends: Backends) -> Self {
        let runner = PromptRunner::new(backends.generator).with_enabled(config.generation.enabled);
        let resolver = KnowledgeResolver::new(backends.manuals, Arc::clone(state.acronyms()), backends.web)
            .with_snippet_chars(config.knowledge.web_snippet_chars);
        let job = AnalysisJob::new(runner.clone(), resolver).with_manual_depth(config.knowledge.manual_depth);
        Self {
            agent: Agent::new(runner, backends.bridge),
            job: Arc::new(job),
            cooldown: Cooldown::new(config.chat.cooldown()),
            state,
        }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    // -- dataset ---------------------------------------------------------

    /// Replace the dataset and, when every failure mode is already defined,
    /// start the background analysis. Must be called inside a Tokio runtime.
    pub fn upload(&self, dataset: Dataset, machine_name: Option<String>) -> UploadSummary {
        let rows = dataset.n_rows();
        let columns = dataset.n_cols();
        let dataset = self.state.set_dataset(dataset, machine_name);
        self.state.cache().clear();

        let (failure_count, unknown_acronyms) = match failure_stats(&dataset) {
            Ok(stats) => {
                let unknown = self
                    .state
                    .acronyms()
                    .unknown(stats.modes.iter().map(|m| m.name.as_str()));
                (stats.total_failures, unknown)
            }
            Err(AnalystError::NoTargetColumn) => (rows as u64, Vec::new()),
            Err(_) => (0, Vec::new()),
        };

        let (status, message, run) = if unknown_acronyms.is_empty() {
            let run = self.state.cache().trigger(Arc::clone(&self.job), dataset);
            (
                UploadStatus::AnalysisStarted,
                "Dataset uploaded. Analysis starting...",
                Some(run),
            )
        } else {
            (
                UploadStatus::WaitingForDefinitions,
                "Dataset uploaded. Please define failure modes.",
                None,
            )
        };
        info!(rows, columns, failure_count, ?status, "dataset uploaded");

        UploadSummary {
            message: message.to_string(),
            rows,
            columns,
            failure_count,
            unknown_acronyms,
            status,
            run,
        }
    }

    /// Restart the background analysis on the current dataset.
    pub fn start_analysis(&self) -> Result<AnalysisHandle> {
        let dataset = self.state.require_dataset()?;
        Ok(self.state.cache().trigger(Arc::clone(&self.job), dataset))
    }

    /// Wait for the current background run to finish.
    pub async fn wait_for_analysis(&self) {
        self.state.cache().join().await;
    }

    // -- chat ------------------------------------------------------------

    pub async fn chat(&self, question: &str) -> ChatReply {
        if let Err(e) = self.cooldown.check() {
            warn!(error = %e, "chat request rejected");
            return ChatReply::Error(e.to_string());
        }
        match self.ask(question).await {
            Ok(answer) => ChatReply::Answer(answer),
            Err(e) => ChatReply::Error(e.to_string()),
        }
    }

    /// Run the agent loop without the chat cooldown.
    pub async fn ask(&self, question: &str) -> Result<String> {
        let dataset = self.state.dataset();
        self.agent.run(dataset.as_deref(), question).await
    }

    pub async fn auto_analysis(&self) -> Result<String> {
        self.ask(AUTO_ANALYSIS_QUESTION).await
    }

    pub fn history(&self) -> Vec<Turn> {
        self.agent.history()
    }

    // -- reports ---------------------------------------------------------

    pub fn report(&self, kind: ReportKind) -> ReportRead {
        self.state.cache().read(kind)
    }

    /// Cached report filtered down to one section.
    pub fn report_section(&self, kind: ReportKind, section: SectionKind) -> ReportRead {
        let read = self.report(kind);
        match read.status {
            ReportStatus::Ready => ReportRead {
                text: normalize(&read.text, section),
                status: ReportStatus::Ready,
            },
            _ => read,
        }
    }

    pub fn fast_report(&self) -> Result<String> {
        let dataset = self.state.require_dataset()?;
        Ok(fast_failure_report(&dataset))
    }

    pub fn correlation_report(&self) -> Result<String> {
        let dataset = self.state.require_dataset()?;
        Ok(correlation_narrative(&dataset))
    }

    // -- acronyms --------------------------------------------------------

    pub fn define_acronyms(&self, definitions: HashMap<String, String>) -> usize {
        let total = self.state.acronyms().extend(definitions);
        info!(total, "acronyms updated");
        total
    }

    /// Failure modes of the current dataset with no user definition.
    pub fn unknown_acronyms(&self) -> Result<Vec<String>> {
        let dataset = self.state.require_dataset()?;
        Ok(match failure_stats(&dataset) {
            Ok(stats) => self
                .state
                .acronyms()
                .unknown(stats.modes.iter().map(|m| m.name.as_str())),
            Err(_) => Vec::new(),
        })
    }

    // -- model settings --------------------------------------------------

    pub fn model_config(&self) -> ModelConfig {
        self.state.model()
    }

    pub fn set_model(&self, model: &str) -> String {
        self.state.update_model(|m| m.model = model.to_string());
        info!(model, "model switched");
        format!("Model switched to {model}")
    }

    pub fn set_temperature(&self, temperature: f32) -> f32 {
        let applied = self.state.update_model(|m| m.set_temperature(temperature));
        info!(requested = temperature, applied, "temperature updated");
        applied
    }

    /// Switch backend; the model resets to the backend's default.
    pub fn set_backend(&self, backend: Provider) -> ModelConfig {
        self.state.update_model(|m| {
            m.backend = backend;
            m.model = backend.default_model().to_string();
            m.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Fixed(&'static str);

    #[async_trait]
    impl TextGenerator for Fixed {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn service(reply: &'static str) -> AnalystService {
        let config = AppConfig::default();
        let state = Arc::new(AppState::new(config.generation.model_config()));
        let backends = Backends {
            generator: Arc::new(Fixed(reply)),
            bridge: Arc::new(DisabledBridge),
            manuals: Arc::new(EmptyManualIndex),
            web: Arc::new(NoWebSearch),
        };
        AnalystService::assemble(&config, state, backends)
    }

    fn machine_data() -> Dataset {
        Dataset::builder()
            .numeric("Torque", vec![40.0, 62.0, 41.0, 64.0])
            .numeric("Machine failure", vec![0.0, 1.0, 0.0, 1.0])
            .numeric("HDF", vec![0.0, 1.0, 0.0, 1.0])
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_with_unknown_modes_waits() {
        let svc = service("report");
        let summary = svc.upload(machine_data(), Some("Mill 7".into()));
        assert_eq!(summary.status, UploadStatus::WaitingForDefinitions);
        assert_eq!(summary.unknown_acronyms, vec!["HDF"]);
        assert_eq!(summary.failure_count, 2);
        assert!(summary.run.is_none());
        assert_eq!(svc.report(ReportKind::Why).status, ReportStatus::NotFound);
        assert_eq!(svc.state().machine_name().as_deref(), Some("Mill 7"));
    }

    #[tokio::test]
    async fn test_upload_with_known_modes_starts_analysis() {
        let svc = service("Bearing overheating driven by load");
        svc.define_acronyms([("HDF".to_string(), "Heat Dissipation Failure".to_string())].into());
        let summary = svc.upload(machine_data(), None);
        assert_eq!(summary.status, UploadStatus::AnalysisStarted);
        assert!(summary.run.is_some());

        svc.wait_for_analysis().await;
        let read = svc.report(ReportKind::Combined);
        assert_eq!(read.status, ReportStatus::Ready);
        assert_eq!(read.text, "Bearing overheating driven by load");

        let section = svc.report_section(ReportKind::Why, SectionKind::RootCause);
        assert_eq!(section.text, "Root Cause Summary\n- Bearing overheating driven by load");
    }

    #[tokio::test]
    async fn test_no_target_counts_every_row() {
        let svc = service("x");
        let ds = Dataset::builder().numeric("Torque", vec![1.0, 2.0, 3.0]).build().unwrap();
        let summary = svc.upload(ds, None);
        assert_eq!(summary.failure_count, 3);
        assert_eq!(summary.status, UploadStatus::AnalysisStarted);
        svc.wait_for_analysis().await;
        assert_eq!(
            svc.report(ReportKind::Fix).text,
            "Analysis Skipped: No target column found"
        );
    }

    #[tokio::test]
    async fn test_start_analysis_requires_dataset() {
        let svc = service("x");
        assert!(matches!(svc.start_analysis(), Err(AnalystError::NoDataset)));
        assert!(matches!(svc.unknown_acronyms(), Err(AnalystError::NoDataset)));
    }

    #[tokio::test]
    async fn test_chat_without_dataset_is_error_reply() {
        let svc = service("x");
        assert_eq!(svc.chat("hello").await, ChatReply::Error("Dataset not loaded".into()));
    }

    #[test]
    fn test_fast_and_correlation_reports_read_current_dataset() {
        let svc = service("x");
        assert!(matches!(svc.fast_report(), Err(AnalystError::NoDataset)));
        assert!(matches!(svc.correlation_report(), Err(AnalystError::NoDataset)));

        svc.state().set_dataset(machine_data(), None);
        assert!(svc.fast_report().unwrap().contains("HDF"));
        assert!(!svc.correlation_report().unwrap().is_empty());
    }

    #[test]
    fn test_model_settings() {
        let svc = service("x");
        assert_eq!(svc.set_model("llama3"), "Model switched to llama3");
        assert_eq!(svc.set_temperature(3.5), 2.0);
        let mc = svc.set_backend(Provider::Openai);
        assert_eq!(mc.model, "gpt-4o-mini");
        assert_eq!(svc.model_config().temperature, 2.0);
    }

    #[test]
    fn test_chat_reply_serialization() {
        let json = serde_json::to_string(&ChatReply::Answer("hi".into())).unwrap();
        assert_eq!(json, r#"{"answer":"hi"}"#);
    }
}

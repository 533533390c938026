//! Interactive question answering: perceive, decide, act, explain.
//!
//! Each phase is a separate method so it can be tested on its own. Keyword
//! routing lives in [`QuestionClassifier`]; the loop itself never inspects the
//! question text.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::dataset::Dataset;
use crate::error::{AnalystError, Result};
use crate::executor::ExecutionBridge;
use crate::generation::PromptRunner;
use crate::prompts::{SystemType, CODE_TASK, CONTEXT, EXPLAIN};
use crate::stats::correlation_narrative;

/// Rendered in the explain prompt when no computation ran.
pub const NO_DATA: &str = "NO_DATA";

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Coarse purpose of a question. When several keyword families match, the
/// earlier variant wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Explanatory,
    CausalFailureAnalysis,
    GeneralAnalysis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub intent: Intent,
    /// Decide may skip code generation entirely.
    pub skip_computation: bool,
    /// Explain should use the failure-report system prompt.
    pub failure_report: bool,
    /// Perceive should attach the correlation narrative.
    pub wants_correlations: bool,
}

impl Classification {
    pub fn explain_system(&self) -> SystemType {
        if self.failure_report {
            SystemType::Failure
        } else {
            SystemType::Analysis
        }
    }
}

/// Case-insensitive substring matcher over three keyword families.
#[derive(Debug, Clone)]
pub struct QuestionClassifier {
    explanatory: Vec<String>,
    failure: Vec<String>,
    correlation: Vec<String>,
}

impl Default for QuestionClassifier {
    fn default() -> Self {
        Self::new(
            &["explain", "summary", "recommend"],
            &[
                "root cause",
                "failure analysis",
                "impact assessment",
                "repair guide",
                "fault diagnosis",
                "breakdown",
            ],
            &["cause", "correlation", "impact"],
        )
    }
}

impl QuestionClassifier {
    pub fn new(explanatory: &[&str], failure: &[&str], correlation: &[&str]) -> Self {
        let lower = |ws: &[&str]| -> Vec<String> { ws.iter().map(|w| w.to_lowercase()).collect() };
        Self {
            explanatory: lower(explanatory),
            failure: lower(failure),
            correlation: lower(correlation),
        }
    }

    pub fn classify(&self, question: &str) -> Classification {
        let q = question.to_lowercase();
        let hit = |words: &[String]| words.iter().any(|w| q.contains(w.as_str()));

        let skip_computation = hit(&self.explanatory);
        let failure_report = hit(&self.failure);
        let intent = if skip_computation {
            Intent::Explanatory
        } else if failure_report {
            Intent::CausalFailureAnalysis
        } else {
            Intent::GeneralAnalysis
        };
        Classification {
            intent,
            skip_computation,
            failure_report,
            wants_correlations: hit(&self.correlation),
        }
    }
}

// ---------------------------------------------------------------------------
// Loop values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    NoComputation,
    Code(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActOutcome {
    NoOp,
    Completed(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

/// Append-only record of answered questions.
#[derive(Debug, Default)]
pub struct ConversationMemory {
    turns: Vec<Turn>,
}

impl ConversationMemory {
    pub fn push(&mut self, question: &str, answer: &str) {
        self.turns.push(Turn {
            question: question.to_string(),
            answer: answer.to_string(),
        });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

fn strip_code_fences(response: &str) -> String {
    response.replace("```python", "").replace("```", "").trim().to_string()
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

pub struct Agent {
    runner: PromptRunner,
    bridge: Arc<dyn ExecutionBridge>,
    classifier: QuestionClassifier,
    memory: Mutex<ConversationMemory>,
}

impl Agent {
    pub fn new(runner: PromptRunner, bridge: Arc<dyn ExecutionBridge>) -> Self {
        Self {
            runner,
            bridge,
            classifier: QuestionClassifier::default(),
            memory: Mutex::new(ConversationMemory::default()),
        }
    }

    pub fn with_classifier(mut self, classifier: QuestionClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn classifier(&self) -> &QuestionClassifier {
        &self.classifier
    }

    /// Dataset context for the decide prompt.
    pub fn perceive(&self, dataset: Option<&Dataset>, question: &str) -> Result<String> {
        let ds = dataset.ok_or(AnalystError::NoDataset)?;
        let correlations = if self.classifier.classify(question).wants_correlations {
            correlation_narrative(ds)
        } else {
            String::new()
        };
        let columns = format!("{:?}", ds.column_names());
        let sample = ds.head_string(1);
        CONTEXT.render(&[
            ("columns", columns.as_str()),
            ("sample", sample.as_str()),
            ("correlations", correlations.as_str()),
        ])
    }

    pub async fn decide(&self, context: &str, question: &str) -> Result<Decision> {
        if self.classifier.classify(question).skip_computation {
            debug!("explanatory question, skipping code generation");
            return Ok(Decision::NoComputation);
        }
        let prompt = CODE_TASK.render(&[("context", context), ("question", question)])?;
        let response = self.runner.run(&prompt, SystemType::Code).await?;
        Ok(Decision::Code(strip_code_fences(&response)))
    }

    /// Never returns an error: bridge failures become [`ActOutcome::Failed`].
    pub async fn act(&self, dataset: &Dataset, decision: &Decision) -> ActOutcome {
        match decision {
            Decision::NoComputation => ActOutcome::NoOp,
            Decision::Code(code) => match self.bridge.execute(dataset, code).await {
                Ok(result) => ActOutcome::Completed(result),
                Err(e) => {
                    warn!(error = %e, "generated code failed");
                    ActOutcome::Failed(e.to_string())
                }
            },
        }
    }

    pub async fn explain(&self, question: &str, result: &str) -> Result<String> {
        let system = self.classifier.classify(question).explain_system();
        let prompt = EXPLAIN.render(&[("question", question), ("result", result)])?;
        self.runner.run(&prompt, system).await
    }

    #[instrument(skip(self, dataset), fields(intent = tracing::field::Empty))]
    pub async fn run(&self, dataset: Option<&Dataset>, question: &str) -> Result<String> {
        let intent = self.classifier.classify(question).intent;
        tracing::Span::current().record("intent", tracing::field::debug(intent));

        let context = self.perceive(dataset, question)?;
        let ds = dataset.ok_or(AnalystError::NoDataset)?;
        let decision = self.decide(&context, question).await?;

        let result = match self.act(ds, &decision).await {
            ActOutcome::Failed(msg) => return Ok(format!("Execution Error: {msg}")),
            ActOutcome::NoOp => NO_DATA.to_string(),
            ActOutcome::Completed(r) => r,
        };

        let answer = self.explain(question, &result).await?;
        self.memory
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(question, &answer);
        info!(chars = answer.len(), "question answered");
        Ok(answer)
    }

    pub fn history(&self) -> Vec<Turn> {
        self.memory
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .turns()
            .to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::TextGenerator;
    use async_trait::async_trait;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Canned {
        reply: String,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl Canned {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for Canned {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    struct Echo(AtomicUsize);

    #[async_trait]
    impl ExecutionBridge for Echo {
        async fn execute(&self, _dataset: &Dataset, code: &str) -> Result<String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(format!("ran: {code}"))
        }
    }

    struct Boom;

    #[async_trait]
    impl ExecutionBridge for Boom {
        async fn execute(&self, _dataset: &Dataset, _code: &str) -> Result<String> {
            Err(AnalystError::Execution("NameError: df2".into()))
        }
    }

    fn dataset() -> Dataset {
        Dataset::builder()
            .numeric("Torque", vec![40.0, 60.0, 42.0, 65.0])
            .numeric("Machine failure", vec![0.0, 1.0, 0.0, 1.0])
            .build()
            .unwrap()
    }

    #[rstest]
    #[case("Explain the root cause", Intent::Explanatory, true, true, true)]
    #[case("Give me a fault diagnosis", Intent::CausalFailureAnalysis, false, true, false)]
    #[case("What is the impact of torque?", Intent::GeneralAnalysis, false, false, true)]
    #[case("Average torque?", Intent::GeneralAnalysis, false, false, false)]
    #[case("SUMMARY please", Intent::Explanatory, true, false, false)]
    fn test_classifier(
        #[case] q: &str,
        #[case] intent: Intent,
        #[case] skip: bool,
        #[case] failure: bool,
        #[case] corr: bool,
    ) {
        let c = QuestionClassifier::default().classify(q);
        assert_eq!(c.intent, intent);
        assert_eq!(c.skip_computation, skip);
        assert_eq!(c.failure_report, failure);
        assert_eq!(c.wants_correlations, corr);
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(
            strip_code_fences("```python\nresult = df['Torque'].mean()\n```\n"),
            "result = df['Torque'].mean()"
        );
    }

    #[test]
    fn test_perceive_requires_dataset() {
        let agent = Agent::new(PromptRunner::new(Canned::new("x")), Arc::new(Echo(AtomicUsize::new(0))));
        assert!(matches!(agent.perceive(None, "q"), Err(AnalystError::NoDataset)));
    }

    #[test]
    fn test_perceive_attaches_correlations_only_when_asked() {
        let agent = Agent::new(PromptRunner::new(Canned::new("x")), Arc::new(Echo(AtomicUsize::new(0))));
        let ds = dataset();
        let plain = agent.perceive(Some(&ds), "mean torque").unwrap();
        assert!(plain.starts_with("COLUMNS: [\"Torque\", \"Machine failure\"]\nSAMPLE:\n"));
        assert!(plain.ends_with("CORRELATIONS:\n\n"));
        let causal = agent.perceive(Some(&ds), "what causes failure").unwrap();
        assert!(causal.contains("Statistical Root Cause Analysis"));
    }

    #[tokio::test]
    async fn test_explanatory_question_skips_code_and_bridge() {
        let generator = Canned::new("Because of torque.");
        let bridge = Arc::new(Echo(AtomicUsize::new(0)));
        let agent = Agent::new(PromptRunner::new(generator.clone()), bridge.clone());
        let ds = dataset();

        let answer = agent.run(Some(&ds), "Explain the root cause").await.unwrap();
        assert_eq!(answer, "Because of torque.");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.0.load(Ordering::SeqCst), 0);
        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("SECTION 1: ROOT CAUSE ANALYSIS"));
        assert!(prompts[0].contains("Computed Result:\nNO_DATA"));
        assert_eq!(agent.history().len(), 1);
    }

    #[tokio::test]
    async fn test_general_question_runs_code() {
        let generator = Canned::new("```python\nresult = 1\n```");
        let bridge = Arc::new(Echo(AtomicUsize::new(0)));
        let agent = Agent::new(PromptRunner::new(generator.clone()), bridge.clone());
        let ds = dataset();

        agent.run(Some(&ds), "average torque").await.unwrap();
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
        assert_eq!(bridge.0.load(Ordering::SeqCst), 1);
        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("Task: Generate pandas code for 'average torque'"));
        assert!(prompts[1].contains("Computed Result:\nran: result = 1"));
        assert!(prompts[1].contains("**Recommendation**"));
    }

    #[tokio::test]
    async fn test_execution_failure_short_circuits() {
        let generator = Canned::new("result = df2.mean()");
        let agent = Agent::new(PromptRunner::new(generator.clone()), Arc::new(Boom));
        let ds = dataset();

        let answer = agent.run(Some(&ds), "average torque").await.unwrap();
        assert_eq!(answer, "Execution Error: NameError: df2");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert!(agent.history().is_empty());
    }

    #[tokio::test]
    async fn test_run_without_dataset() {
        let generator = Canned::new("x");
        let agent = Agent::new(PromptRunner::new(generator.clone()), Arc::new(Boom));
        let err = agent.run(None, "average torque").await.unwrap_err();
        assert!(matches!(err, AnalystError::NoDataset));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }
}

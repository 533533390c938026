//! Background precomputation of the long failure report.
//!
//! An upload (or an explicit restart) starts one analysis run. The run writes
//! its result into every report slot at once; readers poll the slots without
//! ever blocking on generation. Each run carries an epoch, and a write from a
//! run that is no longer current is dropped.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dataset::Dataset;
use crate::error::{AnalystError, Result};
use crate::generation::PromptRunner;
use crate::knowledge::{KnowledgeResolver, REPAIR_QUERY};
use crate::prompts::{SectionKind, SystemType};
use crate::stats::{correlation_stats, failure_stats, CorrelationStats, FailureStats};

pub const PENDING: &str = "Background analysis in progress. Please wait...";
pub const NOT_FOUND: &str = "No analysis data found. Please re-upload the dataset.";
pub const NO_FAILURES: &str = "No failures detected. Root cause analysis not required.";

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Why,
    Impact,
    Fix,
    Combined,
}

impl ReportKind {
    pub const ALL: [ReportKind; 4] = [ReportKind::Why, ReportKind::Impact, ReportKind::Fix, ReportKind::Combined];

    pub fn key(&self) -> &'static str {
        match self {
            ReportKind::Why => "why",
            ReportKind::Impact => "impact",
            ReportKind::Fix => "fix",
            ReportKind::Combined => "combined",
        }
    }

    /// Normalizer section matching this report, if it has one.
    pub fn section(&self) -> Option<SectionKind> {
        match self {
            ReportKind::Why => Some(SectionKind::RootCause),
            ReportKind::Impact => Some(SectionKind::Impact),
            ReportKind::Fix => Some(SectionKind::Repair),
            ReportKind::Combined => None,
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ReportKind {
    type Err = AnalystError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "why" => Ok(ReportKind::Why),
            "impact" => Ok(ReportKind::Impact),
            "fix" => Ok(ReportKind::Fix),
            "combined" => Ok(ReportKind::Combined),
            other => Err(AnalystError::InvalidInput(format!("unknown report kind: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotValue {
    InProgress,
    Failed(String),
    Ready(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Error,
    Ready,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRead {
    pub text: String,
    pub status: ReportStatus,
}

/// Identifies one analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnalysisHandle {
    pub run_id: Uuid,
    pub epoch: u64,
}

#[derive(Debug, Default)]
struct Slots {
    epoch: u64,
    values: HashMap<ReportKind, SlotValue>,
}

// ---------------------------------------------------------------------------
// AnalysisCache
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct AnalysisCache {
    slots: RwLock<Slots>,
    job: Mutex<Option<JoinHandle<()>>>,
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        self.slots.read().unwrap_or_else(|p| p.into_inner()).epoch
    }

    /// Drop every slot and abort any run in flight.
    pub fn clear(&self) {
        {
            let mut slots = self.slots.write().unwrap_or_else(|p| p.into_inner());
            slots.epoch += 1;
            slots.values.clear();
        }
        if let Some(task) = self.job.lock().unwrap_or_else(|p| p.into_inner()).take() {
            task.abort();
        }
    }

    /// Start a new epoch with every slot in progress.
    pub fn begin_run(&self) -> u64 {
        let mut slots = self.slots.write().unwrap_or_else(|p| p.into_inner());
        slots.epoch += 1;
        slots.values = ReportKind::ALL.iter().map(|k| (*k, SlotValue::InProgress)).collect();
        slots.epoch
    }

    /// Write `value` into every slot if `epoch` is still current.
    pub fn publish(&self, epoch: u64, value: SlotValue) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(|p| p.into_inner());
        if slots.epoch != epoch {
            warn!(stale = epoch, current = slots.epoch, "discarding stale analysis result");
            return false;
        }
        for kind in ReportKind::ALL {
            slots.values.insert(kind, value.clone());
        }
        true
    }

    pub fn read(&self, kind: ReportKind) -> ReportRead {
        let slots = self.slots.read().unwrap_or_else(|p| p.into_inner());
        match slots.values.get(&kind) {
            Some(SlotValue::InProgress) => ReportRead {
                text: PENDING.to_string(),
                status: ReportStatus::Pending,
            },
            Some(SlotValue::Failed(reason)) => ReportRead {
                text: reason.clone(),
                status: ReportStatus::Error,
            },
            Some(SlotValue::Ready(text)) => ReportRead {
                text: text.clone(),
                status: ReportStatus::Ready,
            },
            None => ReportRead {
                text: NOT_FOUND.to_string(),
                status: ReportStatus::NotFound,
            },
        }
    }

    /// Start `job` over `dataset` in the background, aborting any previous run.
    pub fn trigger(self: &Arc<Self>, job: Arc<AnalysisJob>, dataset: Arc<Dataset>) -> AnalysisHandle {
        let epoch = self.begin_run();
        let handle = AnalysisHandle {
            run_id: Uuid::new_v4(),
            epoch,
        };
        let cache = Arc::clone(self);
        let task = tokio::spawn(async move {
            info!(run_id = %handle.run_id, epoch, "background analysis started");
            let value = match job.run(&dataset).await {
                Ok(text) => SlotValue::Ready(text),
                Err(e) => {
                    error!(run_id = %handle.run_id, error = %e, "background analysis failed");
                    SlotValue::Failed(format!("Analysis Failed: {e}"))
                }
            };
            if cache.publish(epoch, value) {
                info!(run_id = %handle.run_id, "background analysis complete");
            }
        });

        let mut slot = self.job.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
        handle
    }

    /// Wait for the most recent run, if any, to finish.
    pub async fn join(&self) {
        let task = self.job.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

// ---------------------------------------------------------------------------
// AnalysisJob
// ---------------------------------------------------------------------------

/// The work done by one analysis run: statistics, definitions, one
/// generation call.
pub struct AnalysisJob {
    runner: PromptRunner,
    resolver: KnowledgeResolver,
    manual_depth: usize,
}

impl AnalysisJob {
    pub fn new(runner: PromptRunner, resolver: KnowledgeResolver) -> Self {
        Self {
            runner,
            resolver,
            manual_depth: 3,
        }
    }

    pub fn with_manual_depth(mut self, depth: usize) -> Self {
        self.manual_depth = depth;
        self
    }

    /// Text to publish to every slot.
    pub async fn run(&self, dataset: &Dataset) -> Result<String> {
        let stats = match failure_stats(dataset) {
            Ok(s) => s,
            Err(AnalystError::NoTargetColumn) => {
                return Ok(format!("Analysis Skipped: {}", AnalystError::NoTargetColumn))
            }
            Err(e) => return Err(e),
        };
        if stats.total_failures == 0 {
            return Ok(NO_FAILURES.to_string());
        }
        let correlations = correlation_stats(dataset)?;

        let mut definitions = Vec::with_capacity(stats.modes.len());
        for mode in &stats.modes {
            definitions.push(self.resolver.resolve(&mode.name).await.context_line());
        }
        let excerpts = self.resolver.manual_excerpts(REPAIR_QUERY, self.manual_depth).await;

        let prompt = combined_prompt(&stats, &correlations, &definitions, &excerpts);
        self.runner.run(&prompt, SystemType::Failure).await
    }
}

/// User prompt for the single combined failure-analysis call.
pub fn combined_prompt(
    stats: &FailureStats,
    correlations: &CorrelationStats,
    definitions: &[String],
    excerpts: &[String],
) -> String {
    let mut p = String::from("TASK: Perform a complete Failure Analysis.\n\nDATA CONTEXT:\nDataset summary:\n");
    p.push_str(&format!("- Total records: {}\n", stats.total_records));
    p.push_str(&format!("- Total failures: {}\n", stats.total_failures));

    p.push_str("\nFailure mode breakdown:\n");
    for m in &stats.modes {
        p.push_str(&format!("- {}: {} ({:.1}%)\n", m.name, m.count, m.percent));
    }

    p.push_str("\nStatistical observations:\n");
    if let Some(top) = stats.most_frequent() {
        p.push_str(&format!("- Most frequent: {}\n", top.name));
    }

    p.push_str("\nCorrelation insights:\n");
    for c in &correlations.top_correlations {
        p.push_str(&format!("  {}: {:.2}\n", c.feature, c.value));
    }

    if !definitions.is_empty() {
        p.push_str("\nSemantic Definitions:\n");
        for line in definitions {
            p.push_str(line);
            p.push('\n');
        }
    }

    if !excerpts.is_empty() {
        p.push_str("\nMANUAL EXCERPTS:\n");
        p.push_str(&excerpts.join("\n"));
    }
    p
}

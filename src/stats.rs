//! Failure and correlation snapshots derived from the active dataset.
//!
//! Both snapshots are recomputed on demand and never cached; they only live
//! longer than a request when embedded into a prompt.

use serde::Serialize;

use crate::dataset::Dataset;
use crate::error::{AnalystError, Result};

/// Label columns recognised as the overall failure flag, in priority order.
pub const TARGET_CANDIDATES: &[&str] = &["Machine failure", "Failure", "Target", "failure", "target"];

/// Minimum absolute Pearson coefficient reported as a correlated feature.
pub const MIN_CORRELATION: f64 = 0.1;
/// Number of correlated features kept.
pub const TOP_CORRELATIONS: usize = 5;
/// Minimum absolute mean shift (percent) reported as a sensor shift.
pub const MIN_SHIFT_PCT: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureMode {
    pub name: String,
    pub count: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureStats {
    pub total_records: usize,
    pub total_failures: u64,
    pub modes: Vec<FailureMode>,
}

impl FailureStats {
    pub fn most_frequent(&self) -> Option<&FailureMode> {
        self.modes.first()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correlation {
    pub feature: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Shift {
    pub feature: String,
    pub pct_diff: f64,
    pub fail_mean: f64,
    pub norm_mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct CorrelationStats {
    pub top_correlations: Vec<Correlation>,
    pub shifts: Vec<Shift>,
}

/// First recognised failure label column present in `ds`.
pub fn detect_target(ds: &Dataset) -> Option<&'static str> {
    TARGET_CANDIDATES.iter().copied().find(|c| ds.has_column(c))
}

/// Count failures overall and per binary failure-mode column.
pub fn failure_stats(ds: &Dataset) -> Result<FailureStats> {
    let target = detect_target(ds).ok_or(AnalystError::NoTargetColumn)?;
    let total_failures = ds.numeric(target).map(sum_counts).unwrap_or(0);

    let mut modes: Vec<FailureMode> = ds
        .numeric_columns()
        .filter(|(name, _)| *name != target)
        .filter(|(_, values)| is_binary(values))
        .filter_map(|(name, values)| {
            let count = sum_counts(values);
            (count > 0).then(|| FailureMode {
                name: name.to_string(),
                count,
                percent: if total_failures > 0 {
                    count as f64 / total_failures as f64 * 100.0
                } else {
                    0.0
                },
            })
        })
        .collect();
    modes.sort_by(|a, b| b.count.cmp(&a.count));

    Ok(FailureStats {
        total_records: ds.n_rows(),
        total_failures,
        modes,
    })
}

/// Pearson correlations against the failure label plus mean shifts between
/// failing and normal rows.
pub fn correlation_stats(ds: &Dataset) -> Result<CorrelationStats> {
    let target = detect_target(ds).ok_or(AnalystError::NoTargetColumn)?;
    let Some(label) = ds.numeric(target) else {
        return Err(AnalystError::InvalidInput(format!(
            "target column '{target}' is not numeric"
        )));
    };

    let mut corrs: Vec<Correlation> = ds
        .numeric_columns()
        .filter(|(name, _)| *name != target)
        .filter_map(|(name, values)| {
            pearson(values, label).map(|value| Correlation {
                feature: name.to_string(),
                value,
            })
        })
        .filter(|c| c.value.abs() > MIN_CORRELATION)
        .collect();
    corrs.sort_by(|a, b| b.value.partial_cmp(&a.value).unwrap_or(std::cmp::Ordering::Equal));
    corrs.truncate(TOP_CORRELATIONS);

    let failing: Vec<usize> = rows_where(label, 1.0);
    let normal: Vec<usize> = rows_where(label, 0.0);
    let mut shifts = Vec::new();
    if !failing.is_empty() && !normal.is_empty() {
        for (name, values) in ds.numeric_columns() {
            if name == target || name.to_lowercase().contains("id") {
                continue;
            }
            let (Some(fail_mean), Some(norm_mean)) = (mean_at(values, &failing), mean_at(values, &normal))
            else {
                continue;
            };
            if norm_mean == 0.0 {
                continue;
            }
            let pct_diff = (fail_mean - norm_mean) / norm_mean * 100.0;
            if pct_diff.abs() > MIN_SHIFT_PCT {
                shifts.push(Shift {
                    feature: name.to_string(),
                    pct_diff,
                    fail_mean,
                    norm_mean,
                });
            }
        }
    }

    Ok(CorrelationStats {
        top_correlations: corrs,
        shifts,
    })
}

/// Human-readable correlation summary embedded into agent context.
pub fn correlation_narrative(ds: &Dataset) -> String {
    let stats = match correlation_stats(ds) {
        Ok(s) => s,
        Err(AnalystError::NoTargetColumn) => {
            return "No failure label found (Machine failure/Target). Cannot analyze root cause."
                .to_string()
        }
        Err(e) => return format!("Could not calculate correlations: {e}"),
    };

    let mut lines = vec!["### Statistical Root Cause Analysis".to_string()];
    if stats.top_correlations.is_empty() {
        lines.push("No strong linear correlations found with failure.".to_string());
    } else {
        lines.push("**Top Correlated Factors (1.0 = Perfect Cause):**".to_string());
        for c in &stats.top_correlations {
            lines.push(format!("- {}: {:.2}", c.feature, c.value));
        }
    }
    if !stats.shifts.is_empty() {
        lines.push("\n**Sensor Behavior During Failure:**".to_string());
        for s in &stats.shifts {
            let direction = if s.pct_diff > 0.0 { "HIGHER" } else { "LOWER" };
            lines.push(format!(
                "- {}: {:.1}% {} during failure (Avg: {:.1} vs {:.1})",
                s.feature,
                s.pct_diff.abs(),
                direction,
                s.fail_mean,
                s.norm_mean
            ));
        }
    }
    lines.join("\n")
}

/// Instant failure-mode breakdown that needs no generation call.
pub fn fast_failure_report(ds: &Dataset) -> String {
    let stats = match failure_stats(ds) {
        Ok(s) => s,
        Err(_) => {
            return "No specific failure label column identified. Cannot categorize failures automatically."
                .to_string()
        }
    };
    if stats.total_failures == 0 {
        return "No failures found in the dataset.".to_string();
    }

    let mut report = vec![
        "### Analysis Result".to_string(),
        format!("**Total Failures Detected**: {}", stats.total_failures),
    ];
    if stats.modes.is_empty() {
        report.push("\nNo specific binary failure type columns found. Failures may be unlabeled.".to_string());
    } else {
        report.push("\n**Breakdown by Failure Mode:**".to_string());
        let mut count_sum = 0;
        for m in &stats.modes {
            report.push(format!("- **{}**: {} ({:.1}%)", m.name, m.count, m.percent));
            count_sum += m.count;
        }
        if count_sum < stats.total_failures {
            report.push(format!(
                "\n> **Warning**: The sum of failure modes ({count_sum}) is less than total failures ({}). Some failures may be uncategorized or unlabeled.",
                stats.total_failures
            ));
        }
    }
    report.push("\n*This analysis was generated instantly based on dataset statistics.*".to_string());
    report.join("\n")
}

fn sum_counts(values: &[Option<f64>]) -> u64 {
    values.iter().flatten().sum::<f64>().max(0.0).round() as u64
}

fn is_binary(values: &[Option<f64>]) -> bool {
    values.iter().flatten().all(|v| *v == 0.0 || *v == 1.0)
}

fn rows_where(label: &[Option<f64>], value: f64) -> Vec<usize> {
    label
        .iter()
        .enumerate()
        .filter_map(|(i, v)| (*v == Some(value)).then_some(i))
        .collect()
}

fn mean_at(values: &[Option<f64>], rows: &[usize]) -> Option<f64> {
    let picked: Vec<f64> = rows.iter().filter_map(|&r| values.get(r).copied().flatten()).collect();
    if picked.is_empty() {
        None
    } else {
        Some(picked.iter().sum::<f64>() / picked.len() as f64)
    }
}

/// Pairwise-complete Pearson coefficient; `None` when either side is constant.
fn pearson(x: &[Option<f64>], y: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in &pairs {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some(sxy / (sxx.sqrt() * syy.sqrt()))
}

//! Deterministic content firewall for generated failure-analysis text.
//!
//! Converts raw generated prose into a titled, dash-bulleted section. It only
//! deletes, reformats and truncates lines; it never rewrites them. Section
//! vocabularies are mutually exclusive, so a root-cause section cannot leak
//! repair steps and a repair section cannot leak causes or figures.
//!
//! `normalize(normalize(x, k), k) == normalize(x, k)` for every input.

use crate::prompts::SectionKind;

/// Returned when nothing survives filtering.
pub const INSUFFICIENT_DATA: &str = "Insufficient data after normalization.";

pub const MAX_BULLETS: usize = 8;

/// Lines with more words than this are prose paragraphs, not bullets.
pub const MAX_WORDS_PER_LINE: usize = 50;

/// Noise shared by every section: conclusions, scheduling, training, tooling
/// references and echoed prompt instructions.
pub const FORBIDDEN_COMMON: &[&str] = &[
    "conclusion",
    "recommend",
    "schedule",
    "training",
    "environment",
    "correlation",
    "percentage",
    "predict",
    "maintenance",
    "prevent",
    "tools",
    "steps",
    "guideline",
    "manual",
    "education",
    "bullet points",
    "sentence per bullet",
    "must include",
    "e.g.",
    "format:",
    "title:",
    "role:",
];

const FORBIDDEN_ROOT_CAUSE: &[&str] = &["repair", "replace", "inspect", "how to"];

const FORBIDDEN_IMPACT: &[&str] = &["cause", "caused by", "repair", "replace", "inspect", "due to"];

const FORBIDDEN_REPAIR: &[&str] = &["cause", "caused by", "correlation", "frequency", "%", "impact", "due to"];

/// Prefixes marking a heading, banner or numbered section label.
const HEADING_PREFIXES: &[&str] = &["#", "section", "root cause", "analysis", "failure", "title"];

/// Full forbidden vocabulary for `section` (common noise first).
pub fn forbidden_terms(section: SectionKind) -> Vec<&'static str> {
    let specific = match section {
        SectionKind::RootCause => FORBIDDEN_ROOT_CAUSE,
        SectionKind::Impact => FORBIDDEN_IMPACT,
        SectionKind::Repair => FORBIDDEN_REPAIR,
    };
    FORBIDDEN_COMMON.iter().chain(specific).copied().collect()
}

fn is_heading(lower: &str) -> bool {
    HEADING_PREFIXES.iter().any(|p| lower.starts_with(p))
        || SectionKind::ALL.iter().any(|s| {
            lower.starts_with(&s.title().to_lowercase()) || lower.starts_with(&s.heading().to_lowercase())
        })
}

/// Word count of a line, ignoring a leading dash marker.
fn content_words(line: &str) -> usize {
    line.trim_start_matches('-').split_whitespace().count()
}

/// Filter `raw` down to at most [`MAX_BULLETS`] bullets for `section`.
pub fn normalize(raw: &str, section: SectionKind) -> String {
    let raw = raw.trim();
    if raw.is_empty() || raw == INSUFFICIENT_DATA {
        return INSUFFICIENT_DATA.to_string();
    }

    let forbidden = forbidden_terms(section);
    let mut bullets: Vec<String> = Vec::new();

    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let lower = line.to_lowercase();

        if is_heading(&lower) {
            continue;
        }
        if content_words(line) > MAX_WORDS_PER_LINE {
            continue;
        }
        if forbidden.iter().any(|term| lower.contains(term)) {
            continue;
        }

        let body = line.trim_end_matches(|c: char| c == '.' || c.is_whitespace());
        if body.is_empty() {
            continue;
        }
        let bullet = if body.starts_with('-') {
            body.to_string()
        } else {
            format!("- {body}")
        };
        bullets.push(bullet);

        if bullets.len() >= MAX_BULLETS {
            break;
        }
    }

    if bullets.is_empty() {
        return INSUFFICIENT_DATA.to_string();
    }
    format!("{}\n{}", section.title(), bullets.join("\n"))
}

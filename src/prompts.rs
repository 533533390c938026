//! Prompt templates and the section schema shared with the normalizer.
//!
//! The three system prompts are fixed; the only runtime composition is slot
//! substitution of statistical and knowledge context into a template body.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{AnalystError, Result};

// ---------------------------------------------------------------------------
// Section schema
// ---------------------------------------------------------------------------

/// One section of the three-part failure report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    RootCause,
    Impact,
    Repair,
}

impl SectionKind {
    pub const ALL: [SectionKind; 3] = [SectionKind::RootCause, SectionKind::Impact, SectionKind::Repair];

    pub fn key(&self) -> &'static str {
        match self {
            SectionKind::RootCause => "root_cause",
            SectionKind::Impact => "impact",
            SectionKind::Repair => "repair",
        }
    }

    /// Title emitted above normalized bullets.
    pub fn title(&self) -> &'static str {
        match self {
            SectionKind::RootCause => "Root Cause Summary",
            SectionKind::Impact => "Impact Assessment",
            SectionKind::Repair => "Repair Guide",
        }
    }

    /// Banner used for the section inside the failure system prompt.
    pub fn heading(&self) -> &'static str {
        match self {
            SectionKind::RootCause => "ROOT CAUSE ANALYSIS",
            SectionKind::Impact => "IMPACT ASSESSMENT",
            SectionKind::Repair => "REPAIR GUIDE",
        }
    }

    fn role(&self) -> &'static str {
        match self {
            SectionKind::RootCause => "Explain WHY failures occur at a system level.",
            SectionKind::Impact => "Explain WHAT happens due to the failures.",
            SectionKind::Repair => "Explain HOW the issue can be corrected.",
        }
    }

    fn rules(&self) -> &'static [&'static str] {
        match self {
            SectionKind::RootCause => &[
                "Do NOT include frequencies, percentages, or correlations.",
                "Do NOT include impact, repair, or prevention.",
                "Use causal phrases such as \"caused by\", \"driven by\", or \"resulting from\".",
                "4-5 bullet points only.",
                "One sentence per bullet.",
            ],
            SectionKind::Impact => &[
                "Do NOT explain causes.",
                "Use qualitative severity only.",
                "Exactly three lines:",
                "  - Operational Impact: Low/Medium/High (one sentence)",
                "  - Safety Risk: Low/Medium/High (one sentence)",
                "  - Performance Degradation: Low/Medium/High (one sentence)",
            ],
            SectionKind::Repair => &[
                "High-level corrective actions only.",
                "No root cause explanation.",
                "No prevention, scheduling, or maintenance plans.",
                "3-5 bullet points only.",
                "Action-oriented language.",
            ],
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for SectionKind {
    type Err = AnalystError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "root_cause" | "why" => Ok(SectionKind::RootCause),
            "impact" => Ok(SectionKind::Impact),
            "repair" | "fix" => Ok(SectionKind::Repair),
            other => Err(AnalystError::InvalidInput(format!("unknown section: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// System prompts
// ---------------------------------------------------------------------------

/// Selects one of the three fixed system prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemType {
    Code,
    Analysis,
    Failure,
}

impl fmt::Display for SystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemType::Code => write!(f, "code"),
            SystemType::Analysis => write!(f, "analysis"),
            SystemType::Failure => write!(f, "failure"),
        }
    }
}

const COMMON_RULES: &str = "\
You are a Data Analyst Agent designed for fast, reliable responses.

Primary: Accuracy over verbosity. Speed over style. Clear, actionable outputs.
Rules:
- Default to concise answers (bullet points preferred).
- Avoid repetition, filler, or storytelling.
- Do not hallucinate. State missing data clearly.
- Response length: 80-120 tokens default.
- Structure: 1) Short summary (mandatory), 2) Detail (only if asked).
- Code: Minimal, runnable, no explanations unless requested.
- Error handling: Never fail silently.
";

const CODE_GOAL: &str = "
Goal: Write ONLY valid python pandas code to analyze the dataframe `df`.
Rules:
1. Assign final output to variable `result`.
2. No imports except pandas (pd) and numpy (np).
3. Do NOT explain the code. Just provide the code block.
";

const ANALYSIS_GOAL: &str = "
Goal: Explain analysis findings and provide actionable recommendations.
Structure:
1. **Conclusion**: Direct answer.
2. **Analysis**: Key metrics/findings.
3. **Recommendation**: Specific action items.
";

const GLOBAL_FAILURE_RULES: &[&str] = &[
    "Do NOT repeat information across sections.",
    "Do NOT add conclusions.",
    "Do NOT add extra titles or commentary.",
    "If any rule is violated, regenerate internally before responding.",
];

const BANNER: &str = "================================";

static CODE_PROMPT: Lazy<String> = Lazy::new(|| format!("{COMMON_RULES}{CODE_GOAL}"));
static ANALYSIS_PROMPT: Lazy<String> = Lazy::new(|| format!("{COMMON_RULES}{ANALYSIS_GOAL}"));
static FAILURE_PROMPT: Lazy<String> = Lazy::new(failure_system_prompt);

impl SystemType {
    /// Full system prompt text for this type.
    pub fn system_prompt(&self) -> &'static str {
        match self {
            SystemType::Code => CODE_PROMPT.as_str(),
            SystemType::Analysis => ANALYSIS_PROMPT.as_str(),
            SystemType::Failure => FAILURE_PROMPT.as_str(),
        }
    }
}

fn failure_system_prompt() -> String {
    let mut out = String::new();
    for (i, section) in SectionKind::ALL.iter().enumerate() {
        out.push_str(&format!(
            "{BANNER}\nSECTION {}: {}\n{BANNER}\nROLE:\n{}\n\nRULES:\n",
            i + 1,
            section.heading(),
            section.role()
        ));
        for rule in section.rules() {
            if rule.starts_with("  ") {
                out.push_str(&format!("{rule}\n"));
            } else {
                out.push_str(&format!("- {rule}\n"));
            }
        }
        out.push('\n');
    }
    out.push_str(&format!("{BANNER}\nGLOBAL RULES\n{BANNER}\n"));
    for rule in GLOBAL_FAILURE_RULES {
        out.push_str(&format!("- {rule}\n"));
    }
    out
}

/// Join a system prompt and a user prompt into the single text sent to the
/// generation engine.
pub fn compose(system: &str, prompt: &str) -> String {
    format!("{system}\n\nUser Request:\n{prompt}")
}

// ---------------------------------------------------------------------------
// User prompt templates
// ---------------------------------------------------------------------------

/// A template body with `{{name}}` slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptTemplate {
    pub name: &'static str,
    pub body: &'static str,
}

/// Decide-phase request for analysis code.
pub const CODE_TASK: PromptTemplate = PromptTemplate {
    name: "code_task",
    body: "{{context}}\nTask: Generate pandas code for '{{question}}'",
};

/// Explain-phase request combining the question with the computed result.
pub const EXPLAIN: PromptTemplate = PromptTemplate {
    name: "explain",
    body: "User Question:\n{{question}}\n\nComputed Result:\n{{result}}\n",
};

/// Perceive-phase dataset context.
pub const CONTEXT: PromptTemplate = PromptTemplate {
    name: "context",
    body: "COLUMNS: {{columns}}\nSAMPLE:\n{{sample}}\n\nCORRELATIONS:\n{{correlations}}\n",
};

impl PromptTemplate {
    /// Names of every slot in the body, in order of first appearance.
    pub fn slots(&self) -> Vec<&'static str> {
        let mut found = Vec::new();
        let mut rest = self.body;
        while let Some(start) = rest.find("{{") {
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else { break };
            let name = &after[..end];
            if !found.contains(&name) {
                found.push(name);
            }
            rest = &after[end + 2..];
        }
        found
    }

    /// Substitute every slot. Missing or unknown slot names are errors.
    pub fn render(&self, values: &[(&str, &str)]) -> Result<String> {
        let slots = self.slots();
        if let Some((k, _)) = values.iter().find(|(k, _)| !slots.iter().any(|s| s == k)) {
            return Err(AnalystError::InvalidInput(format!(
                "template '{}' has no slot '{k}'",
                self.name
            )));
        }

        // Single pass so substituted values are never rescanned for slots.
        let mut out = String::with_capacity(self.body.len());
        let mut rest = self.body;
        while let Some(start) = rest.find("{{") {
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else { break };
            let slot = &after[..end];
            let value = values
                .iter()
                .find(|(k, _)| *k == slot)
                .map(|(_, v)| *v)
                .ok_or_else(|| {
                    AnalystError::InvalidInput(format!(
                        "template '{}' is missing slot '{slot}'",
                        self.name
                    ))
                })?;
            out.push_str(&rest[..start]);
            out.push_str(value);
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

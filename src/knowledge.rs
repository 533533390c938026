//! Definitions for failure-mode labels.
//!
//! Lookup order is fixed: repair manuals, then the user's acronym table, then
//! a web search. Each source may miss or fail; a failure in one source is
//! logged and treated as a miss.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AnalystError, Result};

/// Text used when no source knows a label.
pub const NO_DEFINITION: &str = "No semantic definition available.";

/// Query sent to the manual index for the combined report's repair context.
pub const REPAIR_QUERY: &str = "Repair procedures for detected failures";

// ---------------------------------------------------------------------------
// Retrieval seams
// ---------------------------------------------------------------------------

/// Passage retrieval over ingested repair manuals.
#[async_trait]
pub trait ManualIndex: Send + Sync {
    /// Up to `k` passages, best first.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<String>>;
}

/// Free-text web lookup. Never fails; a miss and an error look the same.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Option<String>;
}

/// Manual index with nothing in it.
#[derive(Debug, Default)]
pub struct EmptyManualIndex;

#[async_trait]
impl ManualIndex for EmptyManualIndex {
    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Web search that always misses.
#[derive(Debug, Default)]
pub struct NoWebSearch;

#[async_trait]
impl WebSearch for NoWebSearch {
    async fn search(&self, _query: &str) -> Option<String> {
        None
    }
}

// ---------------------------------------------------------------------------
// KeywordManualIndex
// ---------------------------------------------------------------------------

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "what", "does", "mean", "with", "from", "this", "that", "are", "was",
];

fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// True when `passage` contains any term of `label`. A manual hit that only
/// matched the query wording says nothing about the label.
fn mentions(passage: &str, label: &str) -> bool {
    let wanted = terms(label);
    !wanted.is_empty() && terms(passage).iter().any(|t| wanted.contains(t))
}

/// Passages ranked by how many distinct query terms they contain.
#[derive(Debug, Default)]
pub struct KeywordManualIndex {
    passages: Vec<String>,
}

impl KeywordManualIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split `text` on blank lines and index each paragraph.
    pub fn ingest(&mut self, text: &str) -> usize {
        let before = self.passages.len();
        for para in text.split("\n\n") {
            let para = para.trim();
            if !para.is_empty() {
                self.passages.push(para.to_string());
            }
        }
        self.passages.len() - before
    }

    /// Index every `.txt` and `.md` file directly under `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut index = Self::new();
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("txt") || e.eq_ignore_ascii_case("md"))
            })
            .collect();
        paths.sort();
        for path in paths {
            let text = std::fs::read_to_string(&path)?;
            let added = index.ingest(&text);
            debug!(file = %path.display(), passages = added, "manual indexed");
        }
        info!(dir = %dir.display(), passages = index.len(), "manual index loaded");
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

#[async_trait]
impl ManualIndex for KeywordManualIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<String>> {
        let mut wanted = terms(query);
        wanted.sort();
        wanted.dedup();
        if wanted.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let mut scored: Vec<(usize, &String)> = self
            .passages
            .iter()
            .filter_map(|p| {
                let have = terms(p);
                let score = wanted.iter().filter(|t| have.contains(t)).count();
                (score > 0).then_some((score, p))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(k).map(|(_, p)| p.clone()).collect())
    }
}

// ---------------------------------------------------------------------------
// DuckDuckGoSearch
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default)]
    abstract_text: String,
    #[serde(default)]
    related_topics: Vec<RelatedTopic>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RelatedTopic {
    #[serde(default)]
    text: Option<String>,
}

/// DuckDuckGo Instant Answer lookup.
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    url: String,
}

impl DuckDuckGoSearch {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    async fn fetch(&self, query: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("q", query), ("format", "json"), ("no_html", "1")])
            .send()
            .await
            .map_err(|e| AnalystError::Retrieval(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AnalystError::Retrieval(format!("HTTP {}", response.status())));
        }
        let answer: InstantAnswer = response
            .json()
            .await
            .map_err(|e| AnalystError::Retrieval(e.to_string()))?;
        let text = if answer.abstract_text.trim().is_empty() {
            answer.related_topics.into_iter().find_map(|t| t.text)
        } else {
            Some(answer.abstract_text)
        };
        Ok(text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()))
    }
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
    async fn search(&self, query: &str) -> Option<String> {
        match self.fetch(query).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(error = %e, "web search failed");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AcronymTable
// ---------------------------------------------------------------------------

/// User-supplied definitions for failure-mode labels. Entries are added or
/// overwritten, never removed.
#[derive(Debug, Default)]
pub struct AcronymTable {
    entries: RwLock<HashMap<String, String>>,
}

impl AcronymTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `defs` into the table and return the new total.
    pub fn extend<I>(&self, defs: I) -> usize
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.extend(defs);
        entries.len()
    }

    pub fn define(&self, name: impl Into<String>, definition: impl Into<String>) -> usize {
        self.extend([(name.into(), definition.into())])
    }

    /// Exact-match lookup.
    pub fn get(&self, name: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The subset of `names` with no definition, order preserved.
    pub fn unknown<'a, I>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        names
            .into_iter()
            .filter(|n| !entries.contains_key(*n))
            .map(str::to_string)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// KnowledgeResolver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefinitionSource {
    Manuals,
    UserDefinition,
    WebSearch,
}

impl fmt::Display for DefinitionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionSource::Manuals => write!(f, "Manuals"),
            DefinitionSource::UserDefinition => write!(f, "User Definition"),
            DefinitionSource::WebSearch => write!(f, "Web Search"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Definition {
    pub name: String,
    pub text: Option<String>,
    pub source: Option<DefinitionSource>,
}

impl Definition {
    /// One markdown line for the `Semantic Definitions:` prompt block.
    pub fn context_line(&self) -> String {
        match (&self.text, self.source) {
            (Some(text), Some(source)) => format!("- **{}**: {text} [Source: {source}]", self.name),
            _ => format!("- **{}**: {NO_DEFINITION}", self.name),
        }
    }
}

/// Walks manuals, acronyms and the web in that order.
#[derive(Clone)]
pub struct KnowledgeResolver {
    manuals: Arc<dyn ManualIndex>,
    acronyms: Arc<AcronymTable>,
    web: Arc<dyn WebSearch>,
    snippet_chars: usize,
}

impl KnowledgeResolver {
    pub fn new(manuals: Arc<dyn ManualIndex>, acronyms: Arc<AcronymTable>, web: Arc<dyn WebSearch>) -> Self {
        Self {
            manuals,
            acronyms,
            web,
            snippet_chars: 200,
        }
    }

    pub fn with_snippet_chars(mut self, chars: usize) -> Self {
        self.snippet_chars = chars;
        self
    }

    pub async fn resolve(&self, name: &str) -> Definition {
        let query = format!("What does failure mode {name} mean?");
        match self.manuals.search(&query, 1).await {
            Ok(hits) => {
                if let Some(hit) = hits.into_iter().find(|h| mentions(h, name)) {
                    return self.found(name, hit, DefinitionSource::Manuals);
                }
            }
            Err(e) => warn!(mode = name, error = %e, "manual lookup failed"),
        }

        if let Some(def) = self.acronyms.get(name) {
            return self.found(name, def, DefinitionSource::UserDefinition);
        }

        let query = format!("meaning of {name} failure mode reliability engineering");
        if let Some(hit) = self.web.search(&query).await {
            let snippet: String = hit.chars().take(self.snippet_chars).collect();
            if !snippet.trim().is_empty() {
                return self.found(name, snippet, DefinitionSource::WebSearch);
            }
        }

        debug!(mode = name, "no definition found");
        Definition {
            name: name.to_string(),
            text: None,
            source: None,
        }
    }

    /// Manual passages for `query`; a failing index yields nothing.
    pub async fn manual_excerpts(&self, query: &str, k: usize) -> Vec<String> {
        match self.manuals.search(query, k).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "manual excerpt lookup failed");
                Vec::new()
            }
        }
    }

    fn found(&self, name: &str, text: String, source: DefinitionSource) -> Definition {
        debug!(mode = name, %source, "definition resolved");
        Definition {
            name: name.to_string(),
            text: Some(text),
            source: Some(source),
        }
    }
}

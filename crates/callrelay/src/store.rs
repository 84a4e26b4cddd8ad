//! Document stores backing retrieval functions.

use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

pub type SearchFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<String>, String>> + Send + 'a>>;

/// A searchable collection of text documents.
pub trait DocumentStore: Send + Sync {
    /// Up to `limit` document texts relevant to `query`, best first.
    fn search<'a>(&'a self, query: &'a str, limit: usize) -> SearchFuture<'a>;
}

// ── InMemoryStore ──────────────────────────────────────────────────

/// Documents held in memory, ranked by query-term overlap.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    documents: Vec<String>,
}

fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

impl InMemoryStore {
    pub fn new(documents: Vec<String>) -> Self {
        Self { documents }
    }

    pub fn add(&mut self, document: impl Into<String>) {
        self.documents.push(document.into());
    }

    /// Load every `.txt` and `.md` file in `dir` (not recursive), in file
    /// name order.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, String> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| format!("failed to read store directory '{}': {e}", dir.display()))?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && matches!(
                        p.extension().and_then(|e| e.to_str()),
                        Some("txt") | Some("md")
                    )
            })
            .collect();
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| format!("failed to read document '{}': {e}", path.display()))?;
            documents.push(text);
        }
        debug!("Loaded {} documents from {}", documents.len(), dir.display());
        Ok(Self { documents })
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn rank(&self, query: &str, limit: usize) -> Vec<String> {
        let query_terms: HashSet<String> = terms(query).collect();
        if query_terms.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(usize, usize)> = self
            .documents
            .iter()
            .enumerate()
            .filter_map(|(i, doc)| {
                let score = terms(doc).filter(|t| query_terms.contains(t)).count();
                (score > 0).then_some((score, i))
            })
            .collect();
        // Highest score first; earlier documents win ties.
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, i)| self.documents[i].clone())
            .collect()
    }
}

impl DocumentStore for InMemoryStore {
    fn search<'a>(&'a self, query: &'a str, limit: usize) -> SearchFuture<'a> {
        Box::pin(async move { Ok(self.rank(query, limit)) })
    }
}

// ── HttpStore ──────────────────────────────────────────────────────

/// Remote store: POSTs `{query, limit}` and reads `documents` from the
/// response. Entries may be strings or objects with `text` or `content`.
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    documents: Vec<Value>,
}

impl HttpStore {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl DocumentStore for HttpStore {
    fn search<'a>(&'a self, query: &'a str, limit: usize) -> SearchFuture<'a> {
        Box::pin(async move {
            let resp = self
                .client
                .post(&self.url)
                .header("User-Agent", crate::USER_AGENT)
                .header("Accept", "application/json")
                .json(&json!({"query": query, "limit": limit}))
                .send()
                .await
                .map_err(|e| format!("store request failed: {e}"))?;

            if !resp.status().is_success() {
                let status = resp.status();
                return Err(format!("store returned HTTP {status}"));
            }

            let body: SearchResponse = resp
                .json()
                .await
                .map_err(|e| format!("invalid store response: {e}"))?;

            let documents = body
                .documents
                .into_iter()
                .filter_map(|doc| match doc {
                    Value::String(s) => Some(s),
                    Value::Object(map) => map
                        .get("text")
                        .or_else(|| map.get("content"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    other => {
                        warn!("Skipping unexpected store document: {other}");
                        None
                    }
                })
                .take(limit)
                .collect();
            Ok(documents)
        })
    }
}

// ── StoreRegistry ──────────────────────────────────────────────────

/// Named stores resolved when retrieval functions are built.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    stores: HashMap<String, Arc<dyn DocumentStore>>,
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("stores", &self.names())
            .finish()
    }
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, store: Arc<dyn DocumentStore>) {
        self.stores.insert(name.into(), store);
    }

    pub fn with(mut self, name: impl Into<String>, store: Arc<dyn DocumentStore>) -> Self {
        self.insert(name, store);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DocumentStore>> {
        self.stores.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.stores.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

//! Retrieval executor: query a document store, return matching texts.

use crate::functions::args::render_template;
use crate::functions::result::DispatchResult;
use crate::preview;
use crate::store::DocumentStore;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_RESULT_LIMIT: usize = 5;

pub type ComputeQuery = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// How the query string is derived from arguments.
#[derive(Clone)]
pub enum QueryBuilder {
    Template(String),
    /// A single string argument.
    Field(String),
    Computed(ComputeQuery),
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::Field("query".into())
    }
}

#[derive(Clone)]
pub struct RetrievalExecutor {
    store_name: String,
    store: Option<Arc<dyn DocumentStore>>,
    query: QueryBuilder,
    limit: usize,
}

impl fmt::Debug for RetrievalExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrievalExecutor")
            .field("store", &self.store_name)
            .field("bound", &self.store.is_some())
            .field("limit", &self.limit)
            .finish()
    }
}

impl RetrievalExecutor {
    /// `store` is `None` when the named store was not configured; the
    /// executor then fails every invocation.
    pub fn new(store_name: impl Into<String>, store: Option<Arc<dyn DocumentStore>>) -> Self {
        Self {
            store_name: store_name.into(),
            store,
            query: QueryBuilder::default(),
            limit: DEFAULT_RESULT_LIMIT,
        }
    }

    pub fn with_query(mut self, query: QueryBuilder) -> Self {
        self.query = query;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    fn build_query(&self, args: &Value) -> String {
        match &self.query {
            QueryBuilder::Template(t) => render_template(t, args),
            QueryBuilder::Field(field) => match args.get(field) {
                Some(Value::String(s)) => s.trim().to_string(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            },
            QueryBuilder::Computed(compute) => compute(args),
        }
    }

    pub async fn execute(&self, args: &Value) -> DispatchResult {
        let Some(store) = &self.store else {
            return DispatchResult::failure(format!(
                "Retrieval store '{}' is not configured",
                self.store_name
            ));
        };

        let query = self.build_query(args);
        if query.is_empty() {
            return DispatchResult::failure("Retrieval query is empty");
        }
        debug!("Retrieval from {} for: {}", self.store_name, preview(&query, 80));

        match store.search(&query, self.limit).await {
            Ok(documents) => {
                DispatchResult::results(documents.into_iter().map(Value::String).collect())
            }
            Err(e) => {
                warn!("Retrieval from {} failed: {e}", self.store_name);
                DispatchResult::failure(format!("Retrieval failed: {e}"))
            }
        }
    }
}

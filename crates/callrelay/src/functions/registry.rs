use super::builtin::builtin_definitions;
use super::{FunctionDefinition, FunctionSummary};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Owns every function definition, keyed by name.
///
/// Populated at startup and then shared read-only (usually behind an `Arc`).
/// Listing order is by name, so it is stable across runs.
pub struct FunctionRegistry {
    functions: BTreeMap<String, FunctionDefinition>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FunctionRegistry {
    /// A registry with the built-in browser actions.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for def in builtin_definitions() {
            registry.register(def);
        }
        registry
    }

    /// A registry with nothing in it.
    pub fn empty() -> Self {
        Self {
            functions: BTreeMap::new(),
        }
    }

    /// Insert a definition. An existing entry with the same name is replaced
    /// and returned.
    pub fn register(&mut self, def: FunctionDefinition) -> Option<FunctionDefinition> {
        let name = def.name.clone();
        let previous = self.functions.insert(name.clone(), def);
        if let Some(prev) = &previous {
            debug!("Function {name} re-registered (was {})", prev.kind());
        }
        previous
    }

    /// Register (builder pattern).
    pub fn with(mut self, def: FunctionDefinition) -> Self {
        self.register(def);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDefinition> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn list(&self) -> Vec<FunctionSummary> {
        self.functions.values().map(|d| d.summary()).collect()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &FunctionDefinition> {
        self.functions.values()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

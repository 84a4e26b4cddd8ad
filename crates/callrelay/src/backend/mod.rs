//! LLM completion backends.
//!
//! The relay talks to the model through [`CompletionBackend`]: one call for a
//! full completion, one for an incremental stream of [`BackendChunk`]s.
//! [`OllamaBackend`](ollama::OllamaBackend) implements it over the
//! newline-delimited JSON protocol decoded by [`ndjson`].

pub mod ndjson;
pub mod ollama;

use futures::stream::BoxStream;
use std::future::Future;
use std::pin::Pin;

/// What to ask the model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system: Option<String>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// One decoded record of a streamed completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendChunk {
    /// Text fragment, `None` when the record carried no text.
    pub text: Option<String>,
    /// Set on the final record.
    pub done: bool,
}

impl BackendChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            text: None,
            done: true,
        }
    }
}

pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send + 'a>>;
pub type ChunkStream<'a> = BoxStream<'a, Result<BackendChunk, String>>;

/// The model collaborator.
pub trait CompletionBackend: Send + Sync {
    /// Full, non-streamed completion text.
    fn generate<'a>(&'a self, request: &'a GenerateRequest) -> BackendFuture<'a, String>;

    /// Open a streamed completion. Resolves once the backend has accepted
    /// the request; chunks then arrive through the returned stream.
    fn stream<'a>(&'a self, request: &'a GenerateRequest) -> BackendFuture<'a, ChunkStream<'a>>;
}

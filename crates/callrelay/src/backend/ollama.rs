//! Ollama-style `/api/generate` client.

use super::ndjson::NdjsonDecoder;
use super::{BackendChunk, BackendFuture, ChunkStream, CompletionBackend, GenerateRequest};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

/// Client for an Ollama-compatible completion server.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: Option<f32>,
    connect_timeout: Duration,
}

impl OllamaBackend {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent(crate::USER_AGENT)
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            temperature: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Limit on how long the backend may take to answer the opening request.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self) -> String {
        format!("{}/api/generate", self.endpoint.trim_end_matches('/'))
    }

    /// Send the request and check the status.
    async fn open(&self, request: &GenerateRequest, stream: bool) -> Result<reqwest::Response, String> {
        let body = GenerateBody {
            model: &self.model,
            prompt: &request.prompt,
            system: request.system.as_deref(),
            stream,
            options: self.temperature.map(|temperature| GenerateOptions { temperature }),
        };
        debug!("LLM request to {} (model {}, stream={stream})", self.url(), self.model);

        let send = self.client.post(self.url()).json(&body).send();
        let resp = tokio::time::timeout(self.connect_timeout, send)
            .await
            .map_err(|_| {
                format!(
                    "LLM backend did not respond within {:.0} seconds",
                    self.connect_timeout.as_secs_f64()
                )
            })?
            .map_err(|e| format!("LLM backend request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("LLM backend HTTP {status}: {text}"));
        }
        Ok(resp)
    }
}

struct StreamState {
    resp: Option<reqwest::Response>,
    decoder: NdjsonDecoder,
    pending: VecDeque<Result<BackendChunk, String>>,
}

impl CompletionBackend for OllamaBackend {
    fn generate<'a>(&'a self, request: &'a GenerateRequest) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let resp = self.open(request, false).await?;
            let body: GenerateResponse = resp
                .json()
                .await
                .map_err(|e| format!("invalid LLM response: {e}"))?;
            if let Some(error) = body.error {
                return Err(format!("LLM backend error: {error}"));
            }
            Ok(body.response)
        })
    }

    fn stream<'a>(&'a self, request: &'a GenerateRequest) -> BackendFuture<'a, ChunkStream<'a>> {
        Box::pin(async move {
            let resp = self.open(request, true).await?;
            let state = StreamState {
                resp: Some(resp),
                decoder: NdjsonDecoder::new(),
                pending: VecDeque::new(),
            };

            let chunks = futures::stream::unfold(state, |mut st| async move {
                loop {
                    if let Some(item) = st.pending.pop_front() {
                        return Some((item, st));
                    }
                    let resp = st.resp.as_mut()?;
                    match resp.chunk().await {
                        Ok(Some(bytes)) => {
                            let decoded = st.decoder.push(&bytes);
                            st.pending.extend(decoded);
                        }
                        Ok(None) => {
                            st.resp = None;
                            if let Some(item) = st.decoder.finish() {
                                st.pending.push_back(item);
                            }
                        }
                        Err(e) => {
                            st.resp = None;
                            st.pending
                                .push_back(Err(format!("failed to read LLM stream: {e}")));
                        }
                    }
                }
            });
            Ok(chunks.boxed())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::testing::serve;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};

    async fn collect(backend: &OllamaBackend, prompt: &str) -> Result<Vec<BackendChunk>, String> {
        let request = GenerateRequest::new(prompt);
        let stream = backend.stream(&request).await?;
        stream.collect::<Vec<_>>().await.into_iter().collect()
    }

    #[tokio::test]
    async fn streams_ndjson_records() {
        let base = serve(Router::new().route(
            "/api/generate",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["stream"], true);
                assert_eq!(body["model"], "test-model");
                assert_eq!(body["options"]["temperature"], 0.5);
                "{\"response\":\"Hi\",\"done\":false}\n{\"response\":\" there\",\"done\":true}\n"
            }),
        ))
        .await;
        let backend = OllamaBackend::new(base, "test-model")
            .unwrap()
            .with_temperature(Some(0.5));
        let chunks = collect(&backend, "hello").await.unwrap();
        assert_eq!(
            chunks,
            vec![
                BackendChunk::text("Hi"),
                BackendChunk {
                    text: Some(" there".into()),
                    done: true
                }
            ]
        );
    }

    #[tokio::test]
    async fn generate_returns_full_text() {
        let base = serve(Router::new().route(
            "/api/generate",
            post(|Json(body): Json<Value>| async move {
                Json(json!({"response": format!("system={}", body["system"]), "done": true}))
            }),
        ))
        .await;
        let backend = OllamaBackend::new(base, "m").unwrap();
        let request = GenerateRequest::new("p").with_system("be brief");
        let text = backend.generate(&request).await.unwrap();
        assert_eq!(text, "system=\"be brief\"");
    }

    #[tokio::test]
    async fn non_2xx_is_error_with_body() {
        let base = serve(Router::new().route(
            "/api/generate",
            post(|| async { (StatusCode::NOT_FOUND, "model missing") }),
        ))
        .await;
        let backend = OllamaBackend::new(base, "m").unwrap();
        let err = collect(&backend, "x").await.unwrap_err();
        assert!(err.starts_with("LLM backend HTTP 404"), "got {err}");
        assert!(err.contains("model missing"));
    }

    #[tokio::test]
    async fn connect_timeout_aborts_silent_backend() {
        let base = serve(Router::new().route(
            "/api/generate",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        ))
        .await;
        let backend = OllamaBackend::new(base, "m")
            .unwrap()
            .with_connect_timeout(Duration::from_millis(100));
        let err = collect(&backend, "x").await.unwrap_err();
        assert!(err.contains("did not respond"), "got {err}");
    }

    #[tokio::test]
    async fn unreachable_backend_is_error() {
        let backend = OllamaBackend::new("http://127.0.0.1:1", "m").unwrap();
        let err = backend.generate(&GenerateRequest::new("x")).await.unwrap_err();
        assert!(err.starts_with("LLM backend request failed"));
    }
}

//! HTTP API executor.

use super::ExecutionContext;
use crate::functions::args::{percent_encode, render_template, render_template_with};
use crate::functions::result::DispatchResult;
use reqwest::Method;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

pub type ComputeEndpoint = Arc<dyn Fn(&Value) -> String + Send + Sync>;
pub type ComputeBody = Arc<dyn Fn(&Value) -> Value + Send + Sync>;
/// Maps `(parsed response, call arguments)` to the final result.
pub type TransformFn = Arc<dyn Fn(Value, &Value) -> DispatchResult + Send + Sync>;

/// Where the request goes.
#[derive(Clone)]
pub enum Endpoint {
    Static(String),
    /// `{{key}}` placeholders filled from arguments, values percent-encoded.
    Template(String),
    Computed(ComputeEndpoint),
}

/// What the request sends.
#[derive(Clone)]
pub enum RequestBody {
    None,
    /// The parsed arguments as JSON.
    Arguments,
    Computed(ComputeBody),
}

/// How the parsed response becomes a result.
#[derive(Clone)]
pub enum ResponseTransform {
    /// The parsed body as-is.
    Raw,
    /// The value at a JSON pointer (`null` if absent).
    Pointer(String),
    /// An array at a JSON pointer, reported as a listing. A missing or empty
    /// array is an empty listing, not a failure.
    Listing { pointer: String },
    Computed(TransformFn),
}

/// Calls an HTTP endpoint and returns its JSON.
#[derive(Clone)]
pub struct ApiExecutor {
    endpoint: Endpoint,
    method: Method,
    headers: Vec<(String, String)>,
    body: RequestBody,
    transform: ResponseTransform,
}

impl fmt::Debug for ApiExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endpoint = match &self.endpoint {
            Endpoint::Static(url) | Endpoint::Template(url) => url.as_str(),
            Endpoint::Computed(_) => "<computed>",
        };
        f.debug_struct("ApiExecutor")
            .field("endpoint", &endpoint)
            .field("method", &self.method)
            .field("headers", &self.headers.len())
            .finish()
    }
}

impl ApiExecutor {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            method: Method::GET,
            headers: Vec::new(),
            body: RequestBody::None,
            transform: ResponseTransform::Raw,
        }
    }

    /// GET a fixed URL.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Endpoint::Static(url.into()))
    }

    /// GET a URL built from a `{{key}}` template.
    pub fn template(template: impl Into<String>) -> Self {
        Self::new(Endpoint::Template(template.into()))
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a header. Values may contain `{{key}}` placeholders.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_transform(mut self, transform: ResponseTransform) -> Self {
        self.transform = transform;
        self
    }

    fn resolve_url(&self, args: &Value) -> String {
        match &self.endpoint {
            Endpoint::Static(url) => url.clone(),
            Endpoint::Template(template) => render_template_with(template, args, percent_encode),
            Endpoint::Computed(compute) => compute(args),
        }
    }

    pub async fn execute(&self, args: &Value, ctx: &ExecutionContext) -> DispatchResult {
        let url = self.resolve_url(args);
        debug!("API call {} {url}", self.method);

        let mut req = ctx
            .http
            .request(self.method.clone(), &url)
            .header("User-Agent", crate::USER_AGENT)
            .header("Accept", "application/json");
        for (name, value) in &self.headers {
            req = req.header(name.as_str(), render_template(value, args));
        }
        req = match &self.body {
            RequestBody::None => req,
            RequestBody::Arguments => req.json(args),
            RequestBody::Computed(build) => req.json(&build(args)),
        };

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("API request to {url} failed: {e}");
                return DispatchResult::failure(format!("API request failed: {e}"));
            }
        };

        let status = resp.status();
        if !status.is_success() {
            warn!("API {url} returned HTTP {status}");
            return DispatchResult::failure(format!("API returned HTTP {status}"));
        }

        // Parse the text ourselves: the declared content type is not trusted.
        let text = match resp.text().await {
            Ok(t) => t,
            Err(e) => return DispatchResult::failure(format!("failed to read API response: {e}")),
        };
        let data: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                debug!("API {url} returned non-JSON body: {e}");
                return DispatchResult::failure("Invalid response format");
            }
        };

        self.apply_transform(data, args)
    }

    fn apply_transform(&self, data: Value, args: &Value) -> DispatchResult {
        match &self.transform {
            ResponseTransform::Raw => DispatchResult::data(data),
            ResponseTransform::Pointer(pointer) => {
                DispatchResult::data(data.pointer(pointer).cloned().unwrap_or(Value::Null))
            }
            ResponseTransform::Listing { pointer } => {
                let results = match data.pointer(pointer) {
                    Some(Value::Array(items)) => items.clone(),
                    _ => Vec::new(),
                };
                DispatchResult::results(results)
            }
            ResponseTransform::Computed(transform) => transform(data, args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::SecurityPolicy;
    use crate::executors::testing::serve;
    use crate::functions::result::SuccessPayload;
    use axum::Json;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode, header};
    use axum::routing::{get, post};
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(SecurityPolicy::default()).unwrap()
    }

    #[tokio::test]
    async fn non_2xx_is_failure_with_status() {
        let base = serve(Router::new().route(
            "/boom",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "oops") }),
        ))
        .await;
        let exec = ApiExecutor::get(format!("{base}/boom"));
        let result = exec.execute(&json!({}), &ctx()).await;
        let err = result.error().unwrap();
        assert!(err.contains("500"), "got {err}");
    }

    #[tokio::test]
    async fn invalid_json_despite_content_type() {
        let base = serve(Router::new().route(
            "/lies",
            get(|| async { ([(header::CONTENT_TYPE, "application/json")], "<html>nope</html>") }),
        ))
        .await;
        let exec = ApiExecutor::get(format!("{base}/lies"));
        let result = exec.execute(&json!({}), &ctx()).await;
        assert_eq!(
            result.to_json(),
            json!({"success": false, "error": "Invalid response format"})
        );
    }

    #[tokio::test]
    async fn json_parsed_from_plain_text_body() {
        let base = serve(Router::new().route("/text", get(|| async { r#"{"temp": 21}"# }))).await;
        let exec = ApiExecutor::get(format!("{base}/text"));
        let result = exec.execute(&json!({}), &ctx()).await;
        assert_eq!(result, DispatchResult::data(json!({"temp": 21})));
    }

    #[tokio::test]
    async fn sends_identifying_headers() {
        let base = serve(Router::new().route(
            "/headers",
            get(|headers: HeaderMap| async move {
                Json(json!({
                    "ua": headers.get("user-agent").and_then(|v| v.to_str().ok()),
                    "accept": headers.get("accept").and_then(|v| v.to_str().ok()),
                }))
            }),
        ))
        .await;
        let exec = ApiExecutor::get(format!("{base}/headers"));
        let result = exec.execute(&json!({}), &ctx()).await;
        let DispatchResult::Success(SuccessPayload::Data(data)) = result else {
            panic!("expected data");
        };
        assert_eq!(data["ua"], crate::USER_AGENT);
        assert_eq!(data["accept"], "application/json");
    }

    #[tokio::test]
    async fn template_endpoint_and_json_body() {
        let base = serve(Router::new().route(
            "/items/{id}",
            post(
                |axum::extract::Path(id): axum::extract::Path<String>, Json(body): Json<Value>| async move {
                    Json(json!({"id": id, "echo": body}))
                },
            ),
        ))
        .await;
        let exec = ApiExecutor::template(format!("{base}/items/{{{{id}}}}"))
            .with_method(Method::POST)
            .with_body(RequestBody::Arguments)
            .with_transform(ResponseTransform::Pointer("/echo".into()));
        let args = json!({"id": "a b", "note": "x"});
        let result = exec.execute(&args, &ctx()).await;
        assert_eq!(result, DispatchResult::data(args));
    }

    #[tokio::test]
    async fn empty_listing_is_success() {
        let base = serve(Router::new().route(
            "/search",
            get(|| async { Json(json!({"hits": []})) }),
        ))
        .await;
        let exec = ApiExecutor::get(format!("{base}/search"))
            .with_transform(ResponseTransform::Listing {
                pointer: "/hits".into(),
            });
        let result = exec.execute(&json!({}), &ctx()).await;
        assert_eq!(result, DispatchResult::results(vec![]));
    }

    #[tokio::test]
    async fn unreachable_host_is_failure() {
        let exec = ApiExecutor::get("http://127.0.0.1:1/nothing");
        let result = exec.execute(&json!({}), &ctx()).await;
        assert!(result.error().unwrap().starts_with("API request failed"));
    }
}

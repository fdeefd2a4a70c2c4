//! HTTP transport for the recipe REST API.
//!
//! `HttpTransport` is the seam between the session layer and the network.
//! `ReqwestTransport` is the production implementation; tests substitute a
//! scripted transport.

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{header, multipart, Client, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    /// Only POST and PUT carry a request body.
    pub fn allows_body(self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One field of a multipart form.
#[derive(Debug, Clone, PartialEq)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        content_type: String,
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Multipart(Vec<FormPart>),
}

/// A request as seen by the transport. Clonable so it can be reissued
/// after a credential refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL, or an absolute URL.
    pub path: String,
    pub bearer: Option<String>,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            bearer: None,
            body: RequestBody::Empty,
        }
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Decode the body as JSON. An empty body decodes as `null`, so `()`
    /// and `Option<T>` work for 204 responses.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::from_value(Value::Null)?);
        }
        Ok(serde_json::from_slice(&self.body)?)
    }
}

pub trait HttpTransport: Send + Sync {
    /// Issue the request. Non-2xx statuses come back as `Err`.
    fn execute(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, ApiError>>;
}

/// Transport backed by `reqwest`.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// The bearer token, unless the request leaves the API server's origin.
    fn bearer_for<'a>(&self, request: &'a ApiRequest) -> Option<&'a str> {
        let token = request.bearer.as_deref()?;
        if is_absolute(&request.path) && !same_origin(&self.base_url, &request.path) {
            warn!(url = %request.path, "Withholding credentials from foreign origin");
            return None;
        }
        Some(token)
    }

    fn build_form(parts: &[FormPart]) -> Result<multipart::Form, ApiError> {
        let mut form = multipart::Form::new();
        for part in parts {
            form = match part {
                FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
                FormPart::File {
                    name,
                    file_name,
                    content_type,
                    bytes,
                } => {
                    let file = multipart::Part::bytes(bytes.clone())
                        .file_name(file_name.clone())
                        .mime_str(content_type)?;
                    form.part(name.clone(), file)
                }
            };
        }
        Ok(form)
    }

    async fn send_once(&self, request: &ApiRequest) -> Result<reqwest::Response, ApiError> {
        let url = self.url_for(&request.path);
        let mut builder = self
            .client
            .request(request.method.into(), url.as_str())
            .header(header::ACCEPT, "application/json");

        if let Some(token) = self.bearer_for(request) {
            builder = builder.bearer_auth(token);
        }

        if request.method.allows_body() {
            builder = match request.body {
                RequestBody::Empty => builder,
                RequestBody::Json(ref body) => builder.json(body),
                RequestBody::Multipart(ref parts) => builder.multipart(Self::build_form(parts)?),
            };
        }

        debug!(method = %request.method, url = %url, "Sending request");
        Ok(builder.send().await?)
    }

    async fn execute_with_retry(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self.send_once(&request).await?;
            let status = response.status();

            if status.is_success() {
                let body = response.bytes().await?;
                return Ok(ApiResponse::new(status.as_u16(), body.to_vec()));
            }

            if status.as_u16() == 429 {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited);
                }
                warn!(path = %request.path, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2; // Exponential backoff
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            debug!(path = %request.path, status = status.as_u16(), "Request failed");
            return Err(ApiError::from_status(status.as_u16(), &body));
        }
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, ApiError>> {
        Box::pin(self.execute_with_retry(request))
    }
}

fn is_absolute(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

/// Same scheme, host and port.
fn same_origin(base: &str, url: &str) -> bool {
    match (Url::parse(base), Url::parse(url)) {
        (Ok(base), Ok(url)) => base.origin() == url.origin(),
        _ => false,
    }
}

/// Absolute URLs (pagination links, media files) are used as-is.
fn join_url(base: &str, path: &str) -> String {
    if is_absolute(path) {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("http://localhost:8585/api", "/token/"),
            "http://localhost:8585/api/token/"
        );
        assert_eq!(
            join_url("http://localhost:8585/api/", "recipes/"),
            "http://localhost:8585/api/recipes/"
        );
        assert_eq!(
            join_url("http://localhost:8585/api", "https://cdn.example.com/backup.json"),
            "https://cdn.example.com/backup.json"
        );
    }

    #[test]
    fn test_same_origin() {
        let base = "http://localhost:8585/api";
        assert!(same_origin(base, "http://localhost:8585/api/recipes/?page=2"));
        assert!(same_origin(base, "http://localhost:8585/media/backup.json"));
        assert!(!same_origin(base, "http://127.0.0.1:8585/api/recipes/"));
        assert!(!same_origin(base, "http://localhost:9000/api/recipes/"));
        assert!(!same_origin(base, "https://localhost:8585/api/recipes/"));
        assert!(!same_origin("not a url", "http://localhost:8585/"));
        assert!(same_origin("https://recipes.example/api", "https://recipes.example:443/x"));
    }

    #[test]
    fn test_bearer_withheld_from_foreign_origin() {
        let transport = ReqwestTransport::new("http://localhost:8585/api").unwrap();

        let relative = ApiRequest::new(Method::Get, "/recipes/").bearer("SECRET.ACCESS.TOKEN");
        assert_eq!(transport.bearer_for(&relative), Some("SECRET.ACCESS.TOKEN"));

        let own = ApiRequest::new(Method::Get, "http://localhost:8585/api/recipes/?page=2")
            .bearer("SECRET.ACCESS.TOKEN");
        assert_eq!(transport.bearer_for(&own), Some("SECRET.ACCESS.TOKEN"));

        let foreign =
            ApiRequest::new(Method::Get, "http://127.0.0.1:9/page2").bearer("SECRET.ACCESS.TOKEN");
        assert_eq!(transport.bearer_for(&foreign), None);

        let anonymous = ApiRequest::new(Method::Get, "/recipes/");
        assert_eq!(transport.bearer_for(&anonymous), None);
    }

    #[test]
    fn test_method_body_rules() {
        assert!(Method::Post.allows_body());
        assert!(Method::Put.allows_body());
        assert!(!Method::Get.allows_body());
        assert!(!Method::Delete.allows_body());
        assert_eq!(Method::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_empty_response_decodes_as_null() {
        let response = ApiResponse::new(204, Vec::new());
        response.json::<()>().expect("empty body should decode as unit");

        let maybe: Option<Value> = ApiResponse::new(200, "  ").json().unwrap();
        assert!(maybe.is_none());
    }

    #[test]
    fn test_invalid_json_is_decode_error() {
        let err = ApiResponse::new(200, "not json").json::<Value>().unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }

    #[test]
    fn test_build_form_accepts_file_and_text_parts() {
        let parts = vec![
            FormPart::File {
                name: "backup_file".into(),
                file_name: "backup.json".into(),
                content_type: "application/json".into(),
                bytes: b"[]".to_vec(),
            },
            FormPart::Text {
                name: "overwrite".into(),
                value: "true".into(),
            },
        ];
        assert!(ReqwestTransport::build_form(&parts).is_ok());
    }
}

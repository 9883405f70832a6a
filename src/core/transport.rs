//! HTTP Transport
//!
//! HTTP client interface and implementations used to reach the authorization
//! server, the resource servers and the revocation list endpoint.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{EngineError, NetworkError, ProtocolError};

/// HTTP request definition.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Request URL.
    pub url: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: Option<String>,
    /// Request timeout.
    pub timeout: Option<Duration>,
}

/// HTTP method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// HTTP response definition.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Status text.
    pub status_text: String,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: String,
}

impl HttpResponse {
    /// Plain response with a status and body.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            status_text: if (200..300).contains(&status) { "OK" } else { "Error" }.to_string(),
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// JSON response.
    pub fn json<T: serde::Serialize>(status: u16, body: &T) -> Self {
        let mut response = Self::new(status, serde_json::to_string(body).unwrap_or_default());
        response
            .headers
            .insert("content-type".to_string(), "application/json".to_string());
        response
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP transport interface (for dependency injection).
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send an HTTP request.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, EngineError>;
}

/// Default reqwest-based HTTP transport.
pub struct ReqwestHttpTransport {
    client: reqwest::Client,
    default_timeout: Duration,
    max_response_size: usize,
}

impl ReqwestHttpTransport {
    /// Create new transport with default settings.
    pub fn new() -> Result<Self, EngineError> {
        Self::with_options(Duration::from_secs(30), 1048576) // 1MB
    }

    /// Create transport with custom options.
    pub fn with_options(timeout: Duration, max_response_size: usize) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                EngineError::Network(NetworkError::ConnectionFailed {
                    message: format!("Failed to create HTTP client: {}", e),
                })
            })?;

        Ok(Self {
            client,
            default_timeout: timeout,
            max_response_size,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestHttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, EngineError> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let mut req_builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
            HttpMethod::Delete => self.client.delete(&request.url),
        };

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key, value);
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        req_builder = req_builder.timeout(timeout);

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Network(NetworkError::Timeout { timeout })
            } else {
                EngineError::Network(NetworkError::ConnectionFailed {
                    message: e.to_string(),
                })
            }
        })?;

        let status = response.status().as_u16();
        let status_text = response
            .status()
            .canonical_reason()
            .unwrap_or("")
            .to_string();

        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.to_string().to_lowercase(), v.to_string());
            }
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_response_size {
                return Err(EngineError::Protocol(ProtocolError::ResponseTooLarge {
                    size: len as usize,
                }));
            }
        }

        let body = response.text().await.map_err(|e| {
            EngineError::Protocol(ProtocolError::InvalidResponse {
                message: e.to_string(),
            })
        })?;

        if body.len() > self.max_response_size {
            return Err(EngineError::Protocol(ProtocolError::ResponseTooLarge {
                size: body.len(),
            }));
        }

        Ok(HttpResponse {
            status,
            status_text,
            headers,
            body,
        })
    }
}

type RouteKey = (HttpMethod, String);
type MockReply = Result<HttpResponse, String>;

/// Mock HTTP transport for testing.
///
/// Replies are looked up in order: one-shot replies queued for the exact
/// method and URL, the sticky reply for that route, the global FIFO queue,
/// then the default response.
#[derive(Default)]
pub struct MockHttpTransport {
    queued_routes: Mutex<HashMap<RouteKey, VecDeque<MockReply>>>,
    sticky_routes: Mutex<HashMap<RouteKey, MockReply>>,
    responses: Mutex<VecDeque<HttpResponse>>,
    request_history: Mutex<Vec<HttpRequest>>,
    default_response: Mutex<Option<HttpResponse>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockHttpTransport {
    /// Create new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response to return.
    pub fn queue_response(&self, response: HttpResponse) -> &Self {
        lock(&self.responses).push_back(response);
        self
    }

    /// Queue a JSON response.
    pub fn queue_json_response<T: serde::Serialize>(&self, status: u16, body: &T) -> &Self {
        self.queue_response(HttpResponse::json(status, body))
    }

    /// Set default response when nothing else matches.
    pub fn set_default_response(&self, response: HttpResponse) -> &Self {
        *lock(&self.default_response) = Some(response);
        self
    }

    /// Always answer `method url` with `response` (replaces an earlier route).
    pub fn on(&self, method: HttpMethod, url: &str, response: HttpResponse) -> &Self {
        lock(&self.sticky_routes).insert((method, url.to_string()), Ok(response));
        self
    }

    /// Always fail `method url` with a connection error.
    pub fn fail_on(&self, method: HttpMethod, url: &str, message: &str) -> &Self {
        lock(&self.sticky_routes).insert((method, url.to_string()), Err(message.to_string()));
        self
    }

    /// Answer the next `method url` request with `response`.
    pub fn queue_on(&self, method: HttpMethod, url: &str, response: HttpResponse) -> &Self {
        lock(&self.queued_routes)
            .entry((method, url.to_string()))
            .or_default()
            .push_back(Ok(response));
        self
    }

    /// Fail the next `method url` request with a connection error.
    pub fn queue_error_on(&self, method: HttpMethod, url: &str, message: &str) -> &Self {
        lock(&self.queued_routes)
            .entry((method, url.to_string()))
            .or_default()
            .push_back(Err(message.to_string()));
        self
    }

    /// Get request history.
    pub fn get_requests(&self) -> Vec<HttpRequest> {
        lock(&self.request_history).clone()
    }

    /// Requests sent to `method url`.
    pub fn requests_to(&self, method: HttpMethod, url: &str) -> Vec<HttpRequest> {
        lock(&self.request_history)
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .cloned()
            .collect()
    }

    /// Get last request.
    pub fn get_last_request(&self) -> Option<HttpRequest> {
        lock(&self.request_history).last().cloned()
    }

    /// Clear request history.
    pub fn clear_history(&self) {
        lock(&self.request_history).clear();
    }

    fn next_reply(&self, key: &RouteKey) -> Option<MockReply> {
        if let Some(reply) = lock(&self.queued_routes)
            .get_mut(key)
            .and_then(|queue| queue.pop_front())
        {
            return Some(reply);
        }
        if let Some(reply) = lock(&self.sticky_routes).get(key).cloned() {
            return Some(reply);
        }
        if let Some(response) = lock(&self.responses).pop_front() {
            return Some(Ok(response));
        }
        lock(&self.default_response).clone().map(Ok)
    }
}

#[async_trait]
impl HttpTransport for MockHttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, EngineError> {
        let key = (request.method, request.url.clone());
        lock(&self.request_history).push(request);

        match self.next_reply(&key) {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(EngineError::Network(NetworkError::ConnectionFailed {
                message,
            })),
            None => Err(EngineError::Network(NetworkError::ConnectionFailed {
                message: "No mock response available".to_string(),
            })),
        }
    }
}

/// Create production HTTP transport.
pub fn create_transport(timeout: Option<Duration>) -> Result<ReqwestHttpTransport, EngineError> {
    match timeout {
        Some(t) => ReqwestHttpTransport::with_options(t, 1048576),
        None => ReqwestHttpTransport::new(),
    }
}

/// Create mock HTTP transport for testing.
pub fn create_mock_transport() -> MockHttpTransport {
    MockHttpTransport::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(url: &str) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: url.to_string(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_mock_transport() {
        let transport = MockHttpTransport::new();
        transport.queue_json_response(200, &serde_json::json!({"key": "value"}));

        let response = transport.send(get("https://example.com")).await.unwrap();
        assert_eq!(response.status, 200);
        assert!(response.body.contains("value"));

        let history = transport.get_requests();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].url, "https://example.com");
    }

    #[tokio::test]
    async fn test_mock_route_precedence() {
        let transport = MockHttpTransport::new();
        transport
            .on(HttpMethod::Get, "http://rs/temp", HttpResponse::new(200, "sticky"))
            .queue_on(HttpMethod::Get, "http://rs/temp", HttpResponse::new(401, "once"))
            .set_default_response(HttpResponse::new(404, "default"));

        let first = transport.send(get("http://rs/temp")).await.unwrap();
        let second = transport.send(get("http://rs/temp")).await.unwrap();
        let other = transport.send(get("http://rs/other")).await.unwrap();

        assert_eq!(first.body, "once");
        assert_eq!(second.body, "sticky");
        assert_eq!(other.body, "default");
        assert_eq!(transport.requests_to(HttpMethod::Get, "http://rs/temp").len(), 2);
    }

    #[tokio::test]
    async fn test_mock_queue_is_fifo() {
        let transport = MockHttpTransport::new();
        transport
            .queue_response(HttpResponse::new(200, "first"))
            .queue_response(HttpResponse::new(200, "second"));

        assert_eq!(transport.send(get("http://a")).await.unwrap().body, "first");
        assert_eq!(transport.send(get("http://a")).await.unwrap().body, "second");
        assert!(transport.send(get("http://a")).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_route_failure() {
        let transport = MockHttpTransport::new();
        transport.fail_on(HttpMethod::Post, "http://as/token", "refused");

        let mut request = get("http://as/token");
        request.method = HttpMethod::Post;
        let result = transport.send(request).await;
        assert!(matches!(result, Err(EngineError::Network(_))));
    }

    #[test]
    fn test_http_method_as_str() {
        assert_eq!(HttpMethod::Get.as_str(), "GET");
        assert_eq!(HttpMethod::Post.as_str(), "POST");
        assert_eq!(HttpMethod::Put.as_str(), "PUT");
        assert_eq!(HttpMethod::Delete.as_str(), "DELETE");
    }
}

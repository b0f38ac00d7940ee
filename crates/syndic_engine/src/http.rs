//! HTTP client abstraction.
//!
//! The engine only needs one-way POSTs: republish requests to an origin and
//! webhook deliveries from a hub. The actual client is abstracted so
//! different HTTP libraries, or an in-process loopback, can be plugged in.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// An HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A 200 response with a text body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body as lossy UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with a JSON body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// Trait for in-process servers reachable through a [`LoopbackClient`].
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST request.
    fn handle_post(&self, url: &str, body: &[u8]) -> Result<HttpResponse, String>;
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String> {
        self.server.handle_post(url, &body)
    }
}

/// A recorded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// Target URL.
    pub url: String,
    /// Request body.
    pub body: Vec<u8>,
}

/// A client that records requests and answers with a fixed response.
pub struct RecordingHttpClient {
    requests: RwLock<Vec<RecordedRequest>>,
    response: RwLock<Result<HttpResponse, String>>,
    healthy: AtomicBool,
}

impl RecordingHttpClient {
    /// Creates a client answering `200 OK`.
    pub fn new() -> Self {
        Self {
            requests: RwLock::new(Vec::new()),
            response: RwLock::new(Ok(HttpResponse::ok("OK"))),
            healthy: AtomicBool::new(true),
        }
    }

    /// Sets the response for subsequent requests.
    pub fn set_response(&self, response: Result<HttpResponse, String>) {
        *self.response.write() = response;
    }

    /// Sets the health flag.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Requests sent so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.read().clone()
    }
}

impl Default for RecordingHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for RecordingHttpClient {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String> {
        self.requests.write().push(RecordedRequest {
            url: url.to_string(),
            body,
        });
        self.response.read().clone()
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl LoopbackServer for Echo {
        fn handle_post(&self, url: &str, body: &[u8]) -> Result<HttpResponse, String> {
            if url.ends_with("/missing") {
                return Err("connection refused".into());
            }
            Ok(HttpResponse::ok(body.to_vec()))
        }
    }

    #[test]
    fn loopback_routes_to_server() {
        let client = LoopbackClient::new(Echo);
        let response = client.post("https://a.example.com/webhook", b"ping".to_vec()).unwrap();
        assert!(response.is_success());
        assert_eq!(response.text(), "ping");
        assert!(client.post("https://a.example.com/missing", vec![]).is_err());
    }

    #[test]
    fn recording_client() {
        let client = RecordingHttpClient::new();
        client.post("https://b.example.com/webhook", b"{}".to_vec()).unwrap();
        client.set_response(Ok(HttpResponse {
            status: 500,
            body: b"boom".to_vec(),
        }));
        let failed = client.post("https://b.example.com/webhook", vec![]).unwrap();
        assert!(!failed.is_success());
        assert_eq!(client.requests().len(), 2);

        client.set_healthy(false);
        assert!(!client.is_healthy());
    }
}

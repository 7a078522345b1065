use crate::error::{EdgeError, Result, TransportError};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::time::Duration;

/// Response body as a stream of chunks
pub type BodyStream = BoxStream<'static, std::result::Result<Vec<u8>, TransportError>>;

/// HTTP response with a streaming body
pub struct HttpResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: BodyStream,
}

impl HttpResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// Collect the whole body into memory (small documents only)
    pub async fn bytes(mut self) -> std::result::Result<Vec<u8>, TransportError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.body.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("body", &"BodyStream { ... }")
            .finish()
    }
}

/// Unified interface for fetching remote files
///
/// A non-200 status is returned as `Ok`; `Err` means the request never
/// produced a status (DNS, TLS, connect, timeout).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> std::result::Result<HttpResponse, TransportError>;
}

/// `reqwest`-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create transport with a whole-request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("edgellm/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EdgeError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> std::result::Result<HttpResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError(format!("GET {url}: {e}")))?;

        let status = response.status().as_u16();
        let content_length = response.content_length();
        let body = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|b| b.to_vec())
                    .map_err(|e| TransportError(format!("Failed to read body: {e}")))
            })
            .boxed();

        Ok(HttpResponse {
            status,
            content_length,
            body,
        })
    }
}

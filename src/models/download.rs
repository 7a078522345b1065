use crate::error::{EdgeError, Result, TransportError};
use crate::models::transport::{HttpResponse, Transport};
use futures_util::StreamExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Progress of a single file download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadProgress {
    pub file_name: String,
    pub bytes_written: u64,
    /// Zero when the server did not announce a length
    pub total_bytes: u64,
}

impl DownloadProgress {
    /// Completed fraction in `0.0..=1.0`, zero if the total is unknown
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.bytes_written as f64 / self.total_bytes as f64).min(1.0)
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn percent(&self) -> u8 {
        (self.fraction() * 100.0) as u8
    }
}

/// Observer for per-chunk download progress
pub type ProgressHandler = Arc<dyn Fn(&DownloadProgress) + Send + Sync>;

/// Retry policy for mandatory files
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay before retry number `attempt` (1-based)
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Why a file could not be fetched
#[derive(Debug)]
enum FetchFailure {
    /// Server answered with a non-200 status
    Status(u16),
    /// No usable response, or the body broke mid-transfer
    Transport(TransportError),
    /// Local write failure
    Io(std::io::Error),
}

/// Streams remote files to disk
#[derive(Clone)]
pub struct FileFetcher {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    progress: Option<ProgressHandler>,
}

impl FileFetcher {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            retry,
            progress: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Option<ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    /// Download a file that must exist, retrying transport failures
    ///
    /// Any non-200 status fails immediately with `DownloadFailed`.
    pub async fn fetch_required(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url, dest).await {
                Ok(written) => return Ok(written),
                Err(FetchFailure::Status(status)) => {
                    return Err(EdgeError::DownloadFailed(format!("HTTP {status} for {url}")));
                }
                Err(FetchFailure::Io(e)) => return Err(EdgeError::Io(e)),
                Err(FetchFailure::Transport(e)) if attempt < self.retry.retries => {
                    attempt += 1;
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        "Transfer of {url} failed ({e}), retry {attempt}/{} in {delay:?}",
                        self.retry.retries
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(FetchFailure::Transport(e)) => {
                    return Err(EdgeError::DownloadFailed(format!(
                        "{url}: {e} (after {} retries)",
                        self.retry.retries
                    )));
                }
            }
        }
    }

    /// Download a file that may not exist
    ///
    /// Returns `Ok(None)` for any non-200 status or transport failure, without retrying.
    pub async fn fetch_optional(&self, url: &str, dest: &Path) -> Result<Option<u64>> {
        match self.fetch_once(url, dest).await {
            Ok(written) => Ok(Some(written)),
            Err(FetchFailure::Status(status)) => {
                tracing::debug!("{url} not available (HTTP {status})");
                Ok(None)
            }
            Err(FetchFailure::Transport(e)) => {
                tracing::warn!("{url} not available, transport error: {e}");
                Ok(None)
            }
            Err(FetchFailure::Io(e)) => Err(EdgeError::Io(e)),
        }
    }

    /// Fetch a small document into memory, `None` if it does not exist
    pub async fn fetch_document(&self, url: &str) -> Option<Vec<u8>> {
        let response = match self.transport.get(url).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                tracing::debug!("{url} not available (HTTP {})", response.status);
                return None;
            }
            Err(e) => {
                tracing::warn!("{url} not available, transport error: {e}");
                return None;
            }
        };

        match response.bytes().await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!("Failed to read {url}: {e}");
                None
            }
        }
    }

    async fn fetch_once(&self, url: &str, dest: &Path) -> std::result::Result<u64, FetchFailure> {
        tracing::debug!("GET {url}");
        let response = self
            .transport
            .get(url)
            .await
            .map_err(FetchFailure::Transport)?;

        if !response.is_success() {
            return Err(FetchFailure::Status(response.status));
        }

        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let result = self.write_body(response, &file_name, dest).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }

    async fn write_body(
        &self,
        response: HttpResponse,
        file_name: &str,
        dest: &Path,
    ) -> std::result::Result<u64, FetchFailure> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(FetchFailure::Io)?;
        }

        let file = tokio::fs::File::create(dest)
            .await
            .map_err(FetchFailure::Io)?;
        let mut file = tokio::io::BufWriter::new(file);

        let total_bytes = response.content_length.unwrap_or(0);
        let mut body = response.body;
        let mut written = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(FetchFailure::Transport)?;
            file.write_all(&chunk).await.map_err(FetchFailure::Io)?;
            written += chunk.len() as u64;

            if let Some(progress) = &self.progress {
                progress(&DownloadProgress {
                    file_name: file_name.to_string(),
                    bytes_written: written,
                    total_bytes,
                });
            }
        }

        file.flush().await.map_err(FetchFailure::Io)?;

        if total_bytes > 0 && written != total_bytes {
            return Err(FetchFailure::Transport(TransportError(format!(
                "truncated body: expected {total_bytes} bytes, got {written}"
            ))));
        }

        Ok(written)
    }
}

/// Format bytes as human-readable string
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

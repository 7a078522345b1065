use thiserror::Error;

/// Main error type for edgellm
#[derive(Error, Debug)]
pub enum EdgeError {
    #[error("Model '{0}' not found\n\nTroubleshooting:\n- List known models: edgellm models\n- Check storage.bundle_dir and storage.cache_dir in config\n- Models without a source URL must be installed manually")]
    ModelNotFound(String),

    #[error("No model is currently loaded")]
    ModelNotLoaded,

    #[error("Model download failed: {0}\n\nTroubleshooting:\n- Check internet connection\n- Try increasing download.timeout_secs in config\n- Run with RUST_LOG=debug for per-file details")]
    DownloadFailed(String),

    #[error("Invalid source URL: {0}\n\nExpected https://..., http://... or hf://<org>/<repo>")]
    InvalidSourceUrl(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("No weight files found at {url}\n\nTroubleshooting:\n- The source must publish ndarray-cache.json, params.bin or params_shard_0.bin\n- Verify the repository URL in the model descriptor or manifest")]
    NoWeightsFound { url: String },

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Config error: {0}\n\nTroubleshooting:\n- Check config file: ~/.config/edgellm/config.toml\n- Run with RUST_LOG=debug for more details")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure below the HTTP status layer: DNS, TLS, connection reset, timeout
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<TransportError> for EdgeError {
    fn from(err: TransportError) -> Self {
        Self::DownloadFailed(err.0)
    }
}

pub type Result<T> = std::result::Result<T, EdgeError>;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub generation: GenerationOptions,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct StorageConfig {
    /// Root of the content-addressed store (`<root>/<sha256>`)
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Per-model-name cache used by the identifier flow (`<cache_dir>/<model id>`)
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Developer override, only consulted in debug builds
    pub dev_cache_dir: Option<PathBuf>,
    /// Models shipped alongside the application
    pub bundle_dir: Option<PathBuf>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct DownloadConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_shard_probes")]
    pub max_shard_probes: usize,
    /// Prefer `url.premium` from manifests when present
    #[serde(default)]
    pub premium: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct RuntimeConfig {
    #[serde(default = "default_runtime_dir")]
    pub install_dir: PathBuf,
    /// Ranked mirror list, tried in order
    #[serde(default = "default_mirrors")]
    pub mirrors: Vec<String>,
    #[serde(default = "default_mirror_timeout_secs")]
    pub mirror_timeout_secs: u64,
    /// Base delay between mirrors, doubled after every failure
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
    #[serde(default = "default_circuit_breaker_cooldown_secs")]
    pub circuit_breaker_cooldown_secs: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct SessionConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Sampling options forwarded with every chat request
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
pub struct GenerationOptions {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

// Default value functions
fn data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("edgellm")
}
fn default_storage_root() -> PathBuf {
    data_root().join("models")
}
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("edgellm")
}
fn default_runtime_dir() -> PathBuf {
    data_root().join("runtime")
}
fn default_timeout_secs() -> u64 {
    3600
}
fn default_retries() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_concurrency() -> usize {
    4
}
fn default_max_shard_probes() -> usize {
    50
}
fn default_mirrors() -> Vec<String> {
    vec![
        "https://cdn.jsdelivr.net/gh/edgellm/edgellm@v0.2.0/MLCRuntime.zip".to_string(),
        "https://github.com/edgellm/edgellm/releases/download/v0.2.0/MLCRuntime.zip"
            .to_string(),
        "https://edgellm-runtime.s3.amazonaws.com/v0.2.0/MLCRuntime.zip".to_string(),
    ]
}
fn default_mirror_timeout_secs() -> u64 {
    600
}
fn default_circuit_breaker_threshold() -> u32 {
    3
}
fn default_circuit_breaker_cooldown_secs() -> u64 {
    300
}
fn default_channel_capacity() -> usize {
    32
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_top_p() -> f32 {
    0.95
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            cache_dir: default_cache_dir(),
            dev_cache_dir: None,
            bundle_dir: None,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
            concurrency: default_concurrency(),
            max_shard_probes: default_max_shard_probes(),
            premium: false,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            install_dir: default_runtime_dir(),
            mirrors: default_mirrors(),
            mirror_timeout_secs: default_mirror_timeout_secs(),
            backoff_ms: default_backoff_ms(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            circuit_breaker_cooldown_secs: default_circuit_breaker_cooldown_secs(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
        }
    }
}

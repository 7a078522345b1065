//! Native runtime bundle installation
//!
//! The runtime archive is fetched from a ranked mirror list; the first mirror
//! that yields an archive which extracts into a non-empty install directory
//! wins. Progress and outcome are published through a `watch` channel.

use crate::config::RuntimeConfig;
use crate::error::{EdgeError, Result};
use crate::models::archive;
use crate::models::download::{DownloadProgress, FileFetcher, ProgressHandler, RetryPolicy};
use crate::models::source::{ArchiveFormat, ModelSource};
use crate::models::transport::Transport;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Installation state of the native runtime
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeStatus {
    NotInstalled,
    /// Fraction of the current archive downloaded, `0.0..=1.0`
    Downloading(f64),
    Installed,
    Error(String),
}

#[derive(Debug, Default)]
struct MirrorHealth {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Installs the runtime bundle from ranked mirrors
pub struct RuntimeFetcher {
    transport: Arc<dyn Transport>,
    config: RuntimeConfig,
    status: Arc<watch::Sender<RuntimeStatus>>,
    install_lock: tokio::sync::Mutex<()>,
    health: Mutex<HashMap<String, MirrorHealth>>,
}

impl RuntimeFetcher {
    #[must_use]
    pub fn new(config: RuntimeConfig, transport: Arc<dyn Transport>) -> Self {
        let initial = if dir_has_entries(&config.install_dir) {
            RuntimeStatus::Installed
        } else {
            RuntimeStatus::NotInstalled
        };
        let (status, _) = watch::channel(initial);

        Self {
            transport,
            config,
            status: Arc::new(status),
            install_lock: tokio::sync::Mutex::new(()),
            health: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn status(&self) -> RuntimeStatus {
        self.status.borrow().clone()
    }

    /// Observe status changes (for progress UIs)
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RuntimeStatus> {
        self.status.subscribe()
    }

    #[must_use]
    pub fn install_dir(&self) -> &Path {
        &self.config.install_dir
    }

    /// Runtime is installed when its directory exists and is non-empty
    #[must_use]
    pub fn is_available(&self) -> bool {
        dir_has_entries(&self.config.install_dir)
    }

    /// Total size of the installed runtime
    #[must_use]
    pub fn installed_size_bytes(&self) -> Option<u64> {
        self.is_available()
            .then(|| dir_size(&self.config.install_dir))
    }

    /// Install the runtime unless it is already present
    pub async fn ensure_installed(&self) -> Result<()> {
        let _guard = self.install_lock.lock().await;

        if self.is_available() {
            self.status.send_replace(RuntimeStatus::Installed);
            tracing::debug!("Runtime already installed at {}", self.config.install_dir.display());
            return Ok(());
        }

        tracing::info!("Runtime not found, trying {} mirrors", self.config.mirrors.len());

        let mut attempted = 0u32;
        let mut last_error: Option<String> = None;

        for mirror in &self.config.mirrors {
            if self.circuit_open(mirror) {
                tracing::warn!("Skipping mirror {mirror}: circuit open after repeated failures");
                continue;
            }

            if attempted > 0 {
                let delay = Duration::from_millis(self.config.backoff_ms)
                    .saturating_mul(2u32.saturating_pow(attempted - 1));
                tokio::time::sleep(delay).await;
            }
            attempted += 1;

            match self.install_from(mirror).await {
                Ok(()) => {
                    self.record(mirror, true);
                    self.status.send_replace(RuntimeStatus::Installed);
                    tracing::info!("Runtime installed from {mirror}");
                    return Ok(());
                }
                Err(e) => {
                    self.record(mirror, false);
                    tracing::warn!("Failed to install runtime from {mirror}: {e}");
                    last_error = Some(format!("{mirror}: {e}"));
                }
            }
        }

        let reason = format!(
            "Runtime not available after trying {attempted} of {} mirrors ({})",
            self.config.mirrors.len(),
            last_error.unwrap_or_else(|| "all mirrors skipped".to_string())
        );
        tracing::error!("{reason}");
        self.status.send_replace(RuntimeStatus::Error(reason.clone()));
        Err(EdgeError::DownloadFailed(reason))
    }

    async fn install_from(&self, mirror: &str) -> Result<()> {
        let source = ModelSource::parse(mirror)?;
        let format = source.archive_format().unwrap_or(ArchiveFormat::Zip);

        let install_dir = &self.config.install_dir;
        let parent = install_dir.parent().ok_or_else(|| {
            EdgeError::Config(format!("Invalid runtime dir {}", install_dir.display()))
        })?;
        fs::create_dir_all(parent)?;

        let staging = tempfile::Builder::new()
            .prefix(".runtime-staging-")
            .tempdir_in(parent)?;
        let archive_path = staging.path().join(format!("runtime.{}", format.extension()));
        let payload = staging.path().join("payload");

        self.status.send_replace(RuntimeStatus::Downloading(0.0));
        let status = Arc::clone(&self.status);
        let progress: ProgressHandler = Arc::new(move |p: &DownloadProgress| {
            status.send_replace(RuntimeStatus::Downloading(p.fraction()));
        });

        let fetcher = FileFetcher::new(
            self.transport.clone(),
            RetryPolicy {
                retries: 0,
                backoff: Duration::ZERO,
            },
        )
        .with_progress(Some(progress));

        // Bounds the transfer only; extraction must finish before staging drops
        let timeout = Duration::from_secs(self.config.mirror_timeout_secs);
        let transfer = fetcher.fetch_required(source.as_str(), &archive_path);
        let bytes = tokio::time::timeout(timeout, transfer)
            .await
            .map_err(|_| EdgeError::DownloadFailed(format!("timed out after {timeout:?}")))??;
        self.status.send_replace(RuntimeStatus::Downloading(1.0));
        tracing::info!("Downloaded runtime archive ({bytes} bytes), extracting");

        archive::extract_async(format, archive_path, payload.clone()).await?;
        if !dir_has_entries(&payload) {
            return Err(EdgeError::ExtractionFailed(format!("archive from {mirror} is empty")));
        }

        if install_dir.exists() {
            fs::remove_dir_all(install_dir)?;
        }
        fs::rename(&payload, install_dir).map_err(|e| {
            EdgeError::ExtractionFailed(format!("Failed to move runtime into place: {e}"))
        })?;

        if !self.is_available() {
            return Err(EdgeError::ExtractionFailed(format!(
                "{} missing after extraction",
                install_dir.display()
            )));
        }

        Ok(())
    }

    fn circuit_open(&self, mirror: &str) -> bool {
        let health = self.health.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        health
            .get(mirror)
            .and_then(|h| h.open_until)
            .is_some_and(|until| Instant::now() < until)
    }

    fn record(&self, mirror: &str, success: bool) {
        let mut health = self.health.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = health.entry(mirror.to_string()).or_default();

        if success {
            *entry = MirrorHealth::default();
            return;
        }

        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= self.config.circuit_breaker_threshold {
            let cooldown = Duration::from_secs(self.config.circuit_breaker_cooldown_secs);
            entry.open_until = Some(Instant::now() + cooldown);
            entry.consecutive_failures = 0;
        }
    }
}

fn dir_has_entries(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

fn dir_size(dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    entries
        .flatten()
        .map(|entry| {
            let path: PathBuf = entry.path();
            match entry.file_type() {
                Ok(t) if t.is_dir() => dir_size(&path),
                _ => entry.metadata().map_or(0, |m| m.len()),
            }
        })
        .sum()
}

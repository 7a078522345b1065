use crate::config::{DownloadConfig, StorageConfig};
use crate::error::{EdgeError, Result};
use crate::models::archive;
use crate::models::checksum;
use crate::models::discovery::ShardDiscovery;
use crate::models::download::{FileFetcher, ProgressHandler, RetryPolicy};
use crate::models::manifest::{InstallRecord, ModelManifest};
use crate::models::source::{ArchiveFormat, ModelSource};
use crate::models::transport::Transport;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Marker whose presence makes a model directory "ready"
pub const READY_MARKER: &str = "mlc-chat-config.json";

/// Files every repository source must serve
pub const MANDATORY_FILES: &[&str] = &[READY_MARKER, "tokenizer.json"];

const PAYLOAD_DIR: &str = "payload";

/// A directory is ready iff its marker file exists
#[must_use]
pub fn is_ready_dir(dir: &Path) -> bool {
    dir.join(READY_MARKER).is_file()
}

/// Downloads, verifies and installs model payloads
///
/// Installs are published into `<root>/<sha256>` with a single rename from a
/// staging directory on the same filesystem.
pub struct ModelStore {
    root: PathBuf,
    transport: Arc<dyn Transport>,
    download: DownloadConfig,
    /// Per-sha256 locks for single-flight acquisition
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ModelStore {
    /// Create new store rooted at `storage.root`
    pub fn new(
        storage: &StorageConfig,
        download: DownloadConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        fs::create_dir_all(&storage.root)?;

        Ok(Self {
            root: storage.root.clone(),
            transport,
            download,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Content-addressed directory for a checksum
    #[must_use]
    pub fn content_dir(&self, sha256: &str) -> PathBuf {
        self.root.join(sha256.to_ascii_lowercase())
    }

    /// Check if the manifest's payload is installed
    #[must_use]
    pub fn is_ready(&self, manifest: &ModelManifest) -> bool {
        is_ready_dir(&self.content_dir(&manifest.sha256))
    }

    /// Installed path for a manifest, if ready
    #[must_use]
    pub fn local_path(&self, manifest: &ModelManifest) -> Option<PathBuf> {
        let dir = self.content_dir(&manifest.sha256);
        is_ready_dir(&dir).then_some(dir)
    }

    /// Ensure the manifest's payload is installed, downloading if needed
    pub async fn ensure_ready(
        &self,
        manifest: &ModelManifest,
        progress: Option<ProgressHandler>,
    ) -> Result<PathBuf> {
        check_key(&manifest.sha256)?;

        if let Some(path) = self.local_path(manifest) {
            tracing::debug!("Model {} already installed at {}", manifest.model_id, path.display());
            return Ok(path);
        }

        let flight = self.flight(&manifest.sha256);
        let _guard = flight.lock.lock().await;

        // Another caller may have finished the install while we waited
        if let Some(path) = self.local_path(manifest) {
            tracing::debug!("Model {} installed by a concurrent caller", manifest.model_id);
            return Ok(path);
        }

        self.acquire(manifest, progress).await
    }

    fn flight(&self, key: &str) -> Flight<'_> {
        let key = key.to_ascii_lowercase();
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let lock = in_flight.entry(key.clone()).or_default().clone();

        Flight {
            in_flight: &self.in_flight,
            key,
            lock,
        }
    }

    /// Number of keys with an acquisition in progress or queued
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    async fn acquire(
        &self,
        manifest: &ModelManifest,
        progress: Option<ProgressHandler>,
    ) -> Result<PathBuf> {
        let raw_url = manifest.source_url(self.download.premium);
        let source = ModelSource::parse(raw_url)?;

        tracing::info!(
            "Downloading model {} v{} from {source}",
            manifest.model_id,
            manifest.version
        );

        let staging = self.staging_dir()?;
        let payload = staging.path().join(PAYLOAD_DIR);
        fs::create_dir_all(&payload)?;

        let fetcher = self.fetcher(progress);

        let (files, bytes) = match source.archive_format() {
            Some(format) => {
                self.acquire_archive(manifest, &fetcher, &source, format, staging.path(), &payload)
                    .await?
            }
            None => {
                let (files, bytes) = self.download_repo(&fetcher, &source, &payload).await?;
                check_size(manifest, bytes)?;

                let actual = checksum::sha256_dir_async(payload.clone()).await?;
                checksum::verify(&manifest.sha256, &actual)?;
                (files, bytes)
            }
        };

        tracing::info!("Checksum verified for {}", manifest.model_id);

        InstallRecord::new(manifest, files, bytes).write(&payload)?;

        let dest = self.content_dir(&manifest.sha256);
        publish(&payload, &dest)?;

        tracing::info!("Model {} installed at {}", manifest.model_id, dest.display());
        Ok(dest)
    }

    async fn acquire_archive(
        &self,
        manifest: &ModelManifest,
        fetcher: &FileFetcher,
        source: &ModelSource,
        format: ArchiveFormat,
        staging: &Path,
        payload: &Path,
    ) -> Result<(Vec<String>, u64)> {
        let archive_path = staging.join(format!("download.{}", format.extension()));
        let bytes = fetcher.fetch_required(source.as_str(), &archive_path).await?;
        check_size(manifest, bytes)?;

        let actual = checksum::sha256_file_async(archive_path.clone()).await?;
        checksum::verify(&manifest.sha256, &actual)?;

        archive::extract_async(format, archive_path, payload.to_path_buf()).await?;

        if !is_ready_dir(payload) {
            return Err(EdgeError::ExtractionFailed(format!(
                "archive from {source} has no {READY_MARKER} at its root"
            )));
        }

        let files = list_payload(payload)?;
        Ok((files, bytes))
    }

    /// Identifier flow: fetch a repository source into `dest` without a checksum
    pub async fn acquire_repo(
        &self,
        source: &ModelSource,
        dest: &Path,
        progress: Option<ProgressHandler>,
    ) -> Result<PathBuf> {
        if is_ready_dir(dest) {
            return Ok(dest.to_path_buf());
        }

        let flight = self.flight(&dest.to_string_lossy());
        let _guard = flight.lock.lock().await;
        if is_ready_dir(dest) {
            return Ok(dest.to_path_buf());
        }

        tracing::info!("Downloading {source} into {}", dest.display());

        let parent = dest.parent().unwrap_or(self.root.as_path());
        fs::create_dir_all(parent)?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(parent)?;
        let payload = staging.path().join(PAYLOAD_DIR);
        fs::create_dir_all(&payload)?;

        let fetcher = self.fetcher(progress);
        let (files, bytes) = self.download_repo(&fetcher, source, &payload).await?;
        publish(&payload, dest)?;

        tracing::info!(
            "Installed {} files ({} bytes) at {}",
            files.len(),
            bytes,
            dest.display()
        );
        Ok(dest.to_path_buf())
    }

    /// Mandatory files first, then weights via shard discovery
    async fn download_repo(
        &self,
        fetcher: &FileFetcher,
        source: &ModelSource,
        payload: &Path,
    ) -> Result<(Vec<String>, u64)> {
        let mut files = Vec::new();
        let mut bytes = 0u64;

        for name in MANDATORY_FILES {
            tracing::info!("Downloading: {name}");
            bytes += fetcher
                .fetch_required(&source.file_url(name), &payload.join(name))
                .await?;
            files.push((*name).to_string());
        }

        let weights = ShardDiscovery::new(fetcher, source)
            .with_max_probes(self.download.max_shard_probes)
            .with_concurrency(self.download.concurrency)
            .fetch_weights(payload)
            .await?;

        tracing::debug!("Weights found via {:?}: {:?}", weights.method, weights.files);
        files.extend(weights.files);
        bytes += weights.bytes;

        Ok((files, bytes))
    }

    /// List installed models by reading their receipts
    pub fn list_installed(&self) -> Result<Vec<InstallRecord>> {
        let mut records = Vec::new();

        for entry in fs::read_dir(&self.root)?.flatten() {
            let path = entry.path();
            if !path.is_dir() || !is_ready_dir(&path) {
                continue;
            }
            match InstallRecord::read(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => tracing::debug!("{} has no install record", path.display()),
                Err(e) => tracing::warn!("Skipping {}: {e}", path.display()),
            }
        }

        records.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(records)
    }

    /// Remove an installed payload
    pub fn remove(&self, sha256: &str) -> Result<()> {
        check_key(sha256)?;
        let dir = self.content_dir(sha256);
        if !dir.exists() {
            return Err(EdgeError::ModelNotFound(sha256.to_string()));
        }

        // Unpublish first so readers never see a half-deleted ready directory
        let doomed = self.staging_dir()?;
        fs::rename(&dir, doomed.path().join(PAYLOAD_DIR))?;
        drop(doomed);

        tracing::info!("Removed {}", dir.display());
        Ok(())
    }

    fn staging_dir(&self) -> Result<TempDir> {
        Ok(tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.root)?)
    }

    fn fetcher(&self, progress: Option<ProgressHandler>) -> FileFetcher {
        FileFetcher::new(
            self.transport.clone(),
            RetryPolicy {
                retries: self.download.retries,
                backoff: Duration::from_millis(self.download.backoff_ms),
            },
        )
        .with_progress(progress)
    }
}

/// One caller's claim on a per-key lock; the map entry goes with the last claim
struct Flight<'a> {
    in_flight: &'a Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    key: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        // Release our clone while holding the map so counts cannot race
        drop(std::mem::take(&mut self.lock));
        if in_flight
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            in_flight.remove(&self.key);
        }
    }
}

/// Store keys must be plain hex so they never leave `<root>`
fn check_key(sha256: &str) -> Result<()> {
    if checksum::is_hex_digest(sha256) {
        Ok(())
    } else {
        Err(EdgeError::Config(format!("Invalid sha256 '{sha256}': expected hex digits")))
    }
}

fn check_size(manifest: &ModelManifest, actual: u64) -> Result<()> {
    match manifest.size_bytes {
        Some(expected) if expected != actual => Err(EdgeError::DownloadFailed(format!(
            "size mismatch for {}: expected {expected} bytes, got {actual}",
            manifest.model_id
        ))),
        _ => Ok(()),
    }
}

/// Move a fully verified payload to its final location
fn publish(payload: &Path, dest: &Path) -> Result<()> {
    if dest.exists() {
        // Leftover without a marker (a ready one is never replaced)
        tracing::warn!("Replacing incomplete directory {}", dest.display());
        fs::remove_dir_all(dest)?;
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(payload, dest)?;
    Ok(())
}

fn list_payload(dir: &Path) -> Result<Vec<String>> {
    let mut files: Vec<String> = fs::read_dir(dir)?
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    Ok(files)
}

use crate::config::StorageConfig;
use crate::error::{EdgeError, Result};
use crate::models::download::ProgressHandler;
use crate::models::manager::{is_ready_dir, ModelStore};
use crate::models::registry::ModelDescriptor;
use crate::models::source::ModelSource;
use std::path::PathBuf;
use std::sync::Arc;

/// Where a resolved model came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetOrigin {
    DevCache,
    Bundle,
    UserCache,
    Downloaded,
}

/// Resolves a model identifier to a ready local directory
///
/// Lookup order: developer cache (debug builds only), application bundle,
/// user cache, then network acquisition into the user cache.
pub struct AssetLocator {
    dev_cache_dir: Option<PathBuf>,
    bundle_dir: Option<PathBuf>,
    cache_dir: PathBuf,
    store: Arc<ModelStore>,
}

impl AssetLocator {
    #[must_use]
    pub fn new(storage: &StorageConfig, store: Arc<ModelStore>) -> Self {
        Self {
            dev_cache_dir: storage.dev_cache_dir.clone(),
            bundle_dir: storage.bundle_dir.clone(),
            cache_dir: storage.cache_dir.clone(),
            store,
        }
    }

    /// Per-model-name cache directory
    #[must_use]
    pub fn cache_path(&self, model: &ModelDescriptor) -> PathBuf {
        self.cache_dir.join(model.id.as_ref())
    }

    /// Local lookup only; no side effects
    #[must_use]
    pub fn locate(&self, model: &ModelDescriptor) -> Option<(PathBuf, AssetOrigin)> {
        let dev = self
            .dev_cache_dir
            .as_ref()
            .filter(|_| cfg!(debug_assertions))
            .map(|dir| (dir.join(model.id.as_ref()), AssetOrigin::DevCache));
        let bundle = self
            .bundle_dir
            .as_ref()
            .map(|dir| (dir.join(model.id.as_ref()), AssetOrigin::Bundle));
        let cache = Some((self.cache_path(model), AssetOrigin::UserCache));

        [dev, bundle, cache]
            .into_iter()
            .flatten()
            .find(|(path, _)| is_ready_dir(path))
    }

    /// Resolve to a ready directory, downloading into the user cache on a miss
    pub async fn resolve(
        &self,
        model: &ModelDescriptor,
        progress: Option<ProgressHandler>,
    ) -> Result<(PathBuf, AssetOrigin)> {
        if let Some((path, origin)) = self.locate(model) {
            tracing::info!("Using {origin:?} model at {}", path.display());
            return Ok((path, origin));
        }

        let Some(url) = model.source_url.as_deref() else {
            let suggestion = ModelDescriptor::suggest(&model.id).filter(|s| *s != model.id);
            if let Some(suggestion) = suggestion {
                tracing::info!("Did you mean '{suggestion}'?");
            }
            return Err(EdgeError::ModelNotFound(model.id.to_string()));
        };

        tracing::info!("Model {} not found locally, downloading from {url}", model.id);
        let source = ModelSource::parse(url)?;
        let path = self
            .store
            .acquire_repo(&source, &self.cache_path(model), progress)
            .await?;

        Ok((path, AssetOrigin::Downloaded))
    }
}

//! Weight-shard discovery for repository sources
//!
//! The canonical path reads `ndarray-cache.json` and fetches every distinct
//! `dataPath` it lists. Sources without usable metadata fall back to probing
//! `params.bin`, then `params_shard_0.bin`, `params_shard_1.bin`, ... up to the
//! first miss. Probes download directly into the payload directory, so each
//! shard URL is requested once.

use crate::error::{EdgeError, Result};
use crate::models::download::FileFetcher;
use crate::models::source::ModelSource;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Component, Path};

pub const METADATA_FILE: &str = "ndarray-cache.json";
pub const MONOLITHIC_WEIGHTS: &str = "params.bin";

#[must_use]
pub fn shard_name(index: usize) -> String {
    format!("params_shard_{index}.bin")
}

#[derive(Debug, Deserialize)]
struct ShardMetadata {
    #[serde(default)]
    records: Vec<ShardRecord>,
}

#[derive(Debug, Deserialize)]
struct ShardRecord {
    #[serde(rename = "dataPath")]
    data_path: String,
}

/// How the weight set was determined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMethod {
    Metadata,
    Monolithic,
    Probed,
}

/// Weight files fetched into the payload directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightSet {
    pub method: DiscoveryMethod,
    /// Relative paths, including the metadata document when the source has one
    pub files: Vec<String>,
    pub bytes: u64,
}

/// Distinct, sorted `dataPath` values, or `None` if the document is malformed
#[must_use]
pub fn parse_shard_records(document: &[u8]) -> Option<Vec<String>> {
    let metadata: ShardMetadata = serde_json::from_slice(document).ok()?;
    let paths: BTreeSet<String> = metadata
        .records
        .into_iter()
        .map(|r| r.data_path)
        .filter(|p| !p.is_empty())
        .collect();
    Some(paths.into_iter().collect())
}

/// Relative path that stays inside the payload directory
fn is_safe_relative(path: &str) -> bool {
    let path = Path::new(path);
    path.components().all(|c| matches!(c, Component::Normal(_)))
}

/// Discovers and fetches weight files for one source
pub struct ShardDiscovery<'a> {
    fetcher: &'a FileFetcher,
    source: &'a ModelSource,
    max_probes: usize,
    concurrency: usize,
}

impl<'a> ShardDiscovery<'a> {
    #[must_use]
    pub fn new(fetcher: &'a FileFetcher, source: &'a ModelSource) -> Self {
        Self {
            fetcher,
            source,
            max_probes: 50,
            concurrency: 4,
        }
    }

    #[must_use]
    pub fn with_max_probes(mut self, max_probes: usize) -> Self {
        self.max_probes = max_probes;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Fetch every weight file of the source into `dest`
    pub async fn fetch_weights(&self, dest: &Path) -> Result<WeightSet> {
        let metadata_url = self.source.file_url(METADATA_FILE);

        if let Some(document) = self.fetcher.fetch_document(&metadata_url).await {
            match parse_shard_records(&document) {
                Some(paths) if !paths.is_empty() => {
                    tokio::fs::write(dest.join(METADATA_FILE), &document).await?;
                    return self.fetch_listed(dest, paths, document.len() as u64).await;
                }
                Some(_) => {
                    tracing::warn!("{metadata_url} lists no records, probing for weights");
                }
                None => {
                    tracing::warn!("{metadata_url} is malformed, probing for weights");
                }
            }
        } else {
            tracing::info!("No shard metadata at {}, probing for weights", self.source);
        }

        self.probe(dest).await
    }

    async fn fetch_listed(
        &self,
        dest: &Path,
        paths: Vec<String>,
        metadata_bytes: u64,
    ) -> Result<WeightSet> {
        if let Some(bad) = paths.iter().find(|p| !is_safe_relative(p)) {
            return Err(EdgeError::DownloadFailed(format!(
                "Shard metadata lists unsafe path '{bad}'"
            )));
        }

        tracing::info!("Fetching {} weight files listed in {METADATA_FILE}", paths.len());

        let sizes: Vec<u64> = stream::iter(paths.iter())
            .map(|path| async move {
                let url = self.source.file_url(path);
                self.fetcher.fetch_required(&url, &dest.join(path)).await
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        let mut files = vec![METADATA_FILE.to_string()];
        files.extend(paths);

        Ok(WeightSet {
            method: DiscoveryMethod::Metadata,
            files,
            bytes: metadata_bytes + sizes.iter().sum::<u64>(),
        })
    }

    async fn probe(&self, dest: &Path) -> Result<WeightSet> {
        let monolithic_url = self.source.file_url(MONOLITHIC_WEIGHTS);
        if let Some(bytes) = self
            .fetcher
            .fetch_optional(&monolithic_url, &dest.join(MONOLITHIC_WEIGHTS))
            .await?
        {
            return Ok(WeightSet {
                method: DiscoveryMethod::Monolithic,
                files: vec![MONOLITHIC_WEIGHTS.to_string()],
                bytes,
            });
        }

        let mut files = Vec::new();
        let mut total = 0u64;

        for index in 0..self.max_probes {
            let name = shard_name(index);
            let url = self.source.file_url(&name);
            match self.fetcher.fetch_optional(&url, &dest.join(&name)).await? {
                Some(bytes) => {
                    total += bytes;
                    files.push(name);
                }
                None => break,
            }
        }

        if files.len() == self.max_probes {
            tracing::warn!(
                "Shard probing hit the limit of {} files at {}",
                self.max_probes,
                self.source
            );
        }

        if files.is_empty() {
            return Err(EdgeError::NoWeightsFound {
                url: self.source.to_string(),
            });
        }

        tracing::info!("Probed {} weight shards at {}", files.len(), self.source);
        Ok(WeightSet {
            method: DiscoveryMethod::Probed,
            files,
            bytes: total,
        })
    }
}

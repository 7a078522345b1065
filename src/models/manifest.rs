use crate::error::{EdgeError, Result};
use crate::models::checksum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// File name of the receipt written into every published install
pub const INSTALL_RECORD_FILE: &str = ".edgellm-install.json";

/// Declarative description of a model's remote location and expected checksum
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelManifest {
    pub model_id: String,
    pub version: String,
    pub url: ModelUrls,
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Download URL variants
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelUrls {
    pub default: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub premium: Option<String>,
}

impl ModelManifest {
    /// Load manifest from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
            .map_err(|e| EdgeError::Config(format!("{}: {e}", path.display())))
    }

    /// Parse manifest JSON and normalize the checksum to lowercase hex
    pub fn from_json(content: &str) -> Result<Self> {
        let mut manifest: Self = serde_json::from_str(content)
            .map_err(|e| EdgeError::Config(format!("Failed to parse manifest: {e}")))?;

        if !checksum::is_hex_digest(&manifest.sha256) {
            return Err(EdgeError::Config(format!(
                "Manifest for '{}' has an invalid sha256: '{}'",
                manifest.model_id, manifest.sha256
            )));
        }
        manifest.sha256.make_ascii_lowercase();

        Ok(manifest)
    }

    /// Source URL to download from, preferring premium when asked and available
    #[must_use]
    pub fn source_url(&self, premium: bool) -> &str {
        match (&self.url.premium, premium) {
            (Some(url), true) => url,
            _ => &self.url.default,
        }
    }
}

/// Receipt stored inside an installed model directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallRecord {
    pub model_id: String,
    pub version: String,
    pub sha256: String,
    pub files: Vec<String>,
    pub size_bytes: u64,
    pub installed_at: String,
}

impl InstallRecord {
    #[must_use]
    pub fn new(manifest: &ModelManifest, files: Vec<String>, size_bytes: u64) -> Self {
        Self {
            model_id: manifest.model_id.clone(),
            version: manifest.version.clone(),
            sha256: manifest.sha256.clone(),
            files,
            size_bytes,
            installed_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Read the receipt from an install directory, if one exists
    pub fn read(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(INSTALL_RECORD_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| EdgeError::Config(format!("Failed to parse install record: {e}")))
    }

    /// Write the receipt into a directory that has not been published yet
    pub fn write(&self, dir: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| EdgeError::Config(format!("Failed to serialize install record: {e}")))?;
        fs::write(dir.join(INSTALL_RECORD_FILE), content)?;
        Ok(())
    }
}

use crate::error::{EdgeError, Result};
use reqwest::Url;

const HF_HOST: &str = "huggingface.co";

/// Archive formats accepted as a single-file model or runtime payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveFormat {
    /// Detect format from a URL or file name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }

    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::Tar => "tar",
            Self::TarGz => "tar.gz",
        }
    }
}

/// A validated remote location for model files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    base: Url,
}

impl ModelSource {
    /// Parse `https://`, `http://` or `hf://<org>/<repo>`
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let normalized = match raw.strip_prefix("hf://") {
            Some(repo) if !repo.trim_matches('/').is_empty() => {
                format!("https://{HF_HOST}/{}", repo.trim_matches('/'))
            }
            Some(_) => return Err(EdgeError::InvalidSourceUrl(raw.to_string())),
            None => raw.trim_end_matches('/').to_string(),
        };

        let base = Url::parse(&normalized)
            .map_err(|_| EdgeError::InvalidSourceUrl(raw.to_string()))?;

        if !matches!(base.scheme(), "http" | "https") || base.host_str().is_none() {
            return Err(EdgeError::InvalidSourceUrl(raw.to_string()));
        }

        Ok(Self { base })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.base.as_str()
    }

    /// The source is a single archive rather than a file repository
    #[must_use]
    pub fn archive_format(&self) -> Option<ArchiveFormat> {
        ArchiveFormat::from_name(self.base.path())
    }

    /// URL of one file inside the repository
    #[must_use]
    pub fn file_url(&self, name: &str) -> String {
        let base = self.base.as_str().trim_end_matches('/');
        let is_hf_repo = self.base.host_str() == Some(HF_HOST) && !base.contains("/resolve/");

        if is_hf_repo {
            format!("{base}/resolve/main/{name}")
        } else {
            format!("{base}/{name}")
        }
    }
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

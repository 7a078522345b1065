use crate::error::{EdgeError, Result};
use crate::models::manifest::INSTALL_RECORD_FILE;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

const CHUNK_SIZE: usize = 1024 * 1024;

/// SHA-256 of one file, lowercase hex
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    hash_file_into(&mut hasher, path)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 over a whole payload directory, lowercase hex
///
/// Files are visited in relative-path order; each contributes its `/`-separated
/// relative path, a NUL byte, then its contents. The install receipt is skipped.
pub fn sha256_dir(dir: &Path) -> Result<String> {
    let mut files = Vec::new();
    collect_files(dir, dir, &mut files)?;
    files.sort();

    let mut hasher = Sha256::new();
    for relative in &files {
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hash_file_into(&mut hasher, &dir.join(relative))?;
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Run a blocking hash off the async executor
pub async fn sha256_file_async(path: PathBuf) -> Result<String> {
    tokio::task::spawn_blocking(move || sha256_file(&path))
        .await
        .map_err(|e| EdgeError::DownloadFailed(format!("Hashing task panicked: {e}")))?
}

pub async fn sha256_dir_async(dir: PathBuf) -> Result<String> {
    tokio::task::spawn_blocking(move || sha256_dir(&dir))
        .await
        .map_err(|e| EdgeError::DownloadFailed(format!("Hashing task panicked: {e}")))?
}

/// Non-empty ASCII hex, the only shape a store key may take
#[must_use]
pub fn is_hex_digest(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Compare hex digests, ignoring case
pub fn verify(expected: &str, actual: &str) -> Result<()> {
    if expected.eq_ignore_ascii_case(actual) {
        Ok(())
    } else {
        Err(EdgeError::ChecksumMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

fn hash_file_into(hasher: &mut Sha256, path: &Path) -> Result<()> {
    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(())
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if entry.file_type()?.is_dir() {
            collect_files(root, &path, out)?;
            continue;
        }

        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if relative != INSTALL_RECORD_FILE {
            out.push(relative);
        }
    }

    Ok(())
}

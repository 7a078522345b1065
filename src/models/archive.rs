use crate::error::{EdgeError, Result};
use crate::models::source::ArchiveFormat;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tar::Archive;
use zip::read::ZipArchive;

/// Extract an archive into `dest`, creating it if needed
pub fn extract(format: ArchiveFormat, archive_path: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    let file = File::open(archive_path)?;

    match format {
        ArchiveFormat::Zip => extract_zip(file, dest),
        ArchiveFormat::Tar => extract_tar(file, dest),
        ArchiveFormat::TarGz => extract_tar(GzDecoder::new(file), dest),
    }
}

/// Blocking extraction moved off the async executor
pub async fn extract_async(
    format: ArchiveFormat,
    archive_path: PathBuf,
    dest: PathBuf,
) -> Result<()> {
    tokio::task::spawn_blocking(move || extract(format, &archive_path, &dest))
        .await
        .map_err(|e| EdgeError::ExtractionFailed(format!("Extraction task panicked: {e}")))?
}

fn extract_tar<R: Read>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = Archive::new(reader);
    // `unpack` refuses entries that escape `dest`
    archive
        .unpack(dest)
        .map_err(|e| EdgeError::ExtractionFailed(format!("tar: {e}")))
}

fn extract_zip(file: File, dest: &Path) -> Result<()> {
    let mut archive =
        ZipArchive::new(file).map_err(|e| EdgeError::ExtractionFailed(format!("zip: {e}")))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| EdgeError::ExtractionFailed(format!("zip entry {i}: {e}")))?;

        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(EdgeError::ExtractionFailed(format!(
                "zip entry escapes destination: {}",
                entry.name()
            )));
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            io::copy(&mut entry, &mut out).map_err(|e| {
                EdgeError::ExtractionFailed(format!("zip write {}: {e}", target.display()))
            })?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn build_zip(path: &Path, files: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, data) in files {
            writer
                .start_file(*name, zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    fn build_tar_gz(path: &Path, files: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_extract_zip() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("runtime.zip");
        build_zip(&archive, &[("lib/libmlc.so", b"elf"), ("VERSION", b"0.2.0")]);

        let dest = temp_dir.path().join("out");
        extract(ArchiveFormat::Zip, &archive, &dest).unwrap();

        assert_eq!(fs::read(dest.join("lib/libmlc.so")).unwrap(), b"elf");
        assert_eq!(fs::read_to_string(dest.join("VERSION")).unwrap(), "0.2.0");
    }

    #[test]
    fn test_extract_tar_gz() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("model.tar.gz");
        build_tar_gz(
            &archive,
            &[("mlc-chat-config.json", b"{}"), ("params_shard_0.bin", b"w0")],
        );

        let dest = temp_dir.path().join("out");
        extract(ArchiveFormat::TarGz, &archive, &dest).unwrap();

        assert!(dest.join("mlc-chat-config.json").exists());
        assert_eq!(fs::read(dest.join("params_shard_0.bin")).unwrap(), b"w0");
    }

    #[test]
    fn test_extract_corrupt_zip_fails() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("broken.zip");
        fs::write(&archive, b"this is not a zip").unwrap();

        let result = extract(ArchiveFormat::Zip, &archive, &temp_dir.path().join("out"));
        assert!(matches!(result, Err(EdgeError::ExtractionFailed(_))));
    }
}

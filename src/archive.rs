use crate::error::{EtlError, Result};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

/// Extracts `archive_path` into `target_dir`, creating the directory if
/// absent. Entries whose names escape the target directory are skipped.
pub fn extract_zip(archive_path: &Path, target_dir: &Path) -> Result<()> {
    let file = File::open(archive_path).map_err(|e| EtlError::Archive {
        path: archive_path.display().to_string(),
        message: e.to_string(),
    })?;
    let mut archive = ZipArchive::new(file).map_err(|e| EtlError::Archive {
        path: archive_path.display().to_string(),
        message: e.to_string(),
    })?;

    std::fs::create_dir_all(target_dir)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| EtlError::Archive {
            path: archive_path.display().to_string(),
            message: e.to_string(),
        })?;
        let Some(relative) = entry.enclosed_name() else {
            warn!(
                "Skipping archive entry with unsafe name: {}",
                entry.name()
            );
            continue;
        };
        let out_path = target_dir.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out_file = File::create(&out_path)?;
        io::copy(&mut entry, &mut out_file)?;
        debug!("Extracted {}", out_path.display());
    }

    Ok(())
}

/// Target directory for an extracted archive: the sibling path with the
/// same base name minus the `.zip` extension.
pub fn extraction_dir(archive_path: &Path) -> PathBuf {
    archive_path.with_extension("")
}

/// Writes the given files into a fresh zip at `zip_path`, storing each
/// under its bare file name.
pub fn bundle_zip(files: &[PathBuf], zip_path: &Path) -> Result<()> {
    if let Some(parent) = zip_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(zip_path)?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| EtlError::Archive {
                path: path.display().to_string(),
                message: "file has no name".to_string(),
            })?;
        writer.start_file(name, options).map_err(|e| EtlError::Archive {
            path: zip_path.display().to_string(),
            message: e.to_string(),
        })?;
        let mut source = File::open(path)?;
        io::copy(&mut source, &mut writer)?;
    }

    writer.finish().map_err(|e| EtlError::Archive {
        path: zip_path.display().to_string(),
        message: e.to_string(),
    })?;
    Ok(())
}

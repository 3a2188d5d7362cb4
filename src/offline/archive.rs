//! Zip extraction and directory helpers for content packages.

use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};

use super::package::PackageError;

const MAX_ZIP_ENTRIES: usize = 200_000;
const MAX_ZIP_ENTRY_UNCOMPRESSED_BYTES: u64 = 256 * 1024 * 1024;
const MAX_ZIP_TOTAL_UNCOMPRESSED_BYTES: u64 = 8 * 1024 * 1024 * 1024;
const MAX_ZIP_COMPRESSION_RATIO: u64 = 200;

#[derive(Clone, Copy)]
pub(super) struct ZipExtractionLimits {
    max_entries: usize,
    max_entry_uncompressed_bytes: u64,
    max_total_uncompressed_bytes: u64,
    max_compression_ratio: u64,
}

impl ZipExtractionLimits {
    pub(super) fn standard() -> Self {
        Self {
            max_entries: MAX_ZIP_ENTRIES,
            max_entry_uncompressed_bytes: MAX_ZIP_ENTRY_UNCOMPRESSED_BYTES,
            max_total_uncompressed_bytes: MAX_ZIP_TOTAL_UNCOMPRESSED_BYTES,
            max_compression_ratio: MAX_ZIP_COMPRESSION_RATIO,
        }
    }
}

/// Extract `zip_path` into `dest_dir`, returning the number of files written.
pub(super) fn unzip_to_dir(
    zip_path: &Path,
    dest_dir: &Path,
    limits: ZipExtractionLimits,
) -> Result<usize, PackageError> {
    let file = File::open(zip_path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|err| PackageError::Zip(err.to_string()))?;
    let entry_count = archive.len();
    if entry_count > limits.max_entries {
        return Err(PackageError::Invalid(format!(
            "Archive has {entry_count} entries, limit is {}",
            limits.max_entries
        )));
    }
    let mut total_uncompressed: u64 = 0;
    let mut written = 0usize;
    for i in 0..entry_count {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| PackageError::Zip(err.to_string()))?;
        let uncompressed_size = entry.size();
        if uncompressed_size > limits.max_entry_uncompressed_bytes {
            return Err(PackageError::Invalid(format!(
                "Archive entry '{}' is too large ({} bytes, limit {})",
                entry.name(),
                uncompressed_size,
                limits.max_entry_uncompressed_bytes
            )));
        }
        if uncompressed_size > 0 {
            let compressed_size = entry.compressed_size();
            if compressed_size == 0
                || uncompressed_size > compressed_size.saturating_mul(limits.max_compression_ratio)
            {
                return Err(PackageError::Invalid(format!(
                    "Archive entry '{}' exceeds compression ratio limit",
                    entry.name()
                )));
            }
        }
        total_uncompressed = total_uncompressed
            .checked_add(uncompressed_size)
            .ok_or_else(|| PackageError::Invalid("Archive size overflow".into()))?;
        if total_uncompressed > limits.max_total_uncompressed_bytes {
            return Err(PackageError::Invalid(format!(
                "Archive extracted size {} exceeds limit {}",
                total_uncompressed, limits.max_total_uncompressed_bytes
            )));
        }
        let Some(relative) = entry.enclosed_name() else {
            return Err(PackageError::Invalid(format!(
                "Archive entry '{}' escapes the package",
                entry.name()
            )));
        };
        let outpath = dest_dir.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&outpath)?;
        std::io::copy(&mut entry, &mut outfile)?;
        written += 1;
    }
    Ok(written)
}

/// Normalize a package-relative path, rejecting anything that climbs out.
pub(super) fn sanitize_relative_path(name: &str) -> Result<PathBuf, PackageError> {
    let mut sanitized = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => sanitized.push(part),
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(PackageError::Invalid(format!("Invalid package path: {name}")));
            }
        }
    }
    if sanitized.as_os_str().is_empty() {
        return Err(PackageError::Invalid(format!("Invalid package path: {name}")));
    }
    Ok(sanitized)
}

pub(super) fn ensure_empty_dir(path: &Path) -> Result<(), PackageError> {
    if path.exists() {
        fs::remove_dir_all(path)?;
    }
    fs::create_dir_all(path)?;
    Ok(())
}

/// Swap `src` in as `dest`, keeping the old tree aside until the rename lands.
pub(super) fn replace_dir(src: &Path, dest: &Path) -> Result<(), PackageError> {
    let old_path = with_suffix(dest, "old");
    if old_path.exists() {
        fs::remove_dir_all(&old_path)?;
    }
    if dest.exists() {
        fs::rename(dest, &old_path)?;
    }
    fs::rename(src, dest)?;
    if old_path.exists() {
        fs::remove_dir_all(&old_path)?;
    }
    Ok(())
}

/// Copy every file under `src` into `dest`, overwriting files that exist.
pub(super) fn merge_dir(src: &Path, dest: &Path) -> Result<(), PackageError> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        let src_path = entry.path();
        let dest_path = dest.join(entry.file_name());
        if ty.is_dir() {
            merge_dir(&src_path, &dest_path)?;
        } else if ty.is_file() {
            fs::copy(&src_path, &dest_path)?;
        }
    }
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("dir")
        .to_string();
    name.push('.');
    name.push_str(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
pub(super) fn write_zip(path: &Path, entries: &[(&str, &[u8])]) -> Result<(), PackageError> {
    use std::io::Write;

    let file = File::create(path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (name, data) in entries {
        zip.start_file(*name, options)
            .map_err(|err| PackageError::Zip(err.to_string()))?;
        zip.write_all(data)?;
    }
    zip.finish().map_err(|err| PackageError::Zip(err.to_string()))?;
    Ok(())
}

//! Archive extraction.
//!
//! Archives unpack into `<dest>.partial` next to the final directory, which is
//! renamed into place once every entry is written. A directory at `<dest>`
//! therefore always holds a complete SDK.

use crate::core::config::Config;
use crate::core::outcome::{Outcome, ProgressCallback};
use crate::core::version::{extraction_dir, ArchiveFormat, InstallKey, STAGING_SUFFIX};
use crate::error::{FvsError, Result};
use crate::utils::fs;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use tokio_util::sync::CancellationToken;
use zip::ZipArchive;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unpacked {
    Done,
    Cancelled,
}

pub struct ArchiveExtractor {
    max_unpacked_size: u64,
}

impl ArchiveExtractor {
    pub fn new(config: &Config) -> Self {
        Self::with_limit(config.max_unpacked_size)
    }

    pub fn with_limit(max_unpacked_size: u64) -> Self {
        Self { max_unpacked_size }
    }

    /// Extracts `archive` next to itself and deletes it on success.
    ///
    /// Runs on the blocking pool. On failure the archive is left untouched.
    pub async fn extract(
        &self,
        archive: &Path,
        key: &InstallKey,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Outcome {
        let archive_path = archive.to_path_buf();
        let limit = self.max_unpacked_size;

        let joined = tokio::task::spawn_blocking(move || {
            extract_blocking(&archive_path, limit, &progress, &cancel)
        })
        .await;

        match joined {
            Ok(Ok(Some(dest))) => {
                tracing::info!("extracted {} to {}", archive.display(), dest.display());
                Outcome::Completed {
                    path: dest,
                    key: key.clone(),
                }
            }
            Ok(Ok(None)) => {
                tracing::info!("extraction of {} cancelled", archive.display());
                Outcome::Cancelled
            }
            Ok(Err(e)) => {
                tracing::warn!("{e}");
                Outcome::failed(e)
            }
            Err(e) => Outcome::failed(FvsError::extraction(archive, format!("worker failed: {e}"))),
        }
    }
}

/// Returns the extracted directory, or `None` when cancelled.
pub fn extract_blocking(
    archive: &Path,
    max_unpacked_size: u64,
    progress: &ProgressCallback,
    cancel: &CancellationToken,
) -> Result<Option<PathBuf>> {
    let format = ArchiveFormat::from_path(archive).ok_or_else(|| FvsError::UnsupportedArchive {
        path: archive.to_path_buf(),
    })?;
    let dest = extraction_dir(archive)?;
    let staging = fs::with_suffix(&dest, STAGING_SUFFIX);

    fs::remove_dir_recursive(&staging)?;
    std::fs::create_dir_all(&staging)?;

    tracing::debug!("unpacking {} into {}", archive.display(), staging.display());
    let unpacked = match format {
        ArchiveFormat::Zip => unpack_zip(archive, &staging, max_unpacked_size, progress, cancel),
        ArchiveFormat::TarXz | ArchiveFormat::TarGz => {
            unpack_tar(archive, format, &staging, max_unpacked_size, progress, cancel)
        }
    };

    match unpacked {
        Ok(Unpacked::Done) => {
            fs::remove_dir_recursive(&dest)?;
            std::fs::rename(&staging, &dest)?;
            fs::remove_file_if_exists(archive)?;
            Ok(Some(dest))
        }
        Ok(Unpacked::Cancelled) => {
            let _ = std::fs::remove_dir_all(&staging);
            Ok(None)
        }
        Err(e) => {
            let _ = std::fs::remove_dir_all(&staging);
            Err(e)
        }
    }
}

fn unpack_zip(
    archive: &Path,
    dest: &Path,
    max_unpacked_size: u64,
    progress: &ProgressCallback,
    cancel: &CancellationToken,
) -> Result<Unpacked> {
    let malformed = |e: zip::result::ZipError| FvsError::extraction(archive, e.to_string());

    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(BufReader::new(file)).map_err(malformed)?;
    let total = zip.len();

    let mut declared: u64 = 0;
    for i in 0..total {
        declared = declared.saturating_add(zip.by_index_raw(i).map_err(malformed)?.size());
    }
    check_size(archive, declared, max_unpacked_size)?;

    for i in 0..total {
        if cancel.is_cancelled() {
            return Ok(Unpacked::Cancelled);
        }

        let mut entry = zip.by_index(i).map_err(malformed)?;
        let name = entry.name().to_string();
        let relative = safe_relative_path(&name)?;
        reject_linked_path(dest, &relative)?;
        let outpath = dest.join(&relative);
        let mode = entry.unix_mode();

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
        } else if mode.is_some_and(|m| m & S_IFMT == S_IFLNK) {
            let mut target = String::new();
            entry.read_to_string(&mut target)?;
            create_symlink(&relative, Path::new(&target), &outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&outpath)?;
            std::io::copy(&mut entry, &mut outfile)?;
            if let Some(mode) = mode {
                apply_mode(&outpath, mode)?;
            }
        }

        report(progress, i + 1, total);
    }

    if total == 0 {
        progress(100.0);
    }
    Ok(Unpacked::Done)
}

fn open_tar(archive: &Path, format: ArchiveFormat) -> Result<Archive<Box<dyn Read>>> {
    let file = BufReader::new(File::open(archive)?);
    let reader: Box<dyn Read> = match format {
        ArchiveFormat::TarXz => Box::new(xz2::read::XzDecoder::new(file)),
        _ => Box::new(flate2::read::GzDecoder::new(file)),
    };
    Ok(Archive::new(reader))
}

fn unpack_tar(
    archive: &Path,
    format: ArchiveFormat,
    dest: &Path,
    max_unpacked_size: u64,
    progress: &ProgressCallback,
    cancel: &CancellationToken,
) -> Result<Unpacked> {
    let malformed = |e: std::io::Error| FvsError::extraction(archive, e.to_string());

    // Tar has no index, so a first pass validates the stream and counts entries.
    let mut total = 0usize;
    let mut declared: u64 = 0;
    let mut scan = open_tar(archive, format)?;
    for entry in scan.entries().map_err(malformed)? {
        let entry = entry.map_err(malformed)?;
        declared = declared.saturating_add(entry.header().size().map_err(malformed)?);
        total += 1;
    }
    check_size(archive, declared, max_unpacked_size)?;

    let mut tar = open_tar(archive, format)?;
    for (index, entry) in tar.entries().map_err(malformed)?.enumerate() {
        if cancel.is_cancelled() {
            return Ok(Unpacked::Cancelled);
        }

        let mut entry = entry.map_err(malformed)?;
        let name = entry.path().map_err(malformed)?.to_string_lossy().into_owned();
        if name.trim_end_matches('/') == "." {
            report(progress, index + 1, total);
            continue;
        }
        let relative = safe_relative_path(&name)?;
        reject_linked_path(dest, &relative)?;
        let outpath = dest.join(&relative);

        match entry.header().entry_type() {
            EntryType::Directory => {
                std::fs::create_dir_all(&outpath)?;
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = outpath.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut outfile = File::create(&outpath)?;
                std::io::copy(&mut entry, &mut outfile)?;
                if let Ok(mode) = entry.header().mode() {
                    apply_mode(&outpath, mode)?;
                }
            }
            EntryType::Symlink => {
                let target = entry
                    .link_name()
                    .map_err(malformed)?
                    .ok_or_else(|| FvsError::extraction(archive, format!("symlink {name} has no target")))?
                    .into_owned();
                create_symlink(&relative, &target, &outpath)?;
            }
            other => {
                tracing::warn!("skipping {name}: unsupported entry type {other:?}");
            }
        }

        report(progress, index + 1, total);
    }

    if total == 0 {
        progress(100.0);
    }
    Ok(Unpacked::Done)
}

fn check_size(archive: &Path, declared: u64, limit: u64) -> Result<()> {
    if declared > limit {
        return Err(FvsError::ArchiveTooLarge {
            path: archive.to_path_buf(),
            size: declared,
            limit,
        });
    }
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn report(progress: &ProgressCallback, done: usize, total: usize) {
    if total > 0 {
        progress((done as f64 / total as f64 * 100.0) as f32);
    }
}

/// Validates an archive entry name and returns it as a relative path.
///
/// Rejects NUL bytes, absolute paths, drive prefixes and any `..` component.
pub fn safe_relative_path(name: &str) -> Result<PathBuf> {
    let unsafe_entry = || FvsError::UnsafeEntry {
        entry: name.to_string(),
    };

    if name.contains('\0') {
        return Err(unsafe_entry());
    }

    let mut relative = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_entry());
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(unsafe_entry());
    }
    Ok(relative)
}

/// Fails when `relative`, or any directory on the way to it, is already a
/// symlink under `root`. Writing through such a path would follow links
/// created by earlier entries and could land outside `root`.
fn reject_linked_path(root: &Path, relative: &Path) -> Result<()> {
    let mut current = root.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match std::fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(FvsError::UnsafeEntry {
                    entry: relative.display().to_string(),
                });
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    Ok(())
}

/// True when `target`, resolved from the directory holding `link`, stays
/// inside the extraction root. `link` is relative to that root.
pub fn link_stays_inside(link: &Path, target: &Path) -> bool {
    let mut depth = link
        .parent()
        .map(|parent| {
            parent
                .components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .count()
        })
        .unwrap_or(0);

    for component in target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

fn create_symlink(relative: &Path, target: &Path, outpath: &Path) -> Result<()> {
    if !link_stays_inside(relative, target) {
        return Err(FvsError::UnsafeEntry {
            entry: format!("{} -> {}", relative.display(), target.display()),
        });
    }

    if let Some(parent) = outpath.parent() {
        std::fs::create_dir_all(parent)?;
    }

    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, outpath)?;
    }

    #[cfg(not(unix))]
    {
        tracing::warn!(
            "skipping symlink {} -> {}: not supported on this platform",
            relative.display(),
            target.display()
        );
    }

    Ok(())
}

fn apply_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = mode & 0o7777;
        if permissions != 0 {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(permissions))?;
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }

    Ok(())
}

use crate::error::{FvsError, Result};
use std::fmt;
use std::fs::read_dir;
use std::path::{Path, PathBuf};

const DIR_PREFIX: &str = "flutter_";

/// Suffix of the staging directory an archive is unpacked into.
pub const STAGING_SUFFIX: &str = ".partial";

/// Identifies one local installation: a version built for one architecture.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstallKey {
    pub version: String,
    pub arch: Option<String>,
}

impl InstallKey {
    pub fn new(version: &str, arch: Option<&str>) -> Self {
        Self {
            version: version.trim().to_string(),
            arch: arch
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string),
        }
    }

    /// `flutter_<version>_<arch>`, or `flutter_<version>` without an arch.
    pub fn dir_name(&self) -> String {
        match &self.arch {
            Some(arch) => format!("{DIR_PREFIX}{}_{arch}", self.version),
            None => format!("{DIR_PREFIX}{}", self.version),
        }
    }

    pub fn archive_name(&self, format: ArchiveFormat) -> String {
        format!("{}{}", self.dir_name(), format.extension())
    }

    /// Parses a directory name produced by [`InstallKey::dir_name`].
    pub fn from_dir_name(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(DIR_PREFIX)?;
        if rest.is_empty() || rest.ends_with(STAGING_SUFFIX) {
            return None;
        }
        match rest.rsplit_once('_') {
            Some((version, arch)) if !version.is_empty() => Some(Self::new(version, Some(arch))),
            _ => Some(Self::new(rest, None)),
        }
    }
}

impl fmt::Display for InstallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arch {
            Some(arch) => write!(f, "{} ({arch})", self.version),
            None => f.write_str(&self.version),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarXz,
    TarGz,
}

impl ArchiveFormat {
    pub const ALL: [ArchiveFormat; 3] = [ArchiveFormat::Zip, ArchiveFormat::TarXz, ArchiveFormat::TarGz];

    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if name.ends_with(".tar.xz") {
            Some(ArchiveFormat::TarXz)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else {
            None
        }
    }

    /// Format of a manifest `archive` path such as `stable/linux/flutter_linux_3.19.0-stable.tar.xz`.
    pub fn from_archive_path(archive: &str) -> Option<Self> {
        let name = archive.rsplit('/').next()?;
        Self::from_path(Path::new(name))
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => ".zip",
            ArchiveFormat::TarXz => ".tar.xz",
            ArchiveFormat::TarGz => ".tar.gz",
        }
    }
}

/// Directory an archive extracts into: the archive path minus its extension.
pub fn extraction_dir(archive: &Path) -> Result<PathBuf> {
    let unsupported = || FvsError::UnsupportedArchive {
        path: archive.to_path_buf(),
    };
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(unsupported)?;
    let lower = name.to_ascii_lowercase();

    let suffix_len = [".tar.xz", ".tar.gz", ".tgz", ".zip"]
        .iter()
        .find(|ext| lower.ends_with(*ext))
        .map(|ext| ext.len())
        .ok_or_else(unsupported)?;

    let stem = &name[..name.len() - suffix_len];
    if stem.is_empty() {
        return Err(unsupported());
    }
    Ok(archive.with_file_name(stem))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStatus {
    Downloaded,
    NotDownloaded,
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseStatus::Downloaded => f.write_str("Downloaded"),
            ReleaseStatus::NotDownloaded => f.write_str("Not Downloaded"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstalledVersion {
    pub key: InstallKey,
    pub path: PathBuf,
    pub is_valid: bool,
}

/// View of the installations inside one download directory.
pub struct Installations {
    root: PathBuf,
}

impl Installations {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn install_dir(&self, key: &InstallKey) -> PathBuf {
        self.root.join(key.dir_name())
    }

    pub fn archive_path(&self, key: &InstallKey, format: ArchiveFormat) -> PathBuf {
        self.root.join(key.archive_name(format))
    }

    /// A completed archive left on disk for `key`, if any.
    pub fn pending_archive(&self, key: &InstallKey) -> Option<PathBuf> {
        ArchiveFormat::ALL
            .iter()
            .map(|format| self.archive_path(key, *format))
            .find(|path| path.is_file())
    }

    pub fn is_downloaded(&self, key: &InstallKey) -> bool {
        self.install_dir(key).is_dir()
    }

    pub fn status(&self, key: &InstallKey) -> ReleaseStatus {
        if self.is_downloaded(key) {
            ReleaseStatus::Downloaded
        } else {
            ReleaseStatus::NotDownloaded
        }
    }

    pub fn list_installed(&self) -> Result<Vec<InstalledVersion>> {
        if !self.root.exists() {
            return Ok(vec![]);
        }

        let mut versions = Vec::new();

        for entry in read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();

            if !path.is_dir() {
                continue;
            }
            let Some(key) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(InstallKey::from_dir_name)
            else {
                continue;
            };

            let is_valid = sdk_binary(&path).is_file();
            versions.push(InstalledVersion {
                key,
                path,
                is_valid,
            });
        }

        versions.sort_by(|a, b| {
            version_compare(&a.key.version, &b.key.version).then_with(|| a.key.arch.cmp(&b.key.arch))
        });

        Ok(versions)
    }
}

/// Root of the SDK inside an installed directory; Flutter archives wrap
/// everything in a top-level `flutter/` folder.
pub fn sdk_root(install_dir: &Path) -> PathBuf {
    install_dir.join("flutter")
}

pub fn sdk_bin_dir(install_dir: &Path) -> PathBuf {
    sdk_root(install_dir).join("bin")
}

pub fn sdk_binary(install_dir: &Path) -> PathBuf {
    let binary_name = if cfg!(windows) { "flutter.bat" } else { "flutter" };
    sdk_bin_dir(install_dir).join(binary_name)
}

/// Orders dotted versions numerically where possible (`3.9.0` < `3.10.0`).
pub fn version_compare(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split(['.', '-', '+'])
            .map_while(|part| part.parse::<u64>().ok())
            .collect()
    };

    parse(a).cmp(&parse(b)).then_with(|| a.cmp(b))
}

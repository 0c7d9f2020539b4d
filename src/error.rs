use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FvsError>;

#[derive(Error, Debug)]
pub enum FvsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to fetch release manifest from {url}: {reason}")]
    ManifestFetch { url: String, reason: String },

    #[error("Download failed for {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("Extraction failed for {path}: {reason}")]
    Extraction { path: PathBuf, reason: String },

    #[error("Archive entry escapes the destination directory: {entry}")]
    UnsafeEntry { entry: String },

    #[error("Archive {path} unpacks to {size} bytes, more than the {limit} byte limit")]
    ArchiveTooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("Unsupported archive format: {path}")]
    UnsupportedArchive { path: PathBuf },

    #[error("Flutter SDK not found at {path}")]
    ActivationNotFound { path: PathBuf },

    #[error("Activation failed writing {path}: {reason}")]
    Activation { path: PathBuf, reason: String },

    #[error("Version {version} is already downloaded")]
    AlreadyInstalled { version: String },

    #[error("Version {version} is already being installed")]
    OperationInProgress { version: String },

    #[error("Version {version} is not installed; download it first")]
    NotInstalled { version: String },

    #[error("Release '{version}' not found in the manifest")]
    ReleaseNotFound { version: String },

    #[error("Settings error: {message}")]
    Settings { message: String },

    #[error("Home directory not found")]
    HomeDirectoryNotFound,
}

impl FvsError {
    pub fn settings<S: Into<String>>(message: S) -> Self {
        FvsError::Settings {
            message: message.into(),
        }
    }

    pub fn extraction<S: Into<String>>(path: impl Into<PathBuf>, reason: S) -> Self {
        FvsError::Extraction {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn activation<S: Into<String>>(path: impl Into<PathBuf>, reason: S) -> Self {
        FvsError::Activation {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

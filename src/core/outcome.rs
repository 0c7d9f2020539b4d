use crate::core::version::InstallKey;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Receives percent-complete values in the 0-100 range.
///
/// Wrapped in `Arc` so it can move onto blocking worker threads.
pub type ProgressCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// Terminal result of a download, extraction or activation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed { path: PathBuf, key: InstallKey },
    Failed { reason: String },
    Cancelled,
    NotFound { path: PathBuf },
}

impl Outcome {
    pub fn failed(reason: impl fmt::Display) -> Self {
        Outcome::Failed {
            reason: reason.to_string(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed { path, .. } => write!(f, "completed: {}", path.display()),
            Outcome::Failed { reason } => write!(f, "failed: {reason}"),
            Outcome::Cancelled => f.write_str("cancelled"),
            Outcome::NotFound { path } => write!(f, "not found: {}", path.display()),
        }
    }
}

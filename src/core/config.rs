use std::time::Duration;

/// Base URL the Flutter infra bucket publishes release archives under.
pub const DEFAULT_ARCHIVE_BASE_URL: &str =
    "https://storage.googleapis.com/flutter_infra_release/releases";

/// Path suffix appended to `FLUTTER_STORAGE_BASE_URL` mirrors.
const MIRROR_RELEASES_PATH: &str = "flutter_infra_release/releases";

pub const MANIFEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on the total declared size of an archive's entries.
pub const DEFAULT_MAX_UNPACKED_SIZE: u64 = 16 * 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub manifest_url: String,
    pub archive_base_url: String,
    pub manifest_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_unpacked_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            manifest_url: default_manifest_url(DEFAULT_ARCHIVE_BASE_URL),
            archive_base_url: DEFAULT_ARCHIVE_BASE_URL.to_string(),
            manifest_timeout: MANIFEST_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
            max_unpacked_size: DEFAULT_MAX_UNPACKED_SIZE,
        }
    }
}

impl Config {
    /// Builds the configuration from the environment.
    ///
    /// `FLUTTER_STORAGE_BASE_URL` points both the manifest and the archives at a
    /// mirror, the same variable the Flutter tool itself honours.
    /// `FVS_MANIFEST_URL` overrides the manifest location alone.
    pub fn from_env() -> Self {
        let mirror = std::env::var("FLUTTER_STORAGE_BASE_URL").ok();
        let manifest = std::env::var("FVS_MANIFEST_URL").ok();
        Self::with_overrides(mirror.as_deref(), manifest.as_deref())
    }

    pub fn with_overrides(mirror: Option<&str>, manifest_url: Option<&str>) -> Self {
        let mut config = Config::default();

        if let Some(mirror) = mirror.map(str::trim).filter(|m| !m.is_empty()) {
            config.archive_base_url =
                format!("{}/{MIRROR_RELEASES_PATH}", mirror.trim_end_matches('/'));
            config.manifest_url = default_manifest_url(&config.archive_base_url);
        }

        if let Some(url) = manifest_url.map(str::trim).filter(|u| !u.is_empty()) {
            config.manifest_url = url.to_string();
        }

        config
    }

    /// Joins a manifest `archive` path onto the archive base URL.
    pub fn archive_url(&self, archive: &str) -> String {
        format!(
            "{}/{}",
            self.archive_base_url.trim_end_matches('/'),
            archive.trim_start_matches('/')
        )
    }
}

fn default_manifest_url(base: &str) -> String {
    let platform = if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(windows) {
        "windows"
    } else {
        "linux"
    };
    format!("{}/releases_{platform}.json", base.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest_is_platform_specific() {
        let config = Config::default();
        assert!(config.manifest_url.starts_with(DEFAULT_ARCHIVE_BASE_URL));
        assert!(config.manifest_url.ends_with(".json"));
        assert_eq!(config.manifest_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_mirror_moves_manifest_and_archives() {
        let config = Config::with_overrides(Some("https://mirror.example/"), None);
        assert_eq!(
            config.archive_base_url,
            "https://mirror.example/flutter_infra_release/releases"
        );
        assert!(config
            .manifest_url
            .starts_with("https://mirror.example/flutter_infra_release/releases/releases_"));
    }

    #[test]
    fn test_manifest_override_wins() {
        let config = Config::with_overrides(
            Some("https://mirror.example"),
            Some("http://localhost:9000/releases.json"),
        );
        assert_eq!(config.manifest_url, "http://localhost:9000/releases.json");
    }

    #[test]
    fn test_archive_url_joins_single_slash() {
        let config = Config::default();
        assert_eq!(
            config.archive_url("/stable/macos/flutter_macos_3.19.0-stable.zip"),
            format!("{DEFAULT_ARCHIVE_BASE_URL}/stable/macos/flutter_macos_3.19.0-stable.zip")
        );
    }
}

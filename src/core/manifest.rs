//! Release manifest model and fetcher.
//!
//! The manifest is the JSON document the Flutter infra bucket publishes per
//! platform, e.g. `releases_linux.json`:
//!
//! ```json
//! {
//!   "base_url": "https://storage.googleapis.com/flutter_infra_release/releases",
//!   "current_release": { "stable": "<hash>", "beta": "<hash>" },
//!   "releases": [
//!     {
//!       "hash": "<hash>",
//!       "channel": "stable",
//!       "version": "3.19.0",
//!       "dart_sdk_version": "3.3.0",
//!       "dart_sdk_arch": "x64",
//!       "release_date": "2024-02-15T18:32:26.123456Z",
//!       "archive": "stable/linux/flutter_linux_3.19.0-stable.tar.xz"
//!     }
//!   ]
//! }
//! ```

use crate::core::config::Config;
use crate::core::http;
use crate::core::version::InstallKey;
use crate::error::{FvsError, Result};
use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

const RELEASE_DATE_DISPLAY: &str = "%d-%B-%Y %I:%M %p";

/// A release track. Stored lowercased so `Stable` and `stable` are one channel.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Channel(String);

impl Channel {
    pub fn new(name: &str) -> Self {
        Channel(name.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Capitalized name for display ("stable" -> "Stable").
    pub fn display_name(&self) -> String {
        let mut chars = self.0.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl From<String> for Channel {
    fn from(name: String) -> Self {
        Channel::new(&name)
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    #[serde(default)]
    pub hash: Option<String>,
    pub channel: Channel,
    pub version: String,
    #[serde(default)]
    pub dart_sdk_version: Option<String>,
    #[serde(default)]
    pub dart_sdk_arch: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(rename = "archive")]
    pub archive_path: String,
}

impl Release {
    pub fn install_key(&self) -> InstallKey {
        InstallKey::new(&self.version, self.dart_sdk_arch.as_deref())
    }

    pub fn released_at(&self) -> Option<DateTime<Utc>> {
        self.release_date.as_deref().and_then(parse_release_date)
    }

    /// Release date rendered in the local time zone, empty when absent or unparsable.
    pub fn local_release_date(&self) -> String {
        self.released_at()
            .map(|date| format_release_date(&date, &Local))
            .unwrap_or_default()
    }
}

pub fn parse_release_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

pub fn format_release_date<Tz>(date: &DateTime<Utc>, zone: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    date.with_timezone(zone)
        .format(RELEASE_DATE_DISPLAY)
        .to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub current_release: HashMap<Channel, String>,
    #[serde(default)]
    pub releases: Vec<Release>,
}

impl Manifest {
    pub fn from_json(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }

    /// Distinct channels in sorted order.
    pub fn channels(&self) -> Vec<Channel> {
        self.releases
            .iter()
            .map(|release| release.channel.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn releases_in<'a>(&'a self, channel: &Channel) -> impl Iterator<Item = &'a Release> + 'a {
        let channel = channel.clone();
        self.releases
            .iter()
            .filter(move |release| release.channel == channel)
    }

    pub fn group_by_channel(&self) -> BTreeMap<Channel, Vec<&Release>> {
        let mut groups: BTreeMap<Channel, Vec<&Release>> = BTreeMap::new();
        for release in &self.releases {
            groups
                .entry(release.channel.clone())
                .or_default()
                .push(release);
        }
        groups
    }

    /// The release `current_release` points at for `channel`.
    pub fn current(&self, channel: &Channel) -> Option<&Release> {
        let hash = self.current_release.get(channel)?;
        self.releases_in(channel)
            .find(|release| release.hash.as_deref() == Some(hash.as_str()))
    }

    pub fn is_current(&self, release: &Release) -> bool {
        match (&release.hash, self.current_release.get(&release.channel)) {
            (Some(hash), Some(current)) => hash == current,
            _ => false,
        }
    }

    /// Finds a release by version, narrowed by architecture when one is given.
    pub fn find(&self, version: &str, arch: Option<&str>) -> Option<&Release> {
        let version = version.trim().trim_start_matches('v');
        self.releases.iter().find(|release| {
            release.version == version
                && arch.map_or(true, |arch| {
                    release
                        .dart_sdk_arch
                        .as_deref()
                        .is_some_and(|a| a.eq_ignore_ascii_case(arch))
                })
        })
    }
}

pub struct ManifestClient {
    client: reqwest::Client,
}

impl ManifestClient {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: http::manifest_client(config)?,
        })
    }

    pub async fn fetch(&self, url: &str) -> Result<Manifest> {
        let fetch_error = |reason: String| FvsError::ManifestFetch {
            url: url.to_string(),
            reason,
        };

        tracing::info!("fetching release manifest from {url}");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;
        let manifest = Manifest::from_json(&body)
            .map_err(|e| fetch_error(format!("invalid manifest JSON: {e}")))?;

        tracing::debug!("manifest lists {} releases", manifest.releases.len());
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_manifest() -> Manifest {
        Manifest::from_json(
            br#"{
                "current_release": {"stable": "aaa", "beta": "bbb"},
                "releases": [
                    {"hash": "aaa", "channel": "stable", "version": "3.19.0",
                     "dart_sdk_version": "3.3.0", "dart_sdk_arch": "x64",
                     "release_date": "2024-02-15T18:32:26.123456Z",
                     "archive": "stable/linux/flutter_linux_3.19.0-stable.tar.xz"},
                    {"hash": "ccc", "channel": "stable", "version": "3.19.0",
                     "dart_sdk_arch": "arm64",
                     "archive": "stable/macos/flutter_macos_arm64_3.19.0-stable.zip"},
                    {"hash": "bbb", "channel": "Beta", "version": "3.20.0-1.2.pre",
                     "archive": "beta/linux/flutter_linux_3.20.0-1.2.pre-beta.tar.xz"},
                    {"hash": "ddd", "channel": "dev", "version": "2.9.0-0.1.pre",
                     "archive": "dev/linux/flutter_linux_2.9.0-0.1.pre-dev.tar.xz"}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_minimal_manifest_scenario() {
        let manifest = Manifest::from_json(
            br#"{"releases":[{"channel":"stable","version":"3.19.0","archive":"a/b.zip"}]}"#,
        )
        .unwrap();

        let names: Vec<String> = manifest
            .channels()
            .iter()
            .map(Channel::display_name)
            .collect();
        assert_eq!(names, vec!["Stable".to_string()]);

        let stable = Channel::new("Stable");
        let versions: Vec<&str> = manifest
            .releases_in(&stable)
            .map(|r| r.version.as_str())
            .collect();
        assert_eq!(versions, vec!["3.19.0"]);
        assert_eq!(manifest.releases[0].archive_path, "a/b.zip");
    }

    #[test]
    fn test_missing_releases_is_empty() {
        let manifest = Manifest::from_json(br#"{"base_url": "https://example.com"}"#).unwrap();
        assert!(manifest.releases.is_empty());
        assert!(manifest.channels().is_empty());
    }

    #[test]
    fn test_channels_are_normalized_and_sorted() {
        let manifest = sample_manifest();
        let channels = manifest.channels();
        let names: Vec<&str> = channels.iter().map(|c| c.as_str()).collect();
        assert_eq!(names, vec!["beta", "dev", "stable"]);
    }

    #[test]
    fn test_channel_releases_outlive_channel_key() {
        let manifest = sample_manifest();
        let stable: Vec<&Release> = {
            let channel = Channel::new("Stable");
            manifest.releases_in(&channel).collect()
        };
        assert!(!stable.is_empty());
        assert!(stable.iter().all(|r| r.channel.as_str() == "stable"));

        let current = {
            let channel = Channel::new("stable");
            manifest.current(&channel)
        };
        assert!(current.is_some());
    }

    #[test]
    fn test_grouping_partitions_releases() {
        let manifest = sample_manifest();
        let groups = manifest.group_by_channel();

        let total: usize = groups.values().map(Vec::len).sum();
        assert_eq!(total, manifest.releases.len());

        for release in &manifest.releases {
            let containing: Vec<&Channel> = groups
                .iter()
                .filter(|(_, members)| members.iter().any(|m| std::ptr::eq(*m, release)))
                .map(|(channel, _)| channel)
                .collect();
            assert_eq!(containing, vec![&release.channel]);
        }
    }

    #[test]
    fn test_current_release_lookup() {
        let manifest = sample_manifest();
        let current = manifest.current(&Channel::new("stable")).unwrap();
        assert_eq!(current.dart_sdk_arch.as_deref(), Some("x64"));
        assert!(manifest.is_current(current));
        assert!(manifest.current(&Channel::new("dev")).is_none());
    }

    #[test]
    fn test_find_by_version_and_arch() {
        let manifest = sample_manifest();
        let arm = manifest.find("3.19.0", Some("ARM64")).unwrap();
        assert_eq!(arm.hash.as_deref(), Some("ccc"));
        assert_eq!(manifest.find("v3.19.0", None).unwrap().hash.as_deref(), Some("aaa"));
        assert!(manifest.find("3.19.0", Some("ia32")).is_none());
    }

    #[test]
    fn test_release_date_formatting() {
        let date = parse_release_date("2024-02-15T18:32:26.123456Z").unwrap();
        assert_eq!(format_release_date(&date, &Utc), "15-February-2024 06:32 PM");
        assert!(parse_release_date("yesterday").is_none());

        let release = Release {
            hash: None,
            channel: Channel::new("stable"),
            version: "1.0.0".to_string(),
            dart_sdk_version: None,
            dart_sdk_arch: None,
            release_date: None,
            archive_path: "a.zip".to_string(),
        };
        assert_eq!(release.local_release_date(), "");
    }

    #[tokio::test]
    async fn test_fetch_parses_manifest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/releases_linux.json"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"releases":[{"channel":"STABLE","version":"3.19.0","archive":"a/b.zip"}]}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let client = ManifestClient::new(&Config::default()).unwrap();
        let manifest = client
            .fetch(&format!("{}/releases_linux.json", server.uri()))
            .await
            .unwrap();

        assert_eq!(manifest.channels(), vec![Channel::new("stable")]);
    }

    #[tokio::test]
    async fn test_fetch_reports_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = ManifestClient::new(&Config::default()).unwrap();
        let err = client
            .fetch(&format!("{}/releases_linux.json", server.uri()))
            .await
            .unwrap_err();

        match err {
            FvsError::ManifestFetch { reason, .. } => assert!(reason.contains("503")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_rejects_invalid_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = ManifestClient::new(&Config::default()).unwrap();
        let result = client.fetch(&server.uri()).await;
        assert!(matches!(result, Err(FvsError::ManifestFetch { .. })));
    }
}

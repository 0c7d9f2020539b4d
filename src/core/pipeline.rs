//! Download -> extract -> activate orchestration.
//!
//! Each [`InstallPipeline::download`] call spawns one task that drives the
//! downloader and then the extractor for a single [`InstallKey`]. The task
//! reports to the caller only through the [`Operation`] it returns: a stream
//! of [`PipelineEvent`]s and a final [`InstallState`]. At most one task per
//! key is in flight.

use crate::core::activate::VersionActivator;
use crate::core::config::Config;
use crate::core::download::ArchiveDownloader;
use crate::core::extract::ArchiveExtractor;
use crate::core::manifest::Release;
use crate::core::outcome::{Outcome, ProgressCallback};
use crate::core::settings::{self, SettingsStore};
use crate::core::version::{ArchiveFormat, InstallKey, InstalledVersion, Installations};
use crate::error::{FvsError, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Download,
    Extract,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Download => f.write_str("Download"),
            Stage::Extract => f.write_str("Extraction"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstallState {
    NotDownloaded,
    Downloading,
    Downloaded { archive: PathBuf },
    Extracting,
    Installed { dir: PathBuf },
    Failed { reason: String },
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallState::NotDownloaded => f.write_str("Not Downloaded"),
            InstallState::Downloading => f.write_str("Downloading"),
            InstallState::Downloaded { .. } => f.write_str("Downloaded (not extracted)"),
            InstallState::Extracting => f.write_str("Extracting"),
            InstallState::Installed { .. } => f.write_str("Downloaded"),
            InstallState::Failed { reason } => write!(f, "Failed: {reason}"),
        }
    }
}

/// Status updates for the presentation layer. `Display` renders the status line.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Progress { stage: Stage, percent: f32 },
    Finished { stage: Stage, outcome: Outcome },
    /// Installed state changed; listings should be reloaded.
    Refresh { key: InstallKey, dir: PathBuf },
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineEvent::Progress {
                stage: Stage::Download,
                percent,
            } => write!(f, "Downloading... {percent:.0}%"),
            PipelineEvent::Progress {
                stage: Stage::Extract,
                percent,
            } => write!(f, "Extracting... {percent:.2}%"),
            PipelineEvent::Finished { stage, outcome } => match outcome {
                Outcome::Completed { path, .. } => {
                    write!(f, "{stage} Completed: {}", path.display())
                }
                Outcome::Failed { reason } => write!(f, "{stage} Failed: {reason}"),
                Outcome::Cancelled => write!(f, "{stage} Cancelled"),
                Outcome::NotFound { path } => {
                    write!(f, "{stage} Failed: {} not found", path.display())
                }
            },
            PipelineEvent::Refresh { key, dir } => {
                write!(f, "Flutter {key} installed at {}", dir.display())
            }
        }
    }
}

/// Handle to one running download-and-extract task.
pub struct Operation {
    key: InstallKey,
    events: mpsc::UnboundedReceiver<PipelineEvent>,
    cancel: CancellationToken,
    task: JoinHandle<InstallState>,
}

impl Operation {
    pub fn key(&self) -> &InstallKey {
        &self.key
    }

    /// Next event, or `None` once the task has finished.
    pub async fn next_event(&mut self) -> Option<PipelineEvent> {
        self.events.recv().await
    }

    /// Asks the task to stop; it ends with [`Outcome::Cancelled`] and discards partial output.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Waits for the task and returns the key's resulting state.
    pub async fn wait(self) -> InstallState {
        match self.task.await {
            Ok(state) => state,
            Err(e) => InstallState::Failed {
                reason: format!("install task failed: {e}"),
            },
        }
    }
}

struct Inner {
    config: Config,
    settings: Arc<dyn SettingsStore>,
    downloader: ArchiveDownloader,
    extractor: ArchiveExtractor,
    activator: VersionActivator,
    in_flight: Mutex<HashMap<InstallKey, Stage>>,
    failures: Mutex<HashMap<InstallKey, String>>,
}

impl Inner {
    fn installations(&self) -> Result<Installations> {
        Ok(Installations::new(settings::download_dir(self.settings.as_ref())?))
    }

    fn set_stage(&self, key: &InstallKey, stage: Stage) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.insert(key.clone(), stage);
    }

    fn record_failure(&self, key: &InstallKey, reason: &str) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.insert(key.clone(), reason.to_string());
    }

    fn clear_failure(&self, key: &InstallKey) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.remove(key);
    }
}

/// Removes a key from the in-flight map when its task ends, however it ends.
struct InFlightGuard {
    inner: Arc<Inner>,
    key: InstallKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.remove(&self.key);
    }
}

#[derive(Clone)]
pub struct InstallPipeline {
    inner: Arc<Inner>,
}

impl InstallPipeline {
    pub fn new(
        config: Config,
        settings: Arc<dyn SettingsStore>,
        activator: VersionActivator,
    ) -> Result<Self> {
        let downloader = ArchiveDownloader::new(&config)?;
        let extractor = ArchiveExtractor::new(&config);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                settings,
                downloader,
                extractor,
                activator,
                in_flight: Mutex::new(HashMap::new()),
                failures: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn activator(&self) -> &VersionActivator {
        &self.inner.activator
    }

    /// Current download directory, re-read from settings on every call.
    pub fn download_dir(&self) -> Result<PathBuf> {
        settings::download_dir(self.inner.settings.as_ref())
    }

    pub fn set_download_dir(&self, dir: &Path) -> Result<()> {
        settings::set_download_dir(self.inner.settings.as_ref(), dir)?;
        tracing::info!("download directory set to {}", dir.display());
        Ok(())
    }

    pub fn installations(&self) -> Result<Installations> {
        self.inner.installations()
    }

    pub fn is_downloaded(&self, key: &InstallKey) -> Result<bool> {
        Ok(self.inner.installations()?.is_downloaded(key))
    }

    pub fn installed(&self) -> Result<Vec<InstalledVersion>> {
        self.inner.installations()?.list_installed()
    }

    pub fn state(&self, key: &InstallKey) -> Result<InstallState> {
        let stage = {
            let in_flight = self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            in_flight.get(key).copied()
        };
        match stage {
            Some(Stage::Download) => return Ok(InstallState::Downloading),
            Some(Stage::Extract) => return Ok(InstallState::Extracting),
            None => {}
        }

        let installs = self.inner.installations()?;
        if installs.is_downloaded(key) {
            return Ok(InstallState::Installed {
                dir: installs.install_dir(key),
            });
        }

        let failure = {
            let failures = self.inner.failures.lock().unwrap_or_else(|e| e.into_inner());
            failures.get(key).cloned()
        };
        if let Some(reason) = failure {
            return Ok(InstallState::Failed { reason });
        }

        Ok(match installs.pending_archive(key) {
            Some(archive) => InstallState::Downloaded { archive },
            None => InstallState::NotDownloaded,
        })
    }

    /// Starts downloading and extracting `release` on a background task.
    ///
    /// Must be called from within a tokio runtime. Returns an error without
    /// starting anything when the release is already installed, already in
    /// flight, or ships an archive format fvs cannot unpack.
    pub fn download(&self, release: &Release) -> Result<Operation> {
        let key = release.install_key();
        let format = ArchiveFormat::from_archive_path(&release.archive_path).ok_or_else(|| {
            FvsError::UnsupportedArchive {
                path: PathBuf::from(&release.archive_path),
            }
        })?;

        let installs = self.inner.installations()?;
        if installs.is_downloaded(&key) {
            return Err(FvsError::AlreadyInstalled {
                version: key.to_string(),
            });
        }

        {
            let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if in_flight.contains_key(&key) {
                return Err(FvsError::OperationInProgress {
                    version: key.to_string(),
                });
            }
            in_flight.insert(key.clone(), Stage::Download);
        }
        let guard = InFlightGuard {
            inner: self.inner.clone(),
            key: key.clone(),
        };
        self.inner.clear_failure(&key);

        let url = self.inner.config.archive_url(&release.archive_path);
        let archive = installs.archive_path(&key, format);
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_install(
            guard,
            key.clone(),
            url,
            archive,
            tx,
            cancel.clone(),
        ));

        Ok(Operation {
            key,
            events: rx,
            cancel,
            task,
        })
    }

    /// Activates an installed key. Keys in any other state are rejected.
    pub async fn activate(&self, key: &InstallKey) -> Result<Outcome> {
        let dir = match self.state(key)? {
            InstallState::Installed { dir } => dir,
            _ => {
                return Err(FvsError::NotInstalled {
                    version: key.to_string(),
                })
            }
        };

        let inner = self.inner.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || inner.activator.activate(&key, &dir))
            .await
            .map_err(|e| FvsError::Activation {
                path: PathBuf::new(),
                reason: format!("activation task failed: {e}"),
            })
    }
}

fn progress_sender(tx: &mpsc::UnboundedSender<PipelineEvent>, stage: Stage) -> ProgressCallback {
    let tx = tx.clone();
    Arc::new(move |percent| {
        let _ = tx.send(PipelineEvent::Progress { stage, percent });
    })
}

async fn run_install(
    guard: InFlightGuard,
    key: InstallKey,
    url: String,
    archive: PathBuf,
    tx: mpsc::UnboundedSender<PipelineEvent>,
    cancel: CancellationToken,
) -> InstallState {
    let inner = guard.inner.clone();

    let downloaded = inner
        .downloader
        .download(
            &url,
            &archive,
            &key,
            progress_sender(&tx, Stage::Download),
            &cancel,
        )
        .await;
    let _ = tx.send(PipelineEvent::Finished {
        stage: Stage::Download,
        outcome: downloaded.clone(),
    });

    let archive = match downloaded {
        Outcome::Completed { path, .. } => path,
        Outcome::Cancelled => return InstallState::NotDownloaded,
        Outcome::Failed { reason } => return fail(&inner, &key, reason),
        Outcome::NotFound { path } => {
            return fail(&inner, &key, format!("{} not found", path.display()))
        }
    };

    inner.set_stage(&key, Stage::Extract);
    let extracted = inner
        .extractor
        .extract(
            &archive,
            &key,
            progress_sender(&tx, Stage::Extract),
            cancel.clone(),
        )
        .await;
    let _ = tx.send(PipelineEvent::Finished {
        stage: Stage::Extract,
        outcome: extracted.clone(),
    });

    match extracted {
        Outcome::Completed { path, .. } => {
            let _ = tx.send(PipelineEvent::Refresh {
                key: key.clone(),
                dir: path.clone(),
            });
            InstallState::Installed { dir: path }
        }
        Outcome::Cancelled => InstallState::Downloaded { archive },
        Outcome::Failed { reason } => fail(&inner, &key, reason),
        Outcome::NotFound { path } => fail(&inner, &key, format!("{} not found", path.display())),
    }
}

fn fail(inner: &Inner, key: &InstallKey, reason: String) -> InstallState {
    tracing::warn!("install of {key} failed: {reason}");
    inner.record_failure(key, &reason);
    InstallState::Failed { reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::activate::ActivationMode;
    use crate::core::manifest::Manifest;
    use crate::core::settings::MemorySettings;
    use crate::utils::shell::Shell;
    use std::io::Write;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use zip::write::SimpleFileOptions;

    struct Harness {
        _temp: TempDir,
        downloads: PathBuf,
        home: PathBuf,
        pipeline: InstallPipeline,
    }

    fn harness(base_url: &str) -> Harness {
        let temp = TempDir::new().unwrap();
        let downloads = temp.path().join("flutter_sdk");
        let home = temp.path().join("home");
        std::fs::create_dir_all(&home).unwrap();

        let config = Config {
            archive_base_url: base_url.to_string(),
            ..Config::default()
        };
        let settings = Arc::new(MemorySettings::with_download_dir(&downloads));
        let activator = VersionActivator::new(home.clone(), Shell::Bash, ActivationMode::Alias);
        let pipeline = InstallPipeline::new(config, settings, activator).unwrap();

        Harness {
            _temp: temp,
            downloads,
            home,
            pipeline,
        }
    }

    fn sdk_zip() -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, body) in [
            ("flutter/bin/flutter", "#!/bin/sh\necho 3.19.0\n"),
            ("flutter/bin/dart", "#!/bin/sh\n"),
            ("flutter/version", "3.19.0"),
        ] {
            zip.start_file(name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn release(archive: &str) -> Release {
        let manifest = Manifest::from_json(
            format!(
                r#"{{"releases":[{{"channel":"stable","version":"3.19.0",
                    "dart_sdk_arch":"x64","archive":"{archive}"}}]}}"#
            )
            .as_bytes(),
        )
        .unwrap();
        manifest.releases[0].clone()
    }

    async fn drain(mut operation: Operation) -> (Vec<PipelineEvent>, InstallState) {
        let mut events = Vec::new();
        while let Some(event) = operation.next_event().await {
            events.push(event);
        }
        (events, operation.wait().await)
    }

    #[tokio::test]
    async fn test_download_extracts_and_installs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stable/linux/flutter_3.19.0.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(sdk_zip()))
            .mount(&server)
            .await;

        let h = harness(&server.uri());
        let release = release("stable/linux/flutter_3.19.0.zip");
        let key = release.install_key();
        assert_eq!(h.pipeline.state(&key).unwrap(), InstallState::NotDownloaded);
        assert!(!h.pipeline.is_downloaded(&key).unwrap());

        let operation = h.pipeline.download(&release).unwrap();
        let (events, state) = drain(operation).await;

        let dir = h.downloads.join("flutter_3.19.0_x64");
        assert_eq!(state, InstallState::Installed { dir: dir.clone() });
        assert!(h.pipeline.is_downloaded(&key).unwrap());
        assert!(!h.downloads.join("flutter_3.19.0_x64.zip").exists());
        assert_eq!(
            std::fs::read_to_string(dir.join("flutter/version")).unwrap(),
            "3.19.0"
        );

        let download_done = events
            .iter()
            .position(|e| {
                matches!(e, PipelineEvent::Finished { stage: Stage::Download, outcome } if outcome.is_completed())
            })
            .unwrap();
        let first_extract = events
            .iter()
            .position(|e| matches!(e, PipelineEvent::Progress { stage: Stage::Extract, .. }))
            .unwrap();
        assert!(download_done < first_extract);
        assert_eq!(
            events.last(),
            Some(&PipelineEvent::Refresh {
                key: key.clone(),
                dir: dir.clone()
            })
        );
        assert_eq!(h.pipeline.state(&key).unwrap(), InstallState::Installed { dir });
        assert_eq!(h.pipeline.installed().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_installed_release_is_not_downloaded_again() {
        let h = harness("http://127.0.0.1:9");
        let release = release("stable/linux/flutter_3.19.0.zip");
        std::fs::create_dir_all(h.downloads.join("flutter_3.19.0_x64")).unwrap();

        let err = h.pipeline.download(&release).err().unwrap();

        assert!(matches!(err, FvsError::AlreadyInstalled { .. }));
    }

    #[tokio::test]
    async fn test_second_request_for_same_key_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(sdk_zip())
                    .set_delay(std::time::Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let h = harness(&server.uri());
        let release = release("stable/linux/flutter_3.19.0.zip");

        let first = h.pipeline.download(&release).unwrap();
        assert_eq!(
            h.pipeline.state(first.key()).unwrap(),
            InstallState::Downloading
        );
        let second = h.pipeline.download(&release);
        assert!(matches!(second, Err(FvsError::OperationInProgress { .. })));

        let (_, state) = drain(first).await;
        assert!(matches!(state, InstallState::Installed { .. }));
    }

    #[tokio::test]
    async fn test_failed_download_stops_chain() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let h = harness(&server.uri());
        let release = release("stable/linux/flutter_3.19.0.zip");
        let key = release.install_key();

        let (events, state) = drain(h.pipeline.download(&release).unwrap()).await;

        assert!(matches!(state, InstallState::Failed { .. }));
        assert!(matches!(h.pipeline.state(&key).unwrap(), InstallState::Failed { .. }));
        assert!(events
            .iter()
            .all(|e| !matches!(e, PipelineEvent::Progress { stage: Stage::Extract, .. })));
        let last = events.last().unwrap();
        assert!(last.to_string().starts_with("Download Failed:"));
        assert!(!h.downloads.join("flutter_3.19.0_x64.zip").exists());
    }

    #[tokio::test]
    async fn test_bad_archive_is_preserved() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"not a zip".to_vec()))
            .mount(&server)
            .await;

        let h = harness(&server.uri());
        let release = release("stable/linux/flutter_3.19.0.zip");
        let key = release.install_key();

        let (events, state) = drain(h.pipeline.download(&release).unwrap()).await;

        assert!(matches!(state, InstallState::Failed { .. }));
        assert!(h.downloads.join("flutter_3.19.0_x64.zip").exists());
        assert!(!h.pipeline.is_downloaded(&key).unwrap());
        assert!(events.last().unwrap().to_string().starts_with("Extraction Failed:"));
    }

    #[tokio::test]
    async fn test_activate_requires_installed() {
        let h = harness("http://127.0.0.1:9");
        let key = InstallKey::new("3.19.0", Some("x64"));

        let err = h.pipeline.activate(&key).await.unwrap_err();
        assert!(matches!(err, FvsError::NotInstalled { .. }));
        assert!(!h.home.join(".bash_aliases").exists());
    }

    #[tokio::test]
    async fn test_activate_installed_version() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(sdk_zip()))
            .mount(&server)
            .await;

        let h = harness(&server.uri());
        let release = release("stable/linux/flutter_3.19.0.zip");
        let key = release.install_key();
        drain(h.pipeline.download(&release).unwrap()).await;

        let first = h.pipeline.activate(&key).await.unwrap();
        let content_once = std::fs::read_to_string(h.home.join(".bash_aliases")).unwrap();
        let second = h.pipeline.activate(&key).await.unwrap();
        let content_twice = std::fs::read_to_string(h.home.join(".bash_aliases")).unwrap();

        assert!(first.is_completed());
        assert_eq!(first, second);
        assert_eq!(content_once, content_twice);
        assert_eq!(
            h.pipeline.activator().current_target(),
            Some(h.downloads.join("flutter_3.19.0_x64"))
        );
    }

    #[tokio::test]
    async fn test_download_dir_change_applies_to_next_operation() {
        let h = harness("http://127.0.0.1:9");
        let key = InstallKey::new("3.19.0", Some("x64"));
        let elsewhere = h.home.join("sdks");
        std::fs::create_dir_all(elsewhere.join(key.dir_name())).unwrap();

        assert!(!h.pipeline.is_downloaded(&key).unwrap());
        h.pipeline.set_download_dir(&elsewhere).unwrap();
        assert_eq!(h.pipeline.download_dir().unwrap(), elsewhere);
        assert!(h.pipeline.is_downloaded(&key).unwrap());
    }

    #[test]
    fn test_event_display() {
        let progress = PipelineEvent::Progress {
            stage: Stage::Extract,
            percent: 12.5,
        };
        assert_eq!(progress.to_string(), "Extracting... 12.50%");

        let progress = PipelineEvent::Progress {
            stage: Stage::Download,
            percent: 50.0,
        };
        assert_eq!(progress.to_string(), "Downloading... 50%");

        let done = PipelineEvent::Finished {
            stage: Stage::Download,
            outcome: Outcome::Cancelled,
        };
        assert_eq!(done.to_string(), "Download Cancelled");
    }
}

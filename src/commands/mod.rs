pub mod available;
pub mod browse;
pub mod config;
pub mod doctor;
pub mod install;
pub mod list;
pub mod use_version;

use crate::core::activate::{ActivationMode, VersionActivator};
use crate::core::config::Config;
use crate::core::manifest::{Manifest, ManifestClient, Release};
use crate::core::pipeline::{InstallPipeline, InstallState, PipelineEvent};
use crate::core::settings::{FileSettings, SettingsStore, ACTIVATION_MODE_KEY};
use crate::error::{FvsError, Result};
use std::io::Write;
use std::sync::Arc;

/// Activation mode stored in settings, `alias` when unset.
pub fn stored_activation_mode(settings: &dyn SettingsStore) -> Result<ActivationMode> {
    match settings.get(ACTIVATION_MODE_KEY)? {
        Some(mode) if !mode.trim().is_empty() => mode.parse(),
        _ => Ok(ActivationMode::default()),
    }
}

/// Builds the pipeline from the environment and the user's settings file.
pub fn open_pipeline(mode: Option<ActivationMode>) -> Result<InstallPipeline> {
    let settings = Arc::new(FileSettings::open_default()?);
    let mode = match mode {
        Some(mode) => mode,
        None => stored_activation_mode(settings.as_ref())?,
    };
    let activator = VersionActivator::from_env(mode)?;
    InstallPipeline::new(Config::from_env(), settings, activator)
}

pub async fn fetch_manifest(pipeline: &InstallPipeline) -> Result<Manifest> {
    let config = pipeline.config();
    ManifestClient::new(config)?.fetch(&config.manifest_url).await
}

/// Fetches the manifest for listing commands. A failed fetch is reported
/// as a status line and treated as an empty manifest.
pub async fn load_manifest(pipeline: &InstallPipeline) -> Manifest {
    match fetch_manifest(pipeline).await {
        Ok(manifest) => manifest,
        Err(e) => {
            tracing::warn!("{e}");
            println!("Unable to fetch releases: {e}");
            Manifest::default()
        }
    }
}

/// `dart_sdk_arch` spelling of the host architecture.
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        other => other,
    }
}

/// Picks a release by version or channel name.
///
/// A channel name resolves to the channel's current release, falling back to
/// its newest entry. Without an explicit `arch`, builds for the host
/// architecture are preferred.
pub fn resolve_release<'a>(
    manifest: &'a Manifest,
    target: &str,
    arch: Option<&str>,
) -> Result<&'a Release> {
    let channel = manifest
        .channels()
        .into_iter()
        .find(|channel| channel.as_str().eq_ignore_ascii_case(target.trim()));

    let pool: Vec<&'a Release> = manifest
        .releases
        .iter()
        .filter(|release| channel.as_ref().map_or(true, |c| &release.channel == c))
        .collect();

    let version = match &channel {
        Some(channel) => manifest
            .current(channel)
            .or_else(|| pool.first().copied())
            .map(|release| release.version.clone()),
        None => Some(target.trim().trim_start_matches('v').to_string()),
    };

    let pick = |version: &str, arch: Option<&str>| {
        pool.iter().copied().find(|release| {
            release.version == version
                && arch.map_or(true, |arch| {
                    release
                        .dart_sdk_arch
                        .as_deref()
                        .is_some_and(|a| a.eq_ignore_ascii_case(arch))
                })
        })
    };

    let found = version.as_deref().and_then(|version| match arch {
        Some(arch) => pick(version, Some(arch)),
        None => pick(version, Some(host_arch())).or_else(|| pick(version, None)),
    });

    found.ok_or_else(|| FvsError::ReleaseNotFound {
        version: target.trim().to_string(),
    })
}

/// Runs one download-and-extract operation to completion, printing its
/// events. Ctrl-C cancels the operation.
pub async fn run_download(pipeline: &InstallPipeline, release: &Release) -> Result<InstallState> {
    let mut operation = pipeline.download(release)?;
    println!("Installing Flutter {}", operation.key());

    let cancel = operation.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut progress_line = false;
    while let Some(event) = operation.next_event().await {
        match &event {
            PipelineEvent::Progress { .. } => {
                print!("\r  {event}");
                let _ = std::io::stdout().flush();
                progress_line = true;
            }
            _ => {
                if progress_line {
                    println!();
                    progress_line = false;
                }
                println!("{event}");
            }
        }
    }
    if progress_line {
        println!();
    }

    Ok(operation.wait().await)
}

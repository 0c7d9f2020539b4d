use crate::commands::{load_manifest, open_pipeline, run_download, use_version};
use crate::core::manifest::Release;
use crate::core::pipeline::{InstallPipeline, InstallState};
use crate::core::version::ReleaseStatus;
use anyhow::Result;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Select};

/// Interactive channel and release picker.
pub async fn browse() -> Result<()> {
    let pipeline = open_pipeline(None)?;
    println!("Fetching release manifest...");
    let manifest = load_manifest(&pipeline).await;

    let groups = manifest.group_by_channel();
    if groups.is_empty() {
        println!("The release manifest lists no releases.");
        return Ok(());
    }

    let theme = ColorfulTheme::default();
    let channels: Vec<_> = groups.keys().collect();
    let labels: Vec<String> = channels
        .iter()
        .map(|channel| format!("{channel} ({} releases)", groups[*channel].len()))
        .collect();

    let Some(picked) = Select::with_theme(&theme)
        .with_prompt("Channel")
        .items(&labels)
        .default(0)
        .interact_opt()?
    else {
        return Ok(());
    };
    let releases = &groups[channels[picked]];

    let installs = pipeline.installations()?;
    let labels: Vec<String> = releases
        .iter()
        .map(|release| {
            format!(
                "{:<20} {:<6} {:<26} {}",
                release.version,
                release.dart_sdk_arch.as_deref().unwrap_or("-"),
                release.local_release_date(),
                installs.status(&release.install_key()),
            )
        })
        .collect();

    let Some(picked) = Select::with_theme(&theme)
        .with_prompt("Release")
        .items(&labels)
        .default(0)
        .max_length(15)
        .interact_opt()?
    else {
        return Ok(());
    };

    act_on(&pipeline, releases[picked], &theme).await
}

async fn act_on(pipeline: &InstallPipeline, release: &Release, theme: &ColorfulTheme) -> Result<()> {
    let key = release.install_key();

    if pipeline.installations()?.status(&key) == ReleaseStatus::NotDownloaded {
        let download = Confirm::with_theme(theme)
            .with_prompt(format!("Download Flutter {key}?"))
            .default(true)
            .interact()?;
        if !download {
            return Ok(());
        }

        match run_download(pipeline, release).await? {
            InstallState::Installed { .. } => {}
            InstallState::Failed { reason } => anyhow::bail!("Installing {key} failed: {reason}"),
            _ => {
                println!("Installation did not finish.");
                return Ok(());
            }
        }
    } else {
        println!("Version already downloaded.");
    }

    let activate = Confirm::with_theme(theme)
        .with_prompt(format!("Use Flutter {key} now?"))
        .default(true)
        .interact()?;
    if activate {
        use_version::activate(pipeline, &key).await?;
    }

    Ok(())
}

use crate::commands::{load_manifest, open_pipeline};
use crate::core::manifest::{Channel, Manifest};
use crate::core::version::Installations;
use anyhow::Result;

pub async fn list_channels() -> Result<()> {
    let pipeline = open_pipeline(None)?;
    let manifest = load_manifest(&pipeline).await;

    let groups = manifest.group_by_channel();
    if groups.is_empty() {
        println!("The release manifest lists no releases.");
        return Ok(());
    }

    println!("Available channels:");
    for (channel, releases) in &groups {
        let current = manifest
            .current(channel)
            .map(|release| format!(" (current: {})", release.version))
            .unwrap_or_default();
        println!("  {channel:<8} {} releases{current}", releases.len());
    }

    println!();
    println!("Show releases: fvs releases <channel>");
    Ok(())
}

pub async fn list_releases(channel: Option<&str>) -> Result<()> {
    let pipeline = open_pipeline(None)?;
    let manifest = load_manifest(&pipeline).await;
    let installs = pipeline.installations()?;

    if manifest.releases.is_empty() {
        println!("The release manifest lists no releases.");
        return Ok(());
    }

    match channel {
        Some(name) => {
            let channel = Channel::new(name);
            if manifest.releases_in(&channel).next().is_none() {
                let known: Vec<String> = manifest.channels().iter().map(Channel::to_string).collect();
                anyhow::bail!(
                    "Unknown channel '{name}'. Available channels: {}",
                    known.join(", ")
                );
            }
            print_channel(&manifest, &channel, &installs);
        }
        None => {
            for channel in manifest.channels() {
                print_channel(&manifest, &channel, &installs);
                println!();
            }
        }
    }

    println!("Install: fvs install <version> [--arch <arch>]");
    Ok(())
}

fn print_channel(manifest: &Manifest, channel: &Channel, installs: &Installations) {
    println!("{channel}:");
    for release in manifest.releases_in(channel) {
        let arch = release.dart_sdk_arch.as_deref().unwrap_or("-");
        let current = if manifest.is_current(release) { " *" } else { "" };
        println!(
            "  {:<20} {:<6} {:<26} {}{current}",
            release.version,
            arch,
            release.local_release_date(),
            installs.status(&release.install_key()),
        );
    }
}

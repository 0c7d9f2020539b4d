use crate::commands::{fetch_manifest, open_pipeline, resolve_release, run_download};
use crate::core::pipeline::InstallState;
use crate::error::FvsError;
use anyhow::Result;

pub async fn install_version(target: &str, arch: Option<&str>) -> Result<()> {
    let pipeline = open_pipeline(None)?;

    println!("Fetching release manifest...");
    let manifest = fetch_manifest(&pipeline).await?;
    let release = resolve_release(&manifest, target, arch)?;
    let key = release.install_key();

    match run_download(&pipeline, release).await {
        Ok(InstallState::Installed { dir }) => {
            println!();
            println!("Flutter {key} is ready in {}", dir.display());
            println!("Activate it: fvs use {}", key.version);
            Ok(())
        }
        Ok(InstallState::Downloaded { archive }) => {
            println!("Extraction cancelled; the archive was kept at {}", archive.display());
            Ok(())
        }
        Ok(InstallState::NotDownloaded) => {
            println!("Download cancelled.");
            Ok(())
        }
        Ok(InstallState::Failed { reason }) => anyhow::bail!("Installing {key} failed: {reason}"),
        Ok(state) => anyhow::bail!("Installing {key} ended in an unexpected state: {state}"),
        Err(FvsError::AlreadyInstalled { .. }) => {
            println!("Version already downloaded.");
            println!("Activate it: fvs use {}", key.version);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

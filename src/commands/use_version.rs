use crate::commands::open_pipeline;
use crate::core::activate::ActivationMode;
use crate::core::outcome::Outcome;
use crate::core::pipeline::InstallPipeline;
use crate::core::version::InstallKey;
use crate::error::FvsError;
use anyhow::Result;

pub async fn use_version(
    version: &str,
    arch: Option<&str>,
    mode: Option<ActivationMode>,
) -> Result<()> {
    let pipeline = open_pipeline(mode)?;
    let key = installed_key(&pipeline, version, arch)?;
    activate(&pipeline, &key).await
}

/// Activates an installed key and reports the result.
pub async fn activate(pipeline: &InstallPipeline, key: &InstallKey) -> Result<()> {
    match pipeline.activate(key).await? {
        Outcome::Completed { path, .. } => {
            println!("Now using Flutter {key}");
            println!("Updated {} ({} mode)", path.display(), pipeline.activator().mode());
            println!();
            println!("{}", pipeline.activator().reload_hint());
            println!("Verify with: flutter --version");
            Ok(())
        }
        Outcome::NotFound { path } => Err(FvsError::ActivationNotFound { path }.into()),
        Outcome::Failed { reason } => anyhow::bail!("Activating {key} failed: {reason}"),
        Outcome::Cancelled => anyhow::bail!("Activating {key} was cancelled"),
    }
}

/// Finds the installed key for `version`, narrowed by `arch`.
///
/// Without an arch, a single matching installation is used directly.
fn installed_key(pipeline: &InstallPipeline, version: &str, arch: Option<&str>) -> Result<InstallKey> {
    let version = version.trim().trim_start_matches('v');
    let matches: Vec<InstallKey> = pipeline
        .installed()?
        .into_iter()
        .map(|installed| installed.key)
        .filter(|key| key.version == version)
        .filter(|key| match arch {
            Some(arch) => key.arch.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(arch)),
            None => true,
        })
        .collect();

    match matches.as_slice() {
        [] => Err(FvsError::NotInstalled {
            version: match arch {
                Some(arch) => format!("{version} ({arch})"),
                None => version.to_string(),
            },
        }
        .into()),
        [key] => Ok(key.clone()),
        keys => {
            let host = crate::commands::host_arch();
            if let Some(key) = keys.iter().find(|key| key.arch.as_deref() == Some(host)) {
                return Ok(key.clone());
            }
            let archs: Vec<&str> = keys.iter().filter_map(|key| key.arch.as_deref()).collect();
            anyhow::bail!(
                "Flutter {version} is installed for several architectures ({}); pick one with --arch",
                archs.join(", ")
            )
        }
    }
}

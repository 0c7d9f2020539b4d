use crate::commands::open_pipeline;
use crate::core::version::sdk_binary;
use anyhow::Result;

pub fn list_versions() -> Result<()> {
    let pipeline = open_pipeline(None)?;
    let download_dir = pipeline.download_dir()?;
    let versions = pipeline.installed()?;

    if versions.is_empty() {
        println!("No Flutter versions installed in {}.", download_dir.display());
        println!();
        println!("To install a version, run:");
        println!("  fvs install <version>");
        return Ok(());
    }

    let active = pipeline.activator().current_target();

    println!("Installed Flutter versions ({}):", download_dir.display());
    println!();

    for installed in &versions {
        let status = if active.as_deref() == Some(installed.path.as_path()) {
            "(active)"
        } else if !installed.is_valid {
            "(invalid)"
        } else {
            ""
        };

        println!("  {} {}", installed.key, status);

        if !installed.is_valid {
            println!("    Binary not found: {}", sdk_binary(&installed.path).display());
        }
    }

    println!();

    match active {
        Some(dir) if !versions.iter().any(|v| v.path == dir) => {
            println!("Active SDK is outside the download directory: {}", dir.display());
        }
        Some(_) => {}
        None => println!("No active version set. Use 'fvs use <version>' to activate a version."),
    }

    Ok(())
}

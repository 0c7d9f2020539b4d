use crate::commands::stored_activation_mode;
use crate::core::activate::ActivationMode;
use crate::core::settings::{self, FileSettings, SettingsStore, ACTIVATION_MODE_KEY};
use anyhow::{Context, Result};
use std::path::Path;

pub fn download_dir(path: Option<&Path>) -> Result<()> {
    let store = FileSettings::open_default()?;

    match path {
        Some(path) => {
            let dir = absolute(path)?;
            settings::set_download_dir(&store, &dir)?;
            println!("Download directory set to {}", dir.display());
            println!("Versions already in the previous directory are not moved.");
        }
        None => {
            let dir = settings::download_dir(&store)?;
            println!("{}", dir.display());
        }
    }

    Ok(())
}

pub fn activation_mode(mode: Option<ActivationMode>) -> Result<()> {
    let store = FileSettings::open_default()?;

    match mode {
        Some(mode) => {
            store.set(ACTIVATION_MODE_KEY, &mode.to_string())?;
            println!("Activation mode set to {mode}");
            println!("Run 'fvs use <version>' again to rewrite your shell configuration.");
        }
        None => println!("{}", stored_activation_mode(&store)?),
    }

    Ok(())
}

pub fn show() -> Result<()> {
    let store = FileSettings::open_default()?;
    println!("Settings file:   {}", store.path().display());
    println!("Download dir:    {}", settings::download_dir(&store)?.display());
    println!("Activation mode: {}", stored_activation_mode(&store)?);
    Ok(())
}

fn absolute(path: &Path) -> Result<std::path::PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    Ok(cwd.join(path))
}

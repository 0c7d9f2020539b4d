use crate::commands::open_pipeline;
use crate::core::activate::ActivationMode;
use crate::core::version::{sdk_binary, sdk_bin_dir};
use crate::utils::fs;
use anyhow::Result;
use std::process::Command;

pub fn check_environment() -> Result<()> {
    println!("Flutter Version Switcher - Environment Check");
    println!();

    let pipeline = open_pipeline(None)?;
    let activator = pipeline.activator();
    let mut issues_found = 0;

    println!("Download directory:");
    let download_dir = pipeline.download_dir()?;
    println!("  {}", download_dir.display());
    if download_dir.is_dir() {
        println!("    exists");
    } else {
        println!("    missing (created on first install)");
    }
    println!();

    println!("Installed versions:");
    let versions = pipeline.installed()?;
    if versions.is_empty() {
        println!("  none");
    }
    for installed in &versions {
        let binary = sdk_binary(&installed.path);
        let state = if !installed.is_valid {
            issues_found += 1;
            "flutter binary missing"
        } else if !fs::is_executable(&binary) {
            issues_found += 1;
            "flutter binary not executable"
        } else {
            "ok"
        };
        println!("  {} {}", installed.key, state);
    }
    println!();

    println!("Shell configuration ({} mode):", activator.mode());
    let target = activator.current_target();
    match &target {
        Some(dir) => {
            println!("  points at {}", dir.display());
            if !sdk_binary(dir).is_file() {
                println!("    the SDK at this path no longer exists");
                issues_found += 1;
            }
        }
        None => println!("  no version activated"),
    }
    if activator.mode() == ActivationMode::Alias {
        let rc = std::fs::read_to_string(activator.rc_file()).unwrap_or_default();
        if !rc.contains(". ~/.bash_aliases") {
            println!("  {} does not source ~/.bash_aliases", activator.shell().rc_display());
            issues_found += 1;
        }
    }
    println!();

    println!("PATH lookup:");
    match which::which("flutter") {
        Ok(found) => {
            println!("  flutter on PATH: {}", found.display());
            if let Some(dir) = &target {
                if activator.mode() == ActivationMode::Path && !found.starts_with(sdk_bin_dir(dir)) {
                    println!("    differs from the activated SDK; open a new shell");
                    issues_found += 1;
                }
            }
            match Command::new(&found).arg("--version").output() {
                Ok(output) if output.status.success() => {
                    let text = String::from_utf8_lossy(&output.stdout);
                    if let Some(line) = text.lines().next() {
                        println!("  {}", line.trim());
                    }
                }
                _ => println!("  'flutter --version' failed"),
            }
        }
        Err(_) => {
            if activator.mode() == ActivationMode::Alias && target.is_some() {
                println!("  flutter is provided by an alias, not PATH");
            } else {
                println!("  flutter not found on PATH");
            }
        }
    }
    println!();

    if issues_found == 0 {
        println!("Environment looks good. No issues found.");
    } else {
        println!("Found {issues_found} issue(s) that need attention.");
        println!();
        println!("To fix issues:");
        println!("  - Run 'fvs install <version>' to reinstall a broken version");
        println!("  - Run 'fvs use <version>' to rewrite your shell configuration");
    }

    Ok(())
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use fvs::commands;
use fvs::core::activate::ActivationMode;

#[derive(Parser)]
#[clap(name = "fvs")]
#[clap(about = "Flutter SDK version switcher")]
#[clap(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Print diagnostic logs to stderr
    #[clap(short, long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List release channels from the Flutter release manifest
    Channels,
    /// List releases, optionally for one channel
    Releases {
        /// Channel name (e.g., stable, beta)
        channel: Option<String>,
    },
    /// Download and unpack a Flutter SDK
    Install {
        /// Version (e.g., 3.19.0) or channel name for its current release
        version: String,
        /// Architecture (e.g., x64, arm64); defaults to the host
        #[clap(long)]
        arch: Option<String>,
    },
    /// Point your shell at an installed version
    Use {
        /// Installed version to activate
        version: String,
        /// Architecture when several are installed
        #[clap(long)]
        arch: Option<String>,
        /// Activation mode for this run: alias or path
        #[clap(long)]
        mode: Option<ActivationMode>,
    },
    /// List installed versions
    List,
    /// Interactively pick a channel and release to install or use
    Browse,
    /// Show or change settings
    Config {
        #[clap(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Check the download directory, installs and shell setup
    Doctor,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show or set the directory SDKs are downloaded into
    DownloadDir {
        /// New download directory
        path: Option<PathBuf>,
    },
    /// Show or set how `fvs use` edits your shell: alias or path
    ActivationMode {
        mode: Option<ActivationMode>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "fvs=debug" } else { "fvs=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Channels => commands::available::list_channels().await,
        Commands::Releases { channel } => {
            commands::available::list_releases(channel.as_deref()).await
        }
        Commands::Install { version, arch } => {
            commands::install::install_version(&version, arch.as_deref()).await
        }
        Commands::Use {
            version,
            arch,
            mode,
        } => commands::use_version::use_version(&version, arch.as_deref(), mode).await,
        Commands::List => commands::list::list_versions(),
        Commands::Browse => commands::browse::browse().await,
        Commands::Config { command } => match command {
            Some(ConfigCommands::DownloadDir { path }) => {
                commands::config::download_dir(path.as_deref())
            }
            Some(ConfigCommands::ActivationMode { mode }) => {
                commands::config::activation_mode(mode)
            }
            None => commands::config::show(),
        },
        Commands::Doctor => commands::doctor::check_environment(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    Ok(())
}

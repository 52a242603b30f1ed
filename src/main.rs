//! Karaoke player daemon: drives VLC/mpv under remote control from a Dakara
//! server.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::error;

mod background;
mod bus;
mod config;
mod controller;
mod error;
mod fonts;
mod manager;
mod media;
mod playlist;
mod reporter;
mod resources;
mod session;
mod supervisor;
mod text_generator;

use config::Config;

/// Karaoke player daemon.
#[derive(Parser)]
#[command(about, version)]
struct Args {
    /// Path to the YAML configuration file.
    #[clap(long, short, default_value = "config.yaml")]
    config: PathBuf,

    /// Writes a commented example configuration to the given path and exits.
    #[clap(long)]
    create_config: Option<PathBuf>,

    /// Overrides `loglevel` from the configuration file.
    #[clap(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    color_eyre::install().ok();

    let args = Args::parse();

    if let Some(path) = args.create_config {
        return match Config::write_default(&path).await {
            Ok(()) => {
                println!("wrote default configuration to {}", path.display());
                ExitCode::SUCCESS
            }
            Err(error) => {
                eprintln!("couldn't write default configuration: {error}");
                ExitCode::FAILURE
            }
        };
    }

    let config = match Config::load(&args.config).await {
        Ok(config) => config,
        Err(error) => {
            // The logger isn't initialized yet if the config (which carries
            // `loglevel`) failed to load; fall back to stderr.
            eprintln!("configuration error: {error}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(config.loglevel, args.debug);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error}");
            ExitCode::FAILURE
        }
    }
}

/// Thin wrapper so every fatal path funnels through the crate-wide
/// [`error::Error`] rather than `main` matching `SupervisorError` directly.
async fn run(config: Config) -> error::Result<()> {
    supervisor::run(config).await?;
    Ok(())
}

fn init_logging(configured: config::LogLevel, debug_flag: bool) {
    let level = if debug_flag {
        log::LevelFilter::Debug
    } else {
        configured.as_filter()
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

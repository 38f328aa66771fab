//! hrplay: command-line high-resolution audio player.
//!
//! Queues WAV/FLAC/MP3/DSF/DFF/MKV files, streams them bit-perfect to an
//! ALSA device (DoP or native DSD for 1-bit material) and reacts to the
//! keyboard: pause, seek, volume, next/previous, quit.

mod cli;
mod driver;

use anyhow::{Context, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = hrpconfig::Settings::load(cli.config.as_deref())
        .context("could not load configuration")?;
    cli.apply_to(&mut settings);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let paths = driver::collect_paths(&cli, &settings)?;
    if paths.is_empty() {
        bail!("no files to play");
    }

    driver::run(&cli, settings, paths)
}

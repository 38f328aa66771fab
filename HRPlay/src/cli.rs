//! Command line surface.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use hrpplaylist::QueueMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Once,
    Repeat,
    Shuffle,
}

impl From<Mode> for QueueMode {
    fn from(mode: Mode) -> QueueMode {
        match mode {
            Mode::Once => QueueMode::Once,
            Mode::Repeat => QueueMode::Repeat,
            Mode::Shuffle => QueueMode::Shuffle,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "hrplay", version, about = "High-resolution music player")]
pub struct Cli {
    /// Configuration file path.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Output device (e.g. "hw:1").
    #[arg(short = 'D', long)]
    pub device: Option<String>,

    /// Playlist file to load.
    #[arg(short = 'p', long)]
    pub playlist: Option<PathBuf>,

    /// Recurse into directories given on the command line.
    #[arg(short = 'R', long)]
    pub recursive: bool,

    /// Playback mode.
    #[arg(short = 'M', long, value_enum, default_value_t = Mode::Once)]
    pub mode: Mode,

    /// Print file metadata before playback.
    #[arg(short = 'm', long)]
    pub metadata: bool,

    /// Force DoP framing for DSD files.
    #[arg(long)]
    pub dop: bool,

    /// Suppress progress output.
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Accept 705.6/768 kHz sample rates.
    #[arg(long)]
    pub experimental: bool,

    /// Extra diagnostics.
    #[arg(long)]
    pub developer: bool,

    /// Files and directories to queue.
    pub files: Vec<PathBuf>,
}

impl Cli {
    /// Fold command-line switches over the loaded settings.
    pub fn apply_to(&self, settings: &mut hrpconfig::Settings) {
        if let Some(device) = &self.device {
            settings.device = Some(device.clone());
        }
        settings.dop |= self.dop;
        settings.quiet |= self.quiet;
        settings.metadata |= self.metadata;
        settings.experimental |= self.experimental;
        settings.developer |= self.developer;
    }
}

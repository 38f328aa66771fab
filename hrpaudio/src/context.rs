//! Mutable player state, passed explicitly to every component that needs it.

use crate::device::ActiveDevice;

/// Behavior switches for a playback run.
#[derive(Debug, Clone)]
pub struct PlaybackOptions {
    /// Force DoP framing for DSD files.
    pub dop: bool,
    /// Accept 705.6/768 kHz rates.
    pub experimental: bool,
    /// Extra diagnostics (keyboard codes, volume readouts).
    pub developer: bool,
    /// Suppress progress output.
    pub quiet: bool,
    /// Print tag metadata before each file.
    pub metadata: bool,
    /// Progress line template.
    pub output_template: String,
    /// Upper bound for per-file read-ahead buffers, 0 disables them.
    pub cache_size: usize,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        PlaybackOptions {
            dop: false,
            experimental: false,
            developer: false,
            quiet: false,
            metadata: false,
            output_template: DEFAULT_OUTPUT_FORMAT.to_string(),
            cache_size: 0,
        }
    }
}

pub const DEFAULT_OUTPUT_FORMAT: &str = "[%n/%N] %d: %f [%i] (%t/%T) (%p)";

/// Everything the playback controller and keyboard dispatcher mutate.
#[derive(Debug)]
pub struct PlayerContext {
    pub options: PlaybackOptions,
    pub device: ActiveDevice,
    /// True once the terminal is in raw non-blocking mode; until then the
    /// controller never touches stdin.
    pub keyboard_active: bool,
}

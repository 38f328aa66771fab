//! # hrpplaylist
//!
//! Playlist file loading and the ordered playback queue.
//!
//! A playlist is a plain text file: one entry per line, `#` comments,
//! relative paths resolved against the playlist's own directory, `*` and
//! `**/*` directory expansions, and recursive globs (`**/<pattern>`).

pub mod loader;
pub mod queue;

pub use loader::load_playlist;
pub use queue::{PlaybackQueue, QueueMode};

#[derive(Debug, thiserror::Error)]
pub enum PlaylistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("playlist not found: '{0}'")]
    NotFound(String),
}

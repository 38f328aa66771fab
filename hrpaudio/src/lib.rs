//! # hrpaudio
//!
//! The playback engine: everything between a probed file and the sound
//! card.
//!
//! - [`ringbuffer`]: resizable byte ring used for file read-ahead
//! - [`reader`]: file reader layered over the ring
//! - [`device`]: capability probing, activation and mixer volume
//! - [`sink`]: wire-format selection and the ALSA PCM sink
//! - [`pcm`]: block conversion into the sink's container layout
//! - [`dsd`]: DoP and native DSD frame synthesis, end-of-stream shaping
//! - [`keyboard`]: raw non-blocking terminal input
//! - [`progress`]: progress line templating
//! - [`playback`]: the per-file controller tying it all together

pub mod context;
pub mod device;
pub mod dsd;
pub mod error;
pub mod keyboard;
pub mod pcm;
pub mod playback;
pub mod progress;
pub mod reader;
pub mod ringbuffer;
pub mod sink;

pub use context::{PlaybackOptions, PlayerContext, DEFAULT_OUTPUT_FORMAT};
pub use device::{device_supports, ActiveDevice, Capabilities};
pub use error::AudioError;
pub use keyboard::{KeyCode, Keyboard};
pub use playback::{play, Advance, Playback};
pub use ringbuffer::{RingBuffer, RINGBUFFER_MAX_BYTES, RINGBUFFER_MIN_BYTES};
pub use sink::{choose_wire_format, normalize_pcm_rate, AlsaSink, DsdMode, PcmSink, WireChoice};

//! # hrpmkv
//!
//! Matroska/WebM audio demuxer.
//!
//! The demuxer walks the EBML structure of a `.mkv`/`.webm` file, selects the
//! first audio track, and yields decoded audio packets with presentation
//! timestamps:
//!
//! - Opus and AAC blocks are decoded to 16-bit interleaved PCM on the fly
//!   (libopus via the `opus` crate, libfdk-aac via `fdk-aac`),
//! - PCM tracks pass through unchanged,
//! - other recognized codec ids are surfaced with their track geometry so the
//!   caller can decide what to do with the raw packets.
//!
//! Only "no lacing" and Xiph lacing are decoded; fixed and EBML lacing are
//! skipped. Seeking is by contract reopen-and-discard: the caller reopens the
//! demuxer and drops packets below the target timestamp.

pub mod aac;
pub mod demux;
pub mod ebml;
pub mod error;
pub mod opus_glue;

pub use demux::{MkvAudioInfo, MkvCodec, MkvDemuxer, MkvPacket};
pub use error::MkvError;

//! # hrpcodec
//!
//! Synchronous PCM decoders for the file kinds the player feeds through its
//! generic decode path: FLAC (claxon), MP3 (minimp3) and WAV (native RIFF
//! reader).
//!
//! All decoders implement [`PcmDecoder`] and produce interleaved, 32-bit
//! left-justified samples: a 16-bit source sample occupies the top 16 bits of
//! the `i32`, a 24-bit sample the top 24 bits. This matches what the playback
//! conversion stage expects when it extracts the wire container bytes.
//!
//! Decoders read from any `Read + Seek` source, so the caller is free to put
//! a read-ahead buffer between the file and the decoder.

pub mod error;
pub mod flac;
pub mod mp3;
pub mod wav;

pub use error::CodecError;
pub use flac::FlacDecoder;
pub use mp3::Mp3Decoder;
pub use wav::{read_wav_info, WavDecoder, WavInfo};

use std::io::{Read, Seek};

/// The decoder family to instantiate for a given file kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Flac,
    Mp3,
    Wav,
}

/// Properties of a decoded stream, reported after the header has been parsed.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u8,
    /// Bits per sample of the source material (16, 24 or 32).
    pub bits_per_sample: u8,
    /// Total frames per channel, when the container knows it.
    pub total_frames: Option<u64>,
}

/// A pull-based PCM decoder.
///
/// `read_frames` fills `out` with interleaved left-justified `i32` samples
/// and returns the number of frames written; `0` means end of stream.
pub trait PcmDecoder {
    fn info(&self) -> &StreamInfo;

    /// Decode up to `out.len() / channels` frames into `out`.
    fn read_frames(&mut self, out: &mut [i32]) -> Result<usize, CodecError>;

    /// Reposition the stream to an absolute frame.
    ///
    /// WAV seeks directly. FLAC and MP3 can only skip forward by decoding;
    /// a backward seek yields [`CodecError::SeekUnsupported`] and the caller
    /// is expected to recreate the decoder and seek again from the start.
    fn seek_to(&mut self, frame: u64) -> Result<(), CodecError>;
}

/// Open the decoder matching `kind` over `reader`.
pub fn open_decoder<R>(kind: CodecKind, reader: R) -> Result<Box<dyn PcmDecoder>, CodecError>
where
    R: Read + Seek + 'static,
{
    let dec: Box<dyn PcmDecoder> = match kind {
        CodecKind::Flac => Box::new(FlacDecoder::new(reader)?),
        CodecKind::Mp3 => Box::new(Mp3Decoder::new(reader)?),
        CodecKind::Wav => Box::new(WavDecoder::new(reader)?),
    };

    let info = dec.info();
    tracing::debug!(
        ?kind,
        sample_rate = info.sample_rate,
        channels = info.channels,
        bits = info.bits_per_sample,
        "decoder opened"
    );
    Ok(dec)
}

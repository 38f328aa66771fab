//! Opus decode glue for Matroska blocks.
//!
//! The `OpusHead` codec-private blob carries channel count, pre-skip and
//! output gain. Matroska Opus always decodes at 48 kHz; the pre-skip samples
//! are dropped from the first decoded packets until the count is exhausted.

use opus::{Channels, Decoder as OpusDecoder};

use crate::MkvError;

/// Maximum number of samples per Opus frame at 48 kHz (120 ms).
const MAX_FRAME_SAMPLES: usize = 5760;

pub const OPUS_OUTPUT_HZ: u32 = 48_000;

/// Parsed OpusHead metadata.
struct OpusHead {
    channels: u8,
    pre_skip: u16,
    output_gain: i16,
    mapping_family: u8,
}

impl OpusHead {
    fn parse(data: &[u8]) -> Result<Self, MkvError> {
        if data.len() < 19 {
            return Err(MkvError::Malformed("OpusHead blob too short".into()));
        }
        if &data[0..8] != b"OpusHead" {
            return Err(MkvError::Malformed("invalid OpusHead signature".into()));
        }

        let channels = data[9];
        if channels == 0 {
            return Err(MkvError::Malformed("Opus channel count must be > 0".into()));
        }
        let pre_skip = u16::from_le_bytes([data[10], data[11]]);
        let _input_sample_rate = u32::from_le_bytes([data[12], data[13], data[14], data[15]]);
        let output_gain = i16::from_le_bytes([data[16], data[17]]);
        let mapping_family = data[18];

        Ok(OpusHead {
            channels,
            pre_skip,
            output_gain,
            mapping_family,
        })
    }
}

pub struct OpusGlue {
    decoder: OpusDecoder,
    channels: usize,
    pre_skip_remaining: usize,
    decode_buf: Vec<i16>,
}

impl OpusGlue {
    /// Build the decoder from the track's codec-private `OpusHead`.
    ///
    /// Only mapping family 0 (mono/stereo, single stream) is handled; the
    /// playback pipeline is stereo-only, so multistream surround layouts are
    /// rejected up front.
    pub fn from_codec_private(cp: &[u8]) -> Result<Self, MkvError> {
        let head = OpusHead::parse(cp)?;

        if head.mapping_family != 0 {
            return Err(MkvError::Unsupported(format!(
                "Opus mapping family {} (multistream)",
                head.mapping_family
            )));
        }

        let channels_enum = match head.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            other => {
                return Err(MkvError::Unsupported(format!(
                    "Opus channel count {other}"
                )))
            }
        };

        let mut decoder = OpusDecoder::new(OPUS_OUTPUT_HZ, channels_enum)?;
        if head.output_gain != 0 {
            decoder.set_gain(i32::from(head.output_gain))?;
        }

        Ok(OpusGlue {
            decoder,
            channels: head.channels as usize,
            pre_skip_remaining: head.pre_skip as usize,
            decode_buf: vec![0i16; MAX_FRAME_SAMPLES * head.channels as usize],
        })
    }

    pub fn channels(&self) -> u8 {
        self.channels as u8
    }

    /// Decode one Opus packet into 16-bit little-endian interleaved PCM.
    ///
    /// Returns `None` while the decoded samples are still fully consumed by
    /// the pre-skip window.
    pub fn decode_packet(&mut self, pkt: &[u8]) -> Result<Option<Vec<u8>>, MkvError> {
        if pkt.is_empty() {
            return Ok(None);
        }

        let decoded = self.decoder.decode(pkt, &mut self.decode_buf, false)?;
        if decoded == 0 {
            return Ok(None);
        }

        let mut samples = decoded;
        let mut drop = 0;
        if self.pre_skip_remaining > 0 {
            drop = samples.min(self.pre_skip_remaining);
            self.pre_skip_remaining -= drop;
            samples -= drop;
        }
        if samples == 0 {
            return Ok(None);
        }

        let start = drop * self.channels;
        let end = decoded * self.channels;
        let mut bytes = Vec::with_capacity((end - start) * 2);
        for sample in &self.decode_buf[start..end] {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        Ok(Some(bytes))
    }
}

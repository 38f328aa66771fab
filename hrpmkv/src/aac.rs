//! AAC decode glue for Matroska blocks (libfdk-aac).
//!
//! When the track carries a codec-private `AudioSpecificConfig` the decoder
//! is configured for raw access units up front; without one, packets are
//! assumed to be self-describing (ADTS) and the decoder configures itself
//! from the first frame.

use fdk_aac::dec::{Decoder as FdkDecoder, Transport};

use crate::MkvError;

/// fdk-aac never produces more than 2048 samples per channel per frame.
const MAX_FRAME_SAMPLES: usize = 2048;
const MAX_CHANNELS: usize = 8;

pub const AAC_OUTPUT_BITS: u8 = 16;

pub struct AacGlue {
    dec: FdkDecoder,
    /// Valid after the first successfully decoded frame (or config).
    sample_rate: u32,
    channels: u8,
    pcm: Vec<i16>,
}

impl AacGlue {
    /// Configure from the track's `AudioSpecificConfig` blob.
    pub fn from_codec_private(cp: &[u8]) -> Result<Self, MkvError> {
        let mut dec = FdkDecoder::new(Transport::Raw);
        dec.config_raw(cp)
            .map_err(|e| MkvError::Unsupported(format!("AAC AudioSpecificConfig: {e:?}")))?;
        Ok(AacGlue {
            dec,
            sample_rate: 0,
            channels: 0,
            pcm: vec![0i16; MAX_FRAME_SAMPLES * MAX_CHANNELS],
        })
    }

    /// Defer configuration to the first packet (ADTS framing).
    pub fn from_first_packet() -> Self {
        AacGlue {
            dec: FdkDecoder::new(Transport::Adts),
            sample_rate: 0,
            channels: 0,
            pcm: vec![0i16; MAX_FRAME_SAMPLES * MAX_CHANNELS],
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Decode one access unit into 16-bit little-endian interleaved PCM.
    ///
    /// Frames the decoder cannot produce output for (needs more bits, or a
    /// transient stream error) yield `None` rather than an error, matching
    /// how the player treats sporadic bad AAC frames: skip and keep going.
    pub fn decode_packet(&mut self, pkt: &[u8]) -> Result<Option<Vec<u8>>, MkvError> {
        if pkt.is_empty() {
            return Ok(None);
        }

        if let Err(e) = self.dec.fill(pkt) {
            return Err(MkvError::Decode(format!("AAC bitstream fill: {e:?}")));
        }

        match self.dec.decode_frame(&mut self.pcm) {
            Ok(()) => {}
            Err(err) => {
                // Covers both "needs more bits" and transient stream errors.
                tracing::debug!("AAC frame skipped: {err:?}");
                return Ok(None);
            }
        }

        let info = self.dec.stream_info();
        let channels = info.numChannels.max(0) as usize;
        let frame_size = info.frameSize.max(0) as usize;
        if channels == 0 || frame_size == 0 {
            return Ok(None);
        }
        self.sample_rate = info.sampleRate.max(0) as u32;
        self.channels = channels as u8;

        let samples = (frame_size * channels).min(self.pcm.len());
        let mut bytes = Vec::with_capacity(samples * 2);
        for sample in &self.pcm[..samples] {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        Ok(Some(bytes))
    }
}

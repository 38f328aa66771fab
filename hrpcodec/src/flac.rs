//! FLAC decoding on top of claxon.
//!
//! claxon hands back whole FLAC blocks; the decoder keeps the tail of the
//! last block around so callers can pull arbitrary frame counts.

use std::io::{Read, Seek};

use crate::{CodecError, PcmDecoder, StreamInfo};

pub struct FlacDecoder<R: Read> {
    reader: claxon::FlacReader<R>,
    info: StreamInfo,
    /// Left shift turning a right-justified sample into a left-justified one.
    shift: u32,
    /// Interleaved samples of the current block not yet handed out.
    pending: Vec<i32>,
    pending_pos: usize,
    /// claxon's reusable block buffer.
    scratch: Vec<i32>,
    position: u64,
}

impl<R: Read> FlacDecoder<R> {
    pub fn new(reader: R) -> Result<Self, CodecError> {
        let reader = claxon::FlacReader::new(reader)?;
        let si = reader.streaminfo();

        if si.channels == 0 {
            return Err(CodecError::Unsupported("FLAC with zero channels".into()));
        }
        if si.bits_per_sample > 32 {
            return Err(CodecError::Unsupported(format!(
                "FLAC bit depth {} is not supported",
                si.bits_per_sample
            )));
        }

        let info = StreamInfo {
            sample_rate: si.sample_rate,
            channels: si.channels as u8,
            bits_per_sample: si.bits_per_sample as u8,
            total_frames: si.samples,
        };

        Ok(FlacDecoder {
            reader,
            shift: 32 - si.bits_per_sample,
            info,
            pending: Vec::new(),
            pending_pos: 0,
            scratch: Vec::new(),
            position: 0,
        })
    }

    /// Decode the next block into `pending`. Returns false at end of stream.
    fn refill(&mut self) -> Result<bool, CodecError> {
        let buffer = std::mem::take(&mut self.scratch);
        let mut blocks = self.reader.blocks();
        match blocks.read_next_or_eof(buffer) {
            Ok(Some(block)) => {
                let frames = block.duration() as usize;
                let channels = block.channels() as usize;

                self.pending.clear();
                self.pending.reserve(frames * channels);
                for frame in 0..frames {
                    for ch in 0..channels {
                        let sample = block.sample(ch as u32, frame as u32);
                        self.pending.push(sample << self.shift);
                    }
                }
                self.pending_pos = 0;
                self.scratch = block.into_buffer();
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(err) => Err(CodecError::Decode(err.to_string())),
        }
    }
}

impl<R: Read> PcmDecoder for FlacDecoder<R> {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn read_frames(&mut self, out: &mut [i32]) -> Result<usize, CodecError> {
        let channels = self.info.channels as usize;
        let want = (out.len() / channels) * channels;
        let mut filled = 0;

        while filled < want {
            if self.pending_pos >= self.pending.len() {
                if !self.refill()? {
                    break;
                }
                if self.pending.is_empty() {
                    continue;
                }
            }

            let available = self.pending.len() - self.pending_pos;
            let take = (want - filled).min(available);
            out[filled..filled + take]
                .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + take]);
            self.pending_pos += take;
            filled += take;
        }

        let frames = filled / channels;
        self.position += frames as u64;
        Ok(frames)
    }

    fn seek_to(&mut self, frame: u64) -> Result<(), CodecError> {
        if frame < self.position {
            return Err(CodecError::SeekUnsupported);
        }

        let channels = self.info.channels as usize;
        let mut scratch = vec![0i32; 4096 * channels];
        while self.position < frame {
            let remaining = (frame - self.position) as usize;
            let chunk = remaining.min(4096) * channels;
            let got = self.read_frames(&mut scratch[..chunk])?;
            if got == 0 {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A minimal FLAC stream is non-trivial to synthesize by hand; the trait
    // level behavior is covered through the WAV decoder tests and the
    // playback integration tests. Here we only check the error mapping.
    #[test]
    fn garbage_is_rejected() {
        let data: &[u8] = b"definitely not a flac stream";
        let res = FlacDecoder::new(std::io::Cursor::new(data));
        assert!(res.is_err());
    }
}

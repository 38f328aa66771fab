//! MP3 decoding on top of minimp3.

use std::io::Read;

use minimp3::{Decoder as MiniMp3Decoder, Error as MiniMp3Error};

use crate::{CodecError, PcmDecoder, StreamInfo};

pub struct Mp3Decoder<R: Read> {
    decoder: MiniMp3Decoder<R>,
    info: StreamInfo,
    pending: Vec<i32>,
    pending_pos: usize,
    position: u64,
}

impl<R: Read> Mp3Decoder<R> {
    /// Open an MP3 stream. The first frame is decoded eagerly so the stream
    /// properties are known up front; its samples are served on the first
    /// `read_frames` call.
    pub fn new(reader: R) -> Result<Self, CodecError> {
        let mut decoder = MiniMp3Decoder::new(reader);

        let frame = loop {
            match decoder.next_frame() {
                Ok(frame) if frame.channels > 0 => break frame,
                Ok(_) => {
                    return Err(CodecError::Decode(
                        "MP3 frame reported zero channels".into(),
                    ))
                }
                Err(MiniMp3Error::Eof) => {
                    return Err(CodecError::Decode(
                        "stream contained no decodable MP3 frames".into(),
                    ))
                }
                Err(MiniMp3Error::InsufficientData) | Err(MiniMp3Error::SkippedData) => continue,
                Err(MiniMp3Error::Io(err)) => return Err(CodecError::Io(err)),
            }
        };

        let info = StreamInfo {
            sample_rate: frame.sample_rate as u32,
            channels: frame.channels as u8,
            bits_per_sample: 16,
            total_frames: None,
        };

        let pending = frame.data.iter().map(|&s| (s as i32) << 16).collect();

        Ok(Mp3Decoder {
            decoder,
            info,
            pending,
            pending_pos: 0,
            position: 0,
        })
    }

    fn refill(&mut self) -> Result<bool, CodecError> {
        loop {
            match self.decoder.next_frame() {
                Ok(frame) => {
                    self.pending.clear();
                    self.pending
                        .extend(frame.data.iter().map(|&s| (s as i32) << 16));
                    self.pending_pos = 0;
                    return Ok(true);
                }
                Err(MiniMp3Error::Eof) => return Ok(false),
                Err(MiniMp3Error::InsufficientData) | Err(MiniMp3Error::SkippedData) => continue,
                Err(MiniMp3Error::Io(err)) => return Err(CodecError::Io(err)),
            }
        }
    }
}

impl<R: Read> PcmDecoder for Mp3Decoder<R> {
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
        let mut scratch = vec![0i32; 1152 * channels];
        while self.position < frame {
            let remaining = (frame - self.position) as usize;
            let chunk = remaining.min(1152) * channels;
            let got = self.read_frames(&mut scratch[..chunk])?;
            if got == 0 {
                break;
            }
        }
        Ok(())
    }
}

//! Native RIFF/WAVE reader.
//!
//! The header walk accepts any chunk ordering, keeps only `fmt ` and `data`,
//! and validates the format tag: PCM (1) with 16/24/32 bits, or IEEE float
//! (3) with 32 bits. Decoded output follows the crate-wide left-justified
//! `i32` convention.

use std::io::{Read, Seek, SeekFrom};

use crate::{CodecError, PcmDecoder, StreamInfo};

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Parsed `fmt `/`data` geometry of a WAV file.
#[derive(Debug, Clone)]
pub struct WavInfo {
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub block_align: u16,
    /// Absolute byte offset of the first audio byte.
    pub data_offset: u64,
    /// Length of the `data` chunk payload in bytes.
    pub data_len: u64,
}

impl WavInfo {
    pub fn total_frames(&self) -> u64 {
        if self.block_align == 0 {
            0
        } else {
            self.data_len / self.block_align as u64
        }
    }
}

fn read_u16<R: Read>(r: &mut R) -> Result<u16, CodecError> {
    let mut b = [0u8; 2];
    r.read_exact(&mut b)?;
    Ok(u16::from_le_bytes(b))
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, CodecError> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

/// Walk the RIFF structure and return the format and data-chunk geometry.
pub fn read_wav_info<R: Read + Seek>(reader: &mut R) -> Result<WavInfo, CodecError> {
    let mut four = [0u8; 4];
    reader.read_exact(&mut four)?;
    if &four != b"RIFF" {
        return Err(CodecError::Decode("missing RIFF header".into()));
    }
    let _riff_size = read_u32(reader)?;
    reader.read_exact(&mut four)?;
    if &four != b"WAVE" {
        return Err(CodecError::Decode("RIFF file type is not WAVE".into()));
    }

    let mut fmt: Option<(u16, u16, u32, u16, u16)> = None;
    let mut data: Option<(u64, u64)> = None;

    while data.is_none() || fmt.is_none() {
        if reader.read_exact(&mut four).is_err() {
            break;
        }
        let size = read_u32(reader)? as u64;

        match &four {
            b"fmt " => {
                let audio_format = read_u16(reader)?;
                let channels = read_u16(reader)?;
                let sample_rate = read_u32(reader)?;
                let _byte_rate = read_u32(reader)?;
                let block_align = read_u16(reader)?;
                let bits_per_sample = read_u16(reader)?;
                // Extended fmt chunks (extensible and friends) carry extra
                // bytes past the 16 mandatory ones.
                if size > 16 {
                    reader.seek(SeekFrom::Current((size - 16) as i64))?;
                }
                fmt = Some((
                    audio_format,
                    channels,
                    sample_rate,
                    block_align,
                    bits_per_sample,
                ));
            }
            b"data" => {
                let offset = reader.stream_position()?;
                data = Some((offset, size));
                // Keep walking only if fmt is still missing.
                if fmt.is_none() {
                    reader.seek(SeekFrom::Current(size as i64))?;
                }
            }
            _ => {
                // Chunks are word aligned.
                let skip = size + (size & 1);
                reader.seek(SeekFrom::Current(skip as i64))?;
            }
        }
    }

    let (audio_format, channels, sample_rate, block_align, bits_per_sample) =
        fmt.ok_or_else(|| CodecError::Decode("WAV is missing the fmt chunk".into()))?;
    let (data_offset, data_len) =
        data.ok_or_else(|| CodecError::Decode("WAV is missing the data chunk".into()))?;

    let effective = if audio_format == WAVE_FORMAT_EXTENSIBLE {
        // Good enough for the formats we accept; the sub-format GUID starts
        // with the plain format tag.
        WAVE_FORMAT_PCM
    } else {
        audio_format
    };

    match (effective, bits_per_sample) {
        (WAVE_FORMAT_PCM, 16) | (WAVE_FORMAT_PCM, 24) | (WAVE_FORMAT_PCM, 32) => {}
        (WAVE_FORMAT_IEEE_FLOAT, 32) => {}
        _ => {
            return Err(CodecError::Unsupported(format!(
                "WAV format tag {} with {} bits per sample",
                audio_format, bits_per_sample
            )))
        }
    }

    Ok(WavInfo {
        audio_format: effective,
        channels,
        sample_rate,
        bits_per_sample,
        block_align,
        data_offset,
        data_len,
    })
}

pub struct WavDecoder<R: Read + Seek> {
    reader: R,
    wav: WavInfo,
    info: StreamInfo,
    position: u64,
    raw: Vec<u8>,
}

impl<R: Read + Seek> WavDecoder<R> {
    pub fn new(mut reader: R) -> Result<Self, CodecError> {
        let wav = read_wav_info(&mut reader)?;
        if wav.channels == 0 {
            return Err(CodecError::Unsupported("WAV with zero channels".into()));
        }

        reader.seek(SeekFrom::Start(wav.data_offset))?;

        let info = StreamInfo {
            sample_rate: wav.sample_rate,
            channels: wav.channels as u8,
            bits_per_sample: wav.bits_per_sample as u8,
            total_frames: Some(wav.total_frames()),
        };

        Ok(WavDecoder {
            reader,
            wav,
            info,
            position: 0,
            raw: Vec::new(),
        })
    }
}

impl<R: Read + Seek> PcmDecoder for WavDecoder<R> {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn read_frames(&mut self, out: &mut [i32]) -> Result<usize, CodecError> {
        let channels = self.wav.channels as usize;
        let bytes_per_sample = (self.wav.bits_per_sample / 8) as usize;
        let frame_bytes = channels * bytes_per_sample;
        let want_frames = out.len() / channels;

        let total = self.wav.total_frames();
        let left = total.saturating_sub(self.position) as usize;
        let frames = want_frames.min(left);
        if frames == 0 {
            return Ok(0);
        }

        self.raw.resize(frames * frame_bytes, 0);
        let mut filled = 0;
        while filled < self.raw.len() {
            let n = self.reader.read(&mut self.raw[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        let got_frames = filled / frame_bytes;

        let float = self.wav.audio_format == WAVE_FORMAT_IEEE_FLOAT;
        for i in 0..got_frames * channels {
            let p = &self.raw[i * bytes_per_sample..];
            let sample = match (self.wav.bits_per_sample, float) {
                (16, false) => (i16::from_le_bytes([p[0], p[1]]) as i32) << 16,
                (24, false) => {
                    let mut v = (p[0] as i32) | ((p[1] as i32) << 8) | ((p[2] as i32) << 16);
                    if p[2] & 0x80 != 0 {
                        v |= !0xFF_FFFF;
                    }
                    v << 8
                }
                (32, false) => i32::from_le_bytes([p[0], p[1], p[2], p[3]]),
                (32, true) => {
                    let f = f32::from_le_bytes([p[0], p[1], p[2], p[3]]).clamp(-1.0, 1.0);
                    (f as f64 * i32::MAX as f64) as i32
                }
                _ => 0,
            };
            out[i] = sample;
        }

        self.position += got_frames as u64;
        Ok(got_frames)
    }

    fn seek_to(&mut self, frame: u64) -> Result<(), CodecError> {
        let frame = frame.min(self.wav.total_frames());
        let offset = self.wav.data_offset + frame * self.wav.block_align as u64;
        self.reader.seek(SeekFrom::Start(offset))?;
        self.position = frame;
        Ok(())
    }
}

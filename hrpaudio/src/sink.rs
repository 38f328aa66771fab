//! The PCM sink: wire-format selection and the ALSA implementation.
//!
//! The playback controller only ever talks to [`PcmSink`], so the pacing and
//! conversion logic can be exercised against an in-memory sink in tests.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};

use hrpmetadata::FileMetadata;

use crate::device::Capabilities;
use crate::AudioError;

const MAX_BUFFER_FRAMES: i64 = 131_072;
const TARGET_PERIOD_FRAMES: i64 = 4096;

/// Wire formats the selection table can land on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    S16Le,
    S24_3Le,
    S32Le,
    DsdU32Be,
}

impl WireFormat {
    fn to_alsa(self) -> Format {
        match self {
            WireFormat::S16Le => Format::S16LE,
            WireFormat::S24_3Le => Format::S243LE,
            WireFormat::S32Le => Format::S32LE,
            WireFormat::DsdU32Be => Format::DSDU32BE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WireFormat::S16Le => "S16_LE",
            WireFormat::S24_3Le => "S24_3LE",
            WireFormat::S32Le => "S32_LE",
            WireFormat::DsdU32Be => "DSD_U32_BE",
        }
    }
}

/// How 1-bit input is carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsdMode {
    None,
    Dop,
    Native,
}

/// The negotiated wire layout for one file.
#[derive(Debug, Clone, Copy)]
pub struct WireChoice {
    pub format: WireFormat,
    /// Output container width: 16, 24 (3 bytes) or 32.
    pub container: u32,
    pub dsd_mode: DsdMode,
}

impl WireChoice {
    pub fn bytes_per_frame(&self) -> usize {
        match self.container {
            16 => 4,
            24 => 6,
            _ => 8,
        }
    }
}

/// Pick the best wire format the device supports for this file.
///
/// Selection order: 16-bit wants S16_LE; 24-bit prefers S24_3LE and falls
/// back to S32_LE; 32-bit wants S32_LE; DSD prefers native DSD_U32_BE unless
/// DoP is forced, falling back to DoP markers inside S32_LE.
pub fn choose_wire_format(
    fm: &FileMetadata,
    caps: &Capabilities,
    dop: bool,
) -> Result<WireChoice, AudioError> {
    let unsupported = || {
        AudioError::UnsupportedFormat(format!(
            "{}Hz/{}bits has no matching device format",
            fm.sample_rate, fm.bits_per_sample
        ))
    };

    match fm.bits_per_sample {
        16 => {
            if caps.s16_le {
                Ok(WireChoice {
                    format: WireFormat::S16Le,
                    container: 16,
                    dsd_mode: DsdMode::None,
                })
            } else {
                Err(unsupported())
            }
        }
        24 => {
            if caps.s24_3le {
                Ok(WireChoice {
                    format: WireFormat::S24_3Le,
                    container: 24,
                    dsd_mode: DsdMode::None,
                })
            } else if caps.s32_le {
                Ok(WireChoice {
                    format: WireFormat::S32Le,
                    container: 32,
                    dsd_mode: DsdMode::None,
                })
            } else {
                Err(unsupported())
            }
        }
        32 => {
            if caps.s32_le {
                Ok(WireChoice {
                    format: WireFormat::S32Le,
                    container: 32,
                    dsd_mode: DsdMode::None,
                })
            } else {
                Err(unsupported())
            }
        }
        1 => {
            if !dop && caps.dsd_u32_be {
                Ok(WireChoice {
                    format: WireFormat::DsdU32Be,
                    container: 32,
                    dsd_mode: DsdMode::Native,
                })
            } else if caps.s32_le {
                Ok(WireChoice {
                    format: WireFormat::S32Le,
                    container: 32,
                    dsd_mode: DsdMode::Dop,
                })
            } else {
                Err(unsupported())
            }
        }
        _ => Err(unsupported()),
    }
}

/// Derive the PCM wire rate from the source rate and DSD transport: one DoP
/// frame carries 16 DSD bits per channel, one native frame 32.
pub fn normalize_pcm_rate(fm: &mut FileMetadata, mode: DsdMode) {
    fm.pcm_rate = match mode {
        DsdMode::Dop if fm.sample_rate >= 16 => fm.sample_rate / 16,
        DsdMode::Native if fm.sample_rate >= 32 => fm.sample_rate / 32,
        _ => fm.sample_rate,
    };
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    #[error("sink underrun")]
    Underrun,
    #[error("{op} failed (errno {errno})")]
    Backend { op: &'static str, errno: i32 },
}

/// The abstract PCM output the controller drives.
pub trait PcmSink {
    /// Write interleaved frames; returns frames accepted.
    fn writei(&mut self, buf: &[u8]) -> Result<usize, SinkError>;
    /// Ask the backend to recover from `err` (underrun, suspend).
    fn try_recover(&mut self, err: &SinkError, silent: bool) -> Result<(), SinkError>;
    fn prepare(&mut self) -> Result<(), SinkError>;
    /// Drop pending frames and prepare again (used after a seek).
    fn reset(&mut self) -> Result<(), SinkError>;
    fn drain(&mut self) -> Result<(), SinkError>;
    fn drop_pending(&mut self) -> Result<(), SinkError>;
    fn buffer_frames(&self) -> usize;
    fn period_frames(&self) -> usize;
}

/// ALSA-backed sink.
pub struct AlsaSink {
    pcm: PCM,
    format: WireFormat,
    buffer_frames: usize,
    period_frames: usize,
    /// Close with drop instead of drain (DSD modes, where stale frames would
    /// be replayed as PCM noise).
    drop_on_close: bool,
    closed: bool,
}

fn sink_err(op: &'static str, e: alsa::Error) -> AudioError {
    AudioError::SinkOpenFailed(format!("{op}: {e}"))
}

impl AlsaSink {
    /// Open and configure `device` for the negotiated wire layout:
    /// interleaved access, resampling off, two channels, a period close to
    /// 4096 frames and a buffer of at most 131072 frames.
    pub fn open(device: &str, choice: &WireChoice, rate: u32, dop: bool) -> Result<AlsaSink, AudioError> {
        let pcm = PCM::new(device, Direction::Playback, false)
            .map_err(|e| sink_err("snd_pcm_open", e))?;

        let (buffer_frames, period_frames) = {
            let hwp = HwParams::any(&pcm).map_err(|e| sink_err("snd_pcm_hw_params_any", e))?;
            hwp.set_rate_resample(false)
                .map_err(|e| sink_err("snd_pcm_hw_params_set_rate_resample", e))?;
            hwp.set_access(Access::RWInterleaved)
                .map_err(|e| sink_err("snd_pcm_hw_params_set_access", e))?;
            hwp.set_channels(2)
                .map_err(|e| sink_err("snd_pcm_hw_params_set_channels", e))?;
            hwp.set_rate(rate, ValueOr::Nearest)
                .map_err(|e| sink_err("snd_pcm_hw_params_set_rate_near", e))?;

            let mut buffer = MAX_BUFFER_FRAMES.min(
                hwp.get_buffer_size_max()
                    .unwrap_or(MAX_BUFFER_FRAMES),
            );
            if hwp
                .set_period_size_near(TARGET_PERIOD_FRAMES, ValueOr::Nearest)
                .is_err()
            {
                // Stubborn devices refuse the target outright; retry from
                // their own minimum, or a quarter of the buffer.
                let mut period = hwp.get_period_size_min().unwrap_or(0);
                if period == 0 {
                    period = buffer / 4;
                }
                hwp.set_period_size_near(period, ValueOr::Nearest)
                    .map_err(|e| sink_err("snd_pcm_hw_params_set_period_size_near", e))?;
            }
            buffer = hwp
                .set_buffer_size_near(buffer)
                .map_err(|e| sink_err("snd_pcm_hw_params_set_buffer_size_near", e))?;

            hwp.set_format(choice.format.to_alsa())
                .map_err(|e| sink_err("snd_pcm_hw_params_set_format", e))?;

            pcm.hw_params(&hwp)
                .map_err(|e| sink_err("snd_pcm_hw_params", e))?;

            let period = hwp
                .get_period_size()
                .map_err(|e| sink_err("snd_pcm_hw_params_get_period_size", e))?;
            (buffer as usize, period as usize)
        };

        pcm.prepare().map_err(|e| sink_err("snd_pcm_prepare", e))?;

        tracing::debug!(
            device,
            format = choice.format.as_str(),
            rate,
            buffer_frames,
            period_frames,
            "sink configured"
        );

        Ok(AlsaSink {
            pcm,
            format: choice.format,
            buffer_frames,
            period_frames,
            drop_on_close: choice.format == WireFormat::DsdU32Be || dop,
            closed: false,
        })
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    fn map_err(op: &'static str, e: alsa::Error) -> SinkError {
        if e.errno() == libc::EPIPE {
            SinkError::Underrun
        } else {
            SinkError::Backend {
                op,
                errno: e.errno(),
            }
        }
    }
}

impl PcmSink for AlsaSink {
    fn writei(&mut self, buf: &[u8]) -> Result<usize, SinkError> {
        let io = self
            .pcm
            .io_bytes();
        io.writei(buf)
            .map_err(|e| Self::map_err("snd_pcm_writei", e))
    }

    fn try_recover(&mut self, err: &SinkError, silent: bool) -> Result<(), SinkError> {
        let errno = match err {
            SinkError::Underrun => libc::EPIPE,
            SinkError::Backend { errno, .. } => *errno,
        };
        self.pcm
            .try_recover(alsa::Error::new("snd_pcm_writei", errno), silent)
            .map_err(|e| Self::map_err("snd_pcm_recover", e))
    }

    fn prepare(&mut self) -> Result<(), SinkError> {
        self.pcm
            .prepare()
            .map_err(|e| Self::map_err("snd_pcm_prepare", e))
    }

    fn reset(&mut self) -> Result<(), SinkError> {
        self.pcm
            .drop()
            .map_err(|e| Self::map_err("snd_pcm_drop", e))?;
        self.pcm
            .prepare()
            .map_err(|e| Self::map_err("snd_pcm_prepare", e))
    }

    fn drain(&mut self) -> Result<(), SinkError> {
        self.pcm
            .drain()
            .map_err(|e| Self::map_err("snd_pcm_drain", e))
    }

    fn drop_pending(&mut self) -> Result<(), SinkError> {
        self.closed = true;
        self.pcm
            .drop()
            .map_err(|e| Self::map_err("snd_pcm_drop", e))
    }

    fn buffer_frames(&self) -> usize {
        self.buffer_frames
    }

    fn period_frames(&self) -> usize {
        self.period_frames
    }
}

impl Drop for AlsaSink {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if self.drop_on_close {
            let _ = self.pcm.drop();
        } else {
            let _ = self.pcm.drain();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Capabilities;
    use hrpmetadata::{FileKind, FileMetadata, Tags};
    use std::path::PathBuf;

    fn fm(bits: u32, rate: u32) -> FileMetadata {
        FileMetadata {
            kind: if bits == 1 {
                FileKind::Dsf
            } else {
                FileKind::Flac
            },
            path: PathBuf::from("x"),
            file_size: 0,
            sample_rate: rate,
            pcm_rate: rate,
            channels: 2,
            bits_per_sample: bits,
            total_samples: 0,
            duration: 0.0,
            block_size: 4096,
            data_size: 0,
            mkv: None,
            tags: Tags::default(),
        }
    }

    fn caps(s16: bool, s24_3: bool, s32: bool, dsd: bool) -> Capabilities {
        Capabilities {
            s16_le: s16,
            s24_3le: s24_3,
            s32_le: s32,
            dsd_u32_be: dsd,
            ..Capabilities::default()
        }
    }

    #[test]
    fn sixteen_bit_requires_s16le() {
        let c = choose_wire_format(&fm(16, 44_100), &caps(true, false, false, false), false)
            .unwrap();
        assert_eq!(c.format, WireFormat::S16Le);
        assert_eq!(c.container, 16);
        assert_eq!(c.bytes_per_frame(), 4);

        assert!(choose_wire_format(&fm(16, 44_100), &caps(false, true, true, true), false)
            .is_err());
    }

    #[test]
    fn twentyfour_prefers_packed_then_s32() {
        let c = choose_wire_format(&fm(24, 96_000), &caps(false, true, true, false), false)
            .unwrap();
        assert_eq!(c.format, WireFormat::S24_3Le);
        assert_eq!(c.container, 24);
        assert_eq!(c.bytes_per_frame(), 6);

        let c = choose_wire_format(&fm(24, 96_000), &caps(false, false, true, false), false)
            .unwrap();
        assert_eq!(c.format, WireFormat::S32Le);
        assert_eq!(c.container, 32);
    }

    #[test]
    fn dsd_native_unless_dop_forced() {
        let c = choose_wire_format(&fm(1, 2_822_400), &caps(false, false, true, true), false)
            .unwrap();
        assert_eq!(c.format, WireFormat::DsdU32Be);
        assert_eq!(c.dsd_mode, DsdMode::Native);

        let c = choose_wire_format(&fm(1, 2_822_400), &caps(false, false, true, true), true)
            .unwrap();
        assert_eq!(c.format, WireFormat::S32Le);
        assert_eq!(c.dsd_mode, DsdMode::Dop);

        // No native support: DoP markers inside S32_LE even without --dop.
        let c = choose_wire_format(&fm(1, 2_822_400), &caps(false, false, true, false), false)
            .unwrap();
        assert_eq!(c.dsd_mode, DsdMode::Dop);
    }

    #[test]
    fn rate_normalization() {
        let mut f = fm(1, 2_822_400);
        normalize_pcm_rate(&mut f, DsdMode::Dop);
        assert_eq!(f.pcm_rate, 176_400);

        let mut f = fm(1, 2_822_400);
        normalize_pcm_rate(&mut f, DsdMode::Native);
        assert_eq!(f.pcm_rate, 88_200);

        let mut f = fm(24, 96_000);
        normalize_pcm_rate(&mut f, DsdMode::None);
        assert_eq!(f.pcm_rate, 96_000);
    }
}

//! Output device activation: capability probing and mixer volume.
//!
//! Capabilities are discovered once per device by trial-opening the PCM with
//! each format and recording acceptance. Volume goes through a fresh mixer
//! handle per change (open, set, close) so no second handle stays bound to
//! the card between keypresses.

use alsa::mixer::{Mixer, Selem, SelemChannelId, SelemId};
use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::Direction;

use hrpmetadata::{FileKind, FileMetadata};

use crate::AudioError;

/// Formats the device accepted during the probe pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub s16: bool,
    pub s16_le: bool,
    pub s16_be: bool,
    pub u16: bool,
    pub u16_le: bool,
    pub u16_be: bool,

    pub s24: bool,
    pub s24_3le: bool,
    pub s24_le: bool,
    pub s24_be: bool,
    pub u24: bool,
    pub u24_le: bool,
    pub u24_be: bool,

    pub s32: bool,
    pub s32_le: bool,
    pub s32_be: bool,
    pub u32: bool,
    pub u32_le: bool,
    pub u32_be: bool,

    pub dsd_u8: bool,
    pub dsd_u16_le: bool,
    pub dsd_u16_be: bool,
    pub dsd_u32_le: bool,
    pub dsd_u32_be: bool,
}

fn support_mask(device: &str, format: Format) -> bool {
    let Ok(pcm) = PCM::new(device, Direction::Playback, false) else {
        return false;
    };
    let Ok(hwp) = HwParams::any(&pcm) else {
        return false;
    };
    hwp.set_rate_resample(false).is_ok()
        && hwp.set_access(Access::RWInterleaved).is_ok()
        && hwp.set_format(format).is_ok()
        && hwp.set_channels(2).is_ok()
}

impl Capabilities {
    pub fn probe(device: &str) -> Capabilities {
        Capabilities {
            dsd_u8: support_mask(device, Format::DSDU8),
            dsd_u16_le: support_mask(device, Format::DSDU16LE),
            dsd_u16_be: support_mask(device, Format::DSDU16BE),
            dsd_u32_le: support_mask(device, Format::DSDU32LE),
            dsd_u32_be: support_mask(device, Format::DSDU32BE),

            s32: support_mask(device, Format::s32()),
            s32_le: support_mask(device, Format::S32LE),
            s32_be: support_mask(device, Format::S32BE),
            u32: support_mask(device, Format::u32()),
            u32_le: support_mask(device, Format::U32LE),
            u32_be: support_mask(device, Format::U32BE),

            s24: support_mask(device, Format::s24()),
            s24_3le: support_mask(device, Format::S243LE),
            s24_le: support_mask(device, Format::S24LE),
            s24_be: support_mask(device, Format::S24BE),
            u24: support_mask(device, Format::u24()),
            u24_le: support_mask(device, Format::U24LE),
            u24_be: support_mask(device, Format::U24BE),

            s16: support_mask(device, Format::s16()),
            s16_le: support_mask(device, Format::S16LE),
            s16_be: support_mask(device, Format::S16BE),
            u16: support_mask(device, Format::u16()),
            u16_le: support_mask(device, Format::U16LE),
            u16_be: support_mask(device, Format::U16BE),
        }
    }

    pub fn any(&self) -> bool {
        self.s16_le || self.s24_3le || self.s32_le || self.dsd_u32_be
    }
}

/// The device the whole run plays through.
#[derive(Debug, Clone)]
pub struct ActiveDevice {
    pub name: String,
    pub device: String,
    pub description: String,
    pub hardware: i32,
    pub selem: String,
    pub capabilities: Capabilities,
    pub has_volume: bool,
    pub volume: i32,
    pub prev_volume: i32,
    pub is_muted: bool,
    pub is_paused: bool,
}

/// Parse the card index out of an ALSA device string ("hw:1,0" -> 1).
fn hardware_index(device: &str) -> i32 {
    device
        .split_once(':')
        .map(|(_, rest)| rest)
        .and_then(|rest| rest.split(',').next())
        .and_then(|idx| idx.parse().ok())
        .unwrap_or(0)
}

/// The first mixer simple element with a playback volume, if any.
fn find_playback_selem(hardware: i32) -> Option<String> {
    let mixer = Mixer::new(&format!("hw:{hardware}"), false).ok()?;
    for elem in mixer.iter() {
        if let Some(selem) = Selem::new(elem) {
            if selem.has_playback_volume() {
                if let Ok(name) = selem.get_id().get_name().map(|n| n.to_string()) {
                    return Some(name);
                }
            }
        }
    }
    None
}

impl ActiveDevice {
    /// Probe and activate `device`, initializing the volume to
    /// `initial_volume` when given (clamped to 0..=100), otherwise to the
    /// current hardware value.
    pub fn activate(device: &str, initial_volume: Option<i32>) -> Result<ActiveDevice, AudioError> {
        let capabilities = Capabilities::probe(device);
        if !capabilities.any() {
            return Err(AudioError::SinkOpenFailed(format!(
                "'{device}' offers no usable playback format"
            )));
        }

        let hardware = hardware_index(device);
        let selem = find_playback_selem(hardware);

        let mut active = ActiveDevice {
            name: device.to_string(),
            device: device.to_string(),
            description: String::new(),
            hardware,
            selem: selem.clone().unwrap_or_default(),
            capabilities,
            has_volume: selem.is_some(),
            volume: 70,
            prev_volume: 70,
            is_muted: false,
            is_paused: false,
        };

        if active.has_volume {
            let current = active.read_volume().unwrap_or(100);
            let volume = initial_volume.unwrap_or(current).clamp(0, 100);
            if active.set_volume(volume).is_err() {
                active.has_volume = false;
            }
            active.prev_volume = active.volume;
        }

        Ok(active)
    }

    fn open_mixer_elem<T>(
        &self,
        f: impl FnOnce(&Selem) -> Result<T, alsa::Error>,
    ) -> Result<T, AudioError> {
        let addr = format!("hw:{}", self.hardware);
        let mixer = Mixer::new(&addr, false)
            .map_err(|e| AudioError::SinkOpenFailed(format!("snd_mixer_open {addr}: {e}")))?;
        let sid = SelemId::new(&self.selem, 0);
        let selem = mixer.find_selem(&sid).ok_or_else(|| {
            AudioError::SinkOpenFailed(format!("mixer element '{}' not found", self.selem))
        })?;
        f(&selem).map_err(|e| AudioError::SinkOpenFailed(format!("mixer: {e}")))
    }

    /// Current playback volume as a 0..=100 percentage.
    pub fn read_volume(&self) -> Option<i32> {
        self.open_mixer_elem(|selem| {
            let (min, max) = selem.get_playback_volume_range();
            let raw = selem.get_playback_volume(SelemChannelId::FrontLeft)?;
            if max > min {
                Ok(((raw - min) * 100 / (max - min)) as i32)
            } else {
                Ok(100)
            }
        })
        .ok()
    }

    /// Set the hardware playback volume. Remembers the outgoing value in
    /// `prev_volume` so mute can restore it.
    pub fn set_volume(&mut self, volume: i32) -> Result<(), AudioError> {
        let volume = volume.clamp(0, 100);
        self.prev_volume = self.volume;

        self.open_mixer_elem(|selem| {
            let (min, max) = selem.get_playback_volume_range();
            let raw = min + (volume as i64) * (max - min) / 100;
            selem.set_playback_volume_all(raw)
        })?;

        self.volume = volume;
        Ok(())
    }
}

/// Whether the active device can render this file at all, mirroring the
/// supported-rate matrix: the standard 44.1k..384k ladder, plus 705.6k/768k
/// under `experimental`, plus the DSD multiples for 1-bit input.
pub fn device_supports(fm: &FileMetadata, caps: &Capabilities, experimental: bool) -> bool {
    let rate_ok = |rate: u32| -> bool {
        matches!(
            rate,
            44_100 | 48_000 | 88_200 | 96_000 | 176_400 | 192_000 | 352_800 | 384_000
        ) || (experimental && matches!(rate, 705_600 | 768_000))
    };

    match fm.bits_per_sample {
        16 => caps.s16_le && rate_ok(fm.sample_rate),
        24 => (caps.s24_3le || caps.s32_le) && rate_ok(fm.sample_rate),
        32 => {
            // 32-bit FLAC decodes are not bit-exact through the int pipeline.
            if fm.kind == FileKind::Flac {
                return false;
            }
            caps.s32_le && rate_ok(fm.sample_rate)
        }
        1 => {
            let dsd_rate_ok = matches!(
                fm.sample_rate,
                2_822_400 | 5_644_800 | 11_289_600 | 22_579_200 | 45_158_400
            );
            (caps.dsd_u32_be || caps.s32_le) && dsd_rate_ok
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_index_parsing() {
        assert_eq!(hardware_index("hw:0"), 0);
        assert_eq!(hardware_index("hw:2,0"), 2);
        assert_eq!(hardware_index("plughw:1"), 1);
        assert_eq!(hardware_index("default"), 0);
    }
}

//! # hrpmetadata
//!
//! File probing for the playback queue: identify a file by extension, pull
//! the technical properties the playback engine needs (rate, channels, bit
//! depth, total samples) and the artistic tags worth displaying.
//!
//! FLAC is probed with claxon, WAV with the native RIFF reader, MP3 through
//! lofty's property scan, DSF/DFF with their own header parsers, and MKV/WebM
//! by opening the demuxer in probe-only mode. Tags come from lofty where the
//! container supports it and from a native ID3v2 walk for DSF.

pub mod dff;
pub mod dsf;
pub mod error;
pub mod id3;
pub mod tags;

pub use error::MetadataError;

use std::fs::File;
use std::path::{Path, PathBuf};

/// Supported file kinds, decided purely by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Wav,
    Flac,
    Mp3,
    Dsf,
    Dff,
    Mkv,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Wav => "WAV",
            FileKind::Flac => "FLAC",
            FileKind::Mp3 => "MP3",
            FileKind::Dsf => "DSF",
            FileKind::Dff => "DFF",
            FileKind::Mkv => "MKV",
        }
    }
}

/// Artistic tags and descriptive strings attached to a file.
#[derive(Debug, Clone, Default)]
pub struct Tags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub date: Option<String>,
    pub comment: Option<String>,
    pub track: Option<u32>,
    pub disc: Option<u32>,
    pub format_name: Option<String>,
    pub codec_name: Option<String>,
}

/// Audio-track facts for an MKV/WebM file, captured at probe time.
#[derive(Debug, Clone)]
pub struct MkvAudio {
    pub codec_id: String,
    pub codec_private: Vec<u8>,
    pub timecode_scale_ns: u64,
}

/// Everything the player needs to know about one queued file.
///
/// Created once at probe time. `pcm_rate` starts equal to `sample_rate` and
/// is normalized by the playback engine once the DSD transport mode is known.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub kind: FileKind,
    pub path: PathBuf,
    pub file_size: u64,
    pub sample_rate: u32,
    pub pcm_rate: u32,
    pub channels: u32,
    /// 1 for DSD, otherwise 16/24/32.
    pub bits_per_sample: u32,
    /// Total samples per channel (DSD bits per channel for DSD files).
    pub total_samples: u64,
    /// Duration in seconds (0 when the rate is unknown).
    pub duration: f64,
    /// DSF stride: bytes per channel per interleaved block.
    pub block_size: u32,
    /// Audio payload length for DSF/DFF.
    pub data_size: u64,
    pub mkv: Option<MkvAudio>,
    pub tags: Tags,
}

impl FileMetadata {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }

    pub fn is_dsd(&self) -> bool {
        self.bits_per_sample == 1
    }
}

/// Extension-based dispatch; `None` means the file kind is not ours.
pub fn kind_for_path(path: &Path) -> Option<FileKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "flac" => Some(FileKind::Flac),
        "wav" => Some(FileKind::Wav),
        "mp3" => Some(FileKind::Mp3),
        "dsf" => Some(FileKind::Dsf),
        "dff" => Some(FileKind::Dff),
        "mkv" | "webm" => Some(FileKind::Mkv),
        _ => None,
    }
}

fn reject_non_stereo(
    path: &Path,
    channels: u32,
    experimental: bool,
) -> Result<(), MetadataError> {
    if channels != 2 {
        if experimental {
            tracing::warn!(
                "Unsupported number of channels for '{}' ({} channels)",
                path.display(),
                channels
            );
        }
        return Err(MetadataError::UnsupportedChannels {
            path: path.display().to_string(),
            channels,
        });
    }
    Ok(())
}

fn duration_for(total_samples: u64, sample_rate: u32) -> f64 {
    if sample_rate > 0 {
        total_samples as f64 / sample_rate as f64
    } else {
        0.0
    }
}

/// Probe a file and build its [`FileMetadata`].
pub fn probe(path: &Path, experimental: bool) -> Result<FileMetadata, MetadataError> {
    let kind = kind_for_path(path).ok_or_else(|| {
        MetadataError::UnsupportedFormat(format!("'{}'", path.display()))
    })?;

    let file_size = std::fs::metadata(path)?.len();

    match kind {
        FileKind::Flac => probe_flac(path, file_size, experimental),
        FileKind::Wav => probe_wav(path, file_size, experimental),
        FileKind::Mp3 => probe_mp3(path, file_size, experimental),
        FileKind::Dsf => dsf::probe(path, file_size, experimental),
        FileKind::Dff => dff::probe(path, file_size, experimental),
        FileKind::Mkv => probe_mkv(path, file_size, experimental),
    }
}

fn probe_flac(
    path: &Path,
    file_size: u64,
    experimental: bool,
) -> Result<FileMetadata, MetadataError> {
    let reader = claxon::FlacReader::open(path)?;
    let si = reader.streaminfo();

    reject_non_stereo(path, si.channels, experimental)?;
    match si.bits_per_sample {
        16 | 24 | 32 => {}
        bits => {
            return Err(MetadataError::UnsupportedBitDepth {
                path: path.display().to_string(),
                bits,
            })
        }
    }

    let total_samples = si.samples.unwrap_or(0);
    Ok(FileMetadata {
        kind: FileKind::Flac,
        path: path.to_path_buf(),
        file_size,
        sample_rate: si.sample_rate,
        pcm_rate: si.sample_rate,
        channels: si.channels,
        bits_per_sample: si.bits_per_sample,
        total_samples,
        duration: duration_for(total_samples, si.sample_rate),
        block_size: 0,
        data_size: 0,
        mkv: None,
        tags: tags::read_tags(path),
    })
}

fn probe_wav(
    path: &Path,
    file_size: u64,
    experimental: bool,
) -> Result<FileMetadata, MetadataError> {
    let mut file = File::open(path)?;
    let info = hrpcodec::read_wav_info(&mut file)?;

    reject_non_stereo(path, info.channels as u32, experimental)?;

    let total_samples = info.total_frames();
    Ok(FileMetadata {
        kind: FileKind::Wav,
        path: path.to_path_buf(),
        file_size,
        sample_rate: info.sample_rate,
        pcm_rate: info.sample_rate,
        channels: info.channels as u32,
        bits_per_sample: info.bits_per_sample as u32,
        total_samples,
        duration: duration_for(total_samples, info.sample_rate),
        block_size: 0,
        data_size: info.data_len,
        mkv: None,
        tags: tags::read_tags(path),
    })
}

fn probe_mp3(
    path: &Path,
    file_size: u64,
    experimental: bool,
) -> Result<FileMetadata, MetadataError> {
    let props = tags::read_properties(path)
        .ok_or_else(|| MetadataError::Malformed(format!("'{}'", path.display())))?;

    let sample_rate = props.sample_rate;
    let channels = props.channels;
    reject_non_stereo(path, channels, experimental)?;

    // minimp3 reports no frame total; the tag scan's duration is the best
    // available estimate.
    let total_samples = (props.duration_secs * sample_rate as f64).round() as u64;
    Ok(FileMetadata {
        kind: FileKind::Mp3,
        path: path.to_path_buf(),
        file_size,
        sample_rate,
        pcm_rate: sample_rate,
        channels,
        bits_per_sample: 16,
        total_samples,
        duration: duration_for(total_samples, sample_rate),
        block_size: 0,
        data_size: 0,
        mkv: None,
        tags: tags::read_tags(path),
    })
}

fn probe_mkv(
    path: &Path,
    file_size: u64,
    experimental: bool,
) -> Result<FileMetadata, MetadataError> {
    let file = File::open(path)?;
    let demux = hrpmkv::MkvDemuxer::open(std::io::BufReader::new(file))?;
    let info = demux.audio_info().clone();

    let sample_rate = info.sample_rate.round() as u32;
    let channels = info.channels as u32;
    reject_non_stereo(path, channels, experimental)?;

    let duration = info
        .duration_ns
        .map(|ns| ns as f64 / 1_000_000_000.0)
        .unwrap_or(0.0);
    let total_samples = (duration * sample_rate as f64).round() as u64;

    Ok(FileMetadata {
        kind: FileKind::Mkv,
        path: path.to_path_buf(),
        file_size,
        sample_rate,
        pcm_rate: sample_rate,
        channels,
        bits_per_sample: info.bit_depth as u32,
        total_samples,
        duration,
        block_size: 0,
        data_size: 0,
        mkv: Some(MkvAudio {
            codec_id: info.codec_id,
            codec_private: info.codec_private,
            timecode_scale_ns: info.timecode_scale_ns,
        }),
        tags: Tags::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_dispatch() {
        assert_eq!(kind_for_path(Path::new("a.flac")), Some(FileKind::Flac));
        assert_eq!(kind_for_path(Path::new("a.WAV")), Some(FileKind::Wav));
        assert_eq!(kind_for_path(Path::new("a.webm")), Some(FileKind::Mkv));
        assert_eq!(kind_for_path(Path::new("a.dsf")), Some(FileKind::Dsf));
        assert_eq!(kind_for_path(Path::new("a.ogg")), None);
        assert_eq!(kind_for_path(Path::new("noext")), None);
    }

    #[test]
    fn duration_handles_zero_rate() {
        assert_eq!(duration_for(44_100, 0), 0.0);
        assert_eq!(duration_for(441_000, 44_100), 10.0);
    }
}

//! Segment walking, track selection and block decoding.

use std::collections::VecDeque;
use std::io::{Read, Seek};

use crate::aac::{AacGlue, AAC_OUTPUT_BITS};
use crate::ebml::{read_vint_mem, EbmlReader};
use crate::opus_glue::{OpusGlue, OPUS_OUTPUT_HZ};
use crate::MkvError;

const ID_EBML: u32 = 0x1A45_DFA3;
const ID_SEGMENT: u32 = 0x1853_8067;
const ID_INFO: u32 = 0x1549_A966;
const ID_TIMECODESCALE: u32 = 0x2A_D7B1;
const ID_DURATION: u32 = 0x4489;
const ID_TRACKS: u32 = 0x1654_AE6B;
const ID_TRACKENTRY: u32 = 0xAE;
const ID_TRACKNUMBER: u32 = 0xD7;
const ID_TRACKTYPE: u32 = 0x83;
const ID_CODECID: u32 = 0x86;
const ID_CODECPRIVATE: u32 = 0x63A2;
const ID_AUDIO: u32 = 0xE1;
const ID_SAMPLINGFREQ: u32 = 0xB5;
const ID_CHANNELS: u32 = 0x9F;
const ID_BITDEPTH: u32 = 0x6264;

const ID_CLUSTER: u32 = 0x1F43_B675;
const ID_CLUSTERTIMECODE: u32 = 0xE7;
const ID_SIMPLEBLOCK: u32 = 0xA3;
const ID_BLOCKGROUP: u32 = 0xA0;
const ID_BLOCK: u32 = 0xA1;

const TRACK_TYPE_AUDIO: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MkvCodec {
    Unknown,
    Vorbis,
    Opus,
    Flac,
    Aac,
    PcmInt,
    PcmFloat,
}

fn codec_from_id(cid: &str) -> MkvCodec {
    match cid {
        "A_VORBIS" => MkvCodec::Vorbis,
        "A_OPUS" => MkvCodec::Opus,
        "A_FLAC" => MkvCodec::Flac,
        "A_PCM/INT/LIT" => MkvCodec::PcmInt,
        "A_PCM/FLOAT/IEEE" => MkvCodec::PcmFloat,
        _ if cid.starts_with("A_AAC") => MkvCodec::Aac,
        _ => MkvCodec::Unknown,
    }
}

/// Properties of the selected audio track.
#[derive(Debug, Clone)]
pub struct MkvAudioInfo {
    pub codec: MkvCodec,
    pub codec_id: String,
    pub sample_rate: f64,
    pub channels: u8,
    pub bit_depth: u8,
    pub codec_private: Vec<u8>,
    pub track_number: u64,
    pub timecode_scale_ns: u64,
    /// Segment duration, when the Info element declares one.
    pub duration_ns: Option<u64>,
}

impl Default for MkvAudioInfo {
    fn default() -> Self {
        MkvAudioInfo {
            codec: MkvCodec::Unknown,
            codec_id: String::new(),
            sample_rate: 0.0,
            channels: 0,
            bit_depth: 0,
            codec_private: Vec::new(),
            track_number: 0,
            timecode_scale_ns: 1_000_000,
            duration_ns: None,
        }
    }
}

/// One decoded-audio output unit.
#[derive(Debug)]
pub struct MkvPacket {
    pub data: Vec<u8>,
    /// Presentation timestamp in nanoseconds, -1 when unknown.
    pub pts_ns: i64,
    pub keyframe: bool,
}

pub struct MkvDemuxer<R: Read + Seek> {
    r: EbmlReader<R>,
    track_number: u64,
    timecode_scale_ns: u64,
    duration_ticks: Option<f64>,
    ainfo: MkvAudioInfo,
    current_cluster_tc: u64,
    queue: VecDeque<MkvPacket>,
    opus: Option<OpusGlue>,
    aac: Option<AacGlue>,
}

impl<R: Read + Seek> MkvDemuxer<R> {
    /// Parse the EBML header, Segment Info and Tracks, and set up the codec
    /// for the first audio track. Fails when no audio track exists.
    pub fn open(reader: R) -> Result<Self, MkvError> {
        let mut demux = MkvDemuxer {
            r: EbmlReader::new(reader)?,
            track_number: 0,
            timecode_scale_ns: 1_000_000,
            duration_ticks: None,
            ainfo: MkvAudioInfo::default(),
            current_cluster_tc: 0,
            queue: VecDeque::new(),
            opus: None,
            aac: None,
        };

        demux.parse_header_and_segment()?;
        if demux.track_number == 0 {
            return Err(MkvError::Unsupported("no audio track found".into()));
        }

        demux.ainfo.timecode_scale_ns = demux.timecode_scale_ns;
        demux.ainfo.duration_ns = demux
            .duration_ticks
            .map(|d| (d * demux.timecode_scale_ns as f64) as u64);

        Ok(demux)
    }

    pub fn audio_info(&self) -> &MkvAudioInfo {
        &self.ainfo
    }

    /// Pop the next decoded packet, demuxing further clusters as needed.
    /// `Ok(None)` signals end of stream.
    pub fn read_packet(&mut self) -> Result<Option<MkvPacket>, MkvError> {
        if let Some(pkt) = self.queue.pop_front() {
            return Ok(Some(pkt));
        }

        loop {
            let Some(header) = self.r.read_element()? else {
                return Ok(None);
            };

            if header.id == ID_CLUSTER {
                let end = header.size.known().map(|s| self.r.tell() + s);
                self.parse_cluster(end)?;
                if let Some(pkt) = self.queue.pop_front() {
                    return Ok(Some(pkt));
                }
            } else {
                match header.size.known() {
                    Some(s) => self.r.skip(s)?,
                    None => return Ok(None),
                }
            }
        }
    }

    fn parse_header_and_segment(&mut self) -> Result<(), MkvError> {
        let header = self
            .r
            .read_element()?
            .ok_or_else(|| MkvError::Malformed("empty file".into()))?;
        if header.id != ID_EBML {
            return Err(MkvError::Malformed("missing EBML header".into()));
        }
        match header.size.known() {
            Some(s) => self.r.skip(s)?,
            None => return Err(MkvError::Malformed("EBML header with unknown size".into())),
        }

        let segment = self
            .r
            .read_element()?
            .ok_or_else(|| MkvError::Malformed("missing Segment".into()))?;
        if segment.id != ID_SEGMENT {
            return Err(MkvError::Malformed("expected Segment element".into()));
        }
        // The Segment size may legitimately be unknown (live remuxes); the
        // walk below is purely sequential and does not need it.

        let mut got_info = false;
        let mut got_tracks = false;
        while !(got_info && got_tracks) {
            let Some(header) = self.r.read_element()? else {
                break;
            };
            let end = header.size.known().map(|s| self.r.tell() + s);

            match header.id {
                ID_INFO => {
                    self.parse_info(end)?;
                    got_info = true;
                }
                ID_TRACKS => {
                    self.parse_tracks(end)?;
                    got_tracks = true;
                }
                _ => match header.size.known() {
                    Some(s) => self.r.skip(s)?,
                    None => break,
                },
            }
        }

        Ok(())
    }

    fn parse_info(&mut self, end: Option<u64>) -> Result<(), MkvError> {
        loop {
            if let Some(e) = end {
                if self.r.tell() >= e {
                    break;
                }
            }
            let Some(header) = self.r.read_element()? else {
                break;
            };
            match header.id {
                ID_TIMECODESCALE => {
                    let scale = self.r.read_uint(header.size)?;
                    if scale > 0 {
                        self.timecode_scale_ns = scale;
                    }
                }
                ID_DURATION => {
                    self.duration_ticks = Some(self.r.read_float(header.size)?);
                }
                _ => match header.size.known() {
                    Some(s) => self.r.skip(s)?,
                    None => return Ok(()),
                },
            }
        }
        Ok(())
    }

    fn parse_tracks(&mut self, end: Option<u64>) -> Result<(), MkvError> {
        loop {
            if let Some(e) = end {
                if self.r.tell() >= e {
                    break;
                }
            }
            let Some(header) = self.r.read_element()? else {
                break;
            };
            if header.id != ID_TRACKENTRY {
                match header.size.known() {
                    Some(s) => self.r.skip(s)?,
                    None => return Ok(()),
                }
                continue;
            }

            let entry_end = header.size.known().map(|s| self.r.tell() + s);
            self.parse_track_entry(entry_end)?;
        }
        Ok(())
    }

    fn parse_track_entry(&mut self, end: Option<u64>) -> Result<(), MkvError> {
        let mut track_number = 0u64;
        let mut track_type = 0u64;
        let mut codec_id = String::new();
        let mut codec_private: Option<Vec<u8>> = None;
        let mut sampling = 0.0f64;
        let mut channels = 0u64;
        let mut bit_depth = 0u64;

        loop {
            if let Some(e) = end {
                if self.r.tell() >= e {
                    break;
                }
            }
            let Some(header) = self.r.read_element()? else {
                break;
            };

            match header.id {
                ID_TRACKNUMBER => track_number = self.r.read_uint(header.size)?,
                ID_TRACKTYPE => track_type = self.r.read_uint(header.size)?,
                ID_CODECID => codec_id = self.r.read_string(header.size)?,
                ID_CODECPRIVATE => codec_private = Some(self.r.read_binary(header.size)?),
                ID_AUDIO => {
                    let audio_end = header.size.known().map(|s| self.r.tell() + s);
                    loop {
                        if let Some(e) = audio_end {
                            if self.r.tell() >= e {
                                break;
                            }
                        }
                        let Some(child) = self.r.read_element()? else {
                            break;
                        };
                        match child.id {
                            ID_SAMPLINGFREQ => sampling = self.r.read_float(child.size)?,
                            ID_CHANNELS => channels = self.r.read_uint(child.size)?,
                            ID_BITDEPTH => bit_depth = self.r.read_uint(child.size)?,
                            _ => match child.size.known() {
                                Some(s) => self.r.skip(s)?,
                                None => break,
                            },
                        }
                    }
                }
                _ => match header.size.known() {
                    Some(s) => self.r.skip(s)?,
                    None => break,
                },
            }
        }

        if track_type != TRACK_TYPE_AUDIO || self.track_number != 0 {
            return Ok(());
        }

        self.track_number = track_number;
        self.ainfo.track_number = track_number;
        self.ainfo.codec = codec_from_id(&codec_id);
        self.ainfo.codec_id = codec_id;
        self.ainfo.codec_private = codec_private.clone().unwrap_or_default();

        match self.ainfo.codec {
            MkvCodec::Opus => {
                let cp = codec_private
                    .ok_or_else(|| MkvError::Malformed("Opus track without OpusHead".into()))?;
                let glue = OpusGlue::from_codec_private(&cp)?;
                self.ainfo.sample_rate = OPUS_OUTPUT_HZ as f64;
                self.ainfo.channels = glue.channels();
                self.ainfo.bit_depth = 16;
                self.opus = Some(glue);
            }
            MkvCodec::Aac => {
                let glue = match codec_private.as_deref() {
                    Some(cp) => AacGlue::from_codec_private(cp).unwrap_or_else(|e| {
                        tracing::debug!("AAC codec-private rejected ({e}), deferring to first packet");
                        AacGlue::from_first_packet()
                    }),
                    None => AacGlue::from_first_packet(),
                };
                if sampling > 0.0 {
                    self.ainfo.sample_rate = sampling;
                }
                if channels > 0 {
                    self.ainfo.channels = channels.min(255) as u8;
                }
                self.ainfo.bit_depth = AAC_OUTPUT_BITS;
                self.aac = Some(glue);
            }
            MkvCodec::PcmInt | MkvCodec::PcmFloat => {
                self.ainfo.sample_rate = sampling;
                self.ainfo.channels = channels.min(255) as u8;
                self.ainfo.bit_depth = bit_depth.min(255) as u8;
            }
            _ => {
                self.ainfo.sample_rate = sampling;
                self.ainfo.channels = channels.min(255) as u8;
                self.ainfo.bit_depth = 0;
            }
        }

        Ok(())
    }

    fn parse_cluster(&mut self, end: Option<u64>) -> Result<(), MkvError> {
        self.current_cluster_tc = 0;

        loop {
            if let Some(e) = end {
                if self.r.tell() >= e {
                    break;
                }
            }
            let Some(header) = self.r.read_element()? else {
                break;
            };

            match header.id {
                ID_CLUSTERTIMECODE => {
                    self.current_cluster_tc = self.r.read_uint(header.size)?;
                }
                ID_SIMPLEBLOCK => {
                    let block = self.r.read_binary(header.size)?;
                    self.handle_block(&block)?;
                }
                ID_BLOCKGROUP => {
                    let bg_end = header.size.known().map(|s| self.r.tell() + s);
                    loop {
                        if let Some(e) = bg_end {
                            if self.r.tell() >= e {
                                break;
                            }
                        }
                        let Some(child) = self.r.read_element()? else {
                            break;
                        };
                        if child.id == ID_BLOCK {
                            let block = self.r.read_binary(child.size)?;
                            self.handle_block(&block)?;
                        } else {
                            match child.size.known() {
                                Some(s) => self.r.skip(s)?,
                                None => break,
                            }
                        }
                    }
                }
                _ => match header.size.known() {
                    Some(s) => self.r.skip(s)?,
                    // A non-size-bounded child terminates the cluster.
                    None => return Ok(()),
                },
            }
        }

        Ok(())
    }

    fn handle_block(&mut self, block: &[u8]) -> Result<(), MkvError> {
        let (track_no, vint_len) = read_vint_mem(block)
            .ok_or_else(|| MkvError::Malformed("block track number".into()))?;
        let rest = &block[vint_len..];
        if rest.len() < 3 {
            return Err(MkvError::Malformed("block header truncated".into()));
        }

        let rel_tc = i16::from_be_bytes([rest[0], rest[1]]);
        let flags = rest[2];
        let payload = &rest[3..];

        let lacing = (flags & 0x06) >> 1;
        let keyframe = flags & 0x80 != 0;

        if track_no != self.track_number {
            return Ok(());
        }

        let block_tc = self.current_cluster_tc as i64 + rel_tc as i64;
        let pts_ns = (block_tc as i128 * self.timecode_scale_ns as i128)
            .clamp(i64::MIN as i128, i64::MAX as i128) as i64;

        let frames: Vec<&[u8]> = match lacing {
            0 => vec![payload],
            1 => xiph_frames(payload)?,
            other => {
                // Fixed and EBML lacing are not decoded.
                tracing::debug!("skipping block with lacing {}", other);
                return Ok(());
            }
        };

        for frame in frames {
            if frame.is_empty() {
                continue;
            }
            let decoded = match self.ainfo.codec {
                MkvCodec::Opus => self
                    .opus
                    .as_mut()
                    .ok_or_else(|| MkvError::Decode("Opus decoder not set up".into()))?
                    .decode_packet(frame)?,
                MkvCodec::Aac => self
                    .aac
                    .as_mut()
                    .ok_or_else(|| MkvError::Decode("AAC decoder not set up".into()))?
                    .decode_packet(frame)?,
                _ => Some(frame.to_vec()),
            };
            if let Some(data) = decoded {
                if !data.is_empty() {
                    self.queue.push_back(MkvPacket {
                        data,
                        pts_ns,
                        keyframe,
                    });
                }
            }
        }

        Ok(())
    }
}

/// Split a Xiph-laced block payload into its frames.
///
/// The first byte is the lace count; each of the first `count` frames is
/// described by a run of bytes summed until one below 0xFF, and the last
/// frame takes whatever remains.
fn xiph_frames(payload: &[u8]) -> Result<Vec<&[u8]>, MkvError> {
    let lace_count = *payload
        .first()
        .ok_or_else(|| MkvError::Malformed("empty laced block".into()))? as usize;
    let frames = lace_count + 1;

    let mut pos = 1usize;
    let mut sizes = vec![0usize; frames];
    let mut total = 0usize;
    for size in sizes.iter_mut().take(frames - 1) {
        let mut sz = 0usize;
        loop {
            let b = *payload
                .get(pos)
                .ok_or_else(|| MkvError::Malformed("lace size truncated".into()))?;
            pos += 1;
            sz += b as usize;
            if b != 0xFF {
                break;
            }
        }
        *size = sz;
        total += sz;
    }

    let remaining = payload.len() - pos;
    if remaining < total {
        return Err(MkvError::Malformed("lace sizes exceed block".into()));
    }
    sizes[frames - 1] = remaining - total;

    let mut out = Vec::with_capacity(frames);
    let mut cursor = pos;
    for sz in sizes {
        out.push(&payload[cursor..cursor + sz]);
        cursor += sz;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xiph_exact_fit() {
        // Two laced frames of 3 bytes, one trailing frame of 2.
        let mut payload = vec![2u8, 3, 3];
        payload.extend_from_slice(&[1, 1, 1, 2, 2, 2, 9, 9]);
        let frames = xiph_frames(&payload).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], &[1, 1, 1]);
        assert_eq!(frames[1], &[2, 2, 2]);
        assert_eq!(frames[2], &[9, 9]);
    }

    #[test]
    fn xiph_long_size_run() {
        // 0xFF 0x01 encodes a 256-byte frame.
        let mut payload = vec![1u8, 0xFF, 0x01];
        payload.extend(std::iter::repeat(7u8).take(256));
        payload.extend_from_slice(&[5, 5]);
        let frames = xiph_frames(&payload).unwrap();
        assert_eq!(frames[0].len(), 256);
        assert_eq!(frames[1], &[5, 5]);
    }

    #[test]
    fn xiph_overrun_is_malformed() {
        // Declared size larger than the remaining payload.
        let payload = vec![1u8, 10, 1, 2, 3];
        assert!(matches!(
            xiph_frames(&payload),
            Err(MkvError::Malformed(_))
        ));
    }

    #[test]
    fn codec_id_mapping() {
        assert_eq!(codec_from_id("A_OPUS"), MkvCodec::Opus);
        assert_eq!(codec_from_id("A_AAC/MPEG4/LC"), MkvCodec::Aac);
        assert_eq!(codec_from_id("A_PCM/INT/LIT"), MkvCodec::PcmInt);
        assert_eq!(codec_from_id("A_PCM/FLOAT/IEEE"), MkvCodec::PcmFloat);
        assert_eq!(codec_from_id("V_VP9"), MkvCodec::Unknown);
    }
}

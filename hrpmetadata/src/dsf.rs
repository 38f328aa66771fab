//! DSF (DSD Stream File) header parsing.
//!
//! Layout (all little-endian):
//!
//! ```text
//! 0   "DSD "            28  "fmt "             80  "data"
//! 4   u64 chunk size    32  u64 chunk size     84  u64 chunk size (payload + 12)
//! 12  u64 file size     40  u32 format version 92  audio payload
//! 20  u64 id3 offset    44  u32 format id
//!                       48  u32 channel type
//!                       52  u32 channel num
//!                       56  u32 sampling rate
//!                       60  u32 bits per sample
//!                       64  u64 sample count
//!                       72  u32 block size per channel
//! ```
//!
//! The audio payload always begins at offset 92. A non-zero id3 offset points
//! at an ID3v2 tag at the end of the file.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::{duration_for, id3, FileKind, FileMetadata, MetadataError, Tags};

pub const DSF_AUDIO_OFFSET: u64 = 92;

fn read_u32<R: Read>(r: &mut R) -> Result<u32, MetadataError> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64, MetadataError> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

pub fn probe(
    path: &Path,
    file_size: u64,
    experimental: bool,
) -> Result<FileMetadata, MetadataError> {
    let mut f = File::open(path)?;

    let mut magic = [0u8; 4];
    f.read_exact(&mut magic)?;
    if &magic != b"DSD " {
        return Err(MetadataError::Malformed(format!(
            "'{}' is not a DSF file",
            path.display()
        )));
    }
    let _header_size = read_u64(&mut f)?;
    let _total_size = read_u64(&mut f)?;
    let metadata_offset = read_u64(&mut f)?;

    f.read_exact(&mut magic)?;
    if &magic != b"fmt " {
        return Err(MetadataError::Malformed("DSF fmt chunk missing".into()));
    }
    let _fmt_size = read_u64(&mut f)?;
    let _format_version = read_u32(&mut f)?;
    let format_id = read_u32(&mut f)?;
    let _channel_type = read_u32(&mut f)?;
    let channels = read_u32(&mut f)?;
    let sample_rate = read_u32(&mut f)?;
    let bits = read_u32(&mut f)?;
    let sample_count = read_u64(&mut f)?;
    let block_size = read_u32(&mut f)?;
    let _reserved = read_u32(&mut f)?;

    if format_id != 0 {
        return Err(MetadataError::UnsupportedFormat(format!(
            "DSF format id {format_id}"
        )));
    }
    if bits != 1 {
        // 8 would mean MSB-first storage, which no known DSF writer emits.
        tracing::warn!("'{}': DSF bitsPerSample {} (expected 1)", path.display(), bits);
    }

    crate::reject_non_stereo(path, channels, experimental)?;

    f.read_exact(&mut magic)?;
    if &magic != b"data" {
        return Err(MetadataError::Malformed("DSF data chunk missing".into()));
    }
    let data_chunk_size = read_u64(&mut f)?;
    let data_size = data_chunk_size.saturating_sub(12);

    let mut tags = Tags::default();
    if metadata_offset != 0 {
        if f.seek(SeekFrom::Start(metadata_offset)).is_ok() {
            id3::parse_id3v2(&mut f, &mut tags);
        }
    }
    if tags.codec_name.is_none() {
        tags.codec_name = Some("DSD".to_string());
    }
    if tags.format_name.is_none() {
        tags.format_name = Some("DSF (DSD Stream File)".to_string());
    }

    Ok(FileMetadata {
        kind: FileKind::Dsf,
        path: path.to_path_buf(),
        file_size,
        sample_rate,
        pcm_rate: sample_rate,
        channels,
        bits_per_sample: 1,
        total_samples: sample_count,
        duration: duration_for(sample_count, sample_rate),
        block_size: if block_size > 0 { block_size } else { 4096 },
        data_size,
        mkv: None,
        tags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) fn dsf_bytes(
        channels: u32,
        rate: u32,
        sample_count: u64,
        block_size: u32,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"DSD ");
        out.extend_from_slice(&28u64.to_le_bytes());
        out.extend_from_slice(&((92 + payload.len()) as u64).to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes()); // no id3
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&52u64.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes()); // version
        out.extend_from_slice(&0u32.to_le_bytes()); // format id: raw DSD
        out.extend_from_slice(&2u32.to_le_bytes()); // channel type: stereo
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&rate.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes()); // bits per sample
        out.extend_from_slice(&sample_count.to_le_bytes());
        out.extend_from_slice(&block_size.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // reserved
        out.extend_from_slice(b"data");
        out.extend_from_slice(&((payload.len() + 12) as u64).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn parses_stereo_dsf() {
        let bytes = dsf_bytes(2, 2_822_400, 1_000_000, 4096, &[0u8; 64]);
        assert_eq!(bytes.len(), 92 + 64);

        let mut tmp = tempfile::NamedTempFile::with_suffix(".dsf").unwrap();
        tmp.write_all(&bytes).unwrap();

        let fm = probe(tmp.path(), bytes.len() as u64, false).unwrap();
        assert_eq!(fm.kind, FileKind::Dsf);
        assert_eq!(fm.sample_rate, 2_822_400);
        assert_eq!(fm.bits_per_sample, 1);
        assert_eq!(fm.total_samples, 1_000_000);
        assert_eq!(fm.block_size, 4096);
        assert_eq!(fm.data_size, 64);
    }

    #[test]
    fn rejects_mono() {
        let bytes = dsf_bytes(1, 2_822_400, 1000, 4096, &[]);
        let mut tmp = tempfile::NamedTempFile::with_suffix(".dsf").unwrap();
        tmp.write_all(&bytes).unwrap();

        assert!(matches!(
            probe(tmp.path(), bytes.len() as u64, false),
            Err(MetadataError::UnsupportedChannels { .. })
        ));
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut tmp = tempfile::NamedTempFile::with_suffix(".dsf").unwrap();
        tmp.write_all(b"RIFFxxxxxxxxxxxxxxxxxxxxxxxxxxxx").unwrap();
        assert!(probe(tmp.path(), 32, false).is_err());
    }
}

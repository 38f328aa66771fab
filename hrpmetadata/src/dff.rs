//! DSDIFF (DFF) header parsing.
//!
//! A DFF file is an IFF-style container: `FRM8` magic, a big-endian 64-bit
//! total size, the `DSD ` form type, then chunks of 4-byte id + big-endian
//! 64-bit size. The `PROP`/`SND ` chunk carries sample rate and channel
//! layout, the top-level `DSD ` chunk the interleaved audio bytes. A `DST `
//! chunk means the audio is DST-compressed, which is refused.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::{duration_for, FileKind, FileMetadata, MetadataError, Tags};

fn read_id<R: Read>(r: &mut R) -> Result<[u8; 4], MetadataError> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(b)
}

fn read_be_u64<R: Read>(r: &mut R) -> Result<u64, MetadataError> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_be_bytes(b))
}

struct SoundProps {
    sample_rate: u32,
    channels: u32,
}

fn parse_prop_chunk<R: Read + Seek>(r: &mut R, size: u64) -> Result<SoundProps, MetadataError> {
    let end = r.stream_position()? + size;

    let prop_type = read_id(r)?;
    if &prop_type != b"SND " {
        r.seek(SeekFrom::Start(end))?;
        return Ok(SoundProps {
            sample_rate: 0,
            channels: 0,
        });
    }

    let mut props = SoundProps {
        sample_rate: 0,
        channels: 0,
    };

    while r.stream_position()? + 12 <= end {
        let id = read_id(r)?;
        let sz = read_be_u64(r)?;
        let next = r.stream_position()? + sz + (sz & 1);

        match &id {
            b"FS  " => {
                let mut b = [0u8; 4];
                r.read_exact(&mut b)?;
                props.sample_rate = u32::from_be_bytes(b);
            }
            b"CHNL" => {
                let mut b = [0u8; 2];
                r.read_exact(&mut b)?;
                props.channels = u16::from_be_bytes(b) as u32;
            }
            b"CMPR" => {
                let cmpr = read_id(r)?;
                if &cmpr == b"DST " {
                    return Err(MetadataError::DstNotSupported);
                }
            }
            _ => {}
        }

        r.seek(SeekFrom::Start(next.min(end)))?;
    }

    r.seek(SeekFrom::Start(end))?;
    Ok(props)
}

pub fn probe(
    path: &Path,
    file_size: u64,
    experimental: bool,
) -> Result<FileMetadata, MetadataError> {
    let mut f = File::open(path)?;

    let magic = read_id(&mut f)?;
    if &magic != b"FRM8" {
        return Err(MetadataError::Malformed(format!(
            "'{}' is not a DFF file",
            path.display()
        )));
    }
    let _total = read_be_u64(&mut f)?;
    let form = read_id(&mut f)?;
    if &form != b"DSD " {
        return Err(MetadataError::Malformed("invalid DFF form type".into()));
    }

    let mut props = SoundProps {
        sample_rate: 0,
        channels: 0,
    };
    let mut data_size = 0u64;

    loop {
        let id = match read_id(&mut f) {
            Ok(id) => id,
            Err(MetadataError::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(e) => return Err(e),
        };
        let size = read_be_u64(&mut f)?;

        match &id {
            b"PROP" => props = parse_prop_chunk(&mut f, size)?,
            b"DSD " => {
                data_size = size;
                break;
            }
            b"DST " => return Err(MetadataError::DstNotSupported),
            _ => {
                f.seek(SeekFrom::Current((size + (size & 1)) as i64))?;
            }
        }
    }

    if data_size == 0 {
        return Err(MetadataError::Malformed("DFF audio chunk missing".into()));
    }

    let channels = if props.channels > 0 { props.channels } else { 2 };
    crate::reject_non_stereo(path, channels, experimental)?;

    // Interleaved 1-bit samples: 8 per byte per channel.
    let total_samples = data_size * 8 / channels as u64;

    let mut tags = Tags::default();
    tags.codec_name = Some("DSD".to_string());
    tags.format_name = Some("DSDIFF".to_string());

    Ok(FileMetadata {
        kind: FileKind::Dff,
        path: path.to_path_buf(),
        file_size,
        sample_rate: props.sample_rate,
        pcm_rate: props.sample_rate,
        channels,
        bits_per_sample: 1,
        total_samples,
        duration: duration_for(total_samples, props.sample_rate),
        block_size: 4096,
        data_size,
        mkv: None,
        tags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn chunk(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(id);
        out.extend_from_slice(&(body.len() as u64).to_be_bytes());
        out.extend_from_slice(body);
        if body.len() & 1 == 1 {
            out.push(0);
        }
        out
    }

    fn dff_bytes(rate: u32, channels: u16, cmpr: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut snd = b"SND ".to_vec();
        snd.extend_from_slice(&chunk(b"FS  ", &rate.to_be_bytes()));
        let mut chnl = channels.to_be_bytes().to_vec();
        for _ in 0..channels {
            chnl.extend_from_slice(b"SLFT");
        }
        snd.extend_from_slice(&chunk(b"CHNL", &chnl));
        let mut cmpr_body = cmpr.to_vec();
        cmpr_body.push(0); // name length
        snd.extend_from_slice(&chunk(b"CMPR", &cmpr_body));

        let mut body = b"DSD ".to_vec();
        body.extend_from_slice(&chunk(b"FVER", &[1, 5, 0, 0]));
        body.extend_from_slice(&chunk(b"PROP", &snd));
        body.extend_from_slice(&chunk(b"DSD ", payload));

        let mut out = b"FRM8".to_vec();
        out.extend_from_slice(&(body.len() as u64).to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn parses_stereo_dff() {
        let bytes = dff_bytes(2_822_400, 2, b"DSD ", &[0xAA; 128]);
        let mut tmp = tempfile::NamedTempFile::with_suffix(".dff").unwrap();
        tmp.write_all(&bytes).unwrap();

        let fm = probe(tmp.path(), bytes.len() as u64, false).unwrap();
        assert_eq!(fm.kind, FileKind::Dff);
        assert_eq!(fm.sample_rate, 2_822_400);
        assert_eq!(fm.channels, 2);
        assert_eq!(fm.data_size, 128);
        assert_eq!(fm.total_samples, 128 * 8 / 2);
    }

    #[test]
    fn rejects_dst_compression() {
        let bytes = dff_bytes(2_822_400, 2, b"DST ", &[0u8; 16]);
        let mut tmp = tempfile::NamedTempFile::with_suffix(".dff").unwrap();
        tmp.write_all(&bytes).unwrap();

        assert!(matches!(
            probe(tmp.path(), bytes.len() as u64, false),
            Err(MetadataError::DstNotSupported)
        ));
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut tmp = tempfile::NamedTempFile::with_suffix(".dff").unwrap();
        tmp.write_all(b"FORMxxxxxxxxxxxx").unwrap();
        assert!(probe(tmp.path(), 16, false).is_err());
    }
}

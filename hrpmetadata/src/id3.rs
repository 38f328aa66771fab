//! Minimal ID3v2 tag walk, used for the tag block DSF files append.
//!
//! Handles v2.3 (big-endian frame sizes) and v2.4 (synchsafe frame sizes),
//! the three text encodings that occur in the wild (Latin-1, UTF-16 with and
//! without BOM, UTF-8), and the COMM frame's language/description prefix.

use std::io::Read;

use crate::Tags;

fn synchsafe_to_u32(b: &[u8; 4]) -> u32 {
    ((b[0] as u32 & 0x7F) << 21)
        | ((b[1] as u32 & 0x7F) << 14)
        | ((b[2] as u32 & 0x7F) << 7)
        | (b[3] as u32 & 0x7F)
}

fn be_u32(b: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*b)
}

fn is_frame_id(id: &[u8; 4]) -> bool {
    id.iter()
        .all(|&c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

fn latin1_to_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as char)
        .collect()
}

fn utf16_to_string(bytes: &[u8], big_endian: bool) -> String {
    let mut units = Vec::with_capacity(bytes.len() / 2);
    let mut i = 0;
    while i + 1 < bytes.len() {
        let unit = if big_endian {
            u16::from_be_bytes([bytes[i], bytes[i + 1]])
        } else {
            u16::from_le_bytes([bytes[i], bytes[i + 1]])
        };
        if unit == 0 {
            break;
        }
        units.push(unit);
        i += 2;
    }
    String::from_utf16_lossy(&units)
}

/// Decode an ID3 text payload (leading encoding byte + data).
fn text_to_string(data: &[u8]) -> Option<String> {
    let (&enc, rest) = data.split_first()?;
    let s = match enc {
        0x00 => latin1_to_string(rest),
        0x03 => String::from_utf8_lossy(rest)
            .trim_end_matches('\0')
            .to_string(),
        0x01 => {
            if rest.len() < 2 {
                return None;
            }
            let (big_endian, offset) = match (rest[0], rest[1]) {
                (0xFE, 0xFF) => (true, 2),
                (0xFF, 0xFE) => (false, 2),
                _ => (true, 0),
            };
            utf16_to_string(&rest[offset..], big_endian)
        }
        0x02 => utf16_to_string(rest, true),
        _ => return None,
    };
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Terminator width for a given text encoding.
fn terminator_len(enc: u8) -> usize {
    if enc == 0x00 || enc == 0x03 {
        1
    } else {
        2
    }
}

/// Parse a "1" or "1/12" style numbering field.
fn parse_index(s: &str) -> Option<u32> {
    let head = s.split('/').next()?.trim();
    head.parse().ok()
}

/// Decode a COMM frame: encoding byte, 3-byte language, terminated
/// description, then the comment text.
fn comment_to_string(data: &[u8]) -> Option<String> {
    if data.len() < 5 {
        return None;
    }
    let enc = data[0];
    let body = &data[4..]; // skip encoding + language
    let term = terminator_len(enc);

    let mut i = 0;
    while i + term <= body.len() {
        if body[i..i + term].iter().all(|&b| b == 0) {
            i += term;
            break;
        }
        i += 1;
    }
    if i > body.len() {
        return None;
    }

    let mut payload = Vec::with_capacity(1 + body.len() - i);
    payload.push(enc);
    payload.extend_from_slice(&body[i..]);
    text_to_string(&payload)
}

/// Walk an ID3v2 tag at the reader's current position, filling any fields of
/// `tags` that are still unset. Parse problems end the walk quietly; partial
/// tags are better than none.
pub fn parse_id3v2<R: Read>(r: &mut R, tags: &mut Tags) -> bool {
    let mut header = [0u8; 10];
    if r.read_exact(&mut header).is_err() || &header[0..3] != b"ID3" {
        return false;
    }
    let version = header[3];
    let flags = header[5];
    let tag_size = synchsafe_to_u32(&[header[6], header[7], header[8], header[9]]);

    // Extended header: skip it.
    if flags & 0x40 != 0 {
        let mut ext = [0u8; 4];
        if r.read_exact(&mut ext).is_err() {
            return false;
        }
        let ext_size = if version == 4 {
            synchsafe_to_u32(&ext)
        } else {
            be_u32(&ext)
        };
        if ext_size < 4 {
            return false;
        }
        let mut skip = vec![0u8; ext_size as usize - 4];
        if r.read_exact(&mut skip).is_err() {
            return false;
        }
    }

    let mut remaining = tag_size as usize;
    let mut updated = false;

    while remaining >= 10 {
        let mut fh = [0u8; 10];
        if r.read_exact(&mut fh).is_err() {
            break;
        }
        let id: [u8; 4] = [fh[0], fh[1], fh[2], fh[3]];
        if !is_frame_id(&id) {
            break;
        }

        let fsize = if version == 4 {
            synchsafe_to_u32(&[fh[4], fh[5], fh[6], fh[7]])
        } else {
            be_u32(&[fh[4], fh[5], fh[6], fh[7]])
        } as usize;
        if fsize == 0 || fsize > remaining - 10 {
            break;
        }

        let mut body = vec![0u8; fsize];
        if r.read_exact(&mut body).is_err() {
            break;
        }

        match &id {
            b"TIT2" if tags.title.is_none() => {
                tags.title = text_to_string(&body);
                updated |= tags.title.is_some();
            }
            b"TPE1" if tags.artist.is_none() => {
                tags.artist = text_to_string(&body);
                updated |= tags.artist.is_some();
            }
            b"TALB" if tags.album.is_none() => {
                tags.album = text_to_string(&body);
                updated |= tags.album.is_some();
            }
            b"TCON" if tags.genre.is_none() => {
                tags.genre = text_to_string(&body);
                updated |= tags.genre.is_some();
            }
            b"TDRC" | b"TYER" if tags.date.is_none() => {
                tags.date = text_to_string(&body);
                updated |= tags.date.is_some();
            }
            b"TRCK" if tags.track.is_none() => {
                tags.track = text_to_string(&body).and_then(|s| parse_index(&s));
                updated |= tags.track.is_some();
            }
            b"TPOS" if tags.disc.is_none() => {
                tags.disc = text_to_string(&body).and_then(|s| parse_index(&s));
                updated |= tags.disc.is_some();
            }
            b"COMM" if tags.comment.is_none() => {
                tags.comment = comment_to_string(&body);
                updated |= tags.comment.is_some();
            }
            _ => {}
        }

        remaining -= fsize + 10;
    }

    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn frame(id: &[u8; 4], body: &[u8], v4: bool) -> Vec<u8> {
        let mut out = id.to_vec();
        let size = body.len() as u32;
        if v4 {
            out.extend_from_slice(&[
                ((size >> 21) & 0x7F) as u8,
                ((size >> 14) & 0x7F) as u8,
                ((size >> 7) & 0x7F) as u8,
                (size & 0x7F) as u8,
            ]);
        } else {
            out.extend_from_slice(&size.to_be_bytes());
        }
        out.extend_from_slice(&[0, 0]); // flags
        out.extend_from_slice(body);
        out
    }

    fn tag(version: u8, frames: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = frames.concat();
        let size = body.len() as u32;
        let mut out = b"ID3".to_vec();
        out.push(version);
        out.push(0); // revision
        out.push(0); // flags
        out.extend_from_slice(&[
            ((size >> 21) & 0x7F) as u8,
            ((size >> 14) & 0x7F) as u8,
            ((size >> 7) & 0x7F) as u8,
            (size & 0x7F) as u8,
        ]);
        out.extend_from_slice(&body);
        out
    }

    fn text_latin1(s: &str) -> Vec<u8> {
        let mut v = vec![0x00];
        v.extend_from_slice(s.as_bytes());
        v
    }

    #[test]
    fn reads_v24_text_frames() {
        let bytes = tag(
            4,
            &[
                frame(b"TIT2", &text_latin1("Title"), true),
                frame(b"TPE1", &text_latin1("Artist"), true),
                frame(b"TRCK", &text_latin1("3/12"), true),
            ],
        );

        let mut tags = Tags::default();
        assert!(parse_id3v2(&mut Cursor::new(bytes), &mut tags));
        assert_eq!(tags.title.as_deref(), Some("Title"));
        assert_eq!(tags.artist.as_deref(), Some("Artist"));
        assert_eq!(tags.track, Some(3));
    }

    #[test]
    fn reads_v23_utf16_with_bom() {
        let mut body = vec![0x01, 0xFF, 0xFE]; // UTF-16 LE BOM
        for unit in "Tïtle".encode_utf16() {
            body.extend_from_slice(&unit.to_le_bytes());
        }
        let bytes = tag(3, &[frame(b"TIT2", &body, false)]);

        let mut tags = Tags::default();
        assert!(parse_id3v2(&mut Cursor::new(bytes), &mut tags));
        assert_eq!(tags.title.as_deref(), Some("Tïtle"));
    }

    #[test]
    fn comm_skips_language_and_description() {
        let mut body = vec![0x00]; // latin-1
        body.extend_from_slice(b"eng");
        body.extend_from_slice(b"desc\0the comment");
        let bytes = tag(4, &[frame(b"COMM", &body, true)]);

        let mut tags = Tags::default();
        assert!(parse_id3v2(&mut Cursor::new(bytes), &mut tags));
        assert_eq!(tags.comment.as_deref(), Some("the comment"));
    }

    #[test]
    fn no_tag_is_fine() {
        let mut tags = Tags::default();
        assert!(!parse_id3v2(&mut Cursor::new(b"not id3".to_vec()), &mut tags));
        assert!(tags.title.is_none());
    }
}

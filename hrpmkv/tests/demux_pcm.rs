//! Demuxer behavior over synthesized Matroska streams carrying PCM audio.

use std::io::Cursor;

use hrpmkv::{MkvCodec, MkvDemuxer};

/// Emit an EBML element: raw id bytes, a 1- or 2-byte size, then the payload.
fn el(id: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(id);
    let len = payload.len();
    if len < 0x7F {
        out.push(0x80 | len as u8);
    } else {
        assert!(len < 0x3FFF);
        out.push(0x40 | (len >> 8) as u8);
        out.push((len & 0xFF) as u8);
    }
    out.extend_from_slice(payload);
    out
}

fn uint_el(id: &[u8], value: u64) -> Vec<u8> {
    let mut bytes = value.to_be_bytes().to_vec();
    while bytes.len() > 1 && bytes[0] == 0 {
        bytes.remove(0);
    }
    el(id, &bytes)
}

fn simple_block(track: u8, rel_tc: i16, flags: u8, data: &[u8]) -> Vec<u8> {
    let mut payload = vec![0x80 | track];
    payload.extend_from_slice(&rel_tc.to_be_bytes());
    payload.push(flags);
    payload.extend_from_slice(data);
    el(&[0xA3], &payload)
}

fn pcm_mkv(clusters: &[Vec<u8>]) -> Vec<u8> {
    let mut file = Vec::new();

    // EBML header, empty body.
    file.extend_from_slice(&el(&[0x1A, 0x45, 0xDF, 0xA3], &[]));

    let info = {
        let mut body = uint_el(&[0x2A, 0xD7, 0xB1], 1_000_000);
        // Duration: 2000 ticks (= 2 s at the default scale), 4-byte float.
        body.extend_from_slice(&el(&[0x44, 0x89], &2000.0f32.to_be_bytes()));
        el(&[0x15, 0x49, 0xA9, 0x66], &body)
    };

    let tracks = {
        let audio = {
            let mut body = el(&[0xB5], &48_000.0f32.to_be_bytes());
            body.extend_from_slice(&uint_el(&[0x9F], 2));
            body.extend_from_slice(&uint_el(&[0x62, 0x64], 16));
            el(&[0xE1], &body)
        };
        let mut entry = uint_el(&[0xD7], 1);
        entry.extend_from_slice(&uint_el(&[0x83], 2));
        entry.extend_from_slice(&el(&[0x86], b"A_PCM/INT/LIT"));
        entry.extend_from_slice(&audio);
        el(&[0x16, 0x54, 0xAE, 0x6B], &el(&[0xAE], &entry))
    };

    let mut segment_body = info;
    segment_body.extend_from_slice(&tracks);
    for cluster in clusters {
        segment_body.extend_from_slice(cluster);
    }

    file.extend_from_slice(&el(&[0x18, 0x53, 0x80, 0x67], &segment_body));
    file
}

fn cluster(timecode: u64, blocks: &[Vec<u8>]) -> Vec<u8> {
    let mut body = uint_el(&[0xE7], timecode);
    for b in blocks {
        body.extend_from_slice(b);
    }
    el(&[0x1F, 0x43, 0xB6, 0x75], &body)
}

#[test]
fn selects_pcm_track_and_reports_info() {
    let mkv = pcm_mkv(&[]);
    let demux = MkvDemuxer::open(Cursor::new(mkv)).unwrap();

    let info = demux.audio_info();
    assert_eq!(info.codec, MkvCodec::PcmInt);
    assert_eq!(info.channels, 2);
    assert_eq!(info.bit_depth, 16);
    assert_eq!(info.sample_rate, 48_000.0);
    assert_eq!(info.track_number, 1);
    assert_eq!(info.timecode_scale_ns, 1_000_000);
    assert_eq!(info.duration_ns, Some(2_000_000_000));
}

#[test]
fn pcm_blocks_pass_through_with_pts() {
    let audio_a: Vec<u8> = (0..16).collect();
    let audio_b: Vec<u8> = (16..32).collect();

    let mkv = pcm_mkv(&[
        cluster(0, &[simple_block(1, 0, 0x80, &audio_a)]),
        cluster(100, &[simple_block(1, 5, 0x80, &audio_b)]),
    ]);
    let mut demux = MkvDemuxer::open(Cursor::new(mkv)).unwrap();

    let first = demux.read_packet().unwrap().unwrap();
    assert_eq!(first.data, audio_a);
    assert_eq!(first.pts_ns, 0);
    assert!(first.keyframe);

    let second = demux.read_packet().unwrap().unwrap();
    assert_eq!(second.data, audio_b);
    assert_eq!(second.pts_ns, 105 * 1_000_000);

    assert!(demux.read_packet().unwrap().is_none());
}

#[test]
fn total_pcm_bytes_are_preserved() {
    let mut total_in = 0usize;
    let mut clusters = Vec::new();
    for i in 0..5u8 {
        let data: Vec<u8> = (0..64).map(|b| b ^ i).collect();
        total_in += data.len();
        clusters.push(cluster(i as u64 * 10, &[simple_block(1, 0, 0x80, &data)]));
    }

    let mkv = pcm_mkv(&clusters);
    let mut demux = MkvDemuxer::open(Cursor::new(mkv)).unwrap();

    let mut total_out = 0usize;
    let mut last_pts = i64::MIN;
    while let Some(pkt) = demux.read_packet().unwrap() {
        assert!(pkt.pts_ns >= last_pts, "timestamps must be non-decreasing");
        last_pts = pkt.pts_ns;
        total_out += pkt.data.len();
    }
    assert_eq!(total_out, total_in);
}

#[test]
fn laced_frames_share_block_pts() {
    // Xiph lacing: two 4-byte laced frames plus the trailing frame.
    let mut payload = Vec::new();
    payload.push(2u8); // lace count
    payload.push(4u8);
    payload.push(4u8);
    payload.extend_from_slice(&[1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]);

    let block = {
        let mut b = vec![0x81, 0x00, 0x07, 0x02]; // track 1, rel 7, xiph lacing
        b.extend_from_slice(&payload);
        el(&[0xA3], &b)
    };

    let mkv = pcm_mkv(&[cluster(1, &[block])]);
    let mut demux = MkvDemuxer::open(Cursor::new(mkv)).unwrap();

    for expected in [&[1u8, 1, 1, 1][..], &[2, 2, 2, 2], &[3, 3, 3, 3]] {
        let pkt = demux.read_packet().unwrap().unwrap();
        assert_eq!(pkt.data, expected);
        assert_eq!(pkt.pts_ns, 8 * 1_000_000);
    }
}

#[test]
fn blocks_for_other_tracks_are_skipped() {
    let mkv = pcm_mkv(&[cluster(
        0,
        &[
            simple_block(2, 0, 0x80, &[9, 9, 9, 9]),
            simple_block(1, 0, 0x80, &[1, 2, 3, 4]),
        ],
    )]);
    let mut demux = MkvDemuxer::open(Cursor::new(mkv)).unwrap();

    let pkt = demux.read_packet().unwrap().unwrap();
    assert_eq!(pkt.data, vec![1, 2, 3, 4]);
    assert!(demux.read_packet().unwrap().is_none());
}

#[test]
fn garbage_is_rejected() {
    let err = MkvDemuxer::open(Cursor::new(b"OggS not matroska".to_vec()));
    assert!(err.is_err());
}

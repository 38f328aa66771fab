//! DSD frame synthesis: DoP encapsulation, native DSD_U32_BE packing, and
//! the neutral center pattern used to leave DSD mode without clicks.
//!
//! DSF stores each channel in `block_size`-byte planes with LSB-first bit
//! order, so its bytes are bit-reversed before hitting the wire. DFF is
//! byte-interleaved across channels and already MSB-first.

pub const DOP_MARKER_8LSB: u8 = 0x05;
pub const DOP_MARKER_8MSB: u8 = 0xFA;

pub const DSD_FADEOUT_MS: u32 = 20;
pub const DSD_POSTROLL_MS: u32 = 60;

/// How the raw DSD bytes of one read block are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsdLayout {
    /// DSF: per-channel planes of `per_ch` bytes, LSB-first in time.
    PlanarLsbFirst,
    /// DFF: one byte per channel, round-robin, MSB-first in time.
    InterleavedMsbFirst,
}

pub fn bitrev8(mut x: u8) -> u8 {
    x = (x >> 4) | (x << 4);
    x = ((x & 0xCC) >> 2) | ((x & 0x33) << 2);
    x = ((x & 0xAA) >> 1) | ((x & 0x55) << 1);
    x
}

fn toggle(marker: &mut u8) -> u8 {
    let m = *marker;
    *marker = if m == DOP_MARKER_8LSB {
        DOP_MARKER_8MSB
    } else {
        DOP_MARKER_8LSB
    };
    m
}

/// Number of neutral DoP frames written before the first real sample so the
/// DAC can lock onto the marker sequence.
pub fn dop_prefill_frames(dsd_rate: u32) -> usize {
    if dsd_rate >= 11_289_600 {
        4096
    } else {
        2048
    }
}

/// Frame count for a duration at the PCM wire rate.
pub fn frames_from_ms(pcm_rate: u32, ms: u32) -> usize {
    (pcm_rate as u64 * ms as u64 / 1000) as usize
}

/// Fetch the two source channels of frame `i` from a block.
///
/// `width` is the number of consecutive DSD bytes a wire frame carries per
/// channel (2 for DoP, 4 for native). Mono input duplicates channel 0.
fn fetch<const W: usize>(
    blk: &[u8],
    layout: DsdLayout,
    channels: usize,
    per_ch: usize,
    i: usize,
) -> ([u8; W], [u8; W]) {
    let right = if channels >= 2 { 1 } else { 0 };
    let mut l = [0u8; W];
    let mut r = [0u8; W];

    match layout {
        DsdLayout::PlanarLsbFirst => {
            for k in 0..W {
                l[k] = blk[i * W + k];
                r[k] = blk[right * per_ch + i * W + k];
            }
        }
        DsdLayout::InterleavedMsbFirst => {
            let base = i * channels * W;
            for k in 0..W {
                l[k] = blk[base + k * channels];
                r[k] = blk[base + k * channels + right];
            }
        }
    }
    (l, r)
}

/// Encode a block of raw DSD bytes into DoP frames inside S32_LE.
///
/// One PCM frame carries 16 DSD bits (two bytes) per channel; the wire word
/// is `[0x00, later byte, earlier byte, marker]` with the marker alternating
/// 0x05/0xFA per frame and shared by both channels of a frame.
pub fn pack_dop(
    blk: &[u8],
    layout: DsdLayout,
    channels: usize,
    per_ch: usize,
    marker: &mut u8,
    out: &mut Vec<u8>,
) -> usize {
    let frames = per_ch / 2;
    out.reserve(frames * 8);
    let reverse = layout == DsdLayout::PlanarLsbFirst;

    for i in 0..frames {
        let (l, r) = fetch::<2>(blk, layout, channels, per_ch, i);
        let (l0, l1, r0, r1) = if reverse {
            (bitrev8(l[0]), bitrev8(l[1]), bitrev8(r[0]), bitrev8(r[1]))
        } else {
            (l[0], l[1], r[0], r[1])
        };

        let m = toggle(marker);
        out.extend_from_slice(&[0x00, l1, l0, m]);
        out.extend_from_slice(&[0x00, r1, r0, m]);
    }
    frames
}

/// Encode a block of raw DSD bytes into native DSD_U32_BE frames: 32 bits
/// (four bytes) per channel per frame, earliest byte first.
pub fn pack_native(
    blk: &[u8],
    layout: DsdLayout,
    channels: usize,
    per_ch: usize,
    out: &mut Vec<u8>,
) -> usize {
    let frames = per_ch / 4;
    out.reserve(frames * 8);
    let reverse = layout == DsdLayout::PlanarLsbFirst;

    for i in 0..frames {
        let (l, r) = fetch::<4>(blk, layout, channels, per_ch, i);
        if reverse {
            out.extend_from_slice(&[bitrev8(l[0]), bitrev8(l[1]), bitrev8(l[2]), bitrev8(l[3])]);
            out.extend_from_slice(&[bitrev8(r[0]), bitrev8(r[1]), bitrev8(r[2]), bitrev8(r[3])]);
        } else {
            out.extend_from_slice(&l);
            out.extend_from_slice(&r);
        }
    }
    frames
}

/// Build `frames` frames of the DSD center pattern (alternating 0xAA/0x55),
/// in DoP or native framing. Used for the DoP prefill, the fade-out, the
/// period-sized center pad and the post-roll.
pub fn center_pattern(frames: usize, dop: bool, marker: &mut u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(frames * 8);

    for i in 0..frames {
        let a = if i & 1 == 1 { 0x55 } else { 0xAA };
        let b = !a;
        if dop {
            let m = toggle(marker);
            out.extend_from_slice(&[0x00, a, b, m]);
            out.extend_from_slice(&[0x00, a, b, m]);
        } else {
            out.extend_from_slice(&[a, b, a, b]);
            out.extend_from_slice(&[a, b, a, b]);
        }
    }
    out
}

//! The per-file playback controller.
//!
//! One call to [`play`] drives a single file from start to end or
//! interruption: it negotiates the wire format, opens the sink, builds the
//! source reader (decoder, raw DSD block loop, or MKV demuxer), paces frames
//! into the sink with underrun recovery, polls the keyboard once per write
//! iteration and emits progress ticks. The return value tells the queue
//! driver where to go next.

use std::thread::sleep;
use std::time::Duration;

use hrpcodec::{CodecError, CodecKind};
use hrpmetadata::{FileKind, FileMetadata};
use hrpmkv::MkvDemuxer;

use crate::context::PlayerContext;
use crate::dsd::{
    center_pattern, dop_prefill_frames, frames_from_ms, pack_dop, pack_native, DsdLayout,
    DOP_MARKER_8LSB, DSD_FADEOUT_MS, DSD_POSTROLL_MS,
};
use crate::keyboard::{KeyCode, Keyboard};
use crate::pcm::{downmix_pcm_bytes, pack_frames};
use crate::progress;
use crate::reader::{CachedReader, SharedRing};
use crate::ringbuffer::{RingBuffer, RINGBUFFER_MAX_BYTES, RINGBUFFER_MIN_BYTES};
use crate::sink::{
    choose_wire_format, normalize_pcm_rate, AlsaSink, DsdMode, PcmSink, SinkError, WireChoice,
};
use crate::AudioError;

/// Where the queue driver should go after this file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Next,
    Prev,
    Quit,
}

/// Per-file runtime state.
#[derive(Debug)]
pub struct Playback {
    pub file_number: usize,
    pub total_number: usize,
    pub identifier: String,
    pub current_samples: u64,
    pub file_size: u64,
    pub bytes_left: u64,
    /// Ring-buffer ceiling for this file, for the `%B` progress field.
    pub ring_max: usize,
    pub fm: FileMetadata,
    pub rb: Option<SharedRing>,
}

fn ring_target_capacity(file_size: usize, ceiling: usize) -> usize {
    if file_size == 0 {
        return RINGBUFFER_MIN_BYTES;
    }
    file_size.min(ceiling).max(RINGBUFFER_MIN_BYTES)
}

fn ring_target_max(file_size: usize, ceiling: usize) -> usize {
    if file_size > 0 && file_size < ceiling {
        file_size.max(RINGBUFFER_MIN_BYTES)
    } else {
        ceiling
    }
}

impl Playback {
    pub fn new(
        file_number: usize,
        total_number: usize,
        fm: FileMetadata,
        dop: bool,
    ) -> Result<Playback, AudioError> {
        let identifier = identifier(&fm, dop)?;
        let file_size = fm.file_size;
        Ok(Playback {
            file_number,
            total_number,
            identifier,
            current_samples: 0,
            file_size,
            bytes_left: file_size,
            ring_max: ring_target_max(file_size as usize, RINGBUFFER_MAX_BYTES),
            fm,
            rb: None,
        })
    }

    /// Attach a read-ahead ring buffer sized for this file. `cache_size` is
    /// the configured ceiling; 0 leaves the playback on direct reads.
    pub fn prepare_ringbuffer(&mut self, cache_size: usize) -> Result<(), AudioError> {
        if cache_size == 0 {
            self.rb = None;
            return Ok(());
        }
        if self.rb.is_some() {
            return Ok(());
        }

        let ceiling = cache_size.clamp(RINGBUFFER_MIN_BYTES, RINGBUFFER_MAX_BYTES);
        let capacity = ring_target_capacity(self.file_size as usize, ceiling);
        let max = ring_target_max(self.file_size as usize, ceiling);
        self.ring_max = max;

        let rb = RingBuffer::new(RINGBUFFER_MIN_BYTES, capacity, max)?;
        self.rb = Some(std::rc::Rc::new(std::cell::RefCell::new(rb)));
        Ok(())
    }

    pub fn drop_ringbuffer(&mut self) {
        self.rb = None;
    }

    pub fn reset_ringbuffer(&self) {
        if let Some(rb) = &self.rb {
            rb.borrow_mut().reset();
        }
    }

    pub fn ring_len(&self) -> usize {
        self.rb.as_ref().map(|rb| rb.borrow().len()).unwrap_or(0)
    }
}

/// The `codec/rate/bits` string shown in the progress line.
fn identifier(fm: &FileMetadata, dop: bool) -> Result<String, AudioError> {
    let mut id = String::new();

    match fm.kind {
        FileKind::Wav => id.push_str("WAV/"),
        FileKind::Flac => id.push_str("FLAC/"),
        FileKind::Mp3 => id.push_str("MP3/"),
        FileKind::Dsf => id.push_str("DSF/"),
        FileKind::Dff => id.push_str("DFF/"),
        FileKind::Mkv => {
            let webm = fm
                .path
                .extension()
                .map(|e| e.eq_ignore_ascii_case("webm"))
                .unwrap_or(false);
            id.push_str(if webm { "WEBM/" } else { "MKV/" });
        }
    }

    let rate = match fm.sample_rate {
        44_100 => "44.1kHz",
        48_000 => "48kHz",
        88_200 => "88.2kHz",
        96_000 => "96kHz",
        176_400 => "176.4kHz",
        192_000 => "192kHz",
        352_800 => "352.8kHz",
        384_000 => "384kHz",
        705_600 => "705.6kHz",
        768_000 => "768kHz",
        2_822_400 => {
            if dop {
                "176.4kHz"
            } else {
                "2.8224MHz"
            }
        }
        5_644_800 => {
            if dop {
                "352.8kHz"
            } else {
                "5.6448MHz"
            }
        }
        11_289_600 => {
            if dop {
                "705.6kHz"
            } else {
                "11.2896MHz"
            }
        }
        22_579_200 => {
            if dop {
                "1.4112MHz"
            } else {
                "22.5792MHz"
            }
        }
        45_158_400 => {
            if dop {
                "2.8224MHz"
            } else {
                "45.1584MHz"
            }
        }
        other => {
            return Err(AudioError::UnsupportedFormat(format!(
                "sample rate {other}Hz"
            )))
        }
    };
    id.push_str(rate);
    id.push('/');

    match fm.bits_per_sample {
        1 => id.push_str("1bit"),
        16 => id.push_str("16bits"),
        24 => id.push_str("24bits"),
        32 => id.push_str("32bits"),
        other => {
            return Err(AudioError::UnsupportedFormat(format!(
                "{other} bits per sample"
            )))
        }
    }

    Ok(id)
}

/// Write a whole block, retrying the not-yet-written tail across underruns.
fn writei_all<S: PcmSink + ?Sized>(
    sink: &mut S,
    buf: &[u8],
    frames: usize,
    bytes_per_frame: usize,
) -> Result<(), AudioError> {
    let mut off = 0usize;
    let mut remaining = frames;

    while remaining > 0 {
        match sink.writei(&buf[off..off + remaining * bytes_per_frame]) {
            Ok(n) => {
                let n = n.min(remaining);
                off += n * bytes_per_frame;
                remaining -= n;
            }
            Err(SinkError::Underrun) => {
                tracing::debug!("sink underrun, preparing and retrying");
                sink.prepare()
                    .map_err(|e| AudioError::SinkFatal(e.to_string()))?;
            }
            Err(e) => {
                sink.try_recover(&e, true)
                    .map_err(|_| AudioError::SinkFatal(e.to_string()))?;
            }
        }
    }
    Ok(())
}

enum KeyEvent {
    None,
    Next,
    Prev,
    Quit,
    /// Relative seek in seconds.
    Seek(i64),
}

/// Poll the keyboard once and dispatch. While paused this loops with a
/// ~10 ms sleep instead of returning, so the caller writes no frames.
/// The returned note is the developer volume readout, when enabled.
fn poll_keyboard(ctx: &mut PlayerContext) -> (KeyEvent, Option<String>) {
    let mut note = None;

    if !ctx.keyboard_active {
        return (KeyEvent::None, note);
    }

    loop {
        match Keyboard::poll() {
            Some(KeyCode::Q) => return (KeyEvent::Quit, note),
            Some(KeyCode::Enter) => return (KeyEvent::Next, note),
            Some(KeyCode::Backslash) => return (KeyEvent::Prev, note),
            Some(KeyCode::Up) => return (KeyEvent::Seek(60), note),
            Some(KeyCode::Down) => return (KeyEvent::Seek(-60), note),
            Some(KeyCode::Left) => return (KeyEvent::Seek(-15), note),
            Some(KeyCode::Right) => return (KeyEvent::Seek(15), note),
            Some(KeyCode::Space) => {
                if ctx.device.is_paused {
                    ctx.device.is_paused = false;
                    return (KeyEvent::None, note);
                }
                ctx.device.is_paused = true;
                sleep(Duration::from_millis(10));
            }
            Some(key @ (KeyCode::Comma | KeyCode::Period)) => {
                // Volume steps are ignored while muted.
                if ctx.device.has_volume && !ctx.device.is_muted {
                    let delta = if key == KeyCode::Comma { -5 } else { 5 };
                    let target = (ctx.device.volume + delta).clamp(0, 100);
                    let _ = ctx.device.set_volume(target);
                    if ctx.options.developer {
                        note = Some(format!(" Volume: {target}"));
                    }
                }
                return (KeyEvent::None, note);
            }
            Some(KeyCode::M) => {
                if ctx.device.has_volume {
                    if ctx.device.is_muted {
                        let restored = ctx.device.prev_volume;
                        ctx.device.is_muted = false;
                        let _ = ctx.device.set_volume(restored);
                        if ctx.options.developer {
                            note = Some(format!(" Volume: {restored}"));
                        }
                    } else {
                        ctx.device.is_muted = true;
                        let _ = ctx.device.set_volume(0);
                        if ctx.options.developer {
                            note = Some(" Volume: 0".to_string());
                        }
                    }
                }
                return (KeyEvent::None, note);
            }
            Some(KeyCode::Slash) => {
                if ctx.device.has_volume {
                    ctx.device.is_muted = false;
                    let _ = ctx.device.set_volume(100);
                    if ctx.options.developer {
                        note = Some(" Volume: 100".to_string());
                    }
                }
                return (KeyEvent::None, note);
            }
            None => {
                if ctx.device.is_paused {
                    sleep(Duration::from_millis(10));
                    continue;
                }
                return (KeyEvent::None, note);
            }
        }
    }
}

/// Print the post-progress developer note, when present.
fn print_note(note: Option<String>) {
    if let Some(note) = note {
        print!("\n{note}\n");
        use std::io::Write;
        let _ = std::io::stdout().flush();
    }
}

/// Play one file through the active device.
pub fn play(pb: &mut Playback, ctx: &mut PlayerContext) -> Result<Advance, AudioError> {
    let choice = choose_wire_format(&pb.fm, &ctx.device.capabilities, ctx.options.dop)?;
    normalize_pcm_rate(&mut pb.fm, choice.dsd_mode);

    let mut sink = AlsaSink::open(&ctx.device.device, &choice, pb.fm.pcm_rate, ctx.options.dop)?;
    ctx.device.is_paused = false;

    let advance = play_with_sink(pb, ctx, &mut sink, &choice)?;
    if advance == Advance::Quit {
        let _ = sink.drop_pending();
    }
    Ok(advance)
}

fn play_with_sink<S: PcmSink>(
    pb: &mut Playback,
    ctx: &mut PlayerContext,
    sink: &mut S,
    choice: &WireChoice,
) -> Result<Advance, AudioError> {
    pb.current_samples = 0;
    pb.bytes_left = pb.file_size;

    match pb.fm.kind {
        FileKind::Wav | FileKind::Flac | FileKind::Mp3 => play_decoder(pb, ctx, sink, choice),
        FileKind::Dsf => play_dsf(pb, ctx, sink, choice),
        FileKind::Dff => play_dff(pb, ctx, sink, choice),
        FileKind::Mkv => play_mkv(pb, ctx, sink),
    }
}

fn play_decoder<S: PcmSink>(
    pb: &mut Playback,
    ctx: &mut PlayerContext,
    sink: &mut S,
    choice: &WireChoice,
) -> Result<Advance, AudioError> {
    let kind = match pb.fm.kind {
        FileKind::Wav => CodecKind::Wav,
        FileKind::Flac => CodecKind::Flac,
        _ => CodecKind::Mp3,
    };

    pb.reset_ringbuffer();
    let source = CachedReader::open(&pb.fm.path, pb.rb.clone(), pb.file_size)?;
    let mut dec = hrpcodec::open_decoder(kind, source)?;

    let channels = dec.info().channels.max(1) as usize;
    let period = sink.period_frames().max(1);
    let bytes_per_frame = choice.bytes_per_frame();

    let mut input = vec![0i32; period * channels];
    let mut out: Vec<u8> = Vec::with_capacity(period * bytes_per_frame);

    loop {
        let frames = dec.read_frames(&mut input)?;
        if frames == 0 {
            break;
        }

        out.clear();
        pack_frames(&input, channels, frames, choice.container, &mut out);
        writei_all(sink, &out, frames, bytes_per_frame)?;
        pb.current_samples += frames as u64;

        let (event, note) = poll_keyboard(ctx);
        match event {
            KeyEvent::Quit => {
                progress::print_done(pb, ctx);
                return Ok(Advance::Quit);
            }
            KeyEvent::Next => return Ok(Advance::Next),
            KeyEvent::Prev => return Ok(Advance::Prev),
            KeyEvent::Seek(seconds) => {
                let per_second = if pb.fm.duration > 0.0 && pb.fm.total_samples > 0 {
                    pb.fm.total_samples as f64 / pb.fm.duration
                } else {
                    pb.fm.sample_rate as f64
                };
                let delta = (seconds as f64 * per_second) as i64;
                let target = (pb.current_samples as i64 + delta)
                    .clamp(0, pb.fm.total_samples as i64) as u64;

                match dec.seek_to(target) {
                    Ok(()) => {}
                    Err(CodecError::SeekUnsupported) => {
                        // Backward seek: reopen from the start and skip up.
                        let source =
                            CachedReader::open(&pb.fm.path, pb.rb.clone(), pb.file_size)?;
                        dec = hrpcodec::open_decoder(kind, source)?;
                        dec.seek_to(target)?;
                    }
                    Err(e) => return Err(e.into()),
                }
                pb.current_samples = target;
                sink.reset()
                    .map_err(|e| AudioError::SinkFatal(e.to_string()))?;
            }
            KeyEvent::None => {}
        }

        progress::print_tick(pb, ctx);
        print_note(note);
    }

    let _ = sink.drain();
    pb.bytes_left = 0;
    pb.reset_ringbuffer();
    progress::print_done(pb, ctx);
    Ok(Advance::Next)
}

fn play_dsf<S: PcmSink>(
    pb: &mut Playback,
    ctx: &mut PlayerContext,
    sink: &mut S,
    choice: &WireChoice,
) -> Result<Advance, AudioError> {
    let mut source = CachedReader::open(&pb.fm.path, pb.rb.clone(), pb.file_size)?;
    source.seek_to(hrpmetadata::dsf::DSF_AUDIO_OFFSET)?;
    source.prefill();

    let stride = if pb.fm.block_size > 0 {
        pb.fm.block_size
    } else {
        4096
    };
    let data_size = pb.fm.data_size;

    play_dsd_stream(
        pb,
        ctx,
        sink,
        choice,
        &mut source,
        DsdLayout::PlanarLsbFirst,
        stride as usize,
        data_size,
    )
}

fn play_dff<S: PcmSink>(
    pb: &mut Playback,
    ctx: &mut PlayerContext,
    sink: &mut S,
    choice: &WireChoice,
) -> Result<Advance, AudioError> {
    let mut source = CachedReader::open(&pb.fm.path, pb.rb.clone(), pb.file_size)?;

    let mut id = [0u8; 4];
    source.read_exact_buf(&mut id)?;
    if &id != b"FRM8" {
        return Err(AudioError::UnsupportedFormat("not a DFF file".into()));
    }
    let mut sz = [0u8; 8];
    source.read_exact_buf(&mut sz)?;
    source.read_exact_buf(&mut id)?;
    if &id != b"DSD " {
        return Err(AudioError::UnsupportedFormat("invalid DFF form type".into()));
    }

    loop {
        if source.read_exact_buf(&mut id).is_err() {
            return Err(AudioError::UnsupportedFormat(
                "DFF audio chunk missing".into(),
            ));
        }
        source.read_exact_buf(&mut sz)?;
        let chunk_size = u64::from_be_bytes(sz);

        match &id {
            b"DSD " => {
                source.prefill();
                return play_dsd_stream(
                    pb,
                    ctx,
                    sink,
                    choice,
                    &mut source,
                    DsdLayout::InterleavedMsbFirst,
                    4096,
                    chunk_size,
                );
            }
            b"DST " => {
                return Err(AudioError::UnsupportedFormat(
                    "DST-compressed DFF is not supported".into(),
                ))
            }
            _ => {
                let skip = chunk_size + (chunk_size & 1);
                source.seek_to(source.position() + skip)?;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn play_dsd_stream<S: PcmSink>(
    pb: &mut Playback,
    ctx: &mut PlayerContext,
    sink: &mut S,
    choice: &WireChoice,
    source: &mut CachedReader,
    layout: DsdLayout,
    stride_hint: usize,
    mut bytes_left: u64,
) -> Result<Advance, AudioError> {
    let dop = choice.dsd_mode == DsdMode::Dop;
    let channels = pb.fm.channels.max(1) as usize;
    let align = if dop { 2 } else { 4 };
    let stride = (stride_hint.max(align) / align) * align;
    let bytes_per_frame = 8usize;
    let samples_per_frame: u64 = if dop { 16 } else { 32 };
    let mut marker = DOP_MARKER_8LSB;

    if dop {
        // Neutral prefill so the DAC can lock onto the marker sequence.
        let mut prefill_marker = DOP_MARKER_8LSB;
        let prefill = center_pattern(
            dop_prefill_frames(pb.fm.sample_rate),
            true,
            &mut prefill_marker,
        );
        let _ = sink.writei(&prefill);
    }

    pb.bytes_left = bytes_left;
    let mut blk = vec![0u8; channels * stride];
    let mut out: Vec<u8> = Vec::with_capacity((stride / align) * bytes_per_frame);

    'stream: while bytes_left > 0 {
        let per_ch_avail = (bytes_left / channels as u64) as usize;
        let per_ch = (stride.min(per_ch_avail) / align) * align;
        if per_ch < align {
            break;
        }

        let to_read = channels * per_ch;
        if source.read_exact_buf(&mut blk[..to_read]).is_err() {
            // Truncated payload: end cleanly at the current position.
            break;
        }
        bytes_left -= to_read as u64;
        pb.bytes_left = bytes_left;

        out.clear();
        let frames = if dop {
            pack_dop(&blk[..to_read], layout, channels, per_ch, &mut marker, &mut out)
        } else {
            pack_native(&blk[..to_read], layout, channels, per_ch, &mut out)
        };

        writei_all(sink, &out, frames, bytes_per_frame)?;
        pb.current_samples += frames as u64 * samples_per_frame;

        let (event, note) = poll_keyboard(ctx);
        match event {
            KeyEvent::Quit => {
                progress::print_done(pb, ctx);
                return Ok(Advance::Quit);
            }
            KeyEvent::Next => return Ok(Advance::Next),
            KeyEvent::Prev => return Ok(Advance::Prev),
            KeyEvent::Seek(seconds) => {
                if layout == DsdLayout::InterleavedMsbFirst {
                    // DFF has no in-file seek; skip to the next file.
                    return Ok(Advance::Next);
                }

                let delta = seconds * pb.fm.sample_rate as i64;
                let new_pos = pb.current_samples as i64 + delta;
                let mut aligned = 0u64;

                if new_pos <= 0 {
                    source.seek_to(hrpmetadata::dsf::DSF_AUDIO_OFFSET)?;
                    source.prefill();
                    pb.current_samples = 0;
                } else {
                    let group = {
                        let bs = if pb.fm.block_size > 0 {
                            pb.fm.block_size as u64
                        } else {
                            4096
                        };
                        channels as u64 * bs
                    };
                    let approx = (new_pos as u64 / 8) * channels as u64;
                    aligned = approx / group * group;
                    if aligned > pb.fm.data_size {
                        aligned = pb.fm.data_size / group * group;
                    }
                    source.seek_to(hrpmetadata::dsf::DSF_AUDIO_OFFSET + aligned)?;
                    source.prefill();
                    pb.current_samples =
                        ((aligned / channels as u64) * 8).min(pb.fm.total_samples);
                }

                bytes_left = pb.fm.data_size - aligned;
                pb.bytes_left = bytes_left;
                sink.reset()
                    .map_err(|e| AudioError::SinkFatal(e.to_string()))?;
                continue 'stream;
            }
            KeyEvent::None => {}
        }

        progress::print_tick(pb, ctx);
        print_note(note);
    }

    // Leave DSD mode without clicks: fade-out, one period of center pattern,
    // then the post-roll.
    let fade = frames_from_ms(pb.fm.pcm_rate, DSD_FADEOUT_MS);
    let buf = center_pattern(fade, dop, &mut marker);
    writei_all(sink, &buf, fade, bytes_per_frame)?;

    let period = sink.period_frames();
    if period > 0 {
        let buf = center_pattern(period, dop, &mut marker);
        writei_all(sink, &buf, period, bytes_per_frame)?;
    }

    let post = frames_from_ms(pb.fm.pcm_rate, DSD_POSTROLL_MS);
    let buf = center_pattern(post, dop, &mut marker);
    writei_all(sink, &buf, post, bytes_per_frame)?;

    let _ = sink.drain();
    pb.bytes_left = 0;
    pb.reset_ringbuffer();
    progress::print_done(pb, ctx);
    Ok(Advance::Next)
}

fn play_mkv<S: PcmSink>(
    pb: &mut Playback,
    ctx: &mut PlayerContext,
    sink: &mut S,
) -> Result<Advance, AudioError> {
    pb.reset_ringbuffer();
    let source = CachedReader::open(&pb.fm.path, pb.rb.clone(), pb.file_size)?;
    let mut demux = MkvDemuxer::open(source)?;
    let info = demux.audio_info().clone();

    let in_channels = if pb.fm.channels > 0 {
        pb.fm.channels as usize
    } else {
        info.channels as usize
    };
    let bits = if pb.fm.bits_per_sample > 0 {
        pb.fm.bits_per_sample
    } else {
        info.bit_depth as u32
    };
    let bytes_per_sample = (bits / 8) as usize;
    let sample_rate = if pb.fm.sample_rate > 0 {
        pb.fm.sample_rate
    } else {
        info.sample_rate.round() as u32
    };

    if in_channels == 0 || bytes_per_sample == 0 || sample_rate == 0 {
        return Err(AudioError::UnsupportedFormat(format!(
            "invalid PCM geometry ch={in_channels} bits={bits} rate={sample_rate}"
        )));
    }

    let in_bytes_per_frame = in_channels * bytes_per_sample;
    let out_bytes_per_frame = 2 * bytes_per_sample;
    let mut downmix: Vec<u8> = Vec::new();

    loop {
        let (event, note) = poll_keyboard(ctx);
        match event {
            KeyEvent::Quit => {
                progress::print_done(pb, ctx);
                return Ok(Advance::Quit);
            }
            KeyEvent::Next => return Ok(Advance::Next),
            KeyEvent::Prev => return Ok(Advance::Prev),
            KeyEvent::Seek(seconds) => {
                let per_second = if pb.fm.duration > 0.0 && pb.fm.total_samples > 0 {
                    pb.fm.total_samples as f64 / pb.fm.duration
                } else {
                    sample_rate as f64
                };
                let delta = (seconds as f64 * per_second) as i64;
                let mut target = (pb.current_samples as i64 + delta).max(0) as u64;
                if pb.fm.total_samples > 0 {
                    target = target.min(pb.fm.total_samples);
                }
                pb.current_samples = target;
                let target_ns = (target as u128 * 1_000_000_000 / sample_rate as u128) as i64;

                // No cue table: reopen from the start and discard packets
                // below the target timestamp.
                pb.reset_ringbuffer();
                let source = CachedReader::open(&pb.fm.path, pb.rb.clone(), pb.file_size)?;
                demux = MkvDemuxer::open(source)?;
                loop {
                    match demux.read_packet()? {
                        None => break,
                        Some(pkt) if pkt.pts_ns >= 0 && pkt.pts_ns >= target_ns => break,
                        Some(_) => {}
                    }
                }
                sink.reset()
                    .map_err(|e| AudioError::SinkFatal(e.to_string()))?;
            }
            KeyEvent::None => {}
        }

        let Some(pkt) = demux.read_packet()? else {
            break;
        };

        let in_frames = pkt.data.len() / in_bytes_per_frame;
        if in_frames == 0 {
            continue;
        }

        if in_channels == 2 {
            writei_all(sink, &pkt.data, in_frames, out_bytes_per_frame)?;
        } else {
            downmix.clear();
            downmix_pcm_bytes(&pkt.data, bytes_per_sample, in_channels, &mut downmix);
            writei_all(sink, &downmix, in_frames, out_bytes_per_frame)?;
        }

        if pkt.pts_ns >= 0 {
            pb.current_samples =
                (pkt.pts_ns as u128 * sample_rate as u128 / 1_000_000_000) as u64;
        } else {
            pb.current_samples += in_frames as u64;
        }

        progress::print_tick(pb, ctx);
        print_note(note);
    }

    if pb.fm.total_samples > 0 && pb.current_samples > pb.fm.total_samples {
        pb.current_samples = pb.fm.total_samples;
    }

    let _ = sink.drain();
    pb.bytes_left = 0;
    pb.reset_ringbuffer();
    progress::print_done(pb, ctx);
    Ok(Advance::Next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PlaybackOptions;
    use crate::device::{ActiveDevice, Capabilities};
    use crate::sink::WireFormat;
    use hrpmetadata::Tags;
    use std::io::Write as _;
    use std::path::{Path, PathBuf};

    struct MockSink {
        data: Vec<u8>,
        bytes_per_frame: usize,
        max_frames_per_write: usize,
        underrun_every: Option<usize>,
        writes: usize,
        prepares: usize,
        period: usize,
    }

    impl MockSink {
        fn new(bytes_per_frame: usize) -> MockSink {
            MockSink {
                data: Vec::new(),
                bytes_per_frame,
                max_frames_per_write: usize::MAX,
                underrun_every: None,
                writes: 0,
                prepares: 0,
                period: 4096,
            }
        }
    }

    impl PcmSink for MockSink {
        fn writei(&mut self, buf: &[u8]) -> Result<usize, SinkError> {
            self.writes += 1;
            if let Some(every) = self.underrun_every {
                if self.writes % every == 0 {
                    return Err(SinkError::Underrun);
                }
            }
            let frames = (buf.len() / self.bytes_per_frame).min(self.max_frames_per_write);
            self.data
                .extend_from_slice(&buf[..frames * self.bytes_per_frame]);
            Ok(frames)
        }

        fn try_recover(&mut self, _err: &SinkError, _silent: bool) -> Result<(), SinkError> {
            Ok(())
        }

        fn prepare(&mut self) -> Result<(), SinkError> {
            self.prepares += 1;
            Ok(())
        }

        fn reset(&mut self) -> Result<(), SinkError> {
            Ok(())
        }

        fn drain(&mut self) -> Result<(), SinkError> {
            Ok(())
        }

        fn drop_pending(&mut self) -> Result<(), SinkError> {
            Ok(())
        }

        fn buffer_frames(&self) -> usize {
            self.period * 4
        }

        fn period_frames(&self) -> usize {
            self.period
        }
    }

    fn test_ctx() -> PlayerContext {
        PlayerContext {
            options: PlaybackOptions {
                quiet: true,
                ..PlaybackOptions::default()
            },
            device: ActiveDevice {
                name: "mock".to_string(),
                device: "mock".to_string(),
                description: String::new(),
                hardware: 0,
                selem: String::new(),
                capabilities: Capabilities::default(),
                has_volume: false,
                volume: 70,
                prev_volume: 70,
                is_muted: false,
                is_paused: false,
            },
            keyboard_active: false,
        }
    }

    fn wav_file(path: &Path, rate: u32, bits: u16, samples: &[i32]) {
        let channels = 2u16;
        let bytes = bits / 8;
        let block_align = channels * bytes;
        let data_len = (samples.len() as u32 / 2) * block_align as u32;

        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&rate.to_le_bytes());
        out.extend_from_slice(&(rate * block_align as u32).to_le_bytes());
        out.extend_from_slice(&block_align.to_le_bytes());
        out.extend_from_slice(&bits.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for s in samples {
            match bits {
                16 => out.extend_from_slice(&(*s as i16).to_le_bytes()),
                24 => out.extend_from_slice(&s.to_le_bytes()[0..3]),
                _ => out.extend_from_slice(&s.to_le_bytes()),
            }
        }

        std::fs::File::create(path)
            .unwrap()
            .write_all(&out)
            .unwrap();
    }

    fn wav_metadata(path: &Path, rate: u32, bits: u32, frames: u64) -> FileMetadata {
        FileMetadata {
            kind: FileKind::Wav,
            path: path.to_path_buf(),
            file_size: std::fs::metadata(path).unwrap().len(),
            sample_rate: rate,
            pcm_rate: rate,
            channels: 2,
            bits_per_sample: bits,
            total_samples: frames,
            duration: frames as f64 / rate as f64,
            block_size: 0,
            data_size: 0,
            mkv: None,
            tags: Tags::default(),
        }
    }

    #[test]
    fn wav_delivers_every_frame_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ten_seconds.wav");

        // 10 seconds at 44.1 kHz stereo 16-bit.
        let frames = 441_000usize;
        let samples = vec![0i32; frames * 2];
        wav_file(&path, 44_100, 16, &samples);

        let mut pb =
            Playback::new(1, 1, wav_metadata(&path, 44_100, 16, frames as u64), false).unwrap();
        let mut ctx = test_ctx();
        let choice = WireChoice {
            format: WireFormat::S16Le,
            container: 16,
            dsd_mode: DsdMode::None,
        };

        let mut sink = MockSink::new(4);
        let advance = play_with_sink(&mut pb, &mut ctx, &mut sink, &choice).unwrap();

        assert_eq!(advance, Advance::Next);
        assert_eq!(sink.data.len(), frames * 4);
        assert_eq!(pb.current_samples, frames as u64);

        // The final progress line reads 100% with current == total time.
        ctx.options.quiet = false;
        ctx.options.output_template = "%t/%T %p".to_string();
        let line = progress::format_line(&pb, &ctx).unwrap();
        assert_eq!(line, "\r00:10/00:10 100%");
    }

    #[test]
    fn short_sink_writes_and_underruns_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bumpy.wav");

        let frames = 20_000usize;
        let samples: Vec<i32> = (0..frames * 2).map(|i| (i as i32) << 16).collect();
        wav_file(&path, 48_000, 16, &samples);

        let mut pb =
            Playback::new(1, 1, wav_metadata(&path, 48_000, 16, frames as u64), false).unwrap();
        let mut ctx = test_ctx();
        let choice = WireChoice {
            format: WireFormat::S16Le,
            container: 16,
            dsd_mode: DsdMode::None,
        };

        let mut sink = MockSink::new(4);
        sink.max_frames_per_write = 777;
        sink.underrun_every = Some(5);
        play_with_sink(&mut pb, &mut ctx, &mut sink, &choice).unwrap();

        assert!(sink.prepares > 0, "underruns must trigger a prepare");
        assert_eq!(sink.data.len(), frames * 4);

        // Byte-exact, in order: reconstruct the expected wire image.
        let mut expected = Vec::with_capacity(frames * 4);
        for s in &samples {
            expected.extend_from_slice(&((s >> 16) as i16).to_le_bytes());
        }
        assert_eq!(sink.data, expected);
    }

    #[test]
    fn wav24_in_s32_container_pads_low_byte() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep.wav");

        let samples: Vec<i32> = vec![0x123456, -0x123456, 0x7FFFFF, -0x800000];
        wav_file(&path, 96_000, 24, &samples);

        let mut pb = Playback::new(1, 1, wav_metadata(&path, 96_000, 24, 2), false).unwrap();
        let mut ctx = test_ctx();
        let choice = WireChoice {
            format: WireFormat::S32Le,
            container: 32,
            dsd_mode: DsdMode::None,
        };

        let mut sink = MockSink::new(8);
        play_with_sink(&mut pb, &mut ctx, &mut sink, &choice).unwrap();

        assert_eq!(sink.data.len(), 2 * 8);
        for (i, s) in samples.iter().enumerate() {
            let w = &sink.data[i * 4..i * 4 + 4];
            assert_eq!(w[0], 0x00, "low container byte must be zero");
            assert_eq!(&w[1..4], &s.to_le_bytes()[0..3]);
        }
    }

    #[test]
    fn ring_buffered_playback_matches_direct_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cached.wav");

        let frames = 5000usize;
        let samples: Vec<i32> = (0..frames * 2).map(|i| ((i * 31) as i32) << 16).collect();
        wav_file(&path, 44_100, 16, &samples);

        let fm = wav_metadata(&path, 44_100, 16, frames as u64);
        let choice = WireChoice {
            format: WireFormat::S16Le,
            container: 16,
            dsd_mode: DsdMode::None,
        };

        let mut direct = MockSink::new(4);
        let mut pb = Playback::new(1, 1, fm.clone(), false).unwrap();
        play_with_sink(&mut pb, &mut test_ctx(), &mut direct, &choice).unwrap();

        let mut cached = MockSink::new(4);
        let mut pb = Playback::new(1, 1, fm, false).unwrap();
        pb.prepare_ringbuffer(RINGBUFFER_MIN_BYTES).unwrap();
        assert!(pb.rb.is_some());
        play_with_sink(&mut pb, &mut test_ctx(), &mut cached, &choice).unwrap();

        assert_eq!(direct.data, cached.data);
    }

    fn dsd_metadata(path: &Path, kind: FileKind, data_size: u64, block_size: u32) -> FileMetadata {
        let total = data_size * 8 / 2;
        FileMetadata {
            kind,
            path: path.to_path_buf(),
            file_size: std::fs::metadata(path).unwrap().len(),
            sample_rate: 2_822_400,
            pcm_rate: 176_400,
            channels: 2,
            bits_per_sample: 1,
            total_samples: total,
            duration: total as f64 / 2_822_400.0,
            block_size,
            data_size,
            mkv: None,
            tags: Tags::default(),
        }
    }

    #[test]
    fn dop_stream_prefills_then_alternates_markers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.dsd");

        // Raw planar payload: 2 channels x 64 bytes per block, 4 blocks.
        let stride = 64usize;
        let blocks = 4usize;
        let payload: Vec<u8> = (0..2 * stride * blocks).map(|i| (i * 13) as u8).collect();
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&payload)
            .unwrap();

        let fm = dsd_metadata(&path, FileKind::Dsf, payload.len() as u64, stride as u32);
        let mut pb = Playback::new(1, 1, fm, true).unwrap();
        let mut ctx = test_ctx();
        let choice = WireChoice {
            format: WireFormat::S32Le,
            container: 32,
            dsd_mode: DsdMode::Dop,
        };

        let mut sink = MockSink::new(8);
        sink.period = 128;
        let mut source = CachedReader::open(&path, None, payload.len() as u64).unwrap();
        let advance = play_dsd_stream(
            &mut pb,
            &mut ctx,
            &mut sink,
            &choice,
            &mut source,
            DsdLayout::PlanarLsbFirst,
            stride,
            payload.len() as u64,
        )
        .unwrap();
        assert_eq!(advance, Advance::Next);

        // 2048 neutral frames precede the first real sample at this rate.
        let prefill = 2048usize;
        for f in 0..prefill {
            let frame = &sink.data[f * 8..(f + 1) * 8];
            assert_eq!(frame[0], 0x00);
            assert_eq!(frame[4], 0x00);
            let expected = if f % 2 == 0 { 0x05 } else { 0xFA };
            assert_eq!(frame[3], expected);
            assert_eq!(frame[7], expected);
        }

        // Marker keeps alternating through payload and shaping frames.
        let data_frames = payload.len() / 2 / 2;
        let fade = 176_400 * 20 / 1000;
        let post = 176_400 * 60 / 1000;
        let total_frames = prefill + data_frames + fade + sink.period + post;
        assert_eq!(sink.data.len(), total_frames * 8);

        for f in prefill..total_frames {
            let frame = &sink.data[f * 8..(f + 1) * 8];
            let expected = if (f - prefill) % 2 == 0 { 0x05 } else { 0xFA };
            assert_eq!(frame[3], expected, "marker at frame {f}");
            assert_eq!(frame[7], expected);
        }

        // One DoP frame advances the DSD clock by 16 bits per channel.
        assert_eq!(pb.current_samples, pb.fm.total_samples);
    }

    #[test]
    fn native_stream_packs_32_bits_per_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.dsd");

        let stride = 32usize;
        let payload: Vec<u8> = (0..2 * stride * 2).map(|i| i as u8).collect();
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&payload)
            .unwrap();

        let fm = dsd_metadata(&path, FileKind::Dff, payload.len() as u64, stride as u32);
        let mut pb = Playback::new(1, 1, fm, false).unwrap();
        pb.fm.pcm_rate = 88_200;
        let mut ctx = test_ctx();
        let choice = WireChoice {
            format: WireFormat::DsdU32Be,
            container: 32,
            dsd_mode: DsdMode::Native,
        };

        let mut sink = MockSink::new(8);
        sink.period = 64;
        let mut source = CachedReader::open(&path, None, payload.len() as u64).unwrap();
        play_dsd_stream(
            &mut pb,
            &mut ctx,
            &mut sink,
            &choice,
            &mut source,
            DsdLayout::InterleavedMsbFirst,
            stride,
            payload.len() as u64,
        )
        .unwrap();

        let data_frames = payload.len() / 8;
        let fade = 88_200 * 20 / 1000;
        let post = 88_200 * 60 / 1000;
        assert_eq!(
            sink.data.len(),
            (data_frames + fade + sink.period + post) * 8
        );
        assert_eq!(pb.current_samples, data_frames as u64 * 32);
    }

    #[test]
    fn identifier_strings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        wav_file(&path, 44_100, 16, &[0, 0]);

        let fm = wav_metadata(&path, 44_100, 16, 1);
        assert_eq!(identifier(&fm, false).unwrap(), "WAV/44.1kHz/16bits");

        let mut dsd = fm.clone();
        dsd.kind = FileKind::Dsf;
        dsd.sample_rate = 2_822_400;
        dsd.bits_per_sample = 1;
        assert_eq!(identifier(&dsd, true).unwrap(), "DSF/176.4kHz/1bit");
        assert_eq!(identifier(&dsd, false).unwrap(), "DSF/2.8224MHz/1bit");

        let mut odd = fm;
        odd.sample_rate = 44_056;
        assert!(identifier(&odd, false).is_err());
    }
}

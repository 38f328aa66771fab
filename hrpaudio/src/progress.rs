//! Progress line rendering.
//!
//! The template honors `%`-escapes (`%n` file number, `%N` total, `%f`
//! basename, `%F` full path, `%d` device, `%p` percent, `%t`/`%T` times,
//! `%i` identifier, `%b`/`%B` ring-buffer sizes in MiB, `%%` literal) and
//! backslash escapes (`\033`, `\x1b`, `\e`, `\n`, `\r`, `\t`, `\\`).

use crate::context::{PlayerContext, DEFAULT_OUTPUT_FORMAT};
use crate::playback::Playback;

fn push_time(out: &mut String, seconds: u64, with_hours: bool) {
    let minutes = seconds / 60;
    let secs = seconds % 60;
    if with_hours {
        let hours = minutes / 60;
        let minutes = minutes % 60;
        out.push_str(&format!("{}:{:02}:{:02}", hours, minutes, secs));
    } else {
        out.push_str(&format!("{:02}:{:02}", minutes, secs));
    }
}

fn push_mib(out: &mut String, bytes: u64) {
    const MIB: u64 = 1024 * 1024;
    let tenths = (bytes * 10 + MIB / 2) / MIB;
    out.push_str(&format!("{}.{}", tenths / 10, tenths % 10));
}

/// Render one progress line for `pb`, `None` when output is quiet.
/// The line starts with a carriage return so ticks overwrite in place.
pub fn format_line(pb: &Playback, ctx: &PlayerContext) -> Option<String> {
    if ctx.options.quiet {
        return None;
    }

    let template = if ctx.options.output_template.is_empty() {
        DEFAULT_OUTPUT_FORMAT
    } else {
        &ctx.options.output_template
    };

    let current_samples = pb.current_samples;
    let current_secs = if pb.fm.sample_rate > 0 {
        let clamped = pb.current_samples.min(pb.fm.total_samples);
        clamped as f64 / pb.fm.sample_rate as f64
    } else {
        0.0
    };
    let total_secs = pb.fm.duration;
    let with_hours = (total_secs as u64) / 60 >= 60;

    let mut out = String::with_capacity(template.len() + 32);
    out.push('\r');

    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];

        if c == '%' && i + 1 < chars.len() {
            i += 1;
            match chars[i] {
                'n' => out.push_str(&pb.file_number.to_string()),
                'N' => out.push_str(&pb.total_number.to_string()),
                'f' => out.push_str(&pb.fm.file_name()),
                'F' => out.push_str(&pb.fm.path.to_string_lossy()),
                'd' => out.push_str(&ctx.device.name),
                'p' => {
                    let mut percent = if total_secs > 0.0 {
                        ((current_secs * 100.0) / total_secs) as i64
                    } else {
                        0
                    };
                    percent = percent.max(0);
                    if percent > 100
                        || (pb.fm.total_samples > 0 && current_samples >= pb.fm.total_samples)
                    {
                        percent = 100;
                    }
                    out.push_str(&percent.to_string());
                    out.push('%');
                }
                't' => push_time(&mut out, current_secs as u64, with_hours),
                'T' => push_time(&mut out, total_secs as u64, with_hours),
                'i' => out.push_str(&pb.identifier),
                'b' => push_mib(&mut out, pb.ring_len() as u64),
                'B' => push_mib(&mut out, pb.ring_max as u64),
                '%' => out.push('%'),
                other => {
                    out.push('%');
                    out.push(other);
                }
            }
        } else if c == '\\' && i + 1 < chars.len() {
            let n = chars[i + 1];
            if n == '0' && i + 3 < chars.len() && chars[i + 2] == '3' && chars[i + 3] == '3' {
                out.push('\x1b');
                i += 3;
            } else if (n == 'x' || n == 'X')
                && i + 3 < chars.len()
                && chars[i + 2] == '1'
                && (chars[i + 3] == 'b' || chars[i + 3] == 'B')
            {
                out.push('\x1b');
                i += 3;
            } else if n == 'e' || n == 'E' {
                out.push('\x1b');
                i += 1;
            } else if n == 'n' {
                out.push('\n');
                i += 1;
            } else if n == 'r' {
                out.push('\r');
                i += 1;
            } else if n == 't' {
                out.push('\t');
                i += 1;
            } else if n == '\\' {
                out.push('\\');
                i += 1;
            } else {
                out.push(c);
            }
        } else {
            out.push(c);
        }

        i += 1;
    }

    Some(out)
}

/// Print one in-place progress tick.
pub fn print_tick(pb: &Playback, ctx: &PlayerContext) {
    if let Some(line) = format_line(pb, ctx) {
        print!("{line}");
        use std::io::Write;
        let _ = std::io::stdout().flush();
    }
}

/// Print the final line for a file: clear to end of line, full progress,
/// newline. The sample counter is pinned to the total first so `%p` reads
/// 100 and `%t` equals `%T`.
pub fn print_done(pb: &mut Playback, ctx: &PlayerContext) {
    pb.current_samples = pb.fm.total_samples;
    if let Some(line) = format_line(pb, ctx) {
        println!("\x1b[2K{line}");
        use std::io::Write;
        let _ = std::io::stdout().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{PlaybackOptions, PlayerContext};
    use crate::device::{ActiveDevice, Capabilities};
    use hrpmetadata::{FileKind, FileMetadata, Tags};
    use std::path::PathBuf;

    fn test_ctx(template: &str) -> PlayerContext {
        PlayerContext {
            options: PlaybackOptions {
                output_template: template.to_string(),
                ..PlaybackOptions::default()
            },
            device: ActiveDevice {
                name: "Test DAC".to_string(),
                device: "hw:9".to_string(),
                description: String::new(),
                hardware: 9,
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

    fn test_pb(rate: u32, total: u64, current: u64) -> Playback {
        let fm = FileMetadata {
            kind: FileKind::Wav,
            path: PathBuf::from("/music/song one.wav"),
            file_size: 1000,
            sample_rate: rate,
            pcm_rate: rate,
            channels: 2,
            bits_per_sample: 16,
            total_samples: total,
            duration: if rate > 0 { total as f64 / rate as f64 } else { 0.0 },
            block_size: 0,
            data_size: 0,
            mkv: None,
            tags: Tags::default(),
        };
        let mut pb = Playback::new(3, 9, fm, false).unwrap();
        pb.current_samples = current;
        pb
    }

    #[test]
    fn default_template_fields() {
        let ctx = test_ctx("[%n/%N] %d: %f [%i] (%t/%T) (%p)");
        let pb = test_pb(44_100, 441_000, 220_500);
        let line = format_line(&pb, &ctx).unwrap();
        assert_eq!(
            line,
            "\r[3/9] Test DAC: song one.wav [WAV/44.1kHz/16bits] (00:05/00:10) (50%)"
        );
    }

    #[test]
    fn percent_pins_to_100_at_total() {
        let ctx = test_ctx("%p");
        let pb = test_pb(44_100, 441_000, 441_000);
        assert_eq!(format_line(&pb, &ctx).unwrap(), "\r100%");

        // Also when the counter ran past the total.
        let pb = test_pb(44_100, 441_000, 500_000);
        assert_eq!(format_line(&pb, &ctx).unwrap(), "\r100%");
    }

    #[test]
    fn hours_are_shown_when_total_has_them() {
        let ctx = test_ctx("%t/%T");
        // 2 hours of audio at 1 kHz.
        let pb = test_pb(1000, 7_200_000, 3_661_000);
        assert_eq!(format_line(&pb, &ctx).unwrap(), "\r1:01:01/2:00:00");
    }

    #[test]
    fn escapes_and_literals() {
        let ctx = test_ctx("a\\tb\\\\c %% \\e[0m \\x1b. \\033,");
        let pb = test_pb(44_100, 441_000, 0);
        assert_eq!(
            format_line(&pb, &ctx).unwrap(),
            "\ra\tb\\c % \x1b[0m \x1b. \x1b,"
        );
    }

    #[test]
    fn unknown_percent_escape_is_kept() {
        let ctx = test_ctx("%z");
        let pb = test_pb(44_100, 441_000, 0);
        assert_eq!(format_line(&pb, &ctx).unwrap(), "\r%z");
    }

    #[test]
    fn quiet_suppresses_output() {
        let mut ctx = test_ctx("%p");
        ctx.options.quiet = true;
        let pb = test_pb(44_100, 441_000, 0);
        assert!(format_line(&pb, &ctx).is_none());
    }

    #[test]
    fn ring_sizes_in_mib() {
        let ctx = test_ctx("%b/%B");
        let mut pb = test_pb(44_100, 441_000, 0);
        pb.ring_max = 256 * 1024 * 1024;
        let line = format_line(&pb, &ctx).unwrap();
        assert_eq!(line, "\r0.0/256.0");
    }
}

//! The queue driver: probe the queued files, activate the device, and run
//! the playback controller once per file, honoring the ring-buffer cache
//! scope across the queue.

use std::path::PathBuf;

use anyhow::{Context, bail};

use hrpaudio::{
    ActiveDevice, Advance, AudioError, Keyboard, Playback, PlaybackOptions, PlayerContext,
    device_supports,
};
use hrpconfig::{CacheFiles, Settings};
use hrpmetadata::FileMetadata;
use hrpplaylist::{PlaybackQueue, load_playlist, loader};

use crate::cli::Cli;

/// Gather the files to play: playlist entries first, then command-line
/// arguments with directories expanded (recursively with `-R`).
pub fn collect_paths(cli: &Cli, settings: &Settings) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    if let Some(playlist) = &cli.playlist {
        paths.extend(load_playlist(playlist, settings.quiet)?);
    }

    for arg in &cli.files {
        if arg.is_dir() {
            paths.extend(loader::files_in_dir(arg, cli.recursive));
        } else {
            paths.push(arg.clone());
        }
    }

    Ok(paths)
}

fn print_file_metadata(fm: &FileMetadata) {
    println!("{}", fm.path.display());
    println!("  Type: {}", fm.kind.as_str());
    println!("  Bits: {}", fm.bits_per_sample);
    println!("  Channels: {}", fm.channels);
    println!("  Size: {}", fm.file_size);
    println!("  Rate: {}", fm.sample_rate);
    println!("  Samples: {}", fm.total_samples);
    println!("  Duration: {:.3}", fm.duration);

    let tags = &fm.tags;
    if let Some(artist) = &tags.artist {
        println!("  Artist: {artist}");
    }
    if let Some(title) = &tags.title {
        println!("  Title: {title}");
    }
    if let Some(album) = &tags.album {
        println!("  Album: {album}");
    }
    if let Some(genre) = &tags.genre {
        println!("  Genre: {genre}");
    }
    if let Some(date) = &tags.date {
        println!("  Date: {date}");
    }
    if let Some(track) = tags.track {
        println!("  Track: {track}");
    }
    if let Some(disc) = tags.disc {
        println!("  Disc: {disc}");
    }
}

/// Apply the configured ring-buffer scope for the current queue position:
/// `off` keeps every playback on direct reads, `minimal` holds buffers for
/// the previous/current/next entries, `all` for every entry with the
/// non-current ones reset to their minimum size.
fn update_cache(
    queue: &mut PlaybackQueue<Playback>,
    settings: &Settings,
) -> Result<(), AudioError> {
    let cursor = queue.cursor();
    let cache_size = settings.cache_size as usize;
    let items = queue.items_mut();

    if cache_size == 0 || settings.cache_files == CacheFiles::Off {
        for pb in items.iter_mut() {
            pb.drop_ringbuffer();
        }
        return Ok(());
    }

    match settings.cache_files {
        CacheFiles::All => {
            for (i, pb) in items.iter_mut().enumerate() {
                pb.prepare_ringbuffer(cache_size)?;
                if i != cursor {
                    pb.reset_ringbuffer();
                }
            }
        }
        CacheFiles::Minimal => {
            for (i, pb) in items.iter_mut().enumerate() {
                let keep = i == cursor || i + 1 == cursor || i == cursor + 1;
                if keep {
                    pb.prepare_ringbuffer(cache_size)?;
                } else {
                    pb.drop_ringbuffer();
                }
            }
        }
        CacheFiles::Off => {}
    }

    Ok(())
}

pub fn run(cli: &Cli, settings: Settings, paths: Vec<PathBuf>) -> anyhow::Result<()> {
    // Probe everything up front; unsupported files are shown and dropped.
    let mut metas: Vec<FileMetadata> = Vec::new();
    for path in &paths {
        match hrpmetadata::probe(path, settings.experimental) {
            Ok(fm) => metas.push(fm),
            Err(err) => {
                if !settings.quiet {
                    println!("{} (Unsupported due to {err})", path.display());
                }
            }
        }
    }
    if metas.is_empty() {
        bail!("no supported files in the queue");
    }

    let device_name = settings
        .device
        .clone()
        .unwrap_or_else(|| "default".to_string());
    let device = ActiveDevice::activate(&device_name, settings.volume)
        .with_context(|| format!("could not activate device '{device_name}'"))?;

    if settings.developer && !settings.quiet {
        println!("{device_name}");
        println!("  Volume: {}", if device.has_volume { "Yes" } else { "No" });
        println!("  Capabilities: {:?}", device.capabilities);
    }

    // Drop files the device cannot render.
    let metas: Vec<FileMetadata> = metas
        .into_iter()
        .filter(|fm| {
            let ok = device_supports(fm, &device.capabilities, settings.experimental);
            if !ok && !settings.quiet {
                println!(
                    "{} {}Hz/{}bits (Unsupported)",
                    fm.path.display(),
                    fm.sample_rate,
                    fm.bits_per_sample
                );
            }
            ok
        })
        .collect();
    if metas.is_empty() {
        bail!("no playable files for '{device_name}'");
    }

    let mut playbacks = Vec::with_capacity(metas.len());
    for fm in metas {
        match Playback::new(playbacks.len() + 1, 0, fm, settings.dop) {
            Ok(pb) => playbacks.push(pb),
            Err(err) => {
                if !settings.quiet {
                    println!("{err}");
                }
            }
        }
    }
    if playbacks.is_empty() {
        bail!("no playable files for '{device_name}'");
    }
    let total = playbacks.len();
    for pb in &mut playbacks {
        pb.total_number = total;
    }

    let mut queue = PlaybackQueue::new(playbacks, cli.mode.into());
    // Shuffling reorders the entries; renumber so the progress line counts
    // in play order.
    for (i, pb) in queue.items_mut().iter_mut().enumerate() {
        pb.file_number = i + 1;
    }

    if settings.developer && !settings.quiet {
        for pb in queue.items_mut() {
            println!("Queued: {}", pb.fm.path.display());
        }
        println!("Number of files: {total}");
    }

    let mut ctx = PlayerContext {
        options: PlaybackOptions {
            dop: settings.dop,
            experimental: settings.experimental,
            developer: settings.developer,
            quiet: settings.quiet,
            metadata: settings.metadata,
            output_template: settings.output.clone(),
            cache_size: settings.cache_size as usize,
        },
        device,
        keyboard_active: false,
    };

    let mut keyboard = Keyboard::enable().context("could not set terminal mode")?;
    ctx.keyboard_active = true;

    let result = play_queue(&mut queue, &mut ctx, &settings);

    keyboard.restore();
    result
}

fn play_queue(
    queue: &mut PlaybackQueue<Playback>,
    ctx: &mut PlayerContext,
    settings: &Settings,
) -> anyhow::Result<()> {
    loop {
        update_cache(queue, settings).map_err(|e| anyhow::anyhow!("cache setup: {e}"))?;

        let Some(pb) = queue.current_mut() else {
            break;
        };

        if ctx.options.metadata || ctx.options.developer {
            print_file_metadata(&pb.fm);
        }

        match hrpaudio::play(pb, ctx) {
            Ok(Advance::Next) => {
                if !queue.advance() {
                    break;
                }
            }
            Ok(Advance::Prev) => queue.retreat(),
            Ok(Advance::Quit) => break,
            Err(err) => {
                tracing::error!("playback failed: {err}");
                if !ctx.options.quiet {
                    println!("{err}");
                }
                if !queue.advance() {
                    break;
                }
            }
        }
    }
    Ok(())
}

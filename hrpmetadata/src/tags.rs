//! Tag and property extraction through lofty for the containers it knows
//! (FLAC, MP3, WAV).

use std::path::Path;

use lofty::config::ParseOptions;
use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use lofty::probe::Probe;

use crate::Tags;

/// Technical properties lofty reports for a file.
pub struct Properties {
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub channels: u32,
    pub bit_depth: Option<u8>,
}

pub fn read_properties(path: &Path) -> Option<Properties> {
    let tagged = Probe::open(path)
        .ok()?
        .options(ParseOptions::new())
        .read()
        .ok()?;
    let props = tagged.properties();

    Some(Properties {
        duration_secs: props.duration().as_secs_f64(),
        sample_rate: props.sample_rate()?,
        channels: props.channels()? as u32,
        bit_depth: props.bit_depth(),
    })
}

/// Read the artistic tags of a file, quietly returning empty tags when the
/// file carries none or lofty cannot parse it.
pub fn read_tags(path: &Path) -> Tags {
    let mut tags = Tags::default();

    let tagged = match Probe::open(path).and_then(|p| p.options(ParseOptions::new()).read()) {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!("no tags for '{}': {}", path.display(), e);
            return tags;
        }
    };

    if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
        tags.title = tag.title().map(|s| s.to_string());
        tags.artist = tag.artist().map(|s| s.to_string());
        tags.album = tag.album().map(|s| s.to_string());
        tags.genre = tag.genre().map(|s| s.to_string());
        tags.comment = tag.comment().map(|s| s.to_string());
        tags.date = tag.year().map(|y| y.to_string());
        tags.track = tag.track();
        tags.disc = tag.disk();
    }

    tags.format_name = Some(format!("{:?}", tagged.file_type()));

    tags
}

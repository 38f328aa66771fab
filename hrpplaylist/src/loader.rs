//! Playlist text-file parsing and directory expansion.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::PlaylistError;

/// Collect the supported files directly inside (or recursively below) `dir`,
/// sorted by path.
pub fn files_in_dir(dir: &Path, recursive: bool) -> Vec<PathBuf> {
    let depth = if recursive { usize::MAX } else { 1 };
    let mut out: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(depth)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| hrpmetadata::kind_for_path(p).is_some())
        .collect();
    out.sort();
    out
}

/// Shell-style wildcard match supporting `*` and `?`. `path_mode` keeps `*`
/// from crossing `/` boundaries, like fnmatch's FNM_PATHNAME.
fn wildcard_match(pattern: &str, text: &str, path_mode: bool) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    // Iterative glob with single-star backtracking.
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == t[ti] || (p[pi] == '?' && !(path_mode && t[ti] == '/'))) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            if path_mode && t[st] == '/' {
                return false;
            }
            star = Some((sp, st + 1));
            pi = sp + 1;
            ti = st + 1;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Recursive-glob semantics: the pattern may start at any path component
/// boundary of `rel`.
fn match_rel_anywhere(pattern: &str, rel: &str) -> bool {
    if wildcard_match(pattern, rel, true) {
        return true;
    }
    let mut rest = rel;
    while let Some(idx) = rest.find('/') {
        rest = &rest[idx + 1..];
        if wildcard_match(pattern, rest, true) {
            return true;
        }
    }
    false
}

fn append_recursive_glob(dir: &Path, pattern: &str, out: &mut Vec<PathBuf>) {
    let match_rel = pattern.contains('/');
    let mut matched: Vec<PathBuf> = files_in_dir(dir, true)
        .into_iter()
        .filter(|p| {
            if match_rel {
                let rel = p
                    .strip_prefix(dir)
                    .map(|r| r.to_string_lossy().into_owned())
                    .unwrap_or_else(|_| p.to_string_lossy().into_owned());
                match_rel_anywhere(pattern, &rel)
            } else {
                p.file_name()
                    .map(|n| wildcard_match(pattern, &n.to_string_lossy(), false))
                    .unwrap_or(false)
            }
        })
        .collect();
    matched.sort();
    out.extend(matched);
}

/// Resolve a playlist entry against the playlist directory, falling back to
/// the literal path when the resolved one does not exist.
fn resolve(base: &Path, entry: &str) -> PathBuf {
    if entry.starts_with('/') {
        return PathBuf::from(entry);
    }
    let joined = base.join(entry);
    if joined.exists() {
        joined
    } else {
        PathBuf::from(entry)
    }
}

/// Load a playlist file into an ordered list of audio file paths.
pub fn load_playlist(playlist: &Path, quiet: bool) -> Result<Vec<PathBuf>, PlaylistError> {
    if !playlist.exists() {
        if !quiet {
            println!("Playlist not found '{}'", playlist.display());
        }
        return Err(PlaylistError::NotFound(playlist.display().to_string()));
    }

    let base = playlist
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();

    let text = std::fs::read_to_string(playlist)?;
    let mut files = Vec::new();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line == "*" {
            files.extend(files_in_dir(&base, false));
            continue;
        }
        if line == "**/*" {
            files.extend(files_in_dir(&base, true));
            continue;
        }

        // "<dir>/**/*": recursive expansion of a named directory.
        if let Some(dir_part) = line.strip_suffix("/**/*") {
            let dir = resolve(&base, dir_part);
            if dir.is_dir() {
                files.extend(files_in_dir(&dir, true));
            } else if !quiet {
                println!("Directory not found '{}'", dir.display());
            }
            continue;
        }

        // "<prefix>/**/<pattern>" or "**/<pattern>": recursive glob.
        if let Some(idx) = line.find("**/") {
            let prefix = line[..idx].trim_end_matches('/');
            let pattern = &line[idx + 3..];
            let dir = if prefix.is_empty() {
                base.clone()
            } else {
                resolve(&base, prefix)
            };
            if dir.is_dir() {
                append_recursive_glob(&dir, pattern, &mut files);
            } else if !quiet {
                println!("Directory not found '{}'", dir.display());
            }
            continue;
        }

        let path = resolve(&base, line);
        if path.is_dir() {
            files.extend(files_in_dir(&path, false));
        } else if path.exists() {
            files.push(path);
        } else if !quiet {
            println!("File not found '{}'", path.display());
        }
    }

    tracing::debug!(
        playlist = %playlist.display(),
        entries = files.len(),
        "playlist loaded"
    );
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;

    fn touch(path: &Path) {
        fs::File::create(path).unwrap().write_all(b"x").unwrap();
    }

    fn setup() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.flac"));
        touch(&dir.path().join("a.wav"));
        touch(&dir.path().join("notes.txt"));
        fs::create_dir(dir.path().join("sub")).unwrap();
        touch(&dir.path().join("sub/c.mp3"));
        touch(&dir.path().join("sub/d.dsf"));
        dir
    }

    #[test]
    fn wildcard_semantics() {
        assert!(wildcard_match("*.flac", "song.flac", false));
        assert!(!wildcard_match("*.flac", "song.wav", false));
        assert!(wildcard_match("s?ng.*", "song.mp3", false));
        assert!(wildcard_match("*", "anything", false));
        // Path mode: '*' must not cross '/'.
        assert!(!wildcard_match("*.mp3", "sub/c.mp3", true));
        assert!(wildcard_match("sub/*.mp3", "sub/c.mp3", true));
    }

    #[test]
    fn star_expands_current_dir_sorted() {
        let dir = setup();
        let playlist = dir.path().join("list.hrp");
        fs::write(&playlist, "*\n").unwrap();

        let files = load_playlist(&playlist, true).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.wav", "b.flac"]);
    }

    #[test]
    fn doublestar_recurses() {
        let dir = setup();
        let playlist = dir.path().join("list.hrp");
        fs::write(&playlist, "**/*\n").unwrap();

        let files = load_playlist(&playlist, true).unwrap();
        assert_eq!(files.len(), 4);
    }

    #[test]
    fn recursive_glob_filters_by_pattern() {
        let dir = setup();
        let playlist = dir.path().join("list.hrp");
        fs::write(&playlist, "**/*.mp3\n").unwrap();

        let files = load_playlist(&playlist, true).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("sub/c.mp3"));
    }

    #[test]
    fn comments_blanks_and_missing_files() {
        let dir = setup();
        let playlist = dir.path().join("list.hrp");
        fs::write(
            &playlist,
            "# a comment\n\n  a.wav  \nmissing.flac\nsub\n",
        )
        .unwrap();

        let files = load_playlist(&playlist, true).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        // a.wav resolved relative to the playlist, sub expanded flat.
        assert_eq!(names, vec!["a.wav", "c.mp3", "d.dsf"]);
    }

    #[test]
    fn missing_playlist_errors() {
        assert!(matches!(
            load_playlist(Path::new("/no/such/list.hrp"), true),
            Err(PlaylistError::NotFound(_))
        ));
    }
}

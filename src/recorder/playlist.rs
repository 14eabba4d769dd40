//! Playlist text for the encoder's concat input.
//!
//! One `file`/`duration` pair per frame in order; the last frame is listed a
//! second time without a duration, otherwise the concat demuxer drops its
//! duration. Paths are single quoted; an embedded `'` becomes `'\''`.

use std::path::{MAIN_SEPARATOR, Path};

use crate::core::error::PlaylistError;

pub const PLAYLIST_HEADER: &str = "ffconcat version 1.0";

/// Display duration of one frame, in seconds with microsecond precision.
pub fn frame_duration(frame_rate: u32) -> String {
    format!("{:.6}", 1.0 / f64::from(frame_rate.max(1)))
}

/// Quotes a path for a playlist `file` directive.
pub fn quote_path(path: &Path) -> Result<String, PlaylistError> {
    let raw = path
        .to_str()
        .ok_or_else(|| PlaylistError::Unrepresentable(path.to_path_buf()))?;
    if raw.contains(['\n', '\r', '\0']) {
        return Err(PlaylistError::Unrepresentable(path.to_path_buf()));
    }

    let normalized = if MAIN_SEPARATOR == '/' {
        raw.to_string()
    } else {
        raw.replace(MAIN_SEPARATOR, "/")
    };

    Ok(format!("'{}'", normalized.replace('\'', r"'\''")))
}

pub fn render_playlist<P: AsRef<Path>>(
    frames: &[P],
    frame_rate: u32,
) -> Result<String, PlaylistError> {
    let Some(last) = frames.last() else {
        return Err(PlaylistError::Empty);
    };

    let duration = frame_duration(frame_rate);
    let mut out = String::with_capacity(64 * (frames.len() + 2));
    out.push_str(PLAYLIST_HEADER);
    out.push('\n');

    for frame in frames {
        out.push_str("file ");
        out.push_str(&quote_path(frame.as_ref())?);
        out.push('\n');
        out.push_str("duration ");
        out.push_str(&duration);
        out.push('\n');
    }

    out.push_str("file ");
    out.push_str(&quote_path(last.as_ref())?);
    out.push('\n');

    Ok(out)
}

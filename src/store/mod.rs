//! On-disk layout of the archive.
//!
//! ```text
//! <output_dir>/<camera_id>/frame_<sequence>_<stamp>.jpg
//! <output_dir>/<camera_id>/.consolidated
//! <output_dir>/videos/<camera_id>_<stamp>.mp4
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub mod naming;
pub mod registry;

pub use naming::{FrameName, VideoName};
pub use registry::{CameraRegistry, CameraState};

pub const VIDEOS_DIR: &str = "videos";

/// Per-camera marker holding the consolidated-through sequence.
pub const WATERMARK_FILE: &str = ".consolidated";

/// A frame file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFrame {
    pub name: FrameName,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FrameStore {
    root: PathBuf,
}

impl FrameStore {
    /// Creates `root` if needed. Paths handed out are absolute so they can be
    /// written into encoder playlists as-is.
    pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        Ok(Self {
            root: std::path::absolute(root)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn camera_dir(&self, camera_id: &str) -> PathBuf {
        self.root.join(camera_id)
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.root.join(VIDEOS_DIR)
    }

    pub fn ensure_camera_dir(&self, camera_id: &str) -> io::Result<PathBuf> {
        let dir = self.camera_dir(camera_id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn ensure_videos_dir(&self) -> io::Result<PathBuf> {
        let dir = self.videos_dir();
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Highest sequence already in a video while frames stay on disk, as
    /// recorded by `save_watermark`. `None` if the camera never had one.
    pub fn load_watermark(&self, camera_id: &str) -> io::Result<Option<u64>> {
        let path = self.camera_dir(camera_id).join(WATERMARK_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        text.trim().parse::<u64>().map(Some).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: {}", path.display(), e),
            )
        })
    }

    /// Written to a temporary file first so a crash never leaves a torn value.
    pub fn save_watermark(&self, camera_id: &str, sequence: u64) -> io::Result<()> {
        let dir = self.ensure_camera_dir(camera_id)?;
        let tmp = dir.join(format!("{}.tmp", WATERMARK_FILE));
        fs::write(&tmp, format!("{}\n", sequence))?;
        fs::rename(&tmp, dir.join(WATERMARK_FILE))
    }

    /// Camera directories currently on disk (every subdirectory except `videos`).
    pub fn camera_ids(&self) -> io::Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if name == VIDEOS_DIR || name.starts_with('.') {
                continue;
            }
            ids.push(name);
        }
        ids.sort();
        Ok(ids)
    }

    /// All frame files of a camera in numeric sequence order.
    ///
    /// A missing directory is an empty store, not an error.
    pub fn list_frames(&self, camera_id: &str) -> io::Result<Vec<StoredFrame>> {
        let dir = self.camera_dir(camera_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut frames = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str().and_then(FrameName::parse) else {
                continue;
            };
            if !entry.file_type()?.is_file() {
                continue;
            }
            frames.push(StoredFrame {
                name,
                path: entry.path(),
            });
        }
        sort_frames(&mut frames);
        Ok(frames)
    }
}

/// Orders by the parsed sequence, never by the file name string.
pub fn sort_frames(frames: &mut [StoredFrame]) {
    frames.sort_by(|a, b| a.name.cmp(&b.name));
}

/// Camera ids become directory names, so they must be a single plain path component.
pub fn is_valid_camera_id(camera_id: &str) -> bool {
    !camera_id.is_empty()
        && camera_id != VIDEOS_DIR
        && !camera_id.starts_with('.')
        && camera_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

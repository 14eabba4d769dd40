use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Mutex;
use std::time::Duration;

use crate::core::error::EncoderError;
use crate::core::lock::lock_mutex;
use crate::recorder::VideoEncoder;

/// What the mock does for outputs of one camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Writes a non-empty output and succeeds.
    Succeed,
    /// Fails without writing anything.
    Fail,
    /// Writes a non-empty output, then reports a non-zero exit.
    FailWithOutput,
    /// Reports success without writing anything.
    SucceedWithoutOutput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeCall {
    pub output: PathBuf,
    pub frames: Vec<PathBuf>,
}

/// Encoder double: records every playlist it is handed and behaves per
/// camera as scripted. Outputs are attributed to a camera by their
/// `<camera_id>_` file name prefix.
pub struct MockEncoder {
    default: MockBehavior,
    per_camera: Mutex<HashMap<String, MockBehavior>>,
    calls: Mutex<Vec<EncodeCall>>,
    delay: Duration,
}

impl Default for MockEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEncoder {
    pub fn new() -> Self {
        Self {
            default: MockBehavior::Succeed,
            per_camera: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn with_default(mut self, behavior: MockBehavior) -> Self {
        self.default = behavior;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_behavior(&self, camera_id: &str, behavior: MockBehavior) {
        lock_mutex(&self.per_camera, "mock.behavior").insert(camera_id.to_string(), behavior);
    }

    pub fn calls(&self) -> Vec<EncodeCall> {
        lock_mutex(&self.calls, "mock.calls").clone()
    }

    pub fn calls_for(&self, camera_id: &str) -> Vec<EncodeCall> {
        let prefix = format!("{}_", camera_id);
        self.calls()
            .into_iter()
            .filter(|c| file_name(&c.output).starts_with(&prefix))
            .collect()
    }

    fn behavior_for(&self, output: &Path) -> MockBehavior {
        let name = file_name(output);
        let per_camera = lock_mutex(&self.per_camera, "mock.behavior");
        per_camera
            .iter()
            .filter(|(camera, _)| name.starts_with(&format!("{}_", camera)))
            .max_by_key(|(camera, _)| camera.len())
            .map(|(_, behavior)| *behavior)
            .unwrap_or(self.default)
    }
}

impl VideoEncoder for MockEncoder {
    fn name(&self) -> &str {
        "mock"
    }

    fn encode(&self, playlist: &Path, output: &Path) -> Result<(), EncoderError> {
        let text = fs::read_to_string(playlist).map_err(|source| EncoderError::Spawn {
            program: "mock".to_string(),
            source,
        })?;
        lock_mutex(&self.calls, "mock.calls").push(EncodeCall {
            output: output.to_path_buf(),
            frames: parse_playlist(&text),
        });

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let failed = || EncoderError::Exit {
            status: exit_status(1),
            stderr: "mock encoder failure".to_string(),
        };

        match self.behavior_for(output) {
            MockBehavior::Succeed => {
                fs::write(output, b"mock video").map_err(|source| EncoderError::Spawn {
                    program: "mock".to_string(),
                    source,
                })
            }
            MockBehavior::Fail => Err(failed()),
            MockBehavior::FailWithOutput => {
                let _ = fs::write(output, b"partial video");
                Err(failed())
            }
            MockBehavior::SucceedWithoutOutput => Ok(()),
        }
    }
}

#[cfg(unix)]
fn exit_status(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    ExitStatus::from_raw(code << 8)
}

#[cfg(windows)]
fn exit_status(code: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;
    ExitStatus::from_raw(code as u32)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Frames listed in a playlist, in order, without the trailing repeat.
pub fn parse_playlist(text: &str) -> Vec<PathBuf> {
    let mut frames: Vec<PathBuf> = text
        .lines()
        .filter_map(|line| line.strip_prefix("file "))
        .map(|quoted| {
            let inner = quoted
                .strip_prefix('\'')
                .and_then(|q| q.strip_suffix('\''))
                .unwrap_or(quoted);
            PathBuf::from(inner.replace(r"'\''", "'"))
        })
        .collect();
    frames.pop();
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::render_playlist;

    #[test]
    fn playlist_parses_back_to_frames() {
        let frames = vec![
            PathBuf::from("/data/o'hare/frame_1_a.jpg"),
            PathBuf::from("/data/o'hare/frame_2_b.jpg"),
        ];
        let text = render_playlist(&frames, 30).unwrap();
        assert_eq!(parse_playlist(&text), frames);
    }

    #[test]
    fn behavior_matches_longest_camera_prefix() {
        let mock = MockEncoder::new();
        mock.set_behavior("cam", MockBehavior::Fail);
        mock.set_behavior("cam_b", MockBehavior::FailWithOutput);

        assert_eq!(mock.behavior_for(Path::new("/v/cam_1.mp4")), MockBehavior::Fail);
        assert_eq!(
            mock.behavior_for(Path::new("/v/cam_b_1.mp4")),
            MockBehavior::FailWithOutput
        );
        assert_eq!(mock.behavior_for(Path::new("/v/other_1.mp4")), MockBehavior::Succeed);
    }
}

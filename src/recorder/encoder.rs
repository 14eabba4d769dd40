// src/recorder/encoder.rs
use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::Context;

use crate::core::error::EncoderError;

/// Turns a playlist of frames into one video file.
///
/// Implementations must not return before `output` is fully written or the
/// attempt has failed. Called from the consolidation thread only.
pub trait VideoEncoder: Send + Sync {
    fn name(&self) -> &str;
    fn encode(&self, playlist: &Path, output: &Path) -> Result<(), EncoderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub program: String,
    pub frame_rate: u32,
    pub codec: String,
    pub preset: String,
    pub pix_fmt: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            frame_rate: 30,
            codec: "libx264".to_string(),
            preset: "ultrafast".to_string(),
            pix_fmt: "yuv420p".to_string(),
        }
    }
}

// yuv420p needs even dimensions
const EVEN_SCALE_FILTER: &str = "scale=trunc(iw/2)*2:trunc(ih/2)*2";
const STDERR_TAIL_BYTES: usize = 2048;

/// Runs ffmpeg's concat demuxer over the playlist.
pub struct FfmpegEncoder {
    settings: EncoderSettings,
}

impl FfmpegEncoder {
    pub fn new(settings: EncoderSettings) -> Self {
        Self { settings }
    }

    pub fn args(&self, playlist: &Path, output: &Path) -> Vec<OsString> {
        let s = &self.settings;
        let mut args: Vec<OsString> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-y",
            "-f",
            "concat",
            "-safe",
            "0",
            "-i",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(playlist.as_os_str().to_owned());
        let fps = s.frame_rate.to_string();
        for arg in [
            "-vf",
            EVEN_SCALE_FILTER,
            "-r",
            fps.as_str(),
            "-c:v",
            s.codec.as_str(),
            "-preset",
            s.preset.as_str(),
            "-pix_fmt",
            s.pix_fmt.as_str(),
        ] {
            args.push(OsString::from(arg));
        }
        args.push(output.as_os_str().to_owned());
        args
    }

    /// Runs `<program> -version` and returns its first output line.
    pub fn check_available(&self) -> anyhow::Result<String> {
        let out = Command::new(&self.settings.program)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("'{}' not found in PATH", self.settings.program))?;

        if !out.status.success() {
            anyhow::bail!(
                "'{} -version' exited with {}",
                self.settings.program,
                out.status
            );
        }

        let stdout = String::from_utf8_lossy(&out.stdout);
        Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn name(&self) -> &str {
        &self.settings.program
    }

    fn encode(&self, playlist: &Path, output: &Path) -> Result<(), EncoderError> {
        log::debug!(
            "[encoder] {} {} -> {}",
            self.settings.program,
            playlist.display(),
            output.display()
        );

        let out = Command::new(&self.settings.program)
            .args(self.args(playlist, output))
            .stdin(Stdio::null())
            .output()
            .map_err(|source| EncoderError::Spawn {
                program: self.settings.program.clone(),
                source,
            })?;

        if out.status.success() {
            return Ok(());
        }

        Err(EncoderError::Exit {
            status: out.status,
            stderr: stderr_tail(&out.stderr),
        })
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

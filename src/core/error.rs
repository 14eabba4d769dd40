use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Synchronous rejection returned by `submit`. Nothing is retried by the core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("ingest queue full (capacity {capacity})")]
    QueueFull { capacity: usize },
    #[error("ingest queue closed")]
    Closed,
    #[error("camera id must not be empty")]
    EmptyCameraId,
    #[error("camera id '{0}' is not usable as a directory name")]
    InvalidCameraId(String),
    #[error("frame payload must not be empty")]
    EmptyPayload,
}

pub type FrameResult<T> = Result<T, FrameError>;

/// Per-frame persistence failure. Logged and counted, never fatal for the worker.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("rejected frame: {0}")]
    Rejected(#[from] SubmitError),
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid image: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error("{context} {path}: {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FrameError {
    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("failed to launch encoder '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("encoder exited with {status}: {stderr}")]
    Exit { status: ExitStatus, stderr: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlaylistError {
    #[error("playlist requires at least one frame")]
    Empty,
    #[error("path cannot be written to a playlist: {0:?}")]
    Unrepresentable(PathBuf),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{message}")]
    Message { message: String },
}

impl ConfigError {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

/// Why a single chunk did not become a video. Only that chunk is affected.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("{context} {path}: {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Playlist(#[from] PlaylistError),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error("encoder reported success but {0} is missing or empty")]
    EmptyOutput(PathBuf),
}

impl ChunkError {
    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }
}

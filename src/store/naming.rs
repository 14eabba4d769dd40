//! File naming for persisted frames and consolidated videos.
//!
//! Frames: `frame_<sequence>_<stamp>.jpg`, videos:
//! `<camera_id>_<stamp>[_partNN].mp4`. Sequences are written zero padded but
//! parsed at any width; ordering is always done on the parsed integer.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::core::timestamp::file_stamp;

pub const FRAME_PREFIX: &str = "frame_";
pub const FRAME_EXTENSION: &str = "jpg";
pub const VIDEO_EXTENSION: &str = "mp4";
pub const SEQUENCE_WIDTH: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameName {
    pub sequence: u64,
    /// Capture stamp exactly as it appears in the file name.
    pub stamp: String,
}

impl FrameName {
    pub fn new(sequence: u64, timestamp: &DateTime<Utc>) -> Self {
        Self {
            sequence,
            stamp: file_stamp(timestamp),
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}{:0width$}_{}.{}",
            FRAME_PREFIX,
            self.sequence,
            self.stamp,
            FRAME_EXTENSION,
            width = SEQUENCE_WIDTH
        )
    }

    /// Same capture stamp, different sequence.
    pub fn with_sequence(&self, sequence: u64) -> Self {
        Self {
            sequence,
            stamp: self.stamp.clone(),
        }
    }

    /// Parses `frame_<digits>_<stamp>.jpg`. Anything else is not a frame.
    pub fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(FRAME_PREFIX)?;
        let rest = rest.strip_suffix(FRAME_EXTENSION)?.strip_suffix('.')?;
        let (digits, stamp) = rest.split_once('_')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) || stamp.is_empty() {
            return None;
        }
        let sequence = digits.parse::<u64>().ok()?;
        Some(Self {
            sequence,
            stamp: stamp.to_string(),
        })
    }
}

impl Ord for FrameName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sequence
            .cmp(&other.sequence)
            .then_with(|| self.stamp.cmp(&other.stamp))
    }
}

impl PartialOrd for FrameName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoName {
    pub camera_id: String,
    pub stamp: String,
    pub part: Option<usize>,
}

impl VideoName {
    pub fn new(camera_id: &str, consolidated_at: &DateTime<Utc>, part: Option<usize>) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            stamp: file_stamp(consolidated_at),
            part,
        }
    }

    pub fn file_name(&self) -> String {
        match self.part {
            Some(part) => format!(
                "{}_{}_part{:02}.{}",
                self.camera_id, self.stamp, part, VIDEO_EXTENSION
            ),
            None => format!("{}_{}.{}", self.camera_id, self.stamp, VIDEO_EXTENSION),
        }
    }
}

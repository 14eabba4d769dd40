// src/recorder/config.rs
use std::path::PathBuf;
use std::time::Duration;

use crate::core::error::ConfigError;

/// What happens to frame files once their chunk became a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Remove the consumed frames.
    Delete,
    /// Leave consumed frames for retention; a per-camera watermark keeps them
    /// out of later passes.
    Keep,
    /// Like `Keep`, and compact the unconsumed frames so their sequence
    /// continues right after the last consumed one.
    Renumber,
}

/// Validated settings the pipeline runs with. Built by the config loader.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    pub queue_capacity: usize,
    /// Frames per encoder invocation; 0 puts every pending frame in one chunk.
    pub max_frames_per_batch: usize,
    /// Every Nth persisted frame of a camera requests a pass; 0 disables it.
    pub consolidation_threshold: u64,
    pub min_batch_frames: usize,
    pub consolidation_interval: Duration,
    pub retention_window: Duration,
    pub retention_interval: Duration,
    pub delete_after_consolidation: bool,
    pub renumber_remaining: bool,
    /// Accept a non-empty output even when the encoder exits non-zero.
    pub lenient_encoder_success: bool,
    pub reencode_quality: Option<u8>,
    pub frame_rate: u32,
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("frames"),
            queue_capacity: 100,
            max_frames_per_batch: 30,
            consolidation_threshold: 30,
            min_batch_frames: 1,
            consolidation_interval: Duration::from_secs(10),
            retention_window: Duration::from_secs(24 * 3600),
            retention_interval: Duration::from_secs(300),
            delete_after_consolidation: true,
            renumber_remaining: false,
            lenient_encoder_success: true,
            reencode_quality: Some(90),
            frame_rate: 30,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl PipelineConfig {
    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn disposition(&self) -> FrameDisposition {
        match (self.delete_after_consolidation, self.renumber_remaining) {
            (true, _) => FrameDisposition::Delete,
            (false, true) => FrameDisposition::Renumber,
            (false, false) => FrameDisposition::Keep,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::message("output_dir must not be empty"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::message("queue_capacity must be at least 1"));
        }
        if self.min_batch_frames == 0 {
            return Err(ConfigError::message("min_batch_frames must be at least 1"));
        }
        if self.max_frames_per_batch > 0 && self.min_batch_frames > self.max_frames_per_batch {
            return Err(ConfigError::message(format!(
                "min_batch_frames ({}) exceeds max_frames_per_batch ({})",
                self.min_batch_frames, self.max_frames_per_batch
            )));
        }
        if self.consolidation_interval.is_zero() {
            return Err(ConfigError::message("consolidation_interval must be positive"));
        }
        if self.retention_interval.is_zero() {
            return Err(ConfigError::message("retention_interval must be positive"));
        }
        if self.retention_window.is_zero() {
            return Err(ConfigError::message("retention_window must be positive"));
        }
        if self.frame_rate == 0 {
            return Err(ConfigError::message("frame_rate must be positive"));
        }
        if self.delete_after_consolidation && self.renumber_remaining {
            return Err(ConfigError::message(
                "delete_after_consolidation and renumber_remaining are mutually exclusive",
            ));
        }
        if let Some(quality) = self.reencode_quality {
            if !(1..=100).contains(&quality) {
                return Err(ConfigError::message(format!(
                    "reencode_quality {} outside 1..=100",
                    quality
                )));
            }
        }
        Ok(())
    }
}

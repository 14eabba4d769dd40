// src/recorder/mod.rs

use std::time::SystemTime;

pub mod config;
pub mod consolidate;
pub mod encoder;
pub mod persist;
pub mod playlist;
pub mod retention_fs;
pub mod scheduler;

pub use config::{FrameDisposition, PipelineConfig};
pub use consolidate::{CameraReport, ConsolidationEngine, ConsolidationPolicy, PassReport, plan_chunks};
pub use encoder::{EncoderSettings, FfmpegEncoder, VideoEncoder};
pub use persist::PersistWorker;
pub use playlist::render_playlist;
pub use retention_fs::{FsRetention, SweepReport, run_retention_loop};
pub use scheduler::{ConsolidationTrigger, run_consolidation_loop};

pub trait RetentionPolicy: Send {
    fn sweep(&mut self, now: SystemTime) -> anyhow::Result<SweepReport>;
}

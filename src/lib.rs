// src/lib.rs
pub mod config;
pub mod core;
pub mod ingest;
pub mod metrics;
pub mod monitoring;
pub mod pipeline;
pub mod recorder;
pub mod simulator;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use crate::core::{ComponentLogger, LogContext, ShutdownSignal, SubmitError};
pub use crate::core::timestamp::utc_ns_now;
pub use ingest::FrameSubmission;
pub use metrics::{MetricsRecorder, NoopMetrics, PipelineMetrics};
pub use pipeline::{LifecycleState, Pipeline};
pub use recorder::{FfmpegEncoder, PipelineConfig, VideoEncoder};

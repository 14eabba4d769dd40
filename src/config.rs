use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use crate::recorder::{EncoderSettings, PipelineConfig};
use crate::store::is_valid_camera_id;

// ---------- Storage ----------
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub output_dir: String,
    pub retention_secs: u64,
    pub retention_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: "frames".to_string(),
            retention_secs: 24 * 3600,
            retention_interval_secs: 300,
        }
    }
}

// ---------- Pipeline ----------
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PipelineSection {
    pub queue_capacity: usize,
    pub max_frames_per_batch: usize,
    pub consolidation_threshold: u64,
    pub min_batch_frames: usize,
    pub consolidation_interval_secs: u64,
    pub delete_after_consolidation: bool,
    pub renumber_remaining: bool,
    pub lenient_encoder_success: bool,
    /// 0 keeps the submitted bytes as they are.
    pub reencode_quality: u8,
    pub shutdown_timeout_ms: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            max_frames_per_batch: 30,
            consolidation_threshold: 30,
            min_batch_frames: 1,
            consolidation_interval_secs: 10,
            delete_after_consolidation: true,
            renumber_remaining: false,
            lenient_encoder_success: true,
            reencode_quality: 90,
            shutdown_timeout_ms: 5000,
        }
    }
}

// ---------- Encoder ----------
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EncoderConfig {
    pub program: String,
    pub frame_rate: u32,
    pub codec: String,
    pub preset: String,
    pub pix_fmt: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        let settings = EncoderSettings::default();
        Self {
            program: settings.program,
            frame_rate: settings.frame_rate,
            codec: settings.codec,
            preset: settings.preset,
            pix_fmt: settings.pix_fmt,
        }
    }
}

// ---------- Monitoring ----------
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub http_port: u16,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            http_port: 8088,
        }
    }
}

// ---------- Simulator ----------
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SimulatorConfig {
    pub enabled: bool,
    pub cameras: Vec<String>,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    /// Submit base64 text instead of raw JPEG bytes.
    pub base64: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cameras: vec!["cam-1".to_string()],
            fps: 10,
            width: 640,
            height: 360,
            base64: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub storage: StorageConfig,
    pub pipeline: PipelineSection,
    pub encoder: EncoderConfig,
    pub monitoring: MonitoringConfig,
    pub simulator: SimulatorConfig,
}

pub fn load(path: &str) -> anyhow::Result<Config> {
    let txt = std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    parse(&txt).with_context(|| format!("parsing {}", path))
}

pub fn parse(txt: &str) -> anyhow::Result<Config> {
    Ok(toml::from_str(txt)?)
}

impl Config {
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn encoder_settings(&self) -> EncoderSettings {
        EncoderSettings {
            program: self.encoder.program.clone(),
            frame_rate: self.encoder.frame_rate,
            codec: self.encoder.codec.clone(),
            preset: self.encoder.preset.clone(),
            pix_fmt: self.encoder.pix_fmt.clone(),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let p = &self.pipeline;
        PipelineConfig {
            output_dir: PathBuf::from(&self.storage.output_dir),
            queue_capacity: p.queue_capacity,
            max_frames_per_batch: p.max_frames_per_batch,
            consolidation_threshold: p.consolidation_threshold,
            min_batch_frames: p.min_batch_frames,
            consolidation_interval: Duration::from_secs(p.consolidation_interval_secs),
            retention_window: Duration::from_secs(self.storage.retention_secs),
            retention_interval: Duration::from_secs(self.storage.retention_interval_secs),
            delete_after_consolidation: p.delete_after_consolidation,
            renumber_remaining: p.renumber_remaining,
            lenient_encoder_success: p.lenient_encoder_success,
            reencode_quality: (p.reencode_quality > 0).then_some(p.reencode_quality),
            frame_rate: self.encoder.frame_rate,
            shutdown_timeout: Duration::from_millis(p.shutdown_timeout_ms),
        }
    }

    /// Checks everything and returns the pipeline settings to run with.
    pub fn validate(&self) -> anyhow::Result<PipelineConfig> {
        if self.encoder.program.trim().is_empty() {
            bail!("encoder.program must not be empty");
        }
        for (field, value) in [
            ("encoder.codec", &self.encoder.codec),
            ("encoder.preset", &self.encoder.preset),
            ("encoder.pix_fmt", &self.encoder.pix_fmt),
        ] {
            if value.trim().is_empty() {
                bail!("{} must not be empty", field);
            }
        }

        if self.monitoring.enabled && self.monitoring.http_port == 0 {
            bail!("monitoring.http_port must be set when monitoring is enabled");
        }

        if self.simulator.enabled {
            let sim = &self.simulator;
            if sim.cameras.is_empty() {
                bail!("simulator requires at least one camera");
            }
            if let Some(bad) = sim.cameras.iter().find(|c| !is_valid_camera_id(c)) {
                bail!("simulator camera id '{}' is not a valid directory name", bad);
            }
            if sim.fps == 0 || sim.width == 0 || sim.height == 0 {
                bail!("simulator fps, width and height must be positive");
            }
        }

        let pipeline = self.pipeline_config();
        pipeline.validate().context("invalid [pipeline]/[storage] settings")?;
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::FrameDisposition;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = parse("").unwrap();
        let pipeline = cfg.validate().unwrap();
        assert_eq!(pipeline.queue_capacity, 100);
        assert_eq!(pipeline.max_frames_per_batch, 30);
        assert_eq!(pipeline.consolidation_threshold, 30);
        assert_eq!(pipeline.consolidation_interval, Duration::from_secs(10));
        assert_eq!(pipeline.reencode_quality, Some(90));
        assert_eq!(pipeline.disposition(), FrameDisposition::Delete);
        assert_eq!(cfg.log_level(), "info");
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = parse(
            r#"
            log_level = "debug"

            [storage]
            output_dir = "/srv/cctv"
            retention_secs = 3600

            [pipeline]
            queue_capacity = 8
            delete_after_consolidation = false
            renumber_remaining = true
            reencode_quality = 0

            [encoder]
            frame_rate = 15
            "#,
        )
        .unwrap();

        let pipeline = cfg.validate().unwrap();
        assert_eq!(pipeline.output_dir, PathBuf::from("/srv/cctv"));
        assert_eq!(pipeline.queue_capacity, 8);
        assert_eq!(pipeline.retention_window, Duration::from_secs(3600));
        assert_eq!(pipeline.reencode_quality, None);
        assert_eq!(pipeline.frame_rate, 15);
        assert_eq!(pipeline.disposition(), FrameDisposition::Renumber);
        assert_eq!(cfg.encoder_settings().frame_rate, 15);
    }

    #[test]
    fn conflicting_disposition_is_rejected() {
        let cfg = parse(
            r#"
            [pipeline]
            delete_after_consolidation = true
            renumber_remaining = true
            "#,
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn simulator_camera_ids_are_checked() {
        let cfg = parse(
            r#"
            [simulator]
            enabled = true
            cameras = ["ok", "../escape"]
            "#,
        )
        .unwrap();
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("../escape"));
    }

    #[test]
    fn unknown_types_fail_to_parse() {
        assert!(parse("[pipeline]\nqueue_capacity = \"lots\"").is_err());
    }
}

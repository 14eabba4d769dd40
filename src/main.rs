// src/main.rs

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info, warn};

use cctv_archiver::config::{self, Config};
use cctv_archiver::monitoring::start_monitoring_server;
use cctv_archiver::simulator::CameraSimulator;
use cctv_archiver::{FfmpegEncoder, Pipeline, PipelineMetrics, ShutdownSignal};

const STATUS_INTERVAL: Duration = Duration::from_secs(30);

fn main() -> anyhow::Result<()> {
    // ------------------------------------------------------------
    // Config
    // ------------------------------------------------------------
    let cfg_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".into());

    let cfg: Config = config::load(&cfg_path)?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cfg.log_level()))
        .format_timestamp_millis()
        .init();
    info!("[cctv] loaded {}", cfg_path);

    let pipeline_cfg = cfg.validate()?;

    // ------------------------------------------------------------
    // Graceful shutdown
    // ------------------------------------------------------------
    let shutdown = Arc::new(ShutdownSignal::new());
    {
        let s = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("[cctv] shutdown requested");
            s.trigger();
        })?;
    }

    // ------------------------------------------------------------
    // Encoder / Pipeline
    // ------------------------------------------------------------
    let encoder = FfmpegEncoder::new(cfg.encoder_settings());
    match encoder.check_available() {
        Ok(version) => info!("[cctv] encoder: {}", version),
        Err(e) => warn!("[cctv] encoder unavailable, consolidation will fail: {:#}", e),
    }

    let metrics = Arc::new(PipelineMetrics::new());
    let pipeline = Arc::new(Pipeline::new(
        "main",
        pipeline_cfg,
        Arc::new(encoder),
        metrics.clone(),
    )?);
    pipeline.start()?;

    let monitoring = start_monitoring(&cfg, &pipeline, &metrics, &shutdown);
    let simulators = start_simulators(&cfg, &pipeline, &shutdown);

    // ------------------------------------------------------------
    // Main loop
    // ------------------------------------------------------------
    while !shutdown.wait_timeout(STATUS_INTERVAL) {
        let snap = metrics.snapshot();
        debug!(
            "[cctv] accepted={} dropped={} persisted={} videos={} queue={}/{}",
            snap.submissions_accepted,
            snap.submissions_dropped,
            snap.frames_persisted,
            snap.videos_created,
            pipeline.queue_len(),
            pipeline.queue_capacity()
        );
    }

    info!("[cctv] shutting down");
    for sim in simulators {
        if sim.join().is_err() {
            error!("[cctv] simulator thread panicked");
        }
    }

    let report = pipeline.stop();
    info!("[cctv] {}", report.summary());

    if let Some(handle) = monitoring {
        let _ = handle.join();
    }

    let snap = metrics.snapshot();
    info!(
        "[cctv] done: persisted={} videos={} dropped={} avg_processing={:.2}ms",
        snap.frames_persisted, snap.videos_created, snap.submissions_dropped, snap.average_processing_ms
    );
    Ok(())
}

fn start_monitoring(
    cfg: &Config,
    pipeline: &Arc<Pipeline>,
    metrics: &Arc<PipelineMetrics>,
    shutdown: &Arc<ShutdownSignal>,
) -> Option<JoinHandle<()>> {
    if !cfg.monitoring.enabled {
        return None;
    }

    let bind = format!("0.0.0.0:{}", cfg.monitoring.http_port);
    match start_monitoring_server(&bind, pipeline.clone(), metrics.clone(), shutdown.clone()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!("[cctv] monitoring disabled: {:#}", e);
            None
        }
    }
}

fn start_simulators(
    cfg: &Config,
    pipeline: &Arc<Pipeline>,
    shutdown: &Arc<ShutdownSignal>,
) -> Vec<JoinHandle<()>> {
    if !cfg.simulator.enabled {
        return Vec::new();
    }

    let sim = &cfg.simulator;
    let mut handles = Vec::with_capacity(sim.cameras.len());
    for camera_id in &sim.cameras {
        let simulator = CameraSimulator::new(camera_id, sim.width, sim.height, sim.fps, sim.base64);
        let pipeline = pipeline.clone();
        let shutdown = shutdown.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("sim-{}", camera_id))
            .spawn(move || {
                simulator.run(|frame| pipeline.submit_frame(frame), shutdown);
            });
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(e) => error!("[cctv] simulator {} not started: {}", camera_id, e),
        }
    }
    info!("[cctv] {} simulated cameras", handles.len());
    handles
}

use std::fmt::Write;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

use crate::core::shutdown::ShutdownSignal;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::pipeline::{CameraDirectory, LifecycleState, Pipeline};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Serialize)]
struct StatusBody<'a> {
    pipeline: &'a str,
    state: LifecycleState,
    queue_len: usize,
    queue_capacity: usize,
    metrics: MetricsSnapshot,
    cameras: Vec<CameraDirectory>,
}

/// Serves `/health`, `/metrics` (Prometheus text) and `/status` (JSON)
/// until `shutdown` fires.
pub fn start_monitoring_server(
    bind: &str,
    pipeline: Arc<Pipeline>,
    metrics: Arc<PipelineMetrics>,
    shutdown: Arc<ShutdownSignal>,
) -> anyhow::Result<JoinHandle<()>> {
    let server = Server::http(bind).map_err(|e| anyhow::anyhow!("monitoring bind {}: {}", bind, e))?;
    log::info!("[monitoring] server on {}", bind);

    let handle = thread::Builder::new()
        .name("monitoring".to_string())
        .spawn(move || {
            while !shutdown.is_triggered() {
                match server.recv_timeout(POLL_INTERVAL) {
                    Ok(Some(req)) => respond(req, &pipeline, &metrics),
                    Ok(None) => {}
                    Err(e) => {
                        log::error!("[monitoring] accept failed: {}", e);
                        break;
                    }
                }
            }
            log::info!("[monitoring] server stopped");
        })?;

    Ok(handle)
}

fn respond(req: Request, pipeline: &Pipeline, metrics: &PipelineMetrics) {
    let response = match (req.method(), req.url()) {
        (&Method::Get, "/health") => {
            let running = pipeline.is_running();
            let body = if running { "ok" } else { "not_running" };
            text(body, if running { 200 } else { 503 }, "text/plain")
        }
        (&Method::Get, "/metrics") => {
            let cameras = pipeline.frame_directories().unwrap_or_default();
            let body = build_metrics(
                &metrics.snapshot(),
                &cameras,
                pipeline.queue_len(),
                pipeline.queue_capacity(),
            );
            text(&body, 200, "text/plain; version=0.0.4")
        }
        (&Method::Get, "/status") => {
            let body = StatusBody {
                pipeline: pipeline.name(),
                state: pipeline.state(),
                queue_len: pipeline.queue_len(),
                queue_capacity: pipeline.queue_capacity(),
                metrics: metrics.snapshot(),
                cameras: pipeline.frame_directories().unwrap_or_default(),
            };
            match serde_json::to_string_pretty(&body) {
                Ok(json) => text(&json, 200, "application/json"),
                Err(e) => text(&format!("status encoding failed: {}", e), 500, "text/plain"),
            }
        }
        _ => Response::from_string(String::new()).with_status_code(StatusCode(404)),
    };

    if let Err(e) = req.respond(response) {
        log::debug!("[monitoring] response failed: {}", e);
    }
}

fn text(body: &str, status: u16, content_type: &str) -> Response<std::io::Cursor<Vec<u8>>> {
    let response = Response::from_string(body).with_status_code(StatusCode(status));
    match Header::from_bytes("Content-Type", content_type) {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

pub fn build_metrics(
    snap: &MetricsSnapshot,
    cameras: &[CameraDirectory],
    queue_len: usize,
    queue_capacity: usize,
) -> String {
    let mut output = String::new();

    let counters = [
        ("cctv_submissions_accepted_total", "Frames accepted into the ingest queue.", snap.submissions_accepted),
        ("cctv_submissions_dropped_total", "Frames rejected because the queue was full.", snap.submissions_dropped),
        ("cctv_submissions_rejected_total", "Frames rejected by validation or after close.", snap.submissions_rejected),
        ("cctv_frames_persisted_total", "Frames written to disk.", snap.frames_persisted),
        ("cctv_frame_errors_total", "Frames that failed validation or writing.", snap.frame_errors),
        ("cctv_consolidation_passes_total", "Consolidation passes run.", snap.consolidation_passes),
        ("cctv_videos_created_total", "Video files produced.", snap.videos_created),
        ("cctv_frames_consolidated_total", "Frames encoded into videos.", snap.frames_consolidated),
        ("cctv_chunk_failures_total", "Chunks whose encoding failed.", snap.chunk_failures),
        ("cctv_scan_errors_total", "Camera directories that could not be listed.", snap.scan_errors),
        ("cctv_frames_disposed_total", "Consolidated frames deleted.", snap.frames_disposed),
        ("cctv_frames_expired_total", "Frames removed by retention.", snap.frames_expired),
        ("cctv_shutdown_timeouts_total", "Workers still running at the shutdown deadline.", snap.shutdown_timeouts),
    ];
    for (name, help, value) in counters {
        let _ = writeln!(output, "# HELP {} {}", name, help);
        let _ = writeln!(output, "# TYPE {} counter", name);
        let _ = writeln!(output, "{} {}", name, value);
    }

    let _ = writeln!(output, "# HELP cctv_processing_time_ms_avg Average time to persist one frame.");
    let _ = writeln!(output, "# TYPE cctv_processing_time_ms_avg gauge");
    let _ = writeln!(output, "cctv_processing_time_ms_avg {}", snap.average_processing_ms);

    let _ = writeln!(output, "# HELP cctv_queue_frames Frames waiting in the ingest queue.");
    let _ = writeln!(output, "# TYPE cctv_queue_frames gauge");
    let _ = writeln!(output, "cctv_queue_frames {}", queue_len);
    let _ = writeln!(output, "# HELP cctv_queue_capacity_frames Ingest queue capacity.");
    let _ = writeln!(output, "# TYPE cctv_queue_capacity_frames gauge");
    let _ = writeln!(output, "cctv_queue_capacity_frames {}", queue_capacity);

    let _ = writeln!(output, "# HELP cctv_camera_frames_on_disk Frames waiting for consolidation.");
    let _ = writeln!(output, "# TYPE cctv_camera_frames_on_disk gauge");
    for camera in cameras {
        let _ = writeln!(
            output,
            "cctv_camera_frames_on_disk{{camera=\"{}\"}} {}",
            escape_label_value(&camera.camera_id),
            camera.frames_on_disk
        );
    }

    let _ = writeln!(output, "# HELP cctv_camera_frames_persisted_total Frames persisted per camera.");
    let _ = writeln!(output, "# TYPE cctv_camera_frames_persisted_total counter");
    for camera in cameras {
        if let Some(state) = &camera.state {
            let _ = writeln!(
                output,
                "cctv_camera_frames_persisted_total{{camera=\"{}\"}} {}",
                escape_label_value(&camera.camera_id),
                state.frames_persisted
            );
        }
    }

    let _ = writeln!(output, "# HELP cctv_camera_videos_total Videos created per camera.");
    let _ = writeln!(output, "# TYPE cctv_camera_videos_total counter");
    for camera in cameras {
        if let Some(state) = &camera.state {
            let _ = writeln!(
                output,
                "cctv_camera_videos_total{{camera=\"{}\"}} {}",
                escape_label_value(&camera.camera_id),
                state.videos_created
            );
        }
    }

    output
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\"', "\\\"")
        .replace('\n', "\\n")
}

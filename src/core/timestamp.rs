use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// Timestamp layout used in frame and video file names, e.g. `20240501_134502.250`.
pub const FILE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S%.3f";

pub fn utc_ns_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() * 1_000_000_000 + d.subsec_nanos() as u64)
        .unwrap_or(0)
}

pub fn file_stamp(ts: &DateTime<Utc>) -> String {
    ts.format(FILE_STAMP_FORMAT).to_string()
}

pub fn utc_from_ns(utc_ns: u64) -> Option<DateTime<Utc>> {
    if utc_ns == 0 {
        return None;
    }
    let secs = (utc_ns / 1_000_000_000) as i64;
    let nanos = (utc_ns % 1_000_000_000) as u32;
    DateTime::from_timestamp(secs, nanos)
}

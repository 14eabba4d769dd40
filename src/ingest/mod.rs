//! Frame ingestion: the submission type, its validation and the bounded queue.
//!
//! The transport layer owns connections and only ever calls `submit`; from
//! here on a frame is owned by the queue and then by the persistence worker.

use chrono::{DateTime, Utc};

pub mod queue;
pub mod validate;

pub use queue::{DEFAULT_QUEUE_CAPACITY, IngestQueue};
pub use validate::{FrameValidator, PreparedFrame, check_submission, looks_like_base64};

/// One frame as delivered by the transport. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSubmission {
    pub camera_id: String,
    /// Raw JPEG bytes or base64 text of them.
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
}

impl FrameSubmission {
    pub fn new(
        camera_id: impl Into<String>,
        payload: Vec<u8>,
        timestamp: DateTime<Utc>,
        sequence: u64,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            payload,
            timestamp,
            sequence,
        }
    }
}

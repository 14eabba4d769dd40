pub mod error;
pub mod lock;
pub mod logging;
pub mod shutdown;
pub mod timestamp;

pub use error::{ChunkError, ConfigError, EncoderError, FrameError, FrameResult, PlaylistError, SubmitError};
pub use lock::lock_mutex;
pub use logging::{ComponentLogger, LogContext};
pub use shutdown::ShutdownSignal;
pub use timestamp::{file_stamp, utc_ns_now};

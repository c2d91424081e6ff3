use std::path::PathBuf;
use std::sync::Arc;

use crate::progress::ProgressSnapshot;

/// Notifications emitted while a session runs.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    SessionStarted {
        output: PathBuf,
        total: usize,
        /// Segments already in the output when the session began.
        resumed_from: Option<usize>,
    },
    InitSegmentSaved {
        bytes: u64,
    },
    /// The caller opted out of the init segment; the output may not decode.
    InitSegmentSkipped,
    FetchRetry {
        label: String,
        uri: String,
        attempt: u32,
        error: String,
    },
    /// A response arrived without `Content-Length`; part sizes are no longer checked.
    LengthCheckDisabled {
        label: String,
    },
    SegmentFailed {
        index: usize,
        error: String,
    },
    Progress(ProgressSnapshot),
    Finished {
        completed: usize,
        total: usize,
        bytes: u64,
    },
    Aborted {
        reason: String,
    },
}

pub type OnEvent = Arc<dyn Fn(DownloadEvent) + Send + Sync>;

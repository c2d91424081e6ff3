use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-window progress report.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: usize,
    /// Plaintext bytes appended during this run.
    pub bytes_downloaded: u64,
    /// Whole percent; never reports 100 before the last segment is committed.
    pub percent: u8,
    /// Estimated time until the remaining segments are done.
    pub eta: Duration,
    pub throughput_bytes_per_sec: f64,
}

pub type OnProgress = Arc<dyn Fn(ProgressSnapshot) + Send + Sync>;

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} parts downloaded [{}%] ({})",
            self.completed,
            self.total,
            self.percent,
            format_eta(self.eta)
        )
    }
}

/// Tracks wall time for one run of a session.
///
/// ETA is extrapolated from the segments fetched in this run only, so a
/// resumed session does not count the already-committed prefix as free work.
#[derive(Debug)]
pub struct ProgressTracker {
    started: Instant,
    run_start: usize,
    total: usize,
}

impl ProgressTracker {
    pub fn new(run_start: usize, total: usize) -> Self {
        Self {
            started: Instant::now(),
            run_start,
            total,
        }
    }

    pub fn snapshot(&self, completed: usize, bytes_downloaded: u64) -> ProgressSnapshot {
        compute_snapshot(
            self.started.elapsed(),
            completed - self.run_start,
            self.total - self.run_start,
            completed,
            self.total,
            bytes_downloaded,
        )
    }
}

pub fn compute_snapshot(
    elapsed: Duration,
    run_done: usize,
    run_total: usize,
    completed: usize,
    total: usize,
    bytes_downloaded: u64,
) -> ProgressSnapshot {
    let percent = if total == 0 {
        100
    } else {
        let rounded = ((completed as f64 / total as f64) * 100.0).round() as u8;
        if rounded >= 100 && completed < total {
            99
        } else {
            rounded.min(100)
        }
    };

    let eta = if run_done == 0 {
        Duration::ZERO
    } else {
        let factor = run_total as f64 / run_done as f64 - 1.0;
        Duration::from_secs_f64((elapsed.as_secs_f64() * factor).max(0.0))
    };

    let secs = elapsed.as_secs_f64();
    let throughput_bytes_per_sec = if secs > 0.0 {
        bytes_downloaded as f64 / secs
    } else {
        0.0
    };

    ProgressSnapshot {
        completed,
        total,
        bytes_downloaded,
        percent,
        eta,
        throughput_bytes_per_sec,
    }
}

/// `hh:mm:ss`, or `mm:ss` under an hour.
pub fn format_eta(eta: Duration) -> String {
    let secs = eta.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

use std::time::Duration;

use hlsdl_engine::DownloadEvent;
use indicatif::{HumanBytes, ProgressBar, ProgressDrawTarget, ProgressStyle};

fn download_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {msg}\n[{elapsed_precise}] [{bar:40.green/white}] {pos}/{len} parts (eta {eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// Renders session events as a single terminal progress bar.
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
    disabled: bool,
}

impl ProgressManager {
    pub fn new() -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
        bar.set_style(download_style());
        Self {
            bar,
            disabled: false,
        }
    }

    pub fn new_disabled() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            disabled: true,
        }
    }

    pub fn handle_event(&self, event: DownloadEvent) {
        if self.disabled {
            return;
        }

        match event {
            DownloadEvent::SessionStarted {
                output,
                total,
                resumed_from,
            } => {
                self.bar.set_length(total as u64);
                self.bar.set_position(resumed_from.unwrap_or(0) as u64);
                self.bar
                    .set_message(format!("Downloading {}", output.to_string_lossy()));
                self.bar.enable_steady_tick(Duration::from_millis(500));
            }
            DownloadEvent::FetchRetry { label, attempt, .. } => {
                self.bar
                    .set_message(format!("Part {label}: attempt {attempt}"));
            }
            DownloadEvent::Progress(snapshot) => {
                self.bar.set_position(snapshot.completed as u64);
                self.bar.set_message(format!(
                    "{} written @ {}/s",
                    HumanBytes(snapshot.bytes_downloaded),
                    HumanBytes(snapshot.throughput_bytes_per_sec as u64)
                ));
            }
            DownloadEvent::Finished { bytes, .. } => {
                self.bar
                    .finish_with_message(format!("Finished, {} written", HumanBytes(bytes)));
            }
            DownloadEvent::Aborted { reason } => {
                self.bar.abandon_with_message(format!("Aborted: {reason}"));
            }
            _ => {}
        }
    }

    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }
}

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::error::HlsDownloadError;
use crate::proxy::ProxyConfig;

pub const DEFAULT_OUTPUT_FILE: &str = "stream.ts";

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; WOW64; rv:70.0) Gecko/20100101 Firefox/70.0";

/// What to do when the output file already exists and no resume record applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwritePolicy {
    /// Delete the existing file and download from scratch.
    Overwrite,
    /// Keep the existing bytes and append after them.
    Continue,
    /// Leave the file alone and skip the download.
    Abort,
}

impl std::str::FromStr for OverwritePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(OverwritePolicy::Overwrite),
            "continue" => Ok(OverwritePolicy::Continue),
            "abort" => Ok(OverwritePolicy::Abort),
            other => Err(format!("Invalid overwrite policy: '{other}'")),
        }
    }
}

/// Options for one download session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Output artifact; the resume record lives next to it as `<output>.resume`
    pub output_path: PathBuf,

    /// Number of segments fetched concurrently per window
    pub concurrency: usize,

    /// Retries allowed per fetch after the first attempt
    pub retry_budget: u32,

    /// Base delay for the exponential backoff between fetch retries
    pub retry_delay_base: Duration,

    /// Segments to skip; a non-zero value bypasses resume record detection
    pub resume_offset: usize,

    /// Prefix for relative segment and key URIs
    pub base_uri: Option<String>,

    /// Proxy configuration (optional)
    pub proxy: Option<ProxyConfig>,

    /// Whether to use system proxy settings when no explicit proxy is set
    pub use_system_proxy: bool,

    /// Do not download the initialization segment
    pub skip_init_segment: bool,

    /// Timeout for a single fetch attempt
    pub request_timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    pub user_agent: String,

    /// Headers merged into every request
    pub headers: HeaderMap,

    /// Collision policy; `None` defers to the session's prompt hook
    pub overwrite_policy: Option<OverwritePolicy>,

    /// Attempts for a failing append before the session is aborted
    pub write_retries: u32,

    /// Fixed delay between append attempts
    pub write_retry_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from(DEFAULT_OUTPUT_FILE),
            concurrency: 5,
            retry_budget: 4,
            retry_delay_base: Duration::from_millis(500),
            resume_offset: 0,
            base_uri: None,
            proxy: None,
            use_system_proxy: true,
            skip_init_segment: false,
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: SessionConfig::get_default_headers(),
            overwrite_policy: None,
            write_retries: 3,
            write_retry_delay: Duration::from_secs(1),
        }
    }
}

impl SessionConfig {
    pub fn builder() -> crate::builder::SessionConfigBuilder {
        crate::builder::SessionConfigBuilder::new()
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));

        default_headers
    }

    /// Path of the resume record that belongs to `output_path`.
    pub fn resume_path(&self) -> PathBuf {
        let mut name = self.output_path.as_os_str().to_owned();
        name.push(".resume");
        PathBuf::from(name)
    }

    /// Checks the options against the playlist they will be used with.
    pub fn validate(&self, total_segments: usize) -> Result<(), HlsDownloadError> {
        if total_segments == 0 {
            return Err(HlsDownloadError::PlaylistEmpty);
        }
        if self.concurrency == 0 {
            return Err(HlsDownloadError::Config(
                "concurrency width must be at least 1".to_string(),
            ));
        }
        if self.resume_offset > total_segments {
            return Err(HlsDownloadError::Config(format!(
                "resume offset {} exceeds segment count {}",
                self.resume_offset, total_segments
            )));
        }
        if self.write_retries == 0 {
            return Err(HlsDownloadError::Config(
                "write retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

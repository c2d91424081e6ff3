//! # Builder for SessionConfig
//!
//! Fluent construction of [`SessionConfig`] values.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use hlsdl_engine::{OverwritePolicy, SessionConfig};
//!
//! let config = SessionConfig::builder()
//!     .with_output_path("episode.ts")
//!     .with_concurrency(8)
//!     .with_retry_budget(6)
//!     .with_request_timeout(Duration::from_secs(30))
//!     .with_base_uri("https://cdn.example.com/hls/")
//!     .with_header("Referer", "https://example.com/")
//!     .with_overwrite_policy(OverwritePolicy::Overwrite)
//!     .build();
//!
//! assert_eq!(config.concurrency, 8);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::config::{OverwritePolicy, SessionConfig};
use crate::proxy::ProxyConfig;

/// Builder for creating SessionConfig instances with a fluent API
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
        }
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_path = path.into();
        self
    }

    /// Set the window width
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    pub fn with_retry_budget(mut self, retries: u32) -> Self {
        self.config.retry_budget = retries;
        self
    }

    pub fn with_retry_delay_base(mut self, delay: Duration) -> Self {
        self.config.retry_delay_base = delay;
        self
    }

    /// Skip the first `offset` segments without consulting the resume record
    pub fn with_resume_offset(mut self, offset: usize) -> Self {
        self.config.resume_offset = offset;
        self
    }

    pub fn with_base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.config.base_uri = Some(base_uri.into());
        self
    }

    /// Set the proxy configuration
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = Some(proxy);
        self.config.use_system_proxy = false; // Explicit proxy overrides system proxy
        self
    }

    /// Set whether to use system proxy settings if available
    pub fn with_system_proxy(mut self, use_system_proxy: bool) -> Self {
        if self.config.proxy.is_none() {
            self.config.use_system_proxy = use_system_proxy;
        }
        self
    }

    pub fn with_skip_init_segment(mut self, skip: bool) -> Self {
        self.config.skip_init_segment = skip;
        self
    }

    /// Set the timeout applied to every single fetch attempt
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add a custom HTTP header
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<reqwest::header::HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.headers.insert(name, value);
        }
        self
    }

    /// Merge headers over the defaults. A name present in `headers` replaces
    /// the configured values for that name; repeated names keep every value.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for name in headers.keys() {
            self.config.headers.remove(name);
        }
        for (name, value) in headers.iter() {
            self.config.headers.append(name.clone(), value.clone());
        }
        self
    }

    pub fn with_overwrite_policy(mut self, policy: OverwritePolicy) -> Self {
        self.config.overwrite_policy = Some(policy);
        self
    }

    /// Bound and delay for retrying failed appends to the output file
    pub fn with_write_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.config.write_retries = attempts;
        self.config.write_retry_delay = delay;
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

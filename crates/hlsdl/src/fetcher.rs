// Retrying fetch layer: wraps a single-attempt Transport with a bounded
// exponential backoff, a per-attempt timeout and the Content-Length guard.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::header::HeaderMap;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::events::{DownloadEvent, OnEvent};
use crate::segment::ByteRange;
use crate::transport::{FetchRequest, FetchResponse, Transport};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

pub struct Fetcher {
    transport: Arc<dyn Transport>,
    headers: HeaderMap,
    retry_budget: u32,
    retry_delay_base: Duration,
    request_timeout: Duration,
    /// Cleared for the rest of the session once a response lacks Content-Length.
    check_length: AtomicBool,
    on_event: Option<OnEvent>,
}

impl Fetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: &SessionConfig,
        on_event: Option<OnEvent>,
    ) -> Self {
        Self {
            transport,
            headers: config.headers.clone(),
            retry_budget: config.retry_budget,
            retry_delay_base: config.retry_delay_base,
            request_timeout: config.request_timeout,
            check_length: AtomicBool::new(true),
            on_event,
        }
    }

    pub fn is_length_check_enabled(&self) -> bool {
        self.check_length.load(Ordering::Relaxed)
    }

    /// Fetches `uri`, retrying transient faults up to the retry budget.
    pub async fn fetch(
        &self,
        label: &str,
        uri: &str,
        byte_range: Option<ByteRange>,
    ) -> Result<FetchResponse, TransportError> {
        self.fetch_validated(label, uri, byte_range, |_| Ok(()))
            .await
    }

    /// Like [`Fetcher::fetch`], with an extra response check. A transient error
    /// from `validate` is retried the same way as a network fault.
    pub async fn fetch_validated<F>(
        &self,
        label: &str,
        uri: &str,
        byte_range: Option<ByteRange>,
        validate: F,
    ) -> Result<FetchResponse, TransportError>
    where
        F: Fn(&FetchResponse) -> Result<(), TransportError> + Send + Sync,
    {
        let request = FetchRequest {
            uri: uri.to_string(),
            byte_range,
            headers: self.headers.clone(),
        };

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let result = self
                .attempt(&request)
                .await
                .and_then(|response| {
                    self.check_integrity(label, &response)?;
                    validate(&response)?;
                    Ok(response)
                });

            match result {
                Ok(response) => {
                    debug!(part = label, uri, attempts, "Fetch succeeded");
                    return Ok(response);
                }
                Err(e) if e.is_transient() && attempts <= self.retry_budget => {
                    let next_attempt = attempts + 1;
                    warn!(part = label, error = %e, "Part {}: attempt {} to retrieve data", label, next_attempt);
                    if let Some(on_event) = &self.on_event {
                        on_event(DownloadEvent::FetchRetry {
                            label: label.to_string(),
                            uri: uri.to_string(),
                            attempt: next_attempt,
                            error: e.to_string(),
                        });
                    }
                    tokio::time::sleep(self.backoff(attempts)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        if self.request_timeout.is_zero() {
            return self.transport.fetch(request).await;
        }
        match tokio::time::timeout(self.request_timeout, self.transport.fetch(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.request_timeout)),
        }
    }

    fn check_integrity(&self, label: &str, response: &FetchResponse) -> Result<(), TransportError> {
        if !self.check_length.load(Ordering::Relaxed) {
            return Ok(());
        }
        match response.content_length {
            Some(expected) if expected != response.body.len() as u64 => {
                Err(TransportError::IntegrityMismatch {
                    expected,
                    received: response.body.len() as u64,
                })
            }
            Some(_) => Ok(()),
            None => {
                if self.check_length.swap(false, Ordering::Relaxed) {
                    warn!("Part {}: can't check parts size!", label);
                    if let Some(on_event) = &self.on_event {
                        on_event(DownloadEvent::LengthCheckDisabled {
                            label: label.to_string(),
                        });
                    }
                }
                Ok(())
            }
        }
    }

    fn backoff(&self, attempts: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempts.saturating_sub(1));
        self.retry_delay_base
            .saturating_mul(factor)
            .min(MAX_RETRY_DELAY)
    }
}

// Window scheduler: fetches a window of segments concurrently and hands the
// window to the sink in playlist order once every member has succeeded.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tracing::{debug, error};

use crate::decryption::KeyCache;
use crate::error::HlsDownloadError;
use crate::events::{DownloadEvent, OnEvent};
use crate::fetcher::Fetcher;
use crate::segment::{Segment, resolve_uri};

/// Key lookup, fetch and decryption for one segment.
pub struct SegmentPipeline {
    fetcher: Arc<Fetcher>,
    keys: Arc<KeyCache>,
    base_uri: Option<String>,
}

impl SegmentPipeline {
    pub fn new(fetcher: Arc<Fetcher>, keys: Arc<KeyCache>, base_uri: Option<String>) -> Self {
        Self {
            fetcher,
            keys,
            base_uri,
        }
    }

    /// Returns the plaintext bytes of `segment`.
    pub async fn process(&self, segment: &Segment) -> Result<Bytes, HlsDownloadError> {
        let cipher = self.keys.build_cipher(segment).await?;

        let uri = resolve_uri(self.base_uri.as_deref(), &segment.uri)?;
        let response = self
            .fetcher
            .fetch(&segment.label(), &uri, segment.byte_range)
            .await
            .map_err(|source| HlsDownloadError::SegmentFetch {
                index: segment.index,
                uri: uri.clone(),
                source,
            })?;

        cipher
            .decrypt(response.body)
            .map_err(|reason| HlsDownloadError::Decryption {
                index: segment.index,
                reason,
            })
    }
}

/// Receives completed windows, in order, one at a time.
#[async_trait]
pub trait WindowSink: Send {
    /// `first` is the playlist index of `window[0]`.
    async fn commit(&mut self, first: usize, window: Vec<Bytes>) -> Result<(), HlsDownloadError>;
}

pub struct WindowScheduler {
    pipeline: Arc<SegmentPipeline>,
    width: usize,
    on_event: Option<OnEvent>,
}

impl WindowScheduler {
    pub fn new(pipeline: Arc<SegmentPipeline>, width: usize, on_event: Option<OnEvent>) -> Self {
        Self {
            pipeline,
            width: width.max(1),
            on_event,
        }
    }

    /// Downloads `segments[start..]` window by window.
    ///
    /// A window is committed only when all of its segments succeeded. The first
    /// failing window stops the run with [`HlsDownloadError::WindowFailed`] and
    /// none of its data reaches the sink.
    pub async fn run<S>(
        &self,
        segments: &[Segment],
        start: usize,
        sink: &mut S,
    ) -> Result<(), HlsDownloadError>
    where
        S: WindowSink + ?Sized,
    {
        let remaining = segments.get(start..).unwrap_or_default();
        for (n, window) in remaining.chunks(self.width).enumerate() {
            let first = start + n * self.width;
            debug!(first = first + 1, size = window.len(), "Starting window");
            let data = self.run_window(window).await?;
            sink.commit(first, data).await?;
        }
        Ok(())
    }

    async fn run_window(&self, window: &[Segment]) -> Result<Vec<Bytes>, HlsDownloadError> {
        let mut in_flight = FuturesUnordered::new();
        for (slot, segment) in window.iter().enumerate() {
            let pipeline = Arc::clone(&self.pipeline);
            in_flight.push(async move { (slot, pipeline.process(segment).await) });
        }

        let mut slots: Vec<Option<Bytes>> = vec![None; window.len()];
        let mut failed = 0;
        while let Some((slot, result)) = in_flight.next().await {
            match result {
                Ok(data) => slots[slot] = Some(data),
                Err(e) => {
                    failed += 1;
                    error!(error = %e, segment = e.segment_index(), "Segment failed");
                    if let Some(on_event) = &self.on_event {
                        on_event(DownloadEvent::SegmentFailed {
                            index: window[slot].index,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        if failed > 0 {
            error!("{} parts not downloaded", failed);
            return Err(HlsDownloadError::WindowFailed { failed });
        }
        Ok(slots.into_iter().flatten().collect())
    }
}

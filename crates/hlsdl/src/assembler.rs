// Output assembler: appends plaintext segments to the output file, rolling a
// half-written append back before retrying it.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::HlsDownloadError;

/// Append-only byte sink behind the assembler.
#[async_trait]
pub trait OutputSink: Send {
    async fn len(&mut self) -> std::io::Result<u64>;
    async fn truncate(&mut self, len: u64) -> std::io::Result<()>;
    async fn append(&mut self, data: &[u8]) -> std::io::Result<()>;
    async fn sync(&mut self) -> std::io::Result<()>;
}

/// The output file opened in append mode.
#[derive(Debug)]
pub struct FileSink {
    file: File,
}

impl FileSink {
    /// Opens (creating if needed) `path`; `truncate` discards existing content.
    pub async fn open(path: &Path, truncate: bool) -> std::io::Result<Self> {
        if truncate {
            File::create(path).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self { file })
    }
}

#[async_trait]
impl OutputSink for FileSink {
    async fn len(&mut self) -> std::io::Result<u64> {
        Ok(self.file.metadata().await?.len())
    }

    async fn truncate(&mut self, len: u64) -> std::io::Result<()> {
        self.file.set_len(len).await
    }

    async fn append(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.file.write_all(data).await?;
        self.file.flush().await
    }

    async fn sync(&mut self) -> std::io::Result<()> {
        self.file.sync_data().await
    }
}

pub struct Assembler<S: OutputSink = FileSink> {
    sink: S,
    /// Length of the output that is known to be good.
    committed: u64,
    start_len: u64,
    write_retries: u32,
    write_retry_delay: Duration,
}

impl Assembler<FileSink> {
    pub async fn open(
        path: &Path,
        truncate: bool,
        write_retries: u32,
        write_retry_delay: Duration,
    ) -> Result<Self, HlsDownloadError> {
        let sink = FileSink::open(path, truncate).await?;
        Self::with_sink(sink, write_retries, write_retry_delay).await
    }
}

impl<S: OutputSink> Assembler<S> {
    pub async fn with_sink(
        mut sink: S,
        write_retries: u32,
        write_retry_delay: Duration,
    ) -> Result<Self, HlsDownloadError> {
        let committed = sink.len().await?;
        Ok(Self {
            sink,
            committed,
            start_len: committed,
            write_retries: write_retries.max(1),
            write_retry_delay,
        })
    }

    /// Appends one segment. On failure the output is restored to its previous
    /// length before the next attempt, so a segment lands whole or not at all.
    pub async fn append_segment(&mut self, data: &[u8]) -> Result<(), HlsDownloadError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_append(data).await {
                Ok(()) => {
                    self.committed += data.len() as u64;
                    return Ok(());
                }
                Err(e) if attempt < self.write_retries => {
                    warn!(error = %e, attempt, "Write to output failed, retrying");
                    tokio::time::sleep(self.write_retry_delay).await;
                }
                Err(e) => {
                    // best effort; the committed prefix stays valid either way
                    let _ = self.rollback().await;
                    return Err(HlsDownloadError::WriteFailure {
                        attempts: attempt,
                        source: std::sync::Arc::new(e),
                    });
                }
            }
        }
    }

    async fn try_append(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.rollback().await?;
        self.sink.append(data).await
    }

    async fn rollback(&mut self) -> std::io::Result<()> {
        let len = self.sink.len().await?;
        if len > self.committed {
            debug!(from = len, to = self.committed, "Discarding partial write");
            self.sink.truncate(self.committed).await?;
        }
        Ok(())
    }

    /// Flushes appended data to stable storage.
    pub async fn sync(&mut self) -> Result<(), HlsDownloadError> {
        self.sink.sync().await?;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.committed
    }

    pub fn is_empty(&self) -> bool {
        self.committed == 0
    }

    /// Bytes appended since the assembler was opened.
    pub fn bytes_written(&self) -> u64 {
        self.committed - self.start_len
    }

    /// Appends a committed window in order. A window lands whole or not at
    /// all: when one of its segments cannot be written, the segments of the
    /// window already appended are cut off again.
    pub async fn append_window(&mut self, window: &[Bytes]) -> Result<(), HlsDownloadError> {
        let window_start = self.committed;
        for data in window {
            if let Err(e) = self.append_segment(data).await {
                self.committed = window_start;
                if let Err(cut) = self.rollback().await {
                    warn!(error = %cut, "Failed to discard partially written window");
                }
                return Err(e);
            }
        }
        Ok(())
    }
}

//! The download session: restores resume state, resolves output collisions,
//! writes the init segment and drives the window scheduler to completion.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::assembler::Assembler;
use crate::config::{OverwritePolicy, SessionConfig};
use crate::decryption::KeyCache;
use crate::error::HlsDownloadError;
use crate::events::{DownloadEvent, OnEvent};
use crate::fetcher::Fetcher;
use crate::ledger::ResumeLedger;
use crate::progress::{OnProgress, ProgressTracker};
use crate::scheduler::{SegmentPipeline, WindowScheduler, WindowSink};
use crate::segment::Playlist;
use crate::transport::{HttpTransport, Transport};

/// Asked when the output already exists and no overwrite policy is configured.
#[async_trait]
pub trait OverwritePrompt: Send + Sync {
    async fn resolve(&self, output: &Path) -> OverwritePolicy;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parts {
    pub total: usize,
    pub completed: usize,
    /// Media sequence number of the first segment.
    pub first: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Completed,
    /// The output existed and the caller chose not to touch it.
    Declined,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub ok: bool,
    pub status: DownloadStatus,
    pub parts: Parts,
}

pub struct DownloadSession {
    playlist: Playlist,
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    on_event: Option<OnEvent>,
    on_progress: Option<OnProgress>,
    overwrite_prompt: Option<Arc<dyn OverwritePrompt>>,
}

impl DownloadSession {
    /// Creates a session that fetches over HTTP with a client built from `config`.
    pub fn new(playlist: Playlist, config: SessionConfig) -> Result<Self, HlsDownloadError> {
        config.validate(playlist.len())?;
        let transport = Arc::new(HttpTransport::from_config(&config)?);
        Ok(Self::assemble(playlist, config, transport))
    }

    pub fn with_transport(
        playlist: Playlist,
        config: SessionConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, HlsDownloadError> {
        config.validate(playlist.len())?;
        Ok(Self::assemble(playlist, config, transport))
    }

    fn assemble(playlist: Playlist, config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            playlist,
            config,
            transport,
            on_event: None,
            on_progress: None,
            overwrite_prompt: None,
        }
    }

    pub fn on_event(mut self, on_event: OnEvent) -> Self {
        self.on_event = Some(on_event);
        self
    }

    pub fn on_progress(mut self, on_progress: OnProgress) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    pub fn with_overwrite_prompt(mut self, prompt: Arc<dyn OverwritePrompt>) -> Self {
        self.overwrite_prompt = Some(prompt);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Runs the session to completion. Every failure is reported through the
    /// returned result; partial output is left in place.
    pub async fn download(&self) -> DownloadResult {
        let mut parts = Parts {
            total: self.playlist.len(),
            completed: 0,
            first: self.playlist.media_sequence,
        };

        let outcome = self.run(&mut parts).await;
        match outcome {
            Ok(status) => DownloadResult {
                ok: true,
                status,
                parts,
            },
            Err(e) => {
                error!(error = %e, "Download failed");
                self.emit(DownloadEvent::Aborted {
                    reason: e.to_string(),
                });
                DownloadResult {
                    ok: false,
                    status: DownloadStatus::Failed {
                        reason: e.to_string(),
                    },
                    parts,
                }
            }
        }
    }

    async fn run(&self, parts: &mut Parts) -> Result<DownloadStatus, HlsDownloadError> {
        let config = &self.config;
        let output = config.output_path.as_path();
        let total = parts.total;

        let mut ledger = ResumeLedger::new(config.resume_path(), total);
        let output_exists = tokio::fs::try_exists(output).await?;

        let mut restored = None;
        if output_exists && config.resume_offset == 0 {
            match ledger.restore().await {
                Ok(offset) => restored = offset,
                Err(HlsDownloadError::ResumeRecordInvalid(reason)) => {
                    warn!(reason = %reason, "Ignoring resume record, starting from the first part");
                }
                Err(e) => return Err(e),
            }
        }

        // a record of 0 only vouches for the init segment, which is fetched again
        let truncate = match restored {
            Some(completed) => completed == 0,
            None if output_exists && config.resume_offset > 0 => {
                info!(output = %output.display(), "Adding content to existing output");
                false
            }
            None if output_exists => match self.resolve_collision(output).await {
                OverwritePolicy::Overwrite => true,
                OverwritePolicy::Continue => false,
                OverwritePolicy::Abort => {
                    info!(output = %output.display(), "Output exists, download skipped");
                    return Ok(DownloadStatus::Declined);
                }
            },
            None => true,
        };

        let mut assembler = Assembler::open(
            output,
            truncate,
            config.write_retries,
            config.write_retry_delay,
        )
        .await?;
        ledger.activate();

        let offset = restored.unwrap_or(config.resume_offset);
        parts.completed = offset;
        self.emit(DownloadEvent::SessionStarted {
            output: output.to_path_buf(),
            total,
            resumed_from: restored,
        });

        let fetcher = Arc::new(Fetcher::new(
            Arc::clone(&self.transport),
            config,
            self.on_event.clone(),
        ));
        let keys = Arc::new(KeyCache::new(Arc::clone(&fetcher), config.base_uri.clone()));
        let pipeline = Arc::new(SegmentPipeline::new(fetcher, keys, config.base_uri.clone()));

        if let Some(init) = &self.playlist.init_segment {
            if config.skip_init_segment {
                warn!("Skipping init part can lead to broken video!");
                self.emit(DownloadEvent::InitSegmentSkipped);
            } else if offset == 0 {
                let data = pipeline.process(init).await?;
                assembler.append_segment(&data).await?;
                assembler.sync().await?;
                ledger.persist(0).await?;
                debug!(bytes = data.len(), "Init segment saved");
                self.emit(DownloadEvent::InitSegmentSaved {
                    bytes: data.len() as u64,
                });
            } else {
                debug!("Init segment already in output");
            }
        }

        if offset > 0 {
            info!("Resuming download from part {}", offset + 1);
        }

        let scheduler = WindowScheduler::new(pipeline, config.concurrency, self.on_event.clone());
        let mut commit = SessionCommit {
            assembler: &mut assembler,
            ledger: &mut ledger,
            parts: &mut *parts,
            tracker: ProgressTracker::new(offset, total),
            on_event: self.on_event.as_ref(),
            on_progress: self.on_progress.as_ref(),
        };
        scheduler
            .run(&self.playlist.segments, offset, &mut commit)
            .await?;

        ledger.finalize().await?;
        info!(
            output = %output.display(),
            bytes = assembler.bytes_written(),
            "All {} parts downloaded",
            total
        );
        self.emit(DownloadEvent::Finished {
            completed: parts.completed,
            total,
            bytes: assembler.bytes_written(),
        });
        Ok(DownloadStatus::Completed)
    }

    async fn resolve_collision(&self, output: &Path) -> OverwritePolicy {
        if let Some(policy) = self.config.overwrite_policy {
            return policy;
        }
        match &self.overwrite_prompt {
            Some(prompt) => prompt.resolve(output).await,
            None => OverwritePolicy::Abort,
        }
    }

    fn emit(&self, event: DownloadEvent) {
        if let Some(on_event) = &self.on_event {
            on_event(event);
        }
    }
}

/// Commits scheduler windows: append, flush, then advance the resume record.
struct SessionCommit<'a> {
    assembler: &'a mut Assembler,
    ledger: &'a mut ResumeLedger,
    parts: &'a mut Parts,
    tracker: ProgressTracker,
    on_event: Option<&'a OnEvent>,
    on_progress: Option<&'a OnProgress>,
}

#[async_trait]
impl WindowSink for SessionCommit<'_> {
    async fn commit(&mut self, first: usize, window: Vec<Bytes>) -> Result<(), HlsDownloadError> {
        self.assembler.append_window(&window).await?;
        self.assembler.sync().await?;

        let completed = first + window.len();
        self.ledger.persist(completed).await?;
        self.parts.completed = completed;

        let snapshot = self
            .tracker
            .snapshot(completed, self.assembler.bytes_written());
        info!("{}", snapshot);
        if let Some(on_progress) = self.on_progress {
            on_progress(snapshot.clone());
        }
        if let Some(on_event) = self.on_event {
            on_event(DownloadEvent::Progress(snapshot));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ResumeRecord;
    use crate::progress::ProgressSnapshot;
    use crate::segment::{Iv, KeyRef, Segment};
    use crate::test_utils::{MockTransport, aes128_cbc_encrypt};
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    const BASE: &str = "http://cdn/";

    struct Fixture {
        dir: TempDir,
        transport: Arc<MockTransport>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempdir().unwrap(),
                transport: Arc::new(MockTransport::new()),
            }
        }

        fn output(&self) -> PathBuf {
            self.dir.path().join("out.ts")
        }

        fn resume(&self) -> PathBuf {
            self.dir.path().join("out.ts.resume")
        }

        fn config(&self) -> crate::builder::SessionConfigBuilder {
            SessionConfig::builder()
                .with_output_path(self.output())
                .with_base_uri(BASE)
                .with_retry_budget(1)
                .with_retry_delay_base(Duration::ZERO)
                .with_write_retry(1, Duration::ZERO)
        }

        /// Serves `n` segments `s{i}.ts` with body `part-{i};`.
        fn serve(&self, n: usize) -> Playlist {
            for i in 0..n {
                self.transport
                    .add(&format!("{BASE}s{i}.ts"), format!("part-{i};"));
            }
            Playlist::new((0..n).map(|i| Segment::new(i, format!("s{i}.ts"))).collect())
        }

        fn session(&self, playlist: Playlist, config: SessionConfig) -> DownloadSession {
            DownloadSession::with_transport(playlist, config, self.transport.clone()).unwrap()
        }

        fn read_output(&self) -> String {
            String::from_utf8(std::fs::read(self.output()).unwrap()).unwrap()
        }

        fn read_record(&self) -> Option<ResumeRecord> {
            let raw = std::fs::read(self.resume()).ok()?;
            Some(serde_json::from_slice(&raw).unwrap())
        }
    }

    fn expected(range: std::ops::Range<usize>) -> String {
        range.map(|i| format!("part-{i};")).collect()
    }

    fn collect_events() -> (OnEvent, Arc<Mutex<Vec<DownloadEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let on_event: OnEvent = Arc::new(move |e: DownloadEvent| sink.lock().push(e));
        (on_event, events)
    }

    struct FixedPrompt(OverwritePolicy);

    #[async_trait]
    impl OverwritePrompt for FixedPrompt {
        async fn resolve(&self, _output: &Path) -> OverwritePolicy {
            self.0
        }
    }

    #[tokio::test]
    async fn test_two_segments_single_window() {
        let fx = Fixture::new();
        fx.transport.add("http://cdn/a.ts", "a");
        fx.transport.add("http://cdn/b.ts", "b");
        let playlist = Playlist::new(vec![Segment::new(0, "a.ts"), Segment::new(1, "b.ts")])
            .with_media_sequence(17);

        let result = fx
            .session(playlist, fx.config().with_concurrency(2).build())
            .download()
            .await;

        assert_eq!(
            result,
            DownloadResult {
                ok: true,
                status: DownloadStatus::Completed,
                parts: Parts {
                    total: 2,
                    completed: 2,
                    first: 17
                },
            }
        );
        assert_eq!(fx.read_output(), "ab");
        assert!(!fx.resume().exists());
    }

    #[tokio::test]
    async fn test_failing_segment_writes_nothing_from_its_window() {
        let fx = Fixture::new();
        fx.transport.add("http://cdn/a.ts", "a");
        fx.transport.add_always_failing("http://cdn/b.ts");
        let playlist = Playlist::new(vec![Segment::new(0, "a.ts"), Segment::new(1, "b.ts")]);

        let (on_event, events) = collect_events();
        let result = fx
            .session(playlist, fx.config().with_concurrency(2).build())
            .on_event(on_event)
            .download()
            .await;

        assert!(!result.ok);
        assert_eq!(result.parts.completed, 0);
        match &result.status {
            DownloadStatus::Failed { reason } => assert_eq!(reason, "1 parts not downloaded"),
            other => panic!("unexpected status: {other:?}"),
        }
        assert_eq!(fx.read_output(), "");
        assert_eq!(fx.read_record(), None);

        let events = events.lock();
        assert!(events.iter().any(|e| matches!(e, DownloadEvent::SegmentFailed { index: 1, .. })));
        assert!(events.iter().any(|e| matches!(e, DownloadEvent::FetchRetry { attempt: 2, .. })));
        assert!(matches!(events.last(), Some(DownloadEvent::Aborted { .. })));
    }

    #[tokio::test]
    async fn test_output_is_ordered_concatenation_across_windows() {
        let fx = Fixture::new();
        let playlist = fx.serve(11);

        let result = fx
            .session(playlist, fx.config().with_concurrency(3).build())
            .download()
            .await;

        assert!(result.ok);
        assert_eq!(result.parts.completed, 11);
        assert_eq!(fx.read_output(), expected(0..11));
    }

    #[tokio::test]
    async fn test_failure_in_later_window_then_resume() {
        let fx = Fixture::new();
        let playlist = fx.serve(6);
        fx.transport.add_always_failing("http://cdn/s4.ts");

        let config = fx.config().with_concurrency(2).build();
        let first = fx.session(playlist.clone(), config.clone()).download().await;
        assert!(!first.ok);
        assert_eq!(first.parts.completed, 4);
        assert_eq!(fx.read_output(), expected(0..4));
        assert_eq!(fx.read_record(), Some(ResumeRecord { completed: 4, total: 6 }));

        fx.transport.add("http://cdn/s4.ts", "part-4;");
        let (on_event, events) = collect_events();
        let second = fx
            .session(playlist, config)
            .on_event(on_event)
            .download()
            .await;

        assert!(second.ok);
        assert_eq!(second.parts.completed, 6);
        assert_eq!(fx.read_output(), expected(0..6));
        assert_eq!(fx.read_record(), None);
        // only the interrupted window is fetched again
        assert_eq!(fx.transport.calls("http://cdn/s0.ts"), 1);
        assert_eq!(fx.transport.calls("http://cdn/s5.ts"), 2);
        assert!(events.lock().iter().any(|e| matches!(
            e,
            DownloadEvent::SessionStarted {
                resumed_from: Some(4),
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_resume_skips_committed_segments() {
        let fx = Fixture::new();
        let playlist = fx.serve(5);
        std::fs::write(fx.output(), expected(0..3)).unwrap();
        std::fs::write(fx.resume(), r#"{"completed":3,"total":5}"#).unwrap();

        let result = fx.session(playlist, fx.config().build()).download().await;

        assert!(result.ok);
        assert_eq!(fx.read_output(), expected(0..5));
        for i in 0..3 {
            assert_eq!(fx.transport.calls(&format!("{BASE}s{i}.ts")), 0);
        }
        assert!(!fx.resume().exists());
    }

    #[tokio::test]
    async fn test_mismatched_record_restarts_from_zero() {
        let fx = Fixture::new();
        let playlist = fx.serve(3);
        std::fs::write(fx.output(), "stale bytes").unwrap();
        std::fs::write(fx.resume(), r#"{"completed":1,"total":5}"#).unwrap();

        let result = fx
            .session(
                playlist,
                fx.config()
                    .with_overwrite_policy(OverwritePolicy::Overwrite)
                    .build(),
            )
            .download()
            .await;

        assert!(result.ok);
        assert_eq!(fx.read_output(), expected(0..3));
        assert_eq!(fx.transport.calls("http://cdn/s0.ts"), 1);
    }

    #[tokio::test]
    async fn test_existing_output_without_policy_is_declined() {
        let fx = Fixture::new();
        let playlist = fx.serve(2);
        std::fs::write(fx.output(), "keep me").unwrap();

        let result = fx.session(playlist, fx.config().build()).download().await;

        assert!(result.ok);
        assert_eq!(result.status, DownloadStatus::Declined);
        assert_eq!(result.parts.completed, 0);
        assert_eq!(fx.read_output(), "keep me");
        assert_eq!(fx.transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_prompt_decides_collision() {
        let fx = Fixture::new();
        let playlist = fx.serve(2);
        std::fs::write(fx.output(), "head:").unwrap();

        let result = fx
            .session(playlist, fx.config().build())
            .with_overwrite_prompt(Arc::new(FixedPrompt(OverwritePolicy::Continue)))
            .download()
            .await;

        assert!(result.ok);
        assert_eq!(fx.read_output(), format!("head:{}", expected(0..2)));
    }

    #[tokio::test]
    async fn test_explicit_offset_appends_without_prompt() {
        let fx = Fixture::new();
        let playlist = fx.serve(4);
        std::fs::write(fx.output(), expected(0..2)).unwrap();
        std::fs::write(fx.resume(), r#"{"completed":1,"total":4}"#).unwrap();

        let result = fx
            .session(playlist, fx.config().with_resume_offset(2).build())
            .with_overwrite_prompt(Arc::new(FixedPrompt(OverwritePolicy::Abort)))
            .download()
            .await;

        assert!(result.ok);
        assert_eq!(result.status, DownloadStatus::Completed);
        assert_eq!(fx.read_output(), expected(0..4));
        assert_eq!(fx.transport.calls("http://cdn/s0.ts"), 0);
        assert_eq!(fx.transport.calls("http://cdn/s1.ts"), 0);
    }

    #[tokio::test]
    async fn test_init_segment_is_written_first_with_inherited_key() {
        let fx = Fixture::new();
        let key = *b"0011223344556677";
        fx.transport.add("http://cdn/k.key", key);
        fx.transport.add(
            "http://cdn/init.mp4",
            aes128_cbc_encrypt(&key, &Iv::derived(0).0, b"INIT|"),
        );
        let playlist = fx
            .serve(2)
            .with_init_segment(Segment::init("init.mp4").with_key(KeyRef::new("k.key")));

        let (on_event, events) = collect_events();
        let result = fx
            .session(playlist, fx.config().build())
            .on_event(on_event)
            .download()
            .await;

        assert!(result.ok);
        assert_eq!(fx.read_output(), format!("INIT|{}", expected(0..2)));
        assert!(events
            .lock()
            .iter()
            .any(|e| matches!(e, DownloadEvent::InitSegmentSaved { bytes: 5 })));
    }

    #[tokio::test]
    async fn test_record_after_init_only_restarts_cleanly() {
        let fx = Fixture::new();
        fx.transport.add("http://cdn/init.mp4", "INIT|");
        let playlist = fx.serve(2).with_init_segment(Segment::init("init.mp4"));
        std::fs::write(fx.output(), "INIT|").unwrap();
        std::fs::write(fx.resume(), r#"{"completed":0,"total":2}"#).unwrap();

        let result = fx.session(playlist, fx.config().build()).download().await;

        assert!(result.ok);
        assert_eq!(fx.read_output(), format!("INIT|{}", expected(0..2)));
    }

    #[tokio::test]
    async fn test_skip_init_segment_warns() {
        let fx = Fixture::new();
        let playlist = fx.serve(1).with_init_segment(Segment::init("init.mp4"));

        let (on_event, events) = collect_events();
        let result = fx
            .session(playlist, fx.config().with_skip_init_segment(true).build())
            .on_event(on_event)
            .download()
            .await;

        assert!(result.ok);
        assert_eq!(fx.read_output(), expected(0..1));
        assert_eq!(fx.transport.calls("http://cdn/init.mp4"), 0);
        assert!(events
            .lock()
            .iter()
            .any(|e| matches!(e, DownloadEvent::InitSegmentSkipped)));
    }

    #[tokio::test]
    async fn test_encrypted_segments_with_explicit_and_derived_iv() {
        let fx = Fixture::new();
        let key = *b"aaaabbbbccccdddd";
        let explicit = Iv::from_words([7, 7, 7, 7]);
        fx.transport.add("http://cdn/k.key", key);
        fx.transport.add(
            "http://cdn/s0.ts",
            aes128_cbc_encrypt(&key, &explicit.0, b"zero;"),
        );
        fx.transport.add(
            "http://cdn/s1.ts",
            aes128_cbc_encrypt(&key, &Iv::derived(1).0, b"one;"),
        );
        let playlist = Playlist::new(vec![
            Segment::new(0, "s0.ts").with_key(KeyRef::new("k.key").with_iv(explicit)),
            Segment::new(1, "s1.ts").with_key(KeyRef::new("k.key")),
        ]);

        let result = fx.session(playlist, fx.config().build()).download().await;

        assert!(result.ok);
        assert_eq!(fx.read_output(), "zero;one;");
        assert_eq!(fx.transport.calls("http://cdn/k.key"), 1);
    }

    #[tokio::test]
    async fn test_clear_segment_after_encrypted_one_is_copied_as_is() {
        let fx = Fixture::new();
        let key = *b"aaaabbbbccccdddd";
        fx.transport.add("http://cdn/k.key", key);
        fx.transport.add(
            "http://cdn/s0.ts",
            aes128_cbc_encrypt(&key, &Iv::derived(0).0, b"locked;"),
        );
        fx.transport.add("http://cdn/s1.ts", "open;");
        let playlist = Playlist::new(vec![
            Segment::new(0, "s0.ts").with_key(KeyRef::new("k.key")),
            Segment::new(1, "s1.ts"),
        ]);

        let result = fx.session(playlist, fx.config().build()).download().await;

        assert!(result.ok);
        assert_eq!(fx.read_output(), "locked;open;");
    }

    #[tokio::test]
    async fn test_progress_reported_once_per_window() {
        let fx = Fixture::new();
        let playlist = fx.serve(5);

        let snapshots: Arc<Mutex<Vec<ProgressSnapshot>>> = Arc::default();
        let sink = Arc::clone(&snapshots);
        let result = fx
            .session(playlist, fx.config().with_concurrency(2).build())
            .on_progress(Arc::new(move |s: ProgressSnapshot| sink.lock().push(s)))
            .download()
            .await;

        assert!(result.ok);
        let snapshots = snapshots.lock();
        let completed: Vec<usize> = snapshots.iter().map(|s| s.completed).collect();
        assert_eq!(completed, vec![2, 4, 5]);
        assert_eq!(snapshots[0].percent, 40);
        assert_eq!(snapshots[2].percent, 100);
        assert_eq!(snapshots[2].bytes_downloaded, expected(0..5).len() as u64);
    }

    #[test]
    fn test_empty_playlist_is_rejected() {
        let err = DownloadSession::with_transport(
            Playlist::default(),
            SessionConfig::default(),
            Arc::new(MockTransport::new()),
        )
        .err();
        assert!(matches!(err, Some(HlsDownloadError::PlaylistEmpty)));
    }
}

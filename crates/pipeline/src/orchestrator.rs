//! The run state machine.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use animmuf_common::clock::{Clock, SystemClock};
use animmuf_common::config::AppConfig;
use animmuf_common::error::{MufResult, RenderErrorKind, StoreError};
use animmuf_fetcher::{retry_transient, FrameProvider, HttpProvider, RetryPolicy};
use animmuf_frame_model::{Frame, FrameRef, FrameSet};
use animmuf_frame_store::FrameStore;
use animmuf_render_engine::{Assembler, CommandConverter, Converter, ConverterAdapter};
use animmuf_sequencer::Sequencer;
use chrono::{DateTime, Utc};

use crate::fetch::{fetch_missing, FetchAbort};
use crate::state::{FailureReason, PipelineResult, PipelineState, PipelineStatus, Stage};

/// A stage failure on its way to becoming the terminal status.
struct Failure {
    stage: Stage,
    reason: FailureReason,
    detail: String,
}

impl Failure {
    fn new(stage: Stage, reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            stage,
            reason,
            detail: detail.into(),
        }
    }

    fn store(stage: Stage, err: StoreError) -> Self {
        let reason = if err.is_conflict() {
            FailureReason::StoreConflict
        } else {
            FailureReason::Store
        };
        Self::new(stage, reason, err.to_string())
    }
}

/// One run of fetch, sequence, assemble and convert.
///
/// A pipeline runs once; a new run is a new `Pipeline`. The store is the
/// only state shared between runs.
pub struct Pipeline<'a> {
    config: &'a AppConfig,
    provider: Arc<dyn FrameProvider>,
    store: Arc<FrameStore>,
    converter: ConverterAdapter,
    clock: Arc<dyn Clock>,
    cancel: Arc<AtomicBool>,
    video: bool,
    state: PipelineState,
    result: PipelineResult,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a AppConfig,
        provider: Arc<dyn FrameProvider>,
        store: Arc<FrameStore>,
        converter: Arc<dyn Converter>,
    ) -> Self {
        Self {
            config,
            provider,
            store,
            converter: ConverterAdapter::new(converter),
            clock: Arc::new(SystemClock),
            cancel: Arc::new(AtomicBool::new(false)),
            video: true,
            state: PipelineState::Idle,
            result: PipelineResult::new(),
        }
    }

    /// Pipeline wired to the HTTP provider, the frame cache under
    /// `target_dir`, and the configured converter.
    pub fn from_config(config: &'a AppConfig) -> MufResult<Self> {
        let provider = HttpProvider::from_config(config)?;
        let store = FrameStore::open(config.frames_dir())?;
        let converter = CommandConverter::from_config(config);
        Ok(Self::new(
            config,
            Arc::new(provider),
            Arc::new(store),
            Arc::new(converter),
        ))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share a stop flag; setting it cancels the run at the next check.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Disable sequencing onward: fetch and cache only.
    pub fn with_video(mut self, enabled: bool) -> Self {
        self.video = enabled;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Execute the run to a terminal state.
    pub async fn run(mut self) -> PipelineResult {
        tracing::info!(
            provider = self.provider.name(),
            converter = self.converter.name(),
            target_dir = %self.config.target_dir.display(),
            "Pipeline starting"
        );
        self.result.trail.push(self.state);

        let status = match self.execute().await {
            Ok(()) => {
                self.transition(PipelineState::Done);
                PipelineStatus::Done
            }
            Err(failure) => {
                tracing::error!(
                    stage = %failure.stage,
                    reason = %failure.reason,
                    detail = %failure.detail,
                    "Pipeline failed"
                );
                self.transition(PipelineState::Failed {
                    stage: failure.stage,
                    reason: failure.reason,
                });
                PipelineStatus::Failed {
                    stage: failure.stage,
                    reason: failure.reason,
                    detail: failure.detail,
                }
            }
        };

        self.result.status = status;
        tracing::info!(
            status = %self.result.status,
            frames_considered = self.result.frames_considered,
            frames_used = self.result.frames_used,
            gaps = self.result.gaps_detected.len(),
            "Pipeline finished"
        );
        self.result
    }

    async fn execute(&mut self) -> Result<(), Failure> {
        self.transition(PipelineState::Fetching);
        let frames = self.fetch_stage().await?;
        if !self.video {
            tracing::info!(cached = frames.len(), "Video disabled, stopping after fetch");
            return Ok(());
        }

        self.enter(PipelineState::Sequencing)?;
        let frame_set = self.sequence_stage(frames)?;

        self.enter(PipelineState::Assembling)?;
        self.assemble_stage(frame_set).await?;

        self.enter(PipelineState::Converting)?;
        self.convert_stage().await
    }

    /// Cancellation check at a stage boundary, then transition.
    fn enter(&mut self, next: PipelineState) -> Result<(), Failure> {
        if let Some(stage) = self.state.stage() {
            self.check_cancelled(stage)?;
        }
        self.transition(next);
        Ok(())
    }

    fn transition(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::debug!(from = ?self.state, to = ?next, "Pipeline transition");
        self.state = next;
        self.result.trail.push(next);
    }

    fn check_cancelled(&self, stage: Stage) -> Result<(), Failure> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(Failure::new(stage, FailureReason::Cancelled, "stop requested"));
        }
        Ok(())
    }

    /// Prune, list, download what is missing, then read back the cached
    /// frames within the retention window.
    async fn fetch_stage(&mut self) -> Result<Vec<Frame>, Failure> {
        let stage = Stage::Fetching;
        self.check_cancelled(stage)?;

        let now = self.clock.now();
        let window_start = now - self.config.retention.max_age;
        let pruned = self
            .with_store(stage, move |store| store.prune_older_than(window_start))
            .await?;
        self.result.fetch.pruned += pruned;

        let policy = RetryPolicy::from_config(&self.config.fetch);
        let provider = Arc::clone(&self.provider);
        let listing = retry_transient(&policy, "listing", || provider.list_available()).await;

        match listing {
            Ok(listing) => {
                self.result.fetch.listed = listing.len();
                self.result.fetch.skipped_entries = listing.skipped;
                if listing.skipped > 0 {
                    self.warn(format!("{} malformed listing entries skipped", listing.skipped));
                }

                if self.config.retention.prune_unlisted && !listing.is_empty() {
                    let keep: HashSet<DateTime<Utc>> =
                        listing.refs.iter().map(|r| r.timestamp).collect();
                    let removed = self
                        .with_store(stage, move |store| store.retain_only(&keep))
                        .await?;
                    self.result.fetch.pruned += removed;
                }

                let in_window: Vec<FrameRef> = listing
                    .refs
                    .into_iter()
                    .filter(|r| r.timestamp >= window_start)
                    .collect();
                let (known_gone, cached, missing) = self
                    .with_store(stage, move |store| Ok(partition_listed(store, in_window)))
                    .await?;
                self.result.fetch.known_gone = known_gone;
                self.result.fetch.already_cached = cached;
                tracing::info!(
                    listed = self.result.fetch.listed,
                    cached,
                    known_gone,
                    missing = missing.len(),
                    "Listing received"
                );

                fetch_missing(
                    &self.provider,
                    &self.store,
                    policy,
                    self.config.fetch.workers,
                    missing,
                    &self.cancel,
                    &mut self.result.fetch,
                )
                .await
                .map_err(|abort| match abort {
                    FetchAbort::Cancelled => {
                        Failure::new(stage, FailureReason::Cancelled, "stop requested")
                    }
                    FetchAbort::Conflict(err) => Failure::store(stage, err),
                })?;
            }
            Err(err) => {
                self.result.fetch.listing_failed = true;
                self.warn(format!("listing unavailable, using cached frames: {err}"));
            }
        }

        let summary = &self.result.fetch;
        tracing::info!(
            fetched = summary.fetched,
            unchanged = summary.unchanged,
            gone = summary.gone.len(),
            failed = summary.failed.len(),
            "Fetch complete"
        );
        if !summary.failed.is_empty() {
            let count = summary.failed.len();
            self.warn(format!("{count} frames could not be fetched"));
        }

        let frames = self
            .with_store(stage, move |store| {
                store.get_range(window_start, DateTime::<Utc>::MAX_UTC)
            })
            .await?;
        if frames.is_empty() {
            return Err(Failure::new(
                stage,
                FailureReason::NoFrames,
                "no frames fetched or cached",
            ));
        }
        Ok(frames)
    }

    fn sequence_stage(&mut self, frames: Vec<Frame>) -> Result<FrameSet, Failure> {
        let sequenced = Sequencer::new(&self.config.sequencing).build(frames, self.clock.now());
        let report = sequenced.report;

        self.result.frames_considered = report.frames_considered;
        self.result.gaps_detected = report.gaps;
        for anomaly in &report.anomalies {
            self.warn(anomaly.to_string());
        }

        if report.freshness.is_stale() {
            let detail = format!("{:?}", report.freshness);
            if self.config.sequencing.stale_is_fatal {
                return Err(Failure::new(Stage::Sequencing, FailureReason::Stale, detail));
            }
            self.warn(format!("stale data: {detail}"));
        }
        Ok(sequenced.frame_set)
    }

    async fn assemble_stage(&mut self, frame_set: FrameSet) -> Result<(), Failure> {
        let stage = Stage::Assembling;
        let assembler = Assembler::new(self.config.assembly());
        let rendered = tokio::task::spawn_blocking(move || assembler.render(&frame_set))
            .await
            .map_err(|e| {
                Failure::new(
                    stage,
                    FailureReason::Render(RenderErrorKind::Encode),
                    format!("render task failed: {e}"),
                )
            })?;

        let output = rendered
            .map_err(|e| Failure::new(stage, FailureReason::Render(e.kind()), e.to_string()))?;
        self.result.frames_used = output.frames_rendered;
        self.result.intermediate_path = Some(output.path);
        self.result.warnings.extend(output.warnings);
        Ok(())
    }

    async fn convert_stage(&mut self) -> Result<(), Failure> {
        let Some(input) = self.result.intermediate_path.clone() else {
            return Err(Failure::new(
                Stage::Converting,
                FailureReason::Render(RenderErrorKind::NoFrames),
                "no intermediate animation",
            ));
        };
        let path = self
            .converter
            .convert_checked(&input, &self.config.video_file)
            .await
            .map_err(|e| {
                Failure::new(
                    Stage::Converting,
                    FailureReason::Conversion(e.kind()),
                    e.to_string(),
                )
            })?;
        self.result.output_path = Some(path);
        Ok(())
    }

    /// Run a store operation on the blocking pool.
    async fn with_store<T, F>(&self, stage: Stage, op: F) -> Result<T, Failure>
    where
        T: Send + 'static,
        F: FnOnce(&FrameStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| {
                Failure::new(stage, FailureReason::Store, format!("store task failed: {e}"))
            })?
            .map_err(|e| Failure::store(stage, e))
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{message}");
        self.result.warnings.push(message);
    }
}

/// Split listed refs into (recorded gone, already cached, still missing).
fn partition_listed(store: &FrameStore, refs: Vec<FrameRef>) -> (usize, usize, Vec<FrameRef>) {
    let mut known_gone = 0;
    let mut cached = 0;
    let mut missing = Vec::new();
    for frame_ref in refs {
        if store.is_gone(frame_ref.timestamp) {
            known_gone += 1;
        } else if store.has(frame_ref.timestamp) {
            cached += 1;
        } else {
            missing.push(frame_ref);
        }
    }
    (known_gone, cached, missing)
}

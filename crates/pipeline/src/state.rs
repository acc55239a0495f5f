//! Run states and the terminal result.

use std::fmt;
use std::path::PathBuf;

use animmuf_common::error::{ConversionErrorKind, RenderErrorKind};
use animmuf_frame_model::FrameInterval;
use chrono::{DateTime, Utc};

/// A working stage of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetching,
    Sequencing,
    Assembling,
    Converting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fetching => "fetching",
            Self::Sequencing => "sequencing",
            Self::Assembling => "assembling",
            Self::Converting => "converting",
        };
        f.write_str(name)
    }
}

/// Why a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Nothing usable to render.
    NoFrames,
    /// Newest frame too old and staleness is configured fatal.
    Stale,
    /// The provider offered different bytes for a cached timestamp.
    StoreConflict,
    /// Cache I/O or integrity failure.
    Store,
    Render(RenderErrorKind),
    Conversion(ConversionErrorKind),
    /// Stop requested.
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFrames => f.write_str("NoFrames"),
            Self::Stale => f.write_str("Stale"),
            Self::StoreConflict => f.write_str("StoreConflict"),
            Self::Store => f.write_str("Store"),
            Self::Render(kind) => write!(f, "{kind:?}"),
            Self::Conversion(kind) => write!(f, "{kind:?}"),
            Self::Cancelled => f.write_str("Cancelled"),
        }
    }
}

/// Orchestrator state.
///
/// ```text
/// Idle → Fetching → Sequencing → Assembling → Converting → Done
///           └───────────┴────────────┴────────────┴──────→ Failed(stage, reason)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Fetching,
    Sequencing,
    Assembling,
    Converting,
    Done,
    Failed { stage: Stage, reason: FailureReason },
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }

    /// The working stage this state represents, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Fetching => Some(Stage::Fetching),
            Self::Sequencing => Some(Stage::Sequencing),
            Self::Assembling => Some(Stage::Assembling),
            Self::Converting => Some(Stage::Converting),
            _ => None,
        }
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// `Done` is reachable from `Fetching` when video output is disabled.
    pub fn can_advance_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Idle, Fetching)
            | (Fetching, Sequencing)
            | (Fetching, Done)
            | (Sequencing, Assembling)
            | (Assembling, Converting)
            | (Converting, Done) => true,
            (current, Failed { stage, .. }) => current.stage() == Some(stage),
            _ => false,
        }
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStatus {
    Done,
    Failed {
        stage: Stage,
        reason: FailureReason,
        /// Human-readable cause.
        detail: String,
    },
}

impl PipelineStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => f.write_str("done"),
            Self::Failed {
                stage,
                reason,
                detail,
            } => write!(f, "failed while {stage} ({reason}): {detail}"),
        }
    }
}

/// What the fetch stage did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    /// Entries in the provider listing.
    pub listed: usize,
    /// Malformed listing entries ignored.
    pub skipped_entries: usize,
    /// Whether the listing could not be obtained and the run fell back to
    /// cached frames.
    pub listing_failed: bool,
    /// Listed frames already in the store.
    pub already_cached: usize,
    /// Newly stored frames.
    pub fetched: usize,
    /// Downloads whose bytes matched the stored copy.
    pub unchanged: usize,
    /// Frames the provider reported permanently missing during this run.
    pub gone: Vec<DateTime<Utc>>,
    /// Listed frames skipped because an earlier run recorded them gone.
    pub known_gone: usize,
    /// Frames that still failed after retries, or could not be stored.
    pub failed: Vec<DateTime<Utc>>,
    /// Frames removed by retention.
    pub pruned: usize,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineResult {
    /// Cached frames handed to the sequencer.
    pub frames_considered: usize,
    /// Frames in the rendered animation.
    pub frames_used: usize,
    pub gaps_detected: Vec<FrameInterval>,
    /// The validated video; only set on success with video enabled.
    pub output_path: Option<PathBuf>,
    /// The intermediate animation, when one was written.
    pub intermediate_path: Option<PathBuf>,
    pub status: PipelineStatus,
    pub fetch: FetchSummary,
    /// Non-fatal problems worth surfacing.
    pub warnings: Vec<String>,
    /// States entered, in order, ending with the terminal one.
    pub trail: Vec<PipelineState>,
}

impl PipelineResult {
    pub(crate) fn new() -> Self {
        Self {
            frames_considered: 0,
            frames_used: 0,
            gaps_detected: Vec::new(),
            output_path: None,
            intermediate_path: None,
            status: PipelineStatus::Done,
            fetch: FetchSummary::default(),
            warnings: Vec::new(),
            trail: Vec::new(),
        }
    }

    /// Whether the run ever entered `stage`.
    pub fn entered(&self, stage: Stage) -> bool {
        self.trail.iter().any(|s| s.stage() == Some(stage))
    }
}

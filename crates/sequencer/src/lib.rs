//! AnimMUF Sequencer
//!
//! Turns an unordered bag of frames into the [`FrameSet`] that gets
//! rendered, and reports what it noticed on the way:
//! - **Ordering:** stable ascending sort; a repeated timestamp keeps the
//!   first-seen frame and is recorded as an anomaly
//! - **Republishing:** a frame byte-identical to the frame kept before it
//!   is the provider reissuing an unchanged map; it is dropped and recorded
//! - **Window:** with `max_frames` set, only the most recent N survive
//! - **Gaps:** adjacent frames further apart than `gap_factor` intervals
//! - **Staleness:** newest frame older than `stale_after` relative to now
//!
//! Gaps never abort a run. Whether staleness does is the caller's call.
//!
//! Pure computation, no I/O.

use std::fmt;

use animmuf_common::clock::age_of;
use animmuf_common::config::SequencingConfig;
use animmuf_frame_model::{Frame, FrameInterval, FrameSet};
use chrono::{DateTime, Duration, Utc};

/// Something unexpected in the input that was resolved automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// Two frames claimed the same timestamp; the first one seen was kept.
    DuplicateTimestamp {
        timestamp: DateTime<Utc>,
        kept: String,
        dropped: String,
    },

    /// The frame at `timestamp` had the same content hash as the previous
    /// kept frame and was dropped.
    Republished {
        timestamp: DateTime<Utc>,
        kept: String,
        dropped: String,
    },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateTimestamp {
                timestamp,
                kept,
                dropped,
            } => write!(f, "duplicate frame at {timestamp}: kept {kept}, dropped {dropped}"),
            Self::Republished {
                timestamp,
                kept,
                dropped,
            } => write!(f, "republished frame at {timestamp}: {dropped} repeats {kept}, dropped"),
        }
    }
}

/// How current the newest frame is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh {
        latest: DateTime<Utc>,
    },
    Stale {
        latest: DateTime<Utc>,
        age: Duration,
    },
    /// No frames at all.
    Empty,
}

impl Freshness {
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }
}

/// What the Sequencer observed while building a [`FrameSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceReport {
    /// Frames handed to [`Sequencer::build`].
    pub frames_considered: usize,

    /// Frames in the resulting set.
    pub frames_selected: usize,

    /// Older frames dropped by the `max_frames` window.
    pub truncated: usize,

    /// Intervals in the selected window wider than the gap threshold.
    pub gaps: Vec<FrameInterval>,

    pub anomalies: Vec<Anomaly>,

    pub freshness: Freshness,
}

/// Output of [`Sequencer::build`].
#[derive(Debug, Clone)]
pub struct Sequenced {
    pub frame_set: FrameSet,
    pub report: SequenceReport,
}

/// Orders frames and selects the render window.
pub struct Sequencer<'a> {
    config: &'a SequencingConfig,
}

impl<'a> Sequencer<'a> {
    pub fn new(config: &'a SequencingConfig) -> Self {
        Self { config }
    }

    /// Build the render-ready sequence from `frames` as of `now`.
    ///
    /// Deterministic: the same input (in the same order) and `now` always
    /// give the same set and report.
    pub fn build(&self, frames: Vec<Frame>, now: DateTime<Utc>) -> Sequenced {
        let frames_considered = frames.len();

        let mut frames = frames;
        // Stable: among equal timestamps the first-seen frame stays first.
        frames.sort_by_key(Frame::timestamp);

        // A republished map still counts as the provider being current.
        let latest = frames.last().map(Frame::timestamp);

        let mut anomalies = Vec::new();
        let mut unique: Vec<Frame> = Vec::with_capacity(frames.len());
        for frame in frames {
            match unique.last() {
                Some(kept) if kept.timestamp() == frame.timestamp() => {
                    tracing::warn!(
                        timestamp = %frame.timestamp(),
                        kept = kept.source_id(),
                        dropped = frame.source_id(),
                        "Duplicate frame timestamp"
                    );
                    anomalies.push(Anomaly::DuplicateTimestamp {
                        timestamp: frame.timestamp(),
                        kept: kept.source_id().to_string(),
                        dropped: frame.source_id().to_string(),
                    });
                }
                Some(kept) if kept.content_hash() == frame.content_hash() => {
                    tracing::info!(
                        timestamp = %frame.timestamp(),
                        kept = kept.source_id(),
                        dropped = frame.source_id(),
                        hash = %frame.content_hash().short(),
                        "Republished frame dropped"
                    );
                    anomalies.push(Anomaly::Republished {
                        timestamp: frame.timestamp(),
                        kept: kept.source_id().to_string(),
                        dropped: frame.source_id().to_string(),
                    });
                }
                _ => unique.push(frame),
            }
        }

        let freshness = self.freshness(latest, now);

        let truncated = match self.config.max_frames {
            Some(max) if unique.len() > max => {
                let excess = unique.len() - max;
                unique.drain(..excess);
                excess
            }
            _ => 0,
        };

        let frame_set = match FrameSet::from_sorted(unique, self.config.frame_interval) {
            Ok(set) => set,
            // Sorted and deduplicated above, so ordering cannot fail.
            Err(err) => unreachable!("sequencer produced unordered frames: {err}"),
        };
        let gaps = frame_set.gaps(self.config.gap_factor);

        for gap in &gaps {
            tracing::info!(
                start = %gap.start,
                end = %gap.end,
                observed_mins = gap.observed().num_minutes(),
                missing = gap.missing_frames(),
                "Gap in frame sequence"
            );
        }
        if let Freshness::Stale { latest, age } = freshness {
            tracing::warn!(latest = %latest, age_mins = age.num_minutes(), "Newest frame is stale");
        }

        let report = SequenceReport {
            frames_considered,
            frames_selected: frame_set.len(),
            truncated,
            gaps,
            anomalies,
            freshness,
        };
        tracing::debug!(
            considered = report.frames_considered,
            selected = report.frames_selected,
            truncated = report.truncated,
            gaps = report.gaps.len(),
            "Sequence built"
        );

        Sequenced { frame_set, report }
    }

    fn freshness(&self, latest: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Freshness {
        let Some(latest) = latest else {
            return Freshness::Empty;
        };
        let age = age_of(latest, now);
        if age > self.config.stale_after {
            Freshness::Stale { latest, age }
        } else {
            Freshness::Fresh { latest }
        }
    }
}

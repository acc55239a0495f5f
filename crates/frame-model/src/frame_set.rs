//! Ordered, gap-annotated frame sequences.

use chrono::{DateTime, Duration, Utc};

use crate::frame::Frame;

/// Spacing between two adjacent frames of a [`FrameSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub expected: Duration,
}

impl FrameInterval {
    pub fn observed(&self) -> Duration {
        self.end - self.start
    }

    /// Whether the observed spacing exceeds `factor` times the expected one.
    pub fn is_gap(&self, factor: f64) -> bool {
        let limit_ms = self.expected.num_milliseconds() as f64 * factor;
        self.observed().num_milliseconds() as f64 > limit_ms
    }

    /// Frames that should have been published inside this interval.
    pub fn missing_frames(&self) -> i64 {
        let expected_ms = self.expected.num_milliseconds();
        if expected_ms <= 0 {
            return 0;
        }
        (self.observed().num_milliseconds() / expected_ms - 1).max(0)
    }
}

/// Frames sorted ascending by timestamp, no two sharing a timestamp.
///
/// Built only through [`FrameSet::from_sorted`], which checks the ordering
/// invariant; the Sequencer is the usual producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSet {
    frames: Vec<Frame>,
    intervals: Vec<FrameInterval>,
}

#[derive(Debug, thiserror::Error)]
#[error("frames out of order at index {index}: {previous} is not before {next}")]
pub struct OrderError {
    pub index: usize,
    pub previous: DateTime<Utc>,
    pub next: DateTime<Utc>,
}

impl FrameSet {
    /// Wrap frames that are already strictly ascending, annotating each
    /// adjacent pair with `expected` spacing.
    pub fn from_sorted(frames: Vec<Frame>, expected: Duration) -> Result<Self, OrderError> {
        let mut intervals = Vec::with_capacity(frames.len().saturating_sub(1));
        for (index, pair) in frames.windows(2).enumerate() {
            let (previous, next) = (pair[0].timestamp(), pair[1].timestamp());
            if previous >= next {
                return Err(OrderError {
                    index: index + 1,
                    previous,
                    next,
                });
            }
            intervals.push(FrameInterval {
                start: previous,
                end: next,
                expected,
            });
        }
        Ok(Self { frames, intervals })
    }

    pub fn empty() -> Self {
        Self {
            frames: Vec::new(),
            intervals: Vec::new(),
        }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn intervals(&self) -> &[FrameInterval] {
        &self.intervals
    }

    /// Intervals wider than `factor` times the expected spacing.
    pub fn gaps(&self, factor: f64) -> Vec<FrameInterval> {
        self.intervals
            .iter()
            .filter(|interval| interval.is_gap(factor))
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn first(&self) -> Option<&Frame> {
        self.frames.first()
    }

    pub fn latest(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.frames.iter().map(Frame::timestamp).collect()
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}

//! Time intervals and active segment extraction

use std::fmt;

use crate::error::{
	HighlightError,
	Result,
};

/// Default minimum length of an active segment, in seconds
pub const DEFAULT_MIN_ACTIVE_DURATION: f64 = 1.0;

/// A time range within the recording, in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeInterval {
	/// Start time in seconds
	pub start: f64,
	/// End time in seconds
	pub end: f64,
}

impl TimeInterval {
	pub fn new(start: f64, end: f64) -> Self {
		Self { start, end }
	}

	pub fn duration(&self) -> f64 {
		self.end - self.start
	}
}

impl fmt::Display for TimeInterval {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{:.3}s - {:.3}s (duration: {:.3}s)",
			self.start,
			self.end,
			self.duration()
		)
	}
}

/// An active segment together with its desirability score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredSegment {
	pub start: f64,
	pub end: f64,
	pub duration: f64,
	/// Non-negative; zero means the segment is never selected
	pub score: f64,
}

impl ScoredSegment {
	pub fn new(interval: TimeInterval, score: f64) -> Self {
		Self {
			start: interval.start,
			end: interval.end,
			duration: interval.duration(),
			score,
		}
	}}

/// A segment chosen for the highlight reel, possibly truncated to fit the budget
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectedSegment {
	pub start: f64,
	pub end: f64,
	pub duration: f64,
}

impl SelectedSegment {
	pub fn new(start: f64, end: f64) -> Self {
		Self {
			start,
			end,
			duration: end - start,
		}
	}
}

impl fmt::Display for SelectedSegment {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:.2}s to {:.2}s ({:.2}s)", self.start, self.end, self.duration)
	}
}

/// Sum of interval durations
pub fn total_duration(intervals: &[TimeInterval]) -> f64 {
	intervals.iter().map(TimeInterval::duration).sum()
}

/// Derive the active (non-silent) segments from detected silences.
///
/// `silences` must be sorted by start. Gaps between silences, plus the gap
/// between the last silence and the end of the recording, become active
/// segments when they are strictly longer than `min_active_duration`.
/// Shorter gaps are dropped, not merged into a neighbour.
pub fn active_segments(
	silences: &[TimeInterval],
	total_duration: f64,
	min_active_duration: f64,
) -> Result<Vec<TimeInterval>> {
	if total_duration < 0.0 || total_duration.is_nan() {
		return Err(HighlightError::invalid_input(format!(
			"total duration must be non-negative, got {total_duration}"
		)));
	}

	let mut segments = Vec::new();
	let mut prev_end = 0.0;

	for silence in silences {
		let gap = silence.start - prev_end;
		if gap > min_active_duration {
			segments.push(TimeInterval::new(prev_end, silence.start));
		} else {
			tracing::debug!(
				start = prev_end,
				duration = gap,
				min = min_active_duration,
				"Skipping short active segment"
			);
		}
		prev_end = silence.end;
	}

	let trailing = total_duration - prev_end;
	if trailing > min_active_duration {
		segments.push(TimeInterval::new(prev_end, total_duration));
	} else {
		tracing::debug!(
			start = prev_end,
			duration = trailing,
			min = min_active_duration,
			"Skipping short trailing segment"
		);
	}

	Ok(segments)
}

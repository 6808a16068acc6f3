//! Target duration policy and budget-constrained greedy selection

use tracing::{
	debug,
	trace,
};

use crate::segment::{
	ScoredSegment,
	SelectedSegment,
};

/// Recordings up to this length get the minimum target
pub const SHORT_RECORDING_SECS: f64 = 2.0 * 3600.0;
/// Recordings from this length on get the maximum target
pub const LONG_RECORDING_SECS: f64 = 5.0 * 3600.0;
/// Highlight length for short recordings (14 minutes)
pub const MIN_TARGET_SECS: f64 = 14.0 * 60.0;
/// Highlight length for long recordings (22 minutes)
pub const MAX_TARGET_SECS: f64 = 22.0 * 60.0;

/// Highlight length for a recording of `total_duration` seconds.
///
/// Flat at 14 minutes up to two hours, flat at 22 minutes from five hours,
/// linear in between.
pub fn target_duration(total_duration: f64) -> f64 {
	if total_duration <= SHORT_RECORDING_SECS {
		MIN_TARGET_SECS
	} else if total_duration >= LONG_RECORDING_SECS {
		MAX_TARGET_SECS
	} else {
		let ratio = (total_duration - SHORT_RECORDING_SECS) / (LONG_RECORDING_SECS - SHORT_RECORDING_SECS);
		MIN_TARGET_SECS + ratio * (MAX_TARGET_SECS - MIN_TARGET_SECS)
	}
}

/// Pick the best-scoring segments until `target_duration` is filled.
///
/// Zero-score segments never qualify. Candidates are taken in descending
/// score order (ties keep their chronological order); the candidate that
/// crosses the budget is truncated to the remaining time. The result is
/// sorted by start time and may fall short of the target when the pool of
/// positive-score segments runs out.
pub fn select(scored: &[ScoredSegment], target_duration: f64) -> Vec<SelectedSegment> {
	let mut candidates: Vec<&ScoredSegment> = scored.iter().filter(|s| s.score > 0.0).collect();
	// sort_by is stable, so equal scores stay in chronological order
	candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

	let mut selected = Vec::new();
	let mut total = 0.0;

	for candidate in candidates {
		if total >= target_duration {
			break;
		}

		let remaining = target_duration - total;
		if candidate.duration > remaining {
			trace!(
				start = candidate.start,
				duration = candidate.duration,
				remaining,
				"Truncating segment to fit budget"
			);
			selected.push(SelectedSegment {
				start: candidate.start,
				end: candidate.start + remaining,
				duration: remaining,
			});
			// Budget is spent; re-adding `remaining` can land an ulp short of the target
			total = target_duration;
			break;
		}

		total += candidate.duration;
		selected.push(SelectedSegment {
			start: candidate.start,
			end: candidate.end,
			duration: candidate.duration,
		});
	}

	selected.sort_by(|a, b| a.start.total_cmp(&b.start));

	debug!(
		selected = selected.len(),
		total,
		target = target_duration,
		"Selection complete"
	);

	selected
}

/// Sum of selected durations
pub fn selected_duration(selected: &[SelectedSegment]) -> f64 {
	selected.iter().map(|s| s.duration).sum()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn scored(start: f64, end: f64, score: f64) -> ScoredSegment {
		ScoredSegment {
			start,
			end,
			duration: end - start,
			score,
		}
	}

	#[test]
	fn test_target_duration_bounds() {
		assert_eq!(target_duration(0.0), 840.0);
		assert_eq!(target_duration(3600.0), 840.0);
		assert_eq!(target_duration(7200.0), 840.0);
		assert_eq!(target_duration(18000.0), 1320.0);
		assert_eq!(target_duration(36000.0), 1320.0);
	}

	#[test]
	fn test_target_duration_interpolates() {
		assert!((target_duration(12600.0) - 1080.0).abs() < 1e-9);
		assert!((target_duration(9900.0) - 960.0).abs() < 1e-9);
	}

	#[test]
	fn test_greedy_fill_with_truncation() {
		let segments = vec![
			scored(0.0, 10.0, 50.0),
			scored(20.0, 25.0, 40.0),
			scored(30.0, 40.0, 30.0),
		];
		let selected = select(&segments, 12.0);

		assert_eq!(
			selected,
			vec![SelectedSegment::new(0.0, 10.0), SelectedSegment::new(20.0, 22.0)]
		);
		assert!((selected_duration(&selected) - 12.0).abs() < 1e-9);
	}

	#[test]
	fn test_truncation_stops_selection() {
		// 841.92 - 159.829 - (841.92 - 159.829) is not exactly zero in f64
		let segments = vec![
			scored(0.0, 159.829, 3.0),
			scored(200.0, 2000.0, 2.0),
			scored(3000.0, 3100.0, 1.0),
		];
		let selected = select(&segments, 841.92);

		assert_eq!(selected.len(), 2);
		assert_eq!(selected[0], SelectedSegment::new(0.0, 159.829));
		assert_eq!(selected[1].start, 200.0);
		assert!(selected.iter().all(|s| s.start < 3000.0));
		assert!((selected_duration(&selected) - 841.92).abs() < 1e-9);
	}

	#[test]
	fn test_output_is_chronological() {
		let segments = vec![
			scored(0.0, 5.0, 1.0),
			scored(10.0, 15.0, 9.0),
			scored(20.0, 25.0, 5.0),
		];
		let selected = select(&segments, 100.0);

		let starts: Vec<f64> = selected.iter().map(|s| s.start).collect();
		assert_eq!(starts, vec![0.0, 10.0, 20.0]);
	}

	#[test]
	fn test_ties_keep_chronological_order() {
		// Equal scores: the earlier segment fills the budget first
		let segments = vec![scored(0.0, 10.0, 7.0), scored(50.0, 60.0, 7.0)];
		let selected = select(&segments, 10.0);
		assert_eq!(selected, vec![SelectedSegment::new(0.0, 10.0)]);
	}

	#[test]
	fn test_zero_scores_excluded() {
		let segments = vec![scored(0.0, 10.0, 0.0), scored(20.0, 30.0, 2.0)];
		let selected = select(&segments, 100.0);
		assert_eq!(selected, vec![SelectedSegment::new(20.0, 30.0)]);
	}

	#[test]
	fn test_pool_exhausted_falls_short() {
		let segments = vec![scored(0.0, 10.0, 3.0), scored(20.0, 30.0, 2.0)];
		let selected = select(&segments, 100.0);
		assert_eq!(selected.len(), 2);
		assert!((selected_duration(&selected) - 20.0).abs() < 1e-9);
	}

	#[test]
	fn test_empty_pool() {
		assert!(select(&[], 840.0).is_empty());
		assert!(select(&[scored(0.0, 10.0, 0.0)], 840.0).is_empty());
	}

	#[test]
	fn test_never_exceeds_target() {
		let segments: Vec<_> = (0..50)
			.map(|i| {
				let start = i as f64 * 30.0;
				scored(start, start + 7.3 + (i % 5) as f64, ((i * 37) % 11) as f64 + 0.5)
			})
			.collect();

		for target in [1.0, 12.5, 100.0, 333.3, 10_000.0] {
			let selected = select(&segments, target);
			assert!(selected_duration(&selected) <= target + 1e-9);
			for pair in selected.windows(2) {
				assert!(pair[0].start <= pair[1].start);
			}
		}
	}
}

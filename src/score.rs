//! Loudness-based scoring of active segments

use std::{
	path::Path,
	sync::{
		atomic::{
			AtomicUsize,
			Ordering,
		},
		Mutex,
	},
};

use rayon::prelude::*;
use tracing::{
	debug,
	info,
	warn,
};

use crate::{
	engine::MediaEngine,
	error::{
		HighlightError,
		Result,
	},
	pipeline::CancellationToken,
	progress::{
		ProgressSink,
		ProgressThrottle,
	},
	segment::{
		ScoredSegment,
		TimeInterval,
	},
};

/// Peak level at or below which a segment is treated as noise
pub const NOISE_FLOOR_DB: f64 = -40.0;

/// Loudness statistics measured over a segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Loudness {
	/// Peak sample level in dBFS
	pub max_volume_db: f64,
	/// Mean (RMS) level in dBFS
	pub mean_volume_db: f64,
}

/// What to do when measuring a segment's loudness fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreFailurePolicy {
	/// Score the segment 0 and carry on
	#[default]
	Skip,
	/// Fail the whole run
	Abort,
}

/// Scoring configuration
#[derive(Debug, Clone, Copy)]
pub struct ScoreOptions {
	/// Number of loudness probes run concurrently (1 = sequential)
	pub jobs: usize,
	pub on_failure: ScoreFailurePolicy,
}

impl Default for ScoreOptions {
	fn default() -> Self {
		Self {
			jobs: 1,
			on_failure: ScoreFailurePolicy::Skip,
		}
	}
}

/// Score a segment from its loudness.
///
/// Louder peaks and a wider gap between peak and mean level ("livelier"
/// audio) score higher, weighted by duration. Missing statistics score 0.
pub fn score_segment(segment: &TimeInterval, loudness: Option<&Loudness>) -> f64 {
	let Some(loudness) = loudness else {
		return 0.0;
	};
	let max_vol = loudness.max_volume_db;
	let mean_vol = loudness.mean_volume_db;

	if max_vol <= NOISE_FLOOR_DB {
		return 0.0;
	}

	let vol_factor = (max_vol - NOISE_FLOOR_DB) / -NOISE_FLOOR_DB;
	let dyn_factor = if mean_vol != 0.0 {
		(mean_vol - max_vol).abs() / mean_vol.abs()
	} else {
		1.0
	};

	(segment.duration() * vol_factor * dyn_factor).max(0.0)
}

/// Measure and score every active segment, preserving input order.
pub fn score_segments<E: MediaEngine + ?Sized>(
	engine: &E,
	input: &Path,
	segments: &[TimeInterval],
	options: &ScoreOptions,
	sink: &dyn ProgressSink,
	cancel: &CancellationToken,
) -> Result<Vec<ScoredSegment>> {
	info!(segments = segments.len(), jobs = options.jobs, "Scoring segments");

	let progress = ScoringProgress::new(segments.len(), sink);
	let measurements = if options.jobs > 1 && segments.len() > 1 {
		measure_parallel(engine, input, segments, options.jobs, &progress, cancel)
	} else {
		measure_sequential(engine, input, segments, &progress, cancel)
	}?;

	let mut scored = Vec::with_capacity(segments.len());
	for (index, (segment, measurement)) in segments.iter().zip(measurements).enumerate() {
		let loudness = match measurement {
			Ok(loudness) => Some(loudness),
			Err(HighlightError::Cancelled) => return Err(HighlightError::Cancelled),
			Err(err) => match options.on_failure {
				ScoreFailurePolicy::Abort => {
					return Err(HighlightError::probe(format!(
						"loudness measurement failed for segment {index} ({segment}): {err}"
					)));
				},
				ScoreFailurePolicy::Skip => {
					warn!(index, error = %err, "Loudness measurement failed, scoring segment 0");
					sink.log(&format!("Segment {index}: loudness unavailable ({err}), skipped"));
					None
				},
			},
		};

		let score = score_segment(segment, loudness.as_ref());
		debug!(
			index,
			start = segment.start,
			end = segment.end,
			max_db = loudness.map(|l| l.max_volume_db),
			mean_db = loudness.map(|l| l.mean_volume_db),
			score,
			"Scored segment"
		);
		scored.push(ScoredSegment::new(*segment, score));
	}

	Ok(scored)
}

/// Completed-segment counter shared by the scoring workers
struct ScoringProgress<'a> {
	total: usize,
	done: AtomicUsize,
	throttle: Mutex<ProgressThrottle>,
	sink: &'a dyn ProgressSink,
}

impl<'a> ScoringProgress<'a> {
	fn new(total: usize, sink: &'a dyn ProgressSink) -> Self {
		Self {
			total,
			done: AtomicUsize::new(0),
			throttle: Mutex::new(ProgressThrottle::new()),
			sink,
		}
	}

	fn segment_done(&self) {
		let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
		let pct = done as f64 / self.total.max(1) as f64 * 100.0;
		// Held while reporting so workers cannot emit out of order
		if let Ok(mut throttle) = self.throttle.lock() {
			if let Some(pct) = throttle.update(pct) {
				self.sink.progress(pct);
			}
		}
	}
}

fn measure_sequential<E: MediaEngine + ?Sized>(
	engine: &E,
	input: &Path,
	segments: &[TimeInterval],
	progress: &ScoringProgress<'_>,
	cancel: &CancellationToken,
) -> Result<Vec<Result<Loudness>>> {
	let mut results = Vec::with_capacity(segments.len());

	for segment in segments {
		cancel.check()?;
		results.push(engine.measure_loudness(input, segment.start, segment.duration(), cancel));
		progress.segment_done();
	}

	Ok(results)
}

/// Measure on a bounded rayon pool; results come back in input order.
fn measure_parallel<E: MediaEngine + ?Sized>(
	engine: &E,
	input: &Path,
	segments: &[TimeInterval],
	jobs: usize,
	progress: &ScoringProgress<'_>,
	cancel: &CancellationToken,
) -> Result<Vec<Result<Loudness>>> {
	let pool = match rayon::ThreadPoolBuilder::new()
		.num_threads(jobs)
		.thread_name(|i| format!("loudness-{}", i))
		.build()
	{
		Ok(pool) => pool,
		Err(e) => {
			warn!(error = %e, "Failed to create thread pool, measuring sequentially");
			return measure_sequential(engine, input, segments, progress, cancel);
		},
	};

	let results: Vec<Result<Loudness>> = pool.install(|| {
		segments
			.par_iter()
			.map(|segment| {
				cancel.check()?;
				let measurement = engine.measure_loudness(input, segment.start, segment.duration(), cancel);
				progress.segment_done();
				measurement
			})
			.collect()
	});

	cancel.check()?;
	Ok(results)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		engine::testing::ScriptedEngine,
		progress::NullSink,
	};

	fn seg(duration: f64) -> TimeInterval {
		TimeInterval::new(0.0, duration)
	}

	fn loud(max: f64, mean: f64) -> Loudness {
		Loudness {
			max_volume_db: max,
			mean_volume_db: mean,
		}
	}

	#[test]
	fn test_below_noise_floor_scores_zero() {
		assert_eq!(score_segment(&seg(10.0), Some(&loud(-41.0, -30.0))), 0.0);
		assert_eq!(score_segment(&seg(10.0), Some(&loud(-40.0, -50.0))), 0.0);
	}

	#[test]
	fn test_full_scale_peak() {
		// vol_factor = 1, dyn_factor = |-10 - 0| / 10 = 1
		let score = score_segment(&seg(10.0), Some(&loud(0.0, -10.0)));
		assert!((score - 10.0).abs() < 1e-9);
	}

	#[test]
	fn test_partial_volume_and_dynamics() {
		// vol_factor = 20/40 = 0.5, dyn_factor = |-30 + 20| / 30 = 1/3
		let score = score_segment(&seg(6.0), Some(&loud(-20.0, -30.0)));
		assert!((score - 1.0).abs() < 1e-9);
	}

	#[test]
	fn test_zero_mean_uses_unit_dynamics() {
		let score = score_segment(&seg(4.0), Some(&loud(-20.0, 0.0)));
		assert!((score - 2.0).abs() < 1e-9);
	}

	#[test]
	fn test_missing_loudness_scores_zero() {
		assert_eq!(score_segment(&seg(10.0), None), 0.0);
	}

	#[test]
	fn test_score_is_pure() {
		let l = loud(-12.0, -27.0);
		assert_eq!(score_segment(&seg(3.0), Some(&l)), score_segment(&seg(3.0), Some(&l)));
	}

	#[test]
	fn test_score_segments_skip_policy() {
		let engine = ScriptedEngine::new(100.0)
			.with_loudness(0.0, loud(0.0, -10.0))
			.with_failing_loudness(20.0);
		let segments = vec![TimeInterval::new(0.0, 10.0), TimeInterval::new(20.0, 25.0)];

		let scored = score_segments(
			&engine,
			Path::new("in.mp4"),
			&segments,
			&ScoreOptions::default(),
			&NullSink,
			&CancellationToken::new(),
		)
		.unwrap();

		assert_eq!(scored.len(), 2);
		assert!((scored[0].score - 10.0).abs() < 1e-9);
		assert_eq!(scored[1].score, 0.0);
		assert_eq!(scored[1].duration, 5.0);
	}

	#[test]
	fn test_score_segments_abort_policy() {
		let engine = ScriptedEngine::new(100.0).with_failing_loudness(20.0);
		let segments = vec![TimeInterval::new(20.0, 25.0)];
		let options = ScoreOptions {
			jobs: 1,
			on_failure: ScoreFailurePolicy::Abort,
		};

		let err = score_segments(
			&engine,
			Path::new("in.mp4"),
			&segments,
			&options,
			&NullSink,
			&CancellationToken::new(),
		)
		.unwrap_err();
		assert!(matches!(err, HighlightError::Probe { .. }));
	}

	#[test]
	fn test_parallel_matches_sequential() {
		let mut engine = ScriptedEngine::new(1000.0);
		let mut segments = Vec::new();
		for i in 0..16 {
			let start = i as f64 * 10.0;
			engine = engine.with_loudness(start, loud(-(i as f64), -20.0 - i as f64));
			segments.push(TimeInterval::new(start, start + 5.0 + i as f64 * 0.1));
		}
		let cancel = CancellationToken::new();

		let sequential =
			score_segments(&engine, Path::new("in.mp4"), &segments, &ScoreOptions::default(), &NullSink, &cancel)
				.unwrap();
		let parallel_options = ScoreOptions {
			jobs: 4,
			..ScoreOptions::default()
		};
		let parallel =
			score_segments(&engine, Path::new("in.mp4"), &segments, &parallel_options, &NullSink, &cancel).unwrap();

		assert_eq!(sequential, parallel);
	}

	/// Keeps every progress value it is given
	#[derive(Default)]
	struct RecordingSink {
		progress: Mutex<Vec<f64>>,
	}

	impl ProgressSink for RecordingSink {
		fn log(&self, _message: &str) {}

		fn progress(&self, percentage: f64) {
			if let Ok(mut progress) = self.progress.lock() {
				progress.push(percentage);
			}
		}
	}

	#[test]
	fn test_parallel_scoring_reports_progress() {
		let mut engine = ScriptedEngine::new(1000.0);
		let mut segments = Vec::new();
		for i in 0..32 {
			let start = i as f64 * 10.0;
			engine = engine.with_loudness(start, loud(-3.0, -20.0));
			segments.push(TimeInterval::new(start, start + 5.0));
		}
		let sink = RecordingSink::default();
		let options = ScoreOptions {
			jobs: 4,
			..ScoreOptions::default()
		};

		score_segments(&engine, Path::new("in.mp4"), &segments, &options, &sink, &CancellationToken::new()).unwrap();

		let progress = sink.progress.into_inner().unwrap();
		assert!(!progress.is_empty());
		assert_eq!(progress.last(), Some(&100.0));
		for pair in progress.windows(2) {
			assert!(pair[1] - pair[0] >= 1.0);
		}
	}

	#[test]
	fn test_cancellation_is_not_skipped() {
		/// Trips the token once the first segment has been measured
		struct CancelAfterFirst(CancellationToken);

		impl ProgressSink for CancelAfterFirst {
			fn log(&self, _message: &str) {}

			fn progress(&self, _percentage: f64) {
				self.0.cancel();
			}
		}

		let engine = ScriptedEngine::new(100.0)
			.with_loudness(0.0, loud(0.0, -10.0))
			.with_loudness(20.0, loud(0.0, -10.0));
		let cancel = CancellationToken::new();
		let segments = vec![TimeInterval::new(0.0, 10.0), TimeInterval::new(20.0, 30.0)];

		// Skip policy must not turn cancellation into a zero score
		let err = score_segments(
			&engine,
			Path::new("in.mp4"),
			&segments,
			&ScoreOptions::default(),
			&CancelAfterFirst(cancel.clone()),
			&cancel,
		)
		.unwrap_err();
		assert!(matches!(err, HighlightError::Cancelled));
	}

	#[test]
	fn test_cancelled_before_scoring() {
		let engine = ScriptedEngine::new(100.0).with_loudness(0.0, loud(0.0, -10.0));
		let cancel = CancellationToken::new();
		cancel.cancel();

		let err = score_segments(
			&engine,
			Path::new("in.mp4"),
			&[TimeInterval::new(0.0, 10.0)],
			&ScoreOptions::default(),
			&NullSink,
			&cancel,
		)
		.unwrap_err();
		assert!(matches!(err, HighlightError::Cancelled));
	}
}

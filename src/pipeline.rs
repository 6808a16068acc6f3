//! The highlight pipeline: probe, segment, score, select, extract, concatenate

use std::{
	fs,
	io,
	path::{
		Path,
		PathBuf,
	},
	sync::{
		atomic::{
			AtomicBool,
			Ordering,
		},
		Arc,
	},
};

use tracing::{
	debug,
	info,
	warn,
};

use crate::{
	assemble::{
		CONCAT_LIST_NAME,
		DEFAULT_PAD_SECS,
	},
	engine::MediaEngine,
	error::{
		HighlightError,
		Result,
	},
	progress::{
		ProgressSink,
		ProgressThrottle,
	},
	score::{
		self,
		ScoreOptions,
	},
	segment::{
		self,
		DEFAULT_MIN_ACTIVE_DURATION,
	},
	select,
};

/// Default silence threshold in dB
pub const DEFAULT_NOISE_THRESHOLD_DB: f64 = -35.0;
/// Default minimum silence length in seconds
pub const DEFAULT_MIN_SILENCE_DURATION: f64 = 0.8;

/// Shared flag checked between segment operations
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
	cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn cancel(&self) {
		self.cancelled.store(true, Ordering::SeqCst);
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::SeqCst)
	}

	/// Err(Cancelled) once the token has been tripped
	pub fn check(&self) -> Result<()> {
		if self.is_cancelled() {
			Err(HighlightError::Cancelled)
		} else {
			Ok(())
		}
	}
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
	pub input: PathBuf,
	pub output: PathBuf,
	/// Silence threshold in dB
	pub noise_threshold_db: f64,
	/// Minimum silence length in seconds
	pub min_silence_duration: f64,
	/// Active segments must be strictly longer than this
	pub min_active_duration: f64,
	/// Padding added on each side of an extracted clip
	pub pad: f64,
	/// Overrides the duration-derived target when set
	pub target_duration: Option<f64>,
	/// Where per-segment clips are written
	pub work_dir: PathBuf,
	/// Leave clips and the concat list in place after a successful run
	pub keep_work_dir: bool,
	pub score: ScoreOptions,
}

impl PipelineConfig {
	pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
		Self {
			input: input.into(),
			output: output.into(),
			noise_threshold_db: DEFAULT_NOISE_THRESHOLD_DB,
			min_silence_duration: DEFAULT_MIN_SILENCE_DURATION,
			min_active_duration: DEFAULT_MIN_ACTIVE_DURATION,
			pad: DEFAULT_PAD_SECS,
			target_duration: None,
			work_dir: PathBuf::from("temp"),
			keep_work_dir: false,
			score: ScoreOptions::default(),
		}
	}

	fn validate(&self) -> Result<()> {
		if self.input == self.output {
			return Err(HighlightError::invalid_input("output path must differ from input path"));
		}
		if self.min_silence_duration < 0.0 || self.min_active_duration < 0.0 || self.pad < 0.0 {
			return Err(HighlightError::invalid_input(
				"durations and padding must be non-negative",
			));
		}
		if let Some(target) = self.target_duration {
			if !target.is_finite() || target <= 0.0 {
				return Err(HighlightError::invalid_input(format!(
					"target duration must be positive, got {target}"
				)));
			}
		}
		if self.score.jobs == 0 {
			return Err(HighlightError::invalid_input("jobs must be at least 1"));
		}
		Ok(())
	}
}

/// Outcome of a successful run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineSummary {
	pub total_duration: f64,
	pub target_duration: f64,
	pub silence_count: usize,
	pub active_count: usize,
	/// Segments that scored above zero
	pub scored_count: usize,
	pub selected_count: usize,
	pub selected_duration: f64,
}

impl PipelineSummary {
	/// Share of the recording kept in the highlight reel
	pub fn kept_percentage(&self) -> f64 {
		if self.total_duration <= 0.0 {
			0.0
		} else {
			(self.selected_duration / self.total_duration) * 100.0
		}
	}
}

/// Run the whole pipeline, reporting to `sink` as it goes.
///
/// Any failure is also written to the sink before being returned.
pub fn run_pipeline<E: MediaEngine + ?Sized>(
	engine: &E,
	config: &PipelineConfig,
	sink: &dyn ProgressSink,
	cancel: &CancellationToken,
) -> Result<PipelineSummary> {
	let result = run_stages(engine, config, sink, cancel);
	if let Err(err) = &result {
		sink.log(&format!("Error: {err}"));
	}
	result
}

fn run_stages<E: MediaEngine + ?Sized>(
	engine: &E,
	config: &PipelineConfig,
	sink: &dyn ProgressSink,
	cancel: &CancellationToken,
) -> Result<PipelineSummary> {
	config.validate()?;
	cancel.check()?;

	info!(input = %config.input.display(), output = %config.output.display(), "Starting pipeline");
	sink.log("Starting highlight extraction...");

	let total_duration = engine.probe_duration(&config.input)?;
	if !total_duration.is_finite() || total_duration < 0.0 {
		return Err(HighlightError::invalid_input(format!(
			"probed duration is invalid: {total_duration}"
		)));
	}
	sink.log(&format!("Total duration: {total_duration:.2} s"));

	let target_duration = config
		.target_duration
		.unwrap_or_else(|| select::target_duration(total_duration));
	sink.log(&format!("Target highlight duration: {:.2} minutes", target_duration / 60.0));

	cancel.check()?;
	sink.log("Detecting silences...");
	let mut throttle = ProgressThrottle::new();
	let mut silences = engine.detect_silences(
		&config.input,
		config.noise_threshold_db,
		config.min_silence_duration,
		total_duration,
		&mut |pct| {
			if let Some(pct) = throttle.update(pct) {
				sink.progress(pct);
			}
		},
		cancel,
	)?;
	silences.sort_by(|a, b| a.start.total_cmp(&b.start));
	sink.log(&format!("{} silences detected.", silences.len()));

	let active = segment::active_segments(&silences, total_duration, config.min_active_duration)?;
	info!(
		active_segments = active.len(),
		active_duration = format!("{:.2}s", segment::total_duration(&active)),
		"Segmentation complete"
	);
	sink.log(&format!("{} active segments identified.", active.len()));

	cancel.check()?;
	sink.log("Scoring segments...");
	let scored = score::score_segments(engine, &config.input, &active, &config.score, sink, cancel)?;
	let scored_count = scored.iter().filter(|s| s.score > 0.0).count();
	sink.log(&format!("{scored_count} segments with a positive score."));

	let selected = select::select(&scored, target_duration);
	let selected_duration = select::selected_duration(&selected);
	sink.log(&format!(
		"{} segments selected (total = {selected_duration:.2} s).",
		selected.len()
	));

	if selected.is_empty() {
		return Err(HighlightError::EmptySelection);
	}

	fs::create_dir_all(&config.work_dir)?;
	sink.log("Extracting segments...");

	let mut clips = Vec::with_capacity(selected.len());
	for (index, segment) in selected.iter().enumerate() {
		cancel.check()?;
		let clip = config.work_dir.join(format!("seg_{index}.mp4"));
		sink.log(&format!(
			"Extracting segment {index}: {:.2}s to {:.2}s",
			segment.start, segment.end
		));
		debug!(index, %segment, clip = %clip.display(), "Extracting segment");

		let mut throttle = ProgressThrottle::new();
		engine.extract_range(
			&config.input,
			segment.start,
			segment.duration,
			config.pad,
			&clip,
			&mut |pct| {
				if let Some(pct) = throttle.update(pct) {
					sink.progress(pct);
				}
			},
		)?;
		clips.push(clip);
	}

	cancel.check()?;
	sink.log("Concatenating segments...");
	engine.concatenate(&clips, &config.output)?;
	sink.progress(100.0);

	if !config.keep_work_dir {
		clean_work_dir(&config.work_dir, &clips);
	}

	let summary = PipelineSummary {
		total_duration,
		target_duration,
		silence_count: silences.len(),
		active_count: active.len(),
		scored_count,
		selected_count: selected.len(),
		selected_duration,
	};

	info!(
		selected = summary.selected_count,
		selected_duration = format!("{:.2}s", summary.selected_duration),
		kept_percentage = format!("{:.1}%", summary.kept_percentage()),
		"Pipeline complete"
	);
	sink.log("Highlight reel completed successfully!");

	Ok(summary)
}

/// Remove the files this run wrote, then the directory if that left it empty.
fn clean_work_dir(work_dir: &Path, clips: &[PathBuf]) {
	let list = work_dir.join(CONCAT_LIST_NAME);
	for file in clips.iter().chain(std::iter::once(&list)) {
		if let Err(err) = fs::remove_file(file) {
			if err.kind() != io::ErrorKind::NotFound {
				warn!(file = %file.display(), error = %err, "Failed to remove temporary file");
			}
		}
	}
	if let Err(err) = fs::remove_dir(work_dir) {
		debug!(dir = %work_dir.display(), error = %err, "Working directory left in place");
	}
}

//! Media engine seam between the highlight pipeline and FFmpeg

use std::path::{
	Path,
	PathBuf,
};

use crate::{
	assemble::{
		self,
		EncodeOptions,
	},
	error::Result,
	pipeline::CancellationToken,
	probe,
	score::Loudness,
	segment::TimeInterval,
};

/// Operations the pipeline needs from a media toolkit.
///
/// Implementations block until the operation finishes. Progress callbacks
/// receive raw percentages; throttling is the caller's job. Long analyses
/// return `Cancelled` soon after `cancel` is tripped.
pub trait MediaEngine: Send + Sync {
	/// Total duration of the input in seconds
	fn probe_duration(&self, input: &Path) -> Result<f64>;

	/// Silence intervals sorted by start, within `[0, total_duration]`
	fn detect_silences(
		&self,
		input: &Path,
		noise_threshold_db: f64,
		min_silence_duration: f64,
		total_duration: f64,
		on_progress: &mut dyn FnMut(f64),
		cancel: &CancellationToken,
	) -> Result<Vec<TimeInterval>>;

	fn measure_loudness(
		&self,
		input: &Path,
		start: f64,
		duration: f64,
		cancel: &CancellationToken,
	) -> Result<Loudness>;

	/// Write the padded range as an independently encoded clip
	fn extract_range(
		&self,
		input: &Path,
		start: f64,
		duration: f64,
		pad: f64,
		output: &Path,
		on_progress: &mut dyn FnMut(f64),
	) -> Result<()>;

	/// Join clips in the given order; an empty list is an error
	fn concatenate(&self, clips: &[PathBuf], output: &Path) -> Result<()>;
}

/// Analysis through libav (ffmpeg-next), encoding through the ffmpeg executable
#[derive(Debug, Clone, Default)]
pub struct FfmpegEngine {
	encode: EncodeOptions,
}

impl FfmpegEngine {
	pub fn new(encode: EncodeOptions) -> Self {
		Self { encode }
	}
}

impl MediaEngine for FfmpegEngine {
	fn probe_duration(&self, input: &Path) -> Result<f64> {
		probe::probe_duration(input)
	}

	fn detect_silences(
		&self,
		input: &Path,
		noise_threshold_db: f64,
		min_silence_duration: f64,
		total_duration: f64,
		on_progress: &mut dyn FnMut(f64),
		cancel: &CancellationToken,
	) -> Result<Vec<TimeInterval>> {
		probe::detect_silences(
			input,
			noise_threshold_db,
			min_silence_duration,
			total_duration,
			on_progress,
			cancel,
		)
	}

	fn measure_loudness(
		&self,
		input: &Path,
		start: f64,
		duration: f64,
		cancel: &CancellationToken,
	) -> Result<Loudness> {
		probe::measure_loudness(input, start, duration, cancel)
	}

	fn extract_range(
		&self,
		input: &Path,
		start: f64,
		duration: f64,
		pad: f64,
		output: &Path,
		on_progress: &mut dyn FnMut(f64),
	) -> Result<()> {
		assemble::extract_clip(input, start, duration, pad, output, &self.encode, on_progress)
	}

	fn concatenate(&self, clips: &[PathBuf], output: &Path) -> Result<()> {
		assemble::concatenate(clips, output)
	}
}

//! CLI argument parsing for highlight-rs

use std::path::PathBuf;

use clap::Parser;

use crate::{
	assemble::EncodeOptions,
	error::Result,
	pipeline::PipelineConfig,
	probe::parse_threshold,
	score::{
		ScoreFailurePolicy,
		ScoreOptions,
	},
};

/// Condense a long recording into a highlight reel.
///
/// Silent stretches are cut, the remaining segments are ranked by how lively
/// their audio is, and the best ones are re-encoded and joined in order until
/// the target length is reached (14 to 22 minutes depending on input length).
///
///   highlight-rs -i stream.mkv -o highlights.mp4
#[derive(Parser, Debug, Clone)]
#[command(name = "highlight-rs", version, about, long_about = None)]
pub struct Args {
	/// Input video file path
	#[arg(short, long)]
	pub input: PathBuf,

	/// Output video file path
	#[arg(short, long)]
	pub output: PathBuf,

	/// Silence detection threshold in dB (negative value)
	///
	/// Audio below this level is considered silence.
	#[arg(short = 'n', long, default_value = "-35dB", allow_hyphen_values = true)]
	pub noise_threshold: String,

	/// Minimum silence duration in seconds
	#[arg(short = 'd', long, default_value = "0.8")]
	pub min_silence: f64,

	/// Active segments must be longer than this many seconds to be considered
	#[arg(long, default_value = "1.0")]
	pub min_active: f64,

	/// Seconds of padding added before and after each clip
	#[arg(long, default_value = "0.3")]
	pub pad: f64,

	/// Target highlight duration in seconds (derived from input length by default)
	#[arg(short = 't', long)]
	pub target: Option<f64>,

	/// Directory for intermediate clips
	#[arg(long, default_value = "temp")]
	pub work_dir: PathBuf,

	/// Keep intermediate clips after a successful run
	#[arg(long)]
	pub keep_temp: bool,

	/// Output frame rate of extracted clips
	#[arg(long, default_value = "60")]
	pub frame_rate: u32,

	/// x264 constant rate factor
	#[arg(long, default_value = "18")]
	pub crf: u8,

	/// x264 preset
	#[arg(long, default_value = "fast")]
	pub preset: String,

	/// AAC audio bitrate
	#[arg(long, default_value = "192k")]
	pub audio_bitrate: String,

	/// Number of segments whose loudness is measured in parallel
	#[arg(short = 'j', long, default_value = "1", value_parser = clap::value_parser!(u16).range(1..))]
	pub jobs: u16,

	/// Abort when a segment's loudness cannot be measured instead of skipping it
	#[arg(long)]
	pub strict: bool,

	/// Verbose output (repeat for more verbosity: -v, -vv, -vvv)
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Quiet mode - suppress all non-error output
	#[arg(short, long, conflicts_with = "verbose")]
	pub quiet: bool,
}

impl Args {
	/// Get the tracing log level filter based on verbosity settings
	pub fn log_level(&self) -> tracing::level_filters::LevelFilter {
		use tracing::level_filters::LevelFilter;

		if self.quiet {
			LevelFilter::ERROR
		} else {
			match self.verbose {
				0 => LevelFilter::WARN,
				1 => LevelFilter::INFO,
				2 => LevelFilter::DEBUG,
				_ => LevelFilter::TRACE,
			}
		}
	}

	/// Build the pipeline configuration, validating the threshold
	pub fn pipeline_config(&self) -> Result<PipelineConfig> {
		Ok(PipelineConfig {
			noise_threshold_db: parse_threshold(&self.noise_threshold)?,
			min_silence_duration: self.min_silence,
			min_active_duration: self.min_active,
			pad: self.pad,
			target_duration: self.target,
			work_dir: self.work_dir.clone(),
			keep_work_dir: self.keep_temp,
			score: ScoreOptions {
				jobs: usize::from(self.jobs),
				on_failure: if self.strict {
					ScoreFailurePolicy::Abort
				} else {
					ScoreFailurePolicy::Skip
				},
			},
			..PipelineConfig::new(&self.input, &self.output)
		})
	}

	pub fn encode_options(&self) -> EncodeOptions {
		EncodeOptions {
			frame_rate: self.frame_rate,
			crf: self.crf,
			preset: self.preset.clone(),
			audio_bitrate: self.audio_bitrate.clone(),
			..EncodeOptions::default()
		}
	}
}

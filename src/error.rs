//! Error types for highlight-rs

use std::path::PathBuf;

use miette::Diagnostic;

/// Result type alias using HighlightError
pub type Result<T> = std::result::Result<T, HighlightError>;

/// Main error type for highlight-rs operations
#[derive(Debug, Diagnostic, thiserror::Error)]
pub enum HighlightError {
	/// Caller supplied a value outside its domain (negative duration, bad range)
	#[error("Invalid input: {message}")]
	#[diagnostic(code(highlight::invalid_input))]
	InvalidInput { message: String },

	/// Media engine failed to report duration, silences or loudness
	#[error("Probe failed: {message}")]
	#[diagnostic(code(highlight::probe), help("Check that the input is a readable media file with an audio stream"))]
	Probe { message: String },

	/// Clip extraction failed
	#[error("Failed to extract clip {path}: {message}")]
	#[diagnostic(code(highlight::extract))]
	Extract { path: PathBuf, message: String },

	/// Concatenation of the extracted clips failed
	#[error("Failed to concatenate clips: {message}")]
	#[diagnostic(code(highlight::concat))]
	Concat { message: String },

	/// Nothing survived scoring, so there is nothing to assemble
	#[error("No segment with a positive score - nothing to assemble")]
	#[diagnostic(
		code(highlight::empty_selection),
		help("Try lowering --noise-threshold or --min-active so more of the recording counts as active")
	)]
	EmptySelection,

	/// Input file not found or inaccessible
	#[error("Input file not found: {path}")]
	#[diagnostic(
		code(highlight::input_not_found),
		help("Ensure the file exists and you have read permissions")
	)]
	InputNotFound { path: PathBuf },

	/// Invalid noise threshold format
	#[error("Invalid noise threshold format: {value}")]
	#[diagnostic(
		code(highlight::invalid_threshold),
		help("Threshold should be a negative number in dB, e.g., '-35dB' or '-35'")
	)]
	InvalidThreshold { value: String },

	/// The ffmpeg binary is needed for encoding but is not on PATH
	#[error("ffmpeg executable not found in PATH")]
	#[diagnostic(code(highlight::ffmpeg_not_found), help("Install FFmpeg and make sure `ffmpeg` is on your PATH"))]
	FfmpegNotFound,

	/// Run was cancelled between segment operations
	#[error("Run cancelled")]
	#[diagnostic(code(highlight::cancelled))]
	Cancelled,

	/// FFmpeg library error
	#[error("FFmpeg error: {message}")]
	#[diagnostic(code(highlight::ffmpeg))]
	Ffmpeg {
		message: String,
		#[source]
		source: Option<ffmpeg_next::Error>,
	},

	/// I/O error
	#[error("I/O error: {0}")]
	#[diagnostic(code(highlight::io))]
	Io(#[from] std::io::Error),
}

impl HighlightError {
	pub fn invalid_input(message: impl Into<String>) -> Self {
		HighlightError::InvalidInput {
			message: message.into(),
		}
	}

	pub fn probe(message: impl Into<String>) -> Self {
		HighlightError::Probe {
			message: message.into(),
		}
	}
}

impl From<ffmpeg_next::Error> for HighlightError {
	fn from(err: ffmpeg_next::Error) -> Self {
		HighlightError::Ffmpeg {
			message: err.to_string(),
			source: Some(err),
		}
	}
}

//! highlight-rs: Condense long recordings into highlight reels
//!
//! Silences split the recording into active segments, each segment is scored
//! by its loudness dynamics, and the best segments are greedily packed into a
//! target duration before being re-encoded and concatenated in chronological
//! order.

pub mod assemble;
pub mod cli;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod probe;
pub mod progress;
pub mod score;
pub mod segment;
pub mod select;

pub use engine::{
	FfmpegEngine,
	MediaEngine,
};
pub use error::{
	HighlightError,
	Result,
};
pub use pipeline::{
	run_pipeline,
	CancellationToken,
	PipelineConfig,
	PipelineSummary,
};

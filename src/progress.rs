//! Progress and log reporting from the pipeline worker

use std::sync::mpsc::Sender;

/// Receiver of log lines and percentage updates emitted during a run.
///
/// Called from the worker thread only.
pub trait ProgressSink: Send + Sync {
	/// A human-readable log line
	fn log(&self, message: &str);

	/// Percentage complete of the current long-running operation, 0 to 100
	fn progress(&self, percentage: f64);
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
	fn log(&self, _message: &str) {}

	fn progress(&self, _percentage: f64) {}
}

/// Event delivered to the interactive surface
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
	Log(String),
	Progress(f64),
}

/// Sink forwarding events over a channel to whoever renders them.
///
/// A disconnected receiver is not an error: the run keeps going without an audience.
#[derive(Debug, Clone)]
pub struct ChannelSink {
	tx: Sender<PipelineEvent>,
}

impl ChannelSink {
	pub fn new(tx: Sender<PipelineEvent>) -> Self {
		Self { tx }
	}
}

impl ProgressSink for ChannelSink {
	fn log(&self, message: &str) {
		let _ = self.tx.send(PipelineEvent::Log(message.to_string()));
	}

	fn progress(&self, percentage: f64) {
		let _ = self.tx.send(PipelineEvent::Progress(percentage));
	}
}

/// Limits progress updates to increases of at least one percentage point.
///
/// One throttle is used per collaborator invocation, so the values it lets
/// through are strictly increasing.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProgressThrottle {
	last: f64,
}

impl ProgressThrottle {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the clamped percentage if it should be reported
	pub fn update(&mut self, percentage: f64) -> Option<f64> {
		if !percentage.is_finite() {
			return None;
		}
		let percentage = percentage.clamp(0.0, 100.0);
		if percentage - self.last >= 1.0 {
			self.last = percentage;
			Some(percentage)
		} else {
			None
		}
	}
}

/// Progress information from FFmpeg's `-progress` output.
#[derive(Debug, Clone, Default)]
pub struct FfmpegProgress {
	/// Output time in milliseconds
	pub out_time_ms: i64,
	/// Encoding speed (e.g., 1.5 = 1.5x realtime)
	pub speed: f64,
	/// Whether encoding is complete
	pub is_complete: bool,
}

impl FfmpegProgress {
	/// Calculate progress percentage given total duration in seconds.
	pub fn percentage(&self, total_secs: f64) -> f64 {
		if total_secs <= 0.0 {
			return 0.0;
		}
		((self.out_time_ms as f64 / 1000.0 / total_secs) * 100.0).clamp(0.0, 100.0)
	}
}

/// Parse one line of FFmpeg's `-progress` key/value output.
///
/// Returns a snapshot each time a `progress=` line closes a block.
pub fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> Option<FfmpegProgress> {
	let (key, value) = line.trim().split_once('=')?;

	match key {
		// out_time_ms is actually microseconds in every FFmpeg release that emits it
		"out_time_us" | "out_time_ms" => {
			if let Ok(us) = value.parse::<i64>() {
				current.out_time_ms = us / 1000;
			}
		},
		"speed" => {
			if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
				current.speed = speed;
			}
		},
		"progress" => {
			if value == "end" {
				current.is_complete = true;
			}
			return Some(current.clone());
		},
		_ => {},
	}

	None
}

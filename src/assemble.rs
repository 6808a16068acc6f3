//! Clip extraction and concatenation through the ffmpeg executable.

use std::{
	collections::VecDeque,
	ffi::OsString,
	fs,
	io::{
		self,
		BufRead,
		BufReader,
	},
	path::{
		Path,
		PathBuf,
	},
	process::{
		Command,
		Stdio,
	},
};

use tracing::{
	debug,
	info,
	trace,
	warn,
};

use crate::{
	error::{
		HighlightError,
		Result,
	},
	progress::{
		parse_progress_line,
		FfmpegProgress,
	},
};

/// Default padding around each extracted clip, in seconds
pub const DEFAULT_PAD_SECS: f64 = 0.3;

/// Concat demuxer list written next to the clips
pub const CONCAT_LIST_NAME: &str = "segments.txt";

/// Number of trailing stderr lines kept for error reports
const STDERR_TAIL_LINES: usize = 20;

/// Encoder settings for extracted clips
#[derive(Debug, Clone)]
pub struct EncodeOptions {
	/// Constant output frame rate
	pub frame_rate: u32,
	pub video_codec: String,
	pub preset: String,
	pub crf: u8,
	pub audio_codec: String,
	pub audio_bitrate: String,
}

impl Default for EncodeOptions {
	fn default() -> Self {
		Self {
			frame_rate: 60,
			video_codec: "libx264".to_string(),
			preset: "fast".to_string(),
			crf: 18,
			audio_codec: "aac".to_string(),
			audio_bitrate: "192k".to_string(),
		}
	}
}

/// Widen `(start, duration)` by `pad` on both sides without going below zero.
///
/// When the start is clamped the end is not pushed out to compensate.
pub fn padded_range(start: f64, duration: f64, pad: f64) -> (f64, f64) {
	let new_start = (start - pad).max(0.0);
	let new_duration = if new_start == 0.0 {
		duration + pad
	} else {
		duration + 2.0 * pad
	};
	(new_start, new_duration)
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
	input: PathBuf,
	output: PathBuf,
	/// Arguments placed before -i
	input_args: Vec<OsString>,
	/// Arguments placed after -i
	output_args: Vec<OsString>,
}

impl FfmpegCommand {
	pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
		Self {
			input: input.as_ref().to_path_buf(),
			output: output.as_ref().to_path_buf(),
			input_args: Vec::new(),
			output_args: Vec::new(),
		}
	}

	pub fn input_arg(mut self, arg: impl Into<OsString>) -> Self {
		self.input_args.push(arg.into());
		self
	}

	pub fn output_arg(mut self, arg: impl Into<OsString>) -> Self {
		self.output_args.push(arg.into());
		self
	}

	/// Set seek position (before input).
	pub fn seek(self, seconds: f64) -> Self {
		self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
	}

	/// Set duration (before input).
	pub fn duration(self, seconds: f64) -> Self {
		self.input_arg("-t").input_arg(format!("{:.3}", seconds))
	}

	/// Re-encode with the given settings at a constant frame rate, moov atom up front.
	pub fn encode(self, options: &EncodeOptions) -> Self {
		self.output_arg("-r")
			.output_arg(options.frame_rate.to_string())
			.output_arg("-vsync")
			.output_arg("cfr")
			.output_arg("-c:v")
			.output_arg(options.video_codec.as_str())
			.output_arg("-preset")
			.output_arg(options.preset.as_str())
			.output_arg("-crf")
			.output_arg(options.crf.to_string())
			.output_arg("-movflags")
			.output_arg("+faststart")
			.output_arg("-c:a")
			.output_arg(options.audio_codec.as_str())
			.output_arg("-b:a")
			.output_arg(options.audio_bitrate.as_str())
	}

	/// Paths are passed through untouched, so non-UTF-8 names survive
	pub fn build_args(&self) -> Vec<OsString> {
		let mut args: Vec<OsString> = ["-y", "-hide_banner", "-v", "error", "-progress", "pipe:2"]
			.into_iter()
			.map(OsString::from)
			.collect();

		args.extend(self.input_args.iter().cloned());
		args.push("-i".into());
		args.push(self.input.clone().into_os_string());
		args.extend(self.output_args.iter().cloned());
		args.push(self.output.clone().into_os_string());

		args
	}
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> Result<PathBuf> {
	which::which("ffmpeg").map_err(|_| HighlightError::FfmpegNotFound)
}

/// Run ffmpeg to completion, forwarding progress against `expected_duration` seconds.
///
/// On failure returns the tail of ffmpeg's stderr.
fn run_ffmpeg(
	cmd: &FfmpegCommand,
	expected_duration: f64,
	on_progress: &mut dyn FnMut(f64),
) -> Result<std::result::Result<(), String>> {
	let ffmpeg = check_ffmpeg()?;
	let args = cmd.build_args();
	debug!(
		"Running FFmpeg: ffmpeg {}",
		args.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" ")
	);

	let mut child = Command::new(ffmpeg)
		.args(&args)
		.stdin(Stdio::null())
		.stdout(Stdio::null())
		.stderr(Stdio::piped())
		.spawn()?;

	let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
	let drained = match child.stderr.take() {
		Some(stderr) => drain_stderr(BufReader::new(stderr), &mut tail, expected_duration, on_progress),
		None => Ok(()),
	};

	// The child is always reaped, even when its output could not be read
	if let Err(err) = &drained {
		warn!(error = %err, "Lost ffmpeg stderr, stopping ffmpeg");
		if let Err(kill_err) = child.kill() {
			debug!(error = %kill_err, "ffmpeg already exited");
		}
	}
	let status = child.wait()?;

	let detail = Vec::from(tail).join("\n");
	if let Err(err) = drained {
		return Ok(Err(format!("reading ffmpeg output failed: {err}: {detail}")));
	}
	if status.success() {
		Ok(Ok(()))
	} else {
		Ok(Err(match status.code() {
			Some(code) if detail.is_empty() => format!("ffmpeg exited with status {code}"),
			Some(code) => format!("ffmpeg exited with status {code}: {detail}"),
			None => format!("ffmpeg terminated by signal: {detail}"),
		}))
	}
}

/// Split ffmpeg's stderr into progress updates and a bounded tail of other lines.
///
/// Bytes that are not valid UTF-8 are replaced rather than treated as an error.
fn drain_stderr(
	mut reader: impl BufRead,
	tail: &mut VecDeque<String>,
	expected_duration: f64,
	on_progress: &mut dyn FnMut(f64),
) -> io::Result<()> {
	let mut current = FfmpegProgress::default();
	let mut buf = Vec::new();
	loop {
		buf.clear();
		if reader.read_until(b'\n', &mut buf)? == 0 {
			return Ok(());
		}
		let line = String::from_utf8_lossy(&buf);
		let line = line.trim_end_matches(['\n', '\r']);

		if is_progress_line(line) {
			if let Some(progress) = parse_progress_line(line, &mut current) {
				trace!(speed = progress.speed, out_time_ms = progress.out_time_ms, "ffmpeg progress");
				on_progress(if progress.is_complete {
					100.0
				} else {
					progress.percentage(expected_duration)
				});
			}
			continue;
		}
		if tail.len() == STDERR_TAIL_LINES {
			tail.pop_front();
		}
		tail.push_back(line.to_string());
	}
}

/// `-progress` output is `key=value` with a bare identifier as key
fn is_progress_line(line: &str) -> bool {
	line.split_once('=')
		.is_some_and(|(key, _)| !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
}

/// Extract `[start, start + duration)` (padded) from `input` into `output`, re-encoding.
pub fn extract_clip(
	input: &Path,
	start: f64,
	duration: f64,
	pad: f64,
	output: &Path,
	options: &EncodeOptions,
	on_progress: &mut dyn FnMut(f64),
) -> Result<()> {
	if start < 0.0 || duration <= 0.0 || pad < 0.0 {
		return Err(HighlightError::invalid_input(format!(
			"invalid clip range: start {start}, duration {duration}, pad {pad}"
		)));
	}

	let (clip_start, clip_duration) = padded_range(start, duration, pad);
	debug!(
		output = %output.display(),
		start = clip_start,
		duration = clip_duration,
		"Extracting clip"
	);

	let cmd = FfmpegCommand::new(input, output)
		.seek(clip_start)
		.duration(clip_duration)
		.encode(options);

	run_ffmpeg(&cmd, clip_duration, on_progress)?.map_err(|message| HighlightError::Extract {
		path: output.to_path_buf(),
		message,
	})
}

/// Write an ffmpeg concat demuxer list with absolute paths.
pub fn write_concat_list(clips: &[PathBuf], list_path: &Path) -> Result<()> {
	let mut content = String::new();
	for clip in clips {
		let absolute = std::path::absolute(clip)?;
		// Single quotes inside a quoted entry are written as '\''
		let escaped = absolute.to_string_lossy().replace('\'', r"'\''");
		content.push_str(&format!("file '{escaped}'\n"));
	}
	fs::write(list_path, content)?;
	Ok(())
}

/// Join `clips` in order into `output` with the concat demuxer and stream copy.
///
/// The list file is written next to the first clip.
pub fn concatenate(clips: &[PathBuf], output: &Path) -> Result<()> {
	let Some(first) = clips.first() else {
		return Err(HighlightError::Concat {
			message: "no clips to concatenate".to_string(),
		});
	};

	let list_path = first
		.parent()
		.map(|dir| dir.join(CONCAT_LIST_NAME))
		.unwrap_or_else(|| PathBuf::from(CONCAT_LIST_NAME));
	write_concat_list(clips, &list_path)?;

	info!(clips = clips.len(), output = %output.display(), "Concatenating clips");

	let cmd = FfmpegCommand::new(&list_path, output)
		.input_arg("-f")
		.input_arg("concat")
		.input_arg("-safe")
		.input_arg("0")
		.output_arg("-c")
		.output_arg("copy");

	run_ffmpeg(&cmd, 0.0, &mut |_| {})?.map_err(|message| HighlightError::Concat { message })
}

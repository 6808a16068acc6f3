//! In-process media analysis with ffmpeg-next: duration, silences, loudness

use std::path::Path;

use ffmpeg_next::{
	self as ffmpeg,
	format,
	frame,
	media,
};
use tracing::{
	debug,
	info,
	trace,
};

use crate::{
	error::{
		HighlightError,
		Result,
	},
	pipeline::CancellationToken,
	score::Loudness,
	segment::TimeInterval,
};

/// Lowest level reported for digital silence, matching 16-bit dynamic range
pub const MIN_VOLUME_DB: f64 = -91.0;

/// Total duration of the container in seconds
pub fn probe_duration<P: AsRef<Path>>(path: P) -> Result<f64> {
	let path = path.as_ref();
	ensure_exists(path)?;
	ffmpeg::init()?;

	let ictx = format::input(path)?;
	if ictx.duration() <= 0 {
		return Err(HighlightError::probe(format!(
			"container does not report a duration: {}",
			path.display()
		)));
	}

	let duration = ictx.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE);
	debug!(path = %path.display(), duration, "Probed duration");
	Ok(duration)
}

/// Detect silences by comparing each decoded audio frame's peak against the threshold.
///
/// A run of silent frames lasting at least `min_silence_duration` becomes one
/// interval. `on_progress` receives the raw percentage of `total_duration`
/// decoded so far. `cancel` is checked before every packet.
pub fn detect_silences<P: AsRef<Path>>(
	path: P,
	noise_threshold_db: f64,
	min_silence_duration: f64,
	total_duration: f64,
	on_progress: &mut dyn FnMut(f64),
	cancel: &CancellationToken,
) -> Result<Vec<TimeInterval>> {
	let path = path.as_ref();
	ensure_exists(path)?;
	ffmpeg::init()?;

	info!(
		path = %path.display(),
		threshold_db = noise_threshold_db,
		min_duration = min_silence_duration,
		"Starting silence detection"
	);

	let mut ictx = format::input(path)?;
	let (stream_index, time_base, mut decoder) = {
		let stream = ictx
			.streams()
			.best(media::Type::Audio)
			.ok_or_else(|| HighlightError::probe("no audio stream found in input"))?;
		let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?;
		(stream.index(), stream.time_base(), context.decoder().audio()?)
	};

	let threshold_linear = db_to_linear(noise_threshold_db);
	let mut tracker = SilenceTracker::new(min_silence_duration);
	let mut decoded = frame::Audio::empty();
	let mut frame_count = 0u64;

	let mut observe = |decoded: &frame::Audio, tracker: &mut SilenceTracker| {
		let timestamp = decoded.pts().unwrap_or(0) as f64 * f64::from(time_base);
		// Unknown sample formats count as audible so content is never masked
		let silent = frame_peak(decoded).is_some_and(|peak| peak < threshold_linear);
		trace!(timestamp, silent, "Processed audio frame");
		tracker.observe(timestamp, silent);
		if total_duration > 0.0 {
			on_progress(timestamp / total_duration * 100.0);
		}
	};

	for (stream, packet) in ictx.packets() {
		cancel.check()?;
		if stream.index() != stream_index {
			continue;
		}
		decoder.send_packet(&packet)?;
		while decoder.receive_frame(&mut decoded).is_ok() {
			frame_count += 1;
			observe(&decoded, &mut tracker);
		}
	}

	decoder.send_eof()?;
	while decoder.receive_frame(&mut decoded).is_ok() {
		frame_count += 1;
		observe(&decoded, &mut tracker);
	}

	let silences = tracker.finish(total_duration);

	info!(
		segments = silences.len(),
		frames_processed = frame_count,
		"Silence detection complete"
	);

	Ok(silences)
}

/// Peak and mean level of the audio between `start` and `start + duration`.
pub fn measure_loudness<P: AsRef<Path>>(
	path: P,
	start: f64,
	duration: f64,
	cancel: &CancellationToken,
) -> Result<Loudness> {
	let path = path.as_ref();
	if start < 0.0 || duration <= 0.0 {
		return Err(HighlightError::invalid_input(format!(
			"invalid loudness range: start {start}, duration {duration}"
		)));
	}
	ensure_exists(path)?;
	ffmpeg::init()?;

	let mut ictx = format::input(path)?;
	let (stream_index, time_base, mut decoder) = {
		let stream = ictx
			.streams()
			.best(media::Type::Audio)
			.ok_or_else(|| HighlightError::probe("no audio stream found in input"))?;
		let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?;
		(stream.index(), stream.time_base(), context.decoder().audio()?)
	};

	let seek_ts = (start * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
	ictx.seek(seek_ts, ..seek_ts)?;

	let end = start + duration;
	let mut meter = LoudnessMeter::default();
	let mut decoded = frame::Audio::empty();

	// Returns true once a frame starts past the range
	let mut feed = |decoded: &frame::Audio| {
		let timestamp = decoded.pts().unwrap_or(0) as f64 * f64::from(time_base);
		if timestamp >= end {
			return true;
		}
		if timestamp >= start {
			visit_samples(decoded, |sample| meter.push(sample));
		}
		false
	};

	let mut past_end = false;
	'packets: for (stream, packet) in ictx.packets() {
		cancel.check()?;
		if stream.index() != stream_index {
			continue;
		}
		decoder.send_packet(&packet)?;
		while decoder.receive_frame(&mut decoded).is_ok() {
			if feed(&decoded) {
				past_end = true;
				break 'packets;
			}
		}
	}

	// Range runs to end of stream: flush frames still buffered in the decoder
	if !past_end {
		decoder.send_eof()?;
		while decoder.receive_frame(&mut decoded).is_ok() {
			if feed(&decoded) {
				break;
			}
		}
	}

	let loudness = meter
		.finish()
		.ok_or_else(|| HighlightError::probe(format!("no audio samples between {start:.2}s and {end:.2}s")))?;

	trace!(
		start,
		duration,
		max_db = loudness.max_volume_db,
		mean_db = loudness.mean_volume_db,
		"Measured loudness"
	);
	Ok(loudness)
}

fn ensure_exists(path: &Path) -> Result<()> {
	if !path.exists() {
		return Err(HighlightError::InputNotFound {
			path: path.to_path_buf(),
		});
	}
	Ok(())
}

/// Turns a stream of per-frame silent/audible observations into silence intervals.
#[derive(Debug)]
pub struct SilenceTracker {
	min_duration: f64,
	current_start: Option<f64>,
	silences: Vec<TimeInterval>,
}

impl SilenceTracker {
	pub fn new(min_duration: f64) -> Self {
		Self {
			min_duration,
			current_start: None,
			silences: Vec::new(),
		}
	}

	pub fn observe(&mut self, timestamp: f64, silent: bool) {
		match (self.current_start, silent) {
			(None, true) => {
				self.current_start = Some(timestamp);
			},
			(Some(start), false) => {
				let duration = timestamp - start;
				if duration >= self.min_duration {
					debug!(start, end = timestamp, duration, "Detected silence segment");
					self.silences.push(TimeInterval::new(start, timestamp));
				}
				self.current_start = None;
			},
			_ => {},
		}
	}

	/// Close a silence still open at end of stream and clamp everything to `[0, total_duration]`.
	pub fn finish(mut self, total_duration: f64) -> Vec<TimeInterval> {
		let total_duration = total_duration.max(0.0);
		if let Some(start) = self.current_start.take() {
			if total_duration - start >= self.min_duration {
				debug!(start, end = total_duration, "Detected silence at end of file");
				self.silences.push(TimeInterval::new(start, total_duration));
			}
		}

		self.silences
			.into_iter()
			.map(|s| TimeInterval::new(s.start.clamp(0.0, total_duration), s.end.clamp(0.0, total_duration)))
			.filter(|s| s.end > s.start)
			.collect()
	}
}

/// Accumulates peak and mean-square level over normalized samples.
#[derive(Debug, Default)]
pub struct LoudnessMeter {
	peak: f64,
	sum_squares: f64,
	count: u64,
}

impl LoudnessMeter {
	pub fn push(&mut self, sample: f64) {
		let magnitude = sample.abs();
		if magnitude > self.peak {
			self.peak = magnitude;
		}
		self.sum_squares += sample * sample;
		self.count += 1;
	}

	/// None when no samples were seen
	pub fn finish(&self) -> Option<Loudness> {
		if self.count == 0 {
			return None;
		}
		let mean_square = self.sum_squares / self.count as f64;
		Some(Loudness {
			max_volume_db: linear_to_db(self.peak),
			mean_volume_db: power_to_db(mean_square),
		})
	}
}

/// Convert a dB level to linear amplitude: 10^(dB/20)
pub fn db_to_linear(db: f64) -> f64 {
	10.0_f64.powf(db / 20.0)
}

/// Convert a linear amplitude to dB, floored at [`MIN_VOLUME_DB`]
pub fn linear_to_db(amplitude: f64) -> f64 {
	if amplitude <= 0.0 {
		return MIN_VOLUME_DB;
	}
	(20.0 * amplitude.log10()).max(MIN_VOLUME_DB)
}

fn power_to_db(power: f64) -> f64 {
	if power <= 0.0 {
		return MIN_VOLUME_DB;
	}
	(10.0 * power.log10()).max(MIN_VOLUME_DB)
}

/// Parse a dB threshold string (e.g., "-35dB" or "-35") into its dB value.
pub fn parse_threshold(threshold: &str) -> Result<f64> {
	let threshold_str = threshold
		.trim()
		.trim_end_matches("dB")
		.trim_end_matches("db")
		.trim_end_matches("DB");

	let threshold_db: f64 = threshold_str.trim().parse().map_err(|_| HighlightError::InvalidThreshold {
		value: threshold.to_string(),
	})?;

	if !threshold_db.is_finite() || threshold_db > 0.0 {
		return Err(HighlightError::InvalidThreshold {
			value: threshold.to_string(),
		});
	}

	debug!(threshold_db, threshold_linear = db_to_linear(threshold_db), "Parsed noise threshold");

	Ok(threshold_db)
}

/// Largest absolute sample in the frame, None if the format is not understood
fn frame_peak(frame: &frame::Audio) -> Option<f64> {
	let mut peak = 0.0_f64;
	let known = visit_samples(frame, |s| peak = peak.max(s.abs()));
	known.then_some(peak)
}

/// Call `f` with every sample of every channel normalized to [-1, 1].
///
/// Returns false for sample formats that are not handled.
fn visit_samples(frame: &frame::Audio, mut f: impl FnMut(f64)) -> bool {
	let samples = frame.samples();
	if samples == 0 || frame.planes() == 0 {
		return true;
	}

	// Planar frames hold one channel per plane, packed frames interleave them in plane 0
	let (planes, per_plane) = if frame.is_planar() {
		(frame.planes(), samples)
	} else {
		(1, samples * usize::from(frame.channels()))
	};

	let format = frame.format();
	for plane in 0..planes {
		let data = frame.data(plane);
		match format {
			format::Sample::I16(_) => data
				.chunks_exact(2)
				.take(per_plane)
				.filter_map(|c| <[u8; 2]>::try_from(c).ok())
				.for_each(|b| f(f64::from(i16::from_ne_bytes(b)) / f64::from(i16::MAX))),
			format::Sample::I32(_) => data
				.chunks_exact(4)
				.take(per_plane)
				.filter_map(|c| <[u8; 4]>::try_from(c).ok())
				.for_each(|b| f(f64::from(i32::from_ne_bytes(b)) / f64::from(i32::MAX))),
			format::Sample::F32(_) => data
				.chunks_exact(4)
				.take(per_plane)
				.filter_map(|c| <[u8; 4]>::try_from(c).ok())
				.for_each(|b| f(f64::from(f32::from_ne_bytes(b)))),
			format::Sample::F64(_) => data
				.chunks_exact(8)
				.take(per_plane)
				.filter_map(|c| <[u8; 8]>::try_from(c).ok())
				.for_each(|b| f(f64::from_ne_bytes(b))),
			// U8 is centered at 128
			format::Sample::U8(_) => data
				.iter()
				.take(per_plane)
				.for_each(|&s| f((f64::from(s) - 128.0) / 128.0)),
			_ => return false,
		}
	}

	true
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_threshold_parsing_valid() {
		assert_eq!(parse_threshold("-35dB").unwrap(), -35.0);
		assert_eq!(parse_threshold("-35db").unwrap(), -35.0);
		assert_eq!(parse_threshold("-35").unwrap(), -35.0);
		assert_eq!(parse_threshold("  -30dB  ").unwrap(), -30.0);
		assert_eq!(parse_threshold("-50 dB").unwrap(), -50.0);
	}

	#[test]
	fn test_threshold_parsing_invalid() {
		assert!(parse_threshold("invalid").is_err());
		assert!(parse_threshold("dB").is_err());
		assert!(parse_threshold("abc123").is_err());
		assert!(parse_threshold("6dB").is_err());
	}

	#[test]
	fn test_db_conversions() {
		assert!((db_to_linear(-50.0) - 0.00316).abs() < 0.001);
		assert!((db_to_linear(0.0) - 1.0).abs() < 1e-12);
		assert!((linear_to_db(1.0)).abs() < 1e-12);
		assert!((linear_to_db(0.5) - -6.0206).abs() < 0.001);
		assert_eq!(linear_to_db(0.0), MIN_VOLUME_DB);
	}

	#[test]
	fn test_tracker_middle_silence() {
		let mut tracker = SilenceTracker::new(0.8);
		for (ts, silent) in [(0.0, false), (1.0, true), (1.5, true), (2.0, false), (3.0, false)] {
			tracker.observe(ts, silent);
		}
		assert_eq!(tracker.finish(4.0), vec![TimeInterval::new(1.0, 2.0)]);
	}

	#[test]
	fn test_tracker_ignores_short_silence() {
		let mut tracker = SilenceTracker::new(0.8);
		tracker.observe(1.0, true);
		tracker.observe(1.5, false);
		assert!(tracker.finish(4.0).is_empty());
	}

	#[test]
	fn test_tracker_closes_trailing_silence() {
		let mut tracker = SilenceTracker::new(0.8);
		tracker.observe(0.0, false);
		tracker.observe(8.0, true);
		tracker.observe(9.5, true);
		assert_eq!(tracker.finish(10.0), vec![TimeInterval::new(8.0, 10.0)]);
	}

	#[test]
	fn test_tracker_clamps_to_duration() {
		let mut tracker = SilenceTracker::new(0.5);
		tracker.observe(-0.02, true);
		tracker.observe(1.0, false);
		tracker.observe(9.0, true);
		tracker.observe(10.4, false);
		assert_eq!(
			tracker.finish(10.0),
			vec![TimeInterval::new(0.0, 1.0), TimeInterval::new(9.0, 10.0)]
		);
	}

	#[test]
	fn test_loudness_meter() {
		let mut meter = LoudnessMeter::default();
		assert!(meter.finish().is_none());

		for s in [1.0, -1.0, 1.0, -1.0] {
			meter.push(s);
		}
		let loudness = meter.finish().unwrap();
		assert!(loudness.max_volume_db.abs() < 1e-9);
		assert!(loudness.mean_volume_db.abs() < 1e-9);

		let mut meter = LoudnessMeter::default();
		for s in [0.1, -0.1] {
			meter.push(s);
		}
		let loudness = meter.finish().unwrap();
		assert!((loudness.max_volume_db - -20.0).abs() < 1e-9);
		assert!((loudness.mean_volume_db - -20.0).abs() < 1e-9);
	}

	#[test]
	fn test_loudness_meter_digital_silence() {
		let mut meter = LoudnessMeter::default();
		meter.push(0.0);
		let loudness = meter.finish().unwrap();
		assert_eq!(loudness.max_volume_db, MIN_VOLUME_DB);
		assert_eq!(loudness.mean_volume_db, MIN_VOLUME_DB);
	}

	#[test]
	fn test_missing_input_reported() {
		let err = probe_duration("/definitely/not/here.mp4").unwrap_err();
		assert!(matches!(err, HighlightError::InputNotFound { .. }));
	}

	const RATE: u32 = 8000;
	const LOUD: i16 = 16384;

	/// Mono 16-bit PCM WAV
	fn write_wav(path: &Path, samples: &[i16]) {
		let data_len = (samples.len() * 2) as u32;
		let mut bytes = Vec::with_capacity(44 + samples.len() * 2);
		bytes.extend_from_slice(b"RIFF");
		bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
		bytes.extend_from_slice(b"WAVEfmt ");
		bytes.extend_from_slice(&16u32.to_le_bytes());
		bytes.extend_from_slice(&1u16.to_le_bytes());
		bytes.extend_from_slice(&1u16.to_le_bytes());
		bytes.extend_from_slice(&RATE.to_le_bytes());
		bytes.extend_from_slice(&(RATE * 2).to_le_bytes());
		bytes.extend_from_slice(&2u16.to_le_bytes());
		bytes.extend_from_slice(&16u16.to_le_bytes());
		bytes.extend_from_slice(b"data");
		bytes.extend_from_slice(&data_len.to_le_bytes());
		for sample in samples {
			bytes.extend_from_slice(&sample.to_le_bytes());
		}
		std::fs::write(path, bytes).unwrap();
	}

	/// Square wave at half scale for `secs` seconds
	fn tone(secs: u32) -> Vec<i16> {
		(0..RATE * secs).map(|i| if i % 2 == 0 { LOUD } else { -LOUD }).collect()
	}

	fn silence(secs: u32) -> Vec<i16> {
		vec![0; (RATE * secs) as usize]
	}

	#[test]
	fn test_wav_silence_detection() {
		let dir = tempfile::tempdir().unwrap();
		let wav = dir.path().join("talk.wav");
		write_wav(&wav, &[tone(1), silence(2), tone(1)].concat());

		let total = probe_duration(&wav).unwrap();
		assert!((total - 4.0).abs() < 0.01);

		let mut last = 0.0;
		let cancel = CancellationToken::new();
		let silences = detect_silences(&wav, -35.0, 0.8, total, &mut |pct| last = pct, &cancel).unwrap();

		assert_eq!(silences.len(), 1);
		assert!((1.0..1.5).contains(&silences[0].start), "{}", silences[0]);
		assert!((2.5..=3.0).contains(&silences[0].end), "{}", silences[0]);
		assert!(last > 50.0);
	}

	#[test]
	fn test_wav_loudness_of_trailing_range() {
		let dir = tempfile::tempdir().unwrap();
		let wav = dir.path().join("tone.wav");
		write_wav(&wav, &[silence(2), tone(2)].concat());

		// Range runs to the end of the file
		let loudness = measure_loudness(&wav, 2.0, 2.0, &CancellationToken::new()).unwrap();
		assert!((loudness.max_volume_db - -6.02).abs() < 0.05);
		assert!((loudness.mean_volume_db - -6.02).abs() < 0.05);
	}

	#[test]
	fn test_wav_analysis_stops_when_cancelled() {
		let dir = tempfile::tempdir().unwrap();
		let wav = dir.path().join("long.wav");
		write_wav(&wav, &tone(4));

		let cancel = CancellationToken::new();
		cancel.cancel();

		let err = detect_silences(&wav, -35.0, 0.8, 4.0, &mut |_| {}, &cancel).unwrap_err();
		assert!(matches!(err, HighlightError::Cancelled));
		let err = measure_loudness(&wav, 0.0, 4.0, &cancel).unwrap_err();
		assert!(matches!(err, HighlightError::Cancelled));
	}
}

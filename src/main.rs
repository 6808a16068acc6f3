//! highlight-rs: Condense long recordings into highlight reels
//!
//! The pipeline runs on a worker thread; this thread renders its log lines and
//! progress until the worker finishes.

use std::{
	sync::mpsc,
	thread,
};

use clap::Parser;
use highlight_rs::{
	assemble,
	cli::Args,
	error::HighlightError,
	pipeline::{
		self,
		CancellationToken,
		PipelineSummary,
	},
	progress::{
		ChannelSink,
		PipelineEvent,
	},
	FfmpegEngine,
};
use indicatif::{
	ProgressBar,
	ProgressStyle,
};
use miette::Result;
use tracing::{
	info,
	warn,
};
use tracing_subscriber::{
	fmt,
	prelude::*,
	EnvFilter,
};

fn main() -> Result<()> {
	// Parse CLI arguments
	let args = Args::parse();

	// Initialize tracing
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_level().to_string()));

	tracing_subscriber::registry()
		.with(fmt::layer().with_writer(std::io::stderr))
		.with(filter)
		.init();

	// Run the application
	run(args).map_err(miette::Report::new)
}

fn run(args: Args) -> std::result::Result<(), HighlightError> {
	// Validate input file exists
	if !args.input.exists() {
		return Err(HighlightError::InputNotFound {
			path: args.input.clone(),
		});
	}

	// Fail before hours of analysis if encoding is impossible
	let ffmpeg = assemble::check_ffmpeg()?;
	info!(ffmpeg = %ffmpeg.display(), input = %args.input.display(), "Starting highlight-rs");

	let config = args.pipeline_config()?;
	let engine = FfmpegEngine::new(args.encode_options());

	let cancel = CancellationToken::new();
	{
		let cancel = cancel.clone();
		if let Err(err) = ctrlc::set_handler(move || cancel.cancel()) {
			warn!(error = %err, "Failed to install Ctrl+C handler");
		}
	}

	let (tx, rx) = mpsc::channel();
	let worker = thread::Builder::new().name("pipeline".to_string()).spawn(move || {
		let sink = ChannelSink::new(tx);
		pipeline::run_pipeline(&engine, &config, &sink, &cancel)
	})?;

	let bar = if args.quiet {
		ProgressBar::hidden()
	} else {
		let bar = ProgressBar::new(100);
		bar.set_style(
			ProgressStyle::default_bar()
				.template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}%")
				.unwrap_or_else(|_| ProgressStyle::default_bar())
				.progress_chars("=>-"),
		);
		bar
	};

	// Channel closes when the worker drops its sink
	for event in rx {
		match event {
			PipelineEvent::Log(line) => {
				if !args.quiet {
					bar.println(line);
				}
			},
			PipelineEvent::Progress(pct) => bar.set_position(pct.round() as u64),
		}
	}
	bar.finish_and_clear();

	let summary = match worker.join() {
		Ok(result) => result?,
		Err(panic) => std::panic::resume_unwind(panic),
	};

	if !args.quiet {
		print_summary(&summary, &args);
	}

	Ok(())
}

fn print_summary(summary: &PipelineSummary, args: &Args) {
	eprintln!();
	eprintln!("Highlights complete:");
	eprintln!("  Output:            {}", args.output.display());
	eprintln!("  Input duration:    {:.2}s", summary.total_duration);
	eprintln!("  Target duration:   {:.2}s", summary.target_duration);
	eprintln!("  Silences:          {}", summary.silence_count);
	eprintln!("  Active segments:   {}", summary.active_count);
	eprintln!("  Scored segments:   {}", summary.scored_count);
	eprintln!("  Selected segments: {}", summary.selected_count);
	eprintln!("  Highlight length:  {:.2}s", summary.selected_duration);
	eprintln!("  Content kept:      {:.1}%", summary.kept_percentage());
}

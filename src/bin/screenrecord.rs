//! screenrecord - record the display to an MP4 file.
//!
//! Usage:
//!   screenrecord [options] <FILE>
//!
//! Options:
//!   --size <WxH>          Video size (default: display resolution)
//!   --bit-rate <RATE>     Video bit rate in bps (default: 4000000)
//!   --time-limit <SECS>   Stop after SECS seconds (default and max: 180)
//!   --rotate              Rotate the output 90 degrees
//!   --audio               Record the microphone as well
//!   --config <PATH>       TOML settings file
//!   --verbose             Show interesting information
//!
//! Recording stops at the time limit or on Ctrl+C. A second Ctrl+C exits
//! immediately.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use screenrec::{
    record_screen, signal, Args, CommandScanner, DefaultBackends, MonotonicClock, RecordDeps,
    Settings, TestPatternDisplay,
};

/// Exit status for invalid settings, matching clap's usage errors.
const USAGE_EXIT_CODE: i32 = 2;

/// Create or truncate the output so an unwritable path fails before any
/// encoder is started.
fn prepare_output(path: &Path) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }
    options.open(path)?;
    Ok(())
}

/// `RUST_LOG` wins when set; otherwise our crates log at info (debug with
/// `--verbose`) and everything else at warn.
fn log_filter(verbose: bool) -> Result<EnvFilter> {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return Ok(EnvFilter::try_from_default_env()?);
    }
    let level = if verbose { "debug" } else { "info" };
    Ok(EnvFilter::new("warn")
        .add_directive(format!("screenrec={}", level).parse()?)
        .add_directive(format!("screenrecord={}", level).parse()?))
}

fn print_settings(settings: &Settings) {
    println!();
    println!("========================================");
    println!("screenrecord");
    println!("========================================");
    println!("Output:     {}", settings.output.display());
    match settings.size {
        Some(size) => println!("Size:       {}x{}", size.width, size.height),
        None => println!("Size:       display"),
    }
    println!(
        "Bit rate:   {:.2} Mbps",
        f64::from(settings.bit_rate) / 1_000_000.0
    );
    println!("Time limit: {}s", settings.time_limit.as_secs());
    println!("Rotate:     {}", settings.rotate);
    println!("Audio:      {}", settings.audio);
    println!("========================================");
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(log_filter(args.verbose)?)
        .init();

    let settings = match Settings::from_args(&args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(USAGE_EXIT_CODE);
        }
    };
    prepare_output(&settings.output)
        .with_context(|| format!("unable to open '{}'", settings.output.display()))?;
    if settings.verbose {
        print_settings(&settings);
    }

    let cancel = CancellationToken::new();
    signal::install(cancel.clone());

    let verbose = settings.verbose;
    let report = tokio::task::spawn_blocking(move || {
        let mut capture = TestPatternDisplay::new(settings.display);
        let scanner = CommandScanner::new(settings.notify_command.clone(), settings.verbose);
        record_screen(
            &settings,
            RecordDeps {
                capture: &mut capture,
                backends: &DefaultBackends,
                scanner: &scanner,
                cancel,
                clock: Arc::new(MonotonicClock),
            },
        )
    })
    .await
    .context("recording task failed")?
    .context("recording failed")?;

    tracing::info!(
        "Recorded {} video / {} audio samples to {} ({})",
        report.pipeline.video_frames,
        report.pipeline.audio_frames,
        report.output.display(),
        report.pipeline.stop_reason
    );
    if verbose {
        println!(
            "Recorded {}x{}{} for {:.1}s: {} video frames, {} audio frames",
            report.width,
            report.height,
            if report.audio { " with audio" } else { "" },
            report.pipeline.elapsed.as_secs_f64(),
            report.pipeline.video_frames,
            report.pipeline.audio_frames
        );
    }
    Ok(())
}

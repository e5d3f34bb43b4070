//! Recording settings: command line, optional TOML file, defaults.
//!
//! Precedence is command line, then file, then built-in defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::coordinator::POLL_TIMEOUT;
use crate::display::{DisplayInfo, Orientation};
use crate::error::ConfigError;
use crate::mp4::DEFAULT_FRAGMENT_DURATION;

pub const DEFAULT_BIT_RATE: u32 = 4_000_000;
pub const MIN_BIT_RATE: u32 = 100_000;
pub const MAX_BIT_RATE: u32 = 100_000_000;
/// Longest recording, in seconds. Also the default.
pub const MAX_TIME_LIMIT_SECS: u64 = 180;

/// Requested encoder frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSize {
    pub width: u32,
    pub height: u32,
}

impl FromStr for VideoSize {
    type Err = ConfigError;

    /// Parse `WIDTHxHEIGHT`, e.g. `1280x720`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidSize(s.to_string());
        let (w, h) = s.split_once('x').ok_or_else(invalid)?;
        let digits = |v: &str| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit());
        if !digits(w) || !digits(h) {
            return Err(invalid());
        }
        let width: u32 = w.parse().map_err(|_| invalid())?;
        let height: u32 = h.parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

/// Record the screen to an MP4 file.
#[derive(Debug, Clone, Parser)]
#[command(name = "screenrecord", version, about)]
pub struct Args {
    /// Video size, e.g. "1280x720". Defaults to the display resolution.
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = VideoSize::from_str)]
    pub size: Option<VideoSize>,

    /// Video bit rate in bits per second [default: 4000000]
    #[arg(
        long,
        value_name = "RATE",
        value_parser = clap::value_parser!(u32).range(i64::from(MIN_BIT_RATE)..=i64::from(MAX_BIT_RATE))
    )]
    pub bit_rate: Option<u32>,

    /// Maximum recording time in seconds [default: 180]
    #[arg(
        long,
        value_name = "SECS",
        value_parser = clap::value_parser!(u64).range(1..=MAX_TIME_LIMIT_SECS)
    )]
    pub time_limit: Option<u64>,

    /// Rotate the output 90 degrees.
    #[arg(long)]
    pub rotate: bool,

    /// Record microphone audio as well.
    #[arg(long)]
    pub audio: bool,

    /// Show interesting information on stderr.
    #[arg(short, long)]
    pub verbose: bool,

    /// Load settings from a TOML file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Output file.
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub size: Option<String>,
    pub bit_rate: Option<u32>,
    pub time_limit: Option<u64>,
    pub rotate: Option<bool>,
    pub audio: Option<bool>,
    pub display: DisplaySection,
    pub pipeline: PipelineSection,
    pub notify: NotifySection,
}

/// Geometry of the test-pattern display.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplaySection {
    pub width: u32,
    pub height: u32,
    pub fps: f32,
    /// Degrees: 0, 90, 180 or 270.
    pub orientation: u32,
}

impl Default for DisplaySection {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 60.0,
            orientation: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSection {
    pub poll_timeout_ms: u64,
    pub fragment_duration_ms: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            poll_timeout_ms: POLL_TIMEOUT.as_millis() as u64,
            fragment_duration_ms: DEFAULT_FRAGMENT_DURATION.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotifySection {
    /// Program and arguments run after a successful recording. `{}` is
    /// replaced by the file URL, which is appended when absent. Empty
    /// disables notification.
    pub command: Vec<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Fully resolved settings for one recording.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub output: PathBuf,
    /// Explicit frame size; `None` follows the display.
    pub size: Option<VideoSize>,
    pub bit_rate: u32,
    pub time_limit: Duration,
    pub rotate: bool,
    pub audio: bool,
    pub verbose: bool,
    pub display: DisplayInfo,
    pub poll_timeout: Duration,
    pub fragment_duration: Duration,
    pub notify_command: Vec<String>,
}

impl Settings {
    /// Defaults for recording to `output`.
    pub fn new(output: impl Into<PathBuf>) -> Self {
        let display = DisplaySection::default();
        Self {
            output: output.into(),
            size: None,
            bit_rate: DEFAULT_BIT_RATE,
            time_limit: Duration::from_secs(MAX_TIME_LIMIT_SECS),
            rotate: false,
            audio: false,
            verbose: false,
            display: DisplayInfo {
                width: display.width,
                height: display.height,
                fps: display.fps,
                orientation: Orientation::Deg0,
            },
            poll_timeout: POLL_TIMEOUT,
            fragment_duration: DEFAULT_FRAGMENT_DURATION,
            notify_command: Vec::new(),
        }
    }

    /// Resolve command-line arguments, loading `--config` if given.
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(args, &file)
    }

    /// Combine `args` over `file` over the defaults, validating file values
    /// the command-line parser has not already checked.
    pub fn merge(args: &Args, file: &FileConfig) -> Result<Self, ConfigError> {
        let mut settings = Self::new(&args.file);

        let file_size = file.size.as_deref().map(VideoSize::from_str).transpose()?;
        settings.size = args.size.or(file_size);

        settings.bit_rate = match (args.bit_rate, file.bit_rate) {
            (Some(rate), _) => rate,
            (None, Some(rate)) => check_range(
                "bit rate",
                u64::from(rate),
                u64::from(MIN_BIT_RATE),
                u64::from(MAX_BIT_RATE),
            )? as u32,
            (None, None) => DEFAULT_BIT_RATE,
        };

        let secs = match (args.time_limit, file.time_limit) {
            (Some(secs), _) => secs,
            (None, Some(secs)) => check_range("time limit", secs, 1, MAX_TIME_LIMIT_SECS)?,
            (None, None) => MAX_TIME_LIMIT_SECS,
        };
        settings.time_limit = Duration::from_secs(secs);

        settings.rotate = args.rotate || file.rotate.unwrap_or(false);
        settings.audio = args.audio || file.audio.unwrap_or(false);
        settings.verbose = args.verbose;

        let display = &file.display;
        let orientation = Orientation::from_degrees(display.orientation)
            .ok_or(ConfigError::InvalidOrientation(display.orientation))?;
        if display.width == 0 || display.height == 0 {
            return Err(ConfigError::InvalidSize(format!(
                "{}x{}",
                display.width, display.height
            )));
        }
        settings.display = DisplayInfo {
            width: display.width,
            height: display.height,
            fps: if display.fps > 0.0 { display.fps } else { 60.0 },
            orientation,
        };

        settings.poll_timeout = Duration::from_millis(check_range(
            "poll timeout ms",
            file.pipeline.poll_timeout_ms,
            1,
            1000,
        )?);
        settings.fragment_duration = Duration::from_millis(check_range(
            "fragment duration ms",
            file.pipeline.fragment_duration_ms,
            10,
            60_000,
        )?);
        settings.notify_command = file.notify.command.clone();
        Ok(settings)
    }
}

fn check_range(name: &'static str, value: u64, min: u64, max: u64) -> Result<u64, ConfigError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["screenrecord"];
        argv.extend_from_slice(extra);
        argv.push("/tmp/out.mp4");
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(
            "1280x720".parse::<VideoSize>().unwrap(),
            VideoSize {
                width: 1280,
                height: 720
            }
        );
        for bad in ["", "1280", "1280x", "x720", "0x720", "1280x0", "12a0x720", "1280x720x", "-1x5", " 1x5"] {
            assert!(bad.parse::<VideoSize>().is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::merge(&args(&[]), &FileConfig::default()).unwrap();
        assert_eq!(settings.bit_rate, 4_000_000);
        assert_eq!(settings.time_limit, Duration::from_secs(180));
        assert_eq!(settings.size, None);
        assert!(!settings.rotate);
        assert!(!settings.audio);
        assert_eq!(settings.poll_timeout, Duration::from_millis(20));
        assert_eq!(settings.output, PathBuf::from("/tmp/out.mp4"));
        assert!(settings.notify_command.is_empty());
    }

    #[test]
    fn test_cli_ranges() {
        assert!(Args::try_parse_from(["screenrecord", "--bit-rate", "99999", "f.mp4"]).is_err());
        assert!(Args::try_parse_from(["screenrecord", "--bit-rate", "100000001", "f.mp4"]).is_err());
        assert!(Args::try_parse_from(["screenrecord", "--time-limit", "0", "f.mp4"]).is_err());
        assert!(Args::try_parse_from(["screenrecord", "--time-limit", "181", "f.mp4"]).is_err());
        assert!(Args::try_parse_from(["screenrecord", "--size", "0x10", "f.mp4"]).is_err());
        assert!(Args::try_parse_from(["screenrecord"]).is_err());

        let a = args(&["--bit-rate", "100000", "--time-limit", "1", "--size", "640x480"]);
        assert_eq!(a.bit_rate, Some(100_000));
        assert_eq!(a.time_limit, Some(1));
        assert_eq!(
            a.size,
            Some(VideoSize {
                width: 640,
                height: 480
            })
        );
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            size = "800x600"
            bit_rate = 2000000
            time_limit = 30
            audio = true

            [display]
            width = 1080
            height = 1920
            fps = 30.0
            orientation = 90

            [pipeline]
            poll_timeout_ms = 10

            [notify]
            command = ["true"]
            "#,
        )
        .unwrap();

        let settings = Settings::merge(&args(&["--time-limit", "5"]), &file).unwrap();
        assert_eq!(
            settings.size,
            Some(VideoSize {
                width: 800,
                height: 600
            })
        );
        assert_eq!(settings.bit_rate, 2_000_000);
        assert_eq!(settings.time_limit, Duration::from_secs(5));
        assert!(settings.audio);
        assert_eq!(settings.display.orientation, Orientation::Deg90);
        assert_eq!(settings.display.fps, 30.0);
        assert_eq!(settings.poll_timeout, Duration::from_millis(10));
        assert_eq!(settings.fragment_duration, Duration::from_secs(1));
        assert_eq!(settings.notify_command, vec!["true".to_string()]);
    }

    #[test]
    fn test_file_values_validated() {
        let file = FileConfig {
            bit_rate: Some(5),
            ..Default::default()
        };
        assert!(matches!(
            Settings::merge(&args(&[]), &file),
            Err(ConfigError::OutOfRange { name: "bit rate", .. })
        ));

        let mut file = FileConfig::default();
        file.display.orientation = 45;
        assert!(matches!(
            Settings::merge(&args(&[]), &file),
            Err(ConfigError::InvalidOrientation(45))
        ));

        let file = FileConfig {
            size: Some("wide".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Settings::merge(&args(&[]), &file),
            Err(ConfigError::InvalidSize(_))
        ));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(toml::from_str::<FileConfig>("bitrate = 5").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = FileConfig::load(Path::new("/nonexistent/screenrec.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}

//! screenrec - record a display into a fragmented MP4 file.
//!
//! The recording pipeline is built from a few pieces:
//!
//! - [`display`] describes the display and produces raw frames through a
//!   [`CaptureSource`].
//! - Encoder sessions from [`screenrec_codec`] turn frames and microphone
//!   samples into compressed buffers.
//! - [`coordinator::Pipeline`] polls the sessions, gates the [`Muxer`] until
//!   every track is known and corrects audio timestamps.
//! - [`mp4::Mp4Muxer`] writes the container.
//! - [`recorder::record_screen`] wires everything together for one run.
//!
//! # Quick Start
//!
//! ```ignore
//! use screenrec::{record_screen, DefaultBackends, RecordDeps, Settings, TestPatternDisplay};
//!
//! let settings = Settings::new("out.mp4");
//! let mut capture = TestPatternDisplay::new(settings.display);
//! let report = record_screen(&settings, RecordDeps {
//!     capture: &mut capture,
//!     backends: &DefaultBackends,
//!     scanner: &CommandScanner::new(vec![], false),
//!     cancel: CancellationToken::new(),
//!     clock: Arc::new(MonotonicClock),
//! })?;
//! ```
//!
//! # Feature Flags
//!
//! - `openh264` - H.264 video through OpenH264
//! - `audio` - Microphone capture through cpal

pub mod audio;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod display;
pub mod error;
pub mod mp4;
pub mod muxer;
pub mod notify;
pub mod recorder;
pub mod signal;

pub use audio::{AudioConfig, AudioSource, Microphone};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{Args, FileConfig, Settings, VideoSize};
pub use coordinator::{
    Pipeline, PipelineContext, PipelineReport, PipelineState, StopReason, TrackKind,
};
pub use display::{CaptureSource, DisplayInfo, Orientation, Projection, TestPatternDisplay};
pub use error::{
    AudioError, CaptureError, ConfigError, MuxerError, NotifyError, PipelineError, RecordError,
};
pub use mp4::Mp4Muxer;
pub use muxer::{Muxer, MuxerState, TrackIndex};
pub use notify::{CommandScanner, MediaScanner};
pub use recorder::{record_screen, DefaultBackends, MediaBackends, RecordDeps, RecordReport};

pub use screenrec_codec as codec;

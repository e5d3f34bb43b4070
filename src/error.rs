//! Error types for the recording pipeline.

use screenrec_codec::CodecError;
use thiserror::Error;

/// Errors reported by a container muxer.
#[derive(Debug, Error)]
pub enum MuxerError {
    /// Operation not allowed in the muxer's current state.
    #[error("{op} not allowed while muxer is {state}")]
    InvalidState { op: &'static str, state: &'static str },

    /// `start` called with no registered track.
    #[error("muxer has no tracks")]
    NoTracks,

    /// Track index that was never returned by `add_track`.
    #[error("unknown track index {0}")]
    UnknownTrack(usize),

    /// Track format the container cannot carry.
    #[error("unsupported track format: {0}")]
    UnsupportedFormat(String),

    /// Format is missing codec-specific data the sample entry needs.
    #[error("missing codec config: {0}")]
    MissingCodecConfig(String),

    /// Orientation hint other than 0, 90, 180 or 270.
    #[error("invalid orientation hint {0}")]
    InvalidOrientation(u32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An encoder session failed or was driven out of protocol.
    #[error("{session} encoder: {source}")]
    Codec {
        session: &'static str,
        #[source]
        source: CodecError,
    },

    #[error("muxer: {0}")]
    Muxer(#[from] MuxerError),

    /// A session produced media before reporting its output format.
    #[error("{0} sample arrived before its track was registered")]
    SampleBeforeTrack(&'static str),

    /// A session reported its output format twice.
    #[error("{0} encoder reported a second format change")]
    DuplicateFormat(&'static str),

    #[error("microphone: {0}")]
    Microphone(#[from] AudioError),

    #[error("pipeline already ran")]
    AlreadyRun,
}

impl PipelineError {
    pub(crate) fn codec(session: &'static str) -> impl FnOnce(CodecError) -> Self {
        move |source| Self::Codec { session, source }
    }
}

/// Errors from the audio capture source.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no input device available")]
    NoDevice,

    #[error("audio capture support not compiled in")]
    Unavailable,

    #[error("audio stream closed")]
    Closed,

    #[error("audio backend: {0}")]
    Backend(String),
}

/// Errors from the display capture source.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture source already attached")]
    AlreadyAttached,

    #[error("invalid display geometry {width}x{height}")]
    InvalidGeometry { width: u32, height: u32 },

    #[error("failed to start capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors from loading or validating recording settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid size '{0}', expected WIDTHxHEIGHT with both > 0")]
    InvalidSize(String),

    #[error("{name} {value} outside {min}..={max}")]
    OutOfRange {
        name: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("orientation must be 0, 90, 180 or 270, got {0}")]
    InvalidOrientation(u32),
}

/// Errors from the post-recording notifier.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
    },
}

/// Errors that end a recording before or during capture.
#[derive(Debug, Error)]
pub enum RecordError {
    /// Video encoder could not be configured, fallback included.
    #[error("unable to prepare video encoder at {width}x{height}: {source}")]
    VideoSetup {
        width: u32,
        height: u32,
        #[source]
        source: CodecError,
    },

    #[error("capture: {0}")]
    Capture(#[from] CaptureError),

    #[error("muxer: {0}")]
    Muxer(#[from] MuxerError),

    #[error("pipeline: {0}")]
    Pipeline(#[from] PipelineError),
}

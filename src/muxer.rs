//! Container muxer contract.

use screenrec_codec::{BufferFlags, MediaFormat};

use crate::error::MuxerError;

/// Index of a track inside one muxer, assigned by [`Muxer::add_track`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackIndex(pub usize);

/// Lifecycle of a muxer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxerState {
    Configured,
    Started,
    Stopped,
}

impl MuxerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configured => "configured",
            Self::Started => "started",
            Self::Stopped => "stopped",
        }
    }

    /// Fail with [`MuxerError::InvalidState`] unless `self == expected`.
    pub fn require(self, expected: MuxerState, op: &'static str) -> Result<(), MuxerError> {
        if self == expected {
            Ok(())
        } else {
            Err(MuxerError::InvalidState {
                op,
                state: self.as_str(),
            })
        }
    }
}

/// Writes compressed samples from one or more tracks into a container.
///
/// Sequencing: every `add_track` and `set_orientation_hint` happens before
/// `start`, every `write_sample_data` between `start` and `stop`. Calls out
/// of order return [`MuxerError::InvalidState`].
pub trait Muxer: Send {
    /// Register a track. `format` carries the codec-specific data.
    fn add_track(&mut self, format: &MediaFormat) -> Result<TrackIndex, MuxerError>;

    /// Display rotation in degrees (0, 90, 180 or 270).
    fn set_orientation_hint(&mut self, degrees: u32) -> Result<(), MuxerError>;

    fn start(&mut self) -> Result<(), MuxerError>;

    /// Write one compressed sample with its presentation time.
    fn write_sample_data(
        &mut self,
        track: TrackIndex,
        data: &[u8],
        pts_us: i64,
        flags: BufferFlags,
    ) -> Result<(), MuxerError>;

    /// Finalize the container.
    fn stop(&mut self) -> Result<(), MuxerError>;
}

/// Validate an orientation hint.
pub fn check_orientation(degrees: u32) -> Result<u32, MuxerError> {
    match degrees {
        0 | 90 | 180 | 270 => Ok(degrees),
        other => Err(MuxerError::InvalidOrientation(other)),
    }
}

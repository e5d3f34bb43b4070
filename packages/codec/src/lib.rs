//! Encoder sessions for the screenrec pipeline.
//!
//! An encoder session accepts raw input (frames through an [`InputSurface`],
//! or samples through indexed input buffers) and produces compressed output
//! in a pool of indexed buffers that the consumer leases and releases:
//!
//! - [`EncoderSession`] is the polling contract the pipeline coordinator
//!   drives: configure, start, dequeue with a timeout, release, stop.
//! - [`DequeueOutput`] is the tagged result of a poll.
//! - [`OutputBuffer`] is the RAII lease over one dequeued buffer.
//! - [`SoftwareSession`] implements the contract on a worker thread over any
//!   [`EncoderBackend`].
//!
//! # Quick Start
//!
//! ```ignore
//! use screenrec_codec::{AudioCodec, AudioFormat, EncoderSession, PcmBackend, SoftwareSession};
//!
//! let mut audio = SoftwareSession::<PcmBackend>::new("audio");
//! audio.configure(&AudioFormat::new(AudioCodec::Pcm16, 22050, 1).into())?;
//! audio.start()?;
//! ```
//!
//! # Feature Flags
//!
//! - `openh264` - Enable the OpenH264 software H.264 backend

mod error;
mod frame;
mod lease;
pub mod nal;
mod pcm;
pub mod software;
mod surface;
mod traits;
mod types;

pub use error::CodecError;
pub use frame::{expected_frame_size, VideoFrame};
pub use lease::OutputBuffer;
pub use pcm::PcmBackend;
pub use software::{SessionState, SoftwareSession};
pub use surface::InputSurface;
pub use traits::{DequeueOutput, EncodedPacket, EncoderBackend, EncoderSession, RawInput};
pub use types::{
    AudioCodec, AudioFormat, BufferFlags, BufferInfo, Codec, MediaFormat, PixelFormat,
    VideoFormat, MIME_AUDIO_AAC, MIME_AUDIO_RAW, MIME_VIDEO_AVC,
};

// OpenH264 backend
#[cfg(feature = "openh264")]
mod h264;

#[cfg(feature = "openh264")]
pub use h264::OpenH264Backend;

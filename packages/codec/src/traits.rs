//! Core traits for encoder sessions and encoder backends.

use std::time::Duration;

use crate::{BufferFlags, BufferInfo, CodecError, InputSurface, MediaFormat, VideoFrame};

/// Outcome of polling a session for compressed output.
///
/// Fatal conditions are reported through the `Err` side of
/// [`EncoderSession::dequeue_output_buffer`].
#[derive(Debug, Clone, PartialEq)]
pub enum DequeueOutput {
    /// A compressed buffer is leased to the caller until it is released.
    Buffer(BufferInfo),
    /// Nothing became available within the timeout.
    TryAgainLater,
    /// The output format is now known. Reported once per session, before
    /// any media buffer.
    FormatChanged(MediaFormat),
    /// The output buffer pool was reallocated; cached pool state is stale.
    BuffersChanged,
}

/// A stateful encoder instance driven by polling.
///
/// Lifecycle: `configure` → (`create_input_surface`) → `start` → polling →
/// `stop` → `release`. `stop` and `release` are idempotent and safe to call
/// from any state.
///
/// # Example
///
/// ```ignore
/// let mut session = SoftwareSession::<PcmBackend>::new("audio");
/// session.configure(&AudioFormat::new(AudioCodec::Pcm16, 22050, 1).into())?;
/// session.start()?;
///
/// if let DequeueOutput::Buffer(info) = session.dequeue_output_buffer(timeout)? {
///     let lease = OutputBuffer::new(&mut session, info);
///     consume(lease.data()?);
///     lease.release()?;
/// }
/// ```
pub trait EncoderSession: Send {
    /// Short name used in logs ("video", "audio").
    fn name(&self) -> &str;

    /// Configure the session for `format`.
    ///
    /// Fails with a configuration error when the encoder cannot handle the
    /// requested parameters. The caller should release the session and may
    /// retry with a fresh one.
    fn configure(&mut self, format: &MediaFormat) -> Result<(), CodecError>;

    /// Producer endpoint for raw video frames. Valid after `configure` and
    /// before `start`.
    fn create_input_surface(&mut self) -> Result<InputSurface, CodecError> {
        Err(CodecError::Unsupported(format!(
            "{} session has no input surface",
            self.name()
        )))
    }

    fn start(&mut self) -> Result<(), CodecError>;

    /// Acquire an input buffer index, waiting at most `timeout`.
    ///
    /// `Ok(None)` means no buffer became free in time.
    fn dequeue_input_buffer(&mut self, timeout: Duration) -> Result<Option<usize>, CodecError>;

    /// Writable view of a dequeued input buffer.
    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8], CodecError>;

    /// Submit `size` bytes at `offset` of a dequeued input buffer.
    fn queue_input_buffer(
        &mut self,
        index: usize,
        offset: usize,
        size: usize,
        pts_us: i64,
        flags: BufferFlags,
    ) -> Result<(), CodecError>;

    /// Poll for compressed output, waiting at most `timeout`.
    fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<DequeueOutput, CodecError>;

    /// Contents of a dequeued output buffer.
    fn output_buffer(&self, index: usize) -> Result<&[u8], CodecError>;

    /// Return a dequeued output buffer to the pool.
    ///
    /// Must be called exactly once per dequeued index. Releasing an index
    /// that is not dequeued is an error.
    fn release_output_buffer(&mut self, index: usize) -> Result<(), CodecError>;

    /// Size of the output buffer pool.
    fn output_buffers(&self) -> Result<usize, CodecError>;

    /// Current output format, available after `FormatChanged`.
    fn output_format(&self) -> Result<MediaFormat, CodecError>;

    fn stop(&mut self) -> Result<(), CodecError>;

    /// Free every resource held by the session.
    fn release(&mut self);
}

/// Raw input handed to an [`EncoderBackend`].
#[derive(Debug, Clone, Copy)]
pub enum RawInput<'a> {
    Frame(&'a VideoFrame),
    Samples { data: &'a [u8], pts_us: i64 },
}

/// Result of encoding one unit of input.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    /// Encoded bitstream data (e.g., H.264 Annex B NAL units).
    pub data: Vec<u8>,
    /// Presentation timestamp in microseconds.
    pub pts_us: i64,
    pub flags: BufferFlags,
}

impl EncodedPacket {
    #[must_use]
    pub fn new(data: Vec<u8>, pts_us: i64, flags: BufferFlags) -> Self {
        Self {
            data,
            pts_us,
            flags,
        }
    }
}

/// A synchronous encoder that a [`SoftwareSession`](crate::SoftwareSession)
/// runs on its worker thread.
pub trait EncoderBackend: Send + Sized + 'static {
    /// Validate `format` and build a backend for it.
    ///
    /// Unsupported parameters must be reported here, not on first encode.
    fn open(format: &MediaFormat) -> Result<Self, CodecError>;

    /// Encode one input unit. May return zero or more packets.
    fn encode(&mut self, input: RawInput<'_>) -> Result<Vec<EncodedPacket>, CodecError>;

    /// Output format including codec-specific data, once known.
    fn output_format(&self) -> Option<MediaFormat>;

    /// Drain anything the backend still buffers.
    fn flush(&mut self) -> Result<Vec<EncodedPacket>, CodecError> {
        Ok(Vec::new())
    }
}

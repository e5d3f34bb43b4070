//! Core types shared by encoder sessions and their consumers.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// MIME type of H.264/AVC video.
pub const MIME_VIDEO_AVC: &str = "video/avc";
/// MIME type of AAC audio.
pub const MIME_AUDIO_AAC: &str = "audio/mp4a-latm";
/// MIME type of 16-bit little-endian PCM audio.
pub const MIME_AUDIO_RAW: &str = "audio/raw";

/// Video codec type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Codec {
    /// H.264/AVC codec.
    #[default]
    H264,
}

impl Codec {
    /// MIME type used when describing this codec in a [`MediaFormat`].
    #[must_use]
    pub fn mime(&self) -> &'static str {
        match self {
            Self::H264 => MIME_VIDEO_AVC,
        }
    }
}

/// Audio codec type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AudioCodec {
    /// AAC-LC, carried with an AudioSpecificConfig in csd-0.
    Aac,
    /// Signed 16-bit little-endian PCM.
    #[default]
    Pcm16,
}

impl AudioCodec {
    #[must_use]
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Aac => MIME_AUDIO_AAC,
            Self::Pcm16 => MIME_AUDIO_RAW,
        }
    }
}

/// Pixel format for raw video frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// RGB with 8 bits per channel (24 bits per pixel).
    #[default]
    Rgb,
    /// RGBA with 8 bits per channel (32 bits per pixel).
    Rgba,
}

impl PixelFormat {
    /// Returns the number of bytes per pixel.
    #[must_use]
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Rgb => 3,
            Self::Rgba => 4,
        }
    }
}

/// Video stream description used to configure an encoder and to register a
/// track.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFormat {
    pub codec: Codec,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Target bitrate in bits per second.
    pub bit_rate: u32,
    /// Nominal frame rate of the source.
    pub frame_rate: f32,
    /// Seconds between sync frames.
    pub i_frame_interval_secs: u32,
    /// Pixel format the input surface accepts.
    pub pixel_format: PixelFormat,
    /// Codec-specific data. For H.264: csd-0 = SPS, csd-1 = PPS, without
    /// start codes.
    pub csd: Vec<Vec<u8>>,
}

impl VideoFormat {
    /// Create a new video format with the given dimensions.
    #[must_use]
    pub fn new(codec: Codec, width: u32, height: u32) -> Self {
        Self {
            codec,
            width,
            height,
            bit_rate: 4_000_000,
            frame_rate: 30.0,
            i_frame_interval_secs: 10,
            pixel_format: PixelFormat::Rgb,
            csd: Vec::new(),
        }
    }

    /// Set the target bitrate in bits per second.
    #[must_use]
    pub fn bit_rate(mut self, bit_rate: u32) -> Self {
        self.bit_rate = bit_rate;
        self
    }

    /// Set the frame rate.
    #[must_use]
    pub fn frame_rate(mut self, frame_rate: f32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    /// Set the sync frame interval.
    #[must_use]
    pub fn i_frame_interval(mut self, secs: u32) -> Self {
        self.i_frame_interval_secs = secs;
        self
    }

    /// Attach codec-specific data.
    #[must_use]
    pub fn with_csd(mut self, csd: Vec<Vec<u8>>) -> Self {
        self.csd = csd;
        self
    }
}

/// Audio stream description.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFormat {
    pub codec: AudioCodec,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channel_count: u16,
    /// Target bitrate in bits per second.
    pub bit_rate: u32,
    /// Codec-specific data. For AAC: csd-0 = AudioSpecificConfig.
    pub csd: Vec<Vec<u8>>,
}

impl AudioFormat {
    #[must_use]
    pub fn new(codec: AudioCodec, sample_rate: u32, channel_count: u16) -> Self {
        Self {
            codec,
            sample_rate,
            channel_count,
            bit_rate: 128_000,
            csd: Vec::new(),
        }
    }

    #[must_use]
    pub fn bit_rate(mut self, bit_rate: u32) -> Self {
        self.bit_rate = bit_rate;
        self
    }

    #[must_use]
    pub fn with_csd(mut self, csd: Vec<Vec<u8>>) -> Self {
        self.csd = csd;
        self
    }
}

/// Format descriptor exchanged between encoder sessions and the muxer.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaFormat {
    Video(VideoFormat),
    Audio(AudioFormat),
}

impl MediaFormat {
    /// MIME type of the described stream.
    #[must_use]
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Video(v) => v.codec.mime(),
            Self::Audio(a) => a.codec.mime(),
        }
    }

    /// Codec-specific data buffers (csd-0, csd-1, ...).
    #[must_use]
    pub fn csd(&self) -> &[Vec<u8>] {
        match self {
            Self::Video(v) => &v.csd,
            Self::Audio(a) => &a.csd,
        }
    }

    #[must_use]
    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video(_))
    }
}

impl From<VideoFormat> for MediaFormat {
    fn from(format: VideoFormat) -> Self {
        Self::Video(format)
    }
}

impl From<AudioFormat> for MediaFormat {
    fn from(format: AudioFormat) -> Self {
        Self::Audio(format)
    }
}

/// Flag set attached to every compressed sample.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferFlags(u32);

impl BufferFlags {
    /// The sample can be decoded without reference to earlier samples.
    pub const SYNC_FRAME: Self = Self(0x1);
    /// The buffer holds codec configuration data instead of media data.
    pub const CODEC_CONFIG: Self = Self(0x2);
    /// Last buffer the session will produce.
    pub const END_OF_STREAM: Self = Self(0x4);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for BufferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for BufferFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::SYNC_FRAME) {
            names.push("SYNC_FRAME");
        }
        if self.contains(Self::CODEC_CONFIG) {
            names.push("CODEC_CONFIG");
        }
        if self.contains(Self::END_OF_STREAM) {
            names.push("END_OF_STREAM");
        }
        write!(f, "BufferFlags({})", names.join(" | "))
    }
}

/// Metadata of one dequeued output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// Index into the session's output buffer pool.
    pub index: usize,
    /// Start of the payload inside the buffer.
    pub offset: usize,
    /// Payload length in bytes.
    pub size: usize,
    /// Presentation timestamp in microseconds. 0 when the producer did not
    /// supply one.
    pub pts_us: i64,
    pub flags: BufferFlags,
}

impl BufferInfo {
    #[must_use]
    pub fn is_sync_frame(&self) -> bool {
        self.flags.contains(BufferFlags::SYNC_FRAME)
    }

    #[must_use]
    pub fn is_codec_config(&self) -> bool {
        self.flags.contains(BufferFlags::CODEC_CONFIG)
    }

    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(BufferFlags::END_OF_STREAM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_flags() {
        let flags = BufferFlags::SYNC_FRAME | BufferFlags::END_OF_STREAM;
        assert!(flags.contains(BufferFlags::SYNC_FRAME));
        assert!(flags.contains(BufferFlags::END_OF_STREAM));
        assert!(!flags.contains(BufferFlags::CODEC_CONFIG));
        assert!(BufferFlags::empty().is_empty());
        assert_eq!(format!("{:?}", flags), "BufferFlags(SYNC_FRAME | END_OF_STREAM)");
    }

    #[test]
    fn test_media_format_mime() {
        let video: MediaFormat = VideoFormat::new(Codec::H264, 1280, 720).into();
        assert_eq!(video.mime(), "video/avc");
        assert!(video.is_video());

        let audio: MediaFormat = AudioFormat::new(AudioCodec::Aac, 22050, 1).into();
        assert_eq!(audio.mime(), "audio/mp4a-latm");
        assert!(audio.csd().is_empty());
    }
}

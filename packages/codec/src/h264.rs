//! Software H.264 backend using OpenH264.

use openh264::encoder::{BitRate, Encoder, EncoderConfig, FrameRate};
use openh264::formats::{RgbSliceU8, YUVBuffer};
use openh264::OpenH264API;
use tracing::debug;

use crate::nal::{parse_annex_b, NalUnit};
use crate::{
    BufferFlags, Codec, CodecError, EncodedPacket, EncoderBackend, MediaFormat, RawInput,
    VideoFormat,
};

/// Largest frame dimension accepted.
pub const MAX_DIMENSION: u32 = 4096;

/// H.264 encoder producing Annex B access units.
pub struct OpenH264Backend {
    encoder: Encoder,
    format: VideoFormat,
    /// SPS and PPS of the stream, once seen.
    csd: Option<(Vec<u8>, Vec<u8>)>,
}

impl EncoderBackend for OpenH264Backend {
    fn open(format: &MediaFormat) -> Result<Self, CodecError> {
        let MediaFormat::Video(video) = format else {
            return Err(CodecError::unsupported_format(format!(
                "{} is not a video format",
                format.mime()
            )));
        };
        if video.codec != Codec::H264 {
            return Err(CodecError::unsupported_format(video.codec.mime()));
        }
        let (width, height) = (video.width, video.height);
        if width == 0
            || height == 0
            || width > MAX_DIMENSION
            || height > MAX_DIMENSION
            || width % 2 != 0
            || height % 2 != 0
        {
            return Err(CodecError::InvalidDimensions { width, height });
        }
        if video.bit_rate == 0 || !(video.frame_rate > 0.0) {
            return Err(CodecError::invalid_param(format!(
                "bit rate {} / frame rate {}",
                video.bit_rate, video.frame_rate
            )));
        }

        let config = EncoderConfig::new()
            .bitrate(BitRate::from_bps(video.bit_rate))
            .max_frame_rate(FrameRate::from_hz(video.frame_rate));
        let encoder = Encoder::with_api_config(OpenH264API::from_source(), config)
            .map_err(|e| CodecError::backend(format!("OpenH264 init failed: {}", e)))?;

        debug!(
            "OpenH264 encoder {}x{} @ {} bps",
            width, height, video.bit_rate
        );
        Ok(Self {
            encoder,
            format: video.clone(),
            csd: None,
        })
    }

    fn encode(&mut self, input: RawInput<'_>) -> Result<Vec<EncodedPacket>, CodecError> {
        let RawInput::Frame(frame) = input else {
            return Err(CodecError::invalid_operation("H.264 backend takes frames"));
        };
        if frame.width != self.format.width || frame.height != self.format.height {
            return Err(CodecError::InvalidDimensions {
                width: frame.width,
                height: frame.height,
            });
        }
        let rgb = frame.to_rgb()?;
        let source = RgbSliceU8::new(&rgb.data, (rgb.width as usize, rgb.height as usize));
        let yuv = YUVBuffer::from_rgb_source(source);

        let bitstream = self
            .encoder
            .encode(&yuv)
            .map_err(|e| CodecError::backend(format!("OpenH264 encode failed: {}", e)))?;
        let data = bitstream.to_vec();
        if data.is_empty() {
            // Rate control skipped this frame.
            return Ok(Vec::new());
        }

        let parsed = parse_annex_b(&data);
        let mut packets = Vec::with_capacity(2);
        if self.csd.is_none() {
            if let (Some(sps), Some(pps)) = (parsed.sps, parsed.pps) {
                let mut config = to_annex_b(&sps);
                config.extend_from_slice(&to_annex_b(&pps));
                packets.push(EncodedPacket::new(
                    config,
                    frame.pts_us,
                    BufferFlags::CODEC_CONFIG,
                ));
                self.csd = Some((sps, pps));
            }
        }

        let flags = if parsed.is_keyframe {
            BufferFlags::SYNC_FRAME
        } else {
            BufferFlags::empty()
        };
        packets.push(EncodedPacket::new(data, frame.pts_us, flags));
        Ok(packets)
    }

    fn output_format(&self) -> Option<MediaFormat> {
        let (sps, pps) = self.csd.as_ref()?;
        Some(MediaFormat::Video(
            self.format.clone().with_csd(vec![sps.clone(), pps.clone()]),
        ))
    }
}

fn to_annex_b(nal: &[u8]) -> Vec<u8> {
    NalUnit {
        data: nal.to_vec(),
        nal_type: nal.first().map_or(0, |b| b & 0x1F),
    }
    .to_annex_b()
}

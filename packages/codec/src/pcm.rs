//! Uncompressed 16-bit PCM audio backend.

use crate::{
    AudioCodec, AudioFormat, BufferFlags, CodecError, EncodedPacket, EncoderBackend, MediaFormat,
    RawInput,
};

/// Accepted sample rates, inclusive.
pub const PCM_SAMPLE_RATES: std::ops::RangeInclusive<u32> = 8_000..=48_000;

/// Passes interleaved s16le samples through unchanged.
#[derive(Debug)]
pub struct PcmBackend {
    format: AudioFormat,
}

impl EncoderBackend for PcmBackend {
    fn open(format: &MediaFormat) -> Result<Self, CodecError> {
        let MediaFormat::Audio(audio) = format else {
            return Err(CodecError::unsupported_format(format!(
                "{} is not an audio format",
                format.mime()
            )));
        };
        if audio.codec != AudioCodec::Pcm16 {
            return Err(CodecError::unsupported_format(format!(
                "PCM backend cannot produce {}",
                audio.codec.mime()
            )));
        }
        if !PCM_SAMPLE_RATES.contains(&audio.sample_rate) {
            return Err(CodecError::invalid_param(format!(
                "sample rate {} Hz outside {:?}",
                audio.sample_rate, PCM_SAMPLE_RATES
            )));
        }
        if !(1..=2).contains(&audio.channel_count) {
            return Err(CodecError::invalid_param(format!(
                "{} channels not supported",
                audio.channel_count
            )));
        }
        Ok(Self {
            format: audio.clone(),
        })
    }

    fn encode(&mut self, input: RawInput<'_>) -> Result<Vec<EncodedPacket>, CodecError> {
        let RawInput::Samples { data, pts_us } = input else {
            return Err(CodecError::invalid_operation("PCM backend takes sample buffers"));
        };
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let frame_bytes = 2 * usize::from(self.format.channel_count);
        if data.len() % frame_bytes != 0 {
            return Err(CodecError::invalid_param(format!(
                "{} bytes is not a whole number of {}-byte frames",
                data.len(),
                frame_bytes
            )));
        }
        Ok(vec![EncodedPacket::new(
            data.to_vec(),
            pts_us,
            BufferFlags::SYNC_FRAME,
        )])
    }

    fn output_format(&self) -> Option<MediaFormat> {
        Some(MediaFormat::Audio(self.format.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(sample_rate: u32, channels: u16) -> Result<PcmBackend, CodecError> {
        PcmBackend::open(&AudioFormat::new(AudioCodec::Pcm16, sample_rate, channels).into())
    }

    #[test]
    fn test_open_validates_format() {
        assert!(open(22050, 1).is_ok());
        assert!(open(96_000, 1).unwrap_err().is_configuration());
        assert!(open(22050, 6).unwrap_err().is_configuration());
        assert!(PcmBackend::open(&AudioFormat::new(AudioCodec::Aac, 22050, 1).into()).is_err());
    }

    #[test]
    fn test_encode_passes_samples_through() {
        let mut backend = open(22050, 1).unwrap();
        let packets = backend
            .encode(RawInput::Samples {
                data: &[1, 0, 2, 0],
                pts_us: 77,
            })
            .unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].data, vec![1, 0, 2, 0]);
        assert_eq!(packets[0].pts_us, 77);

        let empty = backend
            .encode(RawInput::Samples { data: &[], pts_us: 0 })
            .unwrap();
        assert!(empty.is_empty());
        assert!(backend
            .encode(RawInput::Samples { data: &[1, 2, 3], pts_us: 0 })
            .is_err());
    }
}

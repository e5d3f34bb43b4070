//! Microphone capture.
//!
//! The recorder feeds the audio encoder from an [`AudioSource`]: a bounded
//! blocking read of interleaved signed 16-bit little-endian samples. The
//! cpal-backed [`Microphone`] is compiled in with the `audio` feature.

use std::time::Duration;

use crate::error::AudioError;

/// Capture sample rate in Hz.
pub const AUDIO_SAMPLE_RATE: u32 = 22050;
/// Capture channel count.
pub const AUDIO_CHANNELS: u16 = 1;
/// Target encoder bit rate for the audio track.
pub const AUDIO_BIT_RATE: u32 = 128_000;
/// Bytes read from the microphone per pipeline iteration.
pub const AUDIO_FRAME_BYTES: usize = 2048;
/// Longest a single [`AudioSource::read`] may block.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Capture configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: AUDIO_SAMPLE_RATE,
            channels: AUDIO_CHANNELS,
        }
    }
}

impl AudioConfig {
    /// Bytes per interleaved sample frame.
    pub fn frame_bytes(&self) -> usize {
        2 * usize::from(self.channels.max(1))
    }
}

/// Source of raw PCM audio for the audio encoder.
pub trait AudioSource {
    fn config(&self) -> AudioConfig;

    /// Fill `buf` with s16le samples, blocking at most [`READ_TIMEOUT`].
    ///
    /// Returns the number of bytes written, always a whole number of sample
    /// frames. Zero means nothing arrived in time.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, AudioError>;

    /// Stop capturing. Further reads return [`AudioError::Closed`].
    fn stop(&mut self);
}

#[cfg(feature = "audio")]
mod microphone {
    use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
    use std::time::Instant;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use tracing::{error, info};

    use super::{AudioConfig, AudioSource, READ_TIMEOUT};
    use crate::error::AudioError;

    /// Default input device captured through cpal.
    ///
    /// The cpal callback forwards each chunk over a channel; `read()` drains
    /// it. The stream is not `Send`, so a microphone lives on the thread
    /// that opened it.
    pub struct Microphone {
        rx: Receiver<Vec<u8>>,
        stream: Option<cpal::Stream>,
        pending: Vec<u8>,
        config: AudioConfig,
    }

    impl Microphone {
        /// Open the default input device.
        pub fn open(config: AudioConfig) -> Result<Self, AudioError> {
            let host = cpal::default_host();
            let device = host.default_input_device().ok_or(AudioError::NoDevice)?;
            info!(
                "microphone: {} at {} Hz, {} ch",
                device.name().unwrap_or_else(|_| "default input".to_string()),
                config.sample_rate,
                config.channels
            );

            let (tx, rx) = mpsc::channel::<Vec<u8>>();
            let stream_config = cpal::StreamConfig {
                channels: config.channels,
                sample_rate: cpal::SampleRate(config.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            let stream = device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let bytes: Vec<u8> = data.iter().flat_map(|s| s.to_le_bytes()).collect();
                        let _ = tx.send(bytes);
                    },
                    |err| error!("microphone: stream error: {}", err),
                    None,
                )
                .map_err(|e| AudioError::Backend(e.to_string()))?;
            stream
                .play()
                .map_err(|e| AudioError::Backend(e.to_string()))?;

            Ok(Self {
                rx,
                stream: Some(stream),
                pending: Vec::new(),
                config,
            })
        }
    }

    impl AudioSource for Microphone {
        fn config(&self) -> AudioConfig {
            self.config
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize, AudioError> {
            if self.stream.is_none() {
                return Err(AudioError::Closed);
            }
            let frame = self.config.frame_bytes();
            let want = buf.len() - buf.len() % frame;
            let deadline = Instant::now() + READ_TIMEOUT;
            while self.pending.len() < want {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match self.rx.recv_timeout(remaining) {
                    Ok(chunk) => self.pending.extend_from_slice(&chunk),
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => return Err(AudioError::Closed),
                }
            }
            let n = want.min(self.pending.len() - self.pending.len() % frame);
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }

        fn stop(&mut self) {
            if let Some(stream) = self.stream.take() {
                if let Err(e) = stream.pause() {
                    error!("microphone: pause failed: {}", e);
                }
            }
            self.pending.clear();
        }
    }
}

#[cfg(feature = "audio")]
pub use microphone::Microphone;

/// Placeholder used when audio capture is not compiled in. Opening it
/// always fails, so recordings fall back to video only.
#[cfg(not(feature = "audio"))]
pub struct Microphone {
    config: AudioConfig,
}

#[cfg(not(feature = "audio"))]
impl Microphone {
    pub fn open(_config: AudioConfig) -> Result<Self, AudioError> {
        Err(AudioError::Unavailable)
    }
}

#[cfg(not(feature = "audio"))]
impl AudioSource for Microphone {
    fn config(&self) -> AudioConfig {
        self.config
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, AudioError> {
        Err(AudioError::Closed)
    }

    fn stop(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AudioConfig::default();
        assert_eq!(config.sample_rate, 22050);
        assert_eq!(config.channels, 1);
        assert_eq!(config.frame_bytes(), 2);
        assert_eq!(AUDIO_FRAME_BYTES % config.frame_bytes(), 0);
    }

    #[cfg(not(feature = "audio"))]
    #[test]
    fn test_open_without_backend_fails() {
        assert!(matches!(
            Microphone::open(AudioConfig::default()),
            Err(AudioError::Unavailable)
        ));
    }
}

//! Scoped ownership of a dequeued output buffer.

use tracing::warn;

use crate::{BufferInfo, CodecError, EncoderSession};

/// Lease on one dequeued output buffer.
///
/// The buffer index belongs to the holder until [`release`](Self::release)
/// is called. A lease dropped without an explicit release (early return,
/// `?`, panic unwinding) releases the index in its destructor, so every
/// dequeued index goes back to the pool exactly once.
pub struct OutputBuffer<'a, S: EncoderSession + ?Sized> {
    session: &'a mut S,
    info: BufferInfo,
    released: bool,
}

impl<'a, S: EncoderSession + ?Sized> OutputBuffer<'a, S> {
    /// Take ownership of `info.index`, which must have just been dequeued
    /// from `session`.
    pub fn new(session: &'a mut S, info: BufferInfo) -> Self {
        Self {
            session,
            info,
            released: false,
        }
    }

    pub fn info(&self) -> &BufferInfo {
        &self.info
    }

    /// Payload bytes `[offset, offset + size)` of the buffer.
    pub fn data(&self) -> Result<&[u8], CodecError> {
        let buf = self.session.output_buffer(self.info.index)?;
        let end = self
            .info
            .offset
            .checked_add(self.info.size)
            .filter(|&end| end <= buf.len())
            .ok_or_else(|| {
                CodecError::invalid_operation(format!(
                    "{} buffer {}: range {}+{} exceeds capacity {}",
                    self.session.name(),
                    self.info.index,
                    self.info.offset,
                    self.info.size,
                    buf.len()
                ))
            })?;
        Ok(&buf[self.info.offset..end])
    }

    /// Return the buffer to the session.
    pub fn release(mut self) -> Result<(), CodecError> {
        self.released = true;
        self.session.release_output_buffer(self.info.index)
    }
}

impl<S: EncoderSession + ?Sized> Drop for OutputBuffer<'_, S> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.session.release_output_buffer(self.info.index) {
            warn!(
                "{}: releasing output buffer {} on unwind failed: {}",
                self.session.name(),
                self.info.index,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AudioCodec, AudioFormat, BufferFlags, DequeueOutput, PcmBackend, SoftwareSession,
    };
    use std::time::Duration;

    fn next_buffer(session: &mut SoftwareSession<PcmBackend>) -> BufferInfo {
        loop {
            match session.dequeue_output_buffer(Duration::from_secs(2)).unwrap() {
                DequeueOutput::Buffer(info) => return info,
                DequeueOutput::FormatChanged(_) | DequeueOutput::TryAgainLater => continue,
                DequeueOutput::BuffersChanged => panic!("unexpected pool change"),
            }
        }
    }

    fn session_with_samples(count: usize) -> SoftwareSession<PcmBackend> {
        let mut session = SoftwareSession::<PcmBackend>::new("audio");
        session
            .configure(&AudioFormat::new(AudioCodec::Pcm16, 22050, 1).into())
            .unwrap();
        session.start().unwrap();
        for i in 0..count {
            let index = session
                .dequeue_input_buffer(Duration::from_secs(2))
                .unwrap()
                .unwrap();
            session.input_buffer(index).unwrap()[..4].copy_from_slice(&[i as u8, 0, 1, 0]);
            session
                .queue_input_buffer(index, 0, 4, i as i64, BufferFlags::empty())
                .unwrap();
        }
        session
    }

    #[test]
    fn test_explicit_release() {
        let mut session = session_with_samples(1);
        let info = next_buffer(&mut session);
        let lease = OutputBuffer::new(&mut session, info);
        assert_eq!(lease.data().unwrap(), &[0, 0, 1, 0]);
        lease.release().unwrap();
        assert!(session.release_output_buffer(info.index).is_err());
    }

    #[test]
    fn test_drop_releases_once() {
        let mut session = session_with_samples(1);
        let info = next_buffer(&mut session);
        {
            let _lease = OutputBuffer::new(&mut session, info);
        }
        assert!(matches!(
            session.release_output_buffer(info.index),
            Err(CodecError::InvalidBufferIndex(_))
        ));
    }

    #[test]
    fn test_data_rejects_out_of_range() {
        let mut session = session_with_samples(1);
        let mut info = next_buffer(&mut session);
        info.size = 64;
        let lease = OutputBuffer::new(&mut session, info);
        assert!(matches!(lease.data(), Err(CodecError::InvalidOperation(_))));
    }
}

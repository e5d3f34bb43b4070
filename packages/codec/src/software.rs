//! Threaded encoder session over a synchronous [`EncoderBackend`].
//!
//! The backend runs on a dedicated worker thread. Video input arrives through
//! an [`InputSurface`]; audio input through indexed input buffers. Encoded
//! packets are parked in a fixed pool of output slots that the caller leases
//! by index and hands back with `release_output_buffer`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::{
    BufferFlags, BufferInfo, CodecError, DequeueOutput, EncodedPacket, EncoderBackend,
    EncoderSession, InputSurface, MediaFormat, RawInput, VideoFrame,
};

/// Number of output slots in the pool.
pub const OUTPUT_SLOTS: usize = 8;
/// Number of input buffers handed out to buffer-fed sessions.
pub const INPUT_SLOTS: usize = 4;
/// Capacity of each input buffer in bytes.
pub const INPUT_BUFFER_SIZE: usize = 8192;

const SURFACE_DEPTH: usize = 4;
const WORKER_POLL: Duration = Duration::from_millis(10);

/// Lifecycle of a [`SoftwareSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Configured,
    Running,
    Stopped,
    Released,
}

enum WorkerEvent {
    Format(MediaFormat),
    Packet(EncodedPacket),
    Failed(CodecError),
}

struct QueuedInput {
    index: usize,
    data: Vec<u8>,
    offset: usize,
    size: usize,
    pts_us: i64,
    flags: BufferFlags,
}

enum InputSlot {
    Free(Vec<u8>),
    Leased(Vec<u8>),
    Queued,
}

enum WorkerSource {
    Surface(Receiver<VideoFrame>),
    Buffers {
        queued: Receiver<QueuedInput>,
        returned: Sender<(usize, Vec<u8>)>,
    },
}

enum Next {
    Idle,
    Closed,
    Frame(VideoFrame),
    Samples(QueuedInput),
}

impl WorkerSource {
    fn next(&self, timeout: Duration) -> Next {
        let closed = |e: RecvTimeoutError| match e {
            RecvTimeoutError::Timeout => Next::Idle,
            RecvTimeoutError::Disconnected => Next::Closed,
        };
        match self {
            Self::Surface(rx) => rx.recv_timeout(timeout).map_or_else(closed, Next::Frame),
            Self::Buffers { queued, .. } => {
                queued.recv_timeout(timeout).map_or_else(closed, Next::Samples)
            }
        }
    }

    fn give_back(&self, index: usize, data: Vec<u8>) {
        if let Self::Buffers { returned, .. } = self {
            let _ = returned.send((index, data));
        }
    }
}

/// Forwards backend output to the session, format first.
struct Emitter {
    events: Sender<WorkerEvent>,
    format_sent: bool,
    last_pts_us: i64,
}

impl Emitter {
    /// Returns `false` once the session side is gone.
    fn emit<B: EncoderBackend>(&mut self, backend: &B, packets: Vec<EncodedPacket>) -> bool {
        if !self.format_sent {
            if let Some(format) = backend.output_format() {
                if self.events.send(WorkerEvent::Format(format)).is_err() {
                    return false;
                }
                self.format_sent = true;
            }
        }
        for packet in packets {
            self.last_pts_us = self.last_pts_us.max(packet.pts_us);
            if self.events.send(WorkerEvent::Packet(packet)).is_err() {
                return false;
            }
        }
        true
    }

    fn finish(&self) {
        let eos = EncodedPacket::new(Vec::new(), self.last_pts_us, BufferFlags::END_OF_STREAM);
        let _ = self.events.send(WorkerEvent::Packet(eos));
    }

    fn fail(&self, err: CodecError) {
        let _ = self.events.send(WorkerEvent::Failed(err));
    }
}

fn run_worker<B: EncoderBackend>(
    mut backend: B,
    source: WorkerSource,
    stop: Arc<AtomicBool>,
    events: Sender<WorkerEvent>,
) {
    let mut emitter = Emitter {
        events,
        format_sent: false,
        last_pts_us: 0,
    };

    let outcome = loop {
        if stop.load(Ordering::Acquire) {
            break Ok(());
        }
        let (result, end_of_input) = match source.next(WORKER_POLL) {
            Next::Idle => continue,
            Next::Closed => break Ok(()),
            Next::Frame(frame) => (backend.encode(RawInput::Frame(&frame)), false),
            Next::Samples(input) => {
                let eos = input.flags.contains(BufferFlags::END_OF_STREAM);
                let result = backend.encode(RawInput::Samples {
                    data: &input.data[input.offset..input.offset + input.size],
                    pts_us: input.pts_us,
                });
                source.give_back(input.index, input.data);
                (result, eos)
            }
        };
        match result {
            Ok(packets) => {
                if !emitter.emit(&backend, packets) {
                    return;
                }
            }
            Err(e) => break Err(e),
        }
        if end_of_input {
            break Ok(());
        }
    };

    match outcome.and_then(|()| backend.flush()) {
        Ok(rest) => {
            if emitter.emit(&backend, rest) {
                emitter.finish();
            }
        }
        Err(e) => {
            warn!("encoder worker failed: {}", e);
            emitter.fail(e);
        }
    }
}

/// Encoder session running `B` on a worker thread.
pub struct SoftwareSession<B: EncoderBackend> {
    name: String,
    state: SessionState,
    is_video: bool,
    backend: Option<B>,
    surface_rx: Option<Receiver<VideoFrame>>,
    input_slots: Vec<InputSlot>,
    queue_tx: Option<Sender<QueuedInput>>,
    returned_rx: Option<Receiver<(usize, Vec<u8>)>>,
    events: Option<Receiver<WorkerEvent>>,
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    slots: Vec<Option<Vec<u8>>>,
    pending: Option<EncodedPacket>,
    output_format: Option<MediaFormat>,
}

impl<B: EncoderBackend> SoftwareSession<B> {
    /// Create an unconfigured session.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: SessionState::Uninitialized,
            is_video: false,
            backend: None,
            surface_rx: None,
            input_slots: Vec::new(),
            queue_tx: None,
            returned_rx: None,
            events: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: None,
            slots: Vec::new(),
            pending: None,
            output_format: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn expect_state(&self, expected: SessionState, op: &str) -> Result<(), CodecError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(CodecError::invalid_operation(format!(
                "{}: {} in state {:?}",
                self.name, op, self.state
            )))
        }
    }
}

impl<B: EncoderBackend> EncoderSession for SoftwareSession<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self, format: &MediaFormat) -> Result<(), CodecError> {
        self.expect_state(SessionState::Uninitialized, "configure")?;
        let backend = B::open(format)?;
        self.backend = Some(backend);
        self.is_video = format.is_video();
        self.state = SessionState::Configured;
        debug!("{}: configured for {}", self.name, format.mime());
        Ok(())
    }

    fn create_input_surface(&mut self) -> Result<InputSurface, CodecError> {
        self.expect_state(SessionState::Configured, "create_input_surface")?;
        if !self.is_video {
            return Err(CodecError::Unsupported(format!(
                "{} session takes input through buffers",
                self.name
            )));
        }
        if self.surface_rx.is_some() {
            return Err(CodecError::invalid_operation(format!(
                "{}: input surface already created",
                self.name
            )));
        }
        let (surface, rx) = InputSurface::channel(SURFACE_DEPTH);
        self.surface_rx = Some(rx);
        Ok(surface)
    }

    fn start(&mut self) -> Result<(), CodecError> {
        self.expect_state(SessionState::Configured, "start")?;
        if self.is_video && self.surface_rx.is_none() {
            return Err(CodecError::invalid_operation(format!(
                "{}: start before create_input_surface",
                self.name
            )));
        }
        let backend = self.backend.take().ok_or_else(|| {
            CodecError::invalid_operation(format!("{}: encoder already consumed", self.name))
        })?;

        let source = match self.surface_rx.take() {
            Some(rx) => WorkerSource::Surface(rx),
            None => {
                let (queue_tx, queued) = mpsc::channel();
                let (returned, returned_rx) = mpsc::channel();
                self.queue_tx = Some(queue_tx);
                self.returned_rx = Some(returned_rx);
                self.input_slots = (0..INPUT_SLOTS)
                    .map(|_| InputSlot::Free(vec![0; INPUT_BUFFER_SIZE]))
                    .collect();
                WorkerSource::Buffers { queued, returned }
            }
        };

        let (event_tx, event_rx) = mpsc::channel();
        self.stop_flag.store(false, Ordering::Release);
        let stop = Arc::clone(&self.stop_flag);
        let handle = thread::Builder::new()
            .name(format!("{}-encoder", self.name))
            .spawn(move || run_worker(backend, source, stop, event_tx))
            .map_err(|e| CodecError::backend(format!("failed to spawn encoder worker: {}", e)))?;

        self.worker = Some(handle);
        self.events = Some(event_rx);
        self.slots = vec![None; OUTPUT_SLOTS];
        self.state = SessionState::Running;
        debug!("{}: started", self.name);
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, timeout: Duration) -> Result<Option<usize>, CodecError> {
        self.expect_state(SessionState::Running, "dequeue_input_buffer")?;
        let returned = self.returned_rx.as_ref().ok_or_else(|| {
            CodecError::Unsupported(format!(
                "{} session takes input through its surface",
                self.name
            ))
        })?;

        loop {
            match returned.try_recv() {
                Ok((index, data)) => self.input_slots[index] = InputSlot::Free(data),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        for (index, slot) in self.input_slots.iter_mut().enumerate() {
            if let InputSlot::Free(buf) = slot {
                *slot = InputSlot::Leased(std::mem::take(buf));
                return Ok(Some(index));
            }
        }

        match returned.recv_timeout(timeout) {
            Ok((index, data)) => {
                self.input_slots[index] = InputSlot::Leased(data);
                Ok(Some(index))
            }
            // A worker that went away reports why on the output side.
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8], CodecError> {
        match self.input_slots.get_mut(index) {
            Some(InputSlot::Leased(buf)) => Ok(buf.as_mut_slice()),
            _ => Err(CodecError::InvalidBufferIndex(index)),
        }
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        offset: usize,
        size: usize,
        pts_us: i64,
        flags: BufferFlags,
    ) -> Result<(), CodecError> {
        self.expect_state(SessionState::Running, "queue_input_buffer")?;
        let capacity = match self.input_slots.get(index) {
            Some(InputSlot::Leased(buf)) => buf.len(),
            _ => return Err(CodecError::InvalidBufferIndex(index)),
        };
        if offset.checked_add(size).map_or(true, |end| end > capacity) {
            return Err(CodecError::invalid_param(format!(
                "{}: input range {}+{} exceeds capacity {}",
                self.name, offset, size, capacity
            )));
        }

        let InputSlot::Leased(data) = std::mem::replace(&mut self.input_slots[index], InputSlot::Queued)
        else {
            return Err(CodecError::InvalidBufferIndex(index));
        };
        let input = QueuedInput {
            index,
            data,
            offset,
            size,
            pts_us,
            flags,
        };
        let sent = match &self.queue_tx {
            Some(tx) => tx.send(input).map_err(|e| e.0),
            None => Err(input),
        };
        if let Err(input) = sent {
            // The worker is gone; it reports why on the output side.
            debug!("{}: dropping input buffer {}, worker gone", self.name, index);
            self.input_slots[index] = InputSlot::Free(input.data);
        }
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<DequeueOutput, CodecError> {
        self.expect_state(SessionState::Running, "dequeue_output_buffer")?;

        if self.pending.is_none() {
            let events = self
                .events
                .as_ref()
                .ok_or(CodecError::WorkerGone)?;
            match events.recv_timeout(timeout) {
                Ok(WorkerEvent::Format(format)) => {
                    debug!("{}: output format {}", self.name, format.mime());
                    self.output_format = Some(format.clone());
                    return Ok(DequeueOutput::FormatChanged(format));
                }
                Ok(WorkerEvent::Packet(packet)) => self.pending = Some(packet),
                Ok(WorkerEvent::Failed(e)) => return Err(e),
                Err(RecvTimeoutError::Timeout) => return Ok(DequeueOutput::TryAgainLater),
                Err(RecvTimeoutError::Disconnected) => return Err(CodecError::WorkerGone),
            }
        }

        // Every slot still leased: the caller has to release before more
        // output can be handed out.
        let Some(index) = self.slots.iter().position(Option::is_none) else {
            return Ok(DequeueOutput::TryAgainLater);
        };
        let Some(packet) = self.pending.take() else {
            return Ok(DequeueOutput::TryAgainLater);
        };
        let info = BufferInfo {
            index,
            offset: 0,
            size: packet.data.len(),
            pts_us: packet.pts_us,
            flags: packet.flags,
        };
        self.slots[index] = Some(packet.data);
        Ok(DequeueOutput::Buffer(info))
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8], CodecError> {
        self.slots
            .get(index)
            .and_then(Option::as_deref)
            .ok_or(CodecError::InvalidBufferIndex(index))
    }

    fn release_output_buffer(&mut self, index: usize) -> Result<(), CodecError> {
        match self.slots.get_mut(index) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            _ => Err(CodecError::InvalidBufferIndex(index)),
        }
    }

    fn output_buffers(&self) -> Result<usize, CodecError> {
        self.expect_state(SessionState::Running, "output_buffers")?;
        Ok(self.slots.len())
    }

    fn output_format(&self) -> Result<MediaFormat, CodecError> {
        self.output_format.clone().ok_or_else(|| {
            CodecError::invalid_operation(format!("{}: output format not yet known", self.name))
        })
    }

    fn stop(&mut self) -> Result<(), CodecError> {
        match self.state {
            SessionState::Running => {
                self.stop_flag.store(true, Ordering::Release);
                self.queue_tx = None;
                self.state = SessionState::Stopped;
                if let Some(handle) = self.worker.take() {
                    if handle.join().is_err() {
                        return Err(CodecError::WorkerGone);
                    }
                }
                debug!("{}: stopped", self.name);
            }
            SessionState::Uninitialized | SessionState::Configured => {
                self.state = SessionState::Stopped;
            }
            SessionState::Stopped | SessionState::Released => {}
        }
        Ok(())
    }

    fn release(&mut self) {
        if self.state == SessionState::Released {
            return;
        }
        if let Err(e) = self.stop() {
            warn!("{}: stop during release failed: {}", self.name, e);
        }
        self.backend = None;
        self.surface_rx = None;
        self.input_slots.clear();
        self.returned_rx = None;
        self.events = None;
        self.slots.clear();
        self.pending = None;
        self.state = SessionState::Released;
        debug!("{}: released", self.name);
    }
}

impl<B: EncoderBackend> Drop for SoftwareSession<B> {
    fn drop(&mut self) {
        self.release();
    }
}

//! Scripted collaborators for driving the pipeline without real encoders.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use screenrec::codec::{
    AudioCodec, AudioFormat, BufferFlags, BufferInfo, Codec, CodecError, DequeueOutput,
    EncoderSession, InputSurface, MediaFormat, VideoFormat,
};
use screenrec::{
    AudioConfig, AudioError, AudioSource, CaptureError, CaptureSource, DisplayInfo, ManualClock,
    MediaBackends, MediaScanner, Muxer, MuxerError, NotifyError, Orientation, Projection,
    TrackIndex,
};
use tokio_util::sync::CancellationToken;

/// Simulated duration of one output poll.
pub const TICK_US: i64 = 20_000;
const POOL: usize = 4;
const INPUT_SLOTS: usize = 2;
const INPUT_SIZE: usize = 4096;

pub const SPS: [u8; 8] = [0x67, 0x42, 0xC0, 0x1F, 0xAC, 0xD9, 0x40, 0x50];
pub const PPS: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];

pub fn video_format(width: u32, height: u32) -> MediaFormat {
    VideoFormat::new(Codec::H264, width, height)
        .with_csd(vec![SPS.to_vec(), PPS.to_vec()])
        .into()
}

pub fn audio_format() -> MediaFormat {
    AudioFormat::new(AudioCodec::Pcm16, 22050, 1).into()
}

/// One scripted result of `dequeue_output_buffer`.
#[derive(Debug, Clone)]
pub enum Step {
    Format(MediaFormat),
    Sample {
        data: Vec<u8>,
        pts_us: i64,
        flags: BufferFlags,
    },
    Again,
    BuffersChanged,
    Fail,
    /// Cancel the token, then behave like `Again`.
    Cancel(CancellationToken),
}

impl Step {
    /// An IDR access unit stamped `pts_us` (0: let the pipeline stamp it).
    pub fn frame(pts_us: i64) -> Self {
        Self::Sample {
            data: vec![0, 0, 0, 1, 0x65, 0x88, 0x84],
            pts_us,
            flags: BufferFlags::SYNC_FRAME,
        }
    }

    /// A non-IDR slice, only decodable after a key frame.
    pub fn delta(pts_us: i64) -> Self {
        Self::Sample {
            data: vec![0, 0, 0, 1, 0x41, 0x9A, 0x20],
            pts_us,
            flags: BufferFlags::empty(),
        }
    }

    pub fn pcm(pts_us: i64) -> Self {
        Self::Sample {
            data: vec![0; 2048],
            pts_us,
            flags: BufferFlags::empty(),
        }
    }

    pub fn end_of_stream() -> Self {
        Self::Sample {
            data: vec![0, 0, 0, 1, 0x41, 0x9A],
            pts_us: 0,
            flags: BufferFlags::END_OF_STREAM,
        }
    }
}

/// What a scripted session saw, readable after the session is gone.
#[derive(Debug, Default)]
pub struct SessionLog {
    pub configured: Vec<MediaFormat>,
    pub polls: u64,
    pub dequeued: Vec<usize>,
    pub released: Vec<usize>,
    pub bad_releases: Vec<usize>,
    /// (size, pts) of every queued input buffer.
    pub inputs: Vec<(usize, i64)>,
    pub started: bool,
    pub stopped: bool,
    pub released_session: bool,
}

impl SessionLog {
    /// Every dequeued index came back exactly once.
    pub fn leases_balanced(&self) -> bool {
        let mut dequeued = self.dequeued.clone();
        let mut released = self.released.clone();
        dequeued.sort_unstable();
        released.sort_unstable();
        self.bad_releases.is_empty() && dequeued == released
    }
}

pub struct ScriptedSession {
    name: String,
    script: VecDeque<Step>,
    repeat: Option<Step>,
    clock: ManualClock,
    tick_us: i64,
    max_width: Option<u32>,
    slots: Vec<Option<Vec<u8>>>,
    inputs: Vec<Vec<u8>>,
    free_inputs: VecDeque<usize>,
    leased_inputs: Vec<usize>,
    format: Option<MediaFormat>,
    log: Arc<Mutex<SessionLog>>,
}

impl ScriptedSession {
    pub fn new(name: &str, clock: &ManualClock) -> Self {
        Self {
            name: name.to_string(),
            script: VecDeque::new(),
            repeat: None,
            clock: clock.clone(),
            tick_us: TICK_US,
            max_width: None,
            slots: vec![None; POOL],
            inputs: vec![vec![0; INPUT_SIZE]; INPUT_SLOTS],
            free_inputs: (0..INPUT_SLOTS).collect(),
            leased_inputs: Vec::new(),
            format: None,
            log: Arc::new(Mutex::new(SessionLog::default())),
        }
    }

    pub fn script(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.script.extend(steps);
        self
    }

    /// Step returned forever once the script runs out.
    pub fn repeat(mut self, step: Step) -> Self {
        self.repeat = Some(step);
        self
    }

    pub fn tick_us(mut self, tick_us: i64) -> Self {
        self.tick_us = tick_us;
        self
    }

    /// Reject video formats wider than `width`.
    pub fn max_width(mut self, width: u32) -> Self {
        self.max_width = Some(width);
        self
    }

    pub fn log(&self) -> Arc<Mutex<SessionLog>> {
        Arc::clone(&self.log)
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }
}

impl EncoderSession for ScriptedSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self, format: &MediaFormat) -> Result<(), CodecError> {
        self.log.lock().unwrap().configured.push(format.clone());
        if let (Some(max), MediaFormat::Video(video)) = (self.max_width, format) {
            if video.width > max {
                return Err(CodecError::InvalidDimensions {
                    width: video.width,
                    height: video.height,
                });
            }
        }
        Ok(())
    }

    fn create_input_surface(&mut self) -> Result<InputSurface, CodecError> {
        let (surface, _rx) = InputSurface::channel(1);
        Ok(surface)
    }

    fn start(&mut self) -> Result<(), CodecError> {
        self.log.lock().unwrap().started = true;
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> Result<Option<usize>, CodecError> {
        let index = self.free_inputs.pop_front();
        if let Some(index) = index {
            self.leased_inputs.push(index);
        }
        Ok(index)
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8], CodecError> {
        if !self.leased_inputs.contains(&index) {
            return Err(CodecError::InvalidBufferIndex(index));
        }
        Ok(&mut self.inputs[index])
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        _offset: usize,
        size: usize,
        pts_us: i64,
        _flags: BufferFlags,
    ) -> Result<(), CodecError> {
        let Some(pos) = self.leased_inputs.iter().position(|&i| i == index) else {
            return Err(CodecError::InvalidBufferIndex(index));
        };
        self.leased_inputs.remove(pos);
        self.free_inputs.push_back(index);
        self.log.lock().unwrap().inputs.push((size, pts_us));
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> Result<DequeueOutput, CodecError> {
        self.clock.advance_us(self.tick_us);
        self.log.lock().unwrap().polls += 1;
        let step = self
            .script
            .pop_front()
            .or_else(|| self.repeat.clone())
            .unwrap_or(Step::Again);
        match step {
            Step::Format(format) => {
                self.format = Some(format.clone());
                Ok(DequeueOutput::FormatChanged(format))
            }
            Step::Sample {
                data,
                pts_us,
                flags,
            } => {
                let Some(index) = self.free_slot() else {
                    self.script.push_front(Step::Sample {
                        data,
                        pts_us,
                        flags,
                    });
                    return Ok(DequeueOutput::TryAgainLater);
                };
                let size = data.len();
                self.slots[index] = Some(data);
                self.log.lock().unwrap().dequeued.push(index);
                Ok(DequeueOutput::Buffer(BufferInfo {
                    index,
                    offset: 0,
                    size,
                    pts_us,
                    flags,
                }))
            }
            Step::Again => Ok(DequeueOutput::TryAgainLater),
            Step::BuffersChanged => Ok(DequeueOutput::BuffersChanged),
            Step::Fail => Err(CodecError::backend("scripted failure")),
            Step::Cancel(token) => {
                token.cancel();
                Ok(DequeueOutput::TryAgainLater)
            }
        }
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8], CodecError> {
        self.slots
            .get(index)
            .and_then(Option::as_deref)
            .ok_or(CodecError::InvalidBufferIndex(index))
    }

    fn release_output_buffer(&mut self, index: usize) -> Result<(), CodecError> {
        let mut log = self.log.lock().unwrap();
        match self.slots.get_mut(index).and_then(Option::take) {
            Some(_) => {
                log.released.push(index);
                Ok(())
            }
            None => {
                log.bad_releases.push(index);
                Err(CodecError::InvalidBufferIndex(index))
            }
        }
    }

    fn output_buffers(&self) -> Result<usize, CodecError> {
        Ok(POOL)
    }

    fn output_format(&self) -> Result<MediaFormat, CodecError> {
        self.format
            .clone()
            .ok_or_else(|| CodecError::invalid_operation("no format yet"))
    }

    fn stop(&mut self) -> Result<(), CodecError> {
        self.log.lock().unwrap().stopped = true;
        Ok(())
    }

    fn release(&mut self) {
        self.log.lock().unwrap().released_session = true;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MuxEvent {
    AddTrack(&'static str),
    Orientation(u32),
    Start,
    Write {
        track: usize,
        pts_us: i64,
        size: usize,
        flags: BufferFlags,
    },
    Stop,
}

/// Muxer that records calls and rejects out-of-order ones.
#[derive(Clone, Default)]
pub struct RecordingMuxer {
    pub events: Arc<Mutex<Vec<MuxEvent>>>,
    tracks: usize,
    started: bool,
    stopped: bool,
}

impl RecordingMuxer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MuxEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Written timestamps of `track`, in order.
    pub fn writes(&self, track: usize) -> Vec<i64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MuxEvent::Write { track: t, pts_us, .. } if t == track => Some(pts_us),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: MuxEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn state(&self) -> &'static str {
        if self.stopped {
            "stopped"
        } else if self.started {
            "started"
        } else {
            "configured"
        }
    }
}

impl Muxer for RecordingMuxer {
    fn add_track(&mut self, format: &MediaFormat) -> Result<TrackIndex, MuxerError> {
        if self.started || self.stopped {
            return Err(MuxerError::InvalidState {
                op: "add_track",
                state: self.state(),
            });
        }
        self.push(MuxEvent::AddTrack(format.mime()));
        self.tracks += 1;
        Ok(TrackIndex(self.tracks - 1))
    }

    fn set_orientation_hint(&mut self, degrees: u32) -> Result<(), MuxerError> {
        self.push(MuxEvent::Orientation(degrees));
        Ok(())
    }

    fn start(&mut self) -> Result<(), MuxerError> {
        if self.started || self.stopped {
            return Err(MuxerError::InvalidState {
                op: "start",
                state: self.state(),
            });
        }
        if self.tracks == 0 {
            return Err(MuxerError::NoTracks);
        }
        self.started = true;
        self.push(MuxEvent::Start);
        Ok(())
    }

    fn write_sample_data(
        &mut self,
        track: TrackIndex,
        data: &[u8],
        pts_us: i64,
        flags: BufferFlags,
    ) -> Result<(), MuxerError> {
        if !self.started || self.stopped {
            return Err(MuxerError::InvalidState {
                op: "write_sample_data",
                state: self.state(),
            });
        }
        if track.0 >= self.tracks {
            return Err(MuxerError::UnknownTrack(track.0));
        }
        self.push(MuxEvent::Write {
            track: track.0,
            pts_us,
            size: data.len(),
            flags,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), MuxerError> {
        if !self.started || self.stopped {
            return Err(MuxerError::InvalidState {
                op: "stop",
                state: self.state(),
            });
        }
        self.stopped = true;
        self.push(MuxEvent::Stop);
        Ok(())
    }
}

/// Microphone that fills every read with silence.
pub struct ScriptedAudio {
    pub reads: Arc<Mutex<u64>>,
    pub stopped: Arc<Mutex<bool>>,
    fail_after: Option<u64>,
}

impl ScriptedAudio {
    pub fn new() -> Self {
        Self {
            reads: Arc::new(Mutex::new(0)),
            stopped: Arc::new(Mutex::new(false)),
            fail_after: None,
        }
    }

    /// Reads after the first `reads` return an error.
    pub fn fail_after(mut self, reads: u64) -> Self {
        self.fail_after = Some(reads);
        self
    }
}

impl AudioSource for ScriptedAudio {
    fn config(&self) -> AudioConfig {
        AudioConfig::default()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, AudioError> {
        if *self.stopped.lock().unwrap() {
            return Err(AudioError::Closed);
        }
        let mut reads = self.reads.lock().unwrap();
        if self.fail_after.is_some_and(|limit| *reads >= limit) {
            return Err(AudioError::Backend("scripted failure".to_string()));
        }
        *reads += 1;
        buf.fill(0);
        Ok(buf.len())
    }

    fn stop(&mut self) {
        *self.stopped.lock().unwrap() = true;
    }
}

/// Capture source that records what it was attached with.
pub struct FakeCapture {
    pub info: DisplayInfo,
    pub projections: Arc<Mutex<Vec<Projection>>>,
    pub detached: Arc<Mutex<u32>>,
}

impl FakeCapture {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            info: DisplayInfo {
                width,
                height,
                fps: 60.0,
                orientation: Orientation::Deg0,
            },
            projections: Arc::new(Mutex::new(Vec::new())),
            detached: Arc::new(Mutex::new(0)),
        }
    }
}

impl CaptureSource for FakeCapture {
    fn display_info(&self) -> Result<DisplayInfo, CaptureError> {
        Ok(self.info)
    }

    fn attach(
        &mut self,
        _surface: InputSurface,
        projection: Projection,
    ) -> Result<(), CaptureError> {
        self.projections.lock().unwrap().push(projection);
        Ok(())
    }

    fn detach(&mut self) {
        *self.detached.lock().unwrap() += 1;
    }
}

/// Backends handing out prebuilt sessions in order.
pub struct FakeBackends {
    pub video: Mutex<VecDeque<ScriptedSession>>,
    pub audio: Mutex<VecDeque<ScriptedSession>>,
    pub microphone_available: bool,
}

impl FakeBackends {
    pub fn new(video: Vec<ScriptedSession>) -> Self {
        Self {
            video: Mutex::new(video.into()),
            audio: Mutex::new(VecDeque::new()),
            microphone_available: false,
        }
    }

    pub fn with_audio(mut self, session: ScriptedSession, microphone_available: bool) -> Self {
        self.audio.lock().unwrap().push_back(session);
        self.microphone_available = microphone_available;
        self
    }
}

impl MediaBackends for FakeBackends {
    fn video_session(&self) -> Result<Box<dyn EncoderSession>, CodecError> {
        self.video
            .lock()
            .unwrap()
            .pop_front()
            .map(|s| Box::new(s) as Box<dyn EncoderSession>)
            .ok_or_else(|| CodecError::backend("no more video sessions"))
    }

    fn audio_session(&self) -> Result<Box<dyn EncoderSession>, CodecError> {
        self.audio
            .lock()
            .unwrap()
            .pop_front()
            .map(|s| Box::new(s) as Box<dyn EncoderSession>)
            .ok_or_else(|| CodecError::backend("no audio session"))
    }

    fn microphone(&self, _config: AudioConfig) -> Result<Box<dyn AudioSource>, AudioError> {
        if self.microphone_available {
            Ok(Box::new(ScriptedAudio::new()))
        } else {
            Err(AudioError::NoDevice)
        }
    }
}

/// Scanner that remembers the paths it was asked about.
#[derive(Default)]
pub struct RecordingScanner {
    pub paths: Mutex<Vec<PathBuf>>,
}

impl MediaScanner for RecordingScanner {
    fn notify(&self, path: &Path) -> Result<(), NotifyError> {
        self.paths.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

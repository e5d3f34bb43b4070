//! Encode-and-mux pipeline coordinator.
//!
//! One [`Pipeline`] drives a video encoder session, an optional audio
//! encoder session fed from an [`AudioSource`], and a [`Muxer`]. Every
//! iteration of the loop:
//!
//! 1. stops once the deadline has passed,
//! 2. moves one microphone frame into the audio encoder (audio only),
//! 3. services one video output result,
//! 4. services one audio output result (audio only),
//! 5. stops on cancellation or end of stream.
//!
//! Each poll waits at most the context's poll timeout, so a stop condition
//! is noticed within one timeout interval.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use screenrec_codec::{BufferFlags, BufferInfo, DequeueOutput, EncoderSession, OutputBuffer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::{AudioSource, AUDIO_FRAME_BYTES};
use crate::clock::{Clock, MonotonicClock};
use crate::error::PipelineError;
use crate::muxer::{Muxer, TrackIndex};

/// Default timeout of every encoder poll.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(20);
/// Step applied to an audio timestamp that went backwards: one 1024-sample
/// AAC frame at 44.1 kHz.
pub const AUDIO_FRAME_DURATION_US: i64 = 23_219;
/// Samples kept per track while the muxer waits for the other track.
pub const HOLDING_CAPACITY: usize = 64;

/// Everything a pipeline run needs besides its sessions and muxer.
#[derive(Clone)]
pub struct PipelineContext {
    /// Wall-clock budget measured from loop entry.
    pub time_limit: Duration,
    pub poll_timeout: Duration,
    pub cancel: CancellationToken,
    pub clock: Arc<dyn Clock>,
}

impl PipelineContext {
    pub fn new(time_limit: Duration, cancel: CancellationToken) -> Self {
        Self {
            time_limit,
            poll_timeout: POLL_TIMEOUT,
            cancel,
            clock: Arc::new(MonotonicClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    /// Waiting for every expected track to register.
    Priming,
    /// Muxer started; samples are written as they arrive.
    Streaming,
    Draining,
    Terminated,
}

/// Why a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TimeLimit,
    Cancelled,
    EndOfStream,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TimeLimit => "time limit reached",
            Self::Cancelled => "interrupted",
            Self::EndOfStream => "end of stream",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    fn slot(&self) -> usize {
        match self {
            Self::Video => 0,
            Self::Audio => 1,
        }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub stop_reason: StopReason,
    pub video_frames: u64,
    pub audio_frames: u64,
    /// Samples lost to holding-queue overflow, plus video delta frames
    /// discarded ahead of the first key frame.
    pub dropped_samples: u64,
    pub elapsed: Duration,
}

/// Where a media sample goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Write(TrackIndex),
    /// Own track registered, muxer not started yet.
    Hold,
}

/// Track registration state shared by both lanes.
///
/// The muxer starts once every expected track is registered and never
/// before. A lane may only emit samples after its own track exists.
#[derive(Debug, Clone)]
pub struct TrackGate {
    expected: usize,
    tracks: [Option<TrackIndex>; 2],
    registered: usize,
    started: bool,
}

impl TrackGate {
    pub fn new(with_audio: bool) -> Self {
        Self {
            expected: if with_audio { 2 } else { 1 },
            tracks: [None; 2],
            registered: 0,
            started: false,
        }
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn registered(&self) -> usize {
        self.registered
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn track(&self, kind: TrackKind) -> Option<TrackIndex> {
        self.tracks[kind.slot()]
    }

    /// Record `kind`'s track. Returns `true` when the muxer should start now.
    pub fn register(&mut self, kind: TrackKind, track: TrackIndex) -> Result<bool, PipelineError> {
        let slot = &mut self.tracks[kind.slot()];
        if slot.is_some() {
            return Err(PipelineError::DuplicateFormat(kind.name()));
        }
        *slot = Some(track);
        self.registered += 1;
        Ok(!self.started && self.registered >= self.expected)
    }

    pub fn mark_started(&mut self) {
        self.started = true;
    }

    pub fn route(&self, kind: TrackKind) -> Result<Route, PipelineError> {
        match self.tracks[kind.slot()] {
            None => Err(PipelineError::SampleBeforeTrack(kind.name())),
            Some(track) if self.started => Ok(Route::Write(track)),
            Some(_) => Ok(Route::Hold),
        }
    }
}

/// Keeps written audio timestamps non-decreasing.
#[derive(Debug, Clone, Default)]
pub struct AudioTimestamps {
    last_us: i64,
}

impl AudioTimestamps {
    /// Timestamp to write for an observed `pts_us`.
    ///
    /// Negative values clamp to zero; a value behind the last written one
    /// becomes last + [`AUDIO_FRAME_DURATION_US`].
    pub fn correct(&mut self, pts_us: i64) -> i64 {
        let mut pts = pts_us.max(0);
        if pts < self.last_us {
            debug!(
                "audio: pts {} behind {}, corrected",
                pts_us, self.last_us
            );
            pts = self.last_us + AUDIO_FRAME_DURATION_US;
        }
        self.last_us = pts;
        pts
    }

    pub fn last_us(&self) -> i64 {
        self.last_us
    }
}

enum PtsPolicy {
    /// Zero means "no timestamp": stamp with the clock.
    Video,
    Audio(AudioTimestamps),
}

impl PtsPolicy {
    fn apply(&mut self, pts_us: i64, clock: &dyn Clock) -> i64 {
        match self {
            Self::Video if pts_us == 0 => clock.now_us(),
            Self::Video => pts_us,
            Self::Audio(timestamps) => timestamps.correct(pts_us),
        }
    }
}

struct HeldSample {
    data: Vec<u8>,
    pts_us: i64,
    flags: BufferFlags,
}

impl HeldSample {
    fn is_sync(&self) -> bool {
        self.flags.contains(BufferFlags::SYNC_FRAME)
    }
}

/// Samples waiting for the muxer to start.
///
/// A keyed queue (video) only ever begins with a sync frame: overflow drops
/// the whole leading group of pictures, and delta frames with no key frame
/// ahead of them are discarded on arrival.
struct HoldingQueue {
    samples: VecDeque<HeldSample>,
    capacity: usize,
    keyed: bool,
    dropped: u64,
}

impl HoldingQueue {
    fn new(capacity: usize, keyed: bool) -> Self {
        Self {
            samples: VecDeque::new(),
            capacity: capacity.max(1),
            keyed,
            dropped: 0,
        }
    }

    /// Returns the number of samples discarded to make room.
    fn push(&mut self, sample: HeldSample) -> u64 {
        let before = self.dropped;
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
            self.dropped += 1;
            if self.keyed {
                while self.samples.front().is_some_and(|s| !s.is_sync()) {
                    self.samples.pop_front();
                    self.dropped += 1;
                }
            }
        }
        if self.keyed && self.samples.is_empty() && !sample.is_sync() {
            self.dropped += 1;
        } else {
            self.samples.push_back(sample);
        }
        self.dropped - before
    }

    fn pop(&mut self) -> Option<HeldSample> {
        self.samples.pop_front()
    }
}

struct Lane<'a> {
    kind: TrackKind,
    session: &'a mut dyn EncoderSession,
    pool_size: usize,
    pts: PtsPolicy,
    held: HoldingQueue,
    /// Video stays unwritten until a sync frame reaches the muxer.
    awaiting_sync: bool,
    skipped: u64,
    written: u64,
    dequeued: u64,
    released: u64,
}

impl<'a> Lane<'a> {
    fn new(kind: TrackKind, session: &'a mut dyn EncoderSession) -> Self {
        let pts = match kind {
            TrackKind::Video => PtsPolicy::Video,
            TrackKind::Audio => PtsPolicy::Audio(AudioTimestamps::default()),
        };
        Self {
            kind,
            session,
            pool_size: 0,
            pts,
            held: HoldingQueue::new(HOLDING_CAPACITY, kind == TrackKind::Video),
            awaiting_sync: kind == TrackKind::Video,
            skipped: 0,
            written: 0,
            dequeued: 0,
            released: 0,
        }
    }

    fn codec_error(&self) -> impl FnOnce(screenrec_codec::CodecError) -> PipelineError {
        PipelineError::codec(self.kind.name())
    }

    /// Write or hold one dequeued buffer, then release it.
    ///
    /// Returns whether the buffer carried END_OF_STREAM.
    fn drain_buffer(
        &mut self,
        info: BufferInfo,
        muxer: &mut dyn Muxer,
        gate: &TrackGate,
        clock: &dyn Clock,
    ) -> Result<bool, PipelineError> {
        let name = self.kind.name();
        self.dequeued += 1;
        let lease = OutputBuffer::new(&mut *self.session, info);
        // Codec config already reached the muxer with the format change.
        let size = if info.is_codec_config() { 0 } else { info.size };
        if size > 0 {
            let data = lease.data().map_err(PipelineError::codec(name))?;
            let route = gate.route(self.kind)?;
            let pts_us = self.pts.apply(info.pts_us, clock);
            match route {
                Route::Write(_) if self.awaiting_sync && !info.is_sync_frame() => {
                    self.skipped += 1;
                    debug!("{}: skipped delta frame before first key frame", name);
                }
                Route::Write(track) => {
                    muxer.write_sample_data(track, data, pts_us, info.flags)?;
                    self.awaiting_sync = false;
                    self.written += 1;
                }
                Route::Hold => {
                    let sample = HeldSample {
                        data: data.to_vec(),
                        pts_us,
                        flags: info.flags,
                    };
                    let dropped = self.held.push(sample);
                    if dropped > 0 {
                        warn!("{}: holding queue full, dropped {} samples", name, dropped);
                    }
                }
            }
        }
        lease.release().map_err(PipelineError::codec(name))?;
        self.released += 1;
        Ok(info.is_end_of_stream())
    }
}

struct AudioFeed<'a> {
    lane: Lane<'a>,
    source: &'a mut dyn AudioSource,
}

impl AudioFeed<'_> {
    /// Move one microphone frame into the encoder, if an input buffer frees
    /// up within `timeout`.
    fn feed(&mut self, clock: &dyn Clock, timeout: Duration) -> Result<(), PipelineError> {
        let to_err = self.lane.codec_error();
        let session = &mut *self.lane.session;
        let Some(index) = session.dequeue_input_buffer(timeout).map_err(to_err)? else {
            return Ok(());
        };
        let buf = session
            .input_buffer(index)
            .map_err(PipelineError::codec("audio"))?;
        let len = AUDIO_FRAME_BYTES.min(buf.len());
        let read = self.source.read(&mut buf[..len]);
        let pts_us = clock.now_us();
        // The buffer goes back even when the read failed.
        let size = match &read {
            Ok(n) => *n,
            Err(_) => 0,
        };
        session
            .queue_input_buffer(index, 0, size, pts_us, BufferFlags::empty())
            .map_err(PipelineError::codec("audio"))?;
        read?;
        Ok(())
    }
}

/// The coordinator. Owns the scheduling loop; borrows sessions, the audio
/// source and the muxer from the caller, which tears them down afterwards.
pub struct Pipeline<'a> {
    ctx: PipelineContext,
    state: PipelineState,
    video: Lane<'a>,
    audio: Option<AudioFeed<'a>>,
    muxer: &'a mut dyn Muxer,
    gate: TrackGate,
}

impl<'a> Pipeline<'a> {
    /// Video-only pipeline.
    pub fn new(
        ctx: PipelineContext,
        video: &'a mut dyn EncoderSession,
        muxer: &'a mut dyn Muxer,
    ) -> Self {
        Self {
            ctx,
            state: PipelineState::Idle,
            video: Lane::new(TrackKind::Video, video),
            audio: None,
            muxer,
            gate: TrackGate::new(false),
        }
    }

    /// Add an audio track fed from `source`.
    pub fn with_audio(
        mut self,
        session: &'a mut dyn EncoderSession,
        source: &'a mut dyn AudioSource,
    ) -> Self {
        self.audio = Some(AudioFeed {
            lane: Lane::new(TrackKind::Audio, session),
            source,
        });
        self.gate = TrackGate::new(true);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        debug!("pipeline: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run until the deadline, cancellation, end of stream or a fatal error.
    ///
    /// The microphone is stopped on every exit. Sessions and muxer are left
    /// for the caller to stop and release.
    pub fn run(&mut self) -> Result<PipelineReport, PipelineError> {
        if self.state != PipelineState::Idle {
            return Err(PipelineError::AlreadyRun);
        }
        self.transition(PipelineState::Priming);

        let start_us = self.ctx.clock.now_us();
        let deadline_us =
            start_us.saturating_add(self.ctx.time_limit.as_micros().min(i64::MAX as u128) as i64);
        let outcome = self.refresh_pools().and_then(|()| self.run_loop(deadline_us));
        if outcome.is_ok() {
            self.transition(PipelineState::Draining);
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.source.stop();
        }

        let stop_reason = match outcome {
            Ok(reason) => reason,
            Err(e) => {
                self.transition(PipelineState::Terminated);
                return Err(e);
            }
        };
        for lane in self.lanes() {
            if lane.dequeued != lane.released {
                warn!(
                    "{}: {} buffers dequeued but {} released",
                    lane.kind.name(),
                    lane.dequeued,
                    lane.released
                );
            }
        }

        let elapsed_us = (self.ctx.clock.now_us() - start_us).max(0);
        let report = PipelineReport {
            stop_reason,
            video_frames: self.video.written,
            audio_frames: self.audio.as_ref().map_or(0, |a| a.lane.written),
            dropped_samples: self.lanes().map(|l| l.held.dropped + l.skipped).sum(),
            elapsed: Duration::from_micros(elapsed_us as u64),
        };
        self.transition(PipelineState::Terminated);
        info!(
            "pipeline: {} after {:.1}s, {} video / {} audio samples",
            report.stop_reason,
            report.elapsed.as_secs_f64(),
            report.video_frames,
            report.audio_frames
        );
        Ok(report)
    }

    fn lanes(&self) -> impl Iterator<Item = &Lane<'a>> {
        std::iter::once(&self.video).chain(self.audio.as_ref().map(|a| &a.lane))
    }

    fn refresh_pools(&mut self) -> Result<(), PipelineError> {
        let lanes = std::iter::once(&mut self.video).chain(self.audio.as_mut().map(|a| &mut a.lane));
        for lane in lanes {
            lane.pool_size = lane.session.output_buffers().map_err(lane.codec_error())?;
        }
        Ok(())
    }

    fn run_loop(&mut self, deadline_us: i64) -> Result<StopReason, PipelineError> {
        let timeout = self.ctx.poll_timeout;
        loop {
            if self.ctx.clock.now_us() >= deadline_us {
                debug!("pipeline: time limit reached");
                return Ok(StopReason::TimeLimit);
            }

            if let Some(audio) = self.audio.as_mut() {
                audio.feed(self.ctx.clock.as_ref(), timeout)?;
            }

            let mut end_of_stream = self.service(TrackKind::Video)?;
            if self.audio.is_some() {
                end_of_stream |= self.service(TrackKind::Audio)?;
            }

            if self.ctx.cancel.is_cancelled() {
                debug!("pipeline: cancelled");
                return Ok(StopReason::Cancelled);
            }
            if end_of_stream {
                // Not expected from a live capture; treated as a stop request.
                info!("pipeline: encoder signalled end of stream");
                return Ok(StopReason::EndOfStream);
            }
        }
    }

    /// Poll one session once and dispatch the result.
    fn service(&mut self, kind: TrackKind) -> Result<bool, PipelineError> {
        let timeout = self.ctx.poll_timeout;
        let lane = match kind {
            TrackKind::Video => &mut self.video,
            TrackKind::Audio => match self.audio.as_mut() {
                Some(audio) => &mut audio.lane,
                None => return Ok(false),
            },
        };

        let polled = lane
            .session
            .dequeue_output_buffer(timeout)
            .map_err(lane.codec_error())?;
        match polled {
            DequeueOutput::TryAgainLater => Ok(false),
            DequeueOutput::Buffer(info) => {
                lane.drain_buffer(info, &mut *self.muxer, &self.gate, self.ctx.clock.as_ref())
            }
            DequeueOutput::FormatChanged(format) => {
                if self.gate.track(kind).is_some() {
                    return Err(PipelineError::DuplicateFormat(kind.name()));
                }
                let track = self.muxer.add_track(&format)?;
                info!("{}: track {} added ({})", kind.name(), track.0, format.mime());
                if self.gate.register(kind, track)? {
                    self.muxer.start()?;
                    self.gate.mark_started();
                    debug!("pipeline: muxer started with {} tracks", self.gate.registered());
                    self.flush_held()?;
                    self.transition(PipelineState::Streaming);
                }
                Ok(false)
            }
            DequeueOutput::BuffersChanged => {
                lane.pool_size = lane.session.output_buffers().map_err(lane.codec_error())?;
                debug!("{}: output pool now {} buffers", kind.name(), lane.pool_size);
                Ok(false)
            }
        }
    }

    /// Write every held sample, oldest first, right after the muxer started.
    fn flush_held(&mut self) -> Result<(), PipelineError> {
        let gate = &self.gate;
        let muxer = &mut *self.muxer;
        let lanes = std::iter::once(&mut self.video).chain(self.audio.as_mut().map(|a| &mut a.lane));
        for lane in lanes {
            let Some(track) = gate.track(lane.kind) else {
                continue;
            };
            let mut flushed = 0;
            while let Some(sample) = lane.held.pop() {
                muxer.write_sample_data(track, &sample.data, sample.pts_us, sample.flags)?;
                lane.awaiting_sync = false;
                lane.written += 1;
                flushed += 1;
            }
            if flushed > 0 {
                debug!("{}: wrote {} held samples", lane.kind.name(), flushed);
            }
        }
        Ok(())
    }
}

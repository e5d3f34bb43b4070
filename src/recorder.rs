//! Recording orchestration: prepare encoders, bind the capture source, run
//! the pipeline, tear everything down.

use std::path::PathBuf;
use std::sync::Arc;

use screenrec_codec::{
    AudioCodec, AudioFormat, Codec, CodecError, EncoderSession, InputSurface, MediaFormat,
    VideoFormat,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::{AudioConfig, AudioSource, Microphone, AUDIO_BIT_RATE};
use crate::clock::Clock;
use crate::config::Settings;
use crate::coordinator::{Pipeline, PipelineContext, PipelineReport};
use crate::display::{CaptureSource, Projection};
use crate::error::{AudioError, RecordError};
use crate::mp4::Mp4Muxer;
use crate::muxer::{Muxer, MuxerState};
use crate::notify::{notify_best_effort, MediaScanner};

/// Fallback encoder size, landscape.
pub const FALLBACK_WIDTH: u32 = 1280;
pub const FALLBACK_HEIGHT: u32 = 720;
/// Seconds between key frames.
pub const I_FRAME_INTERVAL_SECS: u32 = 10;

/// Creates encoder sessions and opens the microphone.
pub trait MediaBackends {
    fn video_session(&self) -> Result<Box<dyn EncoderSession>, CodecError>;
    fn audio_session(&self) -> Result<Box<dyn EncoderSession>, CodecError>;
    fn microphone(&self, config: AudioConfig) -> Result<Box<dyn AudioSource>, AudioError>;
}

/// Software encoders and the default input device.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBackends;

impl MediaBackends for DefaultBackends {
    #[cfg(feature = "openh264")]
    fn video_session(&self) -> Result<Box<dyn EncoderSession>, CodecError> {
        use screenrec_codec::{OpenH264Backend, SoftwareSession};
        Ok(Box::new(SoftwareSession::<OpenH264Backend>::new("video")))
    }

    #[cfg(not(feature = "openh264"))]
    fn video_session(&self) -> Result<Box<dyn EncoderSession>, CodecError> {
        Err(CodecError::unsupported_format(
            "video/avc encoding requires the openh264 feature",
        ))
    }

    fn audio_session(&self) -> Result<Box<dyn EncoderSession>, CodecError> {
        use screenrec_codec::{PcmBackend, SoftwareSession};
        Ok(Box::new(SoftwareSession::<PcmBackend>::new("audio")))
    }

    fn microphone(&self, config: AudioConfig) -> Result<Box<dyn AudioSource>, AudioError> {
        Ok(Box::new(Microphone::open(config)?))
    }
}

/// Collaborators of one recording.
pub struct RecordDeps<'a> {
    pub capture: &'a mut dyn CaptureSource,
    pub backends: &'a dyn MediaBackends,
    pub scanner: &'a dyn MediaScanner,
    pub cancel: CancellationToken,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordReport {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub audio: bool,
    pub pipeline: PipelineReport,
}

/// Size to retry at after a failure at `width` x `height`, if any.
///
/// The fallback is 1280x720, turned to portrait for portrait requests. It is
/// only used when both dimensions differ from the failed request.
pub fn fallback_size(width: u32, height: u32) -> Option<(u32, u32)> {
    let (w, h) = if width < height {
        (FALLBACK_HEIGHT, FALLBACK_WIDTH)
    } else {
        (FALLBACK_WIDTH, FALLBACK_HEIGHT)
    };
    (width != w && height != h).then_some((w, h))
}

struct PreparedVideo {
    session: Box<dyn EncoderSession>,
    surface: InputSurface,
    width: u32,
    height: u32,
}

/// Configure, create the input surface and start. The session is released
/// on failure.
fn prepare_video(
    backends: &dyn MediaBackends,
    width: u32,
    height: u32,
    fps: f32,
    bit_rate: u32,
) -> Result<PreparedVideo, CodecError> {
    let format: MediaFormat = VideoFormat::new(Codec::H264, width, height)
        .bit_rate(bit_rate)
        .frame_rate(fps)
        .i_frame_interval(I_FRAME_INTERVAL_SECS)
        .into();
    debug!(
        "Configuring recorder for {}x{} {} at {:.2} Mbps",
        width,
        height,
        format.mime(),
        f64::from(bit_rate) / 1_000_000.0
    );

    let mut session = backends.video_session()?;
    let started = session
        .configure(&format)
        .and_then(|()| session.create_input_surface())
        .and_then(|surface| session.start().map(|()| surface));
    match started {
        Ok(surface) => Ok(PreparedVideo {
            session,
            surface,
            width,
            height,
        }),
        Err(e) => {
            session.release();
            Err(e)
        }
    }
}

/// Prepare video at the requested size, retrying once at the fallback size
/// when no size was given explicitly.
fn prepare_video_with_fallback(
    backends: &dyn MediaBackends,
    settings: &Settings,
    width: u32,
    height: u32,
    fps: f32,
) -> Result<PreparedVideo, RecordError> {
    let first = prepare_video(backends, width, height, fps, settings.bit_rate);
    let err = match first {
        Ok(prepared) => return Ok(prepared),
        Err(e) => e,
    };
    let retry = if settings.size.is_none() {
        fallback_size(width, height)
    } else {
        None
    };
    let Some((new_width, new_height)) = retry else {
        return Err(RecordError::VideoSetup {
            width,
            height,
            source: err,
        });
    };

    warn!(
        "failed at {}x{} ({}), retrying at {}x{}",
        width, height, err, new_width, new_height
    );
    prepare_video(backends, new_width, new_height, fps, settings.bit_rate).map_err(|source| {
        RecordError::VideoSetup {
            width: new_width,
            height: new_height,
            source,
        }
    })
}

/// Audio session plus microphone, or `None` with a warning.
fn prepare_audio(
    backends: &dyn MediaBackends,
) -> Option<(Box<dyn EncoderSession>, Box<dyn AudioSource>)> {
    let config = AudioConfig::default();
    let format: MediaFormat = AudioFormat::new(AudioCodec::Pcm16, config.sample_rate, config.channels)
        .bit_rate(AUDIO_BIT_RATE)
        .into();

    let mut session = match backends.audio_session() {
        Ok(session) => session,
        Err(e) => {
            warn!("Unable to prepare audio encoder ({}), recording video only", e);
            return None;
        }
    };
    if let Err(e) = session.configure(&format).and_then(|()| session.start()) {
        session.release();
        warn!("Unable to prepare audio encoder ({}), recording video only", e);
        return None;
    }
    match backends.microphone(config) {
        Ok(source) => Some((session, source)),
        Err(e) => {
            session.stop().ok();
            session.release();
            warn!("Unable to open microphone ({}), recording video only", e);
            None
        }
    }
}

fn stop_session(session: &mut dyn EncoderSession) {
    if let Err(e) = session.stop() {
        warn!("{}: stop failed: {}", session.name(), e);
    }
}

/// Record the display described by `deps.capture` into `settings.output`.
///
/// Sessions are released on every path. The muxer is stopped and the
/// scanner notified only when the pipeline finished without error and the
/// muxer was started.
pub fn record_screen(
    settings: &Settings,
    deps: RecordDeps<'_>,
) -> Result<RecordReport, RecordError> {
    let RecordDeps {
        capture,
        backends,
        scanner,
        cancel,
        clock,
    } = deps;

    let main_display = capture.display_info()?;
    info!(
        "Main display is {}x{} @{:.2}fps (orientation={})",
        main_display.width,
        main_display.height,
        main_display.fps,
        main_display.orientation.degrees()
    );
    let (width, height) = match settings.size {
        Some(size) => (size.width, size.height),
        None => main_display.oriented_size(),
    };

    let PreparedVideo {
        session: mut video,
        surface,
        width,
        height,
    } = prepare_video_with_fallback(backends, settings, width, height, main_display.fps)?;

    let mut audio = if settings.audio {
        prepare_audio(backends)
    } else {
        None
    };
    let release_all = |video: &mut Box<dyn EncoderSession>,
                       audio: &mut Option<(Box<dyn EncoderSession>, Box<dyn AudioSource>)>| {
        video.release();
        if let Some((session, _)) = audio.as_mut() {
            session.release();
        }
    };

    let attached = Projection::compute(&main_display, width, height, settings.rotate)
        .and_then(|projection| capture.attach(surface, projection));
    if let Err(e) = attached {
        release_all(&mut video, &mut audio);
        return Err(e.into());
    }

    let muxer = Mp4Muxer::create(&settings.output, settings.fragment_duration).and_then(|mut m| {
        if settings.rotate {
            m.set_orientation_hint(90)?;
        }
        Ok(m)
    });
    let mut muxer = match muxer {
        Ok(m) => m,
        Err(e) => {
            capture.detach();
            release_all(&mut video, &mut audio);
            return Err(e.into());
        }
    };

    let ctx = PipelineContext::new(settings.time_limit, cancel)
        .with_clock(clock)
        .with_poll_timeout(settings.poll_timeout);
    let outcome = {
        let mut pipeline = Pipeline::new(ctx, video.as_mut(), &mut muxer);
        if let Some((session, source)) = audio.as_mut() {
            pipeline = pipeline.with_audio(session.as_mut(), source.as_mut());
        }
        pipeline.run()
    };

    // Producer side first, then encoders, then the container.
    capture.detach();
    stop_session(video.as_mut());
    if let Some((session, _)) = audio.as_mut() {
        stop_session(session.as_mut());
    }

    let report = match outcome {
        Ok(report) => report,
        Err(e) => {
            release_all(&mut video, &mut audio);
            return Err(e.into());
        }
    };
    debug!("Stopping encoders and muxer");
    let started = muxer.state() == MuxerState::Started;
    let stopped = if started {
        muxer.stop()
    } else {
        warn!("no media reached the muxer, {} is empty", settings.output.display());
        Ok(())
    };
    release_all(&mut video, &mut audio);
    stopped?;

    if started {
        notify_best_effort(scanner, &settings.output);
    }
    Ok(RecordReport {
        output: settings.output.clone(),
        width,
        height,
        audio: audio.is_some(),
        pipeline: report,
    })
}

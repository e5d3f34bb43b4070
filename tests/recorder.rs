mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use screenrec::codec::MediaFormat;
use screenrec::mp4::{find_box_path, iter_boxes};
use screenrec::{
    record_screen, ManualClock, Orientation, RecordDeps, RecordError, RecordReport, Settings,
    StopReason, VideoSize,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use support::{
    audio_format, video_format, FakeBackends, FakeCapture, RecordingScanner, ScriptedSession,
    SessionLog, Step,
};

const START_US: i64 = 1_000_000;

struct Harness {
    dir: TempDir,
    clock: ManualClock,
    scanner: RecordingScanner,
}

impl Harness {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            clock: ManualClock::new(START_US),
            scanner: RecordingScanner::default(),
        }
    }

    fn settings(&self) -> Settings {
        let mut settings = Settings::new(self.dir.path().join("out.mp4"));
        settings.time_limit = Duration::from_secs(1);
        settings
    }

    fn record(
        &self,
        settings: &Settings,
        capture: &mut FakeCapture,
        backends: &FakeBackends,
    ) -> Result<RecordReport, RecordError> {
        record_screen(
            settings,
            RecordDeps {
                capture,
                backends,
                scanner: &self.scanner,
                cancel: CancellationToken::new(),
                clock: Arc::new(self.clock.clone()),
            },
        )
    }

    fn rejecting(&self) -> ScriptedSession {
        ScriptedSession::new("video", &self.clock).max_width(0)
    }

    fn recording(&self, width: u32, height: u32) -> ScriptedSession {
        ScriptedSession::new("video", &self.clock)
            .script([Step::Format(video_format(width, height))])
            .repeat(Step::frame(0))
    }
}

fn configured_sizes(log: &Arc<Mutex<SessionLog>>) -> Vec<(u32, u32)> {
    log.lock()
        .unwrap()
        .configured
        .iter()
        .filter_map(|format| match format {
            MediaFormat::Video(video) => Some((video.width, video.height)),
            MediaFormat::Audio(_) => None,
        })
        .collect()
}

fn track_count(path: &std::path::Path) -> usize {
    let data = std::fs::read(path).unwrap();
    let moov = find_box_path(&data, &[b"moov"]).unwrap();
    iter_boxes(moov)
        .iter()
        .filter(|b| &b.box_type == b"trak")
        .count()
}

#[test]
fn test_fallback_retried_once_landscape() {
    let h = Harness::new();
    let first = h.rejecting();
    let second = h.rejecting();
    let (first_log, second_log) = (first.log(), second.log());
    let backends = FakeBackends::new(vec![first, second, h.rejecting()]);
    let mut capture = FakeCapture::new(1920, 1080);

    let err = h.record(&h.settings(), &mut capture, &backends).unwrap_err();

    match err {
        RecordError::VideoSetup { width, height, .. } => assert_eq!((width, height), (1280, 720)),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(configured_sizes(&first_log), vec![(1920, 1080)]);
    assert_eq!(configured_sizes(&second_log), vec![(1280, 720)]);
    assert!(first_log.lock().unwrap().released_session);
    assert!(second_log.lock().unwrap().released_session);
    assert_eq!(backends.video.lock().unwrap().len(), 1);
    assert!(capture.projections.lock().unwrap().is_empty());
    assert!(h.scanner.paths.lock().unwrap().is_empty());
}

#[test]
fn test_fallback_swapped_for_portrait() {
    let h = Harness::new();
    let first = h.rejecting();
    let second = h.rejecting();
    let (first_log, second_log) = (first.log(), second.log());
    let backends = FakeBackends::new(vec![first, second]);
    let mut capture = FakeCapture::new(1080, 1920);

    assert!(h.record(&h.settings(), &mut capture, &backends).is_err());
    assert_eq!(configured_sizes(&first_log), vec![(1080, 1920)]);
    assert_eq!(configured_sizes(&second_log), vec![(720, 1280)]);
}

#[test]
fn test_no_fallback_for_explicit_size() {
    let h = Harness::new();
    let backends = FakeBackends::new(vec![h.rejecting(), h.rejecting()]);
    let mut capture = FakeCapture::new(1920, 1080);
    let mut settings = h.settings();
    settings.size = Some(VideoSize {
        width: 1920,
        height: 1080,
    });

    let err = h.record(&settings, &mut capture, &backends).unwrap_err();
    assert!(matches!(
        err,
        RecordError::VideoSetup {
            width: 1920,
            height: 1080,
            ..
        }
    ));
    assert_eq!(backends.video.lock().unwrap().len(), 1);
}

#[test]
fn test_no_fallback_when_a_dimension_matches() {
    let h = Harness::new();
    let backends = FakeBackends::new(vec![h.rejecting(), h.rejecting()]);
    let mut capture = FakeCapture::new(1280, 1024);

    assert!(h.record(&h.settings(), &mut capture, &backends).is_err());
    assert_eq!(backends.video.lock().unwrap().len(), 1);
}

#[test]
fn test_fallback_success_records_file() {
    let h = Harness::new();
    let first = ScriptedSession::new("video", &h.clock).max_width(1280);
    let second = h.recording(1280, 720).max_width(1280);
    let second_log = second.log();
    let backends = FakeBackends::new(vec![first, second]);
    let mut capture = FakeCapture::new(1920, 1080);
    let settings = h.settings();

    let report = h.record(&settings, &mut capture, &backends).unwrap();

    assert_eq!((report.width, report.height), (1280, 720));
    assert!(!report.audio);
    assert_eq!(report.pipeline.stop_reason, StopReason::TimeLimit);
    assert!(report.pipeline.video_frames > 0);
    assert_eq!(track_count(&settings.output), 1);

    let projections = capture.projections.lock().unwrap();
    assert_eq!(projections.len(), 1);
    assert_eq!(
        (projections[0].frame_width, projections[0].frame_height),
        (1280, 720)
    );
    assert_eq!(*capture.detached.lock().unwrap(), 1);

    let log = second_log.lock().unwrap();
    assert!(log.stopped);
    assert!(log.released_session);
    assert!(log.leases_balanced());
    assert_eq!(*h.scanner.paths.lock().unwrap(), vec![settings.output.clone()]);
}

#[test]
fn test_audio_downgraded_without_microphone() {
    let h = Harness::new();
    let audio = ScriptedSession::new("audio", &h.clock).tick_us(0);
    let audio_log = audio.log();
    let backends = FakeBackends::new(vec![h.recording(1920, 1080)]).with_audio(audio, false);
    let mut capture = FakeCapture::new(1920, 1080);
    let mut settings = h.settings();
    settings.audio = true;

    let report = h.record(&settings, &mut capture, &backends).unwrap();

    assert!(!report.audio);
    assert_eq!(report.pipeline.audio_frames, 0);
    assert_eq!(track_count(&settings.output), 1);
    let log = audio_log.lock().unwrap();
    assert!(log.released_session);
    assert_eq!(log.polls, 0);
}

#[test]
fn test_audio_and_video_tracks() {
    let h = Harness::new();
    let audio = ScriptedSession::new("audio", &h.clock)
        .tick_us(0)
        .script(std::iter::once(Step::Format(audio_format())).chain(
            (0..10).map(|i| Step::pcm(2_000_000 + i * 46_440)),
        ));
    let backends = FakeBackends::new(vec![h.recording(1920, 1080)]).with_audio(audio, true);
    let mut capture = FakeCapture::new(1920, 1080);
    let mut settings = h.settings();
    settings.audio = true;

    let report = h.record(&settings, &mut capture, &backends).unwrap();

    assert!(report.audio);
    assert_eq!(report.pipeline.audio_frames, 10);
    assert_eq!(track_count(&settings.output), 2);
}

#[test]
fn test_rotate_projects_onto_swapped_frame() {
    let h = Harness::new();
    let backends = FakeBackends::new(vec![h.recording(1080, 1920)]);
    let mut capture = FakeCapture::new(1080, 1920);
    let mut settings = h.settings();
    settings.rotate = true;

    h.record(&settings, &mut capture, &backends).unwrap();

    let projections = capture.projections.lock().unwrap();
    let projection = projections[0];
    assert_eq!(projection.orientation, Orientation::Deg90);
    assert_eq!((projection.frame_width, projection.frame_height), (1080, 1920));
    // Portrait content laid out in a 1920x1080 frame, then turned.
    assert_eq!(projection.content.height, 1080);
    assert_eq!(projection.content.width, 607);
}

#[test]
fn test_pipeline_failure_skips_notification() {
    let h = Harness::new();
    let video = ScriptedSession::new("video", &h.clock).script([
        Step::Format(video_format(1920, 1080)),
        Step::frame(0),
        Step::Fail,
    ]);
    let video_log = video.log();
    let backends = FakeBackends::new(vec![video]);
    let mut capture = FakeCapture::new(1920, 1080);

    let err = h.record(&h.settings(), &mut capture, &backends).unwrap_err();

    assert!(matches!(err, RecordError::Pipeline(_)));
    assert!(h.scanner.paths.lock().unwrap().is_empty());
    assert_eq!(*capture.detached.lock().unwrap(), 1);
    let log = video_log.lock().unwrap();
    assert!(log.stopped);
    assert!(log.released_session);
    assert!(log.leases_balanced());
}

#[test]
fn test_no_media_leaves_empty_file() {
    let h = Harness::new();
    let backends = FakeBackends::new(vec![ScriptedSession::new("video", &h.clock)]);
    let mut capture = FakeCapture::new(1920, 1080);
    let settings = h.settings();

    let report = h.record(&settings, &mut capture, &backends).unwrap();

    assert_eq!(report.pipeline.video_frames, 0);
    assert!(h.scanner.paths.lock().unwrap().is_empty());
    assert_eq!(std::fs::metadata(&settings.output).unwrap().len(), 0);
}

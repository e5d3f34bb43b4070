//! Display geometry and capture sources.
//!
//! A [`CaptureSource`] describes the display being recorded and, once
//! attached, pushes raw frames into the video encoder's input surface using
//! the [`Projection`] computed here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use screenrec_codec::{InputSurface, VideoFrame};
use tracing::{debug, info};

use crate::clock::{Clock, MonotonicClock};
use crate::error::CaptureError;

/// Display rotation relative to its natural orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Orientation {
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// Width and height trade places at 90 and 270 degrees.
    pub fn is_rotated(&self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

/// Characteristics of the display being recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayInfo {
    /// Panel width in its natural orientation.
    pub width: u32,
    pub height: u32,
    pub fps: f32,
    pub orientation: Orientation,
}

impl DisplayInfo {
    /// Size as currently shown, accounting for rotation.
    pub fn oriented_size(&self) -> (u32, u32) {
        if self.orientation.is_rotated() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Mapping of the display contents onto encoder frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Projection {
    /// Region of the display that is captured (all of it).
    pub source: Rect,
    /// Encoder frame size.
    pub frame_width: u32,
    pub frame_height: u32,
    /// Content area before the projection rotation is applied.
    pub content: Rect,
    pub orientation: Orientation,
}

impl Projection {
    /// Fit `display` into a `video_width` x `video_height` frame, keeping the
    /// display's aspect ratio and centring the result.
    ///
    /// With `rotate` the content is laid out for the swapped frame size and
    /// turned 90 degrees, so a portrait display fills a landscape frame.
    pub fn compute(
        display: &DisplayInfo,
        video_width: u32,
        video_height: u32,
        rotate: bool,
    ) -> Result<Self, CaptureError> {
        let (source_width, source_height) = display.oriented_size();
        if source_width == 0 || source_height == 0 || video_width == 0 || video_height == 0 {
            return Err(CaptureError::InvalidGeometry {
                width: source_width,
                height: source_height,
            });
        }

        let (width, height) = if rotate {
            (video_height, video_width)
        } else {
            (video_width, video_height)
        };
        // height > width * (source_height / source_width), in integers
        let (out_width, out_height) = if u64::from(height) * u64::from(source_width)
            > u64::from(width) * u64::from(source_height)
        {
            // limited by width
            let h = u64::from(width) * u64::from(source_height) / u64::from(source_width);
            (width, h as u32)
        } else {
            let w = u64::from(height) * u64::from(source_width) / u64::from(source_height);
            (w as u32, height)
        };
        let content = Rect {
            x: (width - out_width) / 2,
            y: (height - out_height) / 2,
            width: out_width,
            height: out_height,
        };

        Ok(Self {
            source: Rect {
                x: 0,
                y: 0,
                width: source_width,
                height: source_height,
            },
            frame_width: video_width,
            frame_height: video_height,
            content,
            orientation: if rotate {
                Orientation::Deg90
            } else {
                Orientation::Deg0
            },
        })
    }

    /// Content area in encoder frame coordinates.
    pub fn frame_rect(&self) -> Rect {
        if self.orientation.is_rotated() {
            Rect {
                x: self.content.y,
                y: self.content.x,
                width: self.content.height,
                height: self.content.width,
            }
        } else {
            self.content
        }
    }
}

/// Something that can be recorded.
pub trait CaptureSource: Send {
    fn display_info(&self) -> Result<DisplayInfo, CaptureError>;

    /// Start producing frames into `surface`.
    fn attach(&mut self, surface: InputSurface, projection: Projection)
        -> Result<(), CaptureError>;

    /// Stop producing frames. Safe to call when not attached.
    fn detach(&mut self);
}

const BAR_COLORS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
    [16, 16, 16],
];

/// Render one RGB frame: black borders, scrolling colour bars in the content
/// area.
pub fn render_test_pattern(projection: &Projection, frame_index: u64) -> Vec<u8> {
    let width = projection.frame_width as usize;
    let height = projection.frame_height as usize;
    let rect = projection.frame_rect();
    let mut data = vec![0u8; width * height * 3];
    if rect.width == 0 || rect.height == 0 {
        return data;
    }

    let bar_width = (rect.width as usize / BAR_COLORS.len()).max(1);
    let shift = (frame_index as usize * 4) % rect.width as usize;
    let mut row = Vec::with_capacity(rect.width as usize * 3);
    for x in 0..rect.width as usize {
        let bar = ((x + shift) / bar_width) % BAR_COLORS.len();
        row.extend_from_slice(&BAR_COLORS[bar]);
    }

    let x0 = rect.x as usize * 3;
    for y in rect.y as usize..(rect.y + rect.height).min(projection.frame_height) as usize {
        let start = y * width * 3 + x0;
        let end = (start + row.len()).min((y + 1) * width * 3);
        data[start..end].copy_from_slice(&row[..end - start]);
    }
    data
}

/// Synthetic display that paints a moving test pattern at the display's
/// refresh rate.
pub struct TestPatternDisplay {
    info: DisplayInfo,
    clock: Arc<dyn Clock>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<u64>>,
    surface: Option<InputSurface>,
}

impl TestPatternDisplay {
    pub fn new(info: DisplayInfo) -> Self {
        Self {
            info,
            clock: Arc::new(MonotonicClock),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
            surface: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl CaptureSource for TestPatternDisplay {
    fn display_info(&self) -> Result<DisplayInfo, CaptureError> {
        Ok(self.info)
    }

    fn attach(
        &mut self,
        surface: InputSurface,
        projection: Projection,
    ) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            return Err(CaptureError::AlreadyAttached);
        }
        let interval = Duration::from_secs_f32(1.0 / self.info.fps.max(1.0));
        let stop = Arc::clone(&self.stop);
        let clock = Arc::clone(&self.clock);
        let producer = surface.clone();
        stop.store(false, Ordering::Release);

        let handle = thread::Builder::new()
            .name("test-pattern".to_string())
            .spawn(move || {
                let mut frames = 0u64;
                let mut next = Instant::now();
                while !stop.load(Ordering::Acquire) {
                    let data = render_test_pattern(&projection, frames);
                    let frame = VideoFrame::from_rgb(
                        projection.frame_width,
                        projection.frame_height,
                        data,
                        clock.now_us(),
                    );
                    if !producer.submit(frame) {
                        break;
                    }
                    frames += 1;
                    next += interval;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
                frames
            })?;

        info!(
            "capture: {}x{} content at ({}, {}) in {}x{} frame",
            projection.content.width,
            projection.content.height,
            projection.content.x,
            projection.content.y,
            projection.frame_width,
            projection.frame_height
        );
        self.worker = Some(handle);
        self.surface = Some(surface);
        Ok(())
    }

    fn detach(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        let frames = handle.join().unwrap_or(0);
        let dropped = self.surface.take().map_or(0, |s| s.dropped_frames());
        debug!("capture: produced {} frames, {} dropped", frames, dropped);
    }
}

impl Drop for TestPatternDisplay {
    fn drop(&mut self) {
        self.detach();
    }
}

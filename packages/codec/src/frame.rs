//! Raw video frames delivered to an input surface.

use crate::{CodecError, PixelFormat};

/// A raw video frame with packed pixel data.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format of the frame data.
    pub pixel_format: PixelFormat,
    /// Raw pixel data.
    pub data: Vec<u8>,
    /// Capture timestamp in microseconds, 0 if the producer has none.
    pub pts_us: i64,
}

impl VideoFrame {
    /// Create a new video frame.
    #[must_use]
    pub fn new(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        data: Vec<u8>,
        pts_us: i64,
    ) -> Self {
        Self {
            width,
            height,
            pixel_format,
            data,
            pts_us,
        }
    }

    /// Create a frame from RGB data.
    #[must_use]
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>, pts_us: i64) -> Self {
        Self::new(width, height, PixelFormat::Rgb, data, pts_us)
    }

    /// Create a frame from RGBA data.
    #[must_use]
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>, pts_us: i64) -> Self {
        Self::new(width, height, PixelFormat::Rgba, data, pts_us)
    }

    /// Expected data size for the current dimensions and pixel format.
    #[must_use]
    pub fn expected_data_size(&self) -> usize {
        expected_frame_size(self.width, self.height, self.pixel_format)
    }

    /// Check that the payload matches the declared geometry.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.width == 0 || self.height == 0 {
            return Err(CodecError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        if self.data.len() != self.expected_data_size() {
            return Err(CodecError::ConversionError(format!(
                "{:?} data size mismatch: expected {}, got {}",
                self.pixel_format,
                self.expected_data_size(),
                self.data.len()
            )));
        }
        Ok(())
    }

    /// Convert this frame to packed RGB.
    ///
    /// If the frame is already RGB, returns a clone.
    pub fn to_rgb(&self) -> Result<VideoFrame, CodecError> {
        self.validate()?;
        match self.pixel_format {
            PixelFormat::Rgb => Ok(self.clone()),
            PixelFormat::Rgba => Ok(VideoFrame::from_rgb(
                self.width,
                self.height,
                rgba_to_rgb(&self.data),
                self.pts_us,
            )),
        }
    }
}

/// Calculate expected frame size for given dimensions and format.
#[must_use]
pub fn expected_frame_size(width: u32, height: u32, format: PixelFormat) -> usize {
    width as usize * height as usize * format.bytes_per_pixel()
}

fn rgba_to_rgb(rgba: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(rgba.len() / 4 * 3);
    for px in rgba.chunks_exact(4) {
        rgb.extend_from_slice(&px[..3]);
    }
    rgb
}

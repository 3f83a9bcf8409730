//! Frame buffer and the sink contract frames are handed to.

use crate::{DriftError, Result, Rgba};

/// Error returned by a [`FrameSink`]
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Destination for completed frames (image encoder, display blit, wallpaper
/// setter, ...).
///
/// `pixels` is row-major packed RGBA, `width * height * 4` bytes. A sink
/// error stops the frame loop; it is never retried.
pub trait FrameSink {
    fn emit(&mut self, pixels: &[u8], width: u32, height: u32) -> std::result::Result<(), SinkError>;
}

impl<F> FrameSink for F
where
    F: FnMut(&[u8], u32, u32) -> std::result::Result<(), SinkError>,
{
    fn emit(&mut self, pixels: &[u8], width: u32, height: u32) -> std::result::Result<(), SinkError> {
        self(pixels, width, height)
    }
}

/// Row-major RGBA frame, allocated once and overwritten every frame
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    pixels: Vec<Rgba>,
    width: u32,
    height: u32,
}

impl FrameBuffer {
    /// Allocate a zeroed frame, reporting allocation failure instead of aborting
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let len = width as usize * height as usize;
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(len)
            .map_err(|source| DriftError::Allocation { what: "frame buffer", source })?;
        pixels.resize(len, [0; 4]);
        Ok(Self { pixels, width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[Rgba] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [Rgba] {
        &mut self.pixels
    }

    /// Pixels of rows `[start, start + count)`
    pub fn rows_mut(&mut self, start: u32, count: u32) -> &mut [Rgba] {
        let w = self.width as usize;
        let begin = start as usize * w;
        &mut self.pixels[begin..begin + count as usize * w]
    }

    pub fn get(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.pixels[pixel_index(self.width, x, y)])
    }

    /// Packed RGBA bytes, as handed to a [`FrameSink`]
    pub fn as_bytes(&self) -> &[u8] {
        self.pixels.as_flattened()
    }
}

fn pixel_index(width: u32, x: u32, y: u32) -> usize {
    y as usize * width as usize + x as usize
}

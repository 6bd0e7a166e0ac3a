//! Frames handed to the compositor by the image pipeline.
//!
//! A [`Frame`] is a tightly packed 4-byte-per-pixel buffer with a known channel
//! order. Format negotiation happens before hand-off; the compositor only ever
//! blends frames that share a size and a format.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use image::RgbaImage;

use crate::error::Error;

/// Identifies one physical display driven by the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisplayId(pub u32);

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "display-{}", self.0)
    }
}

/// Channel order of a frame's pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        4
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Rgba8 => "rgba8",
            Self::Bgra8 => "bgra8",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub const fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Process-unique identity of a frame's pixel content.
///
/// Writing through [`Frame::pixels_mut`] assigns a fresh id, so caches keyed by
/// `FrameId` (such as uploaded GPU textures) never serve stale pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u64);

impl FrameId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Pixel data plus its logical size, device-pixel-ratio and format.
#[derive(Clone)]
pub struct Frame {
    id: FrameId,
    size: FrameSize,
    device_pixel_ratio: f32,
    format: PixelFormat,
    pixels: Vec<u8>,
}

impl Frame {
    /// Wraps a decoded pixel buffer.
    ///
    /// # Errors
    /// Returns [`Error::FrameSize`] if `pixels` is not exactly
    /// `width * height * 4` bytes long.
    pub fn new(
        size: FrameSize,
        device_pixel_ratio: f32,
        format: PixelFormat,
        pixels: Vec<u8>,
    ) -> Result<Self, Error> {
        let expected = size.pixel_count() * format.bytes_per_pixel();
        if pixels.len() != expected {
            return Err(Error::FrameSize {
                width: size.width,
                height: size.height,
                format,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            id: FrameId::next(),
            size,
            device_pixel_ratio: sanitize_dpr(device_pixel_ratio),
            format,
            pixels,
        })
    }

    /// A zero-filled frame, used for freshly allocated pool surfaces.
    pub fn zeroed(size: FrameSize, format: PixelFormat) -> Self {
        Self {
            id: FrameId::next(),
            size,
            device_pixel_ratio: 1.0,
            format,
            pixels: vec![0; size.pixel_count() * format.bytes_per_pixel()],
        }
    }

    /// A frame filled with a single colour given in the frame's channel order.
    pub fn solid(size: FrameSize, format: PixelFormat, texel: [u8; 4]) -> Self {
        let mut frame = Self::zeroed(size, format);
        for px in frame.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&texel);
        }
        frame
    }

    pub fn from_rgba_image(image: RgbaImage, device_pixel_ratio: f32) -> Self {
        let size = FrameSize::new(image.width(), image.height());
        Self {
            id: FrameId::next(),
            size,
            device_pixel_ratio: sanitize_dpr(device_pixel_ratio),
            format: PixelFormat::Rgba8,
            pixels: image.into_raw(),
        }
    }

    /// Converts to an `RgbaImage`, swizzling BGRA content.
    pub fn to_rgba_image(&self) -> Option<RgbaImage> {
        let mut pixels = self.pixels.clone();
        if self.format == PixelFormat::Bgra8 {
            for px in pixels.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
        }
        RgbaImage::from_raw(self.size.width, self.size.height, pixels)
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    pub fn device_pixel_ratio(&self) -> f32 {
        self.device_pixel_ratio
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// Mutable access to the pixel buffer. Assigns a new [`FrameId`].
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        self.id = FrameId::next();
        &mut self.pixels
    }

    pub(crate) fn set_device_pixel_ratio(&mut self, dpr: f32) {
        self.device_pixel_ratio = sanitize_dpr(dpr);
    }

    /// Whether two frames can be blended texel-for-texel.
    pub fn is_compatible_with(&self, other: &Frame) -> bool {
        self.size == other.size && self.format == other.format && !self.size.is_empty()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("device_pixel_ratio", &self.device_pixel_ratio)
            .field("format", &self.format)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

fn sanitize_dpr(dpr: f32) -> f32 {
    if dpr.is_finite() && dpr > 0.0 { dpr } else { 1.0 }
}

//! Pixel buffer storage and rectangle-scoped pixel access.

use crate::BYTES_PER_PIXEL;
use common::color::Color;
use common::error::{PaintError, PaintResult};
use common::geometry::Rect;

/// Pixel buffer in RGBA8 format (4 bytes per pixel, row-major).
#[derive(Clone)]
pub struct PixelBuffer {
    /// Width in pixels.
    width: u32,
    /// Height in pixels.
    height: u32,
    /// RGBA pixel data.
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Create a fully transparent buffer.
    pub fn new(width: u32, height: u32) -> Self {
        let size = width as usize * height as usize * BYTES_PER_PIXEL;
        Self {
            width,
            height,
            data: vec![0; size],
        }
    }

    /// Wrap existing pixel data. `data` must hold exactly
    /// `width * height * 4` bytes.
    pub fn from_parts(width: u32, height: u32, data: Vec<u8>) -> PaintResult<Self> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if data.len() != expected {
            return Err(PaintError::invalid(format!(
                "pixel data length {} does not match {}x{} buffer",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self { width, height, data })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// The full buffer rectangle.
    #[inline]
    pub fn bounds(&self) -> Rect {
        Rect::from_size(self.width, self.height)
    }

    /// Total size of the pixel data in bytes.
    #[inline]
    pub fn bytes_total(&self) -> usize {
        self.data.len()
    }

    /// Get as raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    pub(crate) fn row_stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    /// Clear to transparent.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Clear a rectangle to transparent.
    pub fn clear_rect(&mut self, rect: Rect) {
        let Some(rect) = rect.intersection(&self.bounds()) else {
            return;
        };
        let stride = self.row_stride();
        let x0 = rect.x as usize * BYTES_PER_PIXEL;
        let len = rect.width as usize * BYTES_PER_PIXEL;
        for y in rect.y..rect.bottom() {
            let start = y as usize * stride + x0;
            self.data[start..start + len].fill(0);
        }
    }

    /// Fill with a color.
    pub fn fill(&mut self, color: Color) {
        for chunk in self.data.chunks_exact_mut(BYTES_PER_PIXEL) {
            chunk.copy_from_slice(&color.to_bytes());
        }
    }

    /// Fill a rectangle with a color.
    pub fn fill_rect(&mut self, rect: Rect, color: Color) {
        let Some(rect) = rect.intersection(&self.bounds()) else {
            return;
        };
        let stride = self.row_stride();
        let x0 = rect.x as usize * BYTES_PER_PIXEL;
        let len = rect.width as usize * BYTES_PER_PIXEL;
        let bytes = color.to_bytes();
        for y in rect.y..rect.bottom() {
            let start = y as usize * stride + x0;
            for chunk in self.data[start..start + len].chunks_exact_mut(BYTES_PER_PIXEL) {
                chunk.copy_from_slice(&bytes);
            }
        }
    }

    /// Get pixel at position. Out-of-range reads transparent.
    pub fn get_pixel(&self, x: u32, y: u32) -> Color {
        if x >= self.width || y >= self.height {
            return Color::TRANSPARENT;
        }

        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        Color::rgba(
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        )
    }

    /// Set pixel at position. Out-of-range writes are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, color: Color) {
        if x >= self.width || y >= self.height {
            return;
        }

        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        self.data[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&color.to_bytes());
    }

    /// Read the pixels of `rect` (intersected with the buffer bounds) into a
    /// contiguous byte vector, row by row.
    pub fn read_rect(&self, rect: Rect) -> Vec<u8> {
        let Some(rect) = rect.intersection(&self.bounds()) else {
            return Vec::new();
        };
        let stride = self.row_stride();
        let x0 = rect.x as usize * BYTES_PER_PIXEL;
        let len = rect.width as usize * BYTES_PER_PIXEL;
        let mut out = Vec::with_capacity(rect.height as usize * len);
        for y in rect.y..rect.bottom() {
            let start = y as usize * stride + x0;
            out.extend_from_slice(&self.data[start..start + len]);
        }
        out
    }

    /// Overwrite the pixels of `rect` (intersected with the buffer bounds)
    /// from a contiguous byte vector produced by [`read_rect`].
    ///
    /// [`read_rect`]: PixelBuffer::read_rect
    pub fn write_rect(&mut self, rect: Rect, bytes: &[u8]) -> PaintResult<()> {
        let Some(rect) = rect.intersection(&self.bounds()) else {
            return Ok(());
        };
        let expected = rect.area() as usize * BYTES_PER_PIXEL;
        if bytes.len() != expected {
            return Err(PaintError::invalid(format!(
                "expected {} bytes for {}x{} rect, got {}",
                expected,
                rect.width,
                rect.height,
                bytes.len()
            )));
        }
        let stride = self.row_stride();
        let x0 = rect.x as usize * BYTES_PER_PIXEL;
        let len = rect.width as usize * BYTES_PER_PIXEL;
        for (row, y) in (rect.y..rect.bottom()).enumerate() {
            let start = y as usize * stride + x0;
            self.data[start..start + len].copy_from_slice(&bytes[row * len..(row + 1) * len]);
        }
        Ok(())
    }

    /// Copy the pixels of `rect` from another buffer of the same dimensions
    /// into this one, replacing (not blending) the destination pixels.
    pub fn copy_rect_from(&mut self, source: &PixelBuffer, rect: Rect) {
        let Some(rect) = rect
            .intersection(&self.bounds())
            .and_then(|r| r.intersection(&source.bounds()))
        else {
            return;
        };
        let dst_stride = self.row_stride();
        let src_stride = source.row_stride();
        let dst_x0 = rect.x as usize * BYTES_PER_PIXEL;
        let src_x0 = rect.x as usize * BYTES_PER_PIXEL;
        let len = rect.width as usize * BYTES_PER_PIXEL;
        for y in rect.y..rect.bottom() {
            let d = y as usize * dst_stride + dst_x0;
            let s = y as usize * src_stride + src_x0;
            self.data[d..d + len].copy_from_slice(&source.data[s..s + len]);
        }
    }

    /// Whole-buffer copy from another buffer with identical dimensions.
    pub fn copy_from(&mut self, source: &PixelBuffer) -> PaintResult<()> {
        if source.width != self.width || source.height != self.height {
            return Err(PaintError::invalid(format!(
                "cannot copy {}x{} buffer into {}x{} buffer",
                source.width, source.height, self.width, self.height
            )));
        }
        self.data.copy_from_slice(&source.data);
        Ok(())
    }

    /// Produce a nearest-neighbor resampled copy at the given dimensions.
    pub fn resized(&self, width: u32, height: u32) -> PixelBuffer {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let mut out = PixelBuffer::new(width, height);
        if self.width == 0 || self.height == 0 {
            return out;
        }
        let src_stride = self.row_stride();
        let dst_stride = out.row_stride();
        for y in 0..height as usize {
            let sy = y * self.height as usize / height as usize;
            let src_row = &self.data[sy * src_stride..sy * src_stride + src_stride];
            let dst_row = &mut out.data[y * dst_stride..y * dst_stride + dst_stride];
            for x in 0..width as usize {
                let sx = x * self.width as usize / width as usize;
                dst_row[x * BYTES_PER_PIXEL..(x + 1) * BYTES_PER_PIXEL]
                    .copy_from_slice(&src_row[sx * BYTES_PER_PIXEL..(sx + 1) * BYTES_PER_PIXEL]);
            }
        }
        out
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

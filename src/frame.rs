//! Normalisation of submitted pixel data into RGBA frames
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::{Error, GifResult};

/// Layout of raw pixel buffers handed to the session
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba,
    Argb,
    Rgb,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba | PixelFormat::Argb => 4,
            PixelFormat::Rgb => 3,
        }
    }

    #[inline]
    fn to_rgba(self, px: &[u8]) -> [u8; 4] {
        match self {
            PixelFormat::Rgba => [px[0], px[1], px[2], px[3]],
            PixelFormat::Argb => [px[1], px[2], px[3], px[0]],
            PixelFormat::Rgb => [px[0], px[1], px[2], 0xFF],
        }
    }
}

/// Owned, contiguous RGBA image
#[derive(Debug, Clone, PartialEq)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[u8; 4]>,
}

impl RgbaFrame {
    pub fn new(width: u32, height: u32, pixels: Vec<[u8; 4]>) -> GifResult<RgbaFrame> {
        check_dimensions(width, height)?;
        if pixels.len() != width as usize * height as usize {
            return Err(Error::InvalidInput(format!(
                "{}x{} frame needs {} pixels, got {}",
                width,
                height,
                width as usize * height as usize,
                pixels.len()
            )));
        }
        Ok(RgbaFrame { width, height, pixels })
    }

    /// Copies a caller-owned buffer, honouring the row stride
    pub fn from_raw(format: PixelFormat, width: u32, height: u32, stride: usize, buf: &[u8]) -> GifResult<RgbaFrame> {
        check_dimensions(width, height)?;
        let bpp = format.bytes_per_pixel();
        let row_len = width as usize * bpp;
        if stride < row_len {
            return Err(Error::InvalidInput(format!(
                "stride {} is smaller than a row of {} bytes",
                stride, row_len
            )));
        }
        let needed = stride * (height as usize - 1) + row_len;
        if buf.len() < needed {
            return Err(Error::InvalidInput(format!(
                "buffer of {} bytes is too small for {}x{} pixels with stride {}",
                buf.len(), width, height, stride
            )));
        }
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for row in buf.chunks(stride).take(height as usize) {
            pixels.extend(row[..row_len].chunks_exact(bpp).map(|px| format.to_rgba(px)));
        }
        Ok(RgbaFrame { width, height, pixels })
    }

    /// Reads and decodes a PNG file from disk
    pub fn from_png_file(path: &Path) -> GifResult<RgbaFrame> {
        let file = File::open(path)?;
        let mut decoder = png::Decoder::new(BufReader::new(file));
        decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
        let mut reader = decoder.read_info()?;
        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf)?;
        let data = &buf[..info.buffer_size()];
        let (width, height) = (info.width, info.height);
        check_dimensions(width, height)?;

        let pixels: Vec<[u8; 4]> = match info.color_type {
            png::ColorType::Rgba => data.chunks_exact(4).map(|p| [p[0], p[1], p[2], p[3]]).collect(),
            png::ColorType::Rgb => data.chunks_exact(3).map(|p| [p[0], p[1], p[2], 0xFF]).collect(),
            png::ColorType::GrayscaleAlpha => data.chunks_exact(2).map(|p| [p[0], p[0], p[0], p[1]]).collect(),
            png::ColorType::Grayscale => data.iter().map(|&v| [v, v, v, 0xFF]).collect(),
            png::ColorType::Indexed => {
                return Err(Error::Png(format!("{}: palette was not expanded", path.display())))
            }
        };
        RgbaFrame::new(width, height, pixels)
    }

    pub fn has_transparency(&self) -> bool {
        self.pixels.iter().any(|px| px[3] < 0xFF)
    }
}

fn check_dimensions(width: u32, height: u32) -> GifResult<()> {
    if width == 0 || height == 0 {
        return Err(Error::InvalidInput(format!("invalid frame size {}x{}", width, height)));
    }
    if width > u32::from(u16::MAX) || height > u32::from(u16::MAX) {
        return Err(Error::InvalidInput(format!(
            "frame size {}x{} exceeds the GIF limit of 65535",
            width, height
        )));
    }
    Ok(())
}

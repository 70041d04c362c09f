//! Fixed-size drawing surface with letterboxing.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, ImageBuffer, Rgba, RgbaImage};

use crate::decode::RgbaFrame;
use crate::error::{MediaError, MediaResult};

const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Largest even-sized box with the source aspect ratio that fits within
/// `max_width`x`max_height`.
pub fn fit_within(src_width: u32, src_height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if src_width == 0 || src_height == 0 {
        return (even(max_width), even(max_height));
    }
    let scale = f64::min(
        max_width as f64 / src_width as f64,
        max_height as f64 / src_height as f64,
    );
    let w = (src_width as f64 * scale).round() as u32;
    let h = (src_height as f64 * scale).round() as u32;
    (even(w.min(max_width)), even(h.min(max_height)))
}

/// Landscape dimensions swapped for portrait content.
pub fn oriented(width: u32, height: u32, portrait: bool) -> (u32, u32) {
    let (long, short) = (width.max(height), width.min(height));
    if portrait {
        (short, long)
    } else {
        (long, short)
    }
}

fn even(v: u32) -> u32 {
    (v & !1).max(2)
}

/// RGBA canvas cleared to black.
#[derive(Debug, Clone)]
pub struct Canvas {
    image: RgbaImage,
    /// Size of the last drawn picture; bars only need clearing when it changes
    last_drawn: Option<(u32, u32)>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: ImageBuffer::from_pixel(width, height, BLACK),
            last_drawn: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Draw `frame` centered, scaled to fit while keeping its aspect ratio.
    /// Uncovered areas stay black.
    pub fn draw(&mut self, frame: &RgbaFrame) -> MediaResult<()> {
        let source: RgbaImage = ImageBuffer::from_raw(frame.width, frame.height, frame.data.clone())
            .ok_or_else(|| MediaError::invalid_video("frame buffer size mismatch"))?;

        let (fit_w, fit_h) = fit_within(frame.width, frame.height, self.width(), self.height());
        let scaled = if (fit_w, fit_h) == (frame.width, frame.height) {
            source
        } else {
            imageops::resize(&source, fit_w, fit_h, FilterType::Triangle)
        };

        if self.last_drawn.is_some_and(|d| d != scaled.dimensions()) {
            for pixel in self.image.pixels_mut() {
                *pixel = BLACK;
            }
        }
        self.last_drawn = Some(scaled.dimensions());

        let x = i64::from((self.width() - scaled.width()) / 2);
        let y = i64::from((self.height() - scaled.height()) / 2);
        imageops::replace(&mut self.image, &scaled, x, y);
        Ok(())
    }

    /// Raw RGBA pixels of the canvas.
    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Encode the canvas as a baseline JPEG.
    pub fn encode_jpeg(&self, quality: u8) -> MediaResult<Vec<u8>> {
        let rgb = image::DynamicImage::ImageRgba8(self.image.clone()).to_rgb8();
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, quality).encode(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ColorType::Rgb8,
        )?;
        Ok(bytes)
    }
}

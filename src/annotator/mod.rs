//! StreamAnnotator - Region Overlay Rendering
//!
//! ## Responsibilities
//!
//! - Draw detection boxes and labels onto a frame copy
//! - JPEG-encode annotated frames for the preview stream
//!
//! Pure read path over FrameCache: no state of its own. A frame with no
//! detection yet is streamed unmodified.

use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb};

use crate::error::{Error, Result};
use crate::frame_cache::FrameCache;
use crate::models::{Frame, Region};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_BG: Rgb<u8> = Rgb([0, 0, 0]);

/// Copy a frame and overlay its detection regions
pub fn annotate(frame: &Frame, regions: &[Region]) -> Frame {
    let mut image: ImageBuffer<Rgb<u8>, Vec<u8>> =
        match ImageBuffer::from_vec(frame.width, frame.height, frame.data.clone()) {
            Some(image) => image,
            None => return frame.clone(),
        };

    for region in regions {
        let b = &region.bbox;
        let left = b.x1.round() as i32;
        let top = b.y1.round() as i32;
        let right = b.x2.round() as i32;
        let bottom = b.y2.round() as i32;
        draw_rectangle(&mut image, left, top, right, bottom, BOX_COLOR);

        let text = format!("{} {:.0}%", region.label, region.confidence * 100.0);
        let label_y = (top - 9).max(0);
        let text_width = text.chars().count() as i32 * 6;
        fill_rect(&mut image, left, label_y, left + text_width, label_y + 8, LABEL_BG);
        draw_label(&mut image, left + 1, label_y + 1, &text, BOX_COLOR);
    }

    Frame {
        width: frame.width,
        height: frame.height,
        data: image.into_raw(),
        captured_at: frame.captured_at,
    }
}

/// JPEG-encode an RGB frame for the preview transport
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let image: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_vec(frame.width, frame.height, frame.data.clone())
            .ok_or_else(|| Error::Internal("frame buffer does not match dimensions".into()))?;
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(&image)
        .map_err(|e| Error::Internal(format!("JPEG encode failed: {}", e)))?;
    Ok(buffer)
}

/// Live preview renderer over a session's FrameCache
pub struct StreamAnnotator {
    cache: Arc<FrameCache>,
    jpeg_quality: u8,
}

impl StreamAnnotator {
    pub fn new(cache: Arc<FrameCache>, jpeg_quality: u8) -> Self {
        Self {
            cache,
            jpeg_quality,
        }
    }

    /// Latest frame with the most recent regions drawn, JPEG-encoded
    ///
    /// `None` until the first raw frame arrives; the raw frame passes
    /// through unmodified while no detection has run.
    pub async fn render(&self) -> Result<Option<Vec<u8>>> {
        let Some((frame, regions)) = self.cache.snapshot().await else {
            return Ok(None);
        };
        let rendered = if regions.is_empty() {
            encode_jpeg(&frame, self.jpeg_quality)?
        } else {
            encode_jpeg(&annotate(&frame, &regions), self.jpeg_quality)?
        };
        Ok(Some(rendered))
    }
}

fn draw_rectangle(
    image: &mut ImageBuffer<Rgb<u8>, Vec<u8>>,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let left = left.clamp(0, width.saturating_sub(1));
    let right = right.clamp(0, width.saturating_sub(1));
    let top = top.clamp(0, height.saturating_sub(1));
    let bottom = bottom.clamp(0, height.saturating_sub(1));

    for x in left..=right {
        *image.get_pixel_mut(x as u32, top as u32) = color;
        *image.get_pixel_mut(x as u32, bottom as u32) = color;
    }
    for y in top..=bottom {
        *image.get_pixel_mut(left as u32, y as u32) = color;
        *image.get_pixel_mut(right as u32, y as u32) = color;
    }
}

fn fill_rect(
    image: &mut ImageBuffer<Rgb<u8>, Vec<u8>>,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let left = left.clamp(0, width.saturating_sub(1));
    let right = right.clamp(0, width.saturating_sub(1));
    let top = top.clamp(0, height.saturating_sub(1));
    let bottom = bottom.clamp(0, height.saturating_sub(1));

    for y in top..=bottom {
        for x in left..=right {
            *image.get_pixel_mut(x as u32, y as u32) = color;
        }
    }
}

fn draw_label(
    image: &mut ImageBuffer<Rgb<u8>, Vec<u8>>,
    mut x: i32,
    y: i32,
    text: &str,
    color: Rgb<u8>,
) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = y + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        let px = x + col;
                        if px >= 0 && px < width {
                            *image.get_pixel_mut(px as u32, py as u32) = color;
                        }
                    }
                }
            }
        }
        x += 6;
    }
}

/// 5x7 bitmap glyphs for label text
fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'A' => Some([0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
        'B' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110]),
        'C' => Some([0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110]),
        'D' => Some([0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110]),
        'E' => Some([0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111]),
        'F' => Some([0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000]),
        'G' => Some([0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01110]),
        'H' => Some([0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
        'I' => Some([0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
        'J' => Some([0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100]),
        'K' => Some([0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001]),
        'L' => Some([0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111]),
        'M' => Some([0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001]),
        'N' => Some([0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001]),
        'O' => Some([0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110]),
        'P' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000]),
        'Q' => Some([0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101]),
        'R' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001]),
        'S' => Some([0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110]),
        'T' => Some([0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100]),
        'U' => Some([0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110]),
        'V' => Some([0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100]),
        'W' => Some([0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b11011, 0b10001]),
        'X' => Some([0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b01010, 0b10001]),
        'Y' => Some([0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100]),
        'Z' => Some([0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111]),
        '0' => Some([0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110]),
        '1' => Some([0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
        '2' => Some([0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111]),
        '3' => Some([0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110]),
        '4' => Some([0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010]),
        '5' => Some([0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110]),
        '6' => Some([0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110]),
        '7' => Some([0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000]),
        '8' => Some([0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110]),
        '9' => Some([0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100]),
        '%' => Some([0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000]),
        '.' => Some([0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100]),
        '-' => Some([0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000]),
        '_' => Some([0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b11111]),
        _ => None,
    }
}

//! Frame utilities: detection masking, mirroring, overlay rendering and
//! JPEG encoding
//!
//! Frames are RGB8 images. Recognition always works on a masked copy; the
//! display path draws overlays on its own copy.

use crate::error::Result;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use stinger_common::config::MaskRect;
use stinger_common::events::{BoundingBox, MatchResult};

/// One captured camera frame
pub type Frame = RgbImage;

/// JPEG quality used for published snapshots
pub const JPEG_QUALITY: u8 = 80;

const MATCH_COLOR: [u8; 3] = [0, 255, 136];
const UNKNOWN_COLOR: [u8; 3] = [255, 68, 68];
const OUTLINE_THICKNESS: i32 = 2;
const BRACKET_THICKNESS: i32 = 3;

/// Pixel bounds `(x1, y1, x2, y2)` (end-exclusive) covered by a mask on a
/// `width` x `height` frame, or `None` if the clamped region is empty
pub fn mask_pixel_bounds(mask: &MaskRect, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let (w, h) = (width as i64, height as i64);
    let x = (mask.x * width as f32) as i64;
    let y = (mask.y * height as f32) as i64;
    let mask_w = (mask.width * width as f32) as i64;
    let mask_h = (mask.height * height as f32) as i64;

    let x1 = x.max(0);
    let y1 = y.max(0);
    let x2 = (x + mask_w).min(w);
    let y2 = (y + mask_h).min(h);

    if x2 > x1 && y2 > y1 {
        Some((x1 as u32, y1 as u32, x2 as u32, y2 as u32))
    } else {
        None
    }
}

/// Copy of `frame` with every masked region set to black
pub fn apply_masks(frame: &Frame, masks: &[MaskRect]) -> Frame {
    let mut out = frame.clone();
    if masks.is_empty() {
        return out;
    }

    let (width, height) = out.dimensions();
    let stride = width as usize * 3;
    let pixels: &mut [u8] = &mut out;

    for mask in masks {
        let Some((x1, y1, x2, y2)) = mask_pixel_bounds(mask, width, height) else {
            continue;
        };
        for row in y1 as usize..y2 as usize {
            let start = row * stride + x1 as usize * 3;
            let end = row * stride + x2 as usize * 3;
            pixels[start..end].fill(0);
        }
    }

    out
}

/// Flip a frame left-to-right in place
pub fn mirror_horizontal(frame: &mut Frame) {
    image::imageops::flip_horizontal_in_place(frame);
}

/// Draw face boxes and corner brackets for the given results
///
/// Pass `mirrored = true` when `frame` has already been flipped so the boxes
/// (computed on the unflipped frame) line up with the faces.
pub fn draw_overlays(frame: &mut Frame, results: &[MatchResult], mirrored: bool) {
    let frame_width = frame.width();
    for result in results {
        let bbox = if mirrored {
            result.detection.bbox.mirrored(frame_width)
        } else {
            result.detection.bbox
        };
        let color = if result.is_match { MATCH_COLOR } else { UNKNOWN_COLOR };
        draw_face_box(frame, &bbox, color);
    }
}

fn draw_face_box(frame: &mut Frame, bbox: &BoundingBox, color: [u8; 3]) {
    let BoundingBox { x, y, width: w, height: h } = *bbox;
    if w <= 0 || h <= 0 {
        return;
    }

    // Outline
    let t = OUTLINE_THICKNESS;
    fill_rect(frame, x, y, x + w, y + t, color);
    fill_rect(frame, x, y + h - t, x + w, y + h, color);
    fill_rect(frame, x, y, x + t, y + h, color);
    fill_rect(frame, x + w - t, y, x + w, y + h, color);

    // Corner brackets
    let len = w.min(h) / 6;
    let t = BRACKET_THICKNESS;
    for (cx, dx) in [(x, 1), (x + w, -1)] {
        for (cy, dy) in [(y, 1), (y + h, -1)] {
            let (hx1, hx2) = ordered(cx, cx + dx * len);
            let (hy1, hy2) = ordered(cy, cy + dy * t);
            fill_rect(frame, hx1, hy1, hx2, hy2, color);

            let (vx1, vx2) = ordered(cx, cx + dx * t);
            let (vy1, vy2) = ordered(cy, cy + dy * len);
            fill_rect(frame, vx1, vy1, vx2, vy2, color);
        }
    }
}

fn ordered(a: i32, b: i32) -> (i32, i32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Fill the end-exclusive rectangle, clipped to the frame
fn fill_rect(frame: &mut Frame, x1: i32, y1: i32, x2: i32, y2: i32, color: [u8; 3]) {
    let (width, height) = (frame.width() as i32, frame.height() as i32);
    let (x1, x2) = (x1.clamp(0, width), x2.clamp(0, width));
    let (y1, y2) = (y1.clamp(0, height), y2.clamp(0, height));

    for py in y1..y2 {
        for px in x1..x2 {
            frame.put_pixel(px as u32, py as u32, image::Rgb(color));
        }
    }
}

/// Encode a frame as JPEG
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
        encoder.encode_image(frame)?;
    }
    Ok(buf)
}

//! Detection overlays drawn directly on RGB frame buffers.
//!
//! Boxes and labels are rasterized in-process so annotated frames can
//! go straight back into the encoder pipe without a filter graph.

use image::{Rgb, RgbImage};

use crate::detector::RawDetection;

/// Fixed annotation color, chosen to contrast on most footage.
pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Box outline thickness in pixels.
pub const BOX_THICKNESS: u32 = 2;

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const LABEL_SCALE: u32 = 2;

/// Draw all detections onto a frame: a 2 px rectangle per box plus a
/// `"{class} {confidence:.2}"` label above it.
pub fn draw_detections(img: &mut RgbImage, detections: &[RawDetection]) {
    for det in detections {
        let x = det.bbox.x.max(0.0) as u32;
        let y = det.bbox.y.max(0.0) as u32;
        let w = det.bbox.width.max(0.0) as u32;
        let h = det.bbox.height.max(0.0) as u32;

        draw_rect(img, x, y, w, h, BOX_THICKNESS, BOX_COLOR);

        let label = format!("{} {:.2}", det.class_name, det.confidence);
        let label_height = GLYPH_HEIGHT * LABEL_SCALE;
        // Above the box when there is room, inside it otherwise
        let label_y = y.saturating_sub(label_height + 4);
        draw_text(img, &label, x, label_y, LABEL_SCALE, BOX_COLOR);
    }
}

/// Draw a rectangle outline clipped to the image bounds.
pub fn draw_rect(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, thickness: u32, color: Rgb<u8>) {
    if w == 0 || h == 0 {
        return;
    }
    let (iw, ih) = (img.width(), img.height());
    let x2 = (x + w).min(iw);
    let y2 = (y + h).min(ih);

    for t in 0..thickness {
        // Horizontal edges
        for px in x..x2 {
            if y + t < ih {
                img.put_pixel(px, y + t, color);
            }
            if y2 > t + 1 && y2 - t - 1 < ih {
                img.put_pixel(px, y2 - t - 1, color);
            }
        }
        // Vertical edges
        for py in y..y2 {
            if x + t < iw {
                img.put_pixel(x + t, py, color);
            }
            if x2 > t + 1 && x2 - t - 1 < iw {
                img.put_pixel(x2 - t - 1, py, color);
            }
        }
    }
}

/// Draw text with a built-in 5x7 bitmap font, clipped to the image.
///
/// Covers lowercase letters, digits, space and dot, which is the full
/// alphabet of COCO labels and confidence values. Other characters
/// advance the cursor without drawing.
pub fn draw_text(img: &mut RgbImage, text: &str, x: u32, y: u32, scale: u32, color: Rgb<u8>) {
    let mut cursor = x;
    let advance = (GLYPH_WIDTH + 1) * scale;

    for ch in text.chars() {
        if let Some(glyph) = glyph_columns(ch.to_ascii_lowercase()) {
            for (col, bits) in glyph.iter().enumerate() {
                for row in 0..GLYPH_HEIGHT {
                    if bits & (1 << row) == 0 {
                        continue;
                    }
                    for sx in 0..scale {
                        for sy in 0..scale {
                            let px = cursor + col as u32 * scale + sx;
                            let py = y + row * scale + sy;
                            if px < img.width() && py < img.height() {
                                img.put_pixel(px, py, color);
                            }
                        }
                    }
                }
            }
        }
        cursor = cursor.saturating_add(advance);
    }
}

/// 5x7 glyph as column bytes, bit 0 = top row.
fn glyph_columns(ch: char) -> Option<[u8; 5]> {
    let glyph = match ch {
        ' ' => [0x00, 0x00, 0x00, 0x00, 0x00],
        '.' => [0x00, 0x60, 0x60, 0x00, 0x00],
        '0' => [0x3E, 0x51, 0x49, 0x45, 0x3E],
        '1' => [0x00, 0x42, 0x7F, 0x40, 0x00],
        '2' => [0x42, 0x61, 0x51, 0x49, 0x46],
        '3' => [0x21, 0x41, 0x45, 0x4B, 0x31],
        '4' => [0x18, 0x14, 0x12, 0x7F, 0x10],
        '5' => [0x27, 0x45, 0x45, 0x45, 0x39],
        '6' => [0x3C, 0x4A, 0x49, 0x49, 0x30],
        '7' => [0x01, 0x71, 0x09, 0x05, 0x03],
        '8' => [0x36, 0x49, 0x49, 0x49, 0x36],
        '9' => [0x06, 0x49, 0x49, 0x29, 0x1E],
        'a' => [0x20, 0x54, 0x54, 0x54, 0x78],
        'b' => [0x7F, 0x48, 0x44, 0x44, 0x38],
        'c' => [0x38, 0x44, 0x44, 0x44, 0x20],
        'd' => [0x38, 0x44, 0x44, 0x48, 0x7F],
        'e' => [0x38, 0x54, 0x54, 0x54, 0x18],
        'f' => [0x08, 0x7E, 0x09, 0x01, 0x02],
        'g' => [0x0C, 0x52, 0x52, 0x52, 0x3E],
        'h' => [0x7F, 0x08, 0x04, 0x04, 0x78],
        'i' => [0x00, 0x44, 0x7D, 0x40, 0x00],
        'j' => [0x20, 0x40, 0x44, 0x3D, 0x00],
        'k' => [0x7F, 0x10, 0x28, 0x44, 0x00],
        'l' => [0x00, 0x41, 0x7F, 0x40, 0x00],
        'm' => [0x7C, 0x04, 0x18, 0x04, 0x78],
        'n' => [0x7C, 0x08, 0x04, 0x04, 0x78],
        'o' => [0x38, 0x44, 0x44, 0x44, 0x38],
        'p' => [0x7C, 0x14, 0x14, 0x14, 0x08],
        'q' => [0x08, 0x14, 0x14, 0x18, 0x7C],
        'r' => [0x7C, 0x08, 0x04, 0x04, 0x08],
        's' => [0x48, 0x54, 0x54, 0x54, 0x20],
        't' => [0x04, 0x3F, 0x44, 0x40, 0x20],
        'u' => [0x3C, 0x40, 0x40, 0x20, 0x7C],
        'v' => [0x1C, 0x20, 0x40, 0x20, 0x1C],
        'w' => [0x3C, 0x40, 0x30, 0x40, 0x3C],
        'x' => [0x44, 0x28, 0x10, 0x28, 0x44],
        'y' => [0x0C, 0x50, 0x50, 0x50, 0x3C],
        'z' => [0x44, 0x64, 0x54, 0x4C, 0x44],
        _ => return None,
    };
    Some(glyph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdet_models::BoundingBox;

    fn blank(w: u32, h: u32) -> RgbImage {
        RgbImage::new(w, h)
    }

    #[test]
    fn test_draw_rect_paints_outline() {
        let mut img = blank(100, 100);
        draw_rect(&mut img, 10, 10, 40, 30, 2, BOX_COLOR);

        assert_eq!(*img.get_pixel(10, 10), BOX_COLOR);
        assert_eq!(*img.get_pixel(30, 10), BOX_COLOR);
        assert_eq!(*img.get_pixel(30, 39), BOX_COLOR);
        // Interior stays untouched
        assert_eq!(*img.get_pixel(30, 25), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_rect_clips_at_bounds() {
        let mut img = blank(20, 20);
        draw_rect(&mut img, 15, 15, 50, 50, 2, BOX_COLOR);
        // Must not panic and must paint inside the image only
        assert_eq!(*img.get_pixel(15, 15), BOX_COLOR);
    }

    #[test]
    fn test_draw_text_paints_pixels() {
        let mut img = blank(200, 40);
        draw_text(&mut img, "person 0.87", 0, 0, 2, BOX_COLOR);

        let painted = img.pixels().filter(|p| **p == BOX_COLOR).count();
        assert!(painted > 0);
    }

    #[test]
    fn test_draw_detections_clipped_box() {
        let mut img = blank(64, 64);
        let det = RawDetection {
            class_id: 0,
            class_name: "person",
            confidence: 0.9,
            bbox: BoundingBox::new(60.0, 60.0, 100.0, 100.0),
        };
        // Box extends beyond the frame; drawing must clip, not panic
        draw_detections(&mut img, &[det]);
    }
}

//! Screenshot overlays.
//!
//! Two strategies feed the vision tiers: numeric tag circles over clickable
//! elements, and a labeled N×N grid. Drawing always happens in the
//! screenshot's **physical** pixel space; the coordinate maps handed back to
//! the engine are always **logical**, so gestures land where the picture
//! shows. Many devices return screenshots at 2x-3x the window size and the
//! two spaces must never be mixed.

use std::collections::BTreeMap;

use crate::device::WindowSize;
use crate::errors::{TapwrightError, TapwrightResult};
use crate::geometry::{LogicalPoint, PhysicalPoint, ScaleFactor};
use crate::perception::types::UIElement;

const TAG_RADIUS: i32 = 20;
const TAG_FILL: [u8; 4] = [230, 60, 60, 230];
const WHITE: [u8; 4] = [255, 255, 255, 255];
const GRID_LINE: [u8; 4] = [0, 220, 255, 110];

/// Convert a 0-indexed column number to its label (0=A, 1=B .. 25=Z, 26=AA ..).
pub fn col_label(col: u32) -> String {
    if col < 26 {
        String::from(char::from(b'A' + col as u8))
    } else {
        format!("A{}", char::from(b'A' + (col - 26) as u8))
    }
}

/// Draw numbered circles over every clickable, visible, bounded element.
///
/// Tags are 1-indexed in traversal order. Returns the overlaid PNG bytes and
/// the tag -> element mapping. Elements without bounds never receive a tag.
pub fn draw_numeric_tags(
    png_bytes: &[u8],
    elements: &[UIElement],
    window: WindowSize,
) -> TapwrightResult<(Vec<u8>, BTreeMap<u32, UIElement>)> {
    let img = image::load_from_memory(png_bytes)
        .map_err(|e| TapwrightError::Perception(format!("load image: {e}")))?;
    let mut canvas = img.to_rgba8();
    let (w, h) = canvas.dimensions();
    let scale = ScaleFactor::from_dimensions((w, h), (window.width, window.height))?;

    let mut mapping = BTreeMap::new();
    let mut tag: u32 = 0;
    for element in elements.iter().filter(|e| e.taggable()) {
        let Some(bounds) = element.bounds else { continue };
        tag += 1;
        let center = scale.to_physical(bounds.center());
        draw_tag_circle(&mut canvas, center, tag);
        mapping.insert(tag, element.clone());
    }

    Ok((encode_png(canvas)?, mapping))
}

/// Compute the logical-space cell centers for an N×N grid over a screenshot
/// of the given physical dimensions.
///
/// Cell centers are found on the physical pixel grid and converted back to
/// logical coordinates by dividing by the per-axis scale, which keeps them
/// strictly inside the window on both axes even when the axes scale
/// differently.
pub fn grid_cell_centers(
    physical: (u32, u32),
    window: WindowSize,
    grid_size: u32,
) -> TapwrightResult<BTreeMap<String, LogicalPoint>> {
    let scale = ScaleFactor::from_dimensions(physical, (window.width, window.height))?;
    let cell_w = physical.0 as f64 / grid_size as f64;
    let cell_h = physical.1 as f64 / grid_size as f64;

    let mut map = BTreeMap::new();
    for row in 0..grid_size {
        for col in 0..grid_size {
            let center = PhysicalPoint {
                x: (col as f64 * cell_w + cell_w / 2.0).round() as u32,
                y: (row as f64 * cell_h + cell_h / 2.0).round() as u32,
            };
            let label = format!("{}{}", col_label(col), row + 1);
            map.insert(label, scale.to_logical(center));
        }
    }
    Ok(map)
}

/// Draw a labeled N×N grid onto the screenshot.
///
/// Returns the overlaid PNG bytes plus the label -> logical center map.
/// Line stroke and label size scale with the screenshot density so the grid
/// stays readable on 3x displays.
pub fn draw_grid(
    png_bytes: &[u8],
    window: WindowSize,
    grid_size: u32,
) -> TapwrightResult<(Vec<u8>, BTreeMap<String, LogicalPoint>)> {
    let img = image::load_from_memory(png_bytes)
        .map_err(|e| TapwrightError::Perception(format!("load image: {e}")))?;
    let mut canvas = img.to_rgba8();
    let (w, h) = canvas.dimensions();
    let scale = ScaleFactor::from_dimensions((w, h), (window.width, window.height))?;

    let cell_w = w as f64 / grid_size as f64;
    let cell_h = h as f64 / grid_size as f64;
    let stroke_v = ((2.0 * scale.x).round() as u32).max(2);
    let stroke_h = ((2.0 * scale.y).round() as u32).max(2);
    let label_scale = ((3.0 * scale.y).round() as u32).max(3);

    for col in 1..grid_size {
        let x = (col as f64 * cell_w).round() as u32;
        for dx in 0..stroke_v {
            let px = x + dx;
            if px >= w {
                break;
            }
            for y in 0..h {
                blend_pixel(canvas.get_pixel_mut(px, y), GRID_LINE);
            }
        }
    }
    for row in 1..grid_size {
        let y = (row as f64 * cell_h).round() as u32;
        for dy in 0..stroke_h {
            let py = y + dy;
            if py >= h {
                break;
            }
            for x in 0..w {
                blend_pixel(canvas.get_pixel_mut(x, py), GRID_LINE);
            }
        }
    }

    for row in 0..grid_size {
        for col in 0..grid_size {
            let label = format!("{}{}", col_label(col), row + 1);
            let x = (col as f64 * cell_w).round() as i32 + 4;
            let y = (row as f64 * cell_h).round() as i32 + 4;
            draw_label(&mut canvas, x, y, &label, label_scale);
        }
    }

    let map = grid_cell_centers((w, h), window, grid_size)?;
    Ok((encode_png(canvas)?, map))
}

// ── Drawing primitives ──────────────────────────────────────────────────────

fn encode_png(canvas: image::RgbaImage) -> TapwrightResult<Vec<u8>> {
    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(canvas)
        .write_to(
            &mut std::io::Cursor::new(&mut out),
            image::ImageFormat::Png,
        )
        .map_err(|e| TapwrightError::Perception(format!("PNG encode: {e}")))?;
    Ok(out)
}

/// Filled circle with a white ring and the tag numeral centered inside.
fn draw_tag_circle(canvas: &mut image::RgbaImage, center: PhysicalPoint, tag: u32) {
    let (w, h) = canvas.dimensions();
    let (cx, cy) = (center.x as i32, center.y as i32);
    let r = TAG_RADIUS;
    let ring_inner = (r - 2) * (r - 2);
    let r2 = r * r;

    for dy in -r..=r {
        for dx in -r..=r {
            let d2 = dx * dx + dy * dy;
            if d2 > r2 {
                continue;
            }
            let x = cx + dx;
            let y = cy + dy;
            if x < 0 || y < 0 || x as u32 >= w || y as u32 >= h {
                continue;
            }
            let colour = if d2 >= ring_inner { WHITE } else { TAG_FILL };
            blend_pixel(canvas.get_pixel_mut(x as u32, y as u32), colour);
        }
    }

    let text = tag.to_string();
    let glyph_scale = 2u32;
    let step = (5 * glyph_scale + 1) as i32;
    let text_w = text.len() as i32 * step - 1;
    let tx = cx - text_w / 2;
    let ty = cy - (5 * glyph_scale / 2) as i32;
    for (i, c) in text.chars().enumerate() {
        draw_glyph(canvas, c, tx + i as i32 * step, ty, WHITE, glyph_scale);
    }
}

/// Grid cell label: dark backing box with white glyphs on top.
fn draw_label(canvas: &mut image::RgbaImage, x: i32, y: i32, text: &str, scale: u32) {
    let (w, h) = canvas.dimensions();
    let char_step = 5 * scale + scale;
    let pad = scale;
    let label_w = text.len() as u32 * char_step + pad * 2;
    let label_h = 5 * scale + pad * 2;

    for dy in 0..label_h {
        for dx in 0..label_w {
            let px = x + dx as i32;
            let py = y + dy as i32;
            if px < 0 || py < 0 || px as u32 >= w || py as u32 >= h {
                continue;
            }
            let p = canvas.get_pixel_mut(px as u32, py as u32);
            p[0] = (p[0] as f32 * 0.25) as u8;
            p[1] = (p[1] as f32 * 0.25) as u8;
            p[2] = (p[2] as f32 * 0.25) as u8;
            p[3] = 255;
        }
    }

    for (i, c) in text.to_uppercase().chars().enumerate() {
        let gx = x + (pad + i as u32 * char_step) as i32;
        let gy = y + pad as i32;
        draw_glyph(canvas, c, gx, gy, WHITE, scale);
    }
}

/// Minimal 5×5 bitmap font renderer (digits and capitals).
fn draw_glyph(
    canvas: &mut image::RgbaImage,
    c: char,
    px: i32,
    py: i32,
    colour: [u8; 4],
    scale: u32,
) {
    let glyph = match c {
        '0'..='9' => MINI_FONT[(c as u8 - b'0') as usize],
        'A'..='Z' => MINI_FONT[10 + (c as u8 - b'A') as usize],
        _ => return,
    };
    let (w, h) = canvas.dimensions();
    for (row, &bits) in glyph.iter().enumerate() {
        for bit in 0..5u32 {
            if (bits >> (4 - bit)) & 1 == 0 {
                continue;
            }
            for sy in 0..scale {
                for sx in 0..scale {
                    let x = px + (bit * scale + sx) as i32;
                    let y = py + (row as u32 * scale + sy) as i32;
                    if x >= 0 && y >= 0 && (x as u32) < w && (y as u32) < h {
                        blend_pixel(canvas.get_pixel_mut(x as u32, y as u32), colour);
                    }
                }
            }
        }
    }
}

fn blend_pixel(pixel: &mut image::Rgba<u8>, colour: [u8; 4]) {
    let a = colour[3] as f32 / 255.0;
    pixel[0] = (pixel[0] as f32 * (1.0 - a) + colour[0] as f32 * a).round() as u8;
    pixel[1] = (pixel[1] as f32 * (1.0 - a) + colour[1] as f32 * a).round() as u8;
    pixel[2] = (pixel[2] as f32 * (1.0 - a) + colour[2] as f32 * a).round() as u8;
    pixel[3] = 255;
}

/// 5×5 bitmap glyphs for digits 0-9 and letters A-Z.
const MINI_FONT: [[u8; 5]; 36] = [
    [0b01110, 0b10001, 0b10001, 0b10001, 0b01110], // 0
    [0b00100, 0b01100, 0b00100, 0b00100, 0b01110], // 1
    [0b01110, 0b10001, 0b00110, 0b01000, 0b11111], // 2
    [0b11110, 0b00001, 0b00110, 0b00001, 0b11110], // 3
    [0b00110, 0b01010, 0b10010, 0b11111, 0b00010], // 4
    [0b11111, 0b10000, 0b11110, 0b00001, 0b11110], // 5
    [0b01110, 0b10000, 0b11110, 0b10001, 0b01110], // 6
    [0b11111, 0b00001, 0b00010, 0b00100, 0b00100], // 7
    [0b01110, 0b10001, 0b01110, 0b10001, 0b01110], // 8
    [0b01110, 0b10001, 0b01111, 0b00001, 0b01110], // 9
    [0b01110, 0b10001, 0b11111, 0b10001, 0b10001], // A
    [0b11110, 0b10001, 0b11110, 0b10001, 0b11110], // B
    [0b01110, 0b10000, 0b10000, 0b10000, 0b01110], // C
    [0b11100, 0b10010, 0b10001, 0b10010, 0b11100], // D
    [0b11111, 0b10000, 0b11110, 0b10000, 0b11111], // E
    [0b11111, 0b10000, 0b11110, 0b10000, 0b10000], // F
    [0b01110, 0b10000, 0b10011, 0b10001, 0b01110], // G
    [0b10001, 0b10001, 0b11111, 0b10001, 0b10001], // H
    [0b01110, 0b00100, 0b00100, 0b00100, 0b01110], // I
    [0b00111, 0b00010, 0b00010, 0b10010, 0b01100], // J
    [0b10001, 0b10010, 0b11100, 0b10010, 0b10001], // K
    [0b10000, 0b10000, 0b10000, 0b10000, 0b11111], // L
    [0b10001, 0b11011, 0b10101, 0b10001, 0b10001], // M
    [0b10001, 0b11001, 0b10101, 0b10011, 0b10001], // N
    [0b01110, 0b10001, 0b10001, 0b10001, 0b01110], // O
    [0b11110, 0b10001, 0b11110, 0b10000, 0b10000], // P
    [0b01110, 0b10001, 0b10101, 0b10010, 0b01101], // Q
    [0b11110, 0b10001, 0b11110, 0b10010, 0b10001], // R
    [0b01111, 0b10000, 0b01110, 0b00001, 0b11110], // S
    [0b11111, 0b00100, 0b00100, 0b00100, 0b00100], // T
    [0b10001, 0b10001, 0b10001, 0b10001, 0b01110], // U
    [0b10001, 0b10001, 0b10001, 0b01010, 0b00100], // V
    [0b10001, 0b10001, 0b10101, 0b11011, 0b10001], // W
    [0b10001, 0b01010, 0b00100, 0b01010, 0b10001], // X
    [0b10001, 0b01010, 0b00100, 0b00100, 0b00100], // Y
    [0b11111, 0b00010, 0b00100, 0b01000, 0b11111], // Z
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Bounds;
    use crate::perception::types::{ElementType, UIElement};

    fn blank_png(w: u32, h: u32) -> Vec<u8> {
        let canvas = image::RgbaImage::from_pixel(w, h, image::Rgba([10, 10, 10, 255]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgba8(canvas)
            .write_to(
                &mut std::io::Cursor::new(&mut out),
                image::ImageFormat::Png,
            )
            .unwrap();
        out
    }

    fn button(id: &str, bounds: Option<Bounds>, clickable: bool) -> UIElement {
        UIElement {
            element_id: id.to_string(),
            text: format!("btn {id}"),
            resource_id: None,
            class_name: Some("android.widget.Button".into()),
            content_desc: None,
            bounds,
            element_type: ElementType::Button,
            clickable,
            scrollable: false,
            focusable: true,
            long_clickable: false,
            checked: false,
            enabled: true,
            visible: true,
        }
    }

    #[test]
    fn col_labels() {
        assert_eq!(col_label(0), "A");
        assert_eq!(col_label(9), "J");
        assert_eq!(col_label(19), "T");
        assert_eq!(col_label(26), "AA");
    }

    #[test]
    fn numeric_tags_skip_ineligible_elements() {
        let png = blank_png(200, 400);
        let window = WindowSize {
            width: 100,
            height: 200,
        };
        let elements = vec![
            button("0", Some(Bounds::new(10, 10, 30, 30)), true),
            button("1", None, true),
            button("2", Some(Bounds::new(40, 40, 60, 60)), false),
            button("3", Some(Bounds::new(50, 100, 90, 140)), true),
        ];
        let (_, mapping) = draw_numeric_tags(&png, &elements, window).unwrap();
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping[&1].element_id, "0");
        assert_eq!(mapping[&2].element_id, "3");
    }

    #[test]
    fn zero_clickables_yield_empty_mapping() {
        let png = blank_png(100, 100);
        let window = WindowSize {
            width: 100,
            height: 100,
        };
        let (_, mapping) = draw_numeric_tags(&png, &[], window).unwrap();
        assert!(mapping.is_empty());
    }

    #[test]
    fn grid_map_high_dpi_iphone() {
        // 390x844 window with a 1284x2778 screenshot, the documented 3.3x case
        let window = WindowSize {
            width: 390,
            height: 844,
        };
        let map = grid_cell_centers((1284, 2778), window, 10).unwrap();
        assert_eq!(map.len(), 100);
        let e5 = map["E5"];
        assert_eq!(e5, LogicalPoint::new(175, 379));
    }

    #[test]
    fn grid_map_stays_inside_window() {
        let window = WindowSize {
            width: 390,
            height: 844,
        };
        for n in [5u32, 10, 20] {
            let map = grid_cell_centers((1170, 2532), window, n).unwrap();
            assert_eq!(map.len(), (n * n) as usize);
            for (label, p) in &map {
                assert!(p.x >= 0 && (p.x as u32) < window.width, "{label} x={}", p.x);
                assert!(p.y >= 0 && (p.y as u32) < window.height, "{label} y={}", p.y);
            }
            let last = format!("{}{}", col_label(n - 1), n);
            assert!(map.contains_key("A1"));
            assert!(map.contains_key(&last));
        }
    }

    #[test]
    fn grid_map_handles_per_axis_scale() {
        // 3x horizontal, 2x vertical
        let window = WindowSize {
            width: 100,
            height: 200,
        };
        let map = grid_cell_centers((300, 400), window, 10).unwrap();
        // A1 physical center (15, 20) -> logical (5, 10)
        assert_eq!(map["A1"], LogicalPoint::new(5, 10));
        // J10 physical center (285, 380) -> logical (95, 190)
        assert_eq!(map["J10"], LogicalPoint::new(95, 190));
    }

    #[test]
    fn grid_round_trip_within_one_unit() {
        let window = WindowSize {
            width: 390,
            height: 844,
        };
        let scale = ScaleFactor::from_dimensions((1284, 2778), (390, 844)).unwrap();
        let map = grid_cell_centers((1284, 2778), window, 10).unwrap();
        for p in map.values() {
            let back = scale.to_logical(scale.to_physical(*p));
            assert!((back.x - p.x).abs() <= 1);
            assert!((back.y - p.y).abs() <= 1);
        }
    }

    #[test]
    fn draw_grid_renders_and_maps() {
        let png = blank_png(200, 400);
        let window = WindowSize {
            width: 100,
            height: 200,
        };
        let (overlaid, map) = draw_grid(&png, window, 5).unwrap();
        assert_eq!(map.len(), 25);
        // Overlay must change the image
        assert_ne!(overlaid, png);
        let img = image::load_from_memory(&overlaid).unwrap();
        assert_eq!(img.width(), 200);
        assert_eq!(img.height(), 400);
    }

    #[test]
    fn zero_sized_image_is_unrecoverable() {
        let window = WindowSize {
            width: 100,
            height: 100,
        };
        assert!(grid_cell_centers((0, 100), window, 10).is_err());
    }
}

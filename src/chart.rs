// Raster charts embedded into the slides.
//
// The template reserves a picture frame for each chart and the slide decides
// the final size, so these only need the right aspect ratio and colours.
use std::f64::consts::PI;
use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};

use crate::error::Result;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([170, 170, 170]);

pub const BLUE: Rgb<u8> = Rgb([0x42, 0x85, 0xF4]);
pub const GREEN: Rgb<u8> = Rgb([0x34, 0xA8, 0x53]);

/// Slice colours, in legend order.
pub const PALETTE: [Rgb<u8>; 9] = [
    Rgb([0x42, 0x85, 0xF4]),
    Rgb([0xEA, 0x43, 0x35]),
    Rgb([0x34, 0xA8, 0x53]),
    Rgb([0x5F, 0x63, 0x68]),
    Rgb([0x00, 0xBC, 0xD4]),
    Rgb([0xFF, 0x98, 0x00]),
    Rgb([0x9C, 0x27, 0xB0]),
    Rgb([0x79, 0x55, 0x48]),
    Rgb([0xBD, 0xBD, 0xBD]),
];

/// 5.77in x 1.45in at 150 dpi.
pub const BAR_SIZE: (u32, u32) = (866, 218);
/// 6.2in x 1.55in at 150 dpi.
pub const DONUT_SIZE: (u32, u32) = (930, 233);

fn encode(img: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

fn fill_rect(img: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    for y in y0.min(h)..y1.min(h) {
        for x in x0.min(w)..x1.min(w) {
            img.put_pixel(x, y, color);
        }
    }
}

/// Weekly bar chart: one bar per value, baseline along the bottom.
pub fn bar_chart(values: &[f64], color: Rgb<u8>) -> Result<Vec<u8>> {
    let (w, h) = BAR_SIZE;
    let mut img = RgbImage::from_pixel(w, h, WHITE);
    let (left, right, top, bottom) = (40u32, w - 10, 12u32, h - 20);
    fill_rect(&mut img, left, bottom, right, bottom + 1, AXIS);

    let max = values.iter().cloned().fold(0.0_f64, f64::max);
    if !values.is_empty() && max > 0.0 {
        let slot = (right - left) as f64 / values.len() as f64;
        let bar = (slot * 0.6).max(1.0);
        let usable = (bottom - top) as f64;
        for (i, v) in values.iter().enumerate() {
            let height = (v.max(0.0) / max * usable).round() as u32;
            if height == 0 {
                continue;
            }
            let x0 = left as f64 + slot * i as f64 + (slot - bar) / 2.0;
            fill_rect(
                &mut img,
                x0.round() as u32,
                bottom - height,
                (x0 + bar).round() as u32,
                bottom,
                color,
            );
        }
    }
    encode(&img)
}

fn draw_donut(img: &mut RgbImage, cx: f64, cy: f64, radius: f64, values: &[f64]) {
    let total: f64 = values.iter().map(|v| v.max(0.0)).sum();
    if total <= 0.0 {
        return;
    }
    let inner = radius * 0.6;
    // Cumulative fractions, clockwise from twelve o'clock.
    let mut bounds = Vec::with_capacity(values.len());
    let mut acc = 0.0;
    for v in values {
        acc += v.max(0.0) / total;
        bounds.push(acc);
    }
    let (w, h) = img.dimensions();
    let y_range = (cy - radius).max(0.0) as u32..((cy + radius).ceil() as u32).min(h);
    for y in y_range {
        for x in (cx - radius).max(0.0) as u32..((cx + radius).ceil() as u32).min(w) {
            let dx = x as f64 + 0.5 - cx;
            let dy = y as f64 + 0.5 - cy;
            let r = (dx * dx + dy * dy).sqrt();
            if r > radius || r < inner {
                continue;
            }
            let angle = dx.atan2(-dy);
            let frac = (if angle < 0.0 { angle + 2.0 * PI } else { angle }) / (2.0 * PI);
            let slice = bounds.iter().position(|b| frac < *b).unwrap_or(values.len() - 1);
            img.put_pixel(x, y, PALETTE[slice % PALETTE.len()]);
        }
    }
}

/// Two donuts side by side (issue count, sales amount) with a colour key on
/// the right, one square per slice.
pub fn double_donut(left: &[f64], right: &[f64]) -> Result<Vec<u8>> {
    let (w, h) = DONUT_SIZE;
    let mut img = RgbImage::from_pixel(w, h, WHITE);
    let radius = h as f64 / 2.0 - 8.0;
    let plot_width = w as f64 * 0.82;
    draw_donut(&mut img, plot_width * 0.25, h as f64 / 2.0, radius, left);
    draw_donut(&mut img, plot_width * 0.75, h as f64 / 2.0, radius, right);

    let slices = left.len().max(right.len());
    let key_x = plot_width as u32 + 12;
    for i in 0..slices.min(PALETTE.len()) {
        let y = 12 + i as u32 * 22;
        fill_rect(&mut img, key_x, y, key_x + 14, y + 14, PALETTE[i]);
    }
    encode(&img)
}

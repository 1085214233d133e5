// Utility helpers for parsing and formatting.
//
// This module centralizes the "dirty" CSV/number/date handling so the rest
// of the code can assume clean, typed values.
use chrono::NaiveDate;
use num_format::{Locale, ToFormattedString};
use std::path::Path;

/// Parse a string-like value into `f64` while being forgiving about
/// formatting issues that are common in dashboard exports.
///
/// - Trims whitespace.
/// - Rejects values that contain alphabetic characters.
/// - Strips thousands separators like `","` before parsing.
/// - Returns `None` for anything that cannot be safely parsed.
pub fn parse_f64_safe(s: Option<&str>) -> Option<f64> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    if s.chars().any(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let s = s.replace(',', "");
    s.parse::<f64>().ok()
}

/// Like `parse_f64_safe`, but an empty cell counts as zero and garbage is an
/// error message the caller can attach a file/line to.
pub fn parse_amount(s: &str) -> Result<f64, String> {
    if s.trim().is_empty() {
        return Ok(0.0);
    }
    parse_f64_safe(Some(s)).ok_or_else(|| format!("`{}` is not a number", s))
}

pub fn parse_date_safe(s: Option<&str>) -> Option<NaiveDate> {
    // Exports come as `YYYY-MM-DD`; hand-edited sheets use `YYYY/MM/DD`.
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y/%m/%d"))
        .ok()
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    n.to_formatted_string(&Locale::en)
}

/// Render a pass-through figure for a slide: numbers get thousands
/// separators (truncated like the dashboard does), text is kept as-is and a
/// missing value becomes the template's `xx`.
pub fn format_figure(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        None | Some("") => "xx".to_string(),
        Some(s) => match parse_f64_safe(Some(s)) {
            Some(v) => format_int(v.trunc() as i64),
            None => s.to_string(),
        },
    }
}

/// `yyyy/mm` of a period start date, or the template's literal when the
/// date cannot be read.
pub fn period_month(period_start: Option<&str>) -> (String, String) {
    match parse_date_safe(period_start) {
        Some(d) => (d.format("%Y").to_string(), d.format("%m").to_string()),
        None => ("yyyy".to_string(), "mm".to_string()),
    }
}

pub fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Estimated rendered width in em: full-width characters count 1, everything
/// else 0.5.
pub fn estimate_text_width(text: &str) -> f64 {
    text.chars()
        .map(|c| if is_wide(c) { 1.0 } else { 0.5 })
        .sum()
}

fn is_wide(c: char) -> bool {
    matches!(c as u32,
        0x1100..=0x115F
        | 0x2E80..=0x303E
        | 0x3041..=0x33FF
        | 0x3400..=0x4DBF
        | 0x4E00..=0x9FFF
        | 0xA000..=0xA4CF
        | 0xAC00..=0xD7A3
        | 0xF900..=0xFAFF
        | 0xFE30..=0xFE4F
        | 0xFF00..=0xFF60
        | 0xFFE0..=0xFFE6
        | 0x20000..=0x3FFFD)
}

const EMU_PER_POINT: f64 = 12700.0;
const CELL_MARGIN_EMU: i64 = 91440;

/// Font size (pt) that keeps `text` on one line inside a table column of
/// `col_width_emu`. `None` means the base size already fits.
pub fn fit_font_size(text: &str, col_width_emu: i64, base_pt: f64, min_pt: f64) -> Option<f64> {
    let effective = (col_width_emu - CELL_MARGIN_EMU * 2) as f64;
    let width = estimate_text_width(text);
    if width == 0.0 || width * base_pt * EMU_PER_POINT <= effective {
        return None;
    }
    let mut size = base_pt - 0.5;
    while size >= min_pt {
        if width * size * EMU_PER_POINT <= effective {
            return Some(size);
        }
        size -= 0.5;
    }
    Some(min_pt)
}

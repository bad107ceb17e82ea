//! Letterbox/pillarbox auto-crop detection (`spec.md` §4.A "auto-crop").
//!
//! Ported from the original `autocrop()` middle-out scanline scan: from the
//! image center, walk each edge outward until a scanline is found whose
//! matching-color span covers at least `min_coverage` of its length; that
//! scanline is the edge of the letterbox. The two margins on each axis are
//! then balanced against each other, and the crop is rejected outright if it
//! would discard too much of the frame.

use crate::image_buf::GrayImage;

/// Tolerances for auto-crop, surfacing values the original hard-codes
/// (`spec.md` §9 open question: "the auto-crop maxHMarginDifference /
/// maxVMarginDifference of 5% is hard-coded; surface as a parameter").
#[derive(Debug, Clone, Copy)]
pub struct AutoCropParams {
    /// Gray-level tolerance for a pixel to be considered part of the border.
    pub border_tolerance: u8,
    /// Fraction of a row/column's length that must match the border color
    /// for that line to count as letterbox.
    pub min_coverage: f32,
    /// Maximum allowed difference between the two vertical margins,
    /// expressed as a fraction of image height.
    pub max_v_margin_difference: f32,
    /// Maximum allowed difference between the two horizontal margins,
    /// expressed as a fraction of image width.
    pub max_h_margin_difference: f32,
    /// Reject the crop if the resulting area is below this fraction of the
    /// original area on either axis.
    pub min_area_fraction: f32,
}

impl Default for AutoCropParams {
    fn default() -> Self {
        AutoCropParams {
            border_tolerance: 20,
            min_coverage: 0.66,
            max_v_margin_difference: 0.05,
            max_h_margin_difference: 0.05,
            min_area_fraction: 0.65,
        }
    }
}

/// A crop rectangle, `(x, y, width, height)`.
pub type CropRect = (usize, usize, usize, usize);

/// Detect the letterbox crop rectangle for a grayscale frame, or `None` if
/// no crop should be applied.
pub fn detect_crop(img: &GrayImage, params: &AutoCropParams) -> Option<CropRect> {
    let (w, h) = (img.width, img.height);
    if w == 0 || h == 0 {
        return None;
    }
    let border_color = img.data[0] as i32;
    let tol = params.border_tolerance as i32;
    let min_width_covered = (w as f32 * params.min_coverage) as usize;
    let min_height_covered = (h as f32 * params.min_coverage) as usize;

    let row_span = |y: usize| -> (usize, usize) {
        let row = &img.data[y * w..y * w + w];
        let mut left = 0;
        while left < w && (row[left] as i32 - border_color).abs() <= tol {
            left += 1;
        }
        let mut right = w;
        while right > 0 && (row[right - 1] as i32 - border_color).abs() <= tol {
            right -= 1;
        }
        (left, right)
    };
    let col_span = |x: usize| -> (usize, usize) {
        let mut top = 0;
        while top < h && (img.data[top * w + x] as i32 - border_color).abs() <= tol {
            top += 1;
        }
        let mut bottom = h;
        while bottom > 0 && (img.data[(bottom - 1) * w + x] as i32 - border_color).abs() <= tol {
            bottom -= 1;
        }
        (top, bottom)
    };

    let mut top = h / 2;
    loop {
        let (left, right) = row_span(top);
        if left > 0 && right < w && left + w - right > min_width_covered {
            break;
        }
        if top == 0 {
            break;
        }
        top -= 1;
    }
    top += 1;

    let mut bottom = (h / 2 + 1).min(h.saturating_sub(1));
    while bottom < h {
        let (left, right) = row_span(bottom);
        if left + w - right > min_width_covered {
            break;
        }
        bottom += 1;
    }

    let mut left = w / 2;
    loop {
        let (top2, bottom2) = col_span(left);
        if top2 > 0 && bottom2 < h && top2 + h - bottom2 > min_height_covered {
            break;
        }
        if left == 0 {
            break;
        }
        left -= 1;
    }
    left += 1;

    let mut right = (w / 2 + 1).min(w.saturating_sub(1));
    while right < w {
        let (top2, bottom2) = col_span(right);
        if top2 + h - bottom2 > min_height_covered {
            break;
        }
        right += 1;
    }

    // Balance a slightly off-center letterbox using the lesser margin.
    let max_v_diff = (h as f32 * params.max_v_margin_difference) as i64;
    let bmargin = h as i64 - bottom as i64;
    let mut top = top as i64;
    let mut bottom = bottom as i64;
    if (top - bmargin).abs() > max_v_diff {
        if top > bmargin {
            top = bmargin;
        } else {
            bottom = h as i64 - top;
        }
    }

    let max_h_diff = (w as f32 * params.max_h_margin_difference) as i64;
    let rmargin = w as i64 - right as i64;
    let mut left = left as i64;
    let mut right = right as i64;
    if (left - rmargin).abs() > max_h_diff {
        if left > rmargin {
            left = rmargin;
        } else {
            right = w as i64 - left;
        }
    }

    let would_crop = (left != 0 && right != w as i64) || (top != 0 && bottom != h as i64);
    if !would_crop || left >= right || top >= bottom {
        return None;
    }
    let width_frac = (right - left) as f32 / w as f32;
    let height_frac = (bottom - top) as f32 / h as f32;
    if width_frac <= params.min_area_fraction || height_frac <= params.min_area_fraction {
        return None;
    }

    Some((left as usize, top as usize, (right - left) as usize, (bottom - top) as usize))
}

/// Apply a crop rectangle to a grayscale image.
pub fn apply_crop(img: &GrayImage, rect: CropRect) -> GrayImage {
    let (x0, y0, w, h) = rect;
    let mut out = GrayImage::new(w, h);
    for row in 0..h {
        let src = (y0 + row) * img.width + x0;
        out.data[row * w..row * w + w].copy_from_slice(&img.data[src..src + w]);
    }
    out
}

/// Detect and apply the crop in one step; returns the original image
/// unchanged when no crop is warranted.
pub fn auto_crop(img: &GrayImage, params: &AutoCropParams) -> GrayImage {
    match detect_crop(img, params) {
        Some(rect) => apply_crop(img, rect),
        None => img.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: usize, height: usize, value: f32) -> GrayImage {
        GrayImage { width, height, data: vec![value; width * height] }
    }

    fn letterboxed(width: usize, height: usize, bar: usize) -> GrayImage {
        let mut img = solid(width, height, 0.0);
        for y in bar..(height - bar) {
            for x in 0..width {
                img.data[y * width + x] = 200.0;
            }
        }
        img
    }

    #[test]
    fn no_crop_on_uniform_image() {
        let img = solid(64, 64, 128.0);
        assert!(detect_crop(&img, &AutoCropParams::default()).is_none());
    }

    #[test]
    fn detects_horizontal_letterbox() {
        let img = letterboxed(100, 100, 10);
        let params = AutoCropParams::default();
        let crop = detect_crop(&img, &params);
        assert!(crop.is_some());
        let (_, y0, _, h) = crop.unwrap();
        assert!(y0 >= 5 && y0 <= 15);
        assert!(h >= 70);
    }

    #[test]
    fn auto_crop_passes_through_when_no_letterbox() {
        let img = solid(48, 48, 90.0);
        let cropped = auto_crop(&img, &AutoCropParams::default());
        assert_eq!((cropped.width, cropped.height), (48, 48));
    }

    #[test]
    fn balances_asymmetric_margins() {
        // Top bar of 20, bottom bar of 4: the balance step should pull the
        // smaller margin (bottom) up toward the larger, or clip the larger
        // down toward the smaller, depending on which side of tolerance it
        // falls; either way the result must stay within the image bounds.
        let mut img = solid(100, 100, 0.0);
        for y in 20..96 {
            for x in 0..100 {
                img.data[y * 100 + x] = 220.0;
            }
        }
        if let Some((x, y, w, h)) = detect_crop(&img, &AutoCropParams::default()) {
            assert!(x + w <= 100);
            assert!(y + h <= 100);
        }
    }
}

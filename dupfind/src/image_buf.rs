//! Small, codec-agnostic pixel buffers used by the fingerprint primitives.
//!
//! Mirrors the teacher's approach of keeping the metric code decoupled from
//! any particular decode library (`av_metrics::video::{FrameInfo, PlaneData}`
//! are generic over `Pixel` and know nothing about y4m/ffmpeg); here
//! `dupfind-decoders` is responsible for turning a decoded frame into one of
//! these buffers.

/// A single-channel (luminance) image, row-major, values in `0.0..=255.0`.
#[derive(Debug, Clone)]
pub struct GrayImage {
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
    /// Row-major pixel data, `data.len() == width * height`.
    pub data: Vec<f32>,
}

impl GrayImage {
    /// A black image of the given size.
    pub fn new(width: usize, height: usize) -> Self {
        GrayImage { width, height, data: vec![0.0; width * height] }
    }

    #[inline]
    fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    #[inline]
    fn get_clamped(&self, x: isize, y: isize) -> f32 {
        let cx = x.clamp(0, self.width as isize - 1) as usize;
        let cy = y.clamp(0, self.height as isize - 1) as usize;
        self.get(cx, cy)
    }
}

/// A three-channel RGB image, row-major, channel values in `0.0..=255.0`.
#[derive(Debug, Clone)]
pub struct RgbImage {
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
    /// Row-major `[r, g, b]` pixel data.
    pub data: Vec<[f32; 3]>,
}

impl RgbImage {
    /// A black image of the given size.
    pub fn new(width: usize, height: usize) -> Self {
        RgbImage { width, height, data: vec![[0.0; 3]; width * height] }
    }

    #[inline]
    fn get(&self, x: usize, y: usize) -> [f32; 3] {
        self.data[y * self.width + x]
    }
}

/// Convert to grayscale using the luminance of YUV, per `spec.md` §4.A
/// step 1 for the DCT hash.
pub fn rgb_to_gray(img: &RgbImage) -> GrayImage {
    let data = img
        .data
        .iter()
        .map(|&[r, g, b]| 0.299 * r + 0.587 * g + 0.114 * b)
        .collect();
    GrayImage { width: img.width, height: img.height, data }
}

/// Select a box-blur kernel size by image area, per `spec.md` §4.A step 2:
/// `<=32^2 -> 0, <=64^2 -> 3, <=128^2 -> 5, else 7`.
pub fn blur_kernel_for_area(width: usize, height: usize) -> usize {
    let area = width * height;
    if area <= 32 * 32 {
        0
    } else if area <= 64 * 64 {
        3
    } else if area <= 128 * 128 {
        5
    } else {
        7
    }
}

/// A separable box blur with the given odd kernel size. `kernel == 0`
/// returns a clone (no blur).
pub fn box_blur(img: &GrayImage, kernel: usize) -> GrayImage {
    if kernel == 0 {
        return img.clone();
    }
    let radius = (kernel / 2) as isize;
    let mut horizontal = GrayImage::new(img.width, img.height);
    for y in 0..img.height {
        for x in 0..img.width {
            let mut sum = 0.0;
            for dx in -radius..=radius {
                sum += img.get_clamped(x as isize + dx, y as isize);
            }
            horizontal.data[y * img.width + x] = sum / (2 * radius + 1) as f32;
        }
    }
    let mut out = GrayImage::new(img.width, img.height);
    for y in 0..img.height {
        for x in 0..img.width {
            let mut sum = 0.0;
            for dy in -radius..=radius {
                sum += horizontal.get_clamped(x as isize, y as isize + dy);
            }
            out.data[y * img.width + x] = sum / (2 * radius + 1) as f32;
        }
    }
    out
}

/// Resize via area-averaging, per `spec.md` §4.A step 3 (DCT hash) and
/// the color descriptor's longest-side clamp.
pub fn resize_area_average(img: &GrayImage, new_width: usize, new_height: usize) -> GrayImage {
    let mut out = GrayImage::new(new_width, new_height);
    let x_scale = img.width as f32 / new_width as f32;
    let y_scale = img.height as f32 / new_height as f32;
    for ny in 0..new_height {
        let y0 = (ny as f32 * y_scale).floor() as usize;
        let y1 = (((ny + 1) as f32 * y_scale).ceil() as usize).max(y0 + 1).min(img.height);
        for nx in 0..new_width {
            let x0 = (nx as f32 * x_scale).floor() as usize;
            let x1 = (((nx + 1) as f32 * x_scale).ceil() as usize).max(x0 + 1).min(img.width);
            let mut sum = 0.0;
            let mut count = 0;
            for y in y0..y1 {
                for x in x0..x1 {
                    sum += img.get(x, y);
                    count += 1;
                }
            }
            out.data[ny * new_width + nx] = if count > 0 { sum / count as f32 } else { 0.0 };
        }
    }
    out
}

/// Resize an RGB image with nearest-neighbor sampling, which preserves the
/// original color values exactly (`spec.md` §4.A step 1 for the color
/// descriptor: "resize...nearest-neighbor to preserve color values").
pub fn resize_nearest_rgb(img: &RgbImage, new_width: usize, new_height: usize) -> RgbImage {
    let mut out = RgbImage::new(new_width, new_height);
    let x_scale = img.width as f32 / new_width as f32;
    let y_scale = img.height as f32 / new_height as f32;
    for ny in 0..new_height {
        let sy = ((ny as f32 + 0.5) * y_scale).floor() as usize;
        let sy = sy.min(img.height.saturating_sub(1));
        for nx in 0..new_width {
            let sx = ((nx as f32 + 0.5) * x_scale).floor() as usize;
            let sx = sx.min(img.width.saturating_sub(1));
            out.data[ny * new_width + nx] = img.get(sx, sy);
        }
    }
    out
}

/// Scale `(width, height)` down so the longest side is at most `max_side`,
/// preserving aspect ratio. Returns the input size unchanged if already
/// within bounds.
pub fn clamp_longest_side(width: usize, height: usize, max_side: usize) -> (usize, usize) {
    let longest = width.max(height);
    if longest <= max_side || longest == 0 {
        return (width, height);
    }
    let scale = max_side as f32 / longest as f32;
    (
        ((width as f32 * scale).round() as usize).max(1),
        ((height as f32 * scale).round() as usize).max(1),
    )
}

//! DCT-64 whole-image perceptual hash (`spec.md` §4.A).

use std::sync::OnceLock;

use crate::image_buf::{blur_kernel_for_area, box_blur, resize_area_average, GrayImage};

const DCT_SIZE: usize = 32;
const KEEP_SIZE: usize = 9;

/// Compute the 64-bit DCT hash of an already-grayscale image, following
/// `spec.md` §4.A steps 2-6. Step 1 (RGB -> grayscale) is the caller's
/// responsibility since not every input starts out in color.
pub fn dct_hash(gray: &GrayImage) -> u64 {
    let kernel = blur_kernel_for_area(gray.width, gray.height);
    let blurred = box_blur(gray, kernel);
    let small = resize_area_average(&blurred, DCT_SIZE, DCT_SIZE);
    let coeffs = dct_2d(&small.data, DCT_SIZE);
    let top_left = extract_top_left(&coeffs, DCT_SIZE, KEEP_SIZE);
    let zigzag = zigzag_order(KEEP_SIZE);
    let linear: Vec<f32> = zigzag.iter().map(|&idx| top_left[idx]).collect();
    debug_assert_eq!(linear.len(), KEEP_SIZE * KEEP_SIZE);
    // Discard the 6 lowest-frequency (including DC) and the last 11 entries,
    // keeping 64 of the 81 zig-zagged coefficients.
    let kept = &linear[6..linear.len() - 11];
    debug_assert_eq!(kept.len(), 64);

    let mean: f32 = kept.iter().sum::<f32>() / kept.len() as f32;
    let mut hash: u64 = 0;
    for (i, &v) in kept.iter().enumerate() {
        if v > mean {
            hash |= 1 << i;
        }
    }
    // Bit 0 is DC-derived and is never set, regardless of the threshold.
    hash &= !1u64;
    hash
}

/// Popcount of the XOR of two hashes (`spec.md` §4.A).
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Compute a full 2D DCT-II over a `size x size` row-major buffer.
fn dct_2d(data: &[f32], size: usize) -> Vec<f32> {
    let basis = dct_basis(size);
    // rows: out = basis * data   (size x size)
    let mut tmp = vec![0.0f32; size * size];
    for u in 0..size {
        for x in 0..size {
            let b = basis[u * size + x];
            if b == 0.0 {
                continue;
            }
            for col in 0..size {
                tmp[u * size + col] += b * data[x * size + col];
            }
        }
    }
    // cols: out = tmp * basis^T
    let mut out = vec![0.0f32; size * size];
    for row in 0..size {
        for v in 0..size {
            let mut sum = 0.0;
            for x in 0..size {
                sum += tmp[row * size + x] * basis[v * size + x];
            }
            out[row * size + v] = sum;
        }
    }
    out
}

/// Cached `size x size` orthonormal DCT-II basis matrix,
/// `basis[u*size+x] = alpha(u) * cos((2x+1)*u*pi / (2*size))`.
///
/// Only ever called with `DCT_SIZE`; the whole-image hash is fixed-size by
/// `spec.md` §4.A, so a single cached basis is all that's needed.
fn dct_basis(size: usize) -> &'static [f32] {
    static BASIS_32: OnceLock<Vec<f32>> = OnceLock::new();
    assert_eq!(size, DCT_SIZE, "dct_basis only supports the fixed 32x32 size");
    BASIS_32.get_or_init(|| build_basis(DCT_SIZE))
}

fn build_basis(size: usize) -> Vec<f32> {
    let mut basis = vec![0.0f32; size * size];
    for u in 0..size {
        let alpha = if u == 0 { (1.0 / size as f32).sqrt() } else { (2.0 / size as f32).sqrt() };
        for x in 0..size {
            basis[u * size + x] =
                alpha * (std::f32::consts::PI * (2 * x + 1) as f32 * u as f32 / (2.0 * size as f32)).cos();
        }
    }
    basis
}

/// Extract the top-left `keep x keep` corner of a `size x size` matrix.
fn extract_top_left(data: &[f32], size: usize, keep: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(keep * keep);
    for y in 0..keep {
        for x in 0..keep {
            out.push(data[y * size + x]);
        }
    }
    out
}

/// Zig-zag traversal order of a `size x size` matrix, as a flat list of
/// row-major indices.
fn zigzag_order(size: usize) -> Vec<usize> {
    let mut order = Vec::with_capacity(size * size);
    let mut x = 0isize;
    let mut y = 0isize;
    let mut going_up = true;
    let n = size as isize;
    for _ in 0..(size * size) {
        order.push((y * n + x) as usize);
        if going_up {
            if x == n - 1 {
                y += 1;
                going_up = false;
            } else if y == 0 {
                x += 1;
                going_up = false;
            } else {
                x += 1;
                y -= 1;
            }
        } else if y == n - 1 {
            x += 1;
            going_up = true;
        } else if x == 0 {
            y += 1;
            going_up = true;
        } else {
            x -= 1;
            y += 1;
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(width: usize, height: usize, value: f32) -> GrayImage {
        GrayImage { width, height, data: vec![value; width * height] }
    }

    fn checkerboard(size: usize) -> GrayImage {
        let mut data = vec![0.0; size * size];
        for y in 0..size {
            for x in 0..size {
                data[y * size + x] = if (x + y) % 2 == 0 { 255.0 } else { 0.0 };
            }
        }
        GrayImage { width: size, height: size, data }
    }

    #[test]
    fn zigzag_visits_every_cell_once() {
        let order = zigzag_order(9);
        let mut seen = vec![false; 81];
        for idx in order {
            assert!(!seen[idx]);
            seen[idx] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn zigzag_starts_at_dc() {
        assert_eq!(zigzag_order(9)[0], 0);
    }

    #[test]
    fn bit_zero_always_clear() {
        let hash = dct_hash(&checkerboard(64));
        assert_eq!(hash & 1, 0);
    }

    #[test]
    fn identical_pixels_hash_identically() {
        let a = checkerboard(96);
        let b = checkerboard(96);
        assert_eq!(dct_hash(&a), dct_hash(&b));
    }

    #[test]
    fn uniform_image_has_hamming_distance_zero_to_itself() {
        let img = uniform(64, 64, 128.0);
        let hash = dct_hash(&img);
        assert_eq!(hamming_distance(hash, hash), 0);
    }

    #[test]
    fn hamming_distance_is_within_range() {
        let a = dct_hash(&checkerboard(64));
        let b = dct_hash(&uniform(64, 64, 10.0));
        let d = hamming_distance(a, b);
        assert!(d <= 64);
    }

    #[test]
    fn hamming_distance_symmetric() {
        let a = dct_hash(&checkerboard(64));
        let b = dct_hash(&uniform(64, 64, 200.0));
        assert_eq!(hamming_distance(a, b), hamming_distance(b, a));
    }
}

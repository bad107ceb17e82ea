//! Dominant-color descriptor: CIE Luv clustering (`spec.md` §4.A).

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::image_buf::{clamp_longest_side, resize_nearest_rgb, RgbImage};
use crate::media::{ColorDescriptor, ColorEntry};

const MAX_SIDE: usize = 256;
const NUM_CLUSTERS: usize = 32;
const MAX_ITERATIONS: usize = 100;
const CONVERGENCE_EPSILON: f32 = 10.0;
const MIN_LUMINANCE: f32 = 4.0;

/// A pixel in CIE Luv space, carrying the centering weight derived from its
/// radial distance from the image center (`spec.md` §4.A step 6).
#[derive(Debug, Clone, Copy)]
struct LuvSample {
    l: f32,
    u: f32,
    v: f32,
    weight: f32,
}

/// Convert sRGB (0..255 per channel) to CIE 1976 Luv, D65 white point.
pub fn rgb_to_luv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let (x, y, z) = rgb_to_xyz(r / 255.0, g / 255.0, b / 255.0);

    // D65 reference white.
    const XN: f32 = 0.95047;
    const YN: f32 = 1.0;
    const ZN: f32 = 1.08883;

    let denom = x + 15.0 * y + 3.0 * z;
    let (u_prime, v_prime) = if denom.abs() < 1e-6 {
        (0.0, 0.0)
    } else {
        (4.0 * x / denom, 9.0 * y / denom)
    };

    let denom_n = XN + 15.0 * YN + 3.0 * ZN;
    let un_prime = 4.0 * XN / denom_n;
    let vn_prime = 9.0 * YN / denom_n;

    let yr = y / YN;
    let l = if yr > 0.008856 {
        116.0 * yr.cbrt() - 16.0
    } else {
        903.3 * yr
    };

    let u = 13.0 * l * (u_prime - un_prime);
    let v = 13.0 * l * (v_prime - vn_prime);
    (l, u, v)
}

fn rgb_to_xyz(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    fn linearize(c: f32) -> f32 {
        if c <= 0.04045 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        }
    }
    let (r, g, b) = (linearize(r), linearize(g), linearize(b));
    let x = 0.4124564 * r + 0.3575761 * g + 0.1804375 * b;
    let y = 0.2126729 * r + 0.7151522 * g + 0.0721750 * b;
    let z = 0.0193339 * r + 0.1191920 * g + 0.9503041 * b;
    (x, y, z)
}

/// Ellipsoidal mask intensity at `(x, y)` in an image of size
/// `(width, height)`: a hard `1.0` inside a 90%x90% centered ellipse, `0.0`
/// outside it (`spec.md` §4.A step 2).
fn ellipse_mask_intensity(x: usize, y: usize, width: usize, height: usize) -> f32 {
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    let rx = 0.9 * cx;
    let ry = 0.9 * cy;
    if rx <= 0.0 || ry <= 0.0 {
        return 0.0;
    }
    let dx = (x as f32 + 0.5 - cx) / rx;
    let dy = (y as f32 + 0.5 - cy) / ry;
    let d = dx * dx + dy * dy;
    if d <= 1.0 {
        1.0
    } else {
        0.0
    }
}

/// Compute the dominant-color descriptor of an RGB image, per
/// `spec.md` §4.A. `seed` should be derived from the media id so that
/// results are reproducible (`spec.md` §9 open question).
pub fn compute_color_descriptor(img: &RgbImage, seed: u64) -> ColorDescriptor {
    let (new_w, new_h) = clamp_longest_side(img.width, img.height, MAX_SIDE);
    let resized = resize_nearest_rgb(img, new_w, new_h);

    let mut samples = Vec::with_capacity(new_w * new_h);
    let max_radial_dist = ((new_w * new_w + new_h * new_h) as f32).sqrt() / 2.0;
    let cx = new_w as f32 / 2.0;
    let cy = new_h as f32 / 2.0;

    for y in 0..new_h {
        for x in 0..new_w {
            let mask = ellipse_mask_intensity(x, y, new_w, new_h);
            let [r, g, b] = resized.data[y * new_w + x];
            let (l, u, v) = rgb_to_luv(r * mask, g * mask, b * mask);
            if l <= MIN_LUMINANCE {
                continue;
            }
            let dx = x as f32 + 0.5 - cx;
            let dy = y as f32 + 0.5 - cy;
            let radial = (dx * dx + dy * dy).sqrt();
            let weight = if max_radial_dist > 0.0 {
                ((max_radial_dist - radial) / max_radial_dist).max(0.0)
            } else {
                1.0
            };
            samples.push(LuvSample { l, u, v, weight });
        }
    }

    if samples.is_empty() {
        return ColorDescriptor::default();
    }

    let k = NUM_CLUSTERS.min(samples.len());
    let (centroids, weights) = kmeans(&samples, k, seed);

    let mut entries: Vec<(u16, u16, u16, f32)> = centroids
        .iter()
        .zip(weights.iter())
        .filter(|(_, &w)| w > 0.0)
        .map(|(c, &w)| (quantize(c.0), quantize(c.1), quantize(c.2), w))
        .collect();

    entries.sort_by(|a, b| b.3.partial_cmp(&a.3).unwrap_or(std::cmp::Ordering::Equal));
    let max_weight = entries.first().map(|e| e.3).unwrap_or(0.0);
    let normalize = |w: f32| -> u16 {
        if max_weight <= 0.0 {
            0
        } else {
            ((w / max_weight) * 65535.0).round().clamp(0.0, 65535.0) as u16
        }
    };

    ColorDescriptor {
        colors: entries
            .into_iter()
            .take(NUM_CLUSTERS)
            .map(|(l, u, v, w)| ColorEntry { l, u, v, w: normalize(w) })
            .collect(),
    }
}

/// Quantize a Luv channel value to 16 bits. `L` is in `[0,100]`, `u`/`v` are
/// roughly in `[-134,220]`; both are rescaled into the full `u16` range.
fn quantize(value: f32) -> u16 {
    let shifted = (value + 200.0) * 150.0;
    shifted.round().clamp(0.0, 65535.0) as u16
}

/// Lloyd's algorithm with k-means++ initialization, run for one attempt
/// (`spec.md` §4.A step 5 / §9 open question: seeded deterministically by
/// media id for reproducibility). Returns the centroids and their summed
/// pixel weights.
fn kmeans(samples: &[LuvSample], k: usize, seed: u64) -> (Vec<(f32, f32, f32)>, Vec<f32>) {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut centroids = kmeans_plus_plus_init(samples, k, &mut rng);
    let mut assignments = vec![0usize; samples.len()];

    for _ in 0..MAX_ITERATIONS {
        let mut moved = 0.0f32;
        for (i, s) in samples.iter().enumerate() {
            let mut best = 0usize;
            let mut best_dist = f32::MAX;
            for (c, centroid) in centroids.iter().enumerate() {
                let d = luv_dist2(s.l, s.u, s.v, centroid.0, centroid.1, centroid.2);
                if d < best_dist {
                    best_dist = d;
                    best = c;
                }
            }
            assignments[i] = best;
        }

        let mut sums = vec![(0.0f32, 0.0f32, 0.0f32, 0.0f32); k];
        for (i, s) in samples.iter().enumerate() {
            let c = assignments[i];
            sums[c].0 += s.l * s.weight;
            sums[c].1 += s.u * s.weight;
            sums[c].2 += s.v * s.weight;
            sums[c].3 += s.weight;
        }

        for (c, sum) in sums.iter().enumerate() {
            if sum.3 > 0.0 {
                let new_centroid = (sum.0 / sum.3, sum.1 / sum.3, sum.2 / sum.3);
                moved += luv_dist2(
                    centroids[c].0,
                    centroids[c].1,
                    centroids[c].2,
                    new_centroid.0,
                    new_centroid.1,
                    new_centroid.2,
                )
                .sqrt();
                centroids[c] = new_centroid;
            }
        }

        if moved < CONVERGENCE_EPSILON {
            break;
        }
    }

    let mut weights = vec![0.0f32; k];
    for (i, s) in samples.iter().enumerate() {
        weights[assignments[i]] += s.weight;
    }

    (centroids, weights)
}

fn kmeans_plus_plus_init(
    samples: &[LuvSample],
    k: usize,
    rng: &mut SmallRng,
) -> Vec<(f32, f32, f32)> {
    let mut centroids = Vec::with_capacity(k);
    let first = &samples[rng.gen_range(0..samples.len())];
    centroids.push((first.l, first.u, first.v));

    while centroids.len() < k {
        let mut dist2: Vec<f32> = samples
            .iter()
            .map(|s| {
                centroids
                    .iter()
                    .map(|c| luv_dist2(s.l, s.u, s.v, c.0, c.1, c.2))
                    .fold(f32::MAX, f32::min)
            })
            .collect();
        let total: f32 = dist2.iter().sum();
        if total <= 0.0 {
            // All remaining points coincide with an existing centroid;
            // pick arbitrarily to keep the cluster count at k.
            dist2.fill(1.0);
        }
        let total: f32 = dist2.iter().sum();
        let mut pick = rng.gen_range(0.0..total);
        let mut chosen = samples.len() - 1;
        for (i, &d) in dist2.iter().enumerate() {
            if pick < d {
                chosen = i;
                break;
            }
            pick -= d;
        }
        let s = &samples[chosen];
        centroids.push((s.l, s.u, s.v));
    }
    centroids
}

#[inline]
fn luv_dist2(l1: f32, u1: f32, v1: f32, l2: f32, u2: f32, v2: f32) -> f32 {
    let dl = l1 - l2;
    let du = u1 - u2;
    let dv = v1 - v2;
    dl * dl + du * du + dv * dv
}

/// Dequantize a 16-bit channel back to its approximate Luv value.
fn dequantize(value: u16) -> f32 {
    value as f32 / 150.0 - 200.0
}

/// Color distance between two descriptors (`spec.md` §4.A "Color
/// distance"). Returns `f32::MAX` if the descriptors' color counts differ
/// by more than 2.
pub fn color_distance(a: &ColorDescriptor, b: &ColorDescriptor) -> f32 {
    let na = a.num_colors() as i64;
    let nb = b.num_colors() as i64;
    if (na - nb).abs() > 2 {
        return f32::MAX;
    }
    let (bigger, smaller) = if na >= nb { (a, b) } else { (b, a) };
    if smaller.colors.is_empty() {
        return f32::MAX;
    }

    let mut sum = 0.0f32;
    for c in &bigger.colors {
        let (cl, cu, cv) = (dequantize(c.l), dequantize(c.u), dequantize(c.v));
        let min_dist = smaller
            .colors
            .iter()
            .map(|o| luv_dist2(cl, cu, cv, dequantize(o.l), dequantize(o.u), dequantize(o.v)).sqrt())
            .fold(f32::MAX, f32::min);
        sum += min_dist;
    }
    sum + 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(width: usize, height: usize, rgb: [f32; 3]) -> RgbImage {
        RgbImage { width, height, data: vec![rgb; width * height] }
    }

    #[test]
    fn luv_of_black_is_zero() {
        let (l, u, v) = rgb_to_luv(0.0, 0.0, 0.0);
        assert!(l.abs() < 1e-3);
        assert!(u.abs() < 1e-3);
        assert!(v.abs() < 1e-3);
    }

    #[test]
    fn luv_of_white_has_max_lightness() {
        let (l, _, _) = rgb_to_luv(255.0, 255.0, 255.0);
        assert!((l - 100.0).abs() < 0.5);
    }

    #[test]
    fn near_black_image_has_no_descriptor() {
        let img = flat(32, 32, [1.0, 1.0, 1.0]);
        let desc = compute_color_descriptor(&img, 1);
        assert_eq!(desc.num_colors(), 0);
    }

    #[test]
    fn uniform_bright_image_has_one_dominant_color() {
        let img = flat(64, 64, [200.0, 50.0, 50.0]);
        let desc = compute_color_descriptor(&img, 42);
        assert!(!desc.is_empty());
        assert_eq!(desc.colors[0].w, 65535);
    }

    #[test]
    fn descriptor_is_deterministic_for_fixed_seed() {
        let img = flat(64, 64, [20.0, 180.0, 90.0]);
        let a = compute_color_descriptor(&img, 7);
        let b = compute_color_descriptor(&img, 7);
        assert_eq!(a, b);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = compute_color_descriptor(&flat(48, 48, [200.0, 10.0, 10.0]), 1);
        let b = compute_color_descriptor(&flat(48, 48, [10.0, 200.0, 10.0]), 2);
        let d_ab = color_distance(&a, &b);
        let d_ba = color_distance(&b, &a);
        assert!((d_ab - d_ba).abs() < 1e-2);
    }

    #[test]
    fn distance_to_self_is_small() {
        let a = compute_color_descriptor(&flat(48, 48, [100.0, 150.0, 30.0]), 3);
        let d = color_distance(&a, &a);
        assert!(d < 5.0);
    }
}

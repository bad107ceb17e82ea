//! Template matcher: verifies a candidate found by an index by fitting a
//! rigid/similarity transform from needle keypoints to candidate keypoints
//! and checking the warped-back DCT hash (`spec.md` §4.E).

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::TemplateMatchError;
use crate::fingerprint::dct::{dct_hash, hamming_distance};
use crate::fingerprint::orb::{descriptor_distance, detect_orb};
use crate::image_buf::{clamp_longest_side, resize_area_average, GrayImage};
use crate::media::{AffineTransform, Roi};

/// Minimum matching descriptor pairs required before a transform fit is
/// attempted (`spec.md` §4.E step 4).
const MIN_MATCHING_PAIRS: usize = 3;

/// Outcome of a successful template match (`spec.md` §4.E steps 6-7).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateMatchResult {
    /// Hamming distance between the needle's DCT hash and the warped
    /// candidate's DCT hash. Lower is better, accepted below `dctThresh`.
    pub score: u32,
    /// Corners of the warped needle rectangle in candidate space.
    pub roi: Roi,
    /// Needle-to-original-candidate transform, rescaled if the candidate
    /// was downscaled for matching.
    pub transform: AffineTransform,
}

/// Pairwise cache keyed by `(needle_digest, candidate_digest)`, normalized
/// to sorted order on write and checked in both orderings on read
/// (`spec.md` §9 "Pairwise result cache with two key orderings";
/// `spec.md` §5 "Template-match cache: read-write lock").
#[derive(Default)]
pub struct TemplateMatchCache {
    entries: RwLock<HashMap<(String, String), TemplateMatchResult>>,
}

impl TemplateMatchCache {
    /// A fresh, empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted_key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    /// Look up a cached result for the pair, in either order.
    pub fn get(&self, a: &str, b: &str) -> Option<TemplateMatchResult> {
        let key = Self::sorted_key(a, b);
        self.entries.read().unwrap().get(&key).copied()
    }

    /// Insert a result, normalized to the sorted key.
    pub fn insert(&self, a: &str, b: &str, result: TemplateMatchResult) {
        let key = Self::sorted_key(a, b);
        self.entries.write().unwrap().insert(key, result);
    }
}

fn greedy_one_to_one_matches(
    needle_descriptors: &[[u8; 32]],
    candidate_descriptors: &[[u8; 32]],
    cv_thresh: u32,
) -> Vec<(usize, usize)> {
    let mut candidates: Vec<(u32, usize, usize)> = Vec::new();
    for (ni, nd) in needle_descriptors.iter().enumerate() {
        for (ci, cd) in candidate_descriptors.iter().enumerate() {
            let dist = descriptor_distance(nd, cd);
            if dist < cv_thresh {
                candidates.push((dist, ni, ci));
            }
        }
    }
    candidates.sort_by_key(|&(dist, _, _)| dist);

    let mut used_needle = vec![false; needle_descriptors.len()];
    let mut used_candidate = vec![false; candidate_descriptors.len()];
    let mut matches = Vec::new();
    for (_, ni, ci) in candidates {
        if used_needle[ni] || used_candidate[ci] {
            continue;
        }
        used_needle[ni] = true;
        used_candidate[ci] = true;
        matches.push((ni, ci));
    }
    matches
}

/// Fit a non-reflective similarity transform (`x' = a*x - b*y + tx`,
/// `y' = b*x + a*y + ty`) from `from` points to `to` points by least
/// squares over the `2N x 4` normal equations. Returns `None` if the
/// system is singular (all points coincident).
fn fit_similarity(from: &[(f32, f32)], to: &[(f32, f32)]) -> Option<AffineTransform> {
    // Normal equations for [a, b, tx, ty] built from rows:
    //   [x -y 1 0] . [a b tx ty] = x'
    //   [y  x 0 1] . [a b tx ty] = y'
    let mut ata = [[0.0f64; 4]; 4];
    let mut atb = [0.0f64; 4];

    for (&(x, y), &(xp, yp)) in from.iter().zip(to.iter()) {
        let (x, y, xp, yp) = (x as f64, y as f64, xp as f64, yp as f64);
        let rows = [([x, -y, 1.0, 0.0], xp), ([y, x, 0.0, 1.0], yp)];
        for (coeffs, rhs) in rows {
            for i in 0..4 {
                atb[i] += coeffs[i] * rhs;
                for j in 0..4 {
                    ata[i][j] += coeffs[i] * coeffs[j];
                }
            }
        }
    }

    let params = solve4(ata, atb)?;
    let [a, b, tx, ty] = params;
    Some(AffineTransform { matrix: [a as f32, -b as f32, tx as f32, b as f32, a as f32, ty as f32] })
}

/// Gaussian elimination with partial pivoting for a 4x4 system.
fn solve4(mut a: [[f64; 4]; 4], mut b: [f64; 4]) -> Option<[f64; 4]> {
    for col in 0..4 {
        let pivot_row = (col..4).max_by(|&r1, &r2| a[r1][col].abs().partial_cmp(&a[r2][col].abs()).unwrap())?;
        if a[pivot_row][col].abs() < 1e-9 {
            return None;
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);
        let pivot = a[col][col];
        for j in 0..4 {
            a[col][j] /= pivot;
        }
        b[col] /= pivot;
        for row in 0..4 {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            for j in 0..4 {
                a[row][j] -= factor * a[col][j];
            }
            b[row] -= factor * b[col];
        }
    }
    Some(b)
}

fn invert(t: &AffineTransform) -> Option<AffineTransform> {
    let m = &t.matrix;
    let (a, b, tx, c, d, ty) = (m[0] as f64, m[1] as f64, m[2] as f64, m[3] as f64, m[4] as f64, m[5] as f64);
    let det = a * d - b * c;
    if det.abs() < 1e-9 {
        return None;
    }
    let ia = d / det;
    let ib = -b / det;
    let ic = -c / det;
    let id = a / det;
    let itx = -(ia * tx + ib * ty);
    let ity = -(ic * tx + id * ty);
    Some(AffineTransform {
        matrix: [ia as f32, ib as f32, itx as f32, ic as f32, id as f32, ity as f32],
    })
}

fn warp_into_needle_frame(candidate: &GrayImage, needle_size: (usize, usize), forward: &AffineTransform) -> Option<GrayImage> {
    let inverse = invert(forward)?;
    let (width, height) = needle_size;
    let mut out = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let (sx, sy) = inverse.apply(x as f32, y as f32);
            let sx = sx.round();
            let sy = sy.round();
            if sx < 0.0 || sy < 0.0 || sx as usize >= candidate.width || sy as usize >= candidate.height {
                continue;
            }
            out.data[y * width + x] = candidate.data[sy as usize * candidate.width + sx as usize];
        }
    }
    Some(out)
}

/// Run the full template-match algorithm between a needle and one
/// candidate image (`spec.md` §4.E steps 2-7), skipping the cache lookup
/// (callers should check [`TemplateMatchCache::get`] first).
pub fn match_candidate(
    needle_gray: &GrayImage,
    needle_dct_hash: u64,
    candidate_gray: &GrayImage,
    cv_thresh: u32,
    dct_thresh: u32,
    needle_features: usize,
    haystack_features: usize,
) -> Result<TemplateMatchResult, TemplateMatchError> {
    let (needle_keypoints, needle_descriptors) = detect_orb(needle_gray, needle_features);

    let needle_area = (needle_gray.width * needle_gray.height) as f64;
    let candidate_area = (candidate_gray.width * candidate_gray.height) as f64;
    let (scaled_candidate, scale) = if candidate_area > 4.0 * needle_area {
        let max_side = needle_gray.width.max(needle_gray.height) * 2;
        let (w, h) = clamp_longest_side(candidate_gray.width, candidate_gray.height, max_side);
        let scale = w as f32 / candidate_gray.width as f32;
        (resize_area_average(candidate_gray, w, h), scale)
    } else {
        (candidate_gray.clone(), 1.0)
    };

    let (candidate_keypoints, candidate_descriptors) = detect_orb(&scaled_candidate, haystack_features);

    let pairs = greedy_one_to_one_matches(&needle_descriptors, &candidate_descriptors, cv_thresh);
    if pairs.len() < MIN_MATCHING_PAIRS {
        return Err(TemplateMatchError::InsufficientMatches { found: pairs.len() });
    }

    let needle_points: Vec<(f32, f32)> = pairs.iter().map(|&(ni, _)| (needle_keypoints[ni].x, needle_keypoints[ni].y)).collect();
    let candidate_points: Vec<(f32, f32)> =
        pairs.iter().map(|&(_, ci)| (candidate_keypoints[ci].x, candidate_keypoints[ci].y)).collect();

    let fitted = fit_similarity(&needle_points, &candidate_points).ok_or(TemplateMatchError::FitFailed)?;

    let warped = warp_into_needle_frame(&scaled_candidate, (needle_gray.width, needle_gray.height), &fitted)
        .ok_or(TemplateMatchError::FitFailed)?;
    let warped_hash = dct_hash(&warped);
    let score = hamming_distance(needle_dct_hash, warped_hash);
    if score >= dct_thresh {
        return Err(TemplateMatchError::FitFailed);
    }

    let corners = [
        (0.0, 0.0),
        (needle_gray.width as f32, 0.0),
        (needle_gray.width as f32, needle_gray.height as f32),
        (0.0, needle_gray.height as f32),
    ];
    let roi_corners = corners.map(|(x, y)| fitted.apply(x, y));
    let roi_corners_rescaled = roi_corners.map(|(x, y)| (x / scale, y / scale));

    let rescaled_transform = AffineTransform {
        matrix: [
            fitted.matrix[0] / scale,
            fitted.matrix[1] / scale,
            fitted.matrix[2] / scale,
            fitted.matrix[3] / scale,
            fitted.matrix[4] / scale,
            fitted.matrix[5] / scale,
        ],
    };

    Ok(TemplateMatchResult {
        score,
        roi: Roi { corners: roi_corners_rescaled },
        transform: rescaled_transform,
    })
}

/// Check the cache for `(needle_digest, candidate_digest)` before falling
/// back to [`match_candidate`], inserting successful results on a miss
/// (`spec.md` §4.E steps 1, 8).
#[allow(clippy::too_many_arguments)]
pub fn match_candidate_cached(
    needle_digest: &str,
    candidate_digest: &str,
    needle_gray: &GrayImage,
    needle_dct_hash: u64,
    candidate_gray: &GrayImage,
    cv_thresh: u32,
    dct_thresh: u32,
    needle_features: usize,
    haystack_features: usize,
    cache: &TemplateMatchCache,
) -> Result<TemplateMatchResult, TemplateMatchError> {
    if let Some(cached) = cache.get(needle_digest, candidate_digest) {
        return Ok(cached);
    }
    let result = match_candidate(
        needle_gray,
        needle_dct_hash,
        candidate_gray,
        cv_thresh,
        dct_thresh,
        needle_features,
        haystack_features,
    )?;
    cache.insert(needle_digest, candidate_digest, result);
    Ok(result)
}

//! End-to-end template-match scenario (`spec.md` §8 "Rotated 90°"): a
//! needle matched against a 90°-rotated copy of itself should still be
//! found by `dupfind::template::match_candidate`, with the recovered ROI
//! covering approximately the full candidate rectangle.

use dupfind::fingerprint::dct::dct_hash;
use dupfind::image_buf::GrayImage;
use dupfind::template::match_candidate;

/// An asymmetric texture (unlike a checkerboard, not invariant under 90°
/// rotation) so rotated keypoints are distinguishable from the original.
fn noisy_gradient(size: usize) -> GrayImage {
    let mut data = vec![0.0; size * size];
    for y in 0..size {
        for x in 0..size {
            let base = (x * 3 + y * 7) % 256;
            let speckle = (x * 11 ^ y * 17) % 41;
            data[y * size + x] = (base + speckle) as f32 % 256.0;
        }
    }
    GrayImage { width: size, height: size, data }
}

fn rotate_90_cw(img: &GrayImage) -> GrayImage {
    let (width, height) = (img.width, img.height);
    let mut out = GrayImage::new(height, width);
    for y in 0..height {
        for x in 0..width {
            let new_x = height - 1 - y;
            let new_y = x;
            out.data[new_y * out.width + new_x] = img.data[y * width + x];
        }
    }
    out
}

#[test]
fn rotated_copy_is_matched_with_roi_covering_the_full_rectangle() {
    let needle = noisy_gradient(96);
    let rotated = rotate_90_cw(&needle);
    let hash = dct_hash(&needle);

    let result = match_candidate(&needle, hash, &rotated, 64, 32, 200, 400)
        .expect("a 90-degree rotation of the same content should still template-match");

    let xs: Vec<f32> = result.roi.corners.iter().map(|&(x, _)| x).collect();
    let ys: Vec<f32> = result.roi.corners.iter().map(|&(_, y)| y).collect();
    let (min_x, max_x) = (xs.iter().cloned().fold(f32::MAX, f32::min), xs.iter().cloned().fold(f32::MIN, f32::max));
    let (min_y, max_y) = (ys.iter().cloned().fold(f32::MAX, f32::min), ys.iter().cloned().fold(f32::MIN, f32::max));

    let tolerance = 10.0;
    assert!(min_x.abs() < tolerance, "roi left edge should sit near 0, got {min_x}");
    assert!(min_y.abs() < tolerance, "roi top edge should sit near 0, got {min_y}");
    assert!((max_x - rotated.width as f32).abs() < tolerance, "roi right edge should sit near {}, got {max_x}", rotated.width);
    assert!((max_y - rotated.height as f32).abs() < tolerance, "roi bottom edge should sit near {}, got {max_y}", rotated.height);
}

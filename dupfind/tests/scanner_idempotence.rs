//! End-to-end scanner scenarios (`spec.md` §8 "Scanner idempotence" /
//! scenario 4): walk a real directory twice through `dupfind::scan::scan`,
//! backed by in-memory stub decoders so the test exercises the walker and
//! pipeline without a real codec.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;

use dupfind::error::FingerprintError;
use dupfind::image_buf::{GrayImage, RgbImage};
use dupfind::scan::cancel::CancelToken;
use dupfind::scan::config::ScanConfig;
use dupfind::scan::decode::{ImageSource, VideoSource};
use dupfind::scan::scan;

struct StubImageSource;
impl ImageSource for StubImageSource {
    fn load_rgb(&self, _path: &str) -> Result<RgbImage, FingerprintError> {
        Ok(RgbImage::new(16, 16))
    }
    fn file_size(&self, _path: &str) -> Result<u64, FingerprintError> {
        Ok(100)
    }
    fn content_digest(&self, path: &str) -> Result<String, FingerprintError> {
        Ok(path.to_string())
    }
}

struct StubVideoSource;
impl VideoSource for StubVideoSource {
    fn frames<'a>(
        &'a self,
        _path: &str,
        _skip_frames: u32,
        _cancel: &'a CancelToken,
    ) -> Result<Box<dyn Iterator<Item = (u32, GrayImage)> + 'a>, FingerprintError> {
        Ok(Box::new((0..3).map(|i| (i, GrayImage::new(8, 8)))))
    }
    fn file_size(&self, _path: &str) -> Result<u64, FingerprintError> {
        Ok(200)
    }
    fn content_digest(&self, path: &str) -> Result<String, FingerprintError> {
        Ok(path.to_string())
    }
}

fn tmp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("dupfind-scanner-test-{}-{name}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn second_scan_with_everything_expected_processes_nothing() {
    let dir = tmp_dir("idempotence");
    for name in ["a.jpg", "b.jpg", "c.png"] {
        fs::write(dir.join(name), b"x").unwrap();
    }
    fs::write(dir.join("d.mp4"), b"x").unwrap();

    let cancel = CancelToken::new();
    let config = ScanConfig::default();

    let mut expected = HashSet::new();
    let first = scan(
        &dir,
        &config,
        &mut expected,
        None,
        None,
        &StubImageSource,
        &StubVideoSource,
        &cancel,
        |_| {},
    );
    assert_eq!(first.media.len(), 4);
    assert!(first.missing.is_empty());

    let mut expected: HashSet<String> = first.media.iter().map(|m| m.path.clone()).collect();
    let cutoff = SystemTime::now();

    let second = scan(
        &dir,
        &config,
        &mut expected,
        Some(cutoff),
        None,
        &StubImageSource,
        &StubVideoSource,
        &cancel,
        |_| {},
    );
    assert!(second.media.is_empty(), "second scan should not re-process untouched files");
    assert!(second.missing.is_empty(), "expected should be fully drained on a clean second scan");
}

#[test]
fn a_file_removed_between_scans_is_reported_missing() {
    let dir = tmp_dir("removed");
    fs::write(dir.join("keep.jpg"), b"x").unwrap();
    fs::write(dir.join("gone.jpg"), b"x").unwrap();

    let cancel = CancelToken::new();
    let config = ScanConfig::default();
    let mut expected = HashSet::new();
    let first = scan(&dir, &config, &mut expected, None, None, &StubImageSource, &StubVideoSource, &cancel, |_| {});
    assert_eq!(first.media.len(), 2);

    let mut expected: HashSet<String> = first.media.iter().map(|m| m.path.clone()).collect();
    fs::remove_file(dir.join("gone.jpg")).unwrap();

    let second = scan(&dir, &config, &mut expected, None, None, &StubImageSource, &StubVideoSource, &cancel, |_| {});
    assert_eq!(second.missing.len(), 1);
    assert!(second.missing[0].ends_with("gone.jpg"));
}

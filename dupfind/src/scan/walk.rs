//! Directory walk and classification (`spec.md` §4.D steps 1-3).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::error::FingerprintError;
use crate::media::{extension_of, is_archive_extension, media_type_for_extension, virtual_path, MediaType};
use crate::scan::config::ScanConfig;

/// Enumerates an archive's image members; implemented outside `dupfind`
/// core (`spec.md` §1 "Out of scope: ... archive readers").
pub trait ArchiveReader: Send + Sync {
    /// List member paths inside `archive_path` that look like images.
    fn list_members(&self, archive_path: &Path) -> Result<Vec<String>, FingerprintError>;
}

/// Result of a single directory walk.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    /// Paths (local or `archive:member` virtual paths) to fingerprint as
    /// images.
    pub image_jobs: Vec<String>,
    /// Local paths to fingerprint as videos.
    pub video_jobs: Vec<String>,
    /// Paths that were present in `expected` but not seen on disk: the
    /// caller should remove them from the indexes.
    pub missing: Vec<String>,
}

fn is_newer_than(path: &Path, modified_since: Option<SystemTime>) -> bool {
    let Some(since) = modified_since else { return true };
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|mtime| mtime > since)
        .unwrap_or(true)
}

/// Walk `root`, classifying files and diffing against `expected`
/// (`spec.md` §4.D steps 1-2). `expected` is drained of every path seen;
/// whatever remains is returned as `missing`.
pub fn walk(
    root: &Path,
    config: &ScanConfig,
    expected: &mut HashSet<String>,
    modified_since: Option<SystemTime>,
    archive_reader: Option<&dyn ArchiveReader>,
) -> WalkOutcome {
    let mut outcome = WalkOutcome::default();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);

    for entry in walker.into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(ext) = extension_of(path) else { continue };
        let path_str = path.to_string_lossy().into_owned();

        if is_archive_extension(&ext) {
            let was_expected = expected.remove(&path_str);
            if was_expected && !is_newer_than(path, modified_since) {
                continue;
            }
            if let Some(reader) = archive_reader {
                if let Ok(members) = reader.list_members(path) {
                    for member in members {
                        let vpath = virtual_path(&path_str, &member);
                        expected.remove(&vpath);
                        outcome.image_jobs.push(vpath);
                    }
                }
            }
            continue;
        }

        let Some(media_type) = media_type_for_extension(&ext) else { continue };
        let was_expected = expected.remove(&path_str);
        if was_expected && !is_newer_than(path, modified_since) {
            continue;
        }
        match media_type {
            MediaType::Image => outcome.image_jobs.push(path_str),
            MediaType::Video => outcome.video_jobs.push(path_str),
            MediaType::Audio => {}
        }
    }

    outcome.missing = expected.drain().collect();
    outcome
}

/// Cost estimate for a video job (`duration * frame_rate * area /
/// thread_count`), used to sort the video queue longest-first so a small
/// pool stays saturated (`spec.md` §4.D step 3).
pub fn video_cost_estimate(duration_secs: f64, frame_rate: f64, area: u64, thread_count: usize) -> f64 {
    let threads = thread_count.max(1) as f64;
    duration_secs * frame_rate * area as f64 / threads
}

/// Sort video job paths longest-first by a caller-supplied cost function.
pub fn sort_video_queue_by_cost(jobs: &mut [String], cost_of: impl Fn(&str) -> f64) {
    jobs.sort_by(|a, b| cost_of(b).partial_cmp(&cost_of(a)).unwrap_or(std::cmp::Ordering::Equal));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct StubArchiveReader;
    impl ArchiveReader for StubArchiveReader {
        fn list_members(&self, _archive_path: &Path) -> Result<Vec<String>, FingerprintError> {
            Ok(vec!["page1.jpg".to_string(), "page2.png".to_string()])
        }
    }

    fn tmp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dupfind-walk-test-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn classifies_images_and_videos() {
        let dir = tmp_dir("classify");
        fs::write(dir.join("a.jpg"), b"x").unwrap();
        fs::write(dir.join("b.mp4"), b"x").unwrap();
        fs::write(dir.join("c.txt"), b"x").unwrap();
        let mut expected = HashSet::new();
        let outcome = walk(&dir, &ScanConfig::default(), &mut expected, None, None);
        assert_eq!(outcome.image_jobs.len(), 1);
        assert_eq!(outcome.video_jobs.len(), 1);
    }

    #[test]
    fn removed_expected_paths_are_reported_missing() {
        let dir = tmp_dir("missing");
        fs::write(dir.join("a.jpg"), b"x").unwrap();
        let mut expected: HashSet<String> = [dir.join("gone.jpg").to_string_lossy().into_owned()]
            .into_iter()
            .collect();
        let outcome = walk(&dir, &ScanConfig::default(), &mut expected, None, None);
        assert_eq!(outcome.missing.len(), 1);
    }

    #[test]
    fn archive_members_are_expanded_to_virtual_paths() {
        let dir = tmp_dir("archive");
        fs::write(dir.join("book.cbz"), b"x").unwrap();
        let mut expected = HashSet::new();
        let outcome = walk(&dir, &ScanConfig::default(), &mut expected, None, Some(&StubArchiveReader));
        assert_eq!(outcome.image_jobs.len(), 2);
        assert!(outcome.image_jobs[0].contains("book.cbz:"));
    }

    #[test]
    fn second_scan_with_everything_expected_enqueues_nothing() {
        let dir = tmp_dir("idempotent");
        fs::write(dir.join("a.jpg"), b"x").unwrap();
        fs::write(dir.join("b.mp4"), b"x").unwrap();
        let mut expected: HashSet<String> = [
            dir.join("a.jpg").to_string_lossy().into_owned(),
            dir.join("b.mp4").to_string_lossy().into_owned(),
        ]
        .into_iter()
        .collect();
        let outcome = walk(&dir, &ScanConfig::default(), &mut expected, None, None);
        assert!(outcome.image_jobs.is_empty());
        assert!(outcome.video_jobs.is_empty());
        assert!(outcome.missing.is_empty());
    }

    #[test]
    fn new_file_with_old_mtime_is_still_enqueued() {
        let dir = tmp_dir("new-file-old-mtime");
        fs::write(dir.join("a.jpg"), b"x").unwrap();
        let future = std::time::SystemTime::now() + std::time::Duration::from_secs(3600);
        let mut expected = HashSet::new();
        let outcome = walk(&dir, &ScanConfig::default(), &mut expected, Some(future), None);
        assert_eq!(outcome.image_jobs.len(), 1);
    }

    #[test]
    fn cost_estimate_orders_longest_first() {
        let mut jobs = vec!["short.mp4".to_string(), "long.mp4".to_string()];
        let costs = [("short.mp4", 1.0), ("long.mp4", 100.0)];
        sort_video_queue_by_cost(&mut jobs, |p| costs.iter().find(|(n, _)| *n == p).unwrap().1);
        assert_eq!(jobs, vec!["long.mp4".to_string(), "short.mp4".to_string()]);
    }
}

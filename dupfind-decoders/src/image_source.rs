//! Still-image decoding via the `image` crate
//! (`dupfind::scan::decode::ImageSource`), reading local files and zip/cbz
//! archive members through the same virtual-path convention `walk` uses.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use dupfind::error::FingerprintError;
use dupfind::image_buf::RgbImage;
use dupfind::media::archive_parts;
use dupfind::scan::decode::ImageSource;

use crate::digest::digest_bytes;

fn open_error(path: &str, reason: impl ToString) -> FingerprintError {
    FingerprintError::Open { path: PathBuf::from(path), reason: reason.to_string() }
}

/// Read the raw bytes of `path`, transparently extracting from a zip/cbz
/// member path (`archive.zip:member.jpg`) when present.
fn read_bytes(path: &str) -> Result<Vec<u8>, FingerprintError> {
    match archive_parts(path) {
        Some((archive_path, member)) => {
            let file = File::open(archive_path).map_err(|e| open_error(archive_path, e))?;
            let mut zip = zip::ZipArchive::new(file).map_err(|e| open_error(archive_path, e))?;
            let mut entry = zip.by_name(member).map_err(|e| open_error(path, e))?;
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut buf).map_err(|e| open_error(path, e))?;
            Ok(buf)
        }
        None => fs::read(path).map_err(|e| open_error(path, e)),
    }
}

/// Decodes images with the `image` crate; the one [`ImageSource`] the CLI
/// wires in by default.
#[derive(Default)]
pub struct ImageFileSource;

impl ImageFileSource {
    /// A fresh decoder with no state to share across calls.
    pub fn new() -> Self {
        ImageFileSource
    }
}

impl ImageSource for ImageFileSource {
    fn load_rgb(&self, path: &str) -> Result<RgbImage, FingerprintError> {
        let bytes = read_bytes(path)?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(|e| FingerprintError::Load { path: PathBuf::from(path), reason: e.to_string() })?
            .to_rgb8();
        let width = decoded.width() as usize;
        let height = decoded.height() as usize;
        let data = decoded.pixels().map(|p| [p[0] as f32, p[1] as f32, p[2] as f32]).collect();
        Ok(RgbImage { width, height, data })
    }

    fn file_size(&self, path: &str) -> Result<u64, FingerprintError> {
        match archive_parts(path) {
            Some((archive_path, member)) => {
                let file = File::open(archive_path).map_err(|e| open_error(archive_path, e))?;
                let mut zip = zip::ZipArchive::new(file).map_err(|e| open_error(archive_path, e))?;
                let entry = zip.by_name(member).map_err(|e| open_error(path, e))?;
                Ok(entry.size())
            }
            None => fs::metadata(path).map(|m| m.len()).map_err(|e| open_error(path, e)),
        }
    }

    fn content_digest(&self, path: &str) -> Result<String, FingerprintError> {
        let bytes = read_bytes(path)?;
        digest_bytes(&bytes, Path::new(path))
    }
}

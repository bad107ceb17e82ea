//! Zip/cbz member listing (`dupfind::scan::walk::ArchiveReader`).

use std::fs::File;
use std::path::{Path, PathBuf};

use dupfind::error::FingerprintError;
use dupfind::media::{media_type_for_extension, MediaType};
use dupfind::scan::walk::ArchiveReader;

fn open_error(path: &Path, reason: impl ToString) -> FingerprintError {
    FingerprintError::Open { path: path.to_path_buf(), reason: reason.to_string() }
}

/// Lists image members of `.zip`/`.cbz` archives via the `zip` crate.
#[derive(Default)]
pub struct ZipArchiveReader;

impl ZipArchiveReader {
    /// A fresh reader with no state to share across calls.
    pub fn new() -> Self {
        ZipArchiveReader
    }
}

impl ArchiveReader for ZipArchiveReader {
    fn list_members(&self, archive_path: &Path) -> Result<Vec<String>, FingerprintError> {
        let file = File::open(archive_path).map_err(|e| open_error(archive_path, e))?;
        let mut zip = zip::ZipArchive::new(file).map_err(|e| open_error(archive_path, e))?;

        let mut members = Vec::new();
        for i in 0..zip.len() {
            let entry = zip.by_index(i).map_err(|e| open_error(archive_path, e))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let ext = Path::new(&name).extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
            if ext.as_deref().and_then(media_type_for_extension) == Some(MediaType::Image) {
                members.push(name);
            }
        }
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    #[test]
    fn lists_only_image_members() {
        let dir = std::env::temp_dir().join("dupfind-decoders-archive-test");
        std::fs::create_dir_all(&dir).unwrap();
        let archive_path = dir.join("comic.cbz");
        {
            let file = File::create(&archive_path).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            zip.start_file("page001.jpg", FileOptions::default()).unwrap();
            zip.write_all(b"fake jpeg bytes").unwrap();
            zip.start_file("cover.txt", FileOptions::default()).unwrap();
            zip.write_all(b"not an image").unwrap();
            zip.add_directory("pages", FileOptions::default()).unwrap();
            zip.finish().unwrap();
        }

        let reader = ZipArchiveReader::new();
        let members = reader.list_members(&archive_path).unwrap();
        assert_eq!(members, vec!["page001.jpg".to_string()]);
    }
}

//! Atomic cache-file writes (`spec.md` §4.B): write to a temporary file in
//! the same directory, fsync it, then rename over the destination. Any step
//! failing surfaces as a [`FormatError::Io`]; the caller is expected to
//! retry on its next save cycle (`spec.md` §4.B "caller retries").

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::FormatError;

/// Atomically write `bytes` to `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), FormatError> {
    let tmp_path = tmp_path_for(path);
    let write_result = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();
    write_result.map_err(|source| {
        let _ = fs::remove_file(&tmp_path);
        FormatError::Io { path: path.to_path_buf(), source }
    })
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::path::PathBuf::from(tmp)
}

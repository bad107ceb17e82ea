//! Cache-freshness marker (`*.touch`, `spec.md` §4.B): an empty sentinel
//! file whose mtime is compared against the database file's mtime. If the
//! database is newer, the cache is stale and must be rebuilt from SQL.

use std::fs;
use std::path::Path;

use crate::error::FormatError;

/// Write (or refresh) the touch file at `path` to the current time.
pub fn touch(path: &Path) -> Result<(), FormatError> {
    fs::write(path, []).map_err(|source| FormatError::Io { path: path.to_path_buf(), source })
}

/// Whether the cache is fresh: the touch file exists and is not older than
/// `database_path`. A missing touch file or missing database file means the
/// cache is not fresh (the former "never built", the latter "nothing to
/// compare against").
pub fn is_fresh(touch_path: &Path, database_path: &Path) -> bool {
    let (Ok(touch_meta), Ok(db_meta)) = (fs::metadata(touch_path), fs::metadata(database_path))
    else {
        return false;
    };
    let (Ok(touch_mtime), Ok(db_mtime)) = (touch_meta.modified(), db_meta.modified()) else {
        return false;
    };
    touch_mtime >= db_mtime
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    fn tmp_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("dupfind-touch-test-{}-{name}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn fresh_when_touched_after_database() {
        let dir = tmp_dir("fresh");
        let db_path = dir.join("db.sqlite");
        let touch_path = dir.join("cache.touch");
        fs::write(&db_path, b"data").unwrap();
        sleep(Duration::from_millis(10));
        touch(&touch_path).unwrap();
        assert!(is_fresh(&touch_path, &db_path));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn stale_when_database_is_newer() {
        let dir = tmp_dir("stale");
        let db_path = dir.join("db.sqlite");
        let touch_path = dir.join("cache.touch");
        touch(&touch_path).unwrap();
        sleep(Duration::from_millis(10));
        fs::write(&db_path, b"data").unwrap();
        assert!(!is_fresh(&touch_path, &db_path));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_touch_file_is_not_fresh() {
        let dir = tmp_dir("missing");
        let db_path = dir.join("db.sqlite");
        fs::write(&db_path, b"data").unwrap();
        assert!(!is_fresh(&dir.join("no.touch"), &db_path));
        let _ = fs::remove_dir_all(&dir);
    }
}

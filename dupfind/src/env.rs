//! Environment-variable reads (`spec.md` §6). Library code never calls
//! `std::env::var` itself — these are read once at the edge (the CLI's
//! `main`) and threaded down as explicit parameters, grounded on
//! `original_source/cvutil.cpp`'s `getenv("DEBUG_COLORDESCRIPTOR")` and
//! `original_source/gui/cropwidget.cpp`'s
//! `qEnvironmentVariable("XDG_CACHE_HOME", ...)`.

use std::path::PathBuf;

/// Whether verbose color-descriptor debug logging is requested.
pub fn debug_color_descriptor() -> bool {
    std::env::var_os("DEBUG_COLORDESCRIPTOR").is_some()
}

/// The cache directory root: `$XDG_CACHE_HOME` if set, else
/// `$HOME/.cache`, else `None`.
pub fn cache_dir() -> Option<PathBuf> {
    if let Some(xdg) = std::env::var_os("XDG_CACHE_HOME") {
        if !xdg.is_empty() {
            return Some(PathBuf::from(xdg));
        }
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache"))
}

//! Error taxonomy for the indexing and query pipeline.
//!
//! Errors are split by how the caller is expected to react: per-file
//! problems encountered while scanning are recorded and do not abort the
//! scan, while a handful of categories are always fatal to the process.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while extracting a fingerprint from a single file.
///
/// These are the categories recorded in the scanner's per-path error map
/// (`spec.md` §7). None of them are fatal on their own.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FingerprintError {
    /// I/O could not open a file or archive member.
    #[error("could not open {path:?}: {reason}")]
    Open {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying reason, stringified (errors here are per-path and
        /// recorded, not propagated as `std::error::Error` sources).
        reason: String,
    },
    /// The decoder rejected the data or produced no image.
    #[error("decoder rejected {path:?}: {reason}")]
    Load {
        /// Path that failed to decode.
        path: PathBuf,
        /// Decoder-reported reason.
        reason: String,
    },
    /// A JPEG file is missing its end-of-image marker.
    #[error("truncated JPEG: {path:?}")]
    JpegTruncated {
        /// Path of the truncated file.
        path: PathBuf,
    },
    /// The file is smaller than the configured minimum size.
    #[error("file too small: {path:?} ({size} bytes)")]
    TooSmall {
        /// Path of the file.
        path: PathBuf,
        /// Observed size in bytes.
        size: u64,
    },
    /// The file extension is not registered with any known media type.
    #[error("unsupported file type: {path:?}")]
    Unsupported {
        /// Path of the file.
        path: PathBuf,
    },
    /// Decoding was interrupted by a cancel token.
    #[error("decode cancelled: {path:?}")]
    DecodeCancelled {
        /// Path being decoded when cancellation was observed.
        path: PathBuf,
    },
}

impl FingerprintError {
    /// The path this error is attached to, for the scanner's error map.
    pub fn path(&self) -> &std::path::Path {
        match self {
            FingerprintError::Open { path, .. }
            | FingerprintError::Load { path, .. }
            | FingerprintError::JpegTruncated { path }
            | FingerprintError::TooSmall { path, .. }
            | FingerprintError::Unsupported { path }
            | FingerprintError::DecodeCancelled { path } => path,
        }
    }
}

/// Errors from a `Database` backend. Per `spec.md` §7, any error here is
/// treated as fatal to the process — the schema is a trusted invariant.
#[derive(Debug, Error)]
#[error("sql error: {0}")]
pub struct SqlFatal(pub String);

/// Errors from the allocator pool (`spec.md` §5, image allocator policy).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("allocation of {requested} bytes refused: would cross the free-memory floor")]
pub struct OomError {
    /// Size of the allocation that was refused.
    pub requested: usize,
}

/// Errors surfaced by the on-disk cache formats (`spec.md` §4.B).
#[derive(Debug, Error)]
pub enum FormatError {
    /// An I/O error while reading or writing a cache file.
    #[error("io error on {path:?}: {source}")]
    Io {
        /// Path of the file being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file was shorter than its own declared length, or otherwise
    /// malformed. Per `spec.md` §4.B / §8, this is not fatal: the loader
    /// treats the cache as empty and rebuilds from SQL.
    #[error("corrupt or truncated cache file {path:?}: {reason}")]
    Corrupt {
        /// Path of the file being accessed.
        path: PathBuf,
        /// Human-readable reason.
        reason: String,
    },
}

/// Errors from `SearchIndex` operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The backing SQL store reported an error; always fatal.
    #[error(transparent)]
    Sql(#[from] SqlFatal),
    /// A cache file was malformed; not fatal, triggers a rebuild.
    #[error(transparent)]
    Format(#[from] FormatError),
}

/// Errors from the template matcher (`spec.md` §4.E).
#[derive(Debug, Error)]
pub enum TemplateMatchError {
    /// Fewer than 3 matching descriptor pairs were found between needle and
    /// candidate; no transform can be fit.
    #[error("insufficient matching feature pairs: {found} < 3")]
    InsufficientMatches {
        /// Number of one-to-one matches found.
        found: usize,
    },
    /// The affine/similarity fit failed to converge to a usable transform.
    #[error("transform fit failed")]
    FitFailed,
}

/// Errors from the query engine (`spec.md` §4.F).
#[derive(Debug, Error)]
pub enum QueryError {
    /// The needle's media type is not included in `SearchParams::query_types`.
    #[error("needle type {needle_type:?} is not in queryTypes")]
    TypeNotAllowed {
        /// The needle's media type.
        needle_type: crate::media::MediaType,
    },
    /// The needle lacks the descriptor/hash required by the chosen algorithm.
    #[error("needle is not ready for algorithm {algo:?}: missing {missing}")]
    NeedleNotReady {
        /// The algorithm that was requested.
        algo: crate::index::Algorithm,
        /// Name of the missing descriptor.
        missing: &'static str,
    },
    /// A lower-level index error propagated up.
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Top-level error for scanner-driven operations. Most variants wrap a
/// per-file `FingerprintError` that the caller has chosen to propagate
/// instead of recording in the error map (e.g. for the single-image
/// pipeline used to prepare a query needle, `spec.md` §4.F step 1).
#[derive(Debug, Error)]
pub enum ScanError {
    /// Per-file fingerprinting failed.
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),
    /// The backing SQL store reported an error; always fatal.
    #[error(transparent)]
    Sql(#[from] SqlFatal),
    /// The allocator pool refused a request and compaction did not help.
    #[error(transparent)]
    Oom(#[from] OomError),
}

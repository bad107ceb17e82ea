//! On-disk cache formats for index persistence (`spec.md` §4.B). Every
//! format here is an optimization: the database is the source of truth, and
//! a missing or corrupt cache file only costs a rebuild, never correctness.

pub mod atomic;
pub mod idmap;
pub mod matrix;
pub mod touch;
pub mod vdx;

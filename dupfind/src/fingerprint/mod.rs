//! Perceptual fingerprint primitives (`spec.md` §4.A).
//!
//! Each submodule implements one self-contained algorithm; none of them
//! know about files, archives or the database — that separation mirrors the
//! teacher crate's split between pixel-level metrics (`psnr`, `ssim`,
//! `ciede`) and the decoder/IO layer that feeds them frames.

pub mod autocrop;
pub mod color;
pub mod dct;
pub mod orb;
pub mod video;

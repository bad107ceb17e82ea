//! Codec and archive backends for `dupfind`'s decode-boundary traits
//! (`dupfind::scan::decode::{ImageSource, VideoSource}`,
//! `dupfind::scan::walk::ArchiveReader`, `dupfind::media::exif_cache::ExifReader`).
//! Kept in a separate crate so `dupfind` core never links against an image,
//! archive, or video-decode library directly (`spec.md` §1).

mod archive;
mod digest;
mod exif;
mod image_source;
mod video_source;

pub use archive::ZipArchiveReader;
pub use exif::ImageExifReader;
pub use image_source::ImageFileSource;
pub use video_source::Y4mVideoSource;

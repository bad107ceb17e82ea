//! Scan a directory tree and query it for perceptual duplicates
//! (`spec.md` §4.D/§4.F), wiring `dupfind`'s decode-agnostic core to the
//! `image`/`zip`/`y4m`-backed implementations in `dupfind-decoders`.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dupfind_decoders::{ImageFileSource, Y4mVideoSource, ZipArchiveReader};
use dupfind::index::{dct_index::DctIndex, Algorithm, SearchIndex, SearchParams};
use dupfind::db::MemoryDatabase;
use dupfind::media::Media;
use dupfind::scan::cancel::CancelToken;
use dupfind::scan::config::ScanConfig;
use dupfind::scan::fingerprint::fingerprint_image;

#[derive(Parser)]
#[command(name = "dupfind", about = "Content-based duplicate media finder")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Walk a directory, fingerprint every image/video/archive member, and
    /// report how much was indexed.
    Scan {
        /// Directory to walk.
        root: PathBuf,
        /// Worker threads for the image pool.
        #[arg(long, default_value_t = 4)]
        image_threads: usize,
    },
    /// Fingerprint a needle image and search a freshly-scanned directory's
    /// DCT index for near-duplicates.
    Query {
        /// Image to search for.
        needle: PathBuf,
        /// Directory to search within.
        root: PathBuf,
        /// Hamming-distance threshold for a hit.
        #[arg(long, default_value_t = 5)]
        dct_thresh: u32,
    },
}

fn build_scan_config(image_threads: usize) -> ScanConfig {
    ScanConfig { image_threads, ..ScanConfig::default() }
}

/// Walk `root`, fingerprint every job found, and hand back the resulting
/// media keyed by id alongside the raw list (`spec.md` §4.D steps 1-6).
fn scan_directory(root: &PathBuf, config: &ScanConfig) -> (Vec<Media>, usize) {
    let image_source = ImageFileSource::new();
    let video_source = Y4mVideoSource::new();
    let archive_reader = ZipArchiveReader::new();
    let cancel = CancelToken::new();
    let mut expected = std::collections::HashSet::new();

    let report = dupfind::scan::scan(
        root,
        config,
        &mut expected,
        None,
        Some(&archive_reader),
        &image_source,
        &video_source,
        &cancel,
        |_batch| {},
    );
    let error_count = report.errors.len();
    (report.media, error_count)
}

/// Assign sequential ids, load everything into a fresh `DctIndex`, and
/// return the index alongside an id -> `Media` lookup table.
fn build_dct_index(mut media: Vec<Media>) -> (DctIndex, HashMap<u32, Media>) {
    for (next_id, item) in media.iter_mut().enumerate() {
        item.id = next_id as u32 + 1;
    }
    let db = MemoryDatabase::new();
    let mut index = DctIndex::new();
    index.create_tables(&db).expect("in-memory database never errors");
    index.add_records(&db, &media).expect("in-memory database never errors");
    index.add(&media);

    let by_id = media.into_iter().map(|m| (m.id, m)).collect();
    (index, by_id)
}

fn run_scan(root: PathBuf, image_threads: usize) {
    log::info!("scanning {}", root.display());
    let config = build_scan_config(image_threads);
    let (media, error_count) = scan_directory(&root, &config);
    if error_count > 0 {
        log::warn!("{error_count} path(s) failed to fingerprint");
    }
    let summary = serde_json::json!({
        "indexed": media.len(),
        "errored": error_count,
    });
    println!("{}", serde_json::to_string_pretty(&summary).unwrap());
}

fn run_query(needle: PathBuf, root: PathBuf, dct_thresh: u32) {
    log::info!("indexing {} to query against {}", root.display(), needle.display());
    let config = ScanConfig::default();
    let (media, _errors) = scan_directory(&root, &config);
    let (index, by_id) = build_dct_index(media);

    let image_source = ImageFileSource::new();
    let needle_path = needle.to_string_lossy().into_owned();
    let needle_media = fingerprint_image(&needle_path, &image_source, 100)
        .unwrap_or_else(|e| panic!("could not fingerprint needle {needle_path:?}: {e}"));

    let params = SearchParams { algo: Algorithm::Dct, dct_thresh, ..SearchParams::default() };
    let hits = index.find(&needle_media, &params);
    log::info!("found {} candidate(s)", hits.len());

    let results: Vec<_> = hits
        .iter()
        .filter_map(|hit| by_id.get(&hit.media_id).map(|m| (hit, m)))
        .map(|(hit, m)| serde_json::json!({ "path": m.path, "score": hit.score }))
        .collect();
    println!("{}", serde_json::to_string_pretty(&results).unwrap());
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Scan { root, image_threads } => run_scan(root, image_threads),
        Command::Query { needle, root, dct_thresh } => run_query(needle, root, dct_thresh),
    }
}

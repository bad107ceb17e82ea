//! Query engine: turns a fingerprinted needle into a ranked, filtered list
//! of matches (`spec.md` §4.F).

use std::collections::{HashMap, HashSet};

use crate::error::QueryError;
use crate::image_buf::GrayImage;
use crate::index::{Algorithm, MirrorMask, SearchIndex, SearchParams};
use crate::media::{match_flags, Match, Media, MediaGroup, MediaGroupList};
use crate::template::{match_candidate_cached, TemplateMatchCache};

/// Resolves a matching media id (from [`crate::media::Match::media_id`])
/// into its full [`Media`] record. The persistence layer that backs this
/// is out of scope (`spec.md` §1), same boundary as [`crate::db::Database`].
pub trait MediaStore: Send + Sync {
    /// Look up one media record by id.
    fn get(&self, id: u32) -> Option<Media>;
}

/// Extra wiring needed only when `params.template_match` is set
/// (`spec.md` §4.F step 5): the needle's grayscale buffer plus a loader for
/// a candidate's grayscale buffer, and the shared pairwise cache.
pub struct TemplateMatchContext<'a> {
    /// Grayscale buffer of the needle image.
    pub needle_gray: &'a GrayImage,
    /// Load a candidate's grayscale buffer by media id, if available.
    pub load_candidate_gray: &'a dyn Fn(u32) -> Option<GrayImage>,
    /// Shared pairwise template-match cache.
    pub cache: &'a TemplateMatchCache,
}

/// Checks whether `needle` carries the descriptor/hash the chosen
/// algorithm needs (`spec.md` §4.F step 2).
fn needle_missing_field(needle: &Media, algo: Algorithm) -> Option<&'static str> {
    match algo {
        Algorithm::Dct => (needle.dct_hash == 0).then_some("dct_hash"),
        Algorithm::FeatureDct => needle.keypoint_hashes.is_empty().then_some("keypoint_hashes"),
        Algorithm::Orb => needle.descriptors.is_empty().then_some("descriptors"),
        Algorithm::Color => needle.color_descriptor.is_empty().then_some("color_descriptor"),
        Algorithm::Video => needle.video_index.is_empty().then_some("video_index"),
    }
}

/// Validate the needle against `params` (`spec.md` §4.F step 2).
pub fn validate_needle(needle: &Media, params: &SearchParams) -> Result<(), QueryError> {
    if let Some(allowed) = &params.query_types {
        if !allowed.contains(&needle.media_type) {
            return Err(QueryError::TypeNotAllowed { needle_type: needle.media_type });
        }
    }
    if let Some(missing) = needle_missing_field(needle, params.algo) {
        return Err(QueryError::NeedleNotReady { algo: params.algo, missing });
    }
    Ok(())
}

fn resolve(store: &dyn MediaStore, hits: &[Match]) -> Vec<Media> {
    hits.iter()
        .filter_map(|hit| {
            let mut media = store.get(hit.media_id)?;
            media.score = hit.score;
            Some(media)
        })
        .collect()
}

/// Union candidates by media id, keeping the better (lower) score when a
/// candidate is found by more than one mirror variant (`spec.md` §4.F
/// step 4).
fn union_by_id(into: &mut Vec<Media>, more: Vec<Media>) {
    let mut best: HashMap<u32, usize> = HashMap::new();
    for (idx, m) in into.iter().enumerate() {
        best.insert(m.id, idx);
    }
    for candidate in more {
        match best.get(&candidate.id) {
            Some(&idx) if into[idx].score <= candidate.score => {}
            Some(&idx) => into[idx] = candidate,
            None => {
                best.insert(candidate.id, into.len());
                into.push(candidate);
            }
        }
    }
}

/// Run steps 3-5 of the query protocol: the primary `find`, the mirrored
/// reruns, and template-match verification (`spec.md` §4.F).
pub fn search(
    needle: &Media,
    index: &dyn SearchIndex,
    store: &dyn MediaStore,
    params: &SearchParams,
    mirror_needles: &[(MirrorMask, Media)],
    template_ctx: Option<&TemplateMatchContext>,
) -> Result<Vec<Media>, QueryError> {
    validate_needle(needle, params)?;

    let mut matches = resolve(store, &index.find(needle, params));

    for (bit, mirrored) in mirror_needles {
        let wants = (bit.horizontal && params.mirror_mask.horizontal) || (bit.vertical && params.mirror_mask.vertical);
        if !wants {
            continue;
        }
        let hits = index.find(mirrored, params);
        union_by_id(&mut matches, resolve(store, &hits));
    }

    if params.template_match && !matches!(params.algo, Algorithm::Video) {
        if let Some(ctx) = template_ctx {
            matches.retain_mut(|candidate| {
                let Some(candidate_gray) = (ctx.load_candidate_gray)(candidate.id) else {
                    return false;
                };
                match match_candidate_cached(
                    &needle.content_digest,
                    &candidate.content_digest,
                    ctx.needle_gray,
                    needle.dct_hash,
                    &candidate_gray,
                    params.cv_thresh,
                    params.dct_thresh,
                    params.needle_features,
                    params.haystack_features,
                    ctx.cache,
                ) {
                    Ok(result) => {
                        candidate.score = result.score as i32;
                        candidate.roi = Some(result.roi);
                        candidate.transform = Some(result.transform);
                        true
                    }
                    Err(_) => false,
                }
            });
        }
    }

    sort_matches(needle, &mut matches);
    if matches.len() > params.max_matches {
        matches.truncate(params.max_matches);
    }
    if matches.len() < params.min_matches {
        matches.clear();
    }
    Ok(matches)
}

/// Sort ascending by score, with exact matches (identical `content_digest`
/// to the needle) sinking to the front regardless of score (`spec.md`
/// §4.F step 6). Full flag classification (including the weed set) is a
/// separate, later step via [`classify`].
pub fn sort_matches(needle: &Media, matches: &mut [Media]) {
    let is_exact = |m: &Media| m.content_digest == needle.content_digest;
    matches.sort_by(|a, b| is_exact(b).cmp(&is_exact(a)).then(a.score.cmp(&b.score)));
}

/// Compute the match-classification flags of `candidate` relative to
/// `needle` (`spec.md` §4.F "State machine for match classification").
pub fn classify(needle: &Media, candidate: &mut Media, weed_digests: &HashSet<String>) {
    let mut flags = 0u32;
    if candidate.content_digest == needle.content_digest {
        flags |= match_flags::EXACT;
    }
    let needle_area = (needle.width.max(0) as i64) * (needle.height.max(0) as i64);
    let candidate_area = (candidate.width.max(0) as i64) * (candidate.height.max(0) as i64);
    if candidate_area > needle_area {
        flags |= match_flags::BIGGER_DIMENSIONS;
    }
    if candidate.original_size > needle.original_size {
        flags |= match_flags::BIGGER_FILE;
    }
    if candidate.compression_ratio < needle.compression_ratio {
        flags |= match_flags::LESS_COMPRESSED;
    }
    if weed_digests.contains(&candidate.content_digest) {
        flags |= match_flags::IS_WEED;
    }
    candidate.match_flags = flags;
}

/// Drop the needle itself from a match list, by id when persisted or by
/// content digest otherwise (`spec.md` §4.F step 7 "filter self").
pub fn filter_self(needle: &Media, matches: Vec<Media>) -> Vec<Media> {
    matches
        .into_iter()
        .filter(|m| if needle.is_valid() { m.id != needle.id } else { m.content_digest != needle.content_digest })
        .collect()
}

/// Drop matches that share the needle's parent directory (`spec.md` §4.F
/// step 7 "filter same parent").
pub fn filter_same_parent(needle: &Media, matches: Vec<Media>) -> Vec<Media> {
    matches.into_iter().filter(|m| m.parent_path() != needle.parent_path()).collect()
}

/// Drop matches the user has explicitly marked as not-a-duplicate,
/// keyed by unordered `(digest, digest)` pairs (`spec.md` §4.F step 7
/// "filter negative-matches").
pub fn filter_negative_matches(
    needle: &Media,
    matches: Vec<Media>,
    negative_pairs: &HashSet<(String, String)>,
) -> Vec<Media> {
    matches
        .into_iter()
        .filter(|m| {
            let key = sorted_pair(&needle.content_digest, &m.content_digest);
            !negative_pairs.contains(&key)
        })
        .collect()
}

fn sorted_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Keep only the first occurrence of each content digest, preserving order
/// (`spec.md` §4.F step 7 "deduplicate groups").
pub fn dedupe_by_digest(matches: Vec<Media>) -> Vec<Media> {
    let mut seen = HashSet::new();
    matches.into_iter().filter(|m| seen.insert(m.content_digest.clone())).collect()
}

/// Expand a needle-plus-matches group into every unique unordered pair,
/// needle first within each pair when it participates (`spec.md` §4.F
/// step 7 "expand n-ary groups into pairs").
pub fn expand_to_pairs(group: &MediaGroup) -> Vec<(Media, Media)> {
    let mut pairs = Vec::new();
    for i in 0..group.len() {
        for j in (i + 1)..group.len() {
            pairs.push((group[i].clone(), group[j].clone()));
        }
    }
    pairs
}

/// Merge groups that share at least one content digest into a single
/// group (`spec.md` §4.F step 7 "merge n-connected groups"), via
/// union-find over digests.
pub fn merge_connected_groups(groups: MediaGroupList) -> MediaGroupList {
    let mut parent: HashMap<String, String> = HashMap::new();

    fn find(parent: &mut HashMap<String, String>, key: &str) -> String {
        let next = parent.get(key).cloned().unwrap_or_else(|| key.to_string());
        if next == key {
            key.to_string()
        } else {
            let root = find(parent, &next);
            parent.insert(key.to_string(), root.clone());
            root
        }
    }

    for group in &groups {
        let mut digests = group.iter().map(|m| m.content_digest.clone());
        let Some(first) = digests.next() else { continue };
        parent.entry(first.clone()).or_insert_with(|| first.clone());
        for digest in digests {
            parent.entry(digest.clone()).or_insert_with(|| digest.clone());
            let root_a = find(&mut parent, &first);
            let root_b = find(&mut parent, &digest);
            if root_a != root_b {
                parent.insert(root_b, root_a);
            }
        }
    }

    let mut merged: HashMap<String, MediaGroup> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for group in groups {
        for media in group {
            let root = find(&mut parent, &media.content_digest);
            let entry = merged.entry(root.clone()).or_insert_with(|| {
                order.push(root.clone());
                Vec::new()
            });
            if !entry.iter().any(|m: &Media| m.content_digest == media.content_digest) {
                entry.push(media);
            }
        }
    }
    order.into_iter().map(|root| merged.remove(&root).unwrap_or_default()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::test_support::media_with_dct_hash;
    use crate::media::MediaType;

    struct StubStore {
        media: HashMap<u32, Media>,
    }
    impl MediaStore for StubStore {
        fn get(&self, id: u32) -> Option<Media> {
            self.media.get(&id).cloned()
        }
    }

    struct StubIndex {
        hits: Vec<Match>,
    }
    impl SearchIndex for StubIndex {
        fn create_tables(&self, _db: &dyn crate::db::Database) -> Result<(), crate::error::IndexError> {
            Ok(())
        }
        fn add_records(&self, _db: &dyn crate::db::Database, _media: &[Media]) -> Result<(), crate::error::IndexError> {
            Ok(())
        }
        fn remove_records(&self, _db: &dyn crate::db::Database, _ids: &[u32]) -> Result<(), crate::error::IndexError> {
            Ok(())
        }
        fn count(&self) -> usize {
            self.hits.len()
        }
        fn memory_usage(&self) -> usize {
            0
        }
        fn is_loaded(&self) -> bool {
            true
        }
        fn load(
            &mut self,
            _db: &dyn crate::db::Database,
            _cache_path: &std::path::Path,
            _data_path: &std::path::Path,
        ) -> Result<(), crate::error::IndexError> {
            Ok(())
        }
        fn save(&self, _cache_path: &std::path::Path) -> Result<(), crate::error::IndexError> {
            Ok(())
        }
        fn add(&mut self, _media: &[Media]) {}
        fn remove(&mut self, _ids: &[u32]) {}
        fn find(&self, _needle: &Media, _params: &SearchParams) -> Vec<Match> {
            self.hits.clone()
        }
        fn find_index_data(&self, _media: &mut Media) -> bool {
            false
        }
    }

    #[test]
    fn rejects_needle_missing_the_algorithm_field() {
        let needle = media_with_dct_hash(1, 0);
        let params = SearchParams::default();
        assert!(matches!(validate_needle(&needle, &params), Err(QueryError::NeedleNotReady { .. })));
    }

    #[test]
    fn rejects_needle_of_disallowed_type() {
        let needle = media_with_dct_hash(1, 42);
        let mut params = SearchParams::default();
        params.query_types = Some(vec![MediaType::Video]);
        assert!(matches!(validate_needle(&needle, &params), Err(QueryError::TypeNotAllowed { .. })));
    }

    #[test]
    fn search_resolves_and_sorts_by_score() {
        let needle = media_with_dct_hash(1, 42);
        let mut store = StubStore { media: HashMap::new() };
        let mut far = media_with_dct_hash(2, 99);
        far.content_digest = "far".to_string();
        let mut near = media_with_dct_hash(3, 43);
        near.content_digest = "near".to_string();
        store.media.insert(2, far);
        store.media.insert(3, near);

        let index = StubIndex { hits: vec![Match { media_id: 2, score: 10 }, Match { media_id: 3, score: 1 }] };
        let params = SearchParams::default();
        let results = search(&needle, &index, &store, &params, &[], None).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, 3);
    }

    #[test]
    fn exact_match_sinks_to_front_despite_worse_score() {
        let mut needle = media_with_dct_hash(1, 42);
        needle.content_digest = "same".to_string();
        let mut exact = media_with_dct_hash(2, 42);
        exact.content_digest = "same".to_string();
        exact.score = 50;
        let mut close = media_with_dct_hash(3, 42);
        close.content_digest = "different".to_string();
        close.score = 1;
        let mut matches = vec![close, exact];
        sort_matches(&needle, &mut matches);
        assert_eq!(matches[0].content_digest, "same");
    }

    #[test]
    fn filter_self_drops_needle_by_digest_when_unpersisted() {
        let mut needle = media_with_dct_hash(0, 1);
        needle.content_digest = "x".to_string();
        let mut same = media_with_dct_hash(5, 1);
        same.content_digest = "x".to_string();
        let filtered = filter_self(&needle, vec![same]);
        assert!(filtered.is_empty());
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let mut a = media_with_dct_hash(1, 1);
        a.content_digest = "x".to_string();
        let mut b = media_with_dct_hash(2, 1);
        b.content_digest = "x".to_string();
        let deduped = dedupe_by_digest(vec![a, b]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].id, 1);
    }

    #[test]
    fn merge_connected_groups_joins_overlapping_groups() {
        let mut a = media_with_dct_hash(1, 1);
        a.content_digest = "a".to_string();
        let mut b = media_with_dct_hash(2, 1);
        b.content_digest = "b".to_string();
        let mut c = media_with_dct_hash(3, 1);
        c.content_digest = "c".to_string();
        let groups = vec![vec![a.clone(), b.clone()], vec![b.clone(), c.clone()]];
        let merged = merge_connected_groups(groups);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].len(), 3);
    }

    #[test]
    fn expand_to_pairs_produces_all_unique_pairs() {
        let group = vec![media_with_dct_hash(1, 1), media_with_dct_hash(2, 1), media_with_dct_hash(3, 1)];
        let pairs = expand_to_pairs(&group);
        assert_eq!(pairs.len(), 3);
    }

    #[test]
    fn classify_sets_all_applicable_flags() {
        let mut needle = media_with_dct_hash(1, 1);
        needle.width = 100;
        needle.height = 100;
        needle.original_size = 1000;
        needle.compression_ratio = 2.0;
        let mut candidate = media_with_dct_hash(2, 1);
        candidate.content_digest = "weed-digest".to_string();
        candidate.width = 200;
        candidate.height = 200;
        candidate.original_size = 2000;
        candidate.compression_ratio = 1.0;
        let weeds: HashSet<String> = ["weed-digest".to_string()].into_iter().collect();
        classify(&needle, &mut candidate, &weeds);
        assert_ne!(candidate.match_flags & match_flags::BIGGER_DIMENSIONS, 0);
        assert_ne!(candidate.match_flags & match_flags::BIGGER_FILE, 0);
        assert_ne!(candidate.match_flags & match_flags::LESS_COMPRESSED, 0);
        assert_ne!(candidate.match_flags & match_flags::IS_WEED, 0);
        assert_eq!(candidate.match_flags & match_flags::EXACT, 0);
    }
}

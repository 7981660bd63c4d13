use std::path::Path;
use std::sync::Arc;

use log::{debug, error, info};

use crate::gallery::archive::Target;
use crate::gallery::config::ArchiveTypeConfig;
use crate::gallery::delay::DelayScheduler;
use crate::gallery::lookup::{self, GalleryIdentifier, LookupError, RequestSender};
use crate::gallery::matching;

/// Delay channel shared by all gallery hash-search calls.
pub const SEARCH_CHANNEL: &str = "search";

/// One distinct gallery observed during the search phase, with the number of
/// probed images that matched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMatch {
    pub identifier: GalleryIdentifier,
    pub match_count: u32,
}

/// Search results are ambiguous when they carry no discriminating evidence:
/// no results at all, or more than one gallery tying the best match count.
pub fn is_ambiguous(matches: &[SearchMatch]) -> bool {
    if matches.is_empty() {
        return true;
    }
    let max_count = matches.iter().map(|m| m.match_count).max().unwrap_or(0);
    matches.iter().filter(|m| m.match_count == max_count).count() > 1
}

/// The target's image files, in probe order.
pub fn select_images(
    files: &[String],
    image_extensions: &[String],
    preferred_order: Option<&[i64]>,
) -> Vec<String> {
    let images: Vec<String> = files
        .iter()
        .filter(|f| matching::file_has_extension(Path::new(f), image_extensions))
        .cloned()
        .collect();
    apply_preferred_order(images, preferred_order)
}

/// Reorders a list so the configured indices come first, in configured
/// order. Negative indices count from the end; out-of-range and duplicate
/// indices are skipped. The remaining entries follow round-robin from the
/// last picked index, so every entry appears exactly once.
pub fn apply_preferred_order(list: Vec<String>, order: Option<&[i64]>) -> Vec<String> {
    let Some(order) = order else {
        return list;
    };
    let len = list.len();
    let mut visited = vec![false; len];
    let mut results = Vec::with_capacity(len);
    let mut index = 0usize;

    for &i in order {
        let i = if i < 0 { i + len as i64 } else { i };
        if (0..len as i64).contains(&i) && !visited[i as usize] {
            index = i as usize;
            visited[index] = true;
            results.push(list[index].clone());
        }
    }

    if results.len() < len {
        for _ in 0..len {
            index = (index + 1) % len;
            if !visited[index] {
                visited[index] = true;
                results.push(list[index].clone());
            }
        }
    }
    results
}

/// The per-image query ladder: an optional covers-only probe (first image
/// only), the general query, then the expunged variants when enabled.
fn query_urls(site: &str, hash: &str, first_image: bool, covers_only: bool, expunged: bool) -> Vec<String> {
    let covers = covers_only && first_image;
    let mut urls = Vec::new();
    if covers {
        urls.push(lookup::hash_search_url(site, hash, true, false));
    }
    urls.push(lookup::hash_search_url(site, hash, false, false));
    if expunged {
        if covers {
            urls.push(lookup::hash_search_url(site, hash, true, true));
        }
        urls.push(lookup::hash_search_url(site, hash, false, true));
    }
    urls
}

/// Folds one search response into the running aggregate. Match counts only
/// ever grow.
fn merge_results(matches: &mut Vec<SearchMatch>, found: Vec<GalleryIdentifier>) {
    for identifier in found {
        match matches.iter_mut().find(|m| m.identifier == identifier) {
            Some(existing) => existing.match_count += 1,
            None => matches.push(SearchMatch {
                identifier,
                match_count: 1,
            }),
        }
    }
}

/// Runs the hash-search phase for one target.
pub struct SearchOrchestrator<'a> {
    pub sender: &'a RequestSender,
    pub scheduler: &'a Arc<DelayScheduler>,
    pub site: &'a str,
    pub search_expunged: bool,
    pub search_covers_only: bool,
    /// Seconds re-armed on the search channel after each completed call.
    pub search_delay: f64,
}

/// One gated hash-search call for one image: the seam between the probe
/// loop and the live request path.
pub trait ImageSearch {
    async fn search_image(
        &self,
        image_index: u32,
        hash: &str,
    ) -> Result<Vec<GalleryIdentifier>, LookupError>;
}

impl SearchOrchestrator<'_> {
    /// Probes the target's images in order until the configured limits say
    /// enough evidence has been gathered, aggregating match counts per
    /// gallery.
    pub async fn search_target(
        &self,
        target: &Target,
        images: &[String],
        limits: &ArchiveTypeConfig,
    ) -> Result<Vec<SearchMatch>, LookupError> {
        probe_images(self, target, images, limits).await
    }
}

impl ImageSearch for SearchOrchestrator<'_> {
    /// Walks the query ladder for one image hash, stopping at the first
    /// query that returns matches. Every call is gated on the search
    /// channel, whose delay is re-armed after the call returns.
    async fn search_image(
        &self,
        image_index: u32,
        hash: &str,
    ) -> Result<Vec<GalleryIdentifier>, LookupError> {
        let urls = query_urls(
            self.site,
            hash,
            image_index == 0,
            self.search_covers_only,
            self.search_expunged,
        );

        let mut results = Vec::new();
        for url in urls {
            debug!("Searching image {}: {url}", image_index + 1);
            self.scheduler.wait_for_delay(SEARCH_CHANNEL).await;
            results = self.sender.search(&url).await?;
            self.scheduler.set_delay(SEARCH_CHANNEL, self.search_delay);
            if !results.is_empty() {
                break;
            }
        }
        Ok(results)
    }
}

/// The bounded probe loop: hashes each image and searches for it until the
/// limits say enough evidence has been gathered.
///
/// Read failures skip the image; lookup failures count toward the error
/// limit; a blocked-site response aborts the whole target's search.
pub async fn probe_images<S: ImageSearch>(
    searcher: &S,
    target: &Target,
    images: &[String],
    limits: &ArchiveTypeConfig,
) -> Result<Vec<SearchMatch>, LookupError> {
    let min_images = limits.min_images_to_check.max(1);
    let max_images = limits.max_images_to_check.max(1);
    let max_errors = limits.max_search_errors.max(1);

    let mut check_count = 0u32;
    let mut checks_with_results = 0u32;
    let mut error_count = 0u32;
    let mut matches: Vec<SearchMatch> = Vec::new();

    for image in images {
        if check_count >= max_images {
            break;
        }
        if checks_with_results >= min_images && !matches.is_empty() {
            if limits.continue_search_if_results_are_ambiguous && is_ambiguous(&matches) {
                debug!("Continuing search because results are ambiguous");
            } else {
                break;
            }
        }

        let content = match target.read_content_file(image).await {
            Ok(content) => content,
            Err(e) => {
                error!("Failed to read image: {image}: {e}");
                continue;
            }
        };
        let hash = lookup::image_hash(&content);

        let result = searcher.search_image(check_count, &hash).await;
        check_count += 1;
        let found = match result {
            Ok(found) => found,
            Err(LookupError::SiteBlocked) => return Err(LookupError::SiteBlocked),
            Err(e) => {
                error!("Failed to look up image: {image}: {e}");
                error_count += 1;
                if error_count >= max_errors {
                    break;
                }
                continue;
            }
        };

        if found.is_empty() {
            info!("No results found for: {image}");
            continue;
        }
        checks_with_results += 1;
        merge_results(&mut matches, found);
    }

    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::archive::SevenZip;
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn id(n: u64) -> GalleryIdentifier {
        GalleryIdentifier::new(n, format!("token{n}"))
    }

    fn matches(counts: &[(u64, u32)]) -> Vec<SearchMatch> {
        counts
            .iter()
            .map(|&(n, match_count)| SearchMatch {
                identifier: id(n),
                match_count,
            })
            .collect()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_results_is_ambiguous() {
        assert!(is_ambiguous(&[]));
    }

    #[test]
    fn tied_max_count_is_ambiguous() {
        assert!(is_ambiguous(&matches(&[(1, 3), (2, 3)])));
        assert!(is_ambiguous(&matches(&[(1, 1), (2, 3), (3, 3)])));
    }

    #[test]
    fn clear_leader_is_not_ambiguous() {
        assert!(!is_ambiguous(&matches(&[(1, 3)])));
        assert!(!is_ambiguous(&matches(&[(1, 3), (2, 2)])));
    }

    #[test]
    fn merge_grows_counts_monotonically() {
        let mut aggregate = Vec::new();
        merge_results(&mut aggregate, vec![id(1), id(2)]);
        merge_results(&mut aggregate, vec![id(2)]);
        merge_results(&mut aggregate, vec![id(2), id(3)]);
        assert_eq!(aggregate, matches(&[(1, 1), (2, 3), (3, 1)]));
    }

    #[test]
    fn identifiers_differ_by_token_as_well_as_id() {
        let mut aggregate = Vec::new();
        merge_results(&mut aggregate, vec![GalleryIdentifier::new(1, "a")]);
        merge_results(&mut aggregate, vec![GalleryIdentifier::new(1, "b")]);
        assert_eq!(aggregate.len(), 2);
    }

    #[test]
    fn preferred_order_picks_indices_first_then_round_robins() {
        let list = names(&["a", "b", "c", "d", "e"]);
        let ordered = apply_preferred_order(list, Some(&[2, 0]));
        // After the picks the walk continues from index 0: b was not taken
        // yet at position 1, then d, then e.
        assert_eq!(ordered, names(&["c", "a", "b", "d", "e"]));
    }

    #[test]
    fn preferred_order_supports_negative_indices() {
        let list = names(&["a", "b", "c", "d"]);
        let ordered = apply_preferred_order(list, Some(&[-1, 0]));
        assert_eq!(ordered[0], "d");
        assert_eq!(ordered[1], "a");
        assert_eq!(ordered.len(), 4);
    }

    #[test]
    fn preferred_order_skips_invalid_and_duplicate_indices() {
        let list = names(&["a", "b", "c"]);
        let ordered = apply_preferred_order(list, Some(&[7, 1, 1, -9]));
        assert_eq!(ordered, names(&["b", "c", "a"]));
    }

    #[test]
    fn no_preferred_order_keeps_the_list() {
        let list = names(&["a", "b"]);
        assert_eq!(apply_preferred_order(list.clone(), None), list);
    }

    #[test]
    fn image_selection_filters_by_extension() {
        let files = names(&["001.jpg", "info.json", "002.PNG"]);
        let exts = names(&[".jpg", ".png"]);
        assert_eq!(select_images(&files, &exts, None), names(&["001.jpg", "002.PNG"]));
    }

    /// Replays a fixed sequence of search responses, counting the calls.
    struct ScriptedSearch {
        responses: Mutex<VecDeque<Result<Vec<GalleryIdentifier>, LookupError>>>,
        calls: AtomicU32,
    }

    impl ScriptedSearch {
        fn new(responses: Vec<Result<Vec<GalleryIdentifier>, LookupError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    impl ImageSearch for ScriptedSearch {
        async fn search_image(
            &self,
            _image_index: u32,
            _hash: &str,
        ) -> Result<Vec<GalleryIdentifier>, LookupError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    /// A folder target over a tempdir holding `count` distinct image files.
    fn image_folder(root: &std::path::Path, count: usize) -> (Target, Vec<String>) {
        let dir = root.join("set");
        fs::create_dir(&dir).unwrap();
        let names: Vec<String> = (1..=count).map(|i| format!("{i:03}.jpg")).collect();
        for name in &names {
            fs::write(dir.join(name), name.as_bytes()).unwrap();
        }
        let target = Target::folder(dir, names.clone(), false, SevenZip::new(&[]));
        (target, names)
    }

    fn limits(min: u32, max: u32, errors: u32, continue_ambiguous: bool) -> ArchiveTypeConfig {
        ArchiveTypeConfig {
            min_images_to_check: min,
            max_images_to_check: max,
            max_search_errors: errors,
            continue_search_if_results_are_ambiguous: continue_ambiguous,
            ..ArchiveTypeConfig::default()
        }
    }

    #[tokio::test]
    async fn probe_loop_stops_at_the_image_cap() {
        let root = tempfile::tempdir().unwrap();
        let (target, images) = image_folder(root.path(), 4);
        let searcher = ScriptedSearch::new(vec![Ok(vec![id(1)]), Ok(vec![id(1)])]);

        let result = probe_images(&searcher, &target, &images, &limits(4, 2, 5, false))
            .await
            .unwrap();
        assert_eq!(searcher.calls(), 2);
        assert_eq!(result, matches(&[(1, 2)]));
    }

    #[tokio::test]
    async fn probe_loop_aborts_at_the_error_limit() {
        let root = tempfile::tempdir().unwrap();
        let (target, images) = image_folder(root.path(), 5);
        let searcher = ScriptedSearch::new(vec![
            Err(LookupError::BadResponse("boom".to_string())),
            Err(LookupError::BadResponse("boom".to_string())),
        ]);

        let result = probe_images(&searcher, &target, &images, &limits(5, 5, 2, false))
            .await
            .unwrap();
        assert_eq!(searcher.calls(), 2);
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn probe_loop_continues_past_the_minimum_while_ambiguous() {
        let root = tempfile::tempdir().unwrap();
        let (target, images) = image_folder(root.path(), 3);

        // The first image ties two galleries; the second breaks the tie.
        let searcher = ScriptedSearch::new(vec![Ok(vec![id(1), id(2)]), Ok(vec![id(1)])]);
        let result = probe_images(&searcher, &target, &images, &limits(1, 3, 1, true))
            .await
            .unwrap();
        assert_eq!(searcher.calls(), 2);
        assert_eq!(result, matches(&[(1, 2), (2, 1)]));

        // Without the continuation flag the minimum alone ends the loop.
        let searcher = ScriptedSearch::new(vec![Ok(vec![id(1), id(2)])]);
        let result = probe_images(&searcher, &target, &images, &limits(1, 3, 1, false))
            .await
            .unwrap();
        assert_eq!(searcher.calls(), 1);
        assert_eq!(result, matches(&[(1, 1), (2, 1)]));
    }

    #[tokio::test]
    async fn unreadable_image_is_skipped_without_consuming_a_check() {
        let root = tempfile::tempdir().unwrap();
        let (target, mut images) = image_folder(root.path(), 1);
        images.insert(0, "missing.jpg".to_string());

        let searcher = ScriptedSearch::new(vec![Ok(vec![id(7)])]);
        let result = probe_images(&searcher, &target, &images, &limits(1, 1, 1, false))
            .await
            .unwrap();
        // The unreadable image never reached the searcher, so the single
        // allowed check was still available for the readable one.
        assert_eq!(searcher.calls(), 1);
        assert_eq!(result, matches(&[(7, 1)]));
    }

    #[tokio::test]
    async fn blocked_site_aborts_the_whole_search() {
        let root = tempfile::tempdir().unwrap();
        let (target, images) = image_folder(root.path(), 3);
        let searcher = ScriptedSearch::new(vec![Err(LookupError::SiteBlocked)]);

        let result = probe_images(&searcher, &target, &images, &limits(1, 5, 5, false)).await;
        assert!(matches!(result, Err(LookupError::SiteBlocked)));
        assert_eq!(searcher.calls(), 1);
    }

    #[test]
    fn query_ladder_composition() {
        let site = "https://e-hentai.org";
        // Covers mode applies to the first image only.
        let urls = query_urls(site, "h", true, true, true);
        assert_eq!(urls.len(), 4);
        assert!(urls[0].contains("fs_covers=1") && urls[0].contains("fs_exp=0"));
        assert!(urls[1].contains("fs_covers=0") && urls[1].contains("fs_exp=0"));
        assert!(urls[2].contains("fs_covers=1") && urls[2].contains("fs_exp=1"));
        assert!(urls[3].contains("fs_covers=0") && urls[3].contains("fs_exp=1"));

        // Later images never use the covers probe.
        let urls = query_urls(site, "h", false, true, true);
        assert_eq!(urls.len(), 2);
        assert!(urls.iter().all(|u| u.contains("fs_covers=0")));

        // The minimal ladder is a single general query.
        assert_eq!(query_urls(site, "h", false, false, false).len(), 1);
    }
}

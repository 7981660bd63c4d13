use crate::gallery::config::{PrioritiesConfig, PriorityRule};
use crate::gallery::lookup::GalleryIdentifier;
use crate::gallery::matching::{self, VarContext};
use crate::gallery::metadata::GalleryMetadata;

/// Accumulated score for one candidate. `total` is always the sum of the
/// positive and negative contributions; `blacklist` latches on and never
/// clears.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriorityScore {
    pub total: f64,
    pub positive: f64,
    pub negative: f64,
    pub blacklist: bool,
}

impl PriorityScore {
    pub fn apply(&mut self, rule: &PriorityRule) {
        if rule.blacklist {
            self.blacklist = true;
        }
        let priority = rule.priority;
        if priority > 0.0 {
            self.positive += priority;
        } else {
            self.negative += priority;
        }
        self.total += priority;
    }
}

/// A search result with fetched metadata, ready to be scored.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub identifier: GalleryIdentifier,
    pub match_count: u32,
    /// Position in the original search aggregate; breaks ties.
    pub rank: usize,
    pub metadata: GalleryMetadata,
    pub priority: PriorityScore,
}

/// Splits a tag rule value into its optional namespace and the tag rule
/// proper. An empty namespace (`:tag`) means unqualified.
pub fn split_tag_rule(value: &str) -> (Option<&str>, &str) {
    match value.split_once(':') {
        Some((namespace, tag)) if !namespace.is_empty() => (Some(namespace), tag),
        Some((_, tag)) => (None, tag),
        None => (None, value),
    }
}

/// Scores every candidate in place.
pub fn score_candidates(
    candidates: &mut [Candidate],
    priorities: &PrioritiesConfig,
    image_count: usize,
    partial: bool,
) {
    for candidate in candidates.iter_mut() {
        let mut score = PriorityScore::default();
        apply_tag_rules(&mut score, &candidate.metadata, &priorities.tags);
        apply_field_rules(&mut score, candidate.metadata.language.as_deref(), &priorities.language);
        apply_field_rules(&mut score, candidate.metadata.title.as_deref(), &priorities.title);
        apply_field_rules(
            &mut score,
            candidate.metadata.title_original.as_deref(),
            &priorities.title_original,
        );
        candidate.priority = score;
    }

    // File-count proximity is meaningless when the local file list is known
    // to be incomplete.
    if !partial {
        apply_best_of(candidates, priorities.file_count.nearest.as_ref(), |c| {
            (c.metadata.file_count as f64 - image_count as f64).abs()
        });
    }
    apply_best_of(candidates, priorities.file_count.highest.as_ref(), |c| {
        -(c.metadata.file_count as f64)
    });
    apply_best_of(
        candidates,
        priorities.file_count.highest_search_matches.as_ref(),
        |c| -(c.match_count as f64),
    );
}

/// Applies tag rules: a valued rule fires once per namespace holding a
/// matching tag; default rules fire only when no valued rule fired at all.
fn apply_tag_rules(score: &mut PriorityScore, metadata: &GalleryMetadata, rules: &[PriorityRule]) {
    let vars = VarContext::new();
    let mut any = false;
    let mut defaults = Vec::new();

    for rule in rules {
        let Some(value) = rule.value.as_deref() else {
            defaults.push(rule);
            continue;
        };
        let (namespace, tag) = split_tag_rule(value);
        match namespace {
            Some(namespace) => {
                if matching::any_matches(metadata.tags_in(namespace), false, tag, &vars) {
                    score.apply(rule);
                    any = true;
                }
            }
            None => {
                for tags in metadata.tags.values() {
                    if matching::any_matches(tags, false, tag, &vars) {
                        score.apply(rule);
                        any = true;
                    }
                }
            }
        }
    }

    if !any {
        for rule in defaults {
            score.apply(rule);
        }
    }
}

/// Applies rules against one scalar metadata field, with the same
/// default-fallback behavior as the tag rules.
fn apply_field_rules(score: &mut PriorityScore, field: Option<&str>, rules: &[PriorityRule]) {
    let vars = VarContext::new();
    let mut any = false;
    let mut defaults = Vec::new();

    for rule in rules {
        let Some(value) = rule.value.as_deref() else {
            defaults.push(rule);
            continue;
        };
        if let Some(field) = field {
            if matching::matches(field, false, value, &vars) {
                score.apply(rule);
                any = true;
            }
        }
    }

    if !any {
        for rule in defaults {
            score.apply(rule);
        }
    }
}

/// Applies `rule` to every candidate whose comparison key ties the minimum.
fn apply_best_of<F>(candidates: &mut [Candidate], rule: Option<&PriorityRule>, key: F)
where
    F: Fn(&Candidate) -> f64,
{
    let Some(rule) = rule else {
        return;
    };
    let Some(best) = candidates.iter().map(&key).min_by(f64::total_cmp) else {
        return;
    };
    for candidate in candidates.iter_mut() {
        if key(candidate) == best {
            candidate.priority.apply(rule);
        }
    }
}

/// Discards blacklisted candidates and picks the highest-scoring survivor;
/// ties go to the candidate discovered first.
pub fn select_best(mut candidates: Vec<Candidate>) -> Option<Candidate> {
    candidates.retain(|c| !c.priority.blacklist);
    candidates.sort_by(|a, b| {
        f64::total_cmp(&b.priority.total, &a.priority.total).then(a.rank.cmp(&b.rank))
    });
    candidates.into_iter().next()
}

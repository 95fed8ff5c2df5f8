//! Result merging
//!
//! Combines a previously cached analysis with a fresh one. Pure: no I/O,
//! no clock, no logging.

use crate::{Analysis, Issue, QualityRating};
use std::collections::{HashMap, HashSet};

/// Merge a fresh analysis into an optional previous one.
///
/// - With no previous analysis the fresh one is returned unchanged.
/// - Issues are keyed by title. A fresh issue overwrites the previous issue
///   with the same title in place; new titles are appended.
/// - Action items are unioned, first-seen order kept.
/// - The rating follows [`merge_rating`].
pub fn merge_analysis(previous: Option<&Analysis>, fresh: Analysis) -> Analysis {
    let Some(previous) = previous else {
        return fresh;
    };

    Analysis {
        quality_rating: merge_rating(previous.quality_rating, fresh.quality_rating),
        issues: merge_issues(&previous.issues, fresh.issues),
        action_items: merge_action_items(&previous.action_items, fresh.action_items),
    }
}

/// Rating rule.
///
/// A fresh rating that is the neutral `Fair` (or absent) does not displace a
/// non-neutral previous rating, even a better one. Otherwise the fresh rating
/// wins, so a strictly worse non-neutral rating always replaces the previous.
pub fn merge_rating(
    previous: Option<QualityRating>,
    fresh: Option<QualityRating>,
) -> Option<QualityRating> {
    let Some(previous) = previous else {
        return fresh;
    };
    let candidate = fresh.unwrap_or(QualityRating::Fair);

    if candidate.is_default() && !previous.is_default() {
        Some(previous)
    } else {
        Some(candidate)
    }
}

fn merge_issues(previous: &[Issue], fresh: Vec<Issue>) -> Vec<Issue> {
    let mut merged: Vec<Issue> = Vec::with_capacity(previous.len() + fresh.len());
    let mut position: HashMap<String, usize> = HashMap::new();

    for issue in previous.iter().cloned().chain(fresh) {
        match position.get(&issue.title) {
            Some(&idx) => merged[idx].details = issue.details,
            None => {
                position.insert(issue.title.clone(), merged.len());
                merged.push(issue);
            }
        }
    }
    merged
}

fn merge_action_items(previous: &[String], fresh: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    previous
        .iter()
        .cloned()
        .chain(fresh)
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

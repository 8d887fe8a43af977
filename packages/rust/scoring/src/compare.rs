//! Facet-level comparison for the polling boundary.
//!
//! Unlike the pipeline's consecutive-version scoring, `compare` works on
//! any two stored versions and reports the concrete word and link deltas
//! alongside the score, using the same tokenization and Jaccard
//! primitives as the policy.

use std::collections::HashMap;

use pagewatch_shared::{ChangeLabel, FacetSet, PageLink};

use crate::policy::ScoringPolicy;
use crate::similarity::tokenize;

/// The delta between two snapshot facet sets.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    /// Word tokens present only in the newer text, sorted.
    pub added_words: Vec<String>,
    /// Word tokens present only in the older text, sorted.
    pub removed_words: Vec<String>,
    /// Links whose href appears only in the newer version.
    pub added_links: Vec<PageLink>,
    /// Links whose href appears only in the older version.
    pub removed_links: Vec<PageLink>,
    /// Links present in both whose anchor text changed.
    pub modified_links: Vec<ModifiedLink>,
    /// Whether the trimmed titles differ.
    pub title_changed: bool,
    /// Whether the trimmed descriptions differ.
    pub description_changed: bool,
    /// Change score under the deployment's policy.
    pub score: f64,
    /// Label for `score`.
    pub label: ChangeLabel,
}

/// A link kept across versions with changed anchor text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifiedLink {
    pub href: String,
    pub before_text: String,
    pub after_text: String,
}

/// Compare two facet sets (older `from`, newer `to`).
pub fn compare(policy: &ScoringPolicy, from: &FacetSet, to: &FacetSet) -> Comparison {
    let from_tokens = tokenize(&from.text);
    let to_tokens = tokenize(&to.text);

    let mut added_words: Vec<String> = to_tokens.difference(&from_tokens).cloned().collect();
    let mut removed_words: Vec<String> = from_tokens.difference(&to_tokens).cloned().collect();
    added_words.sort();
    removed_words.sort();

    let (added_links, removed_links, modified_links) = diff_links(&from.links, &to.links);

    let result = policy.score(from, to);

    Comparison {
        added_words,
        removed_words,
        added_links,
        removed_links,
        modified_links,
        title_changed: from.title.trim() != to.title.trim(),
        description_changed: from.description.trim() != to.description.trim(),
        score: result.score,
        label: result.label,
    }
}

/// Diff two link lists by href. Empty hrefs are excluded; the first
/// occurrence of a duplicated href wins, matching extraction order.
fn diff_links(
    from: &[PageLink],
    to: &[PageLink],
) -> (Vec<PageLink>, Vec<PageLink>, Vec<ModifiedLink>) {
    let index = |links: &[PageLink]| -> (Vec<String>, HashMap<String, PageLink>) {
        let mut order = Vec::new();
        let mut map = HashMap::new();
        for link in links {
            if link.href.is_empty() || map.contains_key(&link.href) {
                continue;
            }
            order.push(link.href.clone());
            map.insert(link.href.clone(), link.clone());
        }
        (order, map)
    };

    let (from_order, from_map) = index(from);
    let (to_order, to_map) = index(to);

    let mut added = Vec::new();
    let mut modified = Vec::new();
    for href in &to_order {
        let link = &to_map[href];
        match from_map.get(href) {
            None => added.push(link.clone()),
            Some(prev) if prev.text.trim() != link.text.trim() => modified.push(ModifiedLink {
                href: href.clone(),
                before_text: prev.text.clone(),
                after_text: link.text.clone(),
            }),
            Some(_) => {}
        }
    }

    let mut removed = Vec::new();
    for href in &from_order {
        if !to_map.contains_key(href) {
            removed.push(from_map[href].clone());
        }
    }

    (added, removed, modified)
}

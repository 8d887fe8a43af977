//! The authoritative scoring policy: weighted multi-factor similarity and
//! the label threshold table.
//!
//! Exactly one policy exists per deployment. Its version number travels
//! with every score so a future formula change can never silently reuse
//! this policy's label semantics.

use pagewatch_shared::{ChangeLabel, FacetSet, LabelThresholds, SCORING_POLICY_VERSION, ScoringConfig};

use crate::similarity::{SamplingParams, character_similarity, jaccard, word_similarity};

/// Weighted multi-factor scoring policy (policy v1).
#[derive(Debug, Clone)]
pub struct ScoringPolicy {
    /// Weight of full-text character similarity.
    pub char_weight: f64,
    /// Weight of word-set Jaccard similarity.
    pub word_weight: f64,
    /// Weight of title similarity.
    pub title_weight: f64,
    /// Weight of description similarity.
    pub description_weight: f64,
    /// Weight of link-set Jaccard similarity.
    pub link_weight: f64,
    /// Cost bounds for character similarity on large texts.
    pub sampling: SamplingParams,
    /// Label bucket boundaries.
    pub thresholds: LabelThresholds,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self::from_config(&ScoringConfig::default())
    }
}

/// The result of scoring one facet pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreResult {
    /// Change score in [0, 1]; 0 means identical.
    pub score: f64,
    /// Bucket for `score` under the policy's threshold table.
    pub label: ChangeLabel,
    /// Which policy produced this result.
    pub policy_version: u32,
    /// Body-text character similarity.
    pub char_similarity: f64,
    /// Body-text word-set similarity.
    pub word_similarity: f64,
    /// Title character similarity.
    pub title_similarity: f64,
    /// Description character similarity.
    pub description_similarity: f64,
    /// Link-set similarity.
    pub link_similarity: f64,
}

impl ScoringPolicy {
    /// Build the policy from the `[scoring]` config section.
    pub fn from_config(config: &ScoringConfig) -> Self {
        Self {
            char_weight: config.char_weight,
            word_weight: config.word_weight,
            title_weight: config.title_weight,
            description_weight: config.description_weight,
            link_weight: config.link_weight,
            sampling: SamplingParams {
                exact_threshold: config.exact_threshold,
                windows: config.sample_windows,
                window_len: config.window_len,
            },
            thresholds: config.thresholds,
        }
    }

    /// Score how much `curr` differs from `prev`.
    ///
    /// Pure function of the two facet sets. Callers skip scoring entirely
    /// when no prior version exists; this function assumes both sides are
    /// present.
    pub fn score(&self, prev: &FacetSet, curr: &FacetSet) -> ScoreResult {
        let char_similarity = character_similarity(&prev.text, &curr.text, self.sampling);
        let word_sim = word_similarity(&prev.text, &curr.text);
        let title_similarity = character_similarity(&prev.title, &curr.title, self.sampling);
        let description_similarity =
            character_similarity(&prev.description, &curr.description, self.sampling);
        let link_similarity = jaccard(&link_set(prev), &link_set(curr));

        // Weighted distance, not 1 − weighted similarity: identical inputs
        // must score exactly 0.0, and summing w·(1 − s) keeps every term a
        // true zero when s == 1.
        let score = (self.char_weight * (1.0 - char_similarity)
            + self.word_weight * (1.0 - word_sim)
            + self.title_weight * (1.0 - title_similarity)
            + self.description_weight * (1.0 - description_similarity)
            + self.link_weight * (1.0 - link_similarity))
            .clamp(0.0, 1.0);

        ScoreResult {
            score,
            label: self.label_for(score),
            policy_version: SCORING_POLICY_VERSION,
            char_similarity,
            word_similarity: word_sim,
            title_similarity,
            description_similarity,
            link_similarity,
        }
    }

    /// Bucket a score under the threshold table.
    pub fn label_for(&self, score: f64) -> ChangeLabel {
        let t = &self.thresholds;
        if score <= t.negligible {
            ChangeLabel::Negligible
        } else if score <= t.low {
            ChangeLabel::Low
        } else if score <= t.medium {
            ChangeLabel::Medium
        } else if score <= t.high {
            ChangeLabel::High
        } else {
            ChangeLabel::Significant
        }
    }
}

/// Non-empty link targets as a set. Empty hrefs are excluded; duplicate
/// targets collapse.
pub(crate) fn link_set(facets: &FacetSet) -> std::collections::HashSet<&str> {
    facets
        .links
        .iter()
        .filter(|l| !l.href.is_empty())
        .map(|l| l.href.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagewatch_shared::PageLink;

    fn text_facets(text: &str) -> FacetSet {
        FacetSet {
            text: text.into(),
            ..FacetSet::default()
        }
    }

    #[test]
    fn identical_facets_score_zero() {
        let policy = ScoringPolicy::default();
        let facets = FacetSet {
            title: "Pricing".into(),
            description: "Our plans".into(),
            text: "Starter plan costs ten dollars".into(),
            links: vec![PageLink {
                href: "https://example.com/signup".into(),
                text: "Sign up".into(),
            }],
        };
        let result = policy.score(&facets, &facets);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.label, ChangeLabel::Negligible);
        assert_eq!(result.policy_version, 1);
    }

    #[test]
    fn both_empty_scores_minimal() {
        let policy = ScoringPolicy::default();
        let result = policy.score(&FacetSet::default(), &FacetSet::default());
        assert_eq!(result.char_similarity, 1.0);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.label, ChangeLabel::Negligible);
    }

    #[test]
    fn empty_to_text_scores_near_one() {
        let policy = ScoringPolicy::default();
        let result = policy.score(&text_facets(""), &text_facets("Hello world"));
        assert_eq!(result.char_similarity, 0.0);
        assert_eq!(result.word_similarity, 0.0);
        // Only the text facets changed; title/description/links stayed
        // empty-equal, so 0.7 of the weight flips.
        assert!((result.score - 0.7).abs() < 1e-9);
        assert!(result.label >= ChangeLabel::High);
    }

    #[test]
    fn small_word_change_stays_out_of_high() {
        let policy = ScoringPolicy::default();
        let result = policy.score(
            &text_facets("The quick fox"),
            &text_facets("The quick brown fox"),
        );
        // Word Jaccard is exactly 3/4
        assert!((result.word_similarity - 0.75).abs() < 1e-9);
        assert!(result.char_similarity > 0.6);
        assert!(
            result.label < ChangeLabel::High,
            "minor wording change must not be scored high, got {} ({})",
            result.score,
            result.label
        );
    }

    #[test]
    fn link_changes_move_the_score() {
        let policy = ScoringPolicy::default();
        let base = FacetSet {
            text: "same body".into(),
            links: vec![
                PageLink {
                    href: "https://example.com/a".into(),
                    text: "A".into(),
                },
                PageLink {
                    href: "https://example.com/b".into(),
                    text: "B".into(),
                },
            ],
            ..FacetSet::default()
        };
        let mut swapped = base.clone();
        swapped.links = vec![
            PageLink {
                href: "https://example.com/a".into(),
                text: "A".into(),
            },
            PageLink {
                href: "https://example.com/c".into(),
                text: "C".into(),
            },
        ];

        let result = policy.score(&base, &swapped);
        // Link Jaccard: |{a}| / |{a,b,c}| = 1/3
        assert!((result.link_similarity - 1.0 / 3.0).abs() < 1e-9);
        let expected = 0.05 * (1.0 - 1.0 / 3.0);
        assert!((result.score - expected).abs() < 1e-9);
    }

    #[test]
    fn empty_hrefs_are_ignored() {
        let a = FacetSet {
            links: vec![PageLink {
                href: String::new(),
                text: "placeholder".into(),
            }],
            ..FacetSet::default()
        };
        let b = FacetSet::default();
        let policy = ScoringPolicy::default();
        let result = policy.score(&a, &b);
        assert_eq!(result.link_similarity, 1.0);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn label_buckets_follow_thresholds() {
        let policy = ScoringPolicy::default();
        assert_eq!(policy.label_for(0.0), ChangeLabel::Negligible);
        assert_eq!(policy.label_for(0.05), ChangeLabel::Negligible);
        assert_eq!(policy.label_for(0.12), ChangeLabel::Low);
        assert_eq!(policy.label_for(0.35), ChangeLabel::Medium);
        assert_eq!(policy.label_for(0.5), ChangeLabel::High);
        assert_eq!(policy.label_for(0.71), ChangeLabel::Significant);
        assert_eq!(policy.label_for(1.0), ChangeLabel::Significant);
    }

    #[test]
    fn custom_thresholds_are_respected() {
        let mut config = ScoringConfig::default();
        config.thresholds.negligible = 0.01;
        config.thresholds.low = 0.02;
        let policy = ScoringPolicy::from_config(&config);
        assert_eq!(policy.label_for(0.015), ChangeLabel::Low);
        assert_eq!(policy.label_for(0.03), ChangeLabel::Medium);
    }
}

//! Similarity primitives: normalized edit distance, window sampling for
//! large texts, and Jaccard over token sets.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// Matches runs of word characters; everything else separates tokens.
static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("word regex"));

// ---------------------------------------------------------------------------
// Character similarity
// ---------------------------------------------------------------------------

/// How character similarity bounds its cost on large inputs.
#[derive(Debug, Clone, Copy)]
pub struct SamplingParams {
    /// Character count above which exact edit distance is abandoned.
    pub exact_threshold: usize,
    /// Number of aligned windows sampled from each string.
    pub windows: usize,
    /// Characters per window.
    pub window_len: usize,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            exact_threshold: 512,
            windows: 8,
            window_len: 256,
        }
    }
}

/// Normalized edit-distance similarity in [0, 1].
///
/// Both empty → 1 (no change); exactly one empty → 0. Short strings use
/// exact Levenshtein distance. Above `params.exact_threshold` characters,
/// a fixed number of aligned windows is sampled from both strings and the
/// per-window similarities averaged, trading exactness for sub-quadratic
/// cost on large documents.
pub fn character_similarity(a: &str, b: &str, params: SamplingParams) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    match (a.is_empty(), b.is_empty()) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        _ => {}
    }

    let max_len = a.len().max(b.len());
    if max_len <= params.exact_threshold {
        return window_similarity(&a, &b);
    }

    sampled_similarity(&a, &b, params)
}

/// Exact similarity for one pair of character slices.
fn window_similarity(a: &[char], b: &[char]) -> f64 {
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    let distance = levenshtein(a, b);
    1.0 - (distance as f64 / max_len as f64)
}

/// Average exact similarity over aligned sample windows.
fn sampled_similarity(a: &[char], b: &[char], params: SamplingParams) -> f64 {
    let windows = params.windows.max(1);
    let mut total = 0.0;

    for i in 0..windows {
        let wa = sample_window(a, i, windows, params.window_len);
        let wb = sample_window(b, i, windows, params.window_len);
        total += window_similarity(wa, wb);
    }

    total / windows as f64
}

/// The `i`-th of `n` windows, with starts spread evenly across the string.
fn sample_window(s: &[char], i: usize, n: usize, window_len: usize) -> &[char] {
    let span = s.len().saturating_sub(window_len);
    let start = if n <= 1 { 0 } else { span * i / (n - 1) };
    let end = (start + window_len).min(s.len());
    &s[start..end]
}

/// Two-row Levenshtein distance over characters.
fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr: Vec<usize> = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

// ---------------------------------------------------------------------------
// Token similarity
// ---------------------------------------------------------------------------

/// Case-folded word tokens: runs of word characters, lowercased.
pub fn tokenize(text: &str) -> HashSet<String> {
    WORD_RE
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Jaccard index over two sets. Both empty → 1.
pub fn jaccard<T: std::hash::Hash + Eq>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 1.0;
    }
    intersection as f64 / union as f64
}

/// Jaccard over case-folded word-token sets.
pub fn word_similarity(a: &str, b: &str) -> f64 {
    jaccard(&tokenize(a), &tokenize(b))
}

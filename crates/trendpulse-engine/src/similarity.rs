//! String similarity for fuzzy alias matching.
//!
//! Both measures operate on already-normalized alias keys and return a value
//! in `[0, 1]`; [`similarity`] takes the larger of the two so that either a
//! near-identical spelling or a reordering of the same words can match.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("valid token regex"));

#[must_use]
pub fn similarity(a: &str, b: &str) -> f64 {
    edit_similarity(a, b).max(token_overlap(a, b))
}

/// `1 - levenshtein(a, b) / max(len(a), len(b))`, measured in chars.
#[must_use]
pub fn edit_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    #[allow(clippy::cast_precision_loss)]
    let ratio = prev[b.len()] as f64 / longest as f64;
    1.0 - ratio
}

/// Jaccard index of the alphanumeric word sets.
#[must_use]
pub fn token_overlap(a: &str, b: &str) -> f64 {
    let left = tokens(a);
    let right = tokens(b);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let shared = left.intersection(&right).count();
    let union = left.union(&right).count();
    #[allow(clippy::cast_precision_loss)]
    let overlap = shared as f64 / union as f64;
    overlap
}

fn tokens(s: &str) -> HashSet<String> {
    TOKEN_RE
        .find_iter(s)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_are_fully_similar() {
        assert!((similarity("canadian tuxedo", "canadian tuxedo") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn single_typo_scores_high() {
        let s = edit_similarity("brandy melville", "brandy melvile");
        assert!(s > 0.9, "got {s}");
    }

    #[test]
    fn reordered_words_match_by_token_overlap() {
        assert!((token_overlap("tuxedo canadian", "canadian tuxedo") - 1.0).abs() < f64::EPSILON);
        assert!(edit_similarity("tuxedo canadian", "canadian tuxedo") < 0.5);
    }

    #[test]
    fn punctuation_does_not_split_token_sets() {
        assert!((token_overlap("wide-leg denim", "wide leg denim") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unrelated_names_score_low() {
        let s = similarity("y2k", "minimalist");
        assert!(s < 0.3, "got {s}");
    }

    #[test]
    fn empty_inputs() {
        assert!((edit_similarity("", "") - 1.0).abs() < f64::EPSILON);
        assert!(token_overlap("", "abc").abs() < f64::EPSILON);
    }
}

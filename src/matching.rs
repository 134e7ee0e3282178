//! Fuzzy title scoring built on `strsim`.
//!
//! Scores are 0-100 like the classic fuzz API: `ratio` is a plain
//! normalized edit distance, `partial_ratio` slides the shorter string over
//! the longer one, `token_set_ratio` compares sorted token intersections so
//! word order and duplication stop mattering.

use std::collections::BTreeSet;
use strsim::normalized_levenshtein;

fn scale(similarity: f64) -> i32 {
    (similarity * 100.0).round() as i32
}

fn normalize(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect()
}

#[must_use]
pub fn ratio(a: &str, b: &str) -> i32 {
    if a.is_empty() && b.is_empty() {
        return 100;
    }
    scale(normalized_levenshtein(&normalize(a), &normalize(b)))
}

/// Best `ratio` of the shorter string against any equally-long window of
/// the longer one.
#[must_use]
pub fn partial_ratio(a: &str, b: &str) -> i32 {
    let a_norm = normalize(a);
    let b_norm = normalize(b);
    let (short, long) = if a_norm.chars().count() <= b_norm.chars().count() {
        (a_norm, b_norm)
    } else {
        (b_norm, a_norm)
    };

    let short_len = short.chars().count();
    if short_len == 0 {
        return 0;
    }

    let long_chars: Vec<char> = long.chars().collect();
    if long_chars.len() == short_len {
        return scale(normalized_levenshtein(&short, &long));
    }

    let mut best = 0;
    for window in long_chars.windows(short_len) {
        let candidate: String = window.iter().collect();
        let score = scale(normalized_levenshtein(&short, &candidate));
        if score > best {
            best = score;
        }
        if best == 100 {
            break;
        }
    }
    best
}

/// Order-insensitive comparison over unique tokens, the workhorse for
/// ranking provider candidates against a query title.
#[must_use]
pub fn token_set_ratio(a: &str, b: &str) -> i32 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let tokens_a: BTreeSet<&str> = normalize_tokens(&a_lower);
    let tokens_b: BTreeSet<&str> = normalize_tokens(&b_lower);

    // CJK titles rarely tokenize on whitespace; fall back to plain ratio
    // when either side collapses to a single token.
    if tokens_a.len() <= 1 || tokens_b.len() <= 1 {
        return ratio(a, b);
    }

    let intersection: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let only_a: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let only_b: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();

    let sect = intersection.join(" ");
    let combined_a = join_nonempty(&sect, &only_a.join(" "));
    let combined_b = join_nonempty(&sect, &only_b.join(" "));

    [
        ratio(&sect, &combined_a),
        ratio(&sect, &combined_b),
        ratio(&combined_a, &combined_b),
    ]
    .into_iter()
    .max()
    .unwrap_or(0)
}

fn normalize_tokens(input: &str) -> BTreeSet<&str> {
    input
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect()
}

fn join_nonempty(a: &str, b: &str) -> String {
    if a.is_empty() {
        b.to_string()
    } else if b.is_empty() {
        a.to_string()
    } else {
        format!("{a} {b}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_identical_strings() {
        assert_eq!(ratio("Attack on Titan", "Attack on Titan"), 100);
    }

    #[test]
    fn ratio_is_bounded() {
        let score = ratio("Steins;Gate", "Frieren");
        assert!((0..=100).contains(&score));
    }

    #[test]
    fn partial_ratio_substring_scores_full() {
        assert_eq!(partial_ratio("Titan", "Attack on Titan"), 100);
    }

    #[test]
    fn token_set_ignores_word_order() {
        let forward = token_set_ratio("Attack on Titan Season 2", "Season 2 Attack on Titan");
        assert_eq!(forward, 100);
    }

    #[test]
    fn token_set_detects_shared_core() {
        let score = token_set_ratio("Demon Slayer", "Demon Slayer: Entertainment District Arc");
        assert!(score >= 90, "got {score}");
    }

    #[test]
    fn cjk_titles_fall_back_to_plain_ratio() {
        assert_eq!(token_set_ratio("鬼灭之刃", "鬼灭之刃"), 100);
        assert!(token_set_ratio("鬼灭之刃", "咒术回战") < 60);
    }
}

//! Fuzzy matching for "did you mean?" suggestions

use strsim::jaro_winkler;

/// Up to `max_suggestions` candidates scoring above `threshold`, best first.
pub fn find_similar_names(
    target: &str,
    candidates: &[&str],
    threshold: f64,
    max_suggestions: usize,
) -> Vec<String> {
    let mut scored: Vec<(&str, f64)> = candidates
        .iter()
        .filter(|candidate| **candidate != target)
        .map(|candidate| (*candidate, jaro_winkler(target, candidate)))
        .filter(|(_, score)| *score > threshold)
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    scored
        .into_iter()
        .take(max_suggestions)
        .map(|(name, _)| name.to_string())
        .collect()
}

#[cfg(test)]
mod fuzzy_tests {
    use super::*;

    #[test]
    fn test_close_names_ranked() {
        let names = ["strlen", "strcmp", "strncmp", "malloc"];
        let found = find_similar_names("strcpm", &names, 0.8, 2);
        assert_eq!(found.first().map(String::as_str), Some("strcmp"));
        assert!(found.len() <= 2);
        assert!(!found.contains(&"malloc".to_string()));
    }

    #[test]
    fn test_exact_match_not_suggested() {
        assert!(find_similar_names("free", &["free"], 0.5, 3).is_empty());
    }
}

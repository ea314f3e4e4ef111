use regex::Regex;
use std::sync::LazyLock;

static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[.,!?;:'"()\[\]{}]"#).expect("valid punctuation pattern"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));
static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s\-_/]+").expect("valid separator pattern"));

/// Normalize entity name: lowercase, trim punctuation, collapse whitespace.
///
/// Word boundaries survive, so the result is still readable
/// (`"  Taylor  C602! "` becomes `"taylor c602"`).
pub fn normalize(name: &str) -> String {
    let lowered = name.to_lowercase();
    let stripped = PUNCTUATION.replace_all(lowered.trim(), "");
    WHITESPACE.replace_all(stripped.trim(), " ").to_string()
}

/// Matching key: the normalized name with every separator removed, so model
/// numbers compare equal with or without spacing (`"C 602"`, `"C-602"` and
/// `"c602"` all give `"c602"`).
pub fn compact_key(name: &str) -> String {
    SEPARATORS.replace_all(&normalize(name), "").to_string()
}

/// Simple similarity check between two normalized names.
pub fn are_similar(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }

    // Containment handles "fryer" vs "fryer basket"; require some length so
    // single letters do not swallow everything.
    let (shorter, longer) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if shorter.len() >= 4 && longer.contains(shorter) {
        return true;
    }

    // Check if they share most words (for multi-word entities)
    let words_a: Vec<&str> = a.split_whitespace().collect();
    let words_b: Vec<&str> = b.split_whitespace().collect();

    if words_a.len() > 1 && words_b.len() > 1 {
        let common = words_a.iter().filter(|w| words_b.contains(w)).count();
        let total = words_a.len().max(words_b.len());
        return common as f64 / total as f64 > 0.7;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(normalize("GraphRAG"), "graphrag");
        assert_eq!(normalize("GraphRAG!"), "graphrag");
        assert_eq!(normalize("  Taylor   C602  "), "taylor c602");
    }

    #[test]
    fn test_compact_key_ignores_spacing() {
        assert_eq!(compact_key("C 602"), "c602");
        assert_eq!(compact_key("c-602"), "c602");
        assert_eq!(compact_key("Taylor C602"), "taylorc602");
    }

    #[test]
    fn test_similarity() {
        assert!(are_similar("ice cream machine", "ice cream machine"));
        assert!(are_similar("fryer", "fryer basket"));
        assert!(!are_similar("oil", "boiler"));
        assert!(!are_similar("grill", "fryer"));
    }
}

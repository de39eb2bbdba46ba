//! Fuzzy string comparison.

/// Edit distance between `a` and `b`, counted in `char`s.
#[must_use]
pub fn levenshtein(a: &str, b: &str) -> usize {
    strsim::levenshtein(a, b)
}

/// Similarity of `a` and `b` as a percentage: 100 for equal strings, 0 for
/// strings without anything in common.
#[must_use]
#[expect(clippy::cast_precision_loss)]
pub fn match_accuracy(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 100.0;
    }

    let distance = levenshtein(a, b);
    100.0 * (1.0 - distance as f64 / max_len as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distances() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("flaw", "lawn"), 2);
        assert_eq!(levenshtein("straße", "strasse"), 2);
    }

    #[test]
    fn accuracy() {
        assert!((match_accuracy("", "") - 100.0).abs() < f64::EPSILON);
        assert!((match_accuracy("abc", "abc") - 100.0).abs() < f64::EPSILON);
        assert!((match_accuracy("abc", "abd") - 66.7).abs() < 0.05);
        assert!(match_accuracy("abc", "xyz").abs() < f64::EPSILON);
    }
}

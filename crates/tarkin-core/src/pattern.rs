//! Search patterns for directory paths, directory names and item usernames.
//!
//! `*` matches any run of characters and the pattern may match anywhere in
//! the value, so `db*prod` matches `/servers/db-01-prod/`. Matching ignores
//! ASCII case, like SQLite's `LIKE`.

use serde::{Deserialize, Serialize};

/// Escape character used in the generated `LIKE` expression.
pub const LIKE_ESCAPE: char = '\\';

/// A `*`-wildcard pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern(String);

impl Pattern {
    /// Create a pattern from user input.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    /// The raw pattern.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `value` matches.
    pub fn matches(&self, value: &str) -> bool {
        let value = value.to_ascii_lowercase();
        let pattern = self.0.to_ascii_lowercase();

        let mut rest = value.as_str();
        for segment in pattern.split('*').filter(|s| !s.is_empty()) {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
        true
    }

    /// Translate to a SQL `LIKE` operand, to be used with
    /// `ESCAPE '\'`. Literal `%`, `_` and `\` are escaped.
    pub fn to_like(&self) -> String {
        let mut like = String::with_capacity(self.0.len() + 2);
        like.push('%');
        for c in self.0.chars() {
            match c {
                '*' => like.push('%'),
                '%' | '_' | LIKE_ESCAPE => {
                    like.push(LIKE_ESCAPE);
                    like.push(c);
                }
                c => like.push(c),
            }
        }
        like.push('%');
        like
    }
}

impl From<&str> for Pattern {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plain_pattern_matches_substring() {
        let p = Pattern::new("dir");
        assert!(p.matches("/dir0"));
        assert!(p.matches("/a/subdir"));
        assert!(!p.matches("/servers"));
    }

    #[test]
    fn test_wildcard_spans_characters() {
        let p = Pattern::new("d*0");
        assert!(p.matches("/dir0"));
        assert!(p.matches("db-prod-0"));
        assert!(!p.matches("/dir1"));
    }

    #[test]
    fn test_segments_must_appear_in_order() {
        let p = Pattern::new("b*a");
        assert!(!p.matches("ab"));
        assert!(p.matches("bxa"));
    }

    #[test]
    fn test_case_insensitive() {
        assert!(Pattern::new("PROD").matches("/servers/prod"));
    }

    #[test]
    fn test_empty_and_star_match_everything() {
        assert!(Pattern::new("").matches("anything"));
        assert!(Pattern::new("**").matches(""));
    }

    #[test]
    fn test_like_translation() {
        assert_eq!(Pattern::new("dir*0").to_like(), "%dir%0%");
        assert_eq!(Pattern::new("100%_x").to_like(), "%100\\%\\_x%");
    }

    proptest! {
        #[test]
        fn test_any_substring_matches(
            value in "[a-z0-9/_%-]{0,24}",
            start in 0usize..24,
            len in 0usize..24,
        ) {
            let start = start.min(value.len());
            let end = (start + len).min(value.len());
            prop_assert!(Pattern::new(&value[start..end]).matches(&value));
        }

        #[test]
        fn test_like_has_no_bare_wildcards_from_input(raw in "[a-z%_\\\\]{0,12}") {
            let like = Pattern::new(raw).to_like();
            let inner = &like[1..like.len() - 1];
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == LIKE_ESCAPE {
                    let escaped = chars.next();
                    prop_assert!(matches!(escaped, Some('%' | '_' | '\\')));
                } else {
                    prop_assert!(c != '%' && c != '_');
                }
            }
        }
    }
}


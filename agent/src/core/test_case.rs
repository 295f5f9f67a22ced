//! Parsing of human-written test case strings.
//!
//! Accepted forms, tried in order:
//!
//! - `Input: 2, Output: true` / `input: [1,2,3], expected: 6` (case-insensitive)
//! - `2 -> true` / `2 => true`

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

static LABELLED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)input\s*:\s*(.+?)\s*,\s*(?:output|expected)\s*:\s*(.+)")
        .expect("labelled test case pattern should compile")
});

static ARROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(.+?)\s*(?:->|=>)\s*(.+)").expect("arrow test case pattern should compile")
});

/// A test case split into the call argument and the expected printed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTestCase {
    /// Trimmed original text.
    pub original: String,
    /// Argument expression passed verbatim to the entry method.
    pub input: String,
    /// Expected stdout line (trimmed).
    pub expected: String,
}

impl std::fmt::Display for ParsedTestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Input: {}, Expected: {}", self.input, self.expected)
    }
}

/// Parse one test case. Returns `None` for blank or unrecognized strings.
pub fn parse(raw: &str) -> Option<ParsedTestCase> {
    let original = raw.trim();
    if original.is_empty() {
        return None;
    }
    let caps = LABELLED_RE
        .captures(original)
        .or_else(|| ARROW_RE.captures(original))?;
    let input = caps.get(1)?.as_str().trim();
    let expected = caps.get(2)?.as_str().trim();
    if input.is_empty() || expected.is_empty() {
        return None;
    }
    Some(ParsedTestCase {
        original: original.to_string(),
        input: input.to_string(),
        expected: expected.to_string(),
    })
}

/// Parse every case, dropping (and logging) the ones that do not match.
pub fn parse_all<S: AsRef<str>>(raw_cases: &[S]) -> Vec<ParsedTestCase> {
    raw_cases
        .iter()
        .filter_map(|raw| {
            let raw = raw.as_ref();
            let parsed = parse(raw);
            if parsed.is_none() {
                warn!(test_case = raw, "could not parse test case, skipping");
            }
            parsed
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_labelled_form() {
        let case = parse("Input: 2, Output: true").expect("parse");
        assert_eq!(case.input, "2");
        assert_eq!(case.expected, "true");
        assert_eq!(case.original, "Input: 2, Output: true");
    }

    #[test]
    fn labelled_form_is_case_insensitive_and_accepts_expected() {
        let case = parse("input: new int[]{1,2,3}, EXPECTED: 6").expect("parse");
        assert_eq!(case.input, "new int[]{1,2,3}");
        assert_eq!(case.expected, "6");
    }

    #[test]
    fn parses_arrow_forms() {
        let thin = parse("\"abc\" -> 3").expect("parse thin arrow");
        assert_eq!(thin.input, "\"abc\"");
        assert_eq!(thin.expected, "3");

        let fat = parse("10 => false").expect("parse fat arrow");
        assert_eq!(fat.input, "10");
        assert_eq!(fat.expected, "false");
    }

    #[test]
    fn labelled_form_wins_over_arrow() {
        let case = parse("Input: f(x) -> y, Output: z").expect("parse");
        assert_eq!(case.input, "f(x) -> y");
        assert_eq!(case.expected, "z");
    }

    #[test]
    fn unparsable_and_blank_cases_are_rejected() {
        assert_eq!(parse("returns true for even numbers"), None);
        assert_eq!(parse("   "), None);
        assert_eq!(parse("-> 5"), None);
    }

    #[test]
    fn parsing_is_idempotent() {
        let raw = "Input: 5, Output: 5";
        assert_eq!(parse(raw), parse(raw));
    }

    #[test]
    fn parse_all_keeps_order_and_drops_garbage() {
        let raw = vec![
            "Input: 1, Output: a".to_string(),
            "garbage".to_string(),
            "2 => b".to_string(),
        ];
        let parsed = parse_all(&raw);
        let inputs: Vec<&str> = parsed.iter().map(|c| c.input.as_str()).collect();
        assert_eq!(inputs, vec!["1", "2"]);
    }
}

// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Host and URL filter patterns.

use regex::Regex;

/// Translates a wildcard pattern into an anchored regular expression.
/// `*` matches any run of non-whitespace characters, `?` a single character.
pub fn wildcard_to_regex(pattern: &str) -> String {
    let escaped = regex::escape(pattern)
        .replace(r"\?", ".")
        .replace(r"\*", r"[^\s]*");
    format!("^{escaped}$")
}

/// Compiles a filter pattern. Matching is case-insensitive.
pub fn compile(pattern: &str, is_regex: bool) -> Result<Regex, regex::Error> {
    let source = if is_regex {
        pattern.to_string()
    } else {
        wildcard_to_regex(pattern)
    };
    Regex::new(&format!("(?i){source}"))
}

/// Compiles every pattern, stopping at the first invalid one.
pub fn compile_all(patterns: &[String], is_regex: bool) -> Result<Vec<Regex>, regex::Error> {
    patterns.iter().map(|p| compile(p, is_regex)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_star_spans_subdomains() {
        let re = compile("*.example.com", false).unwrap();
        assert!(re.is_match("api.example.com"));
        assert!(re.is_match("a.b.example.com"));
        assert!(!re.is_match("example.org"));
        assert!(!re.is_match("api.example.com.evil"));
    }

    #[test]
    fn wildcard_question_mark_is_single_char() {
        let re = compile("api?.example.com", false).unwrap();
        assert!(re.is_match("api1.example.com"));
        assert!(!re.is_match("api12.example.com"));
    }

    #[test]
    fn dots_are_literal_in_wildcards() {
        let re = compile("example.com", false).unwrap();
        assert!(!re.is_match("exampleXcom"));
    }

    #[test]
    fn regex_patterns_pass_through() {
        let re = compile(r"^https://.*/v\d+/users$", true).unwrap();
        assert!(re.is_match("https://api.example.com/v2/users"));
        assert!(compile("(", true).is_err());
    }

    #[test]
    fn matching_ignores_case() {
        assert!(compile("API.example.com", false).unwrap().is_match("api.EXAMPLE.com"));
    }
}

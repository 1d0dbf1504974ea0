//! URL-watch matcher
//!
//! Decides which intercepted requests the plugins see. Patterns support
//! `*` (greedy, matches any characters including `/`); everything else is
//! matched literally and case-insensitively. A URL is watched iff at
//! least one include pattern matches and no exclude pattern matches.
//! Config entries prefixed with `!` are excludes.

use regex::{Regex, RegexBuilder};

use crate::core::error::{ErrorContext, ProxyResult};

/// A compiled watch pattern.
pub struct UrlToWatch {
    pattern: String,
    regex: Regex,
    exclude: bool,
}

impl UrlToWatch {
    pub fn compile(entry: &str) -> ProxyResult<Self> {
        let (exclude, pattern) = match entry.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, entry),
        };
        let regex = RegexBuilder::new(&wildcard_to_regex(pattern))
            .case_insensitive(true)
            .build()
            .config_context(&format!("invalid watch pattern {pattern}"))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
            exclude,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_exclude(&self) -> bool {
        self.exclude
    }

    pub fn matches(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }
}

/// The compiled watch list, immutable after load.
#[derive(Default)]
pub struct WatchList {
    entries: Vec<UrlToWatch>,
}

impl WatchList {
    pub fn compile(patterns: &[String]) -> ProxyResult<Self> {
        let entries = patterns
            .iter()
            .map(|p| UrlToWatch::compile(p))
            .collect::<ProxyResult<Vec<_>>>()?;
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exclude patterns short-circuit; an empty list watches nothing.
    pub fn matches(&self, url: &str) -> bool {
        if self
            .entries
            .iter()
            .any(|e| e.exclude && e.matches(url))
        {
            return false;
        }
        self.entries.iter().any(|e| !e.exclude && e.matches(url))
    }
}

/// Translate a wildcard pattern into an anchored regex: every
/// metacharacter is escaped except `*`, which becomes `.*`.
pub fn wildcard_to_regex(pattern: &str) -> String {
    let escaped = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    format!("^{escaped}$")
}

/// Suggest a wildcard covering the given URLs: their longest common
/// prefix cut at the final `/`, then `*`. Used by reporting callers to
/// propose watch entries for unwatched traffic.
pub fn suggest_wildcard(urls: &[String]) -> Option<String> {
    let first = urls.first()?;
    let mut prefix_len = first.len();
    for url in &urls[1..] {
        prefix_len = first
            .bytes()
            .zip(url.bytes())
            .take(prefix_len)
            .take_while(|(a, b)| a == b)
            .count();
    }
    // Cut at the final '/' inside the common prefix; '/' is ASCII so the
    // slice below always lands on a char boundary.
    let prefix = &first.as_bytes()[..prefix_len];
    let cut = prefix.iter().rposition(|&b| b == b'/')? + 1;
    Some(format!("{}*", &first[..cut]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(patterns: &[&str]) -> WatchList {
        WatchList::compile(&patterns.iter().map(|s| s.to_string()).collect::<Vec<_>>())
            .unwrap()
    }

    #[test]
    fn test_wildcard_spans_path_separators() {
        let watch = list(&["https://api.example.com/*"]);
        assert!(watch.matches("https://api.example.com/users/1/messages"));
        assert!(!watch.matches("https://other.example.com/users"));
    }

    #[test]
    fn test_metacharacters_are_literal() {
        let watch = list(&["https://api.example.com/v1.0/*"]);
        assert!(watch.matches("https://api.example.com/v1.0/users"));
        assert!(!watch.matches("https://api.example.com/v1x0/users"));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let watch = list(&[
            "https://api.example.com/*",
            "!https://api.example.com/health",
        ]);
        assert!(watch.matches("https://api.example.com/users"));
        assert!(!watch.matches("https://api.example.com/health"));
    }

    #[test]
    fn test_empty_list_watches_nothing() {
        let watch = list(&[]);
        assert!(!watch.matches("https://api.example.com/users"));
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let watch = list(&["https://API.example.com/*"]);
        assert!(watch.matches("https://api.EXAMPLE.com/users"));
    }

    #[test]
    fn test_compile_is_idempotent() {
        let patterns = vec![
            "https://api.example.com/*".to_string(),
            "!https://api.example.com/skip".to_string(),
        ];
        let a = WatchList::compile(&patterns).unwrap();
        let b = WatchList::compile(&patterns).unwrap();
        for url in [
            "https://api.example.com/users",
            "https://api.example.com/skip",
            "https://elsewhere.example.com/",
        ] {
            assert_eq!(a.matches(url), b.matches(url));
        }
    }

    #[test]
    fn test_suggest_wildcard_common_prefix() {
        let urls = vec![
            "https://api.example.com/users/1".to_string(),
            "https://api.example.com/users/2".to_string(),
        ];
        assert_eq!(
            suggest_wildcard(&urls).unwrap(),
            "https://api.example.com/users/*"
        );
    }

    #[test]
    fn test_suggest_wildcard_single_url() {
        let urls = vec!["https://api.example.com/users/1".to_string()];
        assert_eq!(
            suggest_wildcard(&urls).unwrap(),
            "https://api.example.com/users/*"
        );
    }

    #[test]
    fn test_suggest_wildcard_empty() {
        assert_eq!(suggest_wildcard(&[]), None);
    }
}

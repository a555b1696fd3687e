// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Host and URL include/exclude filtering.

use regex::Regex;
use spyglass_config::model::CaptureConfig;
use spyglass_config::pattern;
use url::Url;

/// Decides which requests are captured.
///
/// A request is captured when it matches an include pattern (or none are
/// configured) and matches no exclude pattern.
#[derive(Debug, Clone, Default)]
pub struct CaptureFilter {
    included_hosts: Vec<Regex>,
    included_urls: Vec<Regex>,
    excluded_hosts: Vec<Regex>,
    excluded_urls: Vec<Regex>,
}

impl CaptureFilter {
    pub fn from_config(config: &CaptureConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            included_hosts: pattern::compile_all(&config.included_hosts, config.regex)?,
            included_urls: pattern::compile_all(&config.included_urls, config.regex)?,
            excluded_hosts: pattern::compile_all(&config.excluded_hosts, config.regex)?,
            excluded_urls: pattern::compile_all(&config.excluded_urls, config.regex)?,
        })
    }

    /// True when no pattern is configured and every request passes.
    pub fn is_empty(&self) -> bool {
        self.included_hosts.is_empty()
            && self.included_urls.is_empty()
            && self.excluded_hosts.is_empty()
            && self.excluded_urls.is_empty()
    }

    /// Whether a request to `url` should be captured. Requests without a
    /// URL only pass an empty filter.
    pub fn allows(&self, url: Option<&str>) -> bool {
        if self.is_empty() {
            return true;
        }
        let Some(url) = url else {
            return false;
        };
        let host = host_of(url).unwrap_or_default();

        if !self.included_hosts.is_empty() || !self.included_urls.is_empty() {
            let included = self.included_hosts.iter().any(|re| re.is_match(&host))
                || self.included_urls.iter().any(|re| re.is_match(url));
            if !included {
                return false;
            }
        }
        if self.excluded_hosts.iter().any(|re| re.is_match(&host)) {
            return false;
        }
        !self.excluded_urls.iter().any(|re| re.is_match(url))
    }
}

/// Host of `url`, treating scheme-less input such as `example.com/a` as https.
fn host_of(url: &str) -> Option<String> {
    let parsed = match Url::parse(url) {
        Ok(parsed) if parsed.has_host() => parsed,
        _ => Url::parse(&format!("https://{url}")).ok()?,
    };
    parsed.host_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(configure: impl FnOnce(&mut CaptureConfig)) -> CaptureFilter {
        let mut config = CaptureConfig::default();
        configure(&mut config);
        CaptureFilter::from_config(&config).unwrap()
    }

    #[test]
    fn empty_filter_allows_everything() {
        let f = CaptureFilter::default();
        assert!(f.is_empty());
        assert!(f.allows(Some("https://example.com")));
        assert!(f.allows(None));
    }

    #[test]
    fn excluded_host_wildcard() {
        let f = filter(|c| c.excluded_hosts = vec!["*.github.com".into()]);
        assert!(!f.allows(Some("https://api.github.com/repos")));
        assert!(f.allows(Some("https://example.com/")));
        assert!(!f.allows(None));
    }

    #[test]
    fn included_hosts_or_urls_admit() {
        let f = filter(|c| {
            c.included_hosts = vec!["api.example.com".into()];
            c.included_urls = vec!["https://cdn.example.com/img/*".into()];
        });
        assert!(f.allows(Some("https://api.example.com/users")));
        assert!(f.allows(Some("https://cdn.example.com/img/a.png")));
        assert!(!f.allows(Some("https://cdn.example.com/js/app.js")));
    }

    #[test]
    fn exclusion_wins_over_inclusion() {
        let f = filter(|c| {
            c.included_hosts = vec!["*.example.com".into()];
            c.excluded_urls = vec![r".*/health$".into()];
            c.regex = false;
        });
        assert!(f.allows(Some("https://api.example.com/users")));

        let f = filter(|c| {
            c.included_hosts = vec![r".*\.example\.com".into()];
            c.excluded_urls = vec![r".*/health$".into()];
            c.regex = true;
        });
        assert!(!f.allows(Some("https://api.example.com/health")));
        assert!(f.allows(Some("https://api.example.com/users")));
    }

    #[test]
    fn scheme_less_urls_resolve_their_host() {
        let f = filter(|c| c.excluded_hosts = vec!["example.com".into()]);
        assert!(!f.allows(Some("example.com/path")));
    }
}

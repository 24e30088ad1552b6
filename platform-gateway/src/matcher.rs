//! Path matcher kinds (spec §4.4): Exact, Prefix, Regex, Wildcard, Template.
//!
//! `Template`'s `{name}` placeholders are compiled once into a named-group regex and
//! cached in a [`PatternCache`] bounded by a configured size — grounded on
//! `original_source/.../routing.py`'s template-to-regex compilation, expressed here with
//! the `regex` crate's named capture groups instead of hand-rolled backtracking.

use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// A path-matching strategy.
pub trait Matcher: Send + Sync {
    /// Whether `path` matches `pattern` under this strategy.
    fn matches(&self, pattern: &str, path: &str) -> bool;

    /// Named parameters extracted from `path` given `pattern`, if it matches.
    /// Returns an empty map if the matcher has no named captures (e.g. `Exact`).
    fn extract_params(&self, pattern: &str, path: &str) -> HashMap<String, String>;
}

/// `pattern == path`, byte for byte (case sensitivity is handled by the router's path
/// normalization pass, not here).
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactMatcher;

impl Matcher for ExactMatcher {
    fn matches(&self, pattern: &str, path: &str) -> bool {
        pattern == path
    }

    fn extract_params(&self, _pattern: &str, _path: &str) -> HashMap<String, String> {
        HashMap::new()
    }
}

/// `path` starts with `pattern`; the remainder is captured under the key `"*"`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrefixMatcher;

impl Matcher for PrefixMatcher {
    fn matches(&self, pattern: &str, path: &str) -> bool {
        path.starts_with(pattern)
    }

    fn extract_params(&self, pattern: &str, path: &str) -> HashMap<String, String> {
        let mut params = HashMap::new();
        if let Some(rest) = path.strip_prefix(pattern) {
            params.insert("*".to_string(), rest.to_string());
        }
        params
    }
}

/// A bounded cache of compiled patterns, keyed by the raw pattern string. Eviction is
/// FIFO once `max_size` is exceeded — simpler than true LRU and sufficient since route
/// tables are small and mostly static after startup.
pub struct PatternCache {
    max_size: usize,
    entries: Mutex<(HashMap<String, Arc<Regex>>, VecDeque<String>)>,
}

impl PatternCache {
    /// A cache holding at most `max_size` compiled patterns.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            entries: Mutex::new((HashMap::new(), VecDeque::new())),
        }
    }

    /// Fetch the compiled regex for `pattern`, compiling (and caching) it via `compile`
    /// if absent.
    fn get_or_compile(
        &self,
        pattern: &str,
        compile: impl FnOnce(&str) -> Regex,
    ) -> Arc<Regex> {
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        let mut guard = self.entries.lock().expect("pattern cache poisoned");
        let (map, order) = &mut *guard;
        if let Some(existing) = map.get(pattern) {
            return existing.clone();
        }

        let compiled = Arc::new(compile(pattern));
        if map.len() >= self.max_size {
            if let Some(oldest) = order.pop_front() {
                map.remove(&oldest);
            }
        }
        map.insert(pattern.to_string(), compiled.clone());
        order.push_back(pattern.to_string());
        compiled
    }
}

/// `pattern` is a regex with optional named capture groups (`(?P<name>...)`).
pub struct RegexMatcher {
    cache: PatternCache,
}

impl RegexMatcher {
    /// A regex matcher caching up to `cache_size` compiled patterns.
    #[must_use]
    pub fn new(cache_size: usize) -> Self {
        Self {
            cache: PatternCache::new(cache_size),
        }
    }

    fn compiled(&self, pattern: &str) -> Arc<Regex> {
        self.cache.get_or_compile(pattern, |p| {
            // "$^" is a fixed, known-valid never-matching pattern.
            #[allow(clippy::expect_used)]
            Regex::new(p).unwrap_or_else(|_| Regex::new("$^").expect("empty-match fallback"))
        })
    }
}

impl Matcher for RegexMatcher {
    fn matches(&self, pattern: &str, path: &str) -> bool {
        self.compiled(pattern).is_match(path)
    }

    fn extract_params(&self, pattern: &str, path: &str) -> HashMap<String, String> {
        let regex = self.compiled(pattern);
        let mut params = HashMap::new();
        if let Some(captures) = regex.captures(path) {
            for name in regex.capture_names().flatten() {
                if let Some(m) = captures.name(name) {
                    params.insert(name.to_string(), m.as_str().to_string());
                }
            }
        }
        params
    }
}

/// Shell-style glob: `*` matches any run of characters, `?` matches exactly one.
/// Compiled to an anchored regex and cached like [`RegexMatcher`].
pub struct WildcardMatcher {
    cache: PatternCache,
}

impl WildcardMatcher {
    /// A wildcard matcher caching up to `cache_size` compiled patterns.
    #[must_use]
    pub fn new(cache_size: usize) -> Self {
        Self {
            cache: PatternCache::new(cache_size),
        }
    }

    fn compiled(&self, pattern: &str) -> Arc<Regex> {
        self.cache.get_or_compile(pattern, |p| {
            let mut regex_src = String::from("^");
            for ch in p.chars() {
                match ch {
                    '*' => regex_src.push_str(".*"),
                    '?' => regex_src.push('.'),
                    other => regex_src.push_str(&regex::escape(&other.to_string())),
                }
            }
            regex_src.push('$');
            // "$^" is a fixed, known-valid never-matching pattern.
            #[allow(clippy::expect_used)]
            {
                Regex::new(&regex_src).unwrap_or_else(|_| Regex::new("$^").expect("fallback"))
            }
        })
    }
}

impl Matcher for WildcardMatcher {
    fn matches(&self, pattern: &str, path: &str) -> bool {
        self.compiled(pattern).is_match(path)
    }

    fn extract_params(&self, _pattern: &str, _path: &str) -> HashMap<String, String> {
        HashMap::new()
    }
}

/// `{name}` placeholders, e.g. `/users/{id}/posts/{post_id}`, compiled once to a regex
/// with one named group per placeholder and cached.
pub struct TemplateMatcher {
    cache: PatternCache,
}

impl TemplateMatcher {
    /// A template matcher caching up to `cache_size` compiled patterns.
    #[must_use]
    pub fn new(cache_size: usize) -> Self {
        Self {
            cache: PatternCache::new(cache_size),
        }
    }

    fn compiled(&self, pattern: &str) -> Arc<Regex> {
        self.cache.get_or_compile(pattern, |p| {
            // "$^" is a fixed, known-valid never-matching pattern.
            #[allow(clippy::expect_used)]
            {
                Regex::new(&template_to_regex(p)).unwrap_or_else(|_| Regex::new("$^").expect("fallback"))
            }
        })
    }
}

/// Convert `/users/{id}` into `^/users/(?P<id>[^/]+)$`.
fn template_to_regex(pattern: &str) -> String {
    let mut regex_src = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '{' {
            let mut name = String::new();
            for next in chars.by_ref() {
                if next == '}' {
                    break;
                }
                name.push(next);
            }
            regex_src.push_str(&format!("(?P<{name}>[^/]+)"));
        } else {
            regex_src.push_str(&regex::escape(&ch.to_string()));
        }
    }
    regex_src.push('$');
    regex_src
}

impl Matcher for TemplateMatcher {
    fn matches(&self, pattern: &str, path: &str) -> bool {
        self.compiled(pattern).is_match(path)
    }

    fn extract_params(&self, pattern: &str, path: &str) -> HashMap<String, String> {
        let regex = self.compiled(pattern);
        let mut params = HashMap::new();
        if let Some(captures) = regex.captures(path) {
            for name in regex.capture_names().flatten() {
                if let Some(m) = captures.name(name) {
                    params.insert(name.to_string(), m.as_str().to_string());
                }
            }
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_matcher_requires_identical_strings() {
        let m = ExactMatcher;
        assert!(m.matches("/health", "/health"));
        assert!(!m.matches("/health", "/healthz"));
    }

    #[test]
    fn prefix_matcher_captures_remainder_as_star() {
        let m = PrefixMatcher;
        assert!(m.matches("/static/", "/static/app.js"));
        let params = m.extract_params("/static/", "/static/app.js");
        assert_eq!(params.get("*"), Some(&"app.js".to_string()));
    }

    #[test]
    fn template_matcher_extracts_named_params() {
        let m = TemplateMatcher::new(16);
        assert!(m.matches("/users/{id}", "/users/42"));
        let params = m.extract_params("/users/{id}", "/users/42");
        assert_eq!(params.get("id"), Some(&"42".to_string()));
    }

    #[test]
    fn template_matcher_does_not_cross_path_segments() {
        let m = TemplateMatcher::new(16);
        assert!(!m.matches("/users/{id}", "/users/42/posts"));
    }

    #[test]
    fn wildcard_matcher_supports_star_glob() {
        let m = WildcardMatcher::new(16);
        assert!(m.matches("/users/*", "/users/42"));
        assert!(m.matches("/users/*", "/users/42/posts"));
        assert!(!m.matches("/users/*", "/accounts/1"));
    }

    #[test]
    fn regex_matcher_extracts_named_groups() {
        let m = RegexMatcher::new(16);
        let pattern = r"^/orders/(?P<order_id>\d+)$";
        assert!(m.matches(pattern, "/orders/123"));
        let params = m.extract_params(pattern, "/orders/123");
        assert_eq!(params.get("order_id"), Some(&"123".to_string()));
    }

    #[test]
    fn pattern_cache_evicts_oldest_past_capacity() {
        let cache = PatternCache::new(2);
        let _a = cache.get_or_compile("a", |p| Regex::new(p).unwrap());
        let _b = cache.get_or_compile("b", |p| Regex::new(p).unwrap());
        let _c = cache.get_or_compile("c", |p| Regex::new(p).unwrap());
        let guard = cache.entries.lock().unwrap();
        assert_eq!(guard.0.len(), 2);
        assert!(!guard.0.contains_key("a"));
    }
}

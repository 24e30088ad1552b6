//! `PathRouter`, `CompositeRouter`, `WeightedRouter` (spec §4.4).

use crate::route::{route_matches, MatcherSet, RequestContext, Route};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Path normalization applied before matching.
#[derive(Debug, Clone, Copy)]
pub struct NormalizationConfig {
    /// Collapse runs of consecutive slashes into one.
    pub collapse_slashes: bool,
    /// Strip a single trailing slash, except on the root path `"/"`.
    pub strip_trailing_slash: bool,
    /// Whether path comparison is case-sensitive.
    pub case_sensitive: bool,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            collapse_slashes: true,
            strip_trailing_slash: true,
            case_sensitive: true,
        }
    }
}

impl NormalizationConfig {
    /// Apply this configuration to `path`.
    #[must_use]
    pub fn normalize(&self, path: &str) -> String {
        let mut normalized = if self.collapse_slashes {
            let mut out = String::with_capacity(path.len());
            let mut prev_slash = false;
            for ch in path.chars() {
                if ch == '/' {
                    if prev_slash {
                        continue;
                    }
                    prev_slash = true;
                } else {
                    prev_slash = false;
                }
                out.push(ch);
            }
            out
        } else {
            path.to_string()
        };

        if self.strip_trailing_slash && normalized.len() > 1 && normalized.ends_with('/') {
            normalized.pop();
        }

        if !self.case_sensitive {
            normalized = normalized.to_lowercase();
        }

        normalized
    }
}

/// Cache key: method, normalized path, host, and every header value any route inspects
/// (spec §4.4 "Request cache key").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    method: String,
    path: String,
    host: Option<String>,
    header_values: Vec<(String, String)>,
}

/// A match result: the winning route plus any parameters its pattern captured.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The matched route's name (routes are cloned out of the table as `Arc`s; callers
    /// needing the full route look it up by name or hold their own `Arc<Route>`).
    pub route: Arc<Route>,
    /// Captured path/host parameters.
    pub params: HashMap<String, String>,
}

/// An ordered table of routes, evaluated highest-priority-first; first match wins.
///
/// Caches the `(request key) -> match` mapping; any `add_route`/`remove_route` call
/// invalidates the entire cache rather than tracking fine-grained dependency (route
/// tables are small and rarely mutated after startup, so this is simpler than partial
/// invalidation and just as correct).
pub struct PathRouter {
    matchers: Arc<MatcherSet>,
    normalization: NormalizationConfig,
    routes: RwLock<Vec<Arc<Route>>>,
    cache: RwLock<HashMap<CacheKey, Option<RouteMatch>>>,
    cache_capacity: usize,
}

impl PathRouter {
    /// An empty router using `matchers` for pattern matching and `normalization` for
    /// path preprocessing, caching up to `cache_capacity` match results.
    #[must_use]
    pub fn new(
        matchers: Arc<MatcherSet>,
        normalization: NormalizationConfig,
        cache_capacity: usize,
    ) -> Self {
        Self {
            matchers,
            normalization,
            routes: RwLock::new(Vec::new()),
            cache: RwLock::new(HashMap::new()),
            cache_capacity,
        }
    }

    /// Insert `route`, keeping the table sorted by `priority` descending (stable sort:
    /// equal-priority routes keep insertion order, satisfying invariant 4's tie-break).
    pub fn add_route(&self, route: Route) {
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        let mut routes = self.routes.write().expect("route table poisoned");
        routes.push(Arc::new(route));
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));
        self.invalidate_cache();
    }

    /// Remove the route named `name`, if present.
    pub fn remove_route(&self, name: &str) {
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        let mut routes = self.routes.write().expect("route table poisoned");
        routes.retain(|r| r.name != name);
        self.invalidate_cache();
    }

    fn invalidate_cache(&self) {
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        self.cache.write().expect("route cache poisoned").clear();
    }

    fn cache_key(&self, request: &RequestContext, path: &str) -> CacheKey {
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        let routes = self.routes.read().expect("route table poisoned");
        let mut header_names: Vec<&str> = routes
            .iter()
            .flat_map(|r| r.required_headers.keys().map(String::as_str))
            .collect();
        header_names.sort_unstable();
        header_names.dedup();

        let header_values = header_names
            .into_iter()
            .filter_map(|name| request.headers.get(name).map(|v| (name.to_string(), v.clone())))
            .collect();

        CacheKey {
            method: request.method.clone(),
            path: path.to_string(),
            host: request.host.clone(),
            header_values,
        }
    }

    /// Find the highest-priority route matching `request`, or `None`.
    #[must_use]
    pub fn find(&self, request: &RequestContext) -> Option<RouteMatch> {
        let normalized_path = self.normalization.normalize(&request.path);
        let key = self.cache_key(request, &normalized_path);

        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        if let Some(cached) = self.cache.read().expect("route cache poisoned").get(&key) {
            return cached.clone();
        }

        let normalized_request = RequestContext {
            path: normalized_path,
            ..request.clone()
        };

        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        let routes = self.routes.read().expect("route table poisoned");
        let found = routes.iter().find_map(|route| {
            let matcher = self.matchers.for_kind(route.match_kind);
            if route_matches(route, &normalized_request, matcher.as_ref()) {
                let params = matcher.extract_params(&route.path_pattern, &normalized_request.path);
                Some(RouteMatch {
                    route: route.clone(),
                    params,
                })
            } else {
                None
            }
        });

        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        let mut cache = self.cache.write().expect("route cache poisoned");
        if cache.len() >= self.cache_capacity {
            cache.clear();
        }
        cache.insert(key, found.clone());
        found
    }
}

/// Evaluates a sequence of sub-routers (primary, host-based, header-based, weighted) and
/// returns the first hit, or a configured fallback.
pub struct CompositeRouter {
    routers: Vec<Arc<PathRouter>>,
}

impl CompositeRouter {
    /// Build a composite over `routers`, tried in order.
    #[must_use]
    pub fn new(routers: Vec<Arc<PathRouter>>) -> Self {
        Self { routers }
    }

    /// The first match from any sub-router, in order, or `None` if none match.
    #[must_use]
    pub fn find(&self, request: &RequestContext) -> Option<RouteMatch> {
        self.routers.iter().find_map(|router| router.find(request))
    }
}

/// A named upstream with a relative weight, used by [`WeightedRouter`].
#[derive(Debug, Clone)]
pub struct WeightedTarget {
    /// Target route name to dispatch to.
    pub route: Arc<Route>,
    /// Relative selection weight (larger selected more often under weighted random).
    pub weight: u32,
}

/// Canary/A-B/weighted-random target selection (spec §4.4 `WeightedRouter`).
pub struct WeightedRouter {
    targets: Vec<WeightedTarget>,
}

impl WeightedRouter {
    /// Build a weighted router over `targets`, in configured priority order (first
    /// listed wins a `X-Canary: true` request).
    #[must_use]
    pub fn new(targets: Vec<WeightedTarget>) -> Self {
        Self { targets }
    }

    /// Select a target per spec §4.4: `X-Canary: true` picks the first-by-weight
    /// target; else an `X-AB-Group` header picks `group mod len`; else weighted random.
    #[must_use]
    pub fn select(&self, request: &RequestContext) -> Option<Arc<Route>> {
        if self.targets.is_empty() {
            return None;
        }

        if request
            .headers
            .get("X-Canary")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            return self
                .targets
                .iter()
                .max_by_key(|t| t.weight)
                .map(|t| t.route.clone());
        }

        if let Some(group) = request.headers.get("X-AB-Group").and_then(|v| v.parse::<usize>().ok()) {
            let index = group % self.targets.len();
            return self.targets.get(index).map(|t| t.route.clone());
        }

        self.select_weighted_random()
    }

    fn select_weighted_random(&self) -> Option<Arc<Route>> {
        let total_weight: u32 = self.targets.iter().map(|t| t.weight).sum();
        if total_weight == 0 {
            return self.targets.first().map(|t| t.route.clone());
        }

        let mut pick = rand::thread_rng().gen_range(0..total_weight);
        for target in &self.targets {
            if pick < target.weight {
                return Some(target.route.clone());
            }
            pick -= target.weight;
        }
        self.targets.last().map(|t| t.route.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::MatchKind;

    fn req(method: &str, path: &str) -> RequestContext {
        RequestContext {
            method: method.to_string(),
            path: path.to_string(),
            host: None,
            headers: HashMap::new(),
            query_params: HashMap::new(),
            body: None,
        }
    }

    #[test]
    fn s2_higher_priority_template_route_wins_over_lower_priority_wildcard() {
        let matchers = Arc::new(MatcherSet::new(16));
        let router = PathRouter::new(matchers, NormalizationConfig::default(), 64);

        let mut a = Route::new("get-user-by-id", 10, "/users/{id}", MatchKind::Template, "users-service");
        a.methods = vec!["GET".to_string()];
        router.add_route(a);

        let mut b = Route::new("get-users-wildcard", 5, "/users/*", MatchKind::Wildcard, "users-service");
        b.methods = vec!["GET".to_string()];
        router.add_route(b);

        let result = router.find(&req("GET", "/users/42")).expect("a route matches");
        assert_eq!(result.route.name, "get-user-by-id");
        assert_eq!(result.params.get("id"), Some(&"42".to_string()));
    }

    #[test]
    fn equal_priority_routes_break_ties_by_insertion_order() {
        let matchers = Arc::new(MatcherSet::new(16));
        let router = PathRouter::new(matchers, NormalizationConfig::default(), 64);
        router.add_route(Route::new("first", 0, "/ping", MatchKind::Exact, "svc-a"));
        router.add_route(Route::new("second", 0, "/ping", MatchKind::Exact, "svc-b"));

        let result = router.find(&req("GET", "/ping")).expect("matches");
        assert_eq!(result.route.name, "first");
    }

    #[test]
    fn path_normalization_collapses_slashes_and_strips_trailing_slash() {
        let matchers = Arc::new(MatcherSet::new(16));
        let router = PathRouter::new(matchers, NormalizationConfig::default(), 64);
        router.add_route(Route::new("health", 0, "/health", MatchKind::Exact, "svc"));

        assert!(router.find(&req("GET", "/health/")).is_some());
        assert!(router.find(&req("GET", "//health")).is_some());
    }

    #[test]
    fn removing_a_route_invalidates_the_cache() {
        let matchers = Arc::new(MatcherSet::new(16));
        let router = PathRouter::new(matchers, NormalizationConfig::default(), 64);
        router.add_route(Route::new("health", 0, "/health", MatchKind::Exact, "svc"));

        assert!(router.find(&req("GET", "/health")).is_some());
        router.remove_route("health");
        assert!(router.find(&req("GET", "/health")).is_none());
    }

    #[test]
    fn weighted_router_honors_canary_header() {
        let canary = Arc::new(Route::new("canary", 0, "/x", MatchKind::Exact, "svc-canary"));
        let stable = Arc::new(Route::new("stable", 0, "/x", MatchKind::Exact, "svc-stable"));
        let router = WeightedRouter::new(vec![
            WeightedTarget { route: stable, weight: 10 },
            WeightedTarget { route: canary.clone(), weight: 90 },
        ]);

        let mut request = req("GET", "/x");
        request.headers.insert("X-Canary".to_string(), "true".to_string());
        let selected = router.select(&request).expect("selects a target");
        assert_eq!(selected.name, canary.name);
    }
}

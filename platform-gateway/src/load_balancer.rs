//! Load balancer pool (spec §4.6): server selection algorithms, health checking, and
//! sticky sessions over a set of upstream [`ServiceInstance`]s.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

const RESPONSE_TIME_WINDOW: usize = 50;

/// A single upstream server (spec §3 `ServiceInstance`).
pub struct ServiceInstance {
    /// Stable identifier, used as the consistent-hash ring key.
    pub id: String,
    /// Upstream host.
    pub host: String,
    /// Upstream port.
    pub port: u16,
    /// Relative weight for weighted algorithms; must be >= 1.
    pub weight: u32,
    healthy: std::sync::atomic::AtomicBool,
    current_connections: AtomicU64,
    total_requests: AtomicU64,
    current_weight: AtomicI64,
    breaker: CircuitBreaker,
    response_times: Mutex<VecDeque<Duration>>,
}

impl ServiceInstance {
    /// A healthy instance with no recorded traffic.
    #[must_use]
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16, weight: u32) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            weight: weight.max(1),
            healthy: std::sync::atomic::AtomicBool::new(true),
            current_connections: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            current_weight: AtomicI64::new(0),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            response_times: Mutex::new(VecDeque::with_capacity(RESPONSE_TIME_WINDOW)),
        }
    }

    /// Build with a specific circuit breaker configuration.
    #[must_use]
    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = CircuitBreaker::new(config);
        self
    }

    /// `scheme://host:port`.
    #[must_use]
    pub fn base_url(&self, scheme: &str) -> String {
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    /// Selectable iff healthy, circuit not OPEN (or eligible for a HALF_OPEN probe),
    /// and under its connection cap.
    async fn is_selectable(&self, max_connections: Option<u64>) -> bool {
        if !self.is_healthy() {
            return false;
        }
        if let Some(max) = max_connections {
            if self.current_connections.load(Ordering::Relaxed) >= max {
                return false;
            }
        }
        self.breaker_would_probe().await
    }

    async fn breaker_would_probe(&self) -> bool {
        // `state()` alone doesn't advance OPEN -> HALF_OPEN (that only happens inside
        // `call`); a server whose recovery_timeout has elapsed is still reported Open
        // until the next `call`, so check wall-clock elapsed time directly rather than
        // re-reading `state()` (which would never change and would permanently exclude
        // this instance from selection, and therefore from ever reaching `call`).
        self.breaker.would_probe_now().await
    }

    fn connections(&self) -> u64 {
        self.current_connections.load(Ordering::Relaxed)
    }

    /// Total requests dispatched to this instance since it was created.
    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    fn average_response_time(&self) -> Duration {
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        let samples = self.response_times.lock().expect("response time window poisoned");
        if samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = samples.iter().sum();
        total / samples.len() as u32
    }

    fn record_response_time(&self, elapsed: Duration) {
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        let mut samples = self.response_times.lock().expect("response time window poisoned");
        if samples.len() >= RESPONSE_TIME_WINDOW {
            samples.pop_front();
        }
        samples.push_back(elapsed);
    }

    /// Run `operation` through this instance's circuit breaker, tracking connection
    /// count and response time around the call.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Option<Result<T, E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.current_connections.fetch_add(1, Ordering::Relaxed);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let result = self
            .breaker
            .call(|| async {
                let outcome = operation().await;
                outcome
            })
            .await;

        self.record_response_time(started.elapsed());
        self.current_connections.fetch_sub(1, Ordering::Relaxed);
        result
    }
}

/// Server-selection strategy (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Stateful round-robin index per pool.
    RoundRobin,
    /// Smooth weighted round-robin with current-weight tracking.
    WeightedRoundRobin,
    /// Fewest active connections.
    LeastConnections,
    /// Fewest active connections per unit weight.
    WeightedLeastConnections,
    /// Uniform random.
    Random,
    /// Weight-proportional random.
    WeightedRandom,
    /// SHA-256 hash ring, keyed by the client's first `X-Forwarded-For` hop.
    ConsistentHash,
    /// Hash of the client IP modulo server count.
    IpHash,
    /// Smallest moving-average response time.
    LeastResponseTime,
}

/// Sticky-session configuration: reuse the server bound to a session cookie if it is
/// still selectable, else select fresh and rebind.
#[derive(Debug, Clone)]
pub struct StickyConfig {
    /// Cookie name carrying the bound server id.
    pub cookie_name: String,
}

/// A named group of upstream servers selected via one [`Algorithm`] (spec §4.6 "pool").
pub struct Pool {
    /// Pool name.
    pub name: String,
    /// Selection algorithm.
    pub algorithm: Algorithm,
    /// Member servers.
    pub servers: Vec<Arc<ServiceInstance>>,
    /// Per-instance connection cap, if any.
    pub max_connections: Option<u64>,
    /// Sticky session config, if enabled.
    pub sticky: Option<StickyConfig>,
    round_robin_index: AtomicU64,
    ring: RwLock<Vec<(u64, usize)>>,
}

const VIRTUAL_NODES_PER_SERVER: u32 = 100;

impl Pool {
    /// Build a pool, pre-building the consistent-hash ring if `algorithm` needs one.
    #[must_use]
    pub fn new(name: impl Into<String>, algorithm: Algorithm, servers: Vec<Arc<ServiceInstance>>) -> Self {
        let pool = Self {
            name: name.into(),
            algorithm,
            servers,
            max_connections: None,
            sticky: None,
            round_robin_index: AtomicU64::new(0),
            ring: RwLock::new(Vec::new()),
        };
        pool.rebuild_ring();
        pool
    }

    /// Cap each server's concurrent connections.
    #[must_use]
    pub fn with_max_connections(mut self, max: u64) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Enable sticky sessions bound by `sticky.cookie_name`.
    #[must_use]
    pub fn with_sticky(mut self, sticky: StickyConfig) -> Self {
        self.sticky = Some(sticky);
        self
    }

    fn rebuild_ring(&self) {
        let mut ring = Vec::new();
        for (index, server) in self.servers.iter().enumerate() {
            for i in 0..VIRTUAL_NODES_PER_SERVER {
                let mut hasher = Sha256::new();
                hasher.update(format!("{}:{i}", server.id).as_bytes());
                let digest = hasher.finalize();
                // A SHA-256 digest is always >= 8 bytes.
                #[allow(clippy::expect_used)]
                let point = u64::from_be_bytes(digest[0..8].try_into().expect("8 bytes"));
                ring.push((point, index));
            }
        }
        ring.sort_unstable_by_key(|(point, _)| *point);
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        {
            *self.ring.write().expect("hash ring poisoned") = ring;
        }
    }

    async fn selectable_indices(&self) -> Vec<usize> {
        let mut indices = Vec::new();
        for (index, server) in self.servers.iter().enumerate() {
            if server.is_selectable(self.max_connections).await {
                indices.push(index);
            }
        }
        indices
    }

    /// Select a server for `client_key` (used by IP hash / consistent hash), or `None`
    /// if no server is currently selectable — the caller must return 503 without
    /// retrying further (spec §4.6 `select`).
    pub async fn select(&self, client_key: Option<&str>) -> Option<Arc<ServiceInstance>> {
        let selectable = self.selectable_indices().await;
        if selectable.is_empty() {
            return None;
        }

        let chosen = match self.algorithm {
            Algorithm::RoundRobin => self.select_round_robin(&selectable),
            Algorithm::WeightedRoundRobin => self.select_weighted_round_robin(&selectable),
            Algorithm::LeastConnections => self.select_least_connections(&selectable),
            Algorithm::WeightedLeastConnections => self.select_weighted_least_connections(&selectable),
            Algorithm::Random => self.select_random(&selectable),
            Algorithm::WeightedRandom => self.select_weighted_random(&selectable),
            Algorithm::ConsistentHash => self.select_consistent_hash(&selectable, client_key),
            Algorithm::IpHash => self.select_ip_hash(&selectable, client_key),
            Algorithm::LeastResponseTime => self.select_least_response_time(&selectable),
        };

        chosen.map(|index| self.servers[index].clone())
    }

    /// Select honoring sticky sessions (spec §4.6): if `session_server_id` names a
    /// still-selectable server, reuse it; else select fresh. Returns the chosen
    /// server's id alongside the instance so the caller can (re)bind the session
    /// cookie when it changes.
    pub async fn select_sticky(
        &self,
        client_key: Option<&str>,
        session_server_id: Option<&str>,
    ) -> Option<(Arc<ServiceInstance>, bool)> {
        if self.sticky.is_some() {
            if let Some(bound_id) = session_server_id {
                let selectable = self.selectable_indices().await;
                if let Some(&index) = selectable.iter().find(|&&i| self.servers[i].id == bound_id) {
                    return Some((self.servers[index].clone(), false));
                }
            }
        }
        self.select(client_key).await.map(|server| (server, true))
    }

    /// Select a server other than `exclude`, for retries (spec §4.6 "retries MUST pick
    /// a different server when possible").
    pub async fn select_excluding(&self, client_key: Option<&str>, exclude: &str) -> Option<Arc<ServiceInstance>> {
        let selectable = self.selectable_indices().await;
        let filtered: Vec<usize> = selectable.iter().copied().filter(|&i| self.servers[i].id != exclude).collect();
        if filtered.is_empty() {
            return self.select(client_key).await;
        }

        let chosen = match self.algorithm {
            Algorithm::RoundRobin => self.select_round_robin(&filtered),
            Algorithm::WeightedRoundRobin => self.select_weighted_round_robin(&filtered),
            Algorithm::LeastConnections => self.select_least_connections(&filtered),
            Algorithm::WeightedLeastConnections => self.select_weighted_least_connections(&filtered),
            Algorithm::Random => self.select_random(&filtered),
            Algorithm::WeightedRandom => self.select_weighted_random(&filtered),
            Algorithm::ConsistentHash => self.select_consistent_hash(&filtered, client_key),
            Algorithm::IpHash => self.select_ip_hash(&filtered, client_key),
            Algorithm::LeastResponseTime => self.select_least_response_time(&filtered),
        };
        chosen.map(|index| self.servers[index].clone())
    }

    fn select_round_robin(&self, selectable: &[usize]) -> Option<usize> {
        let i = self.round_robin_index.fetch_add(1, Ordering::Relaxed) as usize;
        selectable.get(i % selectable.len()).copied()
    }

    fn select_weighted_round_robin(&self, selectable: &[usize]) -> Option<usize> {
        // Smooth weighted round-robin: each candidate's current_weight += weight; pick
        // the max; subtract the total weight from the winner.
        let total_weight: i64 = selectable.iter().map(|&i| i64::from(self.servers[i].weight)).sum();
        if total_weight == 0 {
            return selectable.first().copied();
        }

        let mut best: Option<(usize, i64)> = None;
        for &index in selectable {
            let server = &self.servers[index];
            let updated = server.current_weight.fetch_add(i64::from(server.weight), Ordering::Relaxed)
                + i64::from(server.weight);
            if best.is_none_or(|(_, w)| updated > w) {
                best = Some((index, updated));
            }
        }

        if let Some((winner, _)) = best {
            self.servers[winner].current_weight.fetch_sub(total_weight, Ordering::Relaxed);
        }
        best.map(|(index, _)| index)
    }

    fn select_least_connections(&self, selectable: &[usize]) -> Option<usize> {
        selectable.iter().copied().min_by_key(|&i| self.servers[i].connections())
    }

    fn select_weighted_least_connections(&self, selectable: &[usize]) -> Option<usize> {
        selectable.iter().copied().min_by(|&a, &b| {
            let ratio_a = self.servers[a].connections() as f64 / f64::from(self.servers[a].weight);
            let ratio_b = self.servers[b].connections() as f64 / f64::from(self.servers[b].weight);
            ratio_a.partial_cmp(&ratio_b).unwrap_or(std::cmp::Ordering::Equal)
        })
    }

    fn select_random(&self, selectable: &[usize]) -> Option<usize> {
        use rand::Rng;
        selectable.get(rand::thread_rng().gen_range(0..selectable.len())).copied()
    }

    fn select_weighted_random(&self, selectable: &[usize]) -> Option<usize> {
        use rand::Rng;
        let total_weight: u32 = selectable.iter().map(|&i| self.servers[i].weight).sum();
        if total_weight == 0 {
            return selectable.first().copied();
        }
        let mut pick = rand::thread_rng().gen_range(0..total_weight);
        for &index in selectable {
            let weight = self.servers[index].weight;
            if pick < weight {
                return Some(index);
            }
            pick -= weight;
        }
        selectable.last().copied()
    }

    fn select_consistent_hash(&self, selectable: &[usize], client_key: Option<&str>) -> Option<usize> {
        let key = client_key.unwrap_or("");
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        // A SHA-256 digest is always >= 8 bytes.
        #[allow(clippy::expect_used)]
        let point = u64::from_be_bytes(digest[0..8].try_into().expect("8 bytes"));

        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        let ring = self.ring.read().expect("hash ring poisoned");
        if ring.is_empty() {
            return selectable.first().copied();
        }

        let start = ring.partition_point(|(p, _)| *p < point);
        let len = ring.len();
        for offset in 0..len {
            let (_, index) = ring[(start + offset) % len];
            if selectable.contains(&index) {
                return Some(index);
            }
        }
        selectable.first().copied()
    }

    fn select_ip_hash(&self, selectable: &[usize], client_key: Option<&str>) -> Option<usize> {
        let key = client_key.unwrap_or("");
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        // A SHA-256 digest is always >= 8 bytes.
        #[allow(clippy::expect_used)]
        let point = u64::from_be_bytes(digest[0..8].try_into().expect("8 bytes"));
        selectable.get((point as usize) % selectable.len()).copied()
    }

    fn select_least_response_time(&self, selectable: &[usize]) -> Option<usize> {
        selectable
            .iter()
            .copied()
            .min_by_key(|&i| self.servers[i].average_response_time())
    }
}

/// Runs one periodic health-check task per server in a pool.
pub struct HealthChecker {
    client: reqwest::Client,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl HealthChecker {
    /// A health checker using a default-configured HTTP client (TLS verification on).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a background task polling `server` at `health_check_path` every `interval`,
    /// marking it healthy/unhealthy based on a 2xx response within `timeout`.
    pub fn spawn(
        &self,
        server: Arc<ServiceInstance>,
        health_check_path: String,
        interval: Duration,
        timeout: Duration,
        scheme: String,
    ) -> tokio::task::JoinHandle<()> {
        let client = self.client.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let url = format!("{}{}", server.base_url(&scheme), health_check_path);
                let outcome = client.get(&url).timeout(timeout).send().await;
                let healthy = matches!(&outcome, Ok(resp) if resp.status().is_success());
                server.set_healthy(healthy);
                if !healthy {
                    tracing::warn!(server = %server.id, "health check failed");
                    metrics::counter!("gateway.health_check.failed").increment(1);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(algorithm: Algorithm, weights: &[u32]) -> Pool {
        let servers = weights
            .iter()
            .enumerate()
            .map(|(i, &w)| Arc::new(ServiceInstance::new(format!("s{i}"), "localhost", 8080 + i as u16, w)))
            .collect();
        Pool::new("test-pool", algorithm, servers)
    }

    #[tokio::test]
    async fn round_robin_cycles_through_servers() {
        let pool = pool(Algorithm::RoundRobin, &[1, 1, 1]);
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(pool.select(None).await.unwrap().id.clone());
        }
        assert_eq!(seen, vec!["s0", "s1", "s2"]);
    }

    #[tokio::test]
    async fn no_selectable_server_returns_none() {
        let servers = vec![Arc::new(ServiceInstance::new("s0", "localhost", 8080, 1))];
        servers[0].set_healthy(false);
        let pool = Pool::new("test-pool", Algorithm::RoundRobin, servers);
        assert!(pool.select(None).await.is_none());
    }

    #[tokio::test]
    async fn consistent_hash_is_stable_for_the_same_key() {
        let pool = pool(Algorithm::ConsistentHash, &[1, 1, 1, 1]);
        let first = pool.select(Some("client-a")).await.unwrap().id.clone();
        let second = pool.select(Some("client-a")).await.unwrap().id.clone();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn weighted_round_robin_favors_higher_weight() {
        let pool = pool(Algorithm::WeightedRoundRobin, &[3, 1]);
        let mut counts = std::collections::HashMap::new();
        for _ in 0..8 {
            let id = pool.select(None).await.unwrap().id.clone();
            *counts.entry(id).or_insert(0) += 1;
        }
        assert!(counts["s0"] > counts["s1"]);
    }

    #[tokio::test]
    async fn least_connections_prefers_the_idlest_server() {
        let pool = pool(Algorithm::LeastConnections, &[1, 1]);
        pool.servers[0].current_connections.fetch_add(5, Ordering::Relaxed);
        let chosen = pool.select(None).await.unwrap();
        assert_eq!(chosen.id, "s1");
    }

    #[tokio::test]
    async fn sticky_session_reuses_the_bound_server_while_selectable() {
        let pool = pool(Algorithm::RoundRobin, &[1, 1]).with_sticky(StickyConfig { cookie_name: "sid".to_string() });
        let (first, rebind) = pool.select_sticky(None, None).await.unwrap();
        assert!(rebind);

        let (second, rebind) = pool.select_sticky(None, Some(&first.id)).await.unwrap();
        assert_eq!(second.id, first.id);
        assert!(!rebind);
    }

    #[tokio::test]
    async fn sticky_session_rebinds_when_bound_server_is_unhealthy() {
        let pool = pool(Algorithm::RoundRobin, &[1, 1]).with_sticky(StickyConfig { cookie_name: "sid".to_string() });
        pool.servers[0].set_healthy(false);
        let (chosen, rebind) = pool.select_sticky(None, Some("s0")).await.unwrap();
        assert_eq!(chosen.id, "s1");
        assert!(rebind);
    }

    #[tokio::test]
    async fn instance_becomes_selectable_again_once_its_breaker_recovers() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .recovery_timeout(Duration::from_millis(20))
            .build();
        let server = Arc::new(ServiceInstance::new("s0", "localhost", 8080, 1).with_breaker_config(config));
        let pool = Pool::new("test-pool", Algorithm::RoundRobin, vec![server.clone()]);

        let _ = server.call(|| async { Err::<(), _>("boom") }).await;
        assert!(pool.select(None).await.is_none(), "breaker just opened, not yet eligible for a probe");

        tokio::time::sleep(Duration::from_millis(30)).await;
        let selected = pool.select(None).await;
        assert!(selected.is_some(), "breaker past its recovery timeout must be selectable for a probe");
    }

    #[tokio::test]
    async fn select_excluding_avoids_the_given_server_when_alternatives_exist() {
        let pool = pool(Algorithm::RoundRobin, &[1, 1]);
        for _ in 0..10 {
            let chosen = pool.select_excluding(None, "s0").await.unwrap();
            assert_eq!(chosen.id, "s1");
        }
    }
}

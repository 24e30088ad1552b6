//! Authentication and authorization (spec §4.7).
//!
//! JWT validation is grounded on `examples/proerror77-Nova/backend/libs/crypto-core/src/jwt.rs`
//! (`jsonwebtoken` decode/validate shape), adapted to cache positive results until the
//! token's own expiry rather than re-verifying the signature on every request.

use crate::route::RequestContext;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// The authenticated (or anonymous) identity attached to a request.
#[derive(Debug, Clone, Default)]
pub struct Principal {
    /// Stable subject identifier (`"anonymous"` for `AuthProvider::None`).
    pub subject: String,
    /// Assigned roles.
    pub roles: HashSet<String>,
    /// Held permissions, `:`-hierarchical (e.g. `orders:read`, `orders:*`).
    pub permissions: HashSet<String>,
    /// Free-form attributes available to authorization conditions.
    pub attributes: HashMap<String, serde_json::Value>,
}

impl Principal {
    /// The anonymous principal used by `AuthProvider::None`.
    #[must_use]
    pub fn anonymous() -> Self {
        Self { subject: "anonymous".to_string(), ..Self::default() }
    }

    /// Whether this principal holds `permission`, honoring `prefix:*` wildcards.
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        if self.permissions.contains(permission) {
            return true;
        }
        let Some((prefix, _)) = permission.split_once(':') else {
            return false;
        };
        self.permissions.contains(&format!("{prefix}:*"))
    }
}

/// Standard JWT claims validated by [`AuthProvider::Jwt`].
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    permissions: Vec<String>,
}

/// A pluggable credential validator for `AuthProvider::Basic`/`Custom`.
pub type CredentialValidator =
    Arc<dyn Fn(&str) -> Pin<Box<dyn Future<Output = Option<Principal>> + Send>> + Send + Sync>;

struct JwtCacheEntry {
    principal: Principal,
    expires_at: Instant,
}

/// Authentication strategy (spec §4.7 "Authentication").
pub enum AuthProvider {
    /// Every request is anonymous.
    None,
    /// A static header or query-param API key maps to a principal.
    ApiKey {
        /// Header name carrying the key (checked before `query_param`).
        header_name: String,
        /// Query parameter name carrying the key.
        query_param: String,
        /// Known keys and the principal each grants.
        keys: HashMap<String, Principal>,
    },
    /// Bearer JWT, verified against `decoding_key`/`validation`; positive verifications
    /// are cached until the token's own `exp`.
    Jwt {
        /// Key used to verify the token signature.
        decoding_key: DecodingKey,
        /// Algorithm/audience/issuer validation rules.
        validation: Validation,
        /// Token string -> cached principal, evicted lazily past `exp`.
        cache: Mutex<HashMap<String, JwtCacheEntry>>,
    },
    /// Delegate to an externally-configured validator (e.g. checking a user database).
    Basic {
        /// Called with the decoded `user:pass` string.
        validator: CredentialValidator,
    },
    /// Fully custom validator, given the raw `Authorization` header value.
    Custom {
        /// Called with the raw header value.
        validator: CredentialValidator,
    },
}

/// Errors produced by [`AuthProvider::authenticate`].
#[derive(Debug, Clone)]
pub struct AuthenticationFailure {
    /// `WWW-Authenticate` challenge scheme (`"Bearer"`, `"Basic"`, ...).
    pub scheme: String,
    /// Reason, for logs only — never sent to the client.
    pub reason: String,
}

impl AuthProvider {
    /// Authenticate `request`, returning the resolved principal or the challenge to
    /// return as a 401.
    pub async fn authenticate(&self, request: &RequestContext) -> Result<Principal, AuthenticationFailure> {
        match self {
            Self::None => Ok(Principal::anonymous()),
            Self::ApiKey { header_name, query_param, keys } => {
                let key = request
                    .headers
                    .get(header_name)
                    .or_else(|| request.query_params.get(query_param));
                match key.and_then(|k| keys.get(k)) {
                    Some(principal) => Ok(principal.clone()),
                    None => Err(AuthenticationFailure {
                        scheme: "ApiKey".to_string(),
                        reason: "missing or unknown API key".to_string(),
                    }),
                }
            }
            Self::Jwt { decoding_key, validation, cache } => {
                let token = bearer_token(request).ok_or_else(|| AuthenticationFailure {
                    scheme: "Bearer".to_string(),
                    reason: "missing bearer token".to_string(),
                })?;

                {
                    // Mutex poison is unrecoverable.
                    #[allow(clippy::expect_used)]
                    let mut guard = cache.lock().expect("jwt cache poisoned");
                    if let Some(entry) = guard.get(token) {
                        if entry.expires_at > Instant::now() {
                            return Ok(entry.principal.clone());
                        }
                        guard.remove(token);
                    }
                }

                let decoded = decode::<Claims>(token, decoding_key, validation).map_err(|e| AuthenticationFailure {
                    scheme: "Bearer".to_string(),
                    reason: format!("jwt verification failed: {e}"),
                })?;

                let principal = Principal {
                    subject: decoded.claims.sub,
                    roles: decoded.claims.roles.into_iter().collect(),
                    permissions: decoded.claims.permissions.into_iter().collect(),
                    attributes: HashMap::new(),
                };

                let ttl_secs = (decoded.claims.exp - chrono::Utc::now().timestamp()).max(0) as u64;
                // Mutex poison is unrecoverable.
                #[allow(clippy::expect_used)]
                cache.lock().expect("jwt cache poisoned").insert(
                    token.to_string(),
                    JwtCacheEntry { principal: principal.clone(), expires_at: Instant::now() + Duration::from_secs(ttl_secs) },
                );

                Ok(principal)
            }
            Self::Basic { validator } => {
                let credentials = basic_credentials(request).ok_or_else(|| AuthenticationFailure {
                    scheme: "Basic".to_string(),
                    reason: "missing basic credentials".to_string(),
                })?;
                validator(&credentials).await.ok_or_else(|| AuthenticationFailure {
                    scheme: "Basic".to_string(),
                    reason: "credential validation failed".to_string(),
                })
            }
            Self::Custom { validator } => {
                let header = request.headers.get("Authorization").map(String::as_str).unwrap_or_default();
                validator(header).await.ok_or_else(|| AuthenticationFailure {
                    scheme: "Custom".to_string(),
                    reason: "custom validation failed".to_string(),
                })
            }
        }
    }
}

fn bearer_token(request: &RequestContext) -> Option<&str> {
    request.headers.get("Authorization")?.strip_prefix("Bearer ")
}

fn basic_credentials(request: &RequestContext) -> Option<String> {
    use base64::Engine;
    let raw = request.headers.get("Authorization")?.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(raw).ok()?;
    String::from_utf8(decoded).ok()
}

/// RBAC rule effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Grants access if the rule matches.
    Allow,
    /// Denies access if the rule matches.
    Deny,
}

/// How multiple matching rules combine into one decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    /// The highest-priority matching rule decides.
    FirstApplicable,
    /// Any matching `Allow` rule grants access, scanned in priority order.
    PermitOverrides,
    /// Any matching `Deny` rule denies access, scanned in priority order.
    DenyOverrides,
}

/// An authorization rule (spec §4.7 "Authorization").
pub struct Rule {
    /// Allow or deny.
    pub effect: Effect,
    /// HTTP methods this rule applies to; empty means any.
    pub actions: Vec<String>,
    /// Path patterns (`*` wildcard, `prefix/` prefix match, or exact).
    pub resources: Vec<String>,
    /// Roles the principal must hold at least one of; empty means no role requirement.
    pub required_roles: Vec<String>,
    /// Permissions the principal must hold at least one of (honoring `:`-wildcards).
    pub required_permissions: Vec<String>,
    /// Extra predicate evaluated against the principal/request.
    pub condition: Option<Arc<dyn Fn(&Principal, &RequestContext) -> bool + Send + Sync>>,
    /// Higher runs first.
    pub priority: i32,
}

impl Rule {
    fn resource_matches(&self, path: &str) -> bool {
        self.resources.iter().any(|pattern| {
            if pattern == "*" {
                true
            } else if let Some(prefix) = pattern.strip_suffix('*') {
                path.starts_with(prefix)
            } else {
                pattern == path
            }
        })
    }

    fn action_matches(&self, method: &str) -> bool {
        self.actions.is_empty() || self.actions.iter().any(|m| m.eq_ignore_ascii_case(method))
    }

    fn applies(&self, principal: &Principal, request: &RequestContext) -> bool {
        if !self.action_matches(&request.method) || !self.resource_matches(&request.path) {
            return false;
        }
        if !self.required_roles.is_empty() && !self.required_roles.iter().any(|r| principal.roles.contains(r)) {
            return false;
        }
        if !self.required_permissions.is_empty()
            && !self.required_permissions.iter().any(|p| principal.has_permission(p))
        {
            return false;
        }
        if let Some(condition) = &self.condition {
            if !condition(principal, request) {
                return false;
            }
        }
        true
    }
}

/// Evaluates [`Rule`]s against a principal/request (spec §4.7 "Authorization").
pub struct AuthorizationEngine {
    rules: Vec<Rule>,
    combinator: Combinator,
    /// Roles that bypass every rule.
    super_admin_roles: HashSet<String>,
}

impl AuthorizationEngine {
    /// Build an engine over `rules`, sorted by priority descending.
    #[must_use]
    pub fn new(mut rules: Vec<Rule>, combinator: Combinator, super_admin_roles: HashSet<String>) -> Self {
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { rules, combinator, super_admin_roles }
    }

    /// Whether `principal` may perform `request` (spec §4.7 combinators + super-admin
    /// bypass).
    #[must_use]
    pub fn is_authorized(&self, principal: &Principal, request: &RequestContext) -> bool {
        if principal.roles.iter().any(|r| self.super_admin_roles.contains(r)) {
            return true;
        }

        let applicable = self.rules.iter().filter(|rule| rule.applies(principal, request));

        match self.combinator {
            Combinator::FirstApplicable => applicable
                .take(1)
                .next()
                .is_some_and(|rule| rule.effect == Effect::Allow),
            Combinator::PermitOverrides => applicable.into_iter().any(|rule| rule.effect == Effect::Allow),
            Combinator::DenyOverrides => {
                let mut saw_allow = false;
                for rule in applicable {
                    if rule.effect == Effect::Deny {
                        return false;
                    }
                    saw_allow = true;
                }
                saw_allow
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, path: &str) -> RequestContext {
        RequestContext {
            method: method.to_string(),
            path: path.to_string(),
            host: None,
            headers: HashMap::new(),
            query_params: HashMap::new(),
            body: None,
        }
    }

    #[tokio::test]
    async fn api_key_provider_resolves_known_keys() {
        let mut keys = HashMap::new();
        keys.insert("secret-key".to_string(), Principal { subject: "svc-a".to_string(), ..Principal::default() });
        let provider = AuthProvider::ApiKey {
            header_name: "X-API-Key".to_string(),
            query_param: "api_key".to_string(),
            keys,
        };

        let mut req = request("GET", "/orders");
        req.headers.insert("X-API-Key".to_string(), "secret-key".to_string());
        let principal = provider.authenticate(&req).await.unwrap();
        assert_eq!(principal.subject, "svc-a");
    }

    #[tokio::test]
    async fn api_key_provider_rejects_unknown_key() {
        let provider = AuthProvider::ApiKey {
            header_name: "X-API-Key".to_string(),
            query_param: "api_key".to_string(),
            keys: HashMap::new(),
        };
        let mut req = request("GET", "/orders");
        req.headers.insert("X-API-Key".to_string(), "wrong".to_string());
        let err = provider.authenticate(&req).await.unwrap_err();
        assert_eq!(err.scheme, "ApiKey");
    }

    #[test]
    fn wildcard_permission_grants_any_suffix() {
        let mut principal = Principal::anonymous();
        principal.permissions.insert("orders:*".to_string());
        assert!(principal.has_permission("orders:read"));
        assert!(!principal.has_permission("billing:read"));
    }

    #[test]
    fn deny_overrides_blocks_even_with_an_allow_match() {
        let rules = vec![
            Rule {
                effect: Effect::Allow,
                actions: vec![],
                resources: vec!["/orders/*".to_string()],
                required_roles: vec![],
                required_permissions: vec![],
                condition: None,
                priority: 0,
            },
            Rule {
                effect: Effect::Deny,
                actions: vec![],
                resources: vec!["/orders/secret".to_string()],
                required_roles: vec![],
                required_permissions: vec![],
                condition: None,
                priority: 10,
            },
        ];
        let engine = AuthorizationEngine::new(rules, Combinator::DenyOverrides, HashSet::new());
        assert!(!engine.is_authorized(&Principal::anonymous(), &request("GET", "/orders/secret")));
        assert!(engine.is_authorized(&Principal::anonymous(), &request("GET", "/orders/1")));
    }

    #[test]
    fn super_admin_role_bypasses_every_rule() {
        let rules = vec![Rule {
            effect: Effect::Deny,
            actions: vec![],
            resources: vec!["*".to_string()],
            required_roles: vec![],
            required_permissions: vec![],
            condition: None,
            priority: 0,
        }];
        let mut admins = HashSet::new();
        admins.insert("admin".to_string());
        let engine = AuthorizationEngine::new(rules, Combinator::FirstApplicable, admins);

        let mut principal = Principal::anonymous();
        principal.roles.insert("admin".to_string());
        assert!(engine.is_authorized(&principal, &request("DELETE", "/anything")));
    }

    #[test]
    fn first_applicable_honors_priority_order() {
        let rules = vec![
            Rule {
                effect: Effect::Deny,
                actions: vec![],
                resources: vec!["/x".to_string()],
                required_roles: vec![],
                required_permissions: vec![],
                condition: None,
                priority: 0,
            },
            Rule {
                effect: Effect::Allow,
                actions: vec![],
                resources: vec!["/x".to_string()],
                required_roles: vec![],
                required_permissions: vec![],
                condition: None,
                priority: 5,
            },
        ];
        let engine = AuthorizationEngine::new(rules, Combinator::FirstApplicable, HashSet::new());
        assert!(engine.is_authorized(&Principal::anonymous(), &request("GET", "/x")));
    }
}

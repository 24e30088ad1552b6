//! Rate-limit key generation (spec §4.5 `generate_key`).

use crate::route::RequestContext;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Builds the key a [`super::RateLimiter`] checks against, from a composite of client
/// IP, (hashed) user id, API key, and path — or an entirely custom function.
#[derive(Clone)]
pub struct KeyGenerator {
    custom: Option<Arc<dyn Fn(&RequestContext) -> String + Send + Sync>>,
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self { custom: None }
    }
}

impl KeyGenerator {
    /// The default composite key function.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override key generation entirely.
    #[must_use]
    pub fn with_key_function(key_fn: Arc<dyn Fn(&RequestContext) -> String + Send + Sync>) -> Self {
        Self { custom: Some(key_fn) }
    }

    /// Compute the key for `request`.
    #[must_use]
    pub fn generate(&self, request: &RequestContext) -> String {
        match &self.custom {
            Some(f) => f(request),
            None => Self::default_key(request),
        }
    }

    /// `client_ip:hashed_user_id:api_key:path`, omitting any component that has no
    /// source in the request. The user id, when taken from `Authorization`, is hashed
    /// (SHA-256, hex) rather than used verbatim so the rate-limit key and store never
    /// carry raw bearer tokens.
    #[must_use]
    pub fn default_key(request: &RequestContext) -> String {
        let mut parts = Vec::new();

        if let Some(ip) = client_ip(request) {
            parts.push(ip);
        }
        if let Some(auth) = request.headers.get("Authorization") {
            parts.push(hash_hex(auth));
        }
        if let Some(api_key) = request
            .headers
            .get("X-API-Key")
            .or_else(|| request.query_params.get("api_key"))
        {
            parts.push(api_key.clone());
        }
        parts.push(request.path.clone());

        parts.join(":")
    }
}

fn client_ip(request: &RequestContext) -> Option<String> {
    request
        .headers
        .get("X-Forwarded-For")
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
}

fn hash_hex(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn request() -> RequestContext {
        RequestContext {
            method: "GET".to_string(),
            path: "/orders".to_string(),
            host: None,
            headers: HashMap::new(),
            query_params: HashMap::new(),
            body: None,
        }
    }

    #[test]
    fn default_key_includes_forwarded_ip_and_path() {
        let mut req = request();
        req.headers.insert("X-Forwarded-For".to_string(), "203.0.113.7, 10.0.0.1".to_string());
        let key = KeyGenerator::default_key(&req);
        assert!(key.contains("203.0.113.7"));
        assert!(key.contains("/orders"));
    }

    #[test]
    fn authorization_header_is_hashed_not_embedded_verbatim() {
        let mut req = request();
        req.headers.insert("Authorization".to_string(), "Bearer super-secret".to_string());
        let key = KeyGenerator::default_key(&req);
        assert!(!key.contains("super-secret"));
    }

    #[test]
    fn custom_key_function_overrides_default() {
        let generator = KeyGenerator::with_key_function(Arc::new(|_: &RequestContext| "fixed".to_string()));
        assert_eq!(generator.generate(&request()), "fixed");
    }
}

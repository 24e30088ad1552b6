//! Environment-driven gateway configuration.
//!
//! Mirrors the typed, doc-commented config-struct style of the auth config module
//! this crate's `auth.rs` borrows its `AuthProvider` shape from, but sourced from the
//! environment via `dotenvy` + `config` rather than constructed by the caller, since
//! the gateway is a standalone bound service rather than a library consumed by a
//! larger app.

use serde::Deserialize;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors loading [`GatewayConfig`] from the environment.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The underlying `config` crate failed to build or deserialize the layered
    /// sources (env vars, optional `gateway.toml`).
    #[error("failed to load gateway config: {0}")]
    Load(#[from] config::ConfigError),
}

/// Top-level settings for the bound gateway service (`src/bin/server.rs`).
///
/// Loaded from, in increasing precedence order: defaults below, an optional
/// `gateway.toml` in the working directory, then `GATEWAY_`-prefixed environment
/// variables (e.g. `GATEWAY_LISTEN_ADDR`).
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Address the axum server binds to.
    ///
    /// Default: `0.0.0.0:8080`
    pub listen_addr: SocketAddr,

    /// Scheme used to build upstream base URLs (`"http"`/`"https"`).
    ///
    /// Default: `"http"`
    pub upstream_scheme: String,

    /// Log filter passed to `tracing_subscriber::EnvFilter` when `RUST_LOG` isn't set.
    ///
    /// Default: `"platform_gateway=info"`
    pub log_filter: String,
}

impl GatewayConfig {
    /// Load configuration from `.env` (if present), `gateway.toml` (if present), and
    /// `GATEWAY_`-prefixed environment variables, in that increasing precedence order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if a present `gateway.toml` fails to parse or an
    /// environment variable can't be deserialized into its field's type.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let settings = config::Config::builder()
            .set_default("listen_addr", "0.0.0.0:8080")?
            .set_default("upstream_scheme", "http")?
            .set_default("log_filter", "platform_gateway=info")?
            .add_source(config::File::with_name("gateway").required(false))
            .add_source(config::Environment::with_prefix("GATEWAY"))
            .build()?;

        settings.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_with_no_environment_or_file() {
        let settings = config::Config::builder()
            .set_default("listen_addr", "0.0.0.0:8080")
            .unwrap()
            .set_default("upstream_scheme", "http")
            .unwrap()
            .set_default("log_filter", "platform_gateway=info")
            .unwrap()
            .build()
            .unwrap();
        let config: GatewayConfig = settings.try_deserialize().unwrap();
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.upstream_scheme, "http");
    }
}

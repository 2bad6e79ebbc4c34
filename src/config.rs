//! Resolver configuration.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `RESOLVER_MAX_FLAGS`: Maximum flags per resolve request (default: 200)
//! - `RESOLVER_MAX_TARGETING_KEY_LEN`: Maximum targeting key length (default: 100)
//! - `RESOLVER_MAX_MATERIALIZATION_ROUNDS`: Sticky load/retry rounds per resolve (default: 3)
//! - `RESOLVER_TOKEN_SECRET`: HMAC secret for resolve tokens (required in production)

/// Development secret used when `RESOLVER_TOKEN_SECRET` is unset.
pub const DEV_TOKEN_SECRET: &str = "flag-resolver-dev-secret-do-not-use";

/// Limits and secrets for resolution.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Maximum number of flags in one resolve request (default: 200).
    pub max_flags_per_request: usize,
    /// Maximum targeting key length in characters (default: 100).
    pub max_targeting_key_len: usize,
    /// How many times the sticky coordinator loads materializations and
    /// retries before giving up (default: 3).
    pub max_materialization_rounds: usize,
    /// HMAC secret sealing resolve tokens.
    pub token_secret: Vec<u8>,
}

impl ResolverConfig {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        let token_secret = match std::env::var("RESOLVER_TOKEN_SECRET") {
            Ok(secret) => secret.into_bytes(),
            Err(_) => {
                tracing::warn!("RESOLVER_TOKEN_SECRET not set, using development secret");
                DEV_TOKEN_SECRET.as_bytes().to_vec()
            }
        };
        Self {
            max_flags_per_request: std::env::var("RESOLVER_MAX_FLAGS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(200),
            max_targeting_key_len: std::env::var("RESOLVER_MAX_TARGETING_KEY_LEN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
            max_materialization_rounds: std::env::var("RESOLVER_MAX_MATERIALIZATION_ROUNDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            token_secret,
        }
    }

    /// Replace the token secret.
    pub fn with_token_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.token_secret = secret.into();
        self
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_flags_per_request: 200,
            max_targeting_key_len: 100,
            max_materialization_rounds: 3,
            token_secret: DEV_TOKEN_SECRET.as_bytes().to_vec(),
        }
    }
}

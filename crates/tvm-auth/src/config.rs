//! Vending machine configuration.

use serde::Deserialize;

/// Configuration for the vending machine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VendingConfig {
    /// Ceiling on the lifetime of tokens minted via `create_token`
    /// (default: 2_592_000 = 30 days).
    pub max_token_lifetime_secs: u64,
    /// Lifetime of tokens issued by the OAuth exchange
    /// (default: 43_200 = 12 hours).
    pub oauth_token_lifetime_secs: u64,
    /// Upper bound on each store or identity call, in milliseconds
    /// (default: 5000).
    pub store_timeout_ms: u64,
    /// How many fresh secrets to try when a token insert collides
    /// (default: 3).
    pub token_insert_attempts: u32,
}

impl Default for VendingConfig {
    fn default() -> Self {
        Self {
            max_token_lifetime_secs: 2_592_000,
            oauth_token_lifetime_secs: 43_200,
            store_timeout_ms: 5_000,
            token_insert_attempts: 3,
        }
    }
}

/// Where and how to reach the upstream OIDC userinfo endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserInfoConfig {
    pub url: String,
    /// Request timeout in seconds (default: 10).
    pub timeout_secs: u64,
}

impl Default for UserInfoConfig {
    fn default() -> Self {
        Self {
            url: "https://openidconnect.googleapis.com/v1/userinfo".into(),
            timeout_secs: 10,
        }
    }
}

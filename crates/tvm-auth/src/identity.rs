//! Upstream identity resolution.
//!
//! The vending machine only needs one thing from an OAuth provider: the
//! email address behind an access token. [`IdentityProvider`] is that
//! contract; [`HttpUserInfoProvider`] fulfils it against any OIDC-style
//! userinfo endpoint.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use tvm_core::error::TvmResult;

use crate::config::UserInfoConfig;
use crate::error::IdentityError;

pub trait IdentityProvider: Send + Sync {
    /// Resolve an upstream access token to the email it belongs to.
    fn resolve_identity(
        &self,
        provider_access_token: &str,
    ) -> impl Future<Output = TvmResult<String>> + Send;
}

/// The subset of OIDC userinfo claims we read.
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
}

impl UserInfo {
    /// The asserted email. Providers that omit `email_verified` are
    /// trusted; an explicit `false` is not.
    pub fn into_email(self) -> Result<String, IdentityError> {
        if self.email_verified == Some(false) {
            return Err(IdentityError::UnverifiedEmail);
        }
        match self.email {
            Some(email) if !email.trim().is_empty() => Ok(email),
            _ => Err(IdentityError::MissingEmail),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpUserInfoProvider {
    url: String,
    http: reqwest::Client,
}

impl HttpUserInfoProvider {
    pub fn new(config: &UserInfoConfig) -> Result<Self, IdentityError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            url: config.url.clone(),
            http,
        })
    }

    async fn fetch(&self, provider_access_token: &str) -> Result<String, IdentityError> {
        let response = self
            .http
            .get(&self.url)
            .bearer_auth(provider_access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "Userinfo request rejected");
            return Err(IdentityError::Rejected {
                status: status.as_u16(),
            });
        }

        response.json::<UserInfo>().await?.into_email()
    }
}

impl IdentityProvider for HttpUserInfoProvider {
    async fn resolve_identity(&self, provider_access_token: &str) -> TvmResult<String> {
        Ok(self.fetch(provider_access_token).await?)
    }
}

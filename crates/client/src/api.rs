//! Session endpoints of the ERP API.

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use procura_auth::{Credentials, TokenPair, UserProfile};
use procura_core::TenantId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("unauthorized ({0})")]
    Unauthorized(u16),
    #[error("API error ({0}): {1}")]
    Status(u16, String),
    #[error("network error: {0}")]
    Network(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// The three calls the session synchronizer needs from the server.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<TokenPair, ApiError>;

    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, ApiError>;

    /// Persist `tenant_id` as the user's default business unit.
    async fn switch_business_unit(
        &self,
        access_token: &str,
        tenant_id: &TenantId,
    ) -> Result<(), ApiError>;
}

/// `reqwest`-backed implementation.
#[derive(Debug, Clone)]
pub struct HttpAuthApi {
    api_url: String,
    client: reqwest::Client,
}

impl HttpAuthApi {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(ApiError::Unauthorized(status.as_u16()));
    }
    Err(ApiError::Status(
        status.as_u16(),
        resp.text().await.unwrap_or_default(),
    ))
}

fn network(err: reqwest::Error) -> ApiError {
    ApiError::Network(err.to_string())
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, credentials: &Credentials) -> Result<TokenPair, ApiError> {
        let resp = self
            .client
            .post(self.url("/api/auth/login"))
            .json(credentials)
            .send()
            .await
            .map_err(network)?;

        check(resp)
            .await?
            .json::<TokenPair>()
            .await
            .map_err(|e| ApiError::Parse(format!("failed to parse login response: {e}")))
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, ApiError> {
        let resp = self
            .client
            .get(self.url("/api/user/profile"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(network)?;

        check(resp)
            .await?
            .json::<UserProfile>()
            .await
            .map_err(|e| ApiError::Parse(format!("failed to parse user profile: {e}")))
    }

    async fn switch_business_unit(
        &self,
        access_token: &str,
        tenant_id: &TenantId,
    ) -> Result<(), ApiError> {
        let resp = self
            .client
            .post(self.url("/api/user/business-unit"))
            .bearer_auth(access_token)
            .json(&json!({ "tenant_id": tenant_id }))
            .send()
            .await
            .map_err(network)?;

        check(resp).await?;
        Ok(())
    }
}

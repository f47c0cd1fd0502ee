use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procura_core::{BuCode, DomainError, TenantId, UserId};

use crate::{BusinessUnit, SessionError};

/// Credentials submitted on the sign-in form.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if !self.email.contains('@') {
            return Err(DomainError::validation("email must contain '@'"));
        }
        if self.password.is_empty() {
            return Err(DomainError::validation("password must not be empty"));
        }
        Ok(())
    }
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Access/refresh token pair issued by the login endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl core::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenPair").finish_non_exhaustive()
    }
}

/// User profile as returned by the profile endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "business_unit")]
    pub business_units: Vec<BusinessUnit>,
}

impl UserProfile {
    pub fn find_business_unit(&self, tenant_id: &TenantId) -> Option<&BusinessUnit> {
        self.business_units.iter().find(|bu| &bu.id == tenant_id)
    }

    /// Pick the unit a fresh session starts in.
    ///
    /// A still-valid `preferred` tenant wins, then the unit flagged default,
    /// then the first unit.
    pub fn resolve_business_unit(&self, preferred: Option<&TenantId>) -> Option<&BusinessUnit> {
        preferred
            .and_then(|id| self.find_business_unit(id))
            .or_else(|| self.business_units.iter().find(|bu| bu.is_default))
            .or_else(|| self.business_units.first())
    }
}

/// An authenticated session bound to one business unit.
///
/// # Invariants
/// - `tenant_id` and `bu_code` name the same entry of `user.business_units`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    tokens: TokenPair,
    tenant_id: TenantId,
    bu_code: BuCode,
    user: UserProfile,
    established_at: DateTime<Utc>,
}

impl Session {
    pub fn establish(
        tokens: TokenPair,
        user: UserProfile,
        preferred: Option<&TenantId>,
        established_at: DateTime<Utc>,
    ) -> Result<Self, SessionError> {
        let unit = user
            .resolve_business_unit(preferred)
            .ok_or_else(|| SessionError::ProfileFetchFailure("user has no business units".into()))?;

        let tenant_id = unit.id.clone();
        let bu_code = unit.code.clone();

        Ok(Self {
            tokens,
            tenant_id,
            bu_code,
            user,
            established_at,
        })
    }

    pub fn tokens(&self) -> &TokenPair {
        &self.tokens
    }

    pub fn access_token(&self) -> &str {
        &self.tokens.access_token
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn bu_code(&self) -> &BuCode {
        &self.bu_code
    }

    pub fn user(&self) -> &UserProfile {
        &self.user
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    pub fn active_business_unit(&self) -> Option<&BusinessUnit> {
        self.user.find_business_unit(&self.tenant_id)
    }

    /// Look up `tenant_id` among this user's units.
    pub fn business_unit(&self, tenant_id: &TenantId) -> Result<&BusinessUnit, SessionError> {
        self.user
            .find_business_unit(tenant_id)
            .ok_or_else(|| SessionError::TenantNotFound(tenant_id.clone()))
    }

    pub(crate) fn set_tokens(&mut self, tokens: TokenPair) {
        self.tokens = tokens;
    }

    /// Callers validate the pair with [`Session::business_unit`] first.
    pub(crate) fn set_active_unit(&mut self, tenant_id: TenantId, bu_code: BuCode) {
        self.tenant_id = tenant_id;
        self.bu_code = bu_code;
    }
}

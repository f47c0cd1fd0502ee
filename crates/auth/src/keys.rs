/// Keys of the persisted store that make up a session.
///
/// Every tab reads and writes these exact names; changing one breaks
/// interoperability with tabs running an older build.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SessionKey {
    AccessToken,
    RefreshToken,
    TenantId,
    BuCode,
    User,
}

impl SessionKey {
    pub const ALL: [SessionKey; 5] = [
        SessionKey::AccessToken,
        SessionKey::RefreshToken,
        SessionKey::TenantId,
        SessionKey::BuCode,
        SessionKey::User,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKey::AccessToken => "access_token",
            SessionKey::RefreshToken => "refresh_token",
            SessionKey::TenantId => "tenant_id",
            SessionKey::BuCode => "bu_code",
            SessionKey::User => "user",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == key)
    }
}

impl core::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

use thiserror::Error;

use procura_core::TenantId;

use crate::SessionPhase;

/// Failures of session operations.
///
/// `AuthFailure`, `TenantNotFound` and `TenantSwitchRejected` are meant for the
/// initiating UI action. `ProfileFetchFailure` during silent hydration is
/// swallowed by the synchronizer. Cross-tab conflicts never surface: the last
/// write to the persisted store wins.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// The auth service could not be reached or answered garbage.
    #[error("auth service unavailable: {0}")]
    Unavailable(String),

    #[error("failed to fetch user profile: {0}")]
    ProfileFetchFailure(String),

    #[error("tenant not found: {0}")]
    TenantNotFound(TenantId),

    #[error("tenant switch rejected: {0}")]
    TenantSwitchRejected(String),

    #[error("a tenant switch is already in progress")]
    SwitchInProgress,

    #[error("no active session")]
    NotAuthenticated,

    #[error("cannot {command} while {phase}")]
    InvalidTransition {
        phase: SessionPhase,
        command: &'static str,
    },

    /// A response for a session that has since ended.
    #[error("stale response (issued in epoch {issued}, current epoch {current})")]
    Stale { issued: u64, current: u64 },

    #[error("storage error: {0}")]
    Storage(String),
}

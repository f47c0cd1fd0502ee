//! Session state machine (pure).
//!
//! ```text
//! Unauthenticated ──BeginHydration──▶ Hydrating ──CompleteHydration──▶ Authenticated
//!        ▲                                │                                  │  ▲
//!        │                          FailHydration              BeginTenantSwitch  Confirm/Abort
//!        │                                ▼                                  ▼  │
//!        └────────────── Logout ◀── (any state) ──────────────────── SwitchingTenant
//! ```
//!
//! Results of asynchronous work (profile fetch, tenant switch) carry the
//! `epoch` observed when the work started. The epoch advances every time the
//! machine falls back to `Unauthenticated`, so a response that belongs to an
//! ended session is rejected with [`SessionError::Stale`].

use chrono::{DateTime, Utc};

use procura_core::{Aggregate, AggregateRoot, BuCode, TabId, TenantId};

use crate::{Session, SessionError, TokenPair, UserProfile};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    Unauthenticated,
    Hydrating,
    Authenticated,
    SwitchingTenant,
}

impl core::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SessionPhase::Unauthenticated => write!(f, "Unauthenticated"),
            SessionPhase::Hydrating => write!(f, "Hydrating"),
            SessionPhase::Authenticated => write!(f, "Authenticated"),
            SessionPhase::SwitchingTenant => write!(f, "SwitchingTenant"),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogoutCause {
    /// The user asked for it in this tab.
    Explicit,
    /// Another tab removed the access token from the shared store.
    RemovedElsewhere,
}

#[derive(Debug, Clone)]
pub enum SessionCommand {
    BeginHydration,
    CompleteHydration {
        epoch: u64,
        tokens: TokenPair,
        user: UserProfile,
        stored_tenant: Option<TenantId>,
        at: DateTime<Utc>,
    },
    FailHydration {
        epoch: u64,
        reason: String,
    },
    /// Fresh tokens from a login (this tab or another).
    Establish {
        epoch: u64,
        tokens: TokenPair,
        user: UserProfile,
        stored_tenant: Option<TenantId>,
        at: DateTime<Utc>,
    },
    RefreshTokens {
        tokens: TokenPair,
    },
    BeginTenantSwitch {
        tenant_id: TenantId,
    },
    ConfirmTenantSwitch {
        epoch: u64,
        tenant_id: TenantId,
    },
    AbortTenantSwitch {
        epoch: u64,
        reason: String,
    },
    /// Another tab persisted a different tenant.
    AdoptTenant {
        tenant_id: TenantId,
    },
    Logout {
        cause: LogoutCause,
    },
}

impl SessionCommand {
    fn name(&self) -> &'static str {
        match self {
            SessionCommand::BeginHydration => "begin hydration",
            SessionCommand::CompleteHydration { .. } => "complete hydration",
            SessionCommand::FailHydration { .. } => "fail hydration",
            SessionCommand::Establish { .. } => "establish session",
            SessionCommand::RefreshTokens { .. } => "refresh tokens",
            SessionCommand::BeginTenantSwitch { .. } => "begin tenant switch",
            SessionCommand::ConfirmTenantSwitch { .. } => "confirm tenant switch",
            SessionCommand::AbortTenantSwitch { .. } => "abort tenant switch",
            SessionCommand::AdoptTenant { .. } => "adopt tenant",
            SessionCommand::Logout { .. } => "logout",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    HydrationStarted,
    SessionEstablished { session: Session },
    HydrationFailed { reason: String },
    TokensRefreshed { tokens: TokenPair },
    TenantSwitchRequested { tenant_id: TenantId },
    TenantSwitched { tenant_id: TenantId, bu_code: BuCode },
    TenantSwitchAborted { reason: String },
    TenantAdopted { tenant_id: TenantId, bu_code: BuCode },
    LoggedOut { cause: LogoutCause },
}

/// Read-only snapshot handed to the rest of the application.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub phase: SessionPhase,
    pub session: Option<Session>,
    pub switch_target: Option<TenantId>,
}

impl SessionView {
    pub fn is_authenticated(&self) -> bool {
        matches!(self.phase, SessionPhase::Authenticated | SessionPhase::SwitchingTenant)
    }

    pub fn tenant_id(&self) -> Option<&TenantId> {
        self.session.as_ref().map(Session::tenant_id)
    }

    pub fn bu_code(&self) -> Option<&BuCode> {
        self.session.as_ref().map(Session::bu_code)
    }
}

/// Session state of one tab.
///
/// # Invariants
/// - `session.is_some()` iff the phase is `Authenticated` or `SwitchingTenant`.
/// - `switch_target.is_some()` iff the phase is `SwitchingTenant`.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    tab: TabId,
    phase: SessionPhase,
    session: Option<Session>,
    switch_target: Option<TenantId>,
    epoch: u64,
    version: u64,
}

impl SessionMachine {
    pub fn new(tab: TabId) -> Self {
        Self {
            tab,
            phase: SessionPhase::Unauthenticated,
            session: None,
            switch_target: None,
            epoch: 0,
            version: 0,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn switch_target(&self) -> Option<&TenantId> {
        self.switch_target.as_ref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            phase: self.phase,
            session: self.session.clone(),
            switch_target: self.switch_target.clone(),
        }
    }

    fn check_epoch(&self, issued: u64) -> Result<(), SessionError> {
        if issued == self.epoch {
            Ok(())
        } else {
            Err(SessionError::Stale {
                issued,
                current: self.epoch,
            })
        }
    }

    fn invalid(&self, command: &SessionCommand) -> SessionError {
        SessionError::InvalidTransition {
            phase: self.phase,
            command: command.name(),
        }
    }

    fn active(&self) -> Result<&Session, SessionError> {
        self.session.as_ref().ok_or(SessionError::NotAuthenticated)
    }
}

impl AggregateRoot for SessionMachine {
    type Id = TabId;

    fn id(&self) -> &Self::Id {
        &self.tab
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for SessionMachine {
    type Command = SessionCommand;
    type Event = SessionEvent;
    type Error = SessionError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SessionEvent::HydrationStarted => {
                self.phase = SessionPhase::Hydrating;
            }
            SessionEvent::SessionEstablished { session } => {
                self.session = Some(session.clone());
                self.switch_target = None;
                self.phase = SessionPhase::Authenticated;
            }
            SessionEvent::HydrationFailed { .. } | SessionEvent::LoggedOut { .. } => {
                self.session = None;
                self.switch_target = None;
                self.phase = SessionPhase::Unauthenticated;
                self.epoch += 1;
            }
            SessionEvent::TokensRefreshed { tokens } => {
                if let Some(session) = self.session.as_mut() {
                    session.set_tokens(tokens.clone());
                }
            }
            SessionEvent::TenantSwitchRequested { tenant_id } => {
                self.switch_target = Some(tenant_id.clone());
                self.phase = SessionPhase::SwitchingTenant;
            }
            SessionEvent::TenantSwitched { tenant_id, bu_code } => {
                if let Some(session) = self.session.as_mut() {
                    session.set_active_unit(tenant_id.clone(), bu_code.clone());
                }
                self.switch_target = None;
                self.phase = SessionPhase::Authenticated;
            }
            SessionEvent::TenantSwitchAborted { .. } => {
                self.switch_target = None;
                self.phase = SessionPhase::Authenticated;
            }
            SessionEvent::TenantAdopted { tenant_id, bu_code } => {
                if let Some(session) = self.session.as_mut() {
                    session.set_active_unit(tenant_id.clone(), bu_code.clone());
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SessionCommand::BeginHydration => match self.phase {
                SessionPhase::Unauthenticated => Ok(vec![SessionEvent::HydrationStarted]),
                _ => Err(self.invalid(command)),
            },

            SessionCommand::CompleteHydration {
                epoch,
                tokens,
                user,
                stored_tenant,
                at,
            } => {
                self.check_epoch(*epoch)?;
                if self.phase != SessionPhase::Hydrating {
                    return Err(self.invalid(command));
                }
                let session =
                    Session::establish(tokens.clone(), user.clone(), stored_tenant.as_ref(), *at)?;
                Ok(vec![SessionEvent::SessionEstablished { session }])
            }

            SessionCommand::FailHydration { epoch, reason } => {
                self.check_epoch(*epoch)?;
                match self.phase {
                    SessionPhase::Hydrating => Ok(vec![SessionEvent::HydrationFailed {
                        reason: reason.clone(),
                    }]),
                    _ => Err(self.invalid(command)),
                }
            }

            SessionCommand::Establish {
                epoch,
                tokens,
                user,
                stored_tenant,
                at,
            } => {
                self.check_epoch(*epoch)?;
                if self.phase == SessionPhase::SwitchingTenant {
                    return Err(SessionError::SwitchInProgress);
                }
                let session =
                    Session::establish(tokens.clone(), user.clone(), stored_tenant.as_ref(), *at)?;
                Ok(vec![SessionEvent::SessionEstablished { session }])
            }

            SessionCommand::RefreshTokens { tokens } => {
                self.active()?;
                Ok(vec![SessionEvent::TokensRefreshed {
                    tokens: tokens.clone(),
                }])
            }

            SessionCommand::BeginTenantSwitch { tenant_id } => match self.phase {
                SessionPhase::Authenticated => {
                    self.active()?.business_unit(tenant_id)?;
                    Ok(vec![SessionEvent::TenantSwitchRequested {
                        tenant_id: tenant_id.clone(),
                    }])
                }
                SessionPhase::SwitchingTenant => Err(SessionError::SwitchInProgress),
                SessionPhase::Unauthenticated | SessionPhase::Hydrating => {
                    Err(SessionError::NotAuthenticated)
                }
            },

            SessionCommand::ConfirmTenantSwitch { epoch, tenant_id } => {
                self.check_epoch(*epoch)?;
                if self.phase != SessionPhase::SwitchingTenant
                    || self.switch_target.as_ref() != Some(tenant_id)
                {
                    return Err(self.invalid(command));
                }
                let unit = self.active()?.business_unit(tenant_id)?;
                Ok(vec![SessionEvent::TenantSwitched {
                    tenant_id: unit.id.clone(),
                    bu_code: unit.code.clone(),
                }])
            }

            SessionCommand::AbortTenantSwitch { epoch, reason } => {
                self.check_epoch(*epoch)?;
                match self.phase {
                    SessionPhase::SwitchingTenant => Ok(vec![SessionEvent::TenantSwitchAborted {
                        reason: reason.clone(),
                    }]),
                    _ => Err(self.invalid(command)),
                }
            }

            SessionCommand::AdoptTenant { tenant_id } => match self.phase {
                SessionPhase::Authenticated => {
                    let session = self.active()?;
                    if session.tenant_id() == tenant_id {
                        return Ok(vec![]);
                    }
                    let unit = session.business_unit(tenant_id)?;
                    Ok(vec![SessionEvent::TenantAdopted {
                        tenant_id: unit.id.clone(),
                        bu_code: unit.code.clone(),
                    }])
                }
                // Our own pending switch will be written after the other tab's.
                SessionPhase::SwitchingTenant => Ok(vec![]),
                SessionPhase::Unauthenticated | SessionPhase::Hydrating => {
                    Err(SessionError::NotAuthenticated)
                }
            },

            SessionCommand::Logout { cause } => match self.phase {
                SessionPhase::Unauthenticated => Ok(vec![]),
                _ => Ok(vec![SessionEvent::LoggedOut { cause: *cause }]),
            },
        }
    }
}

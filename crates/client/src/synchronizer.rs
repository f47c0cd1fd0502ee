//! Session synchronizer: the effectful boundary around [`SessionMachine`].
//!
//! Every operation follows the same shape:
//! 1. ask the machine for a transition (pure, under the lock),
//! 2. release the lock for any network call,
//! 3. hand the result back to the machine tagged with the epoch observed in
//!    step 1 (stale results are dropped),
//! 4. apply effects: store writes, cache clears, navigation.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{Mutex, watch};

use procura_auth::{
    Credentials, LogoutCause, SessionCommand, SessionError, SessionEvent, SessionKey,
    SessionMachine, SessionPhase, SessionView, TokenPair,
};
use procura_core::{Aggregate, TenantId};
use procura_events::StorageChange;
use procura_infra::{StorageError, TabStorage};

use crate::api::{ApiError, AuthApi};
use crate::config::SyncSettings;
use crate::navigator::Navigator;
use crate::query_cache::QueryCache;

/// What a dispatched command left behind.
struct Outcome {
    events: Vec<SessionEvent>,
    epoch: u64,
    view: SessionView,
}

fn storage(err: StorageError) -> SessionError {
    SessionError::Storage(err.to_string())
}

/// Owns one tab's session and keeps it consistent with the shared store.
pub struct SessionSynchronizer {
    storage: TabStorage,
    api: Arc<dyn AuthApi>,
    navigator: Arc<dyn Navigator>,
    cache: QueryCache,
    machine: Mutex<SessionMachine>,
    view_tx: watch::Sender<SessionView>,
    logging_out: AtomicBool,
    last_logout: StdMutex<Option<Instant>>,
    cooldown: Duration,
    sign_in_path: String,
}

impl SessionSynchronizer {
    pub fn new(
        storage: TabStorage,
        api: Arc<dyn AuthApi>,
        navigator: Arc<dyn Navigator>,
        settings: SyncSettings,
    ) -> Self {
        let machine = SessionMachine::new(storage.tab());
        let (view_tx, _) = watch::channel(machine.view());

        Self {
            storage,
            api,
            navigator,
            cache: QueryCache::new(),
            machine: Mutex::new(machine),
            view_tx,
            logging_out: AtomicBool::new(false),
            last_logout: StdMutex::new(None),
            cooldown: settings.reentrancy_cooldown,
            sign_in_path: settings.sign_in_path,
        }
    }

    pub fn storage(&self) -> &TabStorage {
        &self.storage
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Current read-only snapshot.
    pub fn view(&self) -> SessionView {
        self.view_tx.borrow().clone()
    }

    /// Receiver that observes every snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view_tx.subscribe()
    }

    async fn dispatch(&self, command: SessionCommand) -> Result<Outcome, SessionError> {
        let mut machine = self.machine.lock().await;
        let from = machine.phase();
        let events = machine.execute(&command)?;
        let view = machine.view();

        if !events.is_empty() {
            tracing::info!(
                tab = %self.storage.tab(),
                from = %from,
                to = %view.phase,
                events = events.len(),
                "session transition"
            );
            self.view_tx.send_replace(view.clone());
        }

        Ok(Outcome {
            events,
            epoch: machine.epoch(),
            view,
        })
    }

    async fn current_epoch(&self) -> u64 {
        self.machine.lock().await.epoch()
    }

    async fn stored_tenant(&self) -> Option<TenantId> {
        match self.storage.get(SessionKey::TenantId.as_str()).await {
            Ok(Some(raw)) => TenantId::parse(raw).ok(),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!("failed to read stored tenant: {err}");
                None
            }
        }
    }

    async fn stored_tokens(&self) -> Result<Option<TokenPair>, StorageError> {
        let Some(access) = self.storage.get(SessionKey::AccessToken.as_str()).await? else {
            return Ok(None);
        };
        let refresh = self
            .storage
            .get(SessionKey::RefreshToken.as_str())
            .await?
            .unwrap_or_default();
        Ok(Some(TokenPair::new(access, refresh)))
    }

    async fn persist_tokens(&self, tokens: &TokenPair) -> Result<(), SessionError> {
        self.storage
            .set(SessionKey::AccessToken.as_str(), &tokens.access_token)
            .await
            .map_err(storage)?;
        self.storage
            .set(SessionKey::RefreshToken.as_str(), &tokens.refresh_token)
            .await
            .map_err(storage)
    }

    async fn persist_active_unit(&self, view: &SessionView) -> Result<(), SessionError> {
        let session = view.session.as_ref().ok_or(SessionError::NotAuthenticated)?;
        self.storage
            .set(SessionKey::TenantId.as_str(), session.tenant_id().as_str())
            .await
            .map_err(storage)?;
        self.storage
            .set(SessionKey::BuCode.as_str(), session.bu_code().as_str())
            .await
            .map_err(storage)
    }

    async fn persist_session(&self, view: &SessionView) -> Result<(), SessionError> {
        self.persist_active_unit(view).await?;

        let session = view.session.as_ref().ok_or(SessionError::NotAuthenticated)?;
        let user = serde_json::to_string(session.user())
            .map_err(|e| SessionError::Storage(format!("failed to encode user: {e}")))?;
        self.storage
            .set(SessionKey::User.as_str(), &user)
            .await
            .map_err(storage)
    }

    /// Read the persisted session and, if there is one, validate it against
    /// the server.
    ///
    /// Never fails: a missing token or a failed profile fetch leaves the tab
    /// `Unauthenticated` and sends it to sign-in.
    pub async fn hydrate(&self) -> SessionView {
        let epoch = match self.dispatch(SessionCommand::BeginHydration).await {
            Ok(outcome) => outcome.epoch,
            Err(err) => {
                tracing::debug!("hydration skipped: {err}");
                return self.view();
            }
        };

        let tokens = match self.stored_tokens().await {
            Ok(Some(tokens)) => tokens,
            Ok(None) => {
                self.fail_hydration(epoch, "no persisted access token").await;
                return self.view();
            }
            Err(err) => {
                self.fail_hydration(epoch, &err.to_string()).await;
                return self.view();
            }
        };

        let stored_tenant = self.stored_tenant().await;

        let user = match self.api.fetch_profile(&tokens.access_token).await {
            Ok(user) => user,
            Err(err) => {
                tracing::warn!("profile fetch failed during hydration: {err}");
                self.fail_hydration(epoch, &err.to_string()).await;
                return self.view();
            }
        };

        let completed = self
            .dispatch(SessionCommand::CompleteHydration {
                epoch,
                tokens,
                user,
                stored_tenant,
                at: Utc::now(),
            })
            .await;

        match completed {
            Ok(outcome) => {
                if let Err(err) = self.persist_session(&outcome.view).await {
                    tracing::error!("failed to persist hydrated session: {err}");
                }
            }
            Err(err @ SessionError::Stale { .. }) => {
                tracing::warn!("discarding profile response: {err}");
            }
            Err(err) => {
                tracing::warn!("hydration rejected: {err}");
                self.fail_hydration(epoch, &err.to_string()).await;
            }
        }

        self.view()
    }

    async fn fail_hydration(&self, epoch: u64, reason: &str) {
        let failed = self
            .dispatch(SessionCommand::FailHydration {
                epoch,
                reason: reason.to_string(),
            })
            .await;

        match failed {
            Ok(_) => self.navigator.redirect_to_sign_in(&self.sign_in_path),
            Err(err) => tracing::debug!("hydration already settled: {err}"),
        }
    }

    /// Sign in with credentials, then establish the session.
    pub async fn login(&self, credentials: &Credentials) -> Result<(), SessionError> {
        credentials
            .validate()
            .map_err(|e| SessionError::AuthFailure(e.to_string()))?;

        let tokens = self.api.login(credentials).await.map_err(|err| match err {
            ApiError::Unauthorized(_) => SessionError::AuthFailure("invalid credentials".into()),
            ApiError::Status(code, body) if (400..500).contains(&code) => {
                SessionError::AuthFailure(format!("rejected ({code}): {body}"))
            }
            other => SessionError::Unavailable(other.to_string()),
        })?;

        self.set_session(&tokens.access_token, &tokens.refresh_token).await
    }

    /// Persist a fresh token pair and establish the session once the profile
    /// is known.
    pub async fn set_session(&self, access_token: &str, refresh_token: &str) -> Result<(), SessionError> {
        let tokens = TokenPair::new(access_token, refresh_token);

        // From Unauthenticated, hold Hydrating until the profile arrives so a
        // logout in the meantime advances the epoch.
        let (epoch, entered) = match self.dispatch(SessionCommand::BeginHydration).await {
            Ok(outcome) => (outcome.epoch, true),
            Err(_) => (self.current_epoch().await, false),
        };

        if let Err(err) = self.persist_tokens(&tokens).await {
            self.abandon_establish(epoch, entered, &err.to_string()).await;
            return Err(err);
        }

        let current = self.current_epoch().await;
        if current != epoch {
            self.discard_tokens(&tokens).await;
            return Err(SessionError::Stale {
                issued: epoch,
                current,
            });
        }

        let user = match self.api.fetch_profile(&tokens.access_token).await {
            Ok(user) => user,
            Err(err) => {
                self.abandon_establish(epoch, entered, &err.to_string()).await;
                return Err(SessionError::ProfileFetchFailure(err.to_string()));
            }
        };

        let stored_tenant = self.stored_tenant().await;
        let established = self
            .dispatch(SessionCommand::Establish {
                epoch,
                tokens,
                user,
                stored_tenant,
                at: Utc::now(),
            })
            .await;

        let outcome = match established {
            Ok(outcome) => outcome,
            Err(err @ SessionError::Stale { .. }) => {
                tracing::warn!("discarding profile response: {err}");
                return Err(err);
            }
            Err(err) => {
                self.abandon_establish(epoch, entered, &err.to_string()).await;
                return Err(err);
            }
        };

        self.persist_session(&outcome.view).await
    }

    /// Leave the Hydrating phase `set_session` entered.
    async fn abandon_establish(&self, epoch: u64, entered: bool, reason: &str) {
        if !entered {
            return;
        }
        if let Err(err) = self
            .dispatch(SessionCommand::FailHydration {
                epoch,
                reason: reason.to_string(),
            })
            .await
        {
            tracing::debug!("establish already settled: {err}");
        }
    }

    /// Remove tokens written after a logout cleared the store, unless
    /// someone has replaced them since.
    async fn discard_tokens(&self, tokens: &TokenPair) {
        let pairs = [
            (SessionKey::AccessToken, &tokens.access_token),
            (SessionKey::RefreshToken, &tokens.refresh_token),
        ];
        for (key, ours) in pairs {
            match self.storage.get(key.as_str()).await {
                Ok(Some(value)) if &value == ours => {
                    if let Err(err) = self.storage.remove(key.as_str()).await {
                        tracing::error!(key = %key, "failed to discard stale token: {err}");
                    }
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(key = %key, "failed to read token: {err}"),
            }
        }
    }

    /// Replace the token pair of the active session.
    pub async fn refresh_tokens(&self, access_token: &str, refresh_token: &str) -> Result<(), SessionError> {
        let tokens = TokenPair::new(access_token, refresh_token);
        self.dispatch(SessionCommand::RefreshTokens {
            tokens: tokens.clone(),
        })
        .await?;
        self.persist_tokens(&tokens).await
    }

    /// End the session in this tab and in the shared store.
    pub async fn logout(&self) -> Result<(), SessionError> {
        self.end_session(LogoutCause::Explicit).await
    }

    async fn end_session(&self, cause: LogoutCause) -> Result<(), SessionError> {
        if self.logging_out.swap(true, Ordering::SeqCst) {
            tracing::debug!("logout already in progress");
            return Ok(());
        }

        let result = self.end_session_inner(cause).await;

        if let Ok(mut last) = self.last_logout.lock() {
            *last = Some(Instant::now());
        }
        self.logging_out.store(false, Ordering::SeqCst);

        result
    }

    async fn end_session_inner(&self, cause: LogoutCause) -> Result<(), SessionError> {
        let outcome = self.dispatch(SessionCommand::Logout { cause }).await?;
        self.cache.clear_all();

        // Another tab already cleared the store; writing here would only echo
        // its removals back.
        let mut first_error = None;
        if cause == LogoutCause::Explicit {
            for key in SessionKey::ALL {
                if let Err(err) = self.storage.remove(key.as_str()).await {
                    tracing::error!(key = %key, "failed to clear session key: {err}");
                    first_error.get_or_insert(storage(err));
                }
            }
        }

        if cause == LogoutCause::Explicit || !outcome.events.is_empty() {
            self.navigator.redirect_to_sign_in(&self.sign_in_path);
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Make `tenant_id` the active business unit, here and on the server.
    pub async fn change_tenant(&self, tenant_id: &TenantId) -> Result<(), SessionError> {
        let started = self
            .dispatch(SessionCommand::BeginTenantSwitch {
                tenant_id: tenant_id.clone(),
            })
            .await?;

        let epoch = started.epoch;
        let Some(session) = started.view.session else {
            return Err(SessionError::NotAuthenticated);
        };
        let previous = session.tenant_id().clone();

        if let Err(err) = self
            .api
            .switch_business_unit(session.access_token(), tenant_id)
            .await
        {
            tracing::warn!(tenant = %tenant_id, "tenant switch rejected: {err}");
            if let Err(abort) = self
                .dispatch(SessionCommand::AbortTenantSwitch {
                    epoch,
                    reason: err.to_string(),
                })
                .await
            {
                tracing::debug!("switch abort not applied: {abort}");
            }
            return Err(SessionError::TenantSwitchRejected(err.to_string()));
        }

        let confirmed = self
            .dispatch(SessionCommand::ConfirmTenantSwitch {
                epoch,
                tenant_id: tenant_id.clone(),
            })
            .await
            .inspect_err(|err| tracing::warn!("discarding switch confirmation: {err}"))?;

        self.persist_active_unit(&confirmed.view).await?;
        if &previous != tenant_id {
            self.cache.clear_tenant(&previous);
        }
        self.navigator.reload();
        Ok(())
    }

    fn in_cooldown(&self) -> bool {
        if self.logging_out.load(Ordering::SeqCst) {
            return true;
        }
        match self.last_logout.lock() {
            Ok(last) => last.is_some_and(|at| at.elapsed() < self.cooldown),
            Err(_) => false,
        }
    }

    /// React to a write another tab made to the shared store.
    pub async fn handle_storage_change(&self, change: StorageChange) {
        if change.is_from(self.storage.tab()) {
            return;
        }
        if self.in_cooldown() {
            tracing::debug!(key = change.key(), "ignoring storage change during logout cooldown");
            return;
        }

        match SessionKey::from_key(change.key()) {
            Some(SessionKey::AccessToken) if change.is_removal() => {
                tracing::info!(origin = %change.origin(), "access token removed by another tab");
                if let Err(err) = self.end_session(LogoutCause::RemovedElsewhere).await {
                    tracing::warn!("cross-tab logout failed: {err}");
                }
            }
            Some(SessionKey::AccessToken | SessionKey::RefreshToken) => match self.view().phase {
                SessionPhase::Unauthenticated if change.key() == SessionKey::AccessToken.as_str() => {
                    tracing::info!(origin = %change.origin(), "session started in another tab");
                    self.hydrate().await;
                }
                SessionPhase::Authenticated | SessionPhase::SwitchingTenant => {
                    self.adopt_tokens().await;
                }
                _ => {}
            },
            Some(SessionKey::TenantId) => {
                let Some(raw) = change.new_value() else {
                    return;
                };
                let Ok(tenant_id) = TenantId::parse(raw) else {
                    tracing::warn!("ignoring malformed tenant id from another tab");
                    return;
                };
                self.adopt_tenant(tenant_id).await;
            }
            _ => {}
        }
    }

    /// Take over a token pair another tab stored. Nothing is written back.
    async fn adopt_tokens(&self) {
        let stored = match self.stored_tokens().await {
            Ok(Some(tokens)) => tokens,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!("failed to read tokens written by another tab: {err}");
                return;
            }
        };

        let current = self.view().session.map(|s| s.tokens().clone());
        if current.as_ref() == Some(&stored) {
            return;
        }

        match self
            .dispatch(SessionCommand::RefreshTokens { tokens: stored })
            .await
        {
            Ok(_) => tracing::info!("adopted tokens refreshed by another tab"),
            Err(err) => tracing::debug!("token change from another tab ignored: {err}"),
        }
    }

    async fn adopt_tenant(&self, tenant_id: TenantId) {
        let previous = self.view().tenant_id().cloned();

        match self
            .dispatch(SessionCommand::AdoptTenant {
                tenant_id: tenant_id.clone(),
            })
            .await
        {
            Ok(outcome) if outcome.events.is_empty() => {}
            Ok(_) => {
                tracing::info!(tenant = %tenant_id, "adopted tenant from another tab");
                if let Some(previous) = previous {
                    self.cache.clear_tenant(&previous);
                }
                self.navigator.reload();
            }
            Err(SessionError::TenantNotFound(id)) => {
                tracing::warn!(tenant = %id, "another tab selected a tenant this user does not have");
            }
            Err(err) => tracing::debug!("tenant change from another tab ignored: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use procura_auth::{BusinessUnit, UserProfile};
    use procura_core::{BuCode, UserId};
    use procura_infra::{InMemoryStore, KeyValueStore, SharedStorage};
    use proptest::prelude::*;
    use tokio::sync::Notify;

    use crate::navigator::{Navigation, RecordingNavigator};

    fn tid(s: &str) -> TenantId {
        TenantId::parse(s).unwrap()
    }

    fn unit(id: &str, code: &str, is_default: bool) -> BusinessUnit {
        BusinessUnit {
            id: tid(id),
            code: BuCode::parse(code).unwrap(),
            name: format!("Unit {id}"),
            is_default,
            department: None,
            config: Default::default(),
        }
    }

    fn test_user(units: Vec<BusinessUnit>) -> UserProfile {
        UserProfile {
            id: UserId::parse("u-1").unwrap(),
            email: "buyer@example.com".into(),
            name: "Buyer".into(),
            business_units: units,
        }
    }

    fn default_units() -> Vec<BusinessUnit> {
        vec![unit("A", "A1", false), unit("B", "B1", true)]
    }

    #[derive(Default)]
    struct StubApi {
        units: Vec<BusinessUnit>,
        fail_profile: AtomicBool,
        reject_switch: AtomicBool,
        profile_gate: Option<Arc<Notify>>,
        profile_calls: AtomicUsize,
        switches: StdMutex<Vec<TenantId>>,
    }

    impl StubApi {
        fn new() -> Self {
            Self {
                units: default_units(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl AuthApi for StubApi {
        async fn login(&self, credentials: &Credentials) -> Result<TokenPair, ApiError> {
            match credentials.password.as_str() {
                "correct" => Ok(TokenPair::new("access-login", "refresh-login")),
                "offline" => Err(ApiError::Network("connection refused".into())),
                _ => Err(ApiError::Unauthorized(401)),
            }
        }

        async fn fetch_profile(&self, _access_token: &str) -> Result<UserProfile, ApiError> {
            self.profile_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.profile_gate {
                gate.notified().await;
            }
            if self.fail_profile.load(Ordering::SeqCst) {
                return Err(ApiError::Network("connection refused".into()));
            }
            Ok(test_user(self.units.clone()))
        }

        async fn switch_business_unit(&self, _access_token: &str, tenant_id: &TenantId) -> Result<(), ApiError> {
            if self.reject_switch.load(Ordering::SeqCst) {
                return Err(ApiError::Status(500, "boom".into()));
            }
            self.switches.lock().unwrap().push(tenant_id.clone());
            Ok(())
        }
    }

    struct Harness {
        shared: SharedStorage,
        store: Arc<dyn KeyValueStore>,
        api: Arc<StubApi>,
        nav: Arc<RecordingNavigator>,
        sync: Arc<SessionSynchronizer>,
    }

    impl Harness {
        fn new(api: StubApi) -> Self {
            let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
            let shared = SharedStorage::new(store.clone());
            Self::with_shared(shared, store, Arc::new(api))
        }

        fn with_shared(shared: SharedStorage, store: Arc<dyn KeyValueStore>, api: Arc<StubApi>) -> Self {
            let nav = Arc::new(RecordingNavigator::new());
            let sync = Arc::new(SessionSynchronizer::new(
                shared.open_tab(),
                api.clone(),
                nav.clone(),
                SyncSettings::default(),
            ));
            Self {
                shared,
                store,
                api,
                nav,
                sync,
            }
        }

        /// A second tab on the same store.
        fn sibling(&self) -> Self {
            Self::with_shared(self.shared.clone(), self.store.clone(), self.api.clone())
        }

        async fn stored(&self, key: SessionKey) -> Option<String> {
            self.store.get(key.as_str()).await.unwrap()
        }
    }

    #[tokio::test]
    async fn hydration_picks_default_unit_when_nothing_stored() {
        let h = Harness::new(StubApi::new());
        h.store.set("access_token", "tok").await.unwrap();
        h.store.set("refresh_token", "ref").await.unwrap();

        let view = h.sync.hydrate().await;

        assert_eq!(view.phase, SessionPhase::Authenticated);
        assert_eq!(view.tenant_id(), Some(&tid("B")));
        assert_eq!(h.stored(SessionKey::TenantId).await.as_deref(), Some("B"));
        assert_eq!(h.stored(SessionKey::BuCode).await.as_deref(), Some("B1"));
        assert!(h.stored(SessionKey::User).await.is_some());
    }

    #[tokio::test]
    async fn hydration_keeps_stored_tenant() {
        let h = Harness::new(StubApi::new());
        h.store.set("access_token", "tok").await.unwrap();
        h.store.set("tenant_id", "A").await.unwrap();

        let view = h.sync.hydrate().await;

        assert_eq!(view.tenant_id(), Some(&tid("A")));
        assert_eq!(h.stored(SessionKey::BuCode).await.as_deref(), Some("A1"));
    }

    #[tokio::test]
    async fn hydration_without_token_goes_to_sign_in() {
        let h = Harness::new(StubApi::new());

        let view = h.sync.hydrate().await;

        assert_eq!(view.phase, SessionPhase::Unauthenticated);
        assert_eq!(h.api.profile_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.nav.visits(), vec![Navigation::SignIn("/sign-in".into())]);
    }

    #[tokio::test]
    async fn profile_failure_during_hydration_is_swallowed() {
        let api = StubApi::new();
        api.fail_profile.store(true, Ordering::SeqCst);
        let h = Harness::new(api);
        h.store.set("access_token", "expired").await.unwrap();

        let view = h.sync.hydrate().await;

        assert_eq!(view.phase, SessionPhase::Unauthenticated);
        assert!(view.session.is_none());
        assert_eq!(h.api.profile_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.nav.visits(), vec![Navigation::SignIn("/sign-in".into())]);
    }

    #[tokio::test]
    async fn set_session_then_logout_leaves_no_session_keys() {
        let h = Harness::new(StubApi::new());

        h.sync.set_session("access", "refresh").await.unwrap();
        assert_eq!(h.sync.view().phase, SessionPhase::Authenticated);
        assert_eq!(h.stored(SessionKey::AccessToken).await.as_deref(), Some("access"));

        h.sync.logout().await.unwrap();

        for key in SessionKey::ALL {
            assert_eq!(h.stored(key).await, None, "{key} still persisted");
        }
        assert_eq!(h.sync.view().phase, SessionPhase::Unauthenticated);
        assert_eq!(h.nav.visits().last(), Some(&Navigation::SignIn("/sign-in".into())));
    }

    #[tokio::test]
    async fn profile_failure_on_set_session_is_surfaced() {
        let api = StubApi::new();
        api.fail_profile.store(true, Ordering::SeqCst);
        let h = Harness::new(api);

        let err = h.sync.set_session("access", "refresh").await.unwrap_err();

        assert!(matches!(err, SessionError::ProfileFetchFailure(_)));
        assert_eq!(h.sync.view().phase, SessionPhase::Unauthenticated);
    }

    #[tokio::test]
    async fn login_rejection_is_auth_failure() {
        let h = Harness::new(StubApi::new());

        let err = h
            .sync
            .login(&Credentials::new("buyer@example.com", "wrong"))
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::AuthFailure("invalid credentials".into()));
        assert_eq!(h.stored(SessionKey::AccessToken).await, None);

        h.sync
            .login(&Credentials::new("buyer@example.com", "correct"))
            .await
            .unwrap();
        assert_eq!(h.stored(SessionKey::AccessToken).await.as_deref(), Some("access-login"));
        assert_eq!(h.sync.view().tenant_id(), Some(&tid("B")));
    }

    #[tokio::test]
    async fn unreachable_login_is_not_an_auth_failure() {
        let h = Harness::new(StubApi::new());

        let err = h
            .sync
            .login(&Credentials::new("buyer@example.com", "offline"))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Unavailable(_)), "got {err:?}");
        assert_eq!(h.sync.view().phase, SessionPhase::Unauthenticated);
    }

    fn gated_api() -> (StubApi, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let api = StubApi {
            units: default_units(),
            profile_gate: Some(gate.clone()),
            ..Default::default()
        };
        (api, gate)
    }

    async fn wait_for_profile_call(api: &StubApi) {
        while api.profile_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn logout_while_set_session_awaits_profile() {
        let (api, gate) = gated_api();
        let h = Harness::new(api);

        let sync = h.sync.clone();
        let pending = tokio::spawn(async move { sync.set_session("access", "refresh").await });

        wait_for_profile_call(&h.api).await;
        assert_eq!(h.sync.view().phase, SessionPhase::Hydrating);
        h.sync.logout().await.unwrap();
        gate.notify_one();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(SessionError::Stale { .. })), "got {result:?}");
        assert_eq!(h.sync.view().phase, SessionPhase::Unauthenticated);
        for key in SessionKey::ALL {
            assert_eq!(h.stored(key).await, None, "{key} written after logout");
        }
    }

    #[tokio::test]
    async fn removal_elsewhere_while_set_session_awaits_profile() {
        let (api, gate) = gated_api();
        let first = Harness::new(api);
        let second = first.sibling();
        let mut inbox = first.sync.storage().subscribe();

        let sync = first.sync.clone();
        let pending = tokio::spawn(async move { sync.set_session("access", "refresh").await });

        wait_for_profile_call(&first.api).await;
        second.sync.logout().await.unwrap();
        for change in inbox.drain() {
            first.sync.handle_storage_change(change).await;
        }
        gate.notify_one();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(SessionError::Stale { .. })), "got {result:?}");
        assert_eq!(first.sync.view().phase, SessionPhase::Unauthenticated);
        for key in SessionKey::ALL {
            assert_eq!(first.stored(key).await, None, "{key} written after logout");
        }
    }

    #[tokio::test]
    async fn tokens_refreshed_in_other_tab_are_adopted_without_echo() {
        let first = Harness::new(StubApi::new());
        first.sync.set_session("access", "refresh").await.unwrap();
        let second = first.sibling();
        second.sync.hydrate().await;

        let mut inbox = first.sync.storage().subscribe();
        let mut spy = first.sync.storage().subscribe();

        second.sync.refresh_tokens("access-2", "refresh-2").await.unwrap();
        for change in inbox.drain() {
            first.sync.handle_storage_change(change).await;
        }

        let session = first.sync.view().session.unwrap();
        assert_eq!(session.access_token(), "access-2");
        assert_eq!(session.tokens().refresh_token, "refresh-2");
        assert_eq!(first.sync.view().phase, SessionPhase::Authenticated);

        let echoed: Vec<_> = spy
            .drain()
            .into_iter()
            .filter(|c| c.is_from(first.sync.storage().tab()))
            .collect();
        assert!(echoed.is_empty(), "first tab re-emitted {echoed:?}");
    }

    #[tokio::test]
    async fn change_tenant_then_unknown_tenant() {
        let h = Harness::new(StubApi::new());
        h.sync.set_session("access", "refresh").await.unwrap();
        h.sync.cache().put(&tid("B"), "vendors", &vec!["acme"]).unwrap();

        h.sync.change_tenant(&tid("A")).await.unwrap();

        assert_eq!(h.stored(SessionKey::TenantId).await.as_deref(), Some("A"));
        assert_eq!(h.stored(SessionKey::BuCode).await.as_deref(), Some("A1"));
        assert!(h.sync.cache().is_empty());
        assert_eq!(h.nav.visits(), vec![Navigation::Reload]);

        let err = h.sync.change_tenant(&tid("Z")).await.unwrap_err();

        assert_eq!(err, SessionError::TenantNotFound(tid("Z")));
        assert_eq!(h.sync.view().tenant_id(), Some(&tid("A")));
        assert_eq!(h.stored(SessionKey::TenantId).await.as_deref(), Some("A"));
        assert_eq!(h.stored(SessionKey::BuCode).await.as_deref(), Some("A1"));
        assert_eq!(*h.api.switches.lock().unwrap(), vec![tid("A")]);
    }

    #[tokio::test]
    async fn rejected_switch_keeps_tenant() {
        let h = Harness::new(StubApi::new());
        h.sync.set_session("access", "refresh").await.unwrap();
        h.api.reject_switch.store(true, Ordering::SeqCst);

        let err = h.sync.change_tenant(&tid("A")).await.unwrap_err();

        assert!(matches!(err, SessionError::TenantSwitchRejected(_)));
        let view = h.sync.view();
        assert_eq!(view.phase, SessionPhase::Authenticated);
        assert_eq!(view.tenant_id(), Some(&tid("B")));
        assert_eq!(h.stored(SessionKey::TenantId).await.as_deref(), Some("B"));
        assert!(h.nav.visits().is_empty());
    }

    #[tokio::test]
    async fn refresh_tokens_persists_new_pair() {
        let h = Harness::new(StubApi::new());
        assert_eq!(
            h.sync.refresh_tokens("a2", "r2").await.unwrap_err(),
            SessionError::NotAuthenticated
        );

        h.sync.set_session("access", "refresh").await.unwrap();
        h.sync.refresh_tokens("a2", "r2").await.unwrap();

        assert_eq!(h.stored(SessionKey::AccessToken).await.as_deref(), Some("a2"));
        assert_eq!(h.stored(SessionKey::RefreshToken).await.as_deref(), Some("r2"));
        assert_eq!(h.sync.view().session.unwrap().access_token(), "a2");
    }

    #[tokio::test]
    async fn removal_in_other_tab_logs_out_without_echo() {
        let first = Harness::new(StubApi::new());
        first.sync.set_session("access", "refresh").await.unwrap();
        let second = first.sibling();
        second.sync.hydrate().await;

        let mut first_inbox = first.sync.storage().subscribe();
        let mut spy = first.sync.storage().subscribe();
        spy.drain();
        first_inbox.drain();

        second.sync.logout().await.unwrap();
        for change in first_inbox.drain() {
            first.sync.handle_storage_change(change).await;
        }

        assert_eq!(first.sync.view().phase, SessionPhase::Unauthenticated);
        assert_eq!(
            first.nav.visits().last(),
            Some(&Navigation::SignIn("/sign-in".into()))
        );

        let echoed: Vec<_> = spy
            .drain()
            .into_iter()
            .filter(|c| c.is_from(first.sync.storage().tab()))
            .collect();
        assert!(echoed.is_empty(), "first tab re-emitted {echoed:?}");
    }

    #[tokio::test]
    async fn own_changes_are_ignored() {
        let h = Harness::new(StubApi::new());
        h.sync.set_session("access", "refresh").await.unwrap();
        let mut inbox = h.sync.storage().subscribe();

        h.sync.storage().remove("access_token").await.unwrap();
        for change in inbox.drain() {
            h.sync.handle_storage_change(change).await;
        }

        assert_eq!(h.sync.view().phase, SessionPhase::Authenticated);
    }

    #[tokio::test]
    async fn tenant_written_by_other_tab_is_adopted() {
        let first = Harness::new(StubApi::new());
        first.sync.set_session("access", "refresh").await.unwrap();
        let second = first.sibling();
        second.sync.hydrate().await;
        let mut inbox = first.sync.storage().subscribe();

        second.sync.change_tenant(&tid("A")).await.unwrap();
        for change in inbox.drain() {
            first.sync.handle_storage_change(change).await;
        }

        let view = first.sync.view();
        assert_eq!(view.tenant_id(), Some(&tid("A")));
        assert_eq!(view.bu_code().map(BuCode::as_str), Some("A1"));
        assert_eq!(first.nav.visits(), vec![Navigation::Reload]);
    }

    #[tokio::test]
    async fn login_in_other_tab_hydrates_this_one() {
        let first = Harness::new(StubApi::new());
        first.sync.hydrate().await;
        assert_eq!(first.sync.view().phase, SessionPhase::Unauthenticated);
        let second = first.sibling();
        let mut inbox = first.sync.storage().subscribe();

        second.sync.set_session("access", "refresh").await.unwrap();
        for change in inbox.drain() {
            first.sync.handle_storage_change(change).await;
        }

        assert_eq!(first.sync.view().phase, SessionPhase::Authenticated);
        assert_eq!(first.sync.view().tenant_id(), Some(&tid("B")));
    }

    #[tokio::test]
    async fn changes_right_after_local_logout_are_ignored() {
        let first = Harness::new(StubApi::new());
        first.sync.set_session("access", "refresh").await.unwrap();
        let second = first.sibling();
        let mut inbox = first.sync.storage().subscribe();

        first.sync.logout().await.unwrap();
        inbox.drain();
        second.sync.set_session("again", "refresh").await.unwrap();
        for change in inbox.drain() {
            first.sync.handle_storage_change(change).await;
        }

        assert_eq!(first.sync.view().phase, SessionPhase::Unauthenticated);
    }

    #[tokio::test]
    async fn profile_arriving_after_logout_is_discarded() {
        let gate = Arc::new(Notify::new());
        let api = StubApi {
            units: default_units(),
            profile_gate: Some(gate.clone()),
            ..Default::default()
        };
        let h = Harness::new(api);
        h.store.set("access_token", "tok").await.unwrap();
        let mut views = h.sync.subscribe();

        let sync = h.sync.clone();
        let hydration = tokio::spawn(async move { sync.hydrate().await });

        views
            .wait_for(|v| v.phase == SessionPhase::Hydrating)
            .await
            .unwrap();
        h.sync.logout().await.unwrap();
        gate.notify_one();

        let view = hydration.await.unwrap();
        assert_eq!(view.phase, SessionPhase::Unauthenticated);
        assert!(view.session.is_none());
        assert_eq!(h.stored(SessionKey::TenantId).await, None);
        assert_eq!(h.stored(SessionKey::User).await, None);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: any number of set_session calls followed by logout leaves
        /// no session key in the store.
        #[test]
        fn logout_clears_every_session_key(tokens in prop::collection::vec(("[a-z0-9]{1,16}", "[a-z0-9]{1,16}"), 1..5)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let leftovers = rt.block_on(async {
                let h = Harness::new(StubApi::new());
                for (access, refresh) in &tokens {
                    h.sync.set_session(access, refresh).await.unwrap();
                }
                h.sync.logout().await.unwrap();

                let mut leftovers = Vec::new();
                for key in SessionKey::ALL {
                    if h.stored(key).await.is_some() {
                        leftovers.push(key);
                    }
                }
                leftovers
            });
            prop_assert!(leftovers.is_empty(), "left behind: {:?}", leftovers);
        }

        /// Property: switching to any unit the user owns persists exactly that
        /// unit's id and code.
        #[test]
        fn change_tenant_persists_matching_unit(count in 1usize..8, pick in 0usize..8) {
            let units: Vec<BusinessUnit> = (0..count)
                .map(|i| unit(&format!("T{i}"), &format!("C{i}"), i == 0))
                .collect();
            let target = units[pick % count].clone();

            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let (tenant, code) = rt.block_on(async {
                let h = Harness::new(StubApi { units, ..Default::default() });
                h.sync.set_session("access", "refresh").await.unwrap();
                h.sync.change_tenant(&target.id).await.unwrap();
                (h.stored(SessionKey::TenantId).await, h.stored(SessionKey::BuCode).await)
            });

            prop_assert_eq!(tenant.as_deref(), Some(target.id.as_str()));
            prop_assert_eq!(code.as_deref(), Some(target.code.as_str()));
        }
    }
}

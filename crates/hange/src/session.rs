//! Session management with single-flight token refresh using FSM-based state.
//!
//! A [`Session`] is created once per app launch and shared by cloning. It owns
//! the signed-in user and credentials, drives the lifecycle FSM, and publishes
//! every change on a `watch` channel so consumers can gate on readiness
//! instead of sleeping.

use crate::carrier::{CarrierContext, Grant, RefreshedSession, Restored, RetryDecision, TokenCarrier};
use crate::http::{BackendEndpoints, HttpRequest, HttpResponse, HttpTransport};
use crate::session_fsm::{SessionInput, SessionMachine, SessionState};
use crate::{AuthError, AuthResult, AuthUser, LastError};
use auth_redirect::{AuthorizationPrompt, PromptOutcome};
use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tallyup_config_and_utils::Platform;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

/// Returns the current time in unix seconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

const EVENT_CAPACITY: usize = 16;

/// Point-in-time view of the session, published on every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<AuthUser>,
    pub loading: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
    /// False when adopted tokens could not be written to the secure store.
    pub durable: bool,
}

impl SessionSnapshot {
    /// Restoration has run and no auth operation is in flight.
    pub fn is_settled(&self) -> bool {
        !self.loading && !self.state.is_transient() && self.state != SessionState::Uninitialized
    }
}

/// Lifecycle notifications for listeners that route the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn { user_id: String },
    /// `forced` when the backend rejected a refresh.
    SignedOut { forced: bool },
    /// A request was rejected and the session could not be recovered.
    LoginRequired,
}

/// How a refresh flight ended. Every caller joined to a flight sees the same value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New credentials adopted. `access_token` is `None` for cookie sessions.
    Refreshed { access_token: Option<String> },
    /// Network failure; the session was kept.
    Interrupted,
    /// The backend rejected the refresh and the session was ended.
    SignedOut,
    /// A sign-out landed while the refresh was in flight.
    Discarded,
}

impl RefreshOutcome {
    pub fn access_token(&self) -> Option<String> {
        match self {
            RefreshOutcome::Refreshed { access_token } => access_token.clone(),
            _ => None,
        }
    }
}

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Who asked for a refresh flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshTrigger {
    /// Startup restoration; a rejected refresh leaves the session anonymous
    /// without surfacing an error.
    Restore,
    Request,
}

/// Why a session is being ended.
#[derive(Debug)]
enum Ending {
    /// The user asked to sign out.
    Requested,
    /// The backend rejected the refresh credential of a live session.
    Rejected(LastError),
    /// Credentials left by a previous launch turned out to be dead.
    Stale,
}

struct RefreshFlight {
    id: u64,
    future: SharedRefresh,
}

/// Mutable session state. User and credentials change together under one lock.
struct SessionData {
    machine: SessionMachine,
    user: Option<AuthUser>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    loading: bool,
    last_error: Option<LastError>,
    durable: bool,
    restore_started: bool,
    /// Bumped by every sign-out. Results of operations started under an
    /// older epoch are discarded.
    epoch: u64,
}

impl SessionData {
    fn new() -> Self {
        Self {
            machine: SessionMachine::new(),
            user: None,
            access_token: None,
            refresh_token: None,
            loading: false,
            last_error: None,
            durable: true,
            restore_started: false,
            epoch: 0,
        }
    }

    fn state(&self) -> SessionState {
        SessionState::from(self.machine.state())
    }

    /// Apply an FSM input. Inputs that don't apply in the current state are
    /// logged and ignored; they come from operations overtaken by others.
    fn advance(&mut self, input: SessionInput) {
        let old_state = self.state();
        match self.machine.consume(&input) {
            Ok(_) => {
                let new_state = self.state();
                if old_state != new_state {
                    debug!(
                        old_state = ?old_state,
                        new_state = ?new_state,
                        "Session state transition"
                    );
                }
            }
            Err(_) => {
                debug!(state = ?old_state, input = ?input, "Ignoring session input");
            }
        }
    }

    /// End a sign-in attempt that did not adopt anything.
    fn abandon_sign_in(&mut self) {
        let input = if self.user.is_some() {
            SessionInput::LoginAbandoned
        } else {
            SessionInput::LoginFailed
        };
        self.advance(input);
    }

    fn clear_credentials(&mut self) {
        self.user = None;
        self.access_token = None;
        self.refresh_token = None;
        self.durable = true;
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state(),
            user: self.user.clone(),
            loading: self.loading,
            last_error: self.last_error.clone(),
            durable: self.durable,
        }
    }
}

struct SessionInner {
    carrier: Arc<dyn TokenCarrier>,
    transport: Arc<dyn HttpTransport>,
    prompt: Arc<dyn AuthorizationPrompt>,
    endpoints: BackendEndpoints,
    clock: Clock,
    data: Mutex<SessionData>,
    /// Serializes secure-store writes against custody clears so a sign-out
    /// never races a late persist.
    custody: AsyncMutex<()>,
    refresh_flight: Mutex<Option<RefreshFlight>>,
    next_flight_id: AtomicU64,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    events_tx: broadcast::Sender<SessionEvent>,
}

/// The app's authentication session.
///
/// Cheap to clone; clones share state. State locks are never held across
/// an `.await`.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session using the system clock.
    pub fn new(
        carrier: Arc<dyn TokenCarrier>,
        transport: Arc<dyn HttpTransport>,
        prompt: Arc<dyn AuthorizationPrompt>,
        endpoints: BackendEndpoints,
    ) -> Self {
        Self::with_clock(
            carrier,
            transport,
            prompt,
            endpoints,
            Arc::new(|| Utc::now().timestamp()),
        )
    }

    /// Create a session with a custom clock.
    pub fn with_clock(
        carrier: Arc<dyn TokenCarrier>,
        transport: Arc<dyn HttpTransport>,
        prompt: Arc<dyn AuthorizationPrompt>,
        endpoints: BackendEndpoints,
        clock: Clock,
    ) -> Self {
        let data = SessionData::new();
        let (snapshot_tx, _) = watch::channel(data.snapshot());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(SessionInner {
                carrier,
                transport,
                prompt,
                endpoints,
                clock,
                data: Mutex::new(data),
                custody: AsyncMutex::new(()),
                refresh_flight: Mutex::new(None),
                next_flight_id: AtomicU64::new(1),
                snapshot_tx,
                events_tx,
            }),
        }
    }

    pub fn platform(&self) -> Platform {
        self.inner.carrier.platform()
    }

    pub fn endpoints(&self) -> &BackendEndpoints {
        &self.inner.endpoints
    }

    pub fn user(&self) -> Option<AuthUser> {
        self.inner.data.lock().user.clone()
    }

    /// Current bearer token (native only).
    pub fn access_token(&self) -> Option<String> {
        self.inner.data.lock().access_token.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.data.lock().loading
    }

    pub fn last_error(&self) -> Option<LastError> {
        self.inner.data.lock().last_error.clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.data.lock().state()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.data.lock().snapshot()
    }

    /// Receive a snapshot after every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Wait until restoration has run and no sign-in or refresh is in flight.
    pub async fn ready(&self) -> SessionSnapshot {
        let mut rx = self.subscribe();
        let settled = rx
            .wait_for(SessionSnapshot::is_settled)
            .await
            .map(|snapshot| SessionSnapshot::clone(&snapshot));
        settled.unwrap_or_else(|_| self.snapshot())
    }

    fn context(&self) -> CarrierContext<'_> {
        CarrierContext {
            transport: self.inner.transport.as_ref(),
            endpoints: &self.inner.endpoints,
            now: (self.inner.clock)(),
        }
    }

    /// Mutate state under the lock and publish the resulting snapshot.
    fn update<R>(&self, f: impl FnOnce(&mut SessionData) -> R) -> R {
        let mut data = self.inner.data.lock();
        let result = f(&mut data);
        self.inner.snapshot_tx.send_replace(data.snapshot());
        result
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.inner.events_tx.send(event);
    }

    /// Adopt a grant unless a sign-out happened since `epoch`.
    /// Returns false when the grant was discarded.
    ///
    /// With `persist`, the grant is written to custody first, off the async
    /// executor and outside the state lock.
    async fn adopt(&self, epoch: u64, grant: Grant, persist: bool, input: SessionInput) -> bool {
        let _custody = self.inner.custody.lock().await;

        let durable = if persist {
            if self.inner.data.lock().epoch != epoch {
                info!("Discarding session result superseded by sign-out");
                return false;
            }
            Some(self.persist(grant.clone()).await)
        } else {
            None
        };

        self.update(|data| {
            if data.epoch != epoch {
                info!("Discarding session result superseded by sign-out");
                return false;
            }

            if let Some(durable) = durable {
                data.durable = durable;
            }

            let Grant {
                user,
                access_token,
                refresh_token,
            } = grant;
            data.user = Some(user);
            data.access_token = access_token;
            if refresh_token.is_some() {
                data.refresh_token = refresh_token;
            }
            data.last_error = None;
            data.advance(input);
            true
        })
    }

    /// Write a grant to custody on the blocking pool. Returns whether it stuck.
    async fn persist(&self, grant: Grant) -> bool {
        let carrier = Arc::clone(&self.inner.carrier);
        match tokio::task::spawn_blocking(move || carrier.persist(&grant)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(
                    error = %e,
                    "Could not persist tokens, session will not survive a restart"
                );
                false
            }
            Err(e) => {
                warn!(error = %e, "Token persist task failed");
                false
            }
        }
    }

    /// Restore the session from custody. Runs once; later calls return the
    /// current snapshot. Never fails: anything unrecoverable leaves the
    /// session anonymous.
    pub async fn restore_session(&self) -> SessionSnapshot {
        let epoch = self.update(|data| {
            if data.restore_started {
                return None;
            }
            data.restore_started = true;
            data.loading = true;
            data.advance(SessionInput::RestoreStarted);
            Some(data.epoch)
        });
        let Some(epoch) = epoch else {
            debug!("Session restoration already ran");
            return self.snapshot();
        };

        info!(platform = ?self.platform(), "Restoring session");

        let restored = self.inner.carrier.restore(&self.context()).await;
        match restored {
            Ok(Restored::Adopted(grant)) => {
                let user_id = grant.user.id.clone();
                if self
                    .adopt(epoch, grant, false, SessionInput::TokenAdopted)
                    .await
                {
                    info!(user_id = %user_id, "Session restored");
                }
            }
            Ok(Restored::NeedsRefresh { refresh_token }) => {
                info!("Stored session needs refresh");
                self.update(|data| {
                    if data.epoch == epoch {
                        data.refresh_token = refresh_token.clone();
                    }
                });
                self.refresh_flight(refresh_token, RefreshTrigger::Restore)
                    .await;
            }
            Ok(Restored::Empty) => {
                info!("No stored session");
                self.update(|data| data.advance(SessionInput::NoSession));
            }
            Err(e) => {
                warn!(error = %e, "Session restoration failed, continuing signed out");
                self.update(|data| data.advance(SessionInput::NoSession));
            }
        }

        self.update(|data| {
            data.loading = false;
            data.snapshot()
        })
    }

    /// Run the interactive sign-in flow.
    ///
    /// Returns:
    /// - `Ok(Some(user))` once the user and credentials are adopted
    /// - `Ok(None)` if the user cancelled, or a sign-out overtook the attempt
    /// - `Err(...)` for provider, network or exchange failures, also kept in
    ///   [`Session::last_error`]
    pub async fn sign_in(&self) -> AuthResult<Option<AuthUser>> {
        let epoch = self.update(|data| {
            data.loading = true;
            data.last_error = None;
            data.advance(SessionInput::LoginAttempt);
            data.epoch
        });

        info!(platform = ?self.platform(), "Starting sign in");

        let result = self.run_sign_in(epoch).await;

        self.update(|data| {
            data.loading = false;
            match &result {
                Ok(Some(_)) => {}
                Ok(None) => data.abandon_sign_in(),
                Err(e) => {
                    data.last_error = Some(LastError::from(e));
                    data.abandon_sign_in();
                }
            }
        });

        match &result {
            Ok(Some(user)) => {
                info!(user_id = %user.id, "Signed in");
                self.emit(SessionEvent::SignedIn {
                    user_id: user.id.clone(),
                });
            }
            Ok(None) => info!("Sign in did not complete"),
            Err(e) => warn!(error = %e, kind = ?e.kind(), "Sign in failed"),
        }

        result
    }

    async fn run_sign_in(&self, epoch: u64) -> AuthResult<Option<AuthUser>> {
        let code = match self.inner.prompt.authorize().await? {
            PromptOutcome::Success(code) => code,
            PromptOutcome::Cancelled => {
                info!("Sign in cancelled by user");
                return Ok(None);
            }
            PromptOutcome::Failed(reason) => return Err(AuthError::OAuthProvider(reason)),
        };

        let grant = self.inner.carrier.exchange(&self.context(), &code).await?;
        let user = grant.user.clone();

        if self
            .adopt(epoch, grant, true, SessionInput::LoginSuccess)
            .await
        {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }

    /// Refresh the session, joining any refresh already in flight.
    ///
    /// `refresh_token` overrides the held refresh token (native only).
    /// Returns the new access token, or `None` for cookie sessions and on
    /// failure. Failures are resolved into state, never returned.
    pub async fn refresh_tokens(&self, refresh_token: Option<&str>) -> Option<String> {
        self.refresh_flight(refresh_token.map(str::to_string), RefreshTrigger::Request)
            .await
            .access_token()
    }

    /// Start a refresh flight or join the one in progress.
    async fn refresh_flight(
        &self,
        refresh_token: Option<String>,
        trigger: RefreshTrigger,
    ) -> RefreshOutcome {
        let future = {
            let mut slot = self.inner.refresh_flight.lock();
            match slot.as_ref() {
                Some(flight) => {
                    debug!(flight = flight.id, "Joining in-flight refresh");
                    flight.future.clone()
                }
                None => {
                    let id = self.inner.next_flight_id.fetch_add(1, Ordering::Relaxed);
                    let session = self.clone();
                    let future = async move { session.run_refresh(id, refresh_token, trigger).await }
                        .boxed()
                        .shared();
                    *slot = Some(RefreshFlight {
                        id,
                        future: future.clone(),
                    });
                    future
                }
            }
        };

        future.await
    }

    async fn run_refresh(
        &self,
        flight: u64,
        refresh_token: Option<String>,
        trigger: RefreshTrigger,
    ) -> RefreshOutcome {
        let (epoch, refresh_token) = self.update(|data| {
            data.advance(SessionInput::RefreshStarted);
            (
                data.epoch,
                refresh_token.or_else(|| data.refresh_token.clone()),
            )
        });

        debug!(flight, "Refreshing session");

        let result = self
            .inner
            .carrier
            .refresh(&self.context(), refresh_token)
            .await;

        let outcome = match result {
            Ok(grant) => {
                let access_token = grant.access_token.clone();
                if self
                    .adopt(epoch, grant, true, SessionInput::RefreshSuccess)
                    .await
                {
                    info!(flight, "Session refreshed");
                    RefreshOutcome::Refreshed { access_token }
                } else {
                    RefreshOutcome::Discarded
                }
            }
            Err(e) if e.is_transient() => {
                warn!(flight, error = %e, "Refresh interrupted, keeping session");
                let current = self.update(|data| {
                    if data.epoch != epoch {
                        return false;
                    }
                    data.last_error = Some(LastError::from(&e));
                    let input = if data.user.is_some() {
                        SessionInput::RefreshInterrupted
                    } else {
                        SessionInput::RefreshFailed
                    };
                    data.advance(input);
                    true
                });
                if current {
                    RefreshOutcome::Interrupted
                } else {
                    RefreshOutcome::Discarded
                }
            }
            Err(e) => {
                let ending = match trigger {
                    RefreshTrigger::Restore => {
                        info!(flight, error = %e, "Stored credentials rejected, clearing them");
                        Ending::Stale
                    }
                    RefreshTrigger::Request => {
                        warn!(flight, error = %e, kind = ?e.kind(), "Refresh rejected, signing out");
                        Ending::Rejected(LastError::from(&e))
                    }
                };
                if self.end_session(Some(epoch), ending).await {
                    RefreshOutcome::SignedOut
                } else {
                    RefreshOutcome::Discarded
                }
            }
        };

        self.finish_flight(flight);
        outcome
    }

    fn finish_flight(&self, flight: u64) {
        let mut slot = self.inner.refresh_flight.lock();
        if slot.as_ref().is_some_and(|f| f.id == flight) {
            *slot = None;
        }
    }

    /// Send a request with the session credential attached.
    ///
    /// A 401 triggers at most one refresh and at most one retry. When the
    /// session cannot be recovered the original 401 response is returned.
    pub async fn fetch_with_auth(&self, request: HttpRequest) -> AuthResult<HttpResponse> {
        let access_token = self.access_token();
        let first = self
            .inner
            .carrier
            .authorize(request.clone(), access_token.as_deref())?;

        let response = self.inner.transport.send(first).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(url = %request.url, "Request unauthorized, refreshing session");
        let outcome = self.refresh_flight(None, RefreshTrigger::Request).await;
        let refreshed = RefreshedSession {
            access_token: outcome.access_token(),
            user_present: self.user().is_some(),
        };

        match self.inner.carrier.retry_decision(&request, &refreshed)? {
            RetryDecision::Retry(retry) => {
                debug!(url = %request.url, "Retrying request after refresh");
                self.inner.transport.send(retry).await
            }
            RetryDecision::ReturnOriginal => Ok(response),
            RetryDecision::LoginRequired => {
                info!(url = %request.url, "Session lost, login required");
                self.emit(SessionEvent::LoginRequired);
                Ok(response)
            }
        }
    }

    /// Sign out. Local state is always cleared, even if clearing custody fails.
    pub async fn sign_out(&self) {
        self.end_session(None, Ending::Requested).await;
    }

    /// Clear local state, then custody. With `expected_epoch`, does nothing
    /// (and returns false) if a sign-out already happened since then.
    async fn end_session(&self, expected_epoch: Option<u64>, ending: Ending) -> bool {
        let forced = !matches!(ending, Ending::Requested);
        let proceed = self.update(|data| {
            if expected_epoch.is_some_and(|epoch| epoch != data.epoch) {
                return false;
            }
            data.epoch += 1;
            data.clear_credentials();
            match ending {
                Ending::Stale => {
                    data.last_error = None;
                    data.advance(SessionInput::RefreshFailed);
                }
                Ending::Rejected(ref error) => {
                    data.last_error = Some(error.clone());
                    data.advance(SessionInput::SignOutRequested);
                }
                Ending::Requested => {
                    data.last_error = None;
                    data.advance(SessionInput::SignOutRequested);
                }
            }
            true
        });
        if !proceed {
            return false;
        }

        {
            let _custody = self.inner.custody.lock().await;
            if let Err(e) = self.inner.carrier.sign_out(&self.context(), forced).await {
                warn!(error = %e, "Failed to clear session custody");
            }
        }

        if matches!(ending, Ending::Stale) {
            info!("Stale session cleared");
        } else {
            info!(forced, "Signed out");
            self.emit(SessionEvent::SignedOut { forced });
        }
        true
    }
}

//! Shared fixtures for session integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use auth_redirect::{AuthorizationCode, AuthorizationPrompt, PromptOutcome, RedirectResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hange::{
    carrier_for_platform, AuthError, AuthResult, BackendEndpoints, HttpRequest, HttpResponse,
    HttpTransport, Method, Session, StatusCode,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex as StdMutex};
use std::time::Duration;
use tallyup_config_and_utils::Platform;
use tallyup_storage::{
    MemoryStorage, SecureStorage, StorageError, StorageResult, TokenName, TokenStore,
};
use tokio::sync::Notify;

/// Fixed "now" for every test session, unix seconds.
pub const NOW: i64 = 1_700_000_000;
pub const BACKEND: &str = "http://localhost:8000";

/// Build an unsigned JWT carrying `claims`.
pub fn jwt(claims: Value) -> String {
    format!(
        "{}.{}.test-signature",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

pub fn access_token(user_id: &str, exp: i64) -> String {
    jwt(json!({
        "id": user_id,
        "email": format!("{}@example.com", user_id),
        "name": "Test User",
        "provider": "google",
        "exp": exp,
    }))
}

pub fn token_pair(user_id: &str, exp: i64, refresh_token: &str) -> Value {
    json!({
        "accessToken": access_token(user_id, exp),
        "refreshToken": refresh_token,
    })
}

pub fn session_user(user_id: &str) -> Value {
    json!({
        "id": user_id,
        "email": format!("{}@example.com", user_id),
        "name": "Web User",
        "cookieExpiration": NOW + 3600,
    })
}

/// A scripted reply for one request.
#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16),
    Json(u16, Value),
    NetworkDown,
}

impl Reply {
    fn into_response(self) -> AuthResult<HttpResponse> {
        match self {
            Reply::Status(code) => Ok(HttpResponse::new(status(code), Vec::new())),
            Reply::Json(code, body) => Ok(HttpResponse::new(status(code), body.to_string())),
            Reply::NetworkDown => Err(AuthError::Network("connection refused".to_string())),
        }
    }
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).expect("valid status code")
}

/// Holds a route's requests until released.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

#[derive(Default)]
struct Route {
    replies: VecDeque<Reply>,
    last: Option<Reply>,
    delay: Option<Duration>,
    gate: Option<Arc<Gate>>,
}

impl Route {
    /// Next scripted reply; the final one repeats.
    fn next(&mut self) -> Reply {
        match self.replies.pop_front() {
            Some(reply) => {
                self.last = Some(reply.clone());
                reply
            }
            None => self.last.clone().unwrap_or(Reply::Status(404)),
        }
    }
}

/// In-process backend: replies from per-route scripts and records every request.
/// Unscripted routes answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

fn route_key(method: &Method, path: &str) -> String {
    format!("{} {}", method, path)
}

fn path_of(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, method: Method, path: &str, replies: Vec<Reply>) {
        let mut routes = self.routes.lock();
        let route = routes.entry(route_key(&method, path)).or_default();
        route.replies = replies.into();
        route.last = None;
    }

    pub fn delay(&self, method: Method, path: &str, delay: Duration) {
        let mut routes = self.routes.lock();
        routes.entry(route_key(&method, path)).or_default().delay = Some(delay);
    }

    pub fn gate(&self, method: Method, path: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        let mut routes = self.routes.lock();
        routes.entry(route_key(&method, path)).or_default().gate = Some(gate.clone());
        gate
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, method: Method, path: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && path_of(&r.url) == path)
            .cloned()
            .collect()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.requests_to(method, path).len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> AuthResult<HttpResponse> {
        let key = route_key(&request.method, &path_of(&request.url));
        self.requests.lock().push(request);

        let (reply, delay, gate) = {
            let mut routes = self.routes.lock();
            match routes.get_mut(&key) {
                Some(route) => (route.next(), route.delay, route.gate.clone()),
                None => (Reply::Status(404), None, None),
            }
        };

        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        reply.into_response()
    }
}

/// Prompt that always ends the same way.
pub struct ScriptedPrompt(pub PromptOutcome);

#[async_trait]
impl AuthorizationPrompt for ScriptedPrompt {
    async fn authorize(&self) -> RedirectResult<PromptOutcome> {
        Ok(self.0.clone())
    }
}

pub fn code(code: &str, verifier: Option<&str>) -> PromptOutcome {
    PromptOutcome::Success(AuthorizationCode {
        code: code.to_string(),
        code_verifier: verifier.map(str::to_string),
    })
}

/// Storage that reads fine but refuses writes.
#[derive(Default)]
pub struct ReadOnlyStorage {
    inner: MemoryStorage,
}

impl SecureStorage for ReadOnlyStorage {
    fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
        Err(StorageError::Platform("keychain locked".to_string()))
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.inner.get(key)
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        self.inner.delete(key)
    }
}

/// Storage whose writes block the calling thread until [`GatedStorage::release`].
/// A write left waiting too long records that the caller starved.
#[derive(Default)]
pub struct GatedStorage {
    inner: MemoryStorage,
    writing: Notify,
    released: StdMutex<bool>,
    wake: Condvar,
    starved: AtomicBool,
}

impl GatedStorage {
    /// Wait until a write is parked in the store.
    pub async fn writing(&self) {
        self.writing.notified().await;
    }

    pub fn release(&self) {
        *self.released.lock().unwrap() = true;
        self.wake.notify_all();
    }

    pub fn starved(&self) -> bool {
        self.starved.load(Ordering::SeqCst)
    }
}

impl SecureStorage for GatedStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.writing.notify_one();
        let released = self.released.lock().unwrap();
        let (released, wait) = self
            .wake
            .wait_timeout_while(released, Duration::from_secs(5), |released| !*released)
            .unwrap();
        if wait.timed_out() {
            self.starved.store(true, Ordering::SeqCst);
        }
        drop(released);
        self.inner.set(key, value)
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.inner.get(key)
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        self.inner.delete(key)
    }
}

pub struct Harness {
    pub session: Session,
    pub transport: Arc<ScriptedTransport>,
    pub store: TokenStore,
}

impl Harness {
    pub fn new(platform: Platform, prompt: PromptOutcome) -> Self {
        Self::with_storage(platform, prompt, Arc::new(MemoryStorage::new()))
    }

    pub fn with_storage(
        platform: Platform,
        prompt: PromptOutcome,
        storage: Arc<dyn SecureStorage>,
    ) -> Self {
        let transport = ScriptedTransport::new();
        let store = TokenStore::new(storage);
        let session = Session::with_clock(
            carrier_for_platform(platform, store.clone()),
            transport.clone(),
            Arc::new(ScriptedPrompt(prompt)),
            BackendEndpoints::new(BACKEND),
            Arc::new(|| NOW),
        );

        Self {
            session,
            transport,
            store,
        }
    }

    pub fn native() -> Self {
        Self::new(Platform::Native, PromptOutcome::Cancelled)
    }

    pub fn web() -> Self {
        Self::new(Platform::Web, PromptOutcome::Cancelled)
    }

    /// Seed the secure store as a previous launch would have left it.
    pub fn store_tokens(&self, access: Option<&str>, refresh: Option<&str>) {
        if let Some(access) = access {
            self.store.save_token(TokenName::AccessToken, access).unwrap();
        }
        if let Some(refresh) = refresh {
            self.store.save_token(TokenName::RefreshToken, refresh).unwrap();
        }
    }

    pub fn stored(&self, name: TokenName) -> Option<String> {
        self.store.get_token(name)
    }

    /// Restore a live native session for user `u-1` holding refresh token `r-1`.
    pub async fn signed_in_native(self) -> Self {
        self.store_tokens(Some(&access_token("u-1", NOW + 3600)), Some("r-1"));
        self.session.restore_session().await;
        assert!(self.session.user().is_some());
        self
    }

    /// Restore a live web session for user `w-1`.
    pub async fn signed_in_web(self) -> Self {
        self.transport.on(
            Method::GET,
            "/auth/session",
            vec![Reply::Json(200, session_user("w-1"))],
        );
        self.session.restore_session().await;
        assert!(self.session.user().is_some());
        self
    }
}

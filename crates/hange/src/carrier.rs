//! How the session credential travels to the backend.
//!
//! Native builds hold bearer tokens in the platform secure store; web builds
//! leave custody to http-only cookies managed by the backend. The session
//! picks one [`TokenCarrier`] at startup and never branches on platform.

use crate::http::{BackendEndpoints, HttpRequest, HttpTransport};
use crate::token_codec;
use crate::{AuthError, AuthResult, AuthUser};
use async_trait::async_trait;
use auth_redirect::AuthorizationCode;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tallyup_config_and_utils::Platform;
use tallyup_storage::{StorageResult, TokenName, TokenStore};
use tracing::{debug, info, warn};

/// Everything a carrier needs from the session for one operation.
pub struct CarrierContext<'a> {
    pub transport: &'a dyn HttpTransport,
    pub endpoints: &'a BackendEndpoints,
    /// Current time, unix seconds.
    pub now: i64,
}

/// A user and the credentials proving it, adopted as a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Grant {
    pub user: AuthUser,
    pub access_token: Option<String>,
    /// `None` keeps whatever refresh token the session already holds.
    pub refresh_token: Option<String>,
}

/// What startup restoration found in custody.
#[derive(Debug, Clone, PartialEq)]
pub enum Restored {
    /// A live session, usable without a network round trip.
    Adopted(Grant),
    /// No live session, but a refresh may recover one.
    NeedsRefresh { refresh_token: Option<String> },
    /// Nothing to restore.
    Empty,
}

/// What `fetch_with_auth` does with a request that came back 401.
#[derive(Debug, Clone)]
pub enum RetryDecision {
    /// Send this request once more.
    Retry(HttpRequest),
    /// Hand the original 401 back to the caller.
    ReturnOriginal,
    /// Hand back the 401 and tell listeners the user must sign in.
    LoginRequired,
}

/// Session as seen by request retry logic once a refresh has settled.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshedSession {
    /// New access token, if the refresh produced one.
    pub access_token: Option<String>,
    /// Whether a user is still signed in after the refresh.
    pub user_present: bool,
}

/// Session custody strategy.
#[async_trait]
pub trait TokenCarrier: Send + Sync {
    fn platform(&self) -> Platform;

    /// Inspect custody at startup.
    async fn restore(&self, ctx: &CarrierContext<'_>) -> AuthResult<Restored>;

    /// Exchange an authorization code at `/auth/token`.
    async fn exchange(
        &self,
        ctx: &CarrierContext<'_>,
        code: &AuthorizationCode,
    ) -> AuthResult<Grant>;

    /// One round trip to `/auth/refresh`. Does not persist anything.
    async fn refresh(
        &self,
        ctx: &CarrierContext<'_>,
        refresh_token: Option<String>,
    ) -> AuthResult<Grant>;

    /// Durably store an adopted grant.
    fn persist(&self, grant: &Grant) -> StorageResult<()>;

    /// Attach the session credential to an outgoing request.
    fn authorize(&self, request: HttpRequest, access_token: Option<&str>)
        -> AuthResult<HttpRequest>;

    /// Decide whether a request rejected with 401 is worth one more try.
    fn retry_decision(
        &self,
        request: &HttpRequest,
        refreshed: &RefreshedSession,
    ) -> AuthResult<RetryDecision>;

    /// Drop custody. `forced` sign-outs follow a rejected refresh, where the
    /// backend has already invalidated the session.
    async fn sign_out(&self, ctx: &CarrierContext<'_>, forced: bool) -> AuthResult<()>;
}

/// Choose the carrier for a platform.
pub fn carrier_for_platform(platform: Platform, store: TokenStore) -> Arc<dyn TokenCarrier> {
    match platform {
        Platform::Native => Arc::new(BearerTokenCarrier::new(store)),
        Platform::Web => Arc::new(CookieSessionCarrier::new()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPair {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl TokenPair {
    fn into_grant(self) -> AuthResult<Grant> {
        let decoded = token_codec::decode(&self.access_token)?;
        Ok(Grant {
            user: decoded.user,
            access_token: Some(self.access_token),
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
        })
    }
}

/// Native custody: bearer tokens in the secure store.
pub struct BearerTokenCarrier {
    store: TokenStore,
}

impl BearerTokenCarrier {
    pub fn new(store: TokenStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }
}

#[async_trait]
impl TokenCarrier for BearerTokenCarrier {
    fn platform(&self) -> Platform {
        Platform::Native
    }

    async fn restore(&self, ctx: &CarrierContext<'_>) -> AuthResult<Restored> {
        let refresh_token = self.store.get_token(TokenName::RefreshToken);
        let Some(access_token) = self.store.get_token(TokenName::AccessToken) else {
            return Ok(refresh_or_empty(refresh_token));
        };

        match token_codec::decode(&access_token) {
            Ok(decoded) if !decoded.is_expired_at(ctx.now) => {
                debug!(expires_at = decoded.expires_at, "Stored access token is live");
                Ok(Restored::Adopted(Grant {
                    user: decoded.user,
                    access_token: Some(access_token),
                    refresh_token,
                }))
            }
            Ok(decoded) => {
                debug!(expires_at = decoded.expires_at, now = ctx.now, "Stored access token expired");
                Ok(refresh_or_empty(refresh_token))
            }
            Err(e) => {
                debug!(error = %e, "Stored access token is not decodable");
                Ok(refresh_or_empty(refresh_token))
            }
        }
    }

    async fn exchange(
        &self,
        ctx: &CarrierContext<'_>,
        code: &AuthorizationCode,
    ) -> AuthResult<Grant> {
        let response = ctx
            .transport
            .send(HttpRequest::post(ctx.endpoints.token()).multipart(exchange_fields(code, None)))
            .await?;

        if !response.is_success() {
            return Err(AuthError::Exchange(format!(
                "HTTP {}: {}",
                response.status,
                response.text()
            )));
        }

        response.json::<TokenPair>()?.into_grant()
    }

    async fn refresh(
        &self,
        ctx: &CarrierContext<'_>,
        refresh_token: Option<String>,
    ) -> AuthResult<Grant> {
        let refresh_token = refresh_token.ok_or(AuthError::NotLoggedIn)?;

        let response = ctx
            .transport
            .send(HttpRequest::post(ctx.endpoints.refresh()).json(json!({
                "platform": "native",
                "refreshToken": refresh_token,
            })))
            .await?;

        if !response.is_success() {
            return Err(AuthError::RefreshRejected {
                status: response.status.as_u16(),
            });
        }

        response.json::<TokenPair>()?.into_grant()
    }

    fn persist(&self, grant: &Grant) -> StorageResult<()> {
        if let Some(access_token) = &grant.access_token {
            self.store.save_token(TokenName::AccessToken, access_token)?;
        }
        if let Some(refresh_token) = &grant.refresh_token {
            self.store.save_token(TokenName::RefreshToken, refresh_token)?;
        }
        Ok(())
    }

    fn authorize(
        &self,
        request: HttpRequest,
        access_token: Option<&str>,
    ) -> AuthResult<HttpRequest> {
        match access_token {
            Some(token) => request.bearer(token),
            None => Ok(request),
        }
    }

    fn retry_decision(
        &self,
        request: &HttpRequest,
        refreshed: &RefreshedSession,
    ) -> AuthResult<RetryDecision> {
        match refreshed.access_token.as_deref() {
            Some(token) => Ok(RetryDecision::Retry(request.clone().bearer(token)?)),
            None => Ok(RetryDecision::ReturnOriginal),
        }
    }

    async fn sign_out(&self, _ctx: &CarrierContext<'_>, _forced: bool) -> AuthResult<()> {
        self.store.clear()?;
        info!("Cleared stored tokens");
        Ok(())
    }
}

fn refresh_or_empty(refresh_token: Option<String>) -> Restored {
    match refresh_token {
        Some(token) => Restored::NeedsRefresh {
            refresh_token: Some(token),
        },
        None => Restored::Empty,
    }
}

fn exchange_fields(code: &AuthorizationCode, platform: Option<&str>) -> Vec<(String, String)> {
    let mut fields = vec![("code".to_string(), code.code.clone())];
    if let Some(platform) = platform {
        fields.push(("platform".to_string(), platform.to_string()));
    }
    if let Some(verifier) = &code.code_verifier {
        fields.push(("code_verifier".to_string(), verifier.clone()));
    }
    fields
}

#[derive(Debug, Deserialize)]
struct ExchangeAck {
    #[serde(default)]
    success: bool,
}

/// Web custody: http-only cookies set by the backend.
#[derive(Debug, Default)]
pub struct CookieSessionCarrier;

impl CookieSessionCarrier {
    pub fn new() -> Self {
        Self
    }

    /// `GET /auth/session`; `Ok(None)` when the backend has no session.
    async fn introspect(&self, ctx: &CarrierContext<'_>) -> AuthResult<Option<AuthUser>> {
        let response = ctx
            .transport
            .send(HttpRequest::get(ctx.endpoints.session()).with_credentials())
            .await?;

        if !response.is_success() {
            debug!(status = %response.status, "No web session");
            return Ok(None);
        }

        Ok(Some(response.json()?))
    }
}

#[async_trait]
impl TokenCarrier for CookieSessionCarrier {
    fn platform(&self) -> Platform {
        Platform::Web
    }

    async fn restore(&self, ctx: &CarrierContext<'_>) -> AuthResult<Restored> {
        Ok(match self.introspect(ctx).await? {
            Some(user) => Restored::Adopted(Grant {
                user,
                access_token: None,
                refresh_token: None,
            }),
            None => Restored::NeedsRefresh {
                refresh_token: None,
            },
        })
    }

    async fn exchange(
        &self,
        ctx: &CarrierContext<'_>,
        code: &AuthorizationCode,
    ) -> AuthResult<Grant> {
        let response = ctx
            .transport
            .send(
                HttpRequest::post(ctx.endpoints.token())
                    .multipart(exchange_fields(code, Some("web")))
                    .with_credentials(),
            )
            .await?;

        if !response.is_success() {
            return Err(AuthError::Exchange(format!(
                "HTTP {}: {}",
                response.status,
                response.text()
            )));
        }

        if !response.json::<ExchangeAck>()?.success {
            return Err(AuthError::Exchange(
                "backend did not accept the authorization code".to_string(),
            ));
        }

        let user = self.introspect(ctx).await?.ok_or_else(|| {
            AuthError::Exchange("no session after code exchange".to_string())
        })?;

        Ok(Grant {
            user,
            access_token: None,
            refresh_token: None,
        })
    }

    async fn refresh(
        &self,
        ctx: &CarrierContext<'_>,
        _refresh_token: Option<String>,
    ) -> AuthResult<Grant> {
        let response = ctx
            .transport
            .send(
                HttpRequest::post(ctx.endpoints.refresh())
                    .json(json!({ "platform": "web" }))
                    .with_credentials(),
            )
            .await?;

        if !response.is_success() {
            return Err(AuthError::RefreshRejected {
                status: response.status.as_u16(),
            });
        }

        let user = self.introspect(ctx).await?.ok_or_else(|| {
            AuthError::Exchange("no session after refresh".to_string())
        })?;

        Ok(Grant {
            user,
            access_token: None,
            refresh_token: None,
        })
    }

    fn persist(&self, _grant: &Grant) -> StorageResult<()> {
        Ok(())
    }

    fn authorize(
        &self,
        request: HttpRequest,
        _access_token: Option<&str>,
    ) -> AuthResult<HttpRequest> {
        Ok(request.with_credentials())
    }

    fn retry_decision(
        &self,
        request: &HttpRequest,
        refreshed: &RefreshedSession,
    ) -> AuthResult<RetryDecision> {
        if refreshed.user_present {
            Ok(RetryDecision::Retry(request.clone().with_credentials()))
        } else {
            Ok(RetryDecision::LoginRequired)
        }
    }

    async fn sign_out(&self, ctx: &CarrierContext<'_>, forced: bool) -> AuthResult<()> {
        if forced {
            debug!("Session already rejected by backend, skipping logout call");
            return Ok(());
        }

        let response = ctx
            .transport
            .send(HttpRequest::post(ctx.endpoints.logout()).with_credentials())
            .await?;

        if !response.is_success() {
            warn!(status = %response.status, "Logout endpoint returned an error");
        }
        Ok(())
    }
}

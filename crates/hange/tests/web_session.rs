//! Web (cookie) session lifecycle.

mod common;

use common::*;
use futures_util::future::join_all;
use hange::{HttpBody, HttpRequest, Method, SessionEvent, SessionState};
use reqwest::header::AUTHORIZATION;
use serde_json::json;
use std::time::Duration;
use tallyup_config_and_utils::Platform;

#[tokio::test]
async fn fresh_install_checks_session_then_refresh_silently() {
    let h = Harness::web();
    h.transport
        .on(Method::GET, "/auth/session", vec![Reply::Status(401)]);
    h.transport
        .on(Method::POST, "/auth/refresh", vec![Reply::Status(401)]);
    let mut events = h.session.events();

    let snapshot = h.session.restore_session().await;

    assert!(snapshot.user.is_none());
    assert!(!snapshot.loading);
    assert_eq!(snapshot.state, SessionState::Anonymous);
    assert!(snapshot.last_error.is_none());
    assert!(events.try_recv().is_err());
    let requests = h.transport.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].url.ends_with("/auth/session"));
    assert!(requests[1].url.ends_with("/auth/refresh"));
    assert!(requests.iter().all(|r| r.with_credentials));
}

#[tokio::test]
async fn live_cookie_session_restores_from_introspection() {
    let h = Harness::web();
    h.transport.on(
        Method::GET,
        "/auth/session",
        vec![Reply::Json(200, session_user("w-1"))],
    );

    let snapshot = h.session.restore_session().await;

    assert_eq!(snapshot.state, SessionState::Authenticated);
    let user = snapshot.user.unwrap();
    assert_eq!(user.id, "w-1");
    assert_eq!(user.cookie_expiration, Some(NOW + 3600));
    assert_eq!(h.transport.requests().len(), 1);
    assert!(h.session.access_token().is_none());
}

#[tokio::test]
async fn expired_cookie_session_recovers_through_refresh() {
    let h = Harness::web();
    h.transport.on(
        Method::GET,
        "/auth/session",
        vec![Reply::Status(401), Reply::Json(200, session_user("w-2"))],
    );
    h.transport.on(Method::POST, "/auth/refresh", vec![Reply::Status(200)]);

    let snapshot = h.session.restore_session().await;

    assert_eq!(snapshot.user.unwrap().id, "w-2");
    let refresh = &h.transport.requests_to(Method::POST, "/auth/refresh")[0];
    assert_eq!(refresh.body, HttpBody::Json(json!({ "platform": "web" })));
    assert!(refresh.with_credentials);
}

#[tokio::test]
async fn session_endpoint_unreachable_restores_anonymous() {
    let h = Harness::web();
    h.transport
        .on(Method::GET, "/auth/session", vec![Reply::NetworkDown]);

    let snapshot = h.session.restore_session().await;

    assert!(snapshot.user.is_none());
    assert_eq!(snapshot.state, SessionState::Anonymous);
    assert!(!snapshot.loading);
}

#[tokio::test]
async fn refresh_returns_no_token_for_cookie_sessions() {
    let h = Harness::web().signed_in_web().await;
    h.transport.on(Method::POST, "/auth/refresh", vec![Reply::Status(200)]);

    assert!(h.session.refresh_tokens(None).await.is_none());

    assert_eq!(h.session.user().unwrap().id, "w-1");
    assert_eq!(h.transport.count(Method::POST, "/auth/refresh"), 1);
    assert_eq!(h.transport.count(Method::GET, "/auth/session"), 2);
}

#[tokio::test]
async fn concurrent_refreshes_share_one_request() {
    let h = Harness::web().signed_in_web().await;
    h.transport.on(Method::POST, "/auth/refresh", vec![Reply::Status(200)]);
    h.transport
        .delay(Method::POST, "/auth/refresh", Duration::from_millis(50));

    join_all((0..6).map(|_| h.session.refresh_tokens(None))).await;

    assert_eq!(h.transport.count(Method::POST, "/auth/refresh"), 1);
}

#[tokio::test]
async fn fetch_includes_credentials_and_retries_after_refresh() {
    let h = Harness::web().signed_in_web().await;
    h.transport.on(
        Method::GET,
        "/api/splits",
        vec![Reply::Status(401), Reply::Json(200, json!({ "splits": [] }))],
    );
    h.transport.on(Method::POST, "/auth/refresh", vec![Reply::Status(200)]);

    let response = h
        .session
        .fetch_with_auth(HttpRequest::get(format!("{}/api/splits", BACKEND)))
        .await
        .unwrap();

    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(h.transport.count(Method::POST, "/auth/refresh"), 1);
    let sent = h.transport.requests_to(Method::GET, "/api/splits");
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|r| r.with_credentials));
    assert!(sent.iter().all(|r| r.headers.get(AUTHORIZATION).is_none()));
}

#[tokio::test]
async fn fetch_after_rejected_refresh_requires_login() {
    let h = Harness::web().signed_in_web().await;
    h.transport
        .on(Method::GET, "/api/splits", vec![Reply::Status(401)]);
    h.transport
        .on(Method::POST, "/auth/refresh", vec![Reply::Status(401)]);
    let mut events = h.session.events();

    let response = h
        .session
        .fetch_with_auth(HttpRequest::get(format!("{}/api/splits", BACKEND)))
        .await
        .unwrap();

    assert_eq!(response.status.as_u16(), 401);
    assert_eq!(h.transport.count(Method::GET, "/api/splits"), 1);
    assert!(h.session.user().is_none());
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::SignedOut { forced: true }
    );
    assert_eq!(events.recv().await.unwrap(), SessionEvent::LoginRequired);
    // The backend already dropped the session; no logout round trip.
    assert_eq!(h.transport.count(Method::POST, "/auth/logout"), 0);
}

#[tokio::test]
async fn sign_in_exchanges_code_with_platform_and_introspects() {
    let h = Harness::new(Platform::Web, code("auth-code", Some("verifier-1")));
    h.transport.on(
        Method::GET,
        "/auth/session",
        vec![Reply::Status(401), Reply::Json(200, session_user("w-9"))],
    );
    h.transport
        .on(Method::POST, "/auth/refresh", vec![Reply::Status(401)]);
    h.session.restore_session().await;
    h.transport.on(
        Method::POST,
        "/auth/token",
        vec![Reply::Json(200, json!({ "success": true }))],
    );

    let user = h.session.sign_in().await.unwrap().unwrap();

    assert_eq!(user.id, "w-9");
    assert_eq!(h.session.state(), SessionState::Authenticated);
    let exchange = &h.transport.requests_to(Method::POST, "/auth/token")[0];
    assert_eq!(exchange.form_field("code"), Some("auth-code"));
    assert_eq!(exchange.form_field("platform"), Some("web"));
    assert_eq!(exchange.form_field("code_verifier"), Some("verifier-1"));
    assert!(exchange.with_credentials);
}

#[tokio::test]
async fn unaccepted_exchange_fails_sign_in() {
    let h = Harness::new(Platform::Web, code("auth-code", None));
    h.transport
        .on(Method::GET, "/auth/session", vec![Reply::Status(401)]);
    h.transport
        .on(Method::POST, "/auth/refresh", vec![Reply::Status(401)]);
    h.session.restore_session().await;
    h.transport.on(
        Method::POST,
        "/auth/token",
        vec![Reply::Json(200, json!({ "success": false }))],
    );

    assert!(h.session.sign_in().await.is_err());
    assert!(h.session.user().is_none());
    assert!(h.session.last_error().is_some());
}

#[tokio::test]
async fn sign_out_posts_logout_and_clears_state() {
    let h = Harness::web().signed_in_web().await;
    h.transport.on(Method::POST, "/auth/logout", vec![Reply::Status(200)]);

    h.session.sign_out().await;

    assert!(h.session.user().is_none());
    assert_eq!(h.session.state(), SessionState::SignedOut);
    let logout = &h.transport.requests_to(Method::POST, "/auth/logout")[0];
    assert!(logout.with_credentials);
}

#[tokio::test]
async fn sign_out_clears_state_when_logout_fails() {
    let h = Harness::web().signed_in_web().await;
    h.transport
        .on(Method::POST, "/auth/logout", vec![Reply::NetworkDown]);

    h.session.sign_out().await;

    assert!(h.session.user().is_none());
    assert_eq!(h.session.state(), SessionState::SignedOut);
}
